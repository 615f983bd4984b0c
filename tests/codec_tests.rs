use ppp_rust::error::CodecError;
use ppp_rust::parser::*;
use ppp_rust::types::protocols;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_packet_too_short() {
        assert_eq!(Packet::parse(&[0x01, 0x02, 0x03]), Err(CodecError::TooShort(3)));
    }

    #[test]
    pub fn test_packet_declared_length_out_of_range() {
        // длина меньше заголовка
        assert_eq!(
            Packet::parse(&[0x01, 0x01, 0x00, 0x03]),
            Err(CodecError::BadLength { declared: 3, available: 4 })
        );
        // длина больше, чем есть байт
        assert_eq!(
            Packet::parse(&[0x01, 0x01, 0x00, 0x0A, 0x01, 0x04]),
            Err(CodecError::BadLength { declared: 10, available: 6 })
        );
    }

    #[test]
    pub fn test_packet_padding_ignored() {
        let buf = [0x09, 0x07, 0x00, 0x06, 0xAB, 0xCD, 0xEE, 0xEE];
        let pkt = Packet::parse(&buf).unwrap();
        assert_eq!(pkt.code, 9);
        assert_eq!(pkt.id, 7);
        assert_eq!(pkt.length, 6);
        assert_eq!(pkt.payload, &[0xAB, 0xCD]);
        assert_eq!(pkt.raw.len(), 6);
    }

    #[test]
    pub fn test_ppp_frame_full_and_compressed() {
        let full = [0xFF, 0x03, 0xC0, 0x21, 0x01];
        let f = parse_ppp_frame(&full).unwrap();
        assert_eq!(f.protocol, protocols::LCP);
        assert_eq!(f.info, &[0x01]);

        // без Address/Control
        let no_ac = [0x80, 0x21, 0x02];
        let f = parse_ppp_frame(&no_ac).unwrap();
        assert_eq!(f.protocol, protocols::IPCP);
        assert_eq!(f.info, &[0x02]);

        // однобайтовый протокол (нечётный первый октет)
        let short_proto = [0x21, 0x45, 0x00];
        let f = parse_ppp_frame(&short_proto).unwrap();
        assert_eq!(f.protocol, protocols::IP);
        assert_eq!(f.info, &[0x45, 0x00]);

        assert!(parse_ppp_frame(&[]).is_err());
        assert!(parse_ppp_frame(&[0xFF, 0x03, 0xC0]).is_err());
    }

    #[test]
    pub fn test_reader_underrun_does_not_advance() {
        let mut rd = Reader::new(&[1, 2, 3]);
        assert_eq!(rd.u32(), Err(CodecError::Underrun { need: 4, have: 3 }));
        assert_eq!(rd.position(), 0);
        assert_eq!(rd.u16(), Ok(0x0102));
        assert_eq!(rd.remaining(), 1);
    }

    #[test]
    pub fn test_reader_bad_ci_restores_position() {
        // len = 1 меньше минимальных двух байт
        let mut rd = Reader::new(&[0x01, 0x01, 0x00]);
        assert!(matches!(rd.ci(), Err(CodecError::BadLength { declared: 1, .. })));
        assert_eq!(rd.position(), 0);

        // len выходит за буфер
        let mut rd = Reader::new(&[0x05, 0x06, 0x00, 0x01]);
        assert!(matches!(rd.ci(), Err(CodecError::Underrun { .. })));
        assert_eq!(rd.position(), 0);
    }

    #[test]
    pub fn test_ci_accessors() {
        let buf = [0x03, 0x06, 10, 0, 0, 1, 0x07, 0x02];
        let mut rd = Reader::new(&buf);
        let addr = rd.ci().unwrap();
        assert_eq!(addr.ty, 3);
        assert_eq!(addr.ci_len(), 6);
        assert_eq!(addr.addr_at(0), Some(std::net::Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(addr.long(), Some(0x0A00_0001));
        let void = rd.peek_ci().unwrap();
        assert_eq!(void.ty, 7);
        assert_eq!(void.data.len(), 0);
        assert_eq!(void.short(), None);
    }

    #[test]
    pub fn test_rejected_in_order() {
        let mut sent = Vec::new();
        put_ci_short(&mut sent, 1, 1500);
        put_ci_long(&mut sent, 5, 0xDEAD_BEEF);
        put_ci_void(&mut sent, 7);

        let mut rej = Vec::new();
        put_ci_long(&mut rej, 5, 0xDEAD_BEEF);
        put_ci_void(&mut rej, 7);
        assert_eq!(rejected_in_order(&sent, &rej), Some(vec![5, 7]));

        // нарушен порядок
        let mut swapped = Vec::new();
        put_ci_void(&mut swapped, 7);
        put_ci_long(&mut swapped, 5, 0xDEAD_BEEF);
        assert_eq!(rejected_in_order(&sent, &swapped), None);

        // другое значение
        let mut altered = Vec::new();
        put_ci_long(&mut altered, 5, 0xDEAD_BEEE);
        assert_eq!(rejected_in_order(&sent, &altered), None);
    }

    #[test]
    pub fn test_output_buffer_builds_frame() {
        let mut out = OutputBuffer::default();
        let frame = out.build(protocols::LCP, 0x02, 0x01, &[0x03, 0x04, 0xC0, 0x23]).unwrap().to_vec();
        let expected = vec![
            0xFF, 0x03, 0xC0, 0x21, // PPP
            0x02, 0x01, 0x00, 0x08, // Configure-Ack, ID=1, Length=8
            0x03, 0x04, 0xC0, 0x23, // Option: PAP
        ];
        assert_eq!(frame, expected);
        assert_eq!(out.last(), expected.as_slice());
        assert_eq!(wrap_packet(protocols::LCP, 0x02, 0x01, &[0x03, 0x04, 0xC0, 0x23]), expected);
    }

    #[test]
    pub fn test_output_buffer_overflow() {
        let mut out = OutputBuffer::new(16);
        assert_eq!(out.build(protocols::LCP, 1, 1, &[0u8; 20]), Err(CodecError::Overflow(28)));
        assert!(out.build(protocols::LCP, 1, 1, &[0u8; 8]).is_ok());
    }
}
