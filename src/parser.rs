//! Frame codec: PPP framing, the common `code/id/length` header, a
//! bounds-checked reader for configuration options, and the single
//! reusable output buffer.
//!
//! Все многобайтовые поля в big-endian.
//!
//! ```text
//!  FF 03 | protocol (2) | code | id | length (2) | payload ...
//! ```

use std::net::Ipv4Addr;
use crate::error::CodecError;

/// Address + Control
pub const ALLSTATIONS: u8 = 0xFF;
pub const UI: u8 = 0x03;
/// Address, Control, Protocol
pub const PPP_HDRLEN: usize = 4;
/// Code, ID, Length
pub const HEADER_LEN: usize = 4;
/// Самый большой кадр, который мы когда-либо собираем
pub const MAX_FRAME: usize = PPP_HDRLEN + 16384;

/// Кадр PPP после снятия Address/Control и поля протокола
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PppFrame<'a> {
    pub protocol: u16,
    pub info: &'a [u8],
}

/// Accepts both the full `FF 03` prefix and its compressed absence, and
/// both 2-byte and 1-byte (odd first octet) protocol fields.
pub fn parse_ppp_frame(buf: &[u8]) -> Result<PppFrame<'_>, CodecError> {
    let mut rest = buf;
    if rest.len() >= 2 && rest[0] == ALLSTATIONS && rest[1] == UI {
        rest = &rest[2..];
    }
    let first = *rest.first().ok_or(CodecError::TooShort(buf.len()))?;
    if first & 0x01 == 0x01 {
        return Ok(PppFrame { protocol: first as u16, info: &rest[1..] });
    }
    if rest.len() < 2 {
        return Err(CodecError::TooShort(buf.len()));
    }
    Ok(PppFrame {
        protocol: u16::from_be_bytes([rest[0], rest[1]]),
        info: &rest[2..],
    })
}

/// Пакет управляющего протокола: заголовок + полезная нагрузка
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    pub code: u8,
    pub id: u8,
    pub length: u16,
    pub payload: &'a [u8],
    /// Header and payload exactly as declared by `length`.
    pub raw: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Trailing bytes past `length` are padding and ignored.
    pub fn parse(buf: &'a [u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_LEN {
            return Err(CodecError::TooShort(buf.len()));
        }
        let length = u16::from_be_bytes([buf[2], buf[3]]);
        let declared = length as usize;
        if declared < HEADER_LEN || declared > buf.len() {
            return Err(CodecError::BadLength { declared, available: buf.len() });
        }
        Ok(Packet {
            code: buf[0],
            id: buf[1],
            length,
            payload: &buf[HEADER_LEN..declared],
            raw: &buf[..declared],
        })
    }
}

/// Одна опция (CI): type, len, value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ci<'a> {
    pub ty: u8,
    pub data: &'a [u8],
    /// Type, length and value bytes.
    pub raw: &'a [u8],
}

impl<'a> Ci<'a> {
    pub fn ci_len(&self) -> usize {
        self.raw.len()
    }

    pub fn short(&self) -> Option<u16> {
        (self.data.len() >= 2).then(|| u16::from_be_bytes([self.data[0], self.data[1]]))
    }

    pub fn long(&self) -> Option<u32> {
        (self.data.len() >= 4)
            .then(|| u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]))
    }

    pub fn addr_at(&self, offset: usize) -> Option<Ipv4Addr> {
        let b = self.data.get(offset..offset + 4)?;
        Some(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
    }
}

/// Курсор по буферу: любое чтение за границей даёт ошибку, а не панику
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Underrun { need: n, have: self.remaining() });
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Всё, что осталось
    pub fn rest(&mut self) -> &'a [u8] {
        let s = &self.buf[self.pos..];
        self.pos = self.buf.len();
        s
    }

    /// `u8` length followed by that many bytes.
    pub fn counted(&mut self) -> Result<&'a [u8], CodecError> {
        let start = self.pos;
        let n = self.u8()? as usize;
        self.bytes(n).map_err(|e| {
            self.pos = start;
            e
        })
    }

    /// Reads one CI; on error the cursor is left where it was.
    pub fn ci(&mut self) -> Result<Ci<'a>, CodecError> {
        let start = self.pos;
        let res = self.ci_at(start);
        if res.is_err() {
            self.pos = start;
        }
        res
    }

    fn ci_at(&mut self, start: usize) -> Result<Ci<'a>, CodecError> {
        let ty = self.u8()?;
        let len = self.u8()? as usize;
        if len < 2 {
            return Err(CodecError::BadLength { declared: len, available: self.buf.len() - start });
        }
        let data = self.bytes(len - 2)?;
        Ok(Ci { ty, data, raw: &self.buf[start..self.pos] })
    }

    pub fn peek_ci(&self) -> Option<Ci<'a>> {
        self.clone().ci().ok()
    }
}

pub fn put_ci_void(out: &mut Vec<u8>, ty: u8) {
    out.extend_from_slice(&[ty, 2]);
}

pub fn put_ci_short(out: &mut Vec<u8>, ty: u8, v: u16) {
    out.extend_from_slice(&[ty, 4]);
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_ci_long(out: &mut Vec<u8>, ty: u8, v: u32) {
    out.extend_from_slice(&[ty, 6]);
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_ci_addr(out: &mut Vec<u8>, ty: u8, addr: Ipv4Addr) {
    out.extend_from_slice(&[ty, 6]);
    out.extend_from_slice(&addr.octets());
}

/// Типы опций отклонённого списка, если каждая из них побайтно совпадает
/// с отправленной и порядок сохранён.
pub fn rejected_in_order(sent: &[u8], rejected: &[u8]) -> Option<Vec<u8>> {
    let mut ours = Reader::new(sent);
    let mut theirs = Reader::new(rejected);
    let mut types = Vec::new();
    while !theirs.is_empty() {
        let rej = theirs.ci().ok()?;
        loop {
            let sent_ci = ours.ci().ok()?;
            if sent_ci.raw == rej.raw {
                types.push(rej.ty);
                break;
            }
        }
    }
    Some(types)
}

/// Собирает полный кадр в новый Vec (для тестов и разовых пакетов)
pub fn wrap_packet(protocol: u16, code: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let length = (HEADER_LEN + payload.len()) as u16;
    let mut ppp = vec![ALLSTATIONS, UI];
    ppp.extend_from_slice(&protocol.to_be_bytes());
    ppp.push(code);
    ppp.push(id);
    ppp.extend_from_slice(&length.to_be_bytes());
    ppp.extend_from_slice(payload);
    ppp
}

/// Единственный буфер вывода: в каждый момент собирается не более одного кадра
#[derive(Debug)]
pub struct OutputBuffer {
    buf: Vec<u8>,
    limit: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(MAX_FRAME)
    }
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        OutputBuffer { buf: Vec::with_capacity(limit), limit }
    }

    pub fn build(&mut self, protocol: u16, code: u8, id: u8, payload: &[u8]) -> Result<&[u8], CodecError> {
        let length = HEADER_LEN + payload.len();
        let total = PPP_HDRLEN + length;
        if total > self.limit || length > u16::MAX as usize {
            return Err(CodecError::Overflow(total));
        }
        self.buf.clear();
        self.buf.extend_from_slice(&[ALLSTATIONS, UI]);
        self.buf.extend_from_slice(&protocol.to_be_bytes());
        self.buf.push(code);
        self.buf.push(id);
        self.buf.extend_from_slice(&(length as u16).to_be_bytes());
        self.buf.extend_from_slice(payload);
        Ok(&self.buf)
    }

    /// Последний собранный кадр
    pub fn last(&self) -> &[u8] {
        &self.buf
    }
}
