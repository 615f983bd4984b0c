mod common;

use common::*;
use ppp_rust::fsm::*;
use ppp_rust::link::LinkCtx;
use ppp_rust::types::codes::*;
use ppp_rust::types::protocols;

/// Колбэки без опций: фиксированный список CI и заданный ответ на запрос
struct Dummy {
    ci: Vec<u8>,
    reply: u8,
    ups: u32,
    downs: u32,
    naks: u32,
    closed: Vec<CloseReason>,
}

impl Dummy {
    fn new() -> Self {
        Dummy { ci: vec![0x01, 0x04, 0x05, 0xDC], reply: CONFACK, ups: 0, downs: 0, naks: 0, closed: Vec::new() }
    }
}

impl FsmCallbacks for Dummy {
    fn reset_ci(&mut self) {}

    fn add_ci(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ci);
    }

    fn ack_ci(&mut self, ci: &[u8]) -> bool {
        ci == self.ci.as_slice()
    }

    fn nak_ci(&mut self, _ci: &[u8]) -> bool {
        self.naks += 1;
        true
    }

    fn rej_ci(&mut self, _ci: &[u8]) -> bool {
        true
    }

    fn req_ci(&mut self, _ci: &mut Vec<u8>) -> u8 {
        self.reply
    }

    fn up(&mut self, _ctx: &mut LinkCtx) {
        self.ups += 1;
    }

    fn down(&mut self, _ctx: &mut LinkCtx) {
        self.downs += 1;
    }

    fn closed(&mut self, _ctx: &mut LinkCtx, reason: CloseReason) {
        self.closed.push(reason);
    }
}

fn setup(limits: FsmLimits) -> (Fsm, Dummy, LinkCtx, MockSystem) {
    let mock = MockSystem::new();
    let ctx = LinkCtx::new(0, Box::new(mock.clone()));
    (Fsm::new(protocols::IPCP, limits), Dummy::new(), ctx, mock)
}

fn pkt(code: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let f = frame(protocols::IPCP, code, id, payload);
    f[4..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_open_waits_for_lower_layer() {
        let (mut fsm, mut cb, mut ctx, mock) = setup(FsmLimits::default());
        fsm.open(&mut cb, &mut ctx);
        assert_eq!(fsm.state, FsmState::Closed);
        assert!(mock.sent_of(protocols::IPCP).is_empty());

        fsm.lower_up(&mut cb, &mut ctx);
        assert_eq!(fsm.state, FsmState::ReqSent);
        let sent = mock.sent_of(protocols::IPCP);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].code, CONFREQ);
        assert_eq!(sent[0].payload, cb.ci);
        assert_eq!(ctx.callouts.len(), 1, "таймер повтора взведён");
    }

    #[test]
    pub fn test_stale_ack_is_ignored() {
        let (mut fsm, mut cb, mut ctx, _mock) = setup(FsmLimits::default());
        fsm.lower_up(&mut cb, &mut ctx);
        fsm.open(&mut cb, &mut ctx);
        let reqid = fsm.reqid;

        let p = pkt(CONFACK, reqid.wrapping_add(9), &cb.ci);
        fsm.input(&mut cb, &mut ctx, &p);
        assert_eq!(fsm.state, FsmState::ReqSent, "чужой id не меняет состояние");

        let p = pkt(CONFACK, reqid, &cb.ci);
        fsm.input(&mut cb, &mut ctx, &p);
        assert_eq!(fsm.state, FsmState::AckRcvd);
    }

    #[test]
    pub fn test_ack_with_altered_options_is_ignored() {
        let (mut fsm, mut cb, mut ctx, _mock) = setup(FsmLimits::default());
        fsm.lower_up(&mut cb, &mut ctx);
        fsm.open(&mut cb, &mut ctx);
        fsm.input(&mut cb, &mut ctx, &pkt(CONFACK, fsm.reqid, &[0x01, 0x04, 0x05, 0xDD]));
        assert_eq!(fsm.state, FsmState::ReqSent);
    }

    #[test]
    pub fn test_full_open_sequence() {
        let (mut fsm, mut cb, mut ctx, mock) = setup(FsmLimits::default());
        fsm.lower_up(&mut cb, &mut ctx);
        fsm.open(&mut cb, &mut ctx);

        fsm.input(&mut cb, &mut ctx, &pkt(CONFREQ, 5, &[0x03, 0x06, 10, 0, 0, 2]));
        assert_eq!(fsm.state, FsmState::AckSent);
        let ack = mock.last_of(protocols::IPCP, CONFACK).unwrap();
        assert_eq!(ack.id, 5);
        assert_eq!(ack.payload, vec![0x03, 0x06, 10, 0, 0, 2], "Ack повторяет CI пира");

        // дубликат запроса: снова Ack, состояние то же
        fsm.input(&mut cb, &mut ctx, &pkt(CONFREQ, 5, &[0x03, 0x06, 10, 0, 0, 2]));
        assert_eq!(fsm.state, FsmState::AckSent);

        let p = pkt(CONFACK, fsm.reqid, &cb.ci);
        fsm.input(&mut cb, &mut ctx, &p);
        assert_eq!(fsm.state, FsmState::Open);
        assert_eq!(cb.ups, 1);
        assert!(ctx.callouts.is_empty(), "таймер снят после Open");
    }

    #[test]
    pub fn test_nak_loop_bound_closes() {
        let limits = FsmLimits { max_nak_loops: 3, ..FsmLimits::default() };
        let (mut fsm, mut cb, mut ctx, mock) = setup(limits);
        fsm.lower_up(&mut cb, &mut ctx);
        fsm.open(&mut cb, &mut ctx);

        for _ in 0..3 {
            let id = fsm.reqid;
            fsm.input(&mut cb, &mut ctx, &pkt(CONFNAK, id, &[0x01, 0x04, 0x05, 0x00]));
        }
        assert_eq!(fsm.state, FsmState::Closed);
        assert_eq!(cb.closed, vec![CloseReason::NakLoop]);
        assert_eq!(cb.naks, 2, "третий Nak уже не применяется");
        assert!(ctx.callouts.is_empty());

        // дальнейшие Nak ничего не открывают
        let before = mock.sent_of(protocols::IPCP).iter().filter(|s| s.code == CONFREQ).count();
        let id = fsm.reqid;
        fsm.input(&mut cb, &mut ctx, &pkt(CONFNAK, id, &[0x01, 0x04, 0x05, 0x00]));
        assert_eq!(fsm.state, FsmState::Closed);
        let after = mock.sent_of(protocols::IPCP).iter().filter(|s| s.code == CONFREQ).count();
        assert_eq!(before, after);
    }

    #[test]
    pub fn test_retransmit_then_no_response() {
        let limits = FsmLimits { max_configure: 2, ..FsmLimits::default() };
        let (mut fsm, mut cb, mut ctx, mock) = setup(limits);
        fsm.lower_up(&mut cb, &mut ctx);
        fsm.open(&mut cb, &mut ctx);
        let reqid = fsm.reqid;

        fsm.timeout(&mut cb, &mut ctx);
        fsm.timeout(&mut cb, &mut ctx);
        assert_eq!(fsm.state, FsmState::ReqSent);
        fsm.timeout(&mut cb, &mut ctx);
        assert_eq!(fsm.state, FsmState::Closed);
        assert_eq!(cb.closed, vec![CloseReason::NoResponse]);

        let reqs: Vec<_> = mock.sent_of(protocols::IPCP).into_iter().filter(|s| s.code == CONFREQ).collect();
        assert_eq!(reqs.len(), 3);
        assert!(reqs.iter().all(|r| r.id == reqid), "повтор использует тот же id");
    }

    #[test]
    pub fn test_retransmit_exhausted_after_naks() {
        let limits = FsmLimits { max_configure: 1, ..FsmLimits::default() };
        let (mut fsm, mut cb, mut ctx, _mock) = setup(limits);
        fsm.lower_up(&mut cb, &mut ctx);
        fsm.open(&mut cb, &mut ctx);

        fsm.input(&mut cb, &mut ctx, &pkt(CONFNAK, fsm.reqid, &[0x01, 0x04, 0x05, 0x00]));
        fsm.timeout(&mut cb, &mut ctx);
        fsm.timeout(&mut cb, &mut ctx);
        assert_eq!(cb.closed, vec![CloseReason::PeerKeptNaking]);
    }

    #[test]
    pub fn test_close_from_open_sends_terminate() {
        let (mut fsm, mut cb, mut ctx, mock) = setup(FsmLimits::default());
        fsm.lower_up(&mut cb, &mut ctx);
        fsm.open(&mut cb, &mut ctx);
        fsm.input(&mut cb, &mut ctx, &pkt(CONFREQ, 1, &[]));
        let p = pkt(CONFACK, fsm.reqid, &cb.ci);
        fsm.input(&mut cb, &mut ctx, &p);
        assert_eq!(fsm.state, FsmState::Open);

        fsm.close(&mut cb, &mut ctx);
        assert_eq!(fsm.state, FsmState::TermSent);
        assert_eq!(cb.downs, 1);
        let term = mock.last_of(protocols::IPCP, TERMREQ).unwrap();

        fsm.input(&mut cb, &mut ctx, &pkt(TERMACK, term.id, &[]));
        assert_eq!(fsm.state, FsmState::Closed);
        assert_eq!(cb.closed, vec![CloseReason::Requested]);
        assert!(ctx.callouts.is_empty());
    }

    #[test]
    pub fn test_close_while_negotiating_is_immediate() {
        let (mut fsm, mut cb, mut ctx, mock) = setup(FsmLimits::default());
        fsm.lower_up(&mut cb, &mut ctx);
        fsm.open(&mut cb, &mut ctx);
        fsm.close(&mut cb, &mut ctx);
        assert_eq!(fsm.state, FsmState::Closed);
        assert_eq!(cb.closed, vec![CloseReason::Requested]);
        assert!(mock.last_of(protocols::IPCP, TERMREQ).is_none());
        assert!(ctx.callouts.is_empty());
    }

    #[test]
    pub fn test_terminate_retransmits_then_closes() {
        let limits = FsmLimits { max_terminate: 1, ..FsmLimits::default() };
        let (mut fsm, mut cb, mut ctx, mock) = setup(limits);
        fsm.lower_up(&mut cb, &mut ctx);
        fsm.open(&mut cb, &mut ctx);
        fsm.input(&mut cb, &mut ctx, &pkt(CONFREQ, 1, &[]));
        let p = pkt(CONFACK, fsm.reqid, &cb.ci);
        fsm.input(&mut cb, &mut ctx, &p);
        fsm.close(&mut cb, &mut ctx);

        fsm.timeout(&mut cb, &mut ctx);
        assert_eq!(fsm.state, FsmState::TermSent);
        fsm.timeout(&mut cb, &mut ctx);
        assert_eq!(fsm.state, FsmState::Closed);
        let terms = mock.sent_of(protocols::IPCP).into_iter().filter(|s| s.code == TERMREQ).count();
        assert_eq!(terms, 2);
    }

    #[test]
    pub fn test_request_in_closed_gets_terminate_ack() {
        let (mut fsm, mut cb, mut ctx, mock) = setup(FsmLimits::default());
        fsm.lower_up(&mut cb, &mut ctx);
        fsm.input(&mut cb, &mut ctx, &pkt(CONFREQ, 4, &[]));
        assert_eq!(fsm.state, FsmState::Closed);
        let ack = mock.last_of(protocols::IPCP, TERMACK).unwrap();
        assert_eq!(ack.id, 4);
    }

    #[test]
    pub fn test_passive_open_waits_for_peer() {
        let (mut fsm, mut cb, mut ctx, mock) = setup(FsmLimits::default());
        fsm.lower_up(&mut cb, &mut ctx);
        fsm.passive_open(&mut cb, &mut ctx);
        assert_eq!(fsm.state, FsmState::Listen);
        assert!(mock.sent_of(protocols::IPCP).is_empty());

        fsm.input(&mut cb, &mut ctx, &pkt(CONFREQ, 1, &[]));
        let codes: Vec<u8> = mock.sent_of(protocols::IPCP).iter().map(|s| s.code).collect();
        assert_eq!(codes, vec![CONFREQ, CONFACK]);
        assert_eq!(fsm.state, FsmState::AckSent);
    }

    #[test]
    pub fn test_passive_returns_to_listen_without_answer() {
        let limits = FsmLimits { max_configure: 0, ..FsmLimits::default() };
        let (mut fsm, mut cb, mut ctx, _mock) = setup(limits);
        fsm.lower_up(&mut cb, &mut ctx);
        fsm.passive_open(&mut cb, &mut ctx);
        fsm.input(&mut cb, &mut ctx, &pkt(CONFREQ, 1, &[]));
        fsm.timeout(&mut cb, &mut ctx);
        assert_eq!(fsm.state, FsmState::Listen);
        assert!(cb.closed.is_empty());
    }

    #[test]
    pub fn test_nak_reply_keeps_req_sent() {
        let (mut fsm, mut cb, mut ctx, _mock) = setup(FsmLimits::default());
        cb.reply = CONFNAK;
        fsm.lower_up(&mut cb, &mut ctx);
        fsm.open(&mut cb, &mut ctx);
        fsm.input(&mut cb, &mut ctx, &pkt(CONFREQ, 1, &[0x01, 0x04, 0x00, 0x40]));
        assert_eq!(fsm.state, FsmState::ReqSent);
    }

    #[test]
    pub fn test_unknown_code_gets_code_reject() {
        let (mut fsm, mut cb, mut ctx, mock) = setup(FsmLimits::default());
        fsm.lower_up(&mut cb, &mut ctx);
        fsm.open(&mut cb, &mut ctx);
        let raw = pkt(42, 3, &[0xAA, 0xBB]);
        fsm.input(&mut cb, &mut ctx, &raw);
        let rej = mock.last_of(protocols::IPCP, CODEREJ).unwrap();
        assert_eq!(rej.payload, raw);
        assert_eq!(fsm.state, FsmState::ReqSent);
    }

    #[test]
    pub fn test_malformed_packet_dropped() {
        let (mut fsm, mut cb, mut ctx, mock) = setup(FsmLimits::default());
        fsm.lower_up(&mut cb, &mut ctx);
        fsm.open(&mut cb, &mut ctx);
        mock.clear();
        fsm.input(&mut cb, &mut ctx, &[CONFACK, 1, 0x00, 0x40]);
        assert_eq!(fsm.state, FsmState::ReqSent);
        assert!(mock.sent_of(protocols::IPCP).is_empty());
    }
}
