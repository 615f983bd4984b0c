//! Generic Configure/Terminate negotiation automaton shared by LCP and IPCP.
//!
//! The engine owns ids, retransmission and state; everything that knows
//! about option formats lives behind [`FsmCallbacks`].
//!
//! ```text
//!  Closed ──open──▶ ReqSent ──Ack──▶ AckRcvd ──their Req, we Ack──▶ Open
//!                     │                                          ▲
//!                     └──their Req, we Ack──▶ AckSent ───Ack─────┘
//!  Open ──close──▶ TermSent ──TermAck──▶ Closed
//! ```

use std::time::Duration;

use crate::link::{LinkCtx, Timeout};
use crate::log::*;
use crate::parser::{Packet, HEADER_LEN};
use crate::types::codes::*;
use crate::types::protocol_name;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_CONFIGURE: u32 = 10;
pub const DEFAULT_MAX_TERMINATE: u32 = 2;
pub const DEFAULT_MAX_NAK_LOOPS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    Closed,
    /// Passive open: waiting for the peer's Configure-Request.
    Listen,
    ReqSent,
    AckSent,
    AckRcvd,
    Open,
    TermSent,
}

impl FsmState {
    pub fn negotiating(self) -> bool {
        matches!(self, FsmState::ReqSent | FsmState::AckSent | FsmState::AckRcvd)
    }
}

/// Why an automaton reported "closed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Local `close()`; also a finished Terminate exchange.
    Requested,
    LowerDown,
    PeerTerminated,
    /// Configure-Requests retransmitted to the limit without any reply.
    NoResponse,
    /// Retransmit limit reached, but the peer had been answering with Nak/Reject.
    PeerKeptNaking,
    /// Nak/Reject rounds reached `max_nak_loops`.
    NakLoop,
    ProtocolRejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsmLimits {
    pub timeout: Duration,
    /// Configure-Request retransmissions before giving up.
    pub max_configure: u32,
    /// Terminate-Request retransmissions before giving up.
    pub max_terminate: u32,
    pub max_nak_loops: u32,
}

impl Default for FsmLimits {
    fn default() -> Self {
        FsmLimits {
            timeout: DEFAULT_TIMEOUT,
            max_configure: DEFAULT_MAX_CONFIGURE,
            max_terminate: DEFAULT_MAX_TERMINATE,
            max_nak_loops: DEFAULT_MAX_NAK_LOOPS,
        }
    }
}

/// Protocol-specific half of the automaton.
pub trait FsmCallbacks {
    /// Start a fresh negotiation from the wanted options.
    fn reset_ci(&mut self);
    /// Append our current Configure-Request options.
    fn add_ci(&self, out: &mut Vec<u8>);
    /// Peer acked: must echo exactly what we sent.
    fn ack_ci(&mut self, ci: &[u8]) -> bool;
    /// Peer naked: adjust the options we ask for. `false` means a bad packet.
    fn nak_ci(&mut self, ci: &[u8]) -> bool;
    /// Peer rejected: stop asking for those options. `false` means a bad packet.
    fn rej_ci(&mut self, ci: &[u8]) -> bool;
    /// Inspect the peer's request, rewriting `ci` into the Nak or Reject
    /// list where needed. Returns the reply code.
    fn req_ci(&mut self, ci: &mut Vec<u8>) -> u8;
    fn up(&mut self, ctx: &mut LinkCtx);
    fn down(&mut self, ctx: &mut LinkCtx);
    fn closed(&mut self, ctx: &mut LinkCtx, reason: CloseReason);

    fn retransmit(&mut self, _ctx: &mut LinkCtx) {}

    /// Magic number for Echo-Reply; `None` means the protocol has no echo.
    fn echo_magic(&self) -> Option<u32> {
        None
    }

    /// Called before an Echo-Request is answered.
    fn echo_request(&mut self, _ctx: &mut LinkCtx, _id: u8, _data: &[u8]) {}

    fn echo_reply(&mut self, _ctx: &mut LinkCtx, _id: u8, _data: &[u8]) {}

    /// Codes outside the common set. `false` answers with Code-Reject.
    fn ext_code(&mut self, _ctx: &mut LinkCtx, _code: u8, _id: u8, _data: &[u8]) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct Fsm {
    pub protocol: u16,
    pub state: FsmState,
    /// Last id we used for any request.
    pub id: u8,
    /// Id of the outstanding Configure-Request or Terminate-Request.
    pub reqid: u8,
    pub retransmits: u32,
    pub nakloops: u32,
    pub limits: FsmLimits,
    /// Return to `Listen` instead of closing when the peer never answers.
    pub passive: bool,
    lower_up: bool,
    open_pending: bool,
    passive_pending: bool,
    replies: u32,
}

impl Fsm {
    pub fn new(protocol: u16, limits: FsmLimits) -> Self {
        Fsm {
            protocol,
            state: FsmState::Closed,
            id: 0,
            reqid: 0,
            retransmits: 0,
            nakloops: 0,
            limits,
            passive: false,
            lower_up: false,
            open_pending: false,
            passive_pending: false,
            replies: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        protocol_name(self.protocol)
    }

    pub fn is_lower_up(&self) -> bool {
        self.lower_up
    }

    fn timer(&self) -> Timeout {
        Timeout::Fsm(self.protocol)
    }

    fn set_state(&mut self, to: FsmState) {
        if self.state != to {
            log_state(self.name(), self.state, to);
            self.state = to;
        }
    }

    pub fn next_id(&mut self) -> u8 {
        self.id = self.id.wrapping_add(1);
        self.id
    }

    pub fn send(&self, ctx: &mut LinkCtx, code: u8, id: u8, payload: &[u8]) {
        log_send(self.name(), code, id, payload);
        ctx.send(self.protocol, code, id, payload);
    }

    pub fn lower_up(&mut self, cb: &mut dyn FsmCallbacks, ctx: &mut LinkCtx) {
        self.lower_up = true;
        if self.open_pending {
            self.open_pending = false;
            self.open(cb, ctx);
        } else if self.passive_pending {
            self.passive_pending = false;
            self.passive_open(cb, ctx);
        }
    }

    pub fn lower_down(&mut self, cb: &mut dyn FsmCallbacks, ctx: &mut LinkCtx) {
        self.lower_up = false;
        ctx.untimeout(&self.timer());
        match self.state {
            FsmState::Closed => {}
            FsmState::Open => {
                cb.down(ctx);
                self.set_state(FsmState::Closed);
                cb.closed(ctx, CloseReason::LowerDown);
            }
            _ => {
                self.set_state(FsmState::Closed);
                cb.closed(ctx, CloseReason::LowerDown);
            }
        }
    }

    /// Active open. Deferred until the lower layer comes up.
    pub fn open(&mut self, cb: &mut dyn FsmCallbacks, ctx: &mut LinkCtx) {
        if self.state.negotiating() || self.state == FsmState::Open {
            return;
        }
        if !self.lower_up {
            self.open_pending = true;
            return;
        }
        if self.state == FsmState::TermSent {
            ctx.untimeout(&self.timer());
        }
        self.start_negotiation(cb, ctx);
    }

    /// Wait for the peer to speak first.
    pub fn passive_open(&mut self, cb: &mut dyn FsmCallbacks, _ctx: &mut LinkCtx) {
        self.passive = true;
        if self.state != FsmState::Closed {
            return;
        }
        if !self.lower_up {
            self.passive_pending = true;
            return;
        }
        cb.reset_ci();
        self.set_state(FsmState::Listen);
    }

    pub fn close(&mut self, cb: &mut dyn FsmCallbacks, ctx: &mut LinkCtx) {
        self.open_pending = false;
        self.passive_pending = false;
        match self.state {
            FsmState::Closed | FsmState::TermSent => {}
            FsmState::Listen => {
                self.set_state(FsmState::Closed);
                cb.closed(ctx, CloseReason::Requested);
            }
            FsmState::ReqSent | FsmState::AckRcvd | FsmState::AckSent => {
                ctx.untimeout(&self.timer());
                self.set_state(FsmState::Closed);
                cb.closed(ctx, CloseReason::Requested);
            }
            FsmState::Open => {
                cb.down(ctx);
                self.retransmits = 0;
                self.reqid = self.next_id();
                self.send(ctx, TERMREQ, self.reqid, &[]);
                ctx.timeout(self.limits.timeout, self.timer());
                self.set_state(FsmState::TermSent);
            }
        }
    }

    /// Peer rejected this whole protocol.
    pub fn protocol_reject(&mut self, cb: &mut dyn FsmCallbacks, ctx: &mut LinkCtx) {
        self.open_pending = false;
        match self.state {
            FsmState::Closed => {}
            FsmState::Open => {
                cb.down(ctx);
                self.set_state(FsmState::Closed);
                cb.closed(ctx, CloseReason::ProtocolRejected);
            }
            _ => {
                ctx.untimeout(&self.timer());
                self.set_state(FsmState::Closed);
                cb.closed(ctx, CloseReason::ProtocolRejected);
            }
        }
    }

    pub fn input(&mut self, cb: &mut dyn FsmCallbacks, ctx: &mut LinkCtx, data: &[u8]) {
        let pkt = match Packet::parse(data) {
            Ok(p) => p,
            Err(e) => {
                log_debug(&format!("{}: dropped malformed packet: {}", self.name(), e));
                return;
            }
        };
        log_recv(self.name(), pkt.code, pkt.id, pkt.payload);

        match pkt.code {
            CONFREQ => self.rconfreq(cb, ctx, pkt.id, pkt.payload),
            CONFACK => self.rconfack(cb, ctx, pkt.id, pkt.payload),
            CONFNAK | CONFREJ => self.rconfnakrej(cb, ctx, pkt.code, pkt.id, pkt.payload),
            TERMREQ => self.rtermreq(cb, ctx, pkt.id),
            TERMACK => self.rtermack(cb, ctx),
            CODEREJ => self.rcoderej(pkt.payload),
            ECHOREQ | ECHOREP | DISCREQ if cb.echo_magic().is_some() => {
                self.recho(cb, ctx, pkt.code, pkt.id, pkt.payload)
            }
            code => {
                if !cb.ext_code(ctx, code, pkt.id, pkt.payload) {
                    self.send_code_reject(ctx, pkt.raw);
                }
            }
        }
    }

    pub fn timeout(&mut self, cb: &mut dyn FsmCallbacks, ctx: &mut LinkCtx) {
        match self.state {
            FsmState::ReqSent | FsmState::AckRcvd | FsmState::AckSent => {
                if self.retransmits >= self.limits.max_configure {
                    if self.passive && self.replies == 0 {
                        log_line(&format!("{}: no answer from peer, listening again", self.name()));
                        cb.reset_ci();
                        self.set_state(FsmState::Listen);
                        return;
                    }
                    let reason = if self.replies == 0 {
                        log_line(&format!(
                            "{}: peer did not answer {} Configure-Requests",
                            self.name(),
                            self.retransmits + 1
                        ));
                        CloseReason::NoResponse
                    } else {
                        log_line(&format!("{}: peer kept refusing our options", self.name()));
                        CloseReason::PeerKeptNaking
                    };
                    self.fail(cb, ctx, reason);
                    return;
                }
                cb.retransmit(ctx);
                self.retransmits += 1;
                self.send_conf_req(cb, ctx, true);
                if self.state == FsmState::AckRcvd {
                    self.set_state(FsmState::ReqSent);
                }
            }
            FsmState::TermSent => {
                if self.retransmits >= self.limits.max_terminate {
                    self.set_state(FsmState::Closed);
                    cb.closed(ctx, CloseReason::Requested);
                    return;
                }
                self.retransmits += 1;
                self.send(ctx, TERMREQ, self.reqid, &[]);
                ctx.timeout(self.limits.timeout, self.timer());
            }
            _ => {}
        }
    }

    fn start_negotiation(&mut self, cb: &mut dyn FsmCallbacks, ctx: &mut LinkCtx) {
        cb.reset_ci();
        self.nakloops = 0;
        self.replies = 0;
        self.send_conf_req(cb, ctx, false);
        self.set_state(FsmState::ReqSent);
    }

    /// A retransmission reuses the outstanding id; anything else takes a new one.
    fn send_conf_req(&mut self, cb: &mut dyn FsmCallbacks, ctx: &mut LinkCtx, retransmit: bool) {
        if !retransmit {
            self.retransmits = 0;
            self.reqid = self.next_id();
        }
        let mut ci = Vec::new();
        cb.add_ci(&mut ci);
        self.send(ctx, CONFREQ, self.reqid, &ci);
        ctx.untimeout(&self.timer());
        ctx.timeout(self.limits.timeout, self.timer());
    }

    fn fail(&mut self, cb: &mut dyn FsmCallbacks, ctx: &mut LinkCtx, reason: CloseReason) {
        ctx.untimeout(&self.timer());
        if self.state == FsmState::Open {
            cb.down(ctx);
        }
        self.set_state(FsmState::Closed);
        cb.closed(ctx, reason);
    }

    fn opened(&mut self, cb: &mut dyn FsmCallbacks, ctx: &mut LinkCtx) {
        ctx.untimeout(&self.timer());
        self.retransmits = 0;
        self.nakloops = 0;
        self.set_state(FsmState::Open);
        cb.up(ctx);
    }

    fn rconfreq(&mut self, cb: &mut dyn FsmCallbacks, ctx: &mut LinkCtx, id: u8, payload: &[u8]) {
        match self.state {
            FsmState::Closed => {
                self.send(ctx, TERMACK, id, &[]);
                return;
            }
            FsmState::TermSent => return,
            FsmState::Open => {
                cb.down(ctx);
                self.start_negotiation(cb, ctx);
            }
            FsmState::Listen => self.start_negotiation(cb, ctx),
            _ => {}
        }

        let mut ci = payload.to_vec();
        let code = cb.req_ci(&mut ci);
        self.send(ctx, code, id, &ci);

        if code == CONFACK {
            if self.state == FsmState::AckRcvd {
                self.opened(cb, ctx);
            } else {
                self.set_state(FsmState::AckSent);
            }
        } else if self.state != FsmState::AckRcvd {
            self.set_state(FsmState::ReqSent);
        }
    }

    fn rconfack(&mut self, cb: &mut dyn FsmCallbacks, ctx: &mut LinkCtx, id: u8, payload: &[u8]) {
        if id != self.reqid {
            log_debug(&format!("{}: ignoring Configure-Ack *{} (expected {})", self.name(), id, self.reqid));
            return;
        }
        if matches!(self.state, FsmState::Listen | FsmState::TermSent) {
            return;
        }
        if !cb.ack_ci(payload) {
            log_line(&format!("{}: received bad Configure-Ack", self.name()));
            return;
        }
        self.replies += 1;
        match self.state {
            FsmState::Closed => self.send(ctx, TERMACK, id, &[]),
            FsmState::ReqSent => {
                self.retransmits = 0;
                self.set_state(FsmState::AckRcvd);
            }
            FsmState::AckRcvd => {
                self.send_conf_req(cb, ctx, false);
                self.set_state(FsmState::ReqSent);
            }
            FsmState::AckSent => self.opened(cb, ctx),
            FsmState::Open => {
                cb.down(ctx);
                self.start_negotiation(cb, ctx);
            }
            FsmState::Listen | FsmState::TermSent => {}
        }
    }

    fn rconfnakrej(&mut self, cb: &mut dyn FsmCallbacks, ctx: &mut LinkCtx, code: u8, id: u8, payload: &[u8]) {
        if id != self.reqid {
            log_debug(&format!("{}: ignoring {} *{} (expected {})", self.name(), crate::types::code_name(code), id, self.reqid));
            return;
        }
        match self.state {
            FsmState::Closed => {
                self.send(ctx, TERMACK, id, &[]);
                return;
            }
            FsmState::Listen | FsmState::TermSent => return,
            _ => {}
        }

        self.nakloops += 1;
        if self.nakloops >= self.limits.max_nak_loops {
            log_line(&format!(
                "{}: giving up after {} Configure-Nak/Reject rounds",
                self.name(),
                self.nakloops
            ));
            self.fail(cb, ctx, CloseReason::NakLoop);
            return;
        }

        let ok = if code == CONFNAK { cb.nak_ci(payload) } else { cb.rej_ci(payload) };
        if !ok {
            log_line(&format!("{}: received bad {}", self.name(), crate::types::code_name(code)));
            return;
        }
        self.replies += 1;

        match self.state {
            FsmState::ReqSent | FsmState::AckSent => self.send_conf_req(cb, ctx, false),
            FsmState::AckRcvd => {
                self.send_conf_req(cb, ctx, false);
                self.set_state(FsmState::ReqSent);
            }
            FsmState::Open => {
                cb.down(ctx);
                self.send_conf_req(cb, ctx, false);
                self.set_state(FsmState::ReqSent);
            }
            _ => {}
        }
    }

    fn rtermreq(&mut self, cb: &mut dyn FsmCallbacks, ctx: &mut LinkCtx, id: u8) {
        match self.state {
            FsmState::AckRcvd | FsmState::AckSent => self.set_state(FsmState::ReqSent),
            FsmState::Open => {
                log_line(&format!("{} terminated at peer's request", self.name()));
                cb.down(ctx);
                self.send(ctx, TERMACK, id, &[]);
                self.set_state(FsmState::Closed);
                cb.closed(ctx, CloseReason::PeerTerminated);
                return;
            }
            _ => {}
        }
        self.send(ctx, TERMACK, id, &[]);
    }

    fn rtermack(&mut self, cb: &mut dyn FsmCallbacks, ctx: &mut LinkCtx) {
        match self.state {
            FsmState::TermSent => {
                ctx.untimeout(&self.timer());
                self.set_state(FsmState::Closed);
                cb.closed(ctx, CloseReason::Requested);
            }
            FsmState::Open => {
                cb.down(ctx);
                self.start_negotiation(cb, ctx);
            }
            FsmState::AckRcvd => self.set_state(FsmState::ReqSent),
            _ => {}
        }
    }

    fn rcoderej(&mut self, payload: &[u8]) {
        match payload.first() {
            Some(code) => log_line(&format!(
                "{}: peer rejected code {} ({})",
                self.name(),
                code,
                crate::types::code_name(*code)
            )),
            None => log_debug(&format!("{}: empty Code-Reject", self.name())),
        }
    }

    fn recho(&mut self, cb: &mut dyn FsmCallbacks, ctx: &mut LinkCtx, code: u8, id: u8, payload: &[u8]) {
        if self.state != FsmState::Open {
            return;
        }
        match code {
            ECHOREQ => {
                cb.echo_request(ctx, id, payload);
                let magic = cb.echo_magic().unwrap_or(0);
                let mut reply = magic.to_be_bytes().to_vec();
                if payload.len() > 4 {
                    reply.extend_from_slice(&payload[4..]);
                }
                self.send(ctx, ECHOREP, id, &reply);
            }
            ECHOREP => cb.echo_reply(ctx, id, payload),
            _ => {}
        }
    }

    fn send_code_reject(&mut self, ctx: &mut LinkCtx, rejected: &[u8]) {
        let room = (ctx.peer_mru as usize).saturating_sub(HEADER_LEN);
        let info = &rejected[..rejected.len().min(room)];
        let id = self.next_id();
        self.send(ctx, CODEREJ, id, info);
    }
}
