//! CHAP (RFC 1994) in both roles.
//!
//! Authenticator: sends a Challenge, checks the Response against the
//! shared secret. Authenticatee: answers Challenges and waits for the
//! verdict. Each role has its own small state machine that follows LCP
//! up/down rather than a Configure exchange.

use std::time::Duration;

use md5::{Digest, Md5};
use rand::Rng;

use crate::link::{LinkCtx, LinkEvent, Timeout};
use crate::log::*;
use crate::parser::{Packet, Reader};
use crate::types::protocols;

pub const CHAP_CHALLENGE: u8 = 1;
pub const CHAP_RESPONSE: u8 = 2;
pub const CHAP_SUCCESS: u8 = 3;
pub const CHAP_FAILURE: u8 = 4;

pub const MIN_CHALLENGE_LEN: usize = 16;
pub const MAX_CHALLENGE_LEN: usize = 24;

pub const DEFTIMEOUT: Duration = Duration::from_secs(3);
pub const DEFMAXTRANSMITS: u32 = 10;

pub fn chap_code_name(code: u8) -> &'static str {
    match code {
        CHAP_CHALLENGE => "Challenge",
        CHAP_RESPONSE => "Response",
        CHAP_SUCCESS => "Success",
        CHAP_FAILURE => "Failure",
        _ => "Unknown",
    }
}

/// Алгоритм дайджеста (значение из опции Authentication-Protocol)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapDigest {
    Md5,
}

impl ChapDigest {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            5 => Some(ChapDigest::Md5),
            _ => None,
        }
    }

    /// MD5 over `id ‖ secret ‖ challenge`.
    pub fn compute(self, id: u8, secret: &[u8], challenge: &[u8]) -> Vec<u8> {
        match self {
            ChapDigest::Md5 => {
                let mut h = Md5::new();
                h.update([id]);
                h.update(secret);
                h.update(challenge);
                h.finalize().to_vec()
            }
        }
    }
}

/// Сравнение без раннего выхода по первому отличию
pub fn digests_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Our role as authenticator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Closed,
    /// `auth_peer` requested before LCP came up.
    Pending,
    ChallengeSent,
    Open,
    BadAuth,
}

/// Our role as the side being authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Closed,
    Pending,
    /// Waiting for a Challenge or for the verdict on our Response.
    Listen,
    Open,
}

/// Success/Failure body: counted message, or the bare remainder from
/// peers that skip the length octet.
fn parse_message(payload: &[u8]) -> String {
    let mut rd = Reader::new(payload);
    match rd.counted() {
        Ok(msg) if rd.is_empty() => String::from_utf8_lossy(msg).into_owned(),
        _ => String::from_utf8_lossy(payload).into_owned(),
    }
}

fn counted(out: &mut Vec<u8>, bytes: &[u8]) {
    let n = bytes.len().min(u8::MAX as usize);
    out.push(n as u8);
    out.extend_from_slice(&bytes[..n]);
}

#[derive(Debug, Clone)]
pub struct Chap {
    pub our_name: String,
    pub digest: ChapDigest,
    pub server: ServerState,
    pub client: ClientState,
    pub challenge: Vec<u8>,
    /// Id of the outstanding Challenge.
    pub chal_id: u8,
    pub chal_transmits: u32,
    pub max_transmits: u32,
    pub timeout: Duration,
    /// Id of the Challenge we last answered; the verdict must carry it.
    pub resp_id: Option<u8>,
    pub client_failures: u32,
    /// `None` retries forever after Failure.
    pub max_client_retries: Option<u32>,
    pub peer_name: String,
}

impl Chap {
    pub fn new(our_name: &str) -> Self {
        Chap {
            our_name: our_name.to_string(),
            digest: ChapDigest::Md5,
            server: ServerState::Closed,
            client: ClientState::Closed,
            challenge: Vec::new(),
            chal_id: 0,
            chal_transmits: 0,
            max_transmits: DEFMAXTRANSMITS,
            timeout: DEFTIMEOUT,
            resp_id: None,
            client_failures: 0,
            max_client_retries: None,
            peer_name: String::new(),
        }
    }

    fn send(&self, ctx: &mut LinkCtx, code: u8, id: u8, payload: &[u8]) {
        log_line(&format!("Send CHAP {} #{}", chap_code_name(code), id));
        ctx.send(protocols::CHAP, code, id, payload);
    }

    pub fn lower_up(&mut self, ctx: &mut LinkCtx) {
        if self.client == ClientState::Pending {
            self.client = ClientState::Listen;
        }
        if self.server == ServerState::Pending {
            self.server = ServerState::Closed;
            self.auth_peer(ctx);
        }
    }

    pub fn lower_down(&mut self, ctx: &mut LinkCtx) {
        if self.server == ServerState::ChallengeSent {
            ctx.untimeout(&Timeout::ChapChallenge);
        }
        self.server = ServerState::Closed;
        self.client = ClientState::Closed;
        self.challenge.clear();
        self.resp_id = None;
    }

    /// Start authenticating the peer.
    pub fn auth_peer(&mut self, ctx: &mut LinkCtx) {
        if !ctx.lower_up {
            self.server = ServerState::Pending;
            return;
        }
        let mut rng = rand::thread_rng();
        let len = rng.gen_range(MIN_CHALLENGE_LEN..=MAX_CHALLENGE_LEN);
        self.challenge = (0..len).map(|_| rng.gen()).collect();
        self.chal_id = self.chal_id.wrapping_add(1);
        self.chal_transmits = 0;
        self.send_challenge(ctx);
        self.server = ServerState::ChallengeSent;
    }

    /// Expect the peer to authenticate us.
    pub fn auth_with_peer(&mut self, ctx: &mut LinkCtx) {
        self.client = if ctx.lower_up { ClientState::Listen } else { ClientState::Pending };
    }

    fn send_challenge(&mut self, ctx: &mut LinkCtx) {
        let mut payload = Vec::with_capacity(1 + self.challenge.len() + self.our_name.len());
        counted(&mut payload, &self.challenge);
        payload.extend_from_slice(self.our_name.as_bytes());
        self.send(ctx, CHAP_CHALLENGE, self.chal_id, &payload);
        self.chal_transmits += 1;
        ctx.timeout(self.timeout, Timeout::ChapChallenge);
    }

    pub fn challenge_timeout(&mut self, ctx: &mut LinkCtx) {
        if self.server != ServerState::ChallengeSent {
            return;
        }
        if self.chal_transmits >= self.max_transmits {
            log_line("Peer failed to respond to CHAP challenge");
            self.server = ServerState::BadAuth;
            ctx.notify(LinkEvent::AuthPeerFailure(protocols::CHAP));
            return;
        }
        self.send_challenge(ctx);
    }

    pub fn input(&mut self, ctx: &mut LinkCtx, data: &[u8]) {
        let pkt = match Packet::parse(data) {
            Ok(p) => p,
            Err(e) => {
                log_debug(&format!("CHAP: dropped malformed packet: {}", e));
                return;
            }
        };
        log_line(&format!("Received CHAP {} *{}", chap_code_name(pkt.code), pkt.id));
        match pkt.code {
            CHAP_CHALLENGE => self.rchallenge(ctx, pkt.id, pkt.payload),
            CHAP_RESPONSE => self.rresponse(ctx, pkt.id, pkt.payload),
            CHAP_SUCCESS => self.rsuccess(ctx, pkt.id, pkt.payload),
            CHAP_FAILURE => self.rfailure(ctx, pkt.id, pkt.payload),
            code => log_debug(&format!("CHAP: unknown code {}", code)),
        }
    }

    fn rchallenge(&mut self, ctx: &mut LinkCtx, id: u8, payload: &[u8]) {
        if matches!(self.client, ClientState::Closed | ClientState::Pending) {
            return;
        }
        let mut rd = Reader::new(payload);
        let Ok(challenge) = rd.counted() else {
            log_debug("CHAP: short Challenge");
            return;
        };
        let name = String::from_utf8_lossy(rd.rest()).into_owned();

        let Some(secret) = ctx.sys.get_secret(ctx.unit, &name) else {
            log_error(&format!("❌ No CHAP secret found for authenticating us to {}", name));
            return;
        };
        let response = self.digest.compute(id, &secret, challenge);

        let mut out = Vec::with_capacity(1 + response.len() + self.our_name.len());
        counted(&mut out, &response);
        out.extend_from_slice(self.our_name.as_bytes());
        self.resp_id = Some(id);
        self.send(ctx, CHAP_RESPONSE, id, &out);
        if self.client == ClientState::Open {
            log_debug("CHAP: answered rechallenge");
        }
    }

    fn answers_response(&self, id: u8) -> bool {
        if self.resp_id == Some(id) {
            return true;
        }
        log_debug(&format!("CHAP: verdict *{} does not match our Response {:?}", id, self.resp_id));
        false
    }

    fn rresponse(&mut self, ctx: &mut LinkCtx, id: u8, payload: &[u8]) {
        if id != self.chal_id {
            log_debug(&format!("CHAP: Response *{} for stale challenge #{}", id, self.chal_id));
            return;
        }
        match self.server {
            ServerState::ChallengeSent => {}
            ServerState::Open => {
                self.send(ctx, CHAP_SUCCESS, id, &[]);
                return;
            }
            ServerState::BadAuth => {
                self.send(ctx, CHAP_FAILURE, id, &[]);
                return;
            }
            _ => return,
        }

        let mut rd = Reader::new(payload);
        let Ok(response) = rd.counted() else {
            log_debug("CHAP: short Response");
            return;
        };
        let name = String::from_utf8_lossy(rd.rest()).into_owned();
        ctx.untimeout(&Timeout::ChapChallenge);

        let expected = ctx
            .sys
            .get_secret(ctx.unit, &name)
            .map(|secret| self.digest.compute(id, &secret, &self.challenge));
        let ok = match expected {
            Some(e) => digests_equal(&e, response),
            None => {
                log_error(&format!("❌ No CHAP secret found for authenticating {}", name));
                false
            }
        };

        if ok {
            let mut msg = Vec::new();
            counted(&mut msg, format!("Welcome to {}.", self.our_name).as_bytes());
            self.send(ctx, CHAP_SUCCESS, id, &msg);
            self.server = ServerState::Open;
            self.peer_name = name;
            log_line(&format!("✅ CHAP peer authentication succeeded for {}", self.peer_name));
            ctx.notify(LinkEvent::AuthPeerSuccess(protocols::CHAP));
        } else {
            let mut msg = Vec::new();
            counted(&mut msg, b"Access denied");
            self.send(ctx, CHAP_FAILURE, id, &msg);
            self.server = ServerState::BadAuth;
            log_line(&format!("❌ CHAP peer authentication failed for {}", name));
            ctx.notify(LinkEvent::AuthPeerFailure(protocols::CHAP));
        }
    }

    fn rsuccess(&mut self, ctx: &mut LinkCtx, id: u8, payload: &[u8]) {
        if self.client != ClientState::Listen || !self.answers_response(id) {
            return;
        }
        let msg = parse_message(payload);
        if !msg.is_empty() {
            log_line(&format!("CHAP: {}", msg));
        }
        self.client = ClientState::Open;
        self.client_failures = 0;
        log_line("✅ CHAP authentication succeeded");
        ctx.notify(LinkEvent::AuthWithPeerSuccess(protocols::CHAP));
    }

    fn rfailure(&mut self, ctx: &mut LinkCtx, id: u8, payload: &[u8]) {
        if self.client != ClientState::Listen || !self.answers_response(id) {
            return;
        }
        let msg = parse_message(payload);
        log_line(&format!("❌ CHAP authentication failed: {}", msg));
        self.client_failures += 1;
        self.client = ClientState::Closed;
        self.resp_id = None;
        if let Some(max) = self.max_client_retries {
            if self.client_failures > max {
                ctx.notify(LinkEvent::AuthWithPeerFailure(protocols::CHAP));
                return;
            }
        }
        // сразу ждём новый Challenge
        self.auth_with_peer(ctx);
    }

    pub fn protocol_reject(&mut self, ctx: &mut LinkCtx) {
        if !matches!(self.server, ServerState::Closed | ServerState::Pending) {
            ctx.notify(LinkEvent::AuthPeerFailure(protocols::CHAP));
        }
        if !matches!(self.client, ClientState::Closed | ClientState::Pending) {
            ctx.notify(LinkEvent::AuthWithPeerFailure(protocols::CHAP));
        }
        self.lower_down(ctx);
    }
}
