//! PAP (RFC 1334): one Authenticate-Request, one verdict.

use std::time::Duration;

use crate::link::{LinkCtx, LinkEvent, Timeout};
use crate::log::*;
use crate::parser::{Packet, Reader};
use crate::types::protocols;

pub const PAP_AUTHREQ: u8 = 1;
pub const PAP_AUTHACK: u8 = 2;
pub const PAP_AUTHNAK: u8 = 3;

pub const DEFTIMEOUT: Duration = Duration::from_secs(3);
pub const DEFMAXTRANSMITS: u32 = 10;

pub fn pap_code_name(code: u8) -> &'static str {
    match code {
        PAP_AUTHREQ => "Authenticate-Request",
        PAP_AUTHACK => "Authenticate-Ack",
        PAP_AUTHNAK => "Authenticate-Nak",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PapClientState {
    Closed,
    Pending,
    AuthReq,
    Open,
    BadAuth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PapServerState {
    Closed,
    Pending,
    Listen,
    Open,
    BadAuth,
}

#[derive(Debug, Clone)]
pub struct Pap {
    pub client: PapClientState,
    pub server: PapServerState,
    pub user: String,
    passwd: String,
    pub id: u8,
    pub transmits: u32,
    pub max_transmits: u32,
    pub timeout: Duration,
    /// How long to wait for the peer's request; zero waits forever.
    pub req_timeout: Duration,
}

impl Default for Pap {
    fn default() -> Self {
        Pap {
            client: PapClientState::Closed,
            server: PapServerState::Closed,
            user: String::new(),
            passwd: String::new(),
            id: 0,
            transmits: 0,
            max_transmits: DEFMAXTRANSMITS,
            timeout: DEFTIMEOUT,
            req_timeout: Duration::ZERO,
        }
    }
}

fn message(payload: &[u8]) -> String {
    let mut rd = Reader::new(payload);
    match rd.counted() {
        Ok(msg) => String::from_utf8_lossy(msg).into_owned(),
        Err(_) => String::new(),
    }
}

impl Pap {
    pub fn new() -> Self {
        Self::default()
    }

    fn send(&self, ctx: &mut LinkCtx, code: u8, id: u8, payload: &[u8]) {
        log_line(&format!("Send PAP {} #{}", pap_code_name(code), id));
        ctx.send(protocols::PAP, code, id, payload);
    }

    fn send_verdict(&self, ctx: &mut LinkCtx, code: u8, id: u8, msg: &str) {
        let msg = &msg.as_bytes()[..msg.len().min(u8::MAX as usize)];
        let mut payload = Vec::with_capacity(1 + msg.len());
        payload.push(msg.len() as u8);
        payload.extend_from_slice(msg);
        self.send(ctx, code, id, &payload);
    }

    pub fn lower_up(&mut self, ctx: &mut LinkCtx) {
        if self.client == PapClientState::Pending {
            self.client = PapClientState::Closed;
            self.auth_with_peer(ctx);
        }
        if self.server == PapServerState::Pending {
            self.server = PapServerState::Closed;
            self.auth_peer(ctx);
        }
    }

    pub fn lower_down(&mut self, ctx: &mut LinkCtx) {
        ctx.untimeout(&Timeout::PapRequest);
        ctx.untimeout(&Timeout::PapListen);
        self.client = PapClientState::Closed;
        self.server = PapServerState::Closed;
    }

    /// Authenticate ourselves with credentials from the host.
    pub fn auth_with_peer(&mut self, ctx: &mut LinkCtx) {
        if !ctx.lower_up {
            self.client = PapClientState::Pending;
            return;
        }
        let Some((user, passwd)) = ctx.sys.get_user_passwd(ctx.unit) else {
            log_error("❌ No PAP user/password configured");
            self.client = PapClientState::BadAuth;
            ctx.notify(LinkEvent::AuthWithPeerFailure(protocols::PAP));
            return;
        };
        self.user = user;
        self.passwd = passwd;
        self.transmits = 0;
        self.send_authreq(ctx);
        self.client = PapClientState::AuthReq;
    }

    /// Wait for the peer's Authenticate-Request.
    pub fn auth_peer(&mut self, ctx: &mut LinkCtx) {
        if !ctx.lower_up {
            self.server = PapServerState::Pending;
            return;
        }
        self.server = PapServerState::Listen;
        if !self.req_timeout.is_zero() {
            ctx.timeout(self.req_timeout, Timeout::PapListen);
        }
    }

    fn send_authreq(&mut self, ctx: &mut LinkCtx) {
        self.id = self.id.wrapping_add(1);
        let user = &self.user.as_bytes()[..self.user.len().min(u8::MAX as usize)];
        let passwd = &self.passwd.as_bytes()[..self.passwd.len().min(u8::MAX as usize)];
        let mut payload = Vec::with_capacity(2 + user.len() + passwd.len());
        payload.push(user.len() as u8);
        payload.extend_from_slice(user);
        payload.push(passwd.len() as u8);
        payload.extend_from_slice(passwd);
        self.send(ctx, PAP_AUTHREQ, self.id, &payload);
        self.transmits += 1;
        ctx.timeout(self.timeout, Timeout::PapRequest);
    }

    pub fn request_timeout(&mut self, ctx: &mut LinkCtx) {
        if self.client != PapClientState::AuthReq {
            return;
        }
        if self.transmits >= self.max_transmits {
            log_line("No response to PAP authenticate-requests");
            self.client = PapClientState::BadAuth;
            ctx.notify(LinkEvent::AuthWithPeerFailure(protocols::PAP));
            return;
        }
        self.send_authreq(ctx);
    }

    pub fn listen_timeout(&mut self, ctx: &mut LinkCtx) {
        if self.server != PapServerState::Listen {
            return;
        }
        log_line("Peer never sent a PAP authenticate-request");
        self.server = PapServerState::BadAuth;
        ctx.notify(LinkEvent::AuthPeerFailure(protocols::PAP));
    }

    pub fn input(&mut self, ctx: &mut LinkCtx, data: &[u8]) {
        let pkt = match Packet::parse(data) {
            Ok(p) => p,
            Err(e) => {
                log_debug(&format!("PAP: dropped malformed packet: {}", e));
                return;
            }
        };
        log_line(&format!("Received PAP {} *{}", pap_code_name(pkt.code), pkt.id));
        match pkt.code {
            PAP_AUTHREQ => self.rauthreq(ctx, pkt.id, pkt.payload),
            PAP_AUTHACK => self.rauthack(ctx, pkt.id, pkt.payload),
            PAP_AUTHNAK => self.rauthnak(ctx, pkt.id, pkt.payload),
            code => log_debug(&format!("PAP: unknown code {}", code)),
        }
    }

    fn rauthreq(&mut self, ctx: &mut LinkCtx, id: u8, payload: &[u8]) {
        match self.server {
            PapServerState::Listen => {}
            // повтор уже обработанного запроса
            PapServerState::Open => return self.send_verdict(ctx, PAP_AUTHACK, id, ""),
            PapServerState::BadAuth => return self.send_verdict(ctx, PAP_AUTHNAK, id, ""),
            _ => return,
        }

        let mut rd = Reader::new(payload);
        let (Ok(user), Ok(passwd)) = (rd.counted(), rd.counted()) else {
            log_debug("PAP: short Authenticate-Request");
            return;
        };
        let user = String::from_utf8_lossy(user).into_owned();
        let passwd = String::from_utf8_lossy(passwd).into_owned();

        let (ok, msg) = ctx.sys.check_login(ctx.unit, &user, &passwd);
        ctx.untimeout(&Timeout::PapListen);
        if ok {
            self.send_verdict(ctx, PAP_AUTHACK, id, &msg);
            self.server = PapServerState::Open;
            log_line(&format!("✅ PAP peer authentication succeeded for {}", user));
            ctx.notify(LinkEvent::AuthPeerSuccess(protocols::PAP));
        } else {
            self.send_verdict(ctx, PAP_AUTHNAK, id, &msg);
            self.server = PapServerState::BadAuth;
            log_line(&format!("❌ PAP peer authentication failed for {}", user));
            ctx.notify(LinkEvent::AuthPeerFailure(protocols::PAP));
        }
    }

    fn rauthack(&mut self, ctx: &mut LinkCtx, id: u8, payload: &[u8]) {
        if self.client != PapClientState::AuthReq || id != self.id {
            return;
        }
        ctx.untimeout(&Timeout::PapRequest);
        let msg = message(payload);
        if !msg.is_empty() {
            log_line(&format!("PAP: {}", msg));
        }
        self.client = PapClientState::Open;
        log_line("✅ PAP authentication succeeded");
        ctx.notify(LinkEvent::AuthWithPeerSuccess(protocols::PAP));
    }

    fn rauthnak(&mut self, ctx: &mut LinkCtx, id: u8, payload: &[u8]) {
        if self.client != PapClientState::AuthReq || id != self.id {
            return;
        }
        ctx.untimeout(&Timeout::PapRequest);
        log_line(&format!("❌ PAP authentication failed: {}", message(payload)));
        self.client = PapClientState::BadAuth;
        ctx.notify(LinkEvent::AuthWithPeerFailure(protocols::PAP));
    }

    pub fn protocol_reject(&mut self, ctx: &mut LinkCtx) {
        if matches!(self.server, PapServerState::Listen | PapServerState::Open) {
            ctx.notify(LinkEvent::AuthPeerFailure(protocols::PAP));
        }
        if matches!(self.client, PapClientState::AuthReq | PapClientState::Open) {
            ctx.notify(LinkEvent::AuthWithPeerFailure(protocols::PAP));
        }
        self.lower_down(ctx);
    }
}
