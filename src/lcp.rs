//! LCP: link-level options on top of the generic automaton.

use std::time::Duration;
use rand::Rng;

use crate::chap::ChapDigest;
use crate::fsm::{CloseReason, Fsm, FsmCallbacks, FsmLimits, FsmState};
use crate::link::{LinkCtx, LinkEvent, Timeout};
use crate::log::*;
use crate::parser::*;
use crate::types::codes::*;
use crate::types::protocols;

pub const CI_MRU: u8 = 1;
pub const CI_ASYNCMAP: u8 = 2;
pub const CI_AUTHTYPE: u8 = 3;
pub const CI_MAGICNUMBER: u8 = 5;
pub const CI_PCOMPRESSION: u8 = 7;
pub const CI_ACCOMPRESSION: u8 = 8;

pub const CILEN_VOID: usize = 2;
pub const CILEN_SHORT: usize = 4;
pub const CILEN_LONG: usize = 6;
/// type, len, protocol, digest, callback
pub const CILEN_CHAP: usize = 6;

pub const DEFMRU: u16 = 1500;
pub const MINMRU: u16 = 128;
pub const MAXMRU: u16 = 16384;

pub const CHAP_DIGEST_MD5: u8 = 5;
pub const CHAP_NOCALLBACK: u8 = 0;

/// Сколько раз подряд может совпасть magic number, прежде чем мы
/// заподозрим закольцованную линию
pub const DEFLOOPBACKFAIL: u32 = 10;

/// One of the want/allow/got/his option records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LcpOptions {
    pub neg_mru: bool,
    pub mru: u16,
    pub neg_asyncmap: bool,
    pub asyncmap: u32,
    pub neg_upap: bool,
    pub neg_chap: bool,
    pub chap_mdtype: u8,
    pub chap_callback: u8,
    pub neg_magicnumber: bool,
    pub magicnumber: u32,
    pub neg_pcompression: bool,
    pub neg_accompression: bool,
}

impl LcpOptions {
    pub fn none() -> Self {
        LcpOptions {
            neg_mru: false,
            mru: DEFMRU,
            neg_asyncmap: false,
            asyncmap: 0,
            neg_upap: false,
            neg_chap: false,
            chap_mdtype: CHAP_DIGEST_MD5,
            chap_callback: CHAP_NOCALLBACK,
            neg_magicnumber: false,
            magicnumber: 0,
            neg_pcompression: false,
            neg_accompression: false,
        }
    }

    /// Что мы просим по умолчанию
    pub fn wanted() -> Self {
        LcpOptions {
            neg_mru: true,
            neg_asyncmap: true,
            neg_magicnumber: true,
            neg_pcompression: true,
            neg_accompression: true,
            ..Self::none()
        }
    }

    /// Что мы разрешаем просить у нас
    pub fn allowed() -> Self {
        LcpOptions {
            neg_mru: true,
            mru: MAXMRU,
            neg_asyncmap: true,
            neg_upap: true,
            neg_chap: true,
            neg_magicnumber: true,
            neg_pcompression: true,
            neg_accompression: true,
            ..Self::none()
        }
    }

    pub fn auth_protocol(&self) -> Option<u16> {
        if self.neg_chap {
            Some(protocols::CHAP)
        } else if self.neg_upap {
            Some(protocols::PAP)
        } else {
            None
        }
    }
}

pub fn magic() -> u32 {
    let mut rng = rand::thread_rng();
    loop {
        let m: u32 = rng.gen();
        if m != 0 {
            return m;
        }
    }
}

fn put_chap_ci(out: &mut Vec<u8>, mdtype: u8, callback: u8) {
    out.extend_from_slice(&[CI_AUTHTYPE, CILEN_CHAP as u8]);
    out.extend_from_slice(&protocols::CHAP.to_be_bytes());
    out.push(mdtype);
    out.push(callback);
}

enum Verdict {
    Ack,
    Nak(Vec<u8>),
    Reject,
}

/// LCP side of the automaton: the option quadruple plus loop and
/// keepalive counters.
#[derive(Debug, Clone)]
pub struct LcpNegotiation {
    pub want: LcpOptions,
    pub allow: LcpOptions,
    pub got: LcpOptions,
    pub his: LcpOptions,
    pub numloops: u32,
    pub loopback_fail: u32,
    /// Zero disables keepalive.
    pub echo_interval: Duration,
    /// Unanswered Echo-Requests before the link is declared dead; zero never.
    pub echo_fails: u32,
    pub echo_pending: u32,
    /// Echo packets that came back carrying our own magic number.
    pub echo_loops: u32,
    auth_refused: bool,
}

impl LcpNegotiation {
    pub fn new(want: LcpOptions, allow: LcpOptions) -> Self {
        LcpNegotiation {
            want,
            allow,
            got: want,
            his: LcpOptions::none(),
            numloops: 0,
            loopback_fail: DEFLOOPBACKFAIL,
            echo_interval: Duration::ZERO,
            echo_fails: 0,
            echo_pending: 0,
            echo_loops: 0,
            auth_refused: false,
        }
    }

    fn note_loop(&mut self) {
        self.numloops += 1;
        if self.numloops >= self.loopback_fail {
            log_line(&format!(
                "LCP: magic number matched ours {} times, line is probably looped back",
                self.numloops
            ));
        }
    }

    /// Echo payload starts with the magic number we negotiated.
    fn is_own_magic(&self, data: &[u8]) -> bool {
        let Some(b) = data.get(..4) else {
            return false;
        };
        self.got.neg_magicnumber && u32::from_be_bytes([b[0], b[1], b[2], b[3]]) == self.got.magicnumber
    }

    fn preferred_auth_ci(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if self.allow.neg_chap {
            put_chap_ci(&mut out, CHAP_DIGEST_MD5, CHAP_NOCALLBACK);
        } else {
            put_ci_short(&mut out, CI_AUTHTYPE, protocols::PAP);
        }
        out
    }

    fn check_ci(&mut self, opt: &Ci<'_>) -> Verdict {
        match opt.ty {
            CI_MRU => {
                let Some(mru) = opt.short().filter(|_| opt.ci_len() == CILEN_SHORT) else {
                    return Verdict::Reject;
                };
                if !self.allow.neg_mru {
                    return Verdict::Reject;
                }
                if mru < MINMRU {
                    let mut nak = Vec::new();
                    put_ci_short(&mut nak, CI_MRU, MINMRU);
                    return Verdict::Nak(nak);
                }
                self.his.neg_mru = true;
                self.his.mru = mru;
                Verdict::Ack
            }
            CI_ASYNCMAP => {
                let Some(map) = opt.long().filter(|_| opt.ci_len() == CILEN_LONG) else {
                    return Verdict::Reject;
                };
                if !self.allow.neg_asyncmap {
                    return Verdict::Reject;
                }
                self.his.neg_asyncmap = true;
                self.his.asyncmap = map | self.allow.asyncmap;
                Verdict::Ack
            }
            CI_AUTHTYPE => {
                if (!self.allow.neg_chap && !self.allow.neg_upap)
                    || self.his.neg_chap
                    || self.his.neg_upap
                {
                    return Verdict::Reject;
                }
                let Some(proto) = opt.short() else {
                    return Verdict::Reject;
                };
                match proto {
                    protocols::PAP if self.allow.neg_upap && opt.ci_len() == CILEN_SHORT => {
                        self.his.neg_upap = true;
                        Verdict::Ack
                    }
                    // RFC 1994 form omits the callback octet.
                    protocols::CHAP
                        if self.allow.neg_chap
                            && (opt.ci_len() == CILEN_CHAP || opt.ci_len() == CILEN_CHAP - 1) =>
                    {
                        let digest = opt.data[2];
                        let callback = opt.data.get(3).copied().unwrap_or(CHAP_NOCALLBACK);
                        if ChapDigest::from_code(digest).is_none() || callback != CHAP_NOCALLBACK {
                            return Verdict::Nak(self.preferred_auth_ci());
                        }
                        self.his.neg_chap = true;
                        self.his.chap_mdtype = digest;
                        self.his.chap_callback = callback;
                        Verdict::Ack
                    }
                    _ => Verdict::Nak(self.preferred_auth_ci()),
                }
            }
            CI_MAGICNUMBER => {
                let Some(number) = opt.long().filter(|_| opt.ci_len() == CILEN_LONG) else {
                    return Verdict::Reject;
                };
                if !self.allow.neg_magicnumber {
                    return Verdict::Reject;
                }
                if self.got.neg_magicnumber && number == self.got.magicnumber {
                    self.note_loop();
                    let mut nak = Vec::new();
                    put_ci_long(&mut nak, CI_MAGICNUMBER, magic());
                    return Verdict::Nak(nak);
                }
                self.his.neg_magicnumber = true;
                self.his.magicnumber = number;
                Verdict::Ack
            }
            CI_PCOMPRESSION => {
                if !self.allow.neg_pcompression || opt.ci_len() != CILEN_VOID {
                    return Verdict::Reject;
                }
                self.his.neg_pcompression = true;
                Verdict::Ack
            }
            CI_ACCOMPRESSION => {
                if !self.allow.neg_accompression || opt.ci_len() != CILEN_VOID {
                    return Verdict::Reject;
                }
                self.his.neg_accompression = true;
                Verdict::Ack
            }
            _ => Verdict::Reject,
        }
    }
}

impl FsmCallbacks for LcpNegotiation {
    fn reset_ci(&mut self) {
        self.got = self.want;
        if self.got.neg_magicnumber {
            self.got.magicnumber = magic();
        }
        self.his = LcpOptions::none();
        self.numloops = 0;
        self.auth_refused = false;
    }

    fn add_ci(&self, out: &mut Vec<u8>) {
        let go = &self.got;
        if go.neg_mru {
            put_ci_short(out, CI_MRU, go.mru);
        }
        if go.neg_asyncmap {
            put_ci_long(out, CI_ASYNCMAP, go.asyncmap);
        }
        if go.neg_chap {
            put_chap_ci(out, go.chap_mdtype, go.chap_callback);
        } else if go.neg_upap {
            put_ci_short(out, CI_AUTHTYPE, protocols::PAP);
        }
        if go.neg_magicnumber {
            put_ci_long(out, CI_MAGICNUMBER, go.magicnumber);
        }
        if go.neg_pcompression {
            put_ci_void(out, CI_PCOMPRESSION);
        }
        if go.neg_accompression {
            put_ci_void(out, CI_ACCOMPRESSION);
        }
    }

    fn ack_ci(&mut self, ci: &[u8]) -> bool {
        let mut sent = Vec::new();
        self.add_ci(&mut sent);
        ci == sent.as_slice()
    }

    fn nak_ci(&mut self, ci: &[u8]) -> bool {
        let mut try_ = self.got;
        let mut looped = false;
        let mut rd = Reader::new(ci);
        while !rd.is_empty() {
            let Ok(opt) = rd.ci() else {
                return false;
            };
            match opt.ty {
                CI_MRU => {
                    let Some(mru) = opt.short().filter(|_| opt.ci_len() == CILEN_SHORT) else {
                        return false;
                    };
                    if mru <= self.want.mru || mru < DEFMRU {
                        try_.neg_mru = true;
                        try_.mru = mru;
                    }
                }
                CI_ASYNCMAP => {
                    let Some(map) = opt.long().filter(|_| opt.ci_len() == CILEN_LONG) else {
                        return false;
                    };
                    try_.neg_asyncmap = true;
                    try_.asyncmap = self.got.asyncmap | map;
                }
                CI_AUTHTYPE => {
                    let Some(proto) = opt.short() else {
                        return false;
                    };
                    if proto == protocols::PAP && self.got.neg_chap && self.want.neg_upap {
                        try_.neg_chap = false;
                        try_.neg_upap = true;
                    } else if proto == protocols::CHAP
                        && !self.got.neg_chap
                        && self.got.neg_upap
                        && self.want.neg_chap
                        && opt.data.get(2).copied() == Some(CHAP_DIGEST_MD5)
                    {
                        try_.neg_upap = false;
                        try_.neg_chap = true;
                    }
                }
                CI_MAGICNUMBER => {
                    if opt.ci_len() != CILEN_LONG {
                        return false;
                    }
                    if self.got.neg_magicnumber {
                        try_.magicnumber = magic();
                        looped = true;
                    }
                }
                CI_PCOMPRESSION | CI_ACCOMPRESSION => {
                    if opt.ci_len() != CILEN_VOID {
                        return false;
                    }
                }
                _ => {}
            }
        }
        if looped {
            self.note_loop();
        }
        self.got = try_;
        true
    }

    fn rej_ci(&mut self, ci: &[u8]) -> bool {
        let mut sent = Vec::new();
        self.add_ci(&mut sent);
        let Some(types) = rejected_in_order(&sent, ci) else {
            return false;
        };
        let mut try_ = self.got;
        for ty in types {
            match ty {
                CI_MRU => try_.neg_mru = false,
                CI_ASYNCMAP => try_.neg_asyncmap = false,
                CI_AUTHTYPE => {
                    if try_.neg_chap && self.want.neg_upap {
                        try_.neg_chap = false;
                    } else {
                        try_.neg_chap = false;
                        try_.neg_upap = false;
                        self.auth_refused = true;
                    }
                }
                CI_MAGICNUMBER => try_.neg_magicnumber = false,
                CI_PCOMPRESSION => try_.neg_pcompression = false,
                CI_ACCOMPRESSION => try_.neg_accompression = false,
                _ => {}
            }
        }
        self.got = try_;
        true
    }

    fn req_ci(&mut self, ci: &mut Vec<u8>) -> u8 {
        self.his = LcpOptions::none();
        let input = std::mem::take(ci);
        let mut acks = Vec::new();
        let mut naks = Vec::new();
        let mut rejs = Vec::new();

        let mut rd = Reader::new(&input);
        while !rd.is_empty() {
            let start = rd.position();
            let opt = match rd.ci() {
                Ok(opt) => opt,
                Err(e) => {
                    log_debug(&format!("LCP: bad option in Configure-Request: {}", e));
                    rejs.extend_from_slice(&input[start..]);
                    break;
                }
            };
            match self.check_ci(&opt) {
                Verdict::Ack => acks.extend_from_slice(opt.raw),
                Verdict::Nak(bytes) => naks.extend_from_slice(&bytes),
                Verdict::Reject => rejs.extend_from_slice(opt.raw),
            }
        }

        if !rejs.is_empty() {
            *ci = rejs;
            CONFREJ
        } else if !naks.is_empty() {
            *ci = naks;
            CONFNAK
        } else {
            *ci = acks;
            CONFACK
        }
    }

    fn up(&mut self, ctx: &mut LinkCtx) {
        let unit = ctx.unit;
        let his_mru = if self.his.neg_mru { self.his.mru } else { DEFMRU };
        let mtu = his_mru.min(self.allow.mru);
        ctx.peer_mru = mtu;
        ctx.sys.set_mtu(unit, mtu);
        ctx.sys.set_async_map(unit, if self.his.neg_asyncmap { self.his.asyncmap } else { 0xffff_ffff });
        ctx.sys.set_compression(unit, self.his.neg_pcompression, self.his.neg_accompression);
        ctx.sys.set_recv_async_map(unit, if self.got.neg_asyncmap { self.got.asyncmap } else { 0xffff_ffff });
        ctx.sys.set_recv_compression(unit, self.got.neg_pcompression, self.got.neg_accompression);
        ctx.sys.lower_up(unit);

        log_line(&format!(
            "LCP up: mtu {}, magic 0x{:08x}/0x{:08x}",
            mtu,
            if self.got.neg_magicnumber { self.got.magicnumber } else { 0 },
            if self.his.neg_magicnumber { self.his.magicnumber } else { 0 }
        ));

        self.echo_pending = 0;
        if !self.echo_interval.is_zero() {
            ctx.timeout(self.echo_interval, Timeout::LcpEcho);
        }

        ctx.notify(LinkEvent::LcpUp {
            peer_auth: self.got.auth_protocol(),
            our_auth: self.his.auth_protocol(),
            auth_refused: self.auth_refused,
        });
    }

    fn down(&mut self, ctx: &mut LinkCtx) {
        let unit = ctx.unit;
        ctx.untimeout(&Timeout::LcpEcho);
        ctx.peer_mru = DEFMRU;
        ctx.sys.set_mtu(unit, DEFMRU);
        ctx.sys.set_async_map(unit, 0xffff_ffff);
        ctx.sys.set_compression(unit, false, false);
        ctx.sys.set_recv_async_map(unit, 0xffff_ffff);
        ctx.sys.set_recv_compression(unit, false, false);
        ctx.sys.lower_down(unit);
        ctx.notify(LinkEvent::LcpDown);
    }

    fn closed(&mut self, ctx: &mut LinkCtx, reason: CloseReason) {
        ctx.notify(LinkEvent::LcpFinished(reason));
    }

    fn echo_magic(&self) -> Option<u32> {
        Some(if self.got.neg_magicnumber { self.got.magicnumber } else { 0 })
    }

    fn echo_request(&mut self, _ctx: &mut LinkCtx, _id: u8, data: &[u8]) {
        if self.is_own_magic(data) {
            self.echo_loops += 1;
            log_line("LCP: received our own Echo-Request, line is looped back?");
        }
    }

    fn echo_reply(&mut self, _ctx: &mut LinkCtx, _id: u8, data: &[u8]) {
        if self.is_own_magic(data) {
            self.echo_loops += 1;
            log_line("LCP: received our own Echo-Reply, line is looped back?");
            return;
        }
        self.echo_pending = 0;
    }

    fn ext_code(&mut self, ctx: &mut LinkCtx, code: u8, _id: u8, data: &[u8]) -> bool {
        match code {
            PROTREJ => {
                let mut rd = Reader::new(data);
                match rd.u16() {
                    Ok(proto) => ctx.notify(LinkEvent::ProtocolRejected(proto)),
                    Err(e) => log_debug(&format!("LCP: short Protocol-Reject: {}", e)),
                }
                true
            }
            _ => false,
        }
    }
}

/// Автомат LCP вместе с его опциями
#[derive(Debug, Clone)]
pub struct Lcp {
    pub fsm: Fsm,
    pub neg: LcpNegotiation,
}

impl Lcp {
    pub fn new(want: LcpOptions, allow: LcpOptions, limits: FsmLimits) -> Self {
        Lcp {
            fsm: Fsm::new(protocols::LCP, limits),
            neg: LcpNegotiation::new(want, allow),
        }
    }

    pub fn open(&mut self, ctx: &mut LinkCtx) {
        self.fsm.open(&mut self.neg, ctx);
    }

    pub fn passive_open(&mut self, ctx: &mut LinkCtx) {
        self.fsm.passive_open(&mut self.neg, ctx);
    }

    pub fn close(&mut self, ctx: &mut LinkCtx) {
        self.fsm.close(&mut self.neg, ctx);
    }

    pub fn lower_up(&mut self, ctx: &mut LinkCtx) {
        self.fsm.lower_up(&mut self.neg, ctx);
    }

    pub fn lower_down(&mut self, ctx: &mut LinkCtx) {
        self.fsm.lower_down(&mut self.neg, ctx);
    }

    pub fn input(&mut self, ctx: &mut LinkCtx, data: &[u8]) {
        self.fsm.input(&mut self.neg, ctx, data);
    }

    pub fn timeout(&mut self, ctx: &mut LinkCtx) {
        self.fsm.timeout(&mut self.neg, ctx);
    }

    pub fn is_open(&self) -> bool {
        self.fsm.state == FsmState::Open
    }

    /// Protocol-Reject for a protocol we do not run.
    pub fn send_protocol_reject(&mut self, ctx: &mut LinkCtx, protocol: u16, info: &[u8]) {
        if !self.is_open() {
            return;
        }
        let room = (ctx.peer_mru as usize).saturating_sub(HEADER_LEN + 2);
        let mut payload = protocol.to_be_bytes().to_vec();
        payload.extend_from_slice(&info[..info.len().min(room)]);
        let id = self.fsm.next_id();
        self.fsm.send(ctx, PROTREJ, id, &payload);
    }

    /// Keepalive tick.
    pub fn echo_timeout(&mut self, ctx: &mut LinkCtx) {
        if !self.is_open() || self.neg.echo_interval.is_zero() {
            return;
        }
        if self.neg.echo_fails > 0 && self.neg.echo_pending >= self.neg.echo_fails {
            log_line(&format!("No response to {} echo-requests", self.neg.echo_pending));
            log_line("Serial link appears to be disconnected.");
            self.close(ctx);
            return;
        }
        let id = self.fsm.next_id();
        let magic = self.neg.echo_magic().unwrap_or(0);
        self.fsm.send(ctx, ECHOREQ, id, &magic.to_be_bytes());
        self.neg.echo_pending += 1;
        ctx.timeout(self.neg.echo_interval, Timeout::LcpEcho);
    }
}
