//! IPCP: addresses, VJ header compression and DNS servers.

use std::net::Ipv4Addr;

use crate::fsm::{CloseReason, Fsm, FsmCallbacks, FsmLimits, FsmState};
use crate::link::{LinkCtx, LinkEvent};
use crate::log::*;
use crate::parser::*;
use crate::types::codes::*;
use crate::types::{protocols, PppSessionInfo};

/// Legacy form: our address, then the peer's.
pub const CI_ADDRS: u8 = 1;
pub const CI_COMPRESSTYPE: u8 = 2;
pub const CI_ADDR: u8 = 3;
pub const CI_MS_DNS1: u8 = 129;
pub const CI_MS_DNS2: u8 = 131;

pub const CILEN_ADDR: usize = 6;
pub const CILEN_ADDRS: usize = 10;
pub const CILEN_COMPRESS: usize = 4;
pub const CILEN_VJ: usize = 6;

/// Протокол VJ в самом раннем варианте RFC 1172
pub const IPCP_VJ_COMP_OLD: u16 = 0x0037;
pub const MAX_STATES: u8 = 16;

const UNSPEC: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// Форма опции сжатия заголовков
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VjMode {
    /// 4-byte CI carrying the pre-standard protocol number.
    Old,
    /// 4-byte CI, protocol only.
    Rfc1172,
    /// 6-byte CI with max-slot-id and slot-id compression flag.
    Rfc1332,
}

impl VjMode {
    pub fn protocol(self) -> u16 {
        match self {
            VjMode::Old => IPCP_VJ_COMP_OLD,
            VjMode::Rfc1172 | VjMode::Rfc1332 => protocols::VJC_COMP,
        }
    }

    pub fn ci_len(self) -> usize {
        match self {
            VjMode::Old | VjMode::Rfc1172 => CILEN_COMPRESS,
            VjMode::Rfc1332 => CILEN_VJ,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcpOptions {
    pub neg_addr: bool,
    /// Use the dual-address CI instead of the single-address one.
    pub old_addrs: bool,
    pub ouraddr: Ipv4Addr,
    pub hisaddr: Ipv4Addr,
    pub neg_vj: bool,
    pub vj_mode: VjMode,
    pub maxslotindex: u8,
    pub cflag: bool,
    pub req_dns1: bool,
    pub req_dns2: bool,
    pub dnsaddr: [Ipv4Addr; 2],
}

impl IpcpOptions {
    pub fn none() -> Self {
        IpcpOptions {
            neg_addr: false,
            old_addrs: false,
            ouraddr: UNSPEC,
            hisaddr: UNSPEC,
            neg_vj: false,
            vj_mode: VjMode::Rfc1332,
            maxslotindex: MAX_STATES - 1,
            cflag: true,
            req_dns1: false,
            req_dns2: false,
            dnsaddr: [UNSPEC; 2],
        }
    }

    pub fn wanted() -> Self {
        IpcpOptions { neg_addr: true, neg_vj: true, ..Self::none() }
    }

    pub fn allowed() -> Self {
        IpcpOptions { neg_addr: true, old_addrs: true, neg_vj: true, ..Self::none() }
    }

    fn put_vj(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[CI_COMPRESSTYPE, self.vj_mode.ci_len() as u8]);
        out.extend_from_slice(&self.vj_mode.protocol().to_be_bytes());
        if self.vj_mode == VjMode::Rfc1332 {
            out.push(self.maxslotindex);
            out.push(self.cflag as u8);
        }
    }
}

fn put_ci_addrs(out: &mut Vec<u8>, first: Ipv4Addr, second: Ipv4Addr) {
    out.extend_from_slice(&[CI_ADDRS, CILEN_ADDRS as u8]);
    out.extend_from_slice(&first.octets());
    out.extend_from_slice(&second.octets());
}

enum Verdict {
    Ack,
    Nak(Vec<u8>),
    Reject,
}

#[derive(Debug, Clone)]
pub struct IpcpNegotiation {
    pub want: IpcpOptions,
    pub allow: IpcpOptions,
    pub got: IpcpOptions,
    pub his: IpcpOptions,
    /// Take the peer's idea of our address.
    pub accept_local: bool,
    /// Take the peer's idea of its own address.
    pub accept_remote: bool,
    /// DNS servers handed to the peer on request.
    pub dns_out: [Option<Ipv4Addr>; 2],
    /// Configure-Reject of the dual-address CI compares the peer's copy
    /// against (his, ours) instead of the (ours, his) order we send.
    pub swapped_addrs_reject_check: bool,
    /// Our address as offered in the peer's dual-address CI.
    pub peer_suggested: Option<Ipv4Addr>,
    pub session: Option<PppSessionInfo>,
}

impl IpcpNegotiation {
    pub fn new(want: IpcpOptions, allow: IpcpOptions) -> Self {
        IpcpNegotiation {
            want,
            allow,
            got: want,
            his: IpcpOptions::none(),
            accept_local: false,
            accept_remote: false,
            dns_out: [None; 2],
            swapped_addrs_reject_check: true,
            peer_suggested: None,
            session: None,
        }
    }

    /// Peer's own address from its request; `None` when it is acceptable.
    fn check_his_addr(&self, addr: Ipv4Addr) -> Result<Option<Ipv4Addr>, ()> {
        let wanted = self.want.hisaddr;
        if wanted != UNSPEC && addr != wanted && (addr == UNSPEC || !self.accept_remote) {
            return Ok(Some(wanted));
        }
        if addr == UNSPEC && wanted == UNSPEC {
            return Err(());
        }
        Ok(None)
    }

    fn check_ci(&mut self, opt: &Ci<'_>) -> Verdict {
        match opt.ty {
            CI_ADDR => {
                if !self.allow.neg_addr || opt.ci_len() != CILEN_ADDR || self.his.neg_addr {
                    return Verdict::Reject;
                }
                let Some(addr) = opt.addr_at(0) else {
                    return Verdict::Reject;
                };
                match self.check_his_addr(addr) {
                    Err(()) => Verdict::Reject,
                    Ok(Some(ours_for_him)) => {
                        let mut nak = Vec::new();
                        put_ci_addr(&mut nak, CI_ADDR, ours_for_him);
                        Verdict::Nak(nak)
                    }
                    Ok(None) => {
                        self.his.neg_addr = true;
                        self.his.hisaddr = addr;
                        Verdict::Ack
                    }
                }
            }
            CI_ADDRS => {
                if !self.allow.neg_addr
                    || !self.allow.old_addrs
                    || opt.ci_len() != CILEN_ADDRS
                    || self.his.neg_addr
                {
                    return Verdict::Reject;
                }
                let (Some(his_addr), Some(our_addr)) = (opt.addr_at(0), opt.addr_at(4)) else {
                    return Verdict::Reject;
                };
                let mut naked = false;
                let first = match self.check_his_addr(his_addr) {
                    Err(()) => return Verdict::Reject,
                    Ok(Some(a)) => {
                        naked = true;
                        a
                    }
                    Ok(None) => his_addr,
                };
                let mut second = our_addr;
                if self.got.ouraddr == UNSPEC {
                    if our_addr != UNSPEC {
                        self.peer_suggested = Some(our_addr);
                    }
                } else if our_addr != self.got.ouraddr && (our_addr == UNSPEC || !self.accept_local) {
                    naked = true;
                    second = self.got.ouraddr;
                }
                if naked {
                    let mut nak = Vec::new();
                    put_ci_addrs(&mut nak, first, second);
                    return Verdict::Nak(nak);
                }
                self.his.neg_addr = true;
                self.his.old_addrs = true;
                self.his.hisaddr = his_addr;
                self.his.ouraddr = our_addr;
                Verdict::Ack
            }
            CI_COMPRESSTYPE => {
                if !self.allow.neg_vj || self.his.neg_vj {
                    return Verdict::Reject;
                }
                let len = opt.ci_len();
                let Some(proto) = opt.short().filter(|_| len == CILEN_COMPRESS || len == CILEN_VJ) else {
                    return Verdict::Reject;
                };
                let mut wanted = self.allow;
                match (len, proto) {
                    (CILEN_VJ, protocols::VJC_COMP) => {
                        let maxslot = opt.data[2];
                        let cflag = opt.data[3] != 0;
                        let mut nak = false;
                        if maxslot > self.allow.maxslotindex {
                            nak = true;
                        } else {
                            wanted.maxslotindex = maxslot;
                        }
                        if cflag && !self.allow.cflag {
                            nak = true;
                        } else {
                            wanted.cflag = cflag;
                        }
                        if nak {
                            wanted.vj_mode = VjMode::Rfc1332;
                            let mut out = Vec::new();
                            wanted.put_vj(&mut out);
                            return Verdict::Nak(out);
                        }
                        self.his.neg_vj = true;
                        self.his.vj_mode = VjMode::Rfc1332;
                        self.his.maxslotindex = maxslot;
                        self.his.cflag = cflag;
                        Verdict::Ack
                    }
                    (CILEN_COMPRESS, protocols::VJC_COMP) | (CILEN_COMPRESS, IPCP_VJ_COMP_OLD) => {
                        self.his.neg_vj = true;
                        self.his.vj_mode = if proto == IPCP_VJ_COMP_OLD { VjMode::Old } else { VjMode::Rfc1172 };
                        self.his.maxslotindex = MAX_STATES - 1;
                        self.his.cflag = true;
                        Verdict::Ack
                    }
                    _ => {
                        let mut out = Vec::new();
                        self.allow.put_vj(&mut out);
                        Verdict::Nak(out)
                    }
                }
            }
            CI_MS_DNS1 | CI_MS_DNS2 => {
                let idx = if opt.ty == CI_MS_DNS1 { 0 } else { 1 };
                let (Some(server), Some(asked)) = (self.dns_out[idx], opt.addr_at(0)) else {
                    return Verdict::Reject;
                };
                if opt.ci_len() != CILEN_ADDR {
                    return Verdict::Reject;
                }
                if asked != server {
                    let mut nak = Vec::new();
                    put_ci_addr(&mut nak, opt.ty, server);
                    return Verdict::Nak(nak);
                }
                Verdict::Ack
            }
            _ => Verdict::Reject,
        }
    }

    /// Адреса для поднятия интерфейса: (наш, его)
    fn resolve_addrs(&self) -> (Ipv4Addr, Ipv4Addr) {
        let mut ours = self.got.ouraddr;
        if ours == UNSPEC {
            ours = self.peer_suggested.unwrap_or(UNSPEC);
        }
        let his = if self.his.neg_addr { self.his.hisaddr } else { self.want.hisaddr };
        (ours, his)
    }
}

impl FsmCallbacks for IpcpNegotiation {
    fn reset_ci(&mut self) {
        self.got = self.want;
        self.his = IpcpOptions::none();
        self.peer_suggested = None;
    }

    fn add_ci(&self, out: &mut Vec<u8>) {
        let go = &self.got;
        if go.neg_addr {
            if go.old_addrs {
                put_ci_addrs(out, go.ouraddr, go.hisaddr);
            } else {
                put_ci_addr(out, CI_ADDR, go.ouraddr);
            }
        }
        if go.neg_vj {
            go.put_vj(out);
        }
        if go.req_dns1 {
            put_ci_addr(out, CI_MS_DNS1, go.dnsaddr[0]);
        }
        if go.req_dns2 {
            put_ci_addr(out, CI_MS_DNS2, go.dnsaddr[1]);
        }
    }

    fn ack_ci(&mut self, ci: &[u8]) -> bool {
        let mut sent = Vec::new();
        self.add_ci(&mut sent);
        ci == sent.as_slice()
    }

    fn nak_ci(&mut self, ci: &[u8]) -> bool {
        let mut try_ = self.got;
        let take_local = self.accept_local || self.got.ouraddr == UNSPEC;
        let take_remote = self.accept_remote || self.got.hisaddr == UNSPEC;
        let mut rd = Reader::new(ci);
        while !rd.is_empty() {
            let Ok(opt) = rd.ci() else {
                return false;
            };
            match opt.ty {
                CI_ADDRS if self.got.neg_addr && self.got.old_addrs => {
                    let (Some(ours), Some(his)) = (opt.addr_at(0), opt.addr_at(4)) else {
                        return false;
                    };
                    if opt.ci_len() != CILEN_ADDRS {
                        return false;
                    }
                    if take_local && ours != UNSPEC {
                        try_.ouraddr = ours;
                    }
                    if take_remote && his != UNSPEC {
                        try_.hisaddr = his;
                    }
                }
                CI_ADDR if self.got.neg_addr && !self.got.old_addrs => {
                    let Some(ours) = opt.addr_at(0).filter(|_| opt.ci_len() == CILEN_ADDR) else {
                        return false;
                    };
                    if take_local && ours != UNSPEC {
                        try_.ouraddr = ours;
                    }
                }
                CI_COMPRESSTYPE if self.got.neg_vj => {
                    let len = opt.ci_len();
                    let Some(proto) = opt.short() else {
                        return false;
                    };
                    match (len, proto) {
                        (CILEN_VJ, protocols::VJC_COMP) => {
                            try_.vj_mode = VjMode::Rfc1332;
                            try_.maxslotindex = opt.data[2].min(self.got.maxslotindex);
                            try_.cflag = self.got.cflag && opt.data[3] != 0;
                        }
                        (CILEN_COMPRESS, protocols::VJC_COMP) => try_.vj_mode = VjMode::Rfc1172,
                        (CILEN_COMPRESS, IPCP_VJ_COMP_OLD) => try_.vj_mode = VjMode::Old,
                        (CILEN_COMPRESS, _) | (CILEN_VJ, _) => try_.neg_vj = false,
                        _ => return false,
                    }
                }
                CI_MS_DNS1 | CI_MS_DNS2 => {
                    let Some(addr) = opt.addr_at(0).filter(|_| opt.ci_len() == CILEN_ADDR) else {
                        return false;
                    };
                    let idx = if opt.ty == CI_MS_DNS1 { 0 } else { 1 };
                    try_.dnsaddr[idx] = addr;
                }
                _ => {}
            }
        }
        self.got = try_;
        true
    }

    fn rej_ci(&mut self, ci: &[u8]) -> bool {
        let mut sent = Vec::new();
        self.add_ci(&mut sent);
        let mut ours = Reader::new(&sent);
        let mut theirs = Reader::new(ci);
        let mut try_ = self.got;

        while !theirs.is_empty() {
            let Ok(rej) = theirs.ci() else {
                return false;
            };
            let sent_ci = loop {
                match ours.ci() {
                    Ok(s) if s.ty == rej.ty => break s,
                    Ok(_) => continue,
                    Err(_) => return false,
                }
            };
            if rej.ty == CI_ADDRS {
                let (Some(a1), Some(a2)) = (rej.addr_at(0), rej.addr_at(4)) else {
                    return false;
                };
                let (e1, e2) = if self.swapped_addrs_reject_check {
                    (self.got.hisaddr, self.got.ouraddr)
                } else {
                    (self.got.ouraddr, self.got.hisaddr)
                };
                if rej.ci_len() != CILEN_ADDRS || a1 != e1 || a2 != e2 {
                    return false;
                }
            } else if rej.raw != sent_ci.raw {
                return false;
            }
            match rej.ty {
                CI_ADDRS | CI_ADDR => try_.neg_addr = false,
                CI_COMPRESSTYPE => try_.neg_vj = false,
                CI_MS_DNS1 => try_.req_dns1 = false,
                CI_MS_DNS2 => try_.req_dns2 = false,
                _ => {}
            }
        }
        self.got = try_;
        true
    }

    fn req_ci(&mut self, ci: &mut Vec<u8>) -> u8 {
        self.his = IpcpOptions::none();
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
                    log_debug(&format!("IPCP: bad option in Configure-Request: {}", e));
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
        let (ours, his) = self.resolve_addrs();
        if ours == UNSPEC {
            log_error("❌ Could not determine local IP address");
            ctx.notify(LinkEvent::IpcpAddressFailure);
            return;
        }
        if his == UNSPEC {
            log_error("❌ Could not determine remote IP address");
            ctx.notify(LinkEvent::IpcpAddressFailure);
            return;
        }
        if !ctx.sys.set_addrs(unit, ours, his) {
            log_error("❌ Could not set interface addresses");
            ctx.notify(LinkEvent::IpcpAddressFailure);
            return;
        }
        ctx.sys.set_vj_compression(unit, self.his.neg_vj, self.his.cflag, self.his.maxslotindex);
        ctx.sys.set_up(unit);

        let pick = |req: bool, addr: Ipv4Addr| (req && addr != UNSPEC).then_some(addr);
        let dns1 = pick(self.got.req_dns1, self.got.dnsaddr[0]);
        let dns2 = pick(self.got.req_dns2, self.got.dnsaddr[1]);
        if dns1.is_some() || dns2.is_some() {
            ctx.sys.set_dns(unit, dns1, dns2);
        }

        log_line(&format!("Local IP {}", ours));
        log_line(&format!("Peer IP {}", his));
        if let Some(d) = dns1 {
            log_line(&format!("Primary DNS {}", d));
        }
        if let Some(d) = dns2 {
            log_line(&format!("Secondary DNS {}", d));
        }

        self.session = Some(PppSessionInfo { ip: ours, peer: his, dns1, dns2 });
        ctx.notify(LinkEvent::IpcpUp);
    }

    fn down(&mut self, ctx: &mut LinkCtx) {
        let unit = ctx.unit;
        if let Some(info) = self.session.take() {
            ctx.sys.set_vj_compression(unit, false, false, 0);
            ctx.sys.set_down(unit);
            ctx.sys.clear_addrs(unit, info.ip, info.peer);
        }
        ctx.notify(LinkEvent::IpcpDown);
    }

    fn closed(&mut self, ctx: &mut LinkCtx, reason: CloseReason) {
        ctx.notify(LinkEvent::IpcpFinished(reason));
    }
}

#[derive(Debug, Clone)]
pub struct Ipcp {
    pub fsm: Fsm,
    pub neg: IpcpNegotiation,
}

impl Ipcp {
    pub fn new(want: IpcpOptions, allow: IpcpOptions, limits: FsmLimits) -> Self {
        Ipcp {
            fsm: Fsm::new(protocols::IPCP, limits),
            neg: IpcpNegotiation::new(want, allow),
        }
    }

    pub fn open(&mut self, ctx: &mut LinkCtx) {
        self.fsm.open(&mut self.neg, ctx);
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

    pub fn protocol_reject(&mut self, ctx: &mut LinkCtx) {
        self.fsm.protocol_reject(&mut self.neg, ctx);
    }

    pub fn is_open(&self) -> bool {
        self.fsm.state == FsmState::Open
    }

    pub fn session_info(&self) -> Option<PppSessionInfo> {
        self.neg.session
    }
}
