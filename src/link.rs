//! One PPP link: the shared context every protocol module works
//! through, the protocol instances, and the glue between them.
//!
//! Protocols never call each other directly. They post [`LinkEvent`]s
//! into the context and [`Link::process_events`] applies the
//! consequences (LCP up starts authentication, authentication done
//! opens IPCP, and so on) once the current handler has returned.

use std::collections::VecDeque;
use std::time::Duration;

use uuid::Uuid;

use crate::auth::{AuthTracker, Phase};
use crate::callout::CalloutList;
use crate::chap::Chap;
use crate::config::LinkConfig;
use crate::dispatch;
use crate::error::LinkError;
use crate::fsm::CloseReason;
use crate::ipcp::{Ipcp, IpcpOptions};
use crate::lcp::{Lcp, LcpOptions, DEFMRU};
use crate::log::*;
use crate::pap::Pap;
use crate::parser::OutputBuffer;
use crate::system::System;
use crate::types::{protocol_name, protocols, PppSessionInfo};

/// Handler plus argument of a pending callout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Retransmit timer of the automaton for this protocol.
    Fsm(u16),
    LcpEcho,
    ChapChallenge,
    PapRequest,
    PapListen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    LcpUp {
        /// Protocol we authenticate the peer with.
        peer_auth: Option<u16>,
        /// Protocol the peer authenticates us with.
        our_auth: Option<u16>,
        /// Peer rejected the authentication we require.
        auth_refused: bool,
    },
    LcpDown,
    LcpFinished(CloseReason),
    AuthPeerSuccess(u16),
    AuthPeerFailure(u16),
    AuthWithPeerSuccess(u16),
    AuthWithPeerFailure(u16),
    /// LCP Protocol-Reject received for this protocol.
    ProtocolRejected(u16),
    IpcpUp,
    IpcpDown,
    IpcpFinished(CloseReason),
    IpcpAddressFailure,
}

/// State shared by all protocols of one link.
pub struct LinkCtx {
    pub unit: usize,
    pub session: Uuid,
    pub callouts: CalloutList<Timeout>,
    pub out: OutputBuffer,
    pub sys: Box<dyn System>,
    pub events: VecDeque<LinkEvent>,
    /// Largest packet the peer accepts.
    pub peer_mru: u16,
    /// LCP is Open.
    pub lower_up: bool,
}

impl LinkCtx {
    pub fn new(unit: usize, sys: Box<dyn System>) -> Self {
        LinkCtx {
            unit,
            session: Uuid::new_v4(),
            callouts: CalloutList::new(),
            out: OutputBuffer::default(),
            sys,
            events: VecDeque::new(),
            peer_mru: DEFMRU,
            lower_up: false,
        }
    }

    pub fn send(&mut self, protocol: u16, code: u8, id: u8, payload: &[u8]) {
        match self.out.build(protocol, code, id, payload) {
            Ok(frame) => self.sys.output(self.unit, frame),
            Err(e) => log_error(&format!("❌ {} packet not sent: {}", protocol_name(protocol), e)),
        }
    }

    pub fn timeout(&mut self, delay: Duration, what: Timeout) {
        self.callouts.schedule(delay, what);
    }

    pub fn untimeout(&mut self, what: &Timeout) {
        self.callouts.cancel(what);
    }

    pub fn notify(&mut self, event: LinkEvent) {
        self.events.push_back(event);
    }
}

fn build_lcp(config: &LinkConfig) -> Lcp {
    let mut want = LcpOptions::wanted();
    want.mru = config.mru;
    want.neg_mru = config.mru != DEFMRU;
    want.neg_chap = config.require_chap;
    want.neg_upap = config.require_pap;
    let mut allow = LcpOptions::allowed();
    allow.neg_upap = !config.user.is_empty();
    let mut lcp = Lcp::new(want, allow, config.limits);
    lcp.fsm.passive = config.passive;
    lcp.neg.echo_interval = config.echo_interval;
    lcp.neg.echo_fails = config.echo_failures;
    lcp
}

fn build_ipcp(config: &LinkConfig) -> Ipcp {
    let mut want = IpcpOptions::wanted();
    want.old_addrs = config.old_addrs;
    want.ouraddr = config.local_ip.unwrap_or(std::net::Ipv4Addr::UNSPECIFIED);
    want.hisaddr = config.remote_ip.unwrap_or(std::net::Ipv4Addr::UNSPECIFIED);
    want.neg_vj = config.vj;
    want.req_dns1 = config.request_dns;
    want.req_dns2 = config.request_dns;
    let mut allow = IpcpOptions::allowed();
    allow.neg_vj = config.vj;
    let mut ipcp = Ipcp::new(want, allow, config.limits);
    ipcp.neg.accept_local = config.accept_local;
    ipcp.neg.accept_remote = config.accept_remote;
    ipcp.neg.dns_out = config.dns;
    ipcp.neg.swapped_addrs_reject_check = config.swapped_addrs_reject_check;
    ipcp
}

fn build_chap(config: &LinkConfig) -> Chap {
    let mut chap = Chap::new(&config.our_name);
    chap.timeout = config.chap_timeout;
    chap.max_transmits = config.chap_max_transmits;
    chap.max_client_retries = config.chap_client_retries;
    chap
}

fn build_pap(config: &LinkConfig) -> Pap {
    let mut pap = Pap::new();
    pap.timeout = config.pap_timeout;
    pap.max_transmits = config.pap_max_transmits;
    pap.req_timeout = config.pap_req_timeout;
    pap
}

pub(crate) fn lcp_init(link: &mut Link) {
    link.lcp = build_lcp(&link.config);
}

pub(crate) fn ipcp_init(link: &mut Link) {
    link.ipcp = build_ipcp(&link.config);
}

pub(crate) fn chap_init(link: &mut Link) {
    link.chap = build_chap(&link.config);
}

pub(crate) fn pap_init(link: &mut Link) {
    link.pap = build_pap(&link.config);
}

pub struct Link {
    pub ctx: LinkCtx,
    pub lcp: Lcp,
    pub ipcp: Ipcp,
    pub chap: Chap,
    pub pap: Pap,
    pub auth: AuthTracker,
    pub config: LinkConfig,
    finished: Option<CloseReason>,
}

impl Link {
    pub fn new(unit: usize, config: LinkConfig, sys: Box<dyn System>) -> Self {
        Link {
            ctx: LinkCtx::new(unit, sys),
            lcp: build_lcp(&config),
            ipcp: build_ipcp(&config),
            chap: build_chap(&config),
            pap: build_pap(&config),
            auth: AuthTracker::new(),
            config,
            finished: None,
        }
    }

    pub fn unit(&self) -> usize {
        self.ctx.unit
    }

    pub fn phase(&self) -> Phase {
        self.auth.phase
    }

    pub fn session_info(&self) -> Option<PppSessionInfo> {
        self.ipcp.session_info()
    }

    /// Why LCP finished, once it has.
    pub fn finished(&self) -> Option<CloseReason> {
        self.finished
    }

    /// Back to a freshly configured link; pending timers are dropped.
    pub fn reset(&mut self) {
        self.ctx.callouts = CalloutList::new();
        self.ctx.events.clear();
        self.ctx.peer_mru = DEFMRU;
        self.ctx.lower_up = false;
        for entry in dispatch::PROTOCOLS.iter() {
            (entry.init)(self);
        }
        self.auth = AuthTracker::new();
        self.finished = None;
    }

    pub fn open(&mut self) {
        self.finished = None;
        self.auth.establish();
        if self.config.passive {
            self.lcp.passive_open(&mut self.ctx);
        } else {
            self.lcp.open(&mut self.ctx);
        }
        self.process_events();
    }

    pub fn close(&mut self) {
        self.auth.terminate();
        self.lcp.close(&mut self.ctx);
        self.process_events();
    }

    /// Transport is ready to carry frames.
    pub fn lower_up(&mut self) {
        self.lcp.lower_up(&mut self.ctx);
        self.process_events();
    }

    pub fn lower_down(&mut self) {
        self.lcp.lower_down(&mut self.ctx);
        self.process_events();
    }

    /// One received frame, processed to completion.
    pub fn input(&mut self, frame: &[u8]) {
        dispatch::input_frame(self, frame);
        self.process_events();
    }

    pub fn next_timeout(&self) -> Option<Duration> {
        self.ctx.callouts.next_expiry()
    }

    /// Charge real elapsed time and run whatever came due, in order.
    pub fn advance(&mut self, elapsed: Duration) {
        let mut left = elapsed;
        while let Some(head) = self.ctx.callouts.next_expiry() {
            if head > left {
                self.ctx.callouts.resync(left);
                break;
            }
            self.ctx.callouts.resync(head);
            left -= head;
            self.fire_due();
        }
    }

    /// Runs every due callout in order and returns how many fired.
    pub fn fire_due(&mut self) -> usize {
        let mut fired = 0;
        while let Some(what) = self.ctx.callouts.pop_due() {
            self.handle_timeout(what);
            self.process_events();
            fired += 1;
        }
        fired
    }

    pub fn handle_timeout(&mut self, what: Timeout) {
        log_debug(&format!("link {}: timeout {:?}", self.ctx.unit, what));
        match what {
            Timeout::Fsm(protocols::LCP) => self.lcp.timeout(&mut self.ctx),
            Timeout::Fsm(protocols::IPCP) => self.ipcp.timeout(&mut self.ctx),
            Timeout::Fsm(other) => log_debug(&format!("no automaton for 0x{:04x}", other)),
            Timeout::LcpEcho => self.lcp.echo_timeout(&mut self.ctx),
            Timeout::ChapChallenge => self.chap.challenge_timeout(&mut self.ctx),
            Timeout::PapRequest => self.pap.request_timeout(&mut self.ctx),
            Timeout::PapListen => self.pap.listen_timeout(&mut self.ctx),
        }
    }

    pub fn process_events(&mut self) {
        while let Some(event) = self.ctx.events.pop_front() {
            log_debug(&format!("link {}: {:?}", self.ctx.unit, event));
            match event {
                LinkEvent::LcpUp { peer_auth, our_auth, auth_refused } => {
                    self.lcp_up(peer_auth, our_auth, auth_refused)
                }
                LinkEvent::LcpDown => {
                    self.ctx.lower_up = false;
                    self.auth.link_down();
                    self.ipcp.lower_down(&mut self.ctx);
                    self.chap.lower_down(&mut self.ctx);
                    self.pap.lower_down(&mut self.ctx);
                }
                LinkEvent::LcpFinished(reason) => {
                    log_line(&format!("🔌 LCP finished: {:?}", reason));
                    self.auth.dead();
                    self.finished = Some(reason);
                    self.ctx.sys.link_terminated(self.ctx.unit);
                }
                LinkEvent::AuthPeerSuccess(proto) => {
                    if self.auth.peer_success(proto) {
                        self.enter_network();
                    }
                }
                LinkEvent::AuthWithPeerSuccess(proto) => {
                    if self.auth.with_peer_success(proto) {
                        self.enter_network();
                    }
                }
                LinkEvent::AuthPeerFailure(proto) => {
                    log_line(&format!("❌ Peer failed {} authentication", protocol_name(proto)));
                    self.terminate();
                }
                LinkEvent::AuthWithPeerFailure(proto) => {
                    log_line(&format!("❌ {} authentication with peer failed", protocol_name(proto)));
                    self.terminate();
                }
                LinkEvent::ProtocolRejected(proto) => self.protocol_rejected(proto),
                LinkEvent::IpcpUp => {
                    log_line("🎉 IPCP up");
                }
                LinkEvent::IpcpDown => log_debug("IPCP down"),
                LinkEvent::IpcpFinished(CloseReason::LowerDown) => {}
                LinkEvent::IpcpFinished(reason) => {
                    log_line(&format!("No network protocols running ({:?})", reason));
                    self.terminate();
                }
                LinkEvent::IpcpAddressFailure => self.ipcp.close(&mut self.ctx),
            }
        }
    }

    fn terminate(&mut self) {
        self.auth.terminate();
        self.lcp.close(&mut self.ctx);
    }

    fn lcp_up(&mut self, peer_auth: Option<u16>, our_auth: Option<u16>, auth_refused: bool) {
        if auth_refused {
            log_line("❌ Peer refused to authenticate");
            self.terminate();
            return;
        }
        self.ctx.lower_up = true;
        self.ipcp.lower_up(&mut self.ctx);
        self.chap.lower_up(&mut self.ctx);
        self.pap.lower_up(&mut self.ctx);

        if self.auth.link_established(peer_auth, our_auth) {
            self.enter_network();
            return;
        }
        match peer_auth {
            Some(protocols::CHAP) => self.chap.auth_peer(&mut self.ctx),
            Some(protocols::PAP) => self.pap.auth_peer(&mut self.ctx),
            _ => {}
        }
        match our_auth {
            Some(protocols::CHAP) => self.chap.auth_with_peer(&mut self.ctx),
            Some(protocols::PAP) => self.pap.auth_with_peer(&mut self.ctx),
            _ => {}
        }
    }

    fn enter_network(&mut self) {
        self.auth.network();
        self.ipcp.open(&mut self.ctx);
    }

    fn protocol_rejected(&mut self, proto: u16) {
        if proto == protocols::LCP {
            log_error("❌ Peer rejected LCP itself");
            return;
        }
        if !self.lcp.is_open() {
            return;
        }
        match dispatch::lookup(proto) {
            Some(entry) => {
                log_line(&format!("{} rejected by peer", entry.name));
                (entry.protocol_reject)(self);
            }
            None => log_debug(&format!("Protocol-Reject for unknown protocol 0x{:04x}", proto)),
        }
    }
}

/// Индекс линка в реестре
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkHandle(pub usize);

#[derive(Default)]
pub struct LinkRegistry {
    links: Vec<Link>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, config: LinkConfig, sys: Box<dyn System>) -> LinkHandle {
        let unit = self.links.len();
        self.links.push(Link::new(unit, config, sys));
        LinkHandle(unit)
    }

    pub fn get(&self, handle: LinkHandle) -> Result<&Link, LinkError> {
        self.links.get(handle.0).ok_or(LinkError::UnknownLink(handle.0))
    }

    pub fn get_mut(&mut self, handle: LinkHandle) -> Result<&mut Link, LinkError> {
        self.links.get_mut(handle.0).ok_or(LinkError::UnknownLink(handle.0))
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Earliest pending timeout across all links.
    pub fn next_timeout(&self) -> Option<Duration> {
        self.links.iter().filter_map(Link::next_timeout).min()
    }

    pub fn advance(&mut self, elapsed: Duration) {
        for link in &mut self.links {
            link.advance(elapsed);
        }
    }
}
