//! Link phase and the "both directions authenticated" bookkeeping that
//! gates the network phase.

use crate::types::protocol_name;
use crate::log::log_debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Dead,
    Establish,
    Authenticate,
    Network,
    Terminate,
}

#[derive(Debug, Clone)]
pub struct AuthTracker {
    pub phase: Phase,
    /// Protocol we are authenticating the peer with.
    pub peer_pending: Option<u16>,
    /// Protocol the peer is authenticating us with.
    pub with_peer_pending: Option<u16>,
}

impl Default for AuthTracker {
    fn default() -> Self {
        AuthTracker { phase: Phase::Dead, peer_pending: None, with_peer_pending: None }
    }
}

impl AuthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            log_debug(&format!("phase {:?} → {:?}", self.phase, phase));
            self.phase = phase;
        }
    }

    pub fn establish(&mut self) {
        self.set_phase(Phase::Establish);
    }

    pub fn terminate(&mut self) {
        self.set_phase(Phase::Terminate);
    }

    pub fn dead(&mut self) {
        self.peer_pending = None;
        self.with_peer_pending = None;
        self.set_phase(Phase::Dead);
    }

    /// LCP is up; returns `true` if no authentication is required at all.
    pub fn link_established(&mut self, peer: Option<u16>, with_peer: Option<u16>) -> bool {
        self.peer_pending = peer;
        self.with_peer_pending = with_peer;
        if self.ready() {
            return true;
        }
        self.set_phase(Phase::Authenticate);
        false
    }

    /// `true` exactly once: when this success completes everything pending.
    pub fn peer_success(&mut self, protocol: u16) -> bool {
        if self.peer_pending != Some(protocol) {
            log_debug(&format!("unexpected {} success for peer", protocol_name(protocol)));
            return false;
        }
        self.peer_pending = None;
        self.ready()
    }

    pub fn with_peer_success(&mut self, protocol: u16) -> bool {
        if self.with_peer_pending != Some(protocol) {
            log_debug(&format!("unexpected {} success with peer", protocol_name(protocol)));
            return false;
        }
        self.with_peer_pending = None;
        self.ready()
    }

    pub fn ready(&self) -> bool {
        self.peer_pending.is_none() && self.with_peer_pending.is_none()
    }

    pub fn network(&mut self) {
        self.set_phase(Phase::Network);
    }

    /// LCP went down: anything still pending is void.
    pub fn link_down(&mut self) {
        self.peer_pending = None;
        self.with_peer_pending = None;
        if !matches!(self.phase, Phase::Dead | Phase::Terminate) {
            self.set_phase(Phase::Establish);
        }
    }
}
