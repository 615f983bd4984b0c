//! Everything the negotiator needs from the outside world: a way to put
//! bytes on the wire, credentials, and the network interface.
//!
//! Only `output` is mandatory. The rest default to logging no-ops so a
//! transport-only host (or a test) implements just what it cares about.

use std::net::Ipv4Addr;

use crate::log::*;

pub trait System {
    /// One complete PPP frame, `FF 03` prefix included.
    fn output(&mut self, unit: usize, frame: &[u8]);

    fn lower_up(&mut self, unit: usize) {
        log_debug(&format!("link {}: lower layer up", unit));
    }

    fn lower_down(&mut self, unit: usize) {
        log_debug(&format!("link {}: lower layer down", unit));
    }

    /// Shared secret for CHAP with the named host.
    fn get_secret(&mut self, _unit: usize, _name: &str) -> Option<Vec<u8>> {
        None
    }

    /// PAP server side: accept flag and a message for the peer.
    fn check_login(&mut self, _unit: usize, _user: &str, _passwd: &str) -> (bool, String) {
        (false, "Login incorrect".into())
    }

    /// PAP client side credentials.
    fn get_user_passwd(&mut self, _unit: usize) -> Option<(String, String)> {
        None
    }

    fn set_mtu(&mut self, unit: usize, mtu: u16) {
        log_debug(&format!("link {}: mtu {}", unit, mtu));
    }

    /// Transmit-side control-character map.
    fn set_async_map(&mut self, unit: usize, map: u32) {
        log_debug(&format!("link {}: send asyncmap 0x{:08x}", unit, map));
    }

    fn set_recv_async_map(&mut self, unit: usize, map: u32) {
        log_debug(&format!("link {}: recv asyncmap 0x{:08x}", unit, map));
    }

    fn set_compression(&mut self, unit: usize, pcomp: bool, accomp: bool) {
        log_debug(&format!("link {}: send pcomp={} accomp={}", unit, pcomp, accomp));
    }

    fn set_recv_compression(&mut self, unit: usize, pcomp: bool, accomp: bool) {
        log_debug(&format!("link {}: recv pcomp={} accomp={}", unit, pcomp, accomp));
    }

    /// `false` fails the IPCP up transition.
    fn set_addrs(&mut self, _unit: usize, _ours: Ipv4Addr, _his: Ipv4Addr) -> bool {
        true
    }

    fn clear_addrs(&mut self, _unit: usize, _ours: Ipv4Addr, _his: Ipv4Addr) {}

    fn set_vj_compression(&mut self, unit: usize, on: bool, cidcomp: bool, maxcid: u8) {
        log_debug(&format!(
            "link {}: vj {} cidcomp={} maxcid={}",
            unit,
            if on { "on" } else { "off" },
            cidcomp,
            maxcid
        ));
    }

    fn set_dns(&mut self, _unit: usize, _dns1: Option<Ipv4Addr>, _dns2: Option<Ipv4Addr>) {}

    fn set_up(&mut self, unit: usize) {
        log_debug(&format!("link {}: interface up", unit));
    }

    fn set_down(&mut self, unit: usize) {
        log_debug(&format!("link {}: interface down", unit));
    }

    /// Network-layer datagram received while IPCP is Open.
    fn deliver(&mut self, _unit: usize, _protocol: u16, _data: &[u8]) {}

    /// LCP has finished; the link is going away.
    fn link_terminated(&mut self, unit: usize) {
        log_line(&format!("link {}: terminated", unit));
    }
}
