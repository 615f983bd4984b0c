//! Protocol table and the receive path.

use crate::link::{self, Link};
use crate::log::*;
use crate::parser::parse_ppp_frame;
use crate::types::protocols;

/// Entry points of one control protocol.
pub struct ProtocolEntry {
    pub protocol: u16,
    pub name: &'static str,
    /// Rebuild the protocol from the link's configuration.
    pub init: fn(&mut Link),
    pub input: fn(&mut Link, &[u8]),
    /// The peer sent an LCP Protocol-Reject for this protocol.
    pub protocol_reject: fn(&mut Link),
}

fn lcp_input(link: &mut Link, data: &[u8]) {
    link.lcp.input(&mut link.ctx, data);
}

/// LCP cannot be rejected; a peer doing so is ignored.
fn lcp_protrej(_link: &mut Link) {}

fn ipcp_input(link: &mut Link, data: &[u8]) {
    link.ipcp.input(&mut link.ctx, data);
}

fn ipcp_protrej(link: &mut Link) {
    link.ipcp.protocol_reject(&mut link.ctx);
}

fn chap_input(link: &mut Link, data: &[u8]) {
    link.chap.input(&mut link.ctx, data);
}

fn chap_protrej(link: &mut Link) {
    link.chap.protocol_reject(&mut link.ctx);
}

fn pap_input(link: &mut Link, data: &[u8]) {
    link.pap.input(&mut link.ctx, data);
}

fn pap_protrej(link: &mut Link) {
    link.pap.protocol_reject(&mut link.ctx);
}

pub static PROTOCOLS: [ProtocolEntry; 4] = [
    ProtocolEntry {
        protocol: protocols::LCP,
        name: "LCP",
        init: link::lcp_init,
        input: lcp_input,
        protocol_reject: lcp_protrej,
    },
    ProtocolEntry {
        protocol: protocols::IPCP,
        name: "IPCP",
        init: link::ipcp_init,
        input: ipcp_input,
        protocol_reject: ipcp_protrej,
    },
    ProtocolEntry {
        protocol: protocols::PAP,
        name: "PAP",
        init: link::pap_init,
        input: pap_input,
        protocol_reject: pap_protrej,
    },
    ProtocolEntry {
        protocol: protocols::CHAP,
        name: "CHAP",
        init: link::chap_init,
        input: chap_input,
        protocol_reject: chap_protrej,
    },
];

pub fn lookup(protocol: u16) -> Option<&'static ProtocolEntry> {
    PROTOCOLS.iter().find(|e| e.protocol == protocol)
}

/// Разбор входящего кадра и передача нужному протоколу
pub fn input_frame(link: &mut Link, buf: &[u8]) {
    let frame = match parse_ppp_frame(buf) {
        Ok(f) => f,
        Err(e) => {
            log_debug(&format!("link {}: dropped frame: {}", link.unit(), e));
            return;
        }
    };

    if matches!(frame.protocol, protocols::IP | protocols::VJC_COMP | protocols::VJC_UNCOMP) {
        if link.ipcp.is_open() {
            link.ctx.sys.deliver(link.ctx.unit, frame.protocol, frame.info);
        } else {
            log_debug(&format!("link {}: IP frame dropped, IPCP not open", link.unit()));
        }
        return;
    }

    if frame.protocol != protocols::LCP && !link.lcp.is_open() {
        log_debug(&format!(
            "link {}: 0x{:04x} frame dropped, LCP not open",
            link.unit(),
            frame.protocol
        ));
        return;
    }

    match lookup(frame.protocol) {
        Some(entry) => (entry.input)(link, frame.info),
        None => {
            log_line(&format!("Unsupported protocol 0x{:04x} received", frame.protocol));
            link.lcp.send_protocol_reject(&mut link.ctx, frame.protocol, frame.info);
        }
    }
}
