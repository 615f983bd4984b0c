use std::net::Ipv4Addr;

/// Номера протоколов PPP
pub mod protocols {
    pub const IP: u16 = 0x0021;
    pub const VJC_COMP: u16 = 0x002d;
    pub const VJC_UNCOMP: u16 = 0x002f;
    pub const IPCP: u16 = 0x8021;
    pub const LCP: u16 = 0xC021;
    pub const PAP: u16 = 0xC023;
    pub const CHAP: u16 = 0xC223;
}

/// Коды пакетов LCP/IPCP
pub mod codes {
    pub const CONFREQ: u8 = 1;
    pub const CONFACK: u8 = 2;
    pub const CONFNAK: u8 = 3;
    pub const CONFREJ: u8 = 4;
    pub const TERMREQ: u8 = 5;
    pub const TERMACK: u8 = 6;
    pub const CODEREJ: u8 = 7;
    pub const PROTREJ: u8 = 8;
    pub const ECHOREQ: u8 = 9;
    pub const ECHOREP: u8 = 10;
    pub const DISCREQ: u8 = 11;
}

/// Итог IPCP: адреса, назначенные интерфейсу
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PppSessionInfo {
    pub ip: Ipv4Addr,
    pub peer: Ipv4Addr,
    pub dns1: Option<Ipv4Addr>,
    pub dns2: Option<Ipv4Addr>,
}

pub fn protocol_name(protocol: u16) -> &'static str {
    match protocol {
        protocols::IP => "IP",
        protocols::VJC_COMP => "VJ-Comp",
        protocols::VJC_UNCOMP => "VJ-Uncomp",
        protocols::IPCP => "IPCP",
        protocols::LCP => "LCP",
        protocols::PAP => "PAP",
        protocols::CHAP => "CHAP",
        _ => "Unknown",
    }
}

pub fn code_name(code: u8) -> &'static str {
    match code {
        codes::CONFREQ => "Configure-Request",
        codes::CONFACK => "Configure-Ack",
        codes::CONFNAK => "Configure-Nak",
        codes::CONFREJ => "Configure-Reject",
        codes::TERMREQ => "Terminate-Request",
        codes::TERMACK => "Terminate-Ack",
        codes::CODEREJ => "Code-Reject",
        codes::PROTREJ => "Protocol-Reject",
        codes::ECHOREQ => "Echo-Request",
        codes::ECHOREP => "Echo-Reply",
        codes::DISCREQ => "Discard-Request",
        _ => "Unknown",
    }
}
