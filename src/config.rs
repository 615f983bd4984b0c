use dotenvy::dotenv;
use std::env;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use crate::fsm::FsmLimits;
use crate::lcp::{DEFMRU, MAXMRU, MINMRU};

/// Всё, что нужно одному линку
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// UDP address we listen on.
    pub bind: String,
    /// UDP address of the peer.
    pub peer: String,
    /// Name sent in CHAP Challenge/Response.
    pub our_name: String,
    /// Credentials for authenticating ourselves (PAP).
    pub user: String,
    pub password: String,
    /// CHAP secrets by peer name.
    pub secrets: Vec<(String, Vec<u8>)>,
    pub local_ip: Option<Ipv4Addr>,
    pub remote_ip: Option<Ipv4Addr>,
    pub accept_local: bool,
    pub accept_remote: bool,
    pub mru: u16,
    pub require_chap: bool,
    pub require_pap: bool,
    pub passive: bool,
    pub limits: FsmLimits,
    pub echo_interval: Duration,
    pub echo_failures: u32,
    pub chap_timeout: Duration,
    pub chap_max_transmits: u32,
    pub chap_client_retries: Option<u32>,
    pub pap_timeout: Duration,
    pub pap_max_transmits: u32,
    pub pap_req_timeout: Duration,
    /// Servers handed to a peer that asks.
    pub dns: [Option<Ipv4Addr>; 2],
    /// Ask the peer for DNS servers.
    pub request_dns: bool,
    pub vj: bool,
    /// Send the dual-address IPCP option instead of the single one.
    pub old_addrs: bool,
    pub swapped_addrs_reject_check: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            bind: "0.0.0.0:5000".into(),
            peer: "127.0.0.1:5001".into(),
            our_name: "ppp_rust".into(),
            user: String::new(),
            password: String::new(),
            secrets: Vec::new(),
            local_ip: None,
            remote_ip: None,
            accept_local: false,
            accept_remote: false,
            mru: DEFMRU,
            require_chap: false,
            require_pap: false,
            passive: false,
            limits: FsmLimits::default(),
            echo_interval: Duration::ZERO,
            echo_failures: 0,
            chap_timeout: crate::chap::DEFTIMEOUT,
            chap_max_transmits: crate::chap::DEFMAXTRANSMITS,
            chap_client_retries: None,
            pap_timeout: crate::pap::DEFTIMEOUT,
            pap_max_transmits: crate::pap::DEFMAXTRANSMITS,
            pap_req_timeout: Duration::ZERO,
            dns: [None; 2],
            request_dns: false,
            vj: true,
            old_addrs: false,
            swapped_addrs_reject_check: true,
        }
    }
}

impl LinkConfig {
    pub fn secret_for(&self, name: &str) -> Option<Vec<u8>> {
        self.secrets
            .iter()
            .find(|(n, _)| n == name || n == "*")
            .map(|(_, s)| s.clone())
    }
}

pub fn load_config() -> Result<LinkConfig, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    match args.as_slice() {
        // Case 1: useEnv
        [_, mode] if mode == "useEnv" => {
            dotenv()?; // ← читаем .env
            from_env()
        }

        // Case 2: useInline bind peer user password
        [_, mode, bind, peer, user, password] if mode == "useInline" => Ok(LinkConfig {
            bind: bind.clone(),
            peer: peer.clone(),
            user: user.clone(),
            password: password.clone(),
            ..LinkConfig::default()
        }),

        // Anything else
        _ => Err("Please either use 'useEnv' with environment variables or 'useInline <bind> <peer> <user> <password>'".into()),
    }
}

fn var<T: FromStr>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("{}: {}", name, e).into()),
        _ => Ok(None),
    }
}

fn flag(name: &str) -> Result<Option<bool>, Box<dyn std::error::Error>> {
    match env::var(name) {
        Ok(v) => match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            "" => Ok(None),
            other => Err(format!("{}: expected a boolean, got '{}'", name, other).into()),
        },
        Err(_) => Ok(None),
    }
}

fn secs(name: &str) -> Result<Option<Duration>, Box<dyn std::error::Error>> {
    var::<f64>(name)?
        .map(|v| Duration::try_from_secs_f64(v).map_err(|e| format!("{}: {}", name, e).into()))
        .transpose()
}

/// `PPP_*` variables; anything unset keeps its default.
pub fn from_env() -> Result<LinkConfig, Box<dyn std::error::Error>> {
    let mut c = LinkConfig::default();
    c.bind = env::var("PPP_BIND")?;
    c.peer = env::var("PPP_PEER")?;
    if let Some(v) = var::<String>("PPP_NAME")? { c.our_name = v; }
    if let Some(v) = var::<String>("PPP_USER")? { c.user = v; }
    if let Some(v) = var::<String>("PPP_PASSWORD")? { c.password = v; }
    if let Ok(v) = env::var("PPP_SECRETS") { c.secrets = parse_secrets(&v)?; }
    c.local_ip = var("PPP_LOCAL_IP")?;
    c.remote_ip = var("PPP_REMOTE_IP")?;
    if let Some(v) = flag("PPP_ACCEPT_LOCAL")? { c.accept_local = v; }
    if let Some(v) = flag("PPP_ACCEPT_REMOTE")? { c.accept_remote = v; }
    if let Some(v) = var::<u16>("PPP_MRU")? {
        if !(MINMRU..=MAXMRU).contains(&v) {
            return Err(format!("PPP_MRU must be within {}..={}", MINMRU, MAXMRU).into());
        }
        c.mru = v;
    }
    if let Some(v) = flag("PPP_REQUIRE_CHAP")? { c.require_chap = v; }
    if let Some(v) = flag("PPP_REQUIRE_PAP")? { c.require_pap = v; }
    if let Some(v) = flag("PPP_PASSIVE")? { c.passive = v; }
    if let Some(v) = secs("PPP_TIMEOUT")? { c.limits.timeout = v; }
    if let Some(v) = var("PPP_MAX_CONFIGURE")? { c.limits.max_configure = v; }
    if let Some(v) = var("PPP_MAX_TERMINATE")? { c.limits.max_terminate = v; }
    if let Some(v) = var("PPP_MAX_NAK_LOOPS")? { c.limits.max_nak_loops = v; }
    if let Some(v) = secs("PPP_ECHO_INTERVAL")? { c.echo_interval = v; }
    if let Some(v) = var("PPP_ECHO_FAILURES")? { c.echo_failures = v; }
    if let Some(v) = secs("PPP_CHAP_TIMEOUT")? { c.chap_timeout = v; }
    if let Some(v) = var("PPP_CHAP_MAX_TRANSMITS")? { c.chap_max_transmits = v; }
    c.chap_client_retries = var("PPP_CHAP_CLIENT_RETRIES")?;
    if let Some(v) = secs("PPP_PAP_TIMEOUT")? { c.pap_timeout = v; }
    if let Some(v) = var("PPP_PAP_MAX_TRANSMITS")? { c.pap_max_transmits = v; }
    if let Some(v) = secs("PPP_PAP_REQ_TIMEOUT")? { c.pap_req_timeout = v; }
    c.dns = [var("PPP_DNS1")?, var("PPP_DNS2")?];
    if let Some(v) = flag("PPP_REQUEST_DNS")? { c.request_dns = v; }
    if let Some(v) = flag("PPP_VJ")? { c.vj = v; }
    if let Some(v) = flag("PPP_OLD_ADDRS")? { c.old_addrs = v; }
    if let Some(v) = flag("PPP_SWAPPED_ADDRS_REJECT_CHECK")? { c.swapped_addrs_reject_check = v; }

    if c.limits.timeout.is_zero() {
        return Err("PPP_TIMEOUT must be positive".into());
    }
    Ok(c)
}

/// `name:secret` пары через запятую; секрет с префиксом `hex:` задаётся в hex
pub fn parse_secrets(s: &str) -> Result<Vec<(String, Vec<u8>)>, Box<dyn std::error::Error>> {
    let mut out = Vec::new();
    for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
        let (name, secret) = item
            .split_once(':')
            .ok_or_else(|| format!("secret entry '{}' is not name:secret", item))?;
        out.push((name.trim().to_string(), parse_secret(secret)?));
    }
    Ok(out)
}

pub fn parse_secret(s: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    match s.strip_prefix("hex:") {
        Some(h) => {
            let clean = h.replace(":", "").replace(" ", "").to_lowercase();
            Ok(hex::decode(clean)?)
        }
        None => Ok(s.as_bytes().to_vec()),
    }
}
