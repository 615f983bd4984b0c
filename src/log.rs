use chrono::Local;
use std::sync::atomic::Ordering;
use crate::parser::Reader;
use crate::types::{code_name, codes};
use crate::DEBUG_PACKETS;

/// Форматированный лог с временной меткой
pub fn log_line(msg: &str) {
    let now = Local::now().format("%H:%M:%S");
    println!("{} {}", now, msg);
}

/// Ошибки пишутся в stderr
pub fn log_error(msg: &str) {
    let now = Local::now().format("%H:%M:%S");
    eprintln!("{} {}", now, msg);
}

/// Подробный лог, только при включённом DEBUG_PACKETS
pub fn log_debug(msg: &str) {
    if DEBUG_PACKETS.load(Ordering::Relaxed) {
        log_line(msg);
    }
}

/// Лог отправки пакета
pub fn log_send(proto: &str, code: u8, id: u8, payload: &[u8]) {
    log_line(&format!("Send {} {} #{}", proto, code_name(code), id));
    log_options("Send", proto, code, id, payload);
}

/// Лог получения пакета
pub fn log_recv(proto: &str, code: u8, id: u8, payload: &[u8]) {
    log_line(&format!("Received {} {} *{}", proto, code_name(code), id));
    log_options("Received", proto, code, id, payload);
}

/// Лог опций Configure-* пакета
fn log_options(dir: &str, proto: &str, code: u8, id: u8, payload: &[u8]) {
    if !DEBUG_PACKETS.load(Ordering::Relaxed) {
        return;
    }
    if !(codes::CONFREQ..=codes::CONFREJ).contains(&code) {
        if !payload.is_empty() {
            log_line(&format!("{} {} #{} Data={}", dir, proto, id, hex::encode_upper(payload)));
        }
        return;
    }
    let mut rd = Reader::new(payload);
    while !rd.is_empty() {
        match rd.ci() {
            Ok(ci) => log_line(&format!(
                "{} {} #{} Option={} Data={}",
                dir, proto, id, ci.ty, hex::encode_upper(ci.data)
            )),
            Err(e) => {
                log_line(&format!("{} {} #{} malformed option: {}", dir, proto, id, e));
                break;
            }
        }
    }
}

/// Смена состояния FSM
pub fn log_state<S: std::fmt::Debug>(proto: &str, from: S, to: S) {
    log_debug(&format!("🧭 {} FSM {:?} → {:?}", proto, from, to));
}
