pub mod log;
pub mod error;
pub mod types;
pub mod parser;
pub mod callout;
pub mod fsm;
pub mod lcp;
pub mod ipcp;
pub mod chap;
pub mod pap;
pub mod auth;
pub mod dispatch;
pub mod link;
pub mod system;
pub mod session;
pub mod config;

use std::sync::atomic::AtomicBool;
pub static DEBUG_PACKETS: AtomicBool = AtomicBool::new(false);
