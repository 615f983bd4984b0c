#![allow(dead_code)]

use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;

use ppp_rust::config::LinkConfig;
use ppp_rust::link::Link;
use ppp_rust::parser::{parse_ppp_frame, wrap_packet, Packet};
use ppp_rust::system::System;
use ppp_rust::types::codes::*;
use ppp_rust::types::protocols;

/// Что «видел» внешний мир
#[derive(Debug, Default)]
pub struct MockState {
    pub sent: Vec<Vec<u8>>,
    pub secrets: Vec<(String, Vec<u8>)>,
    pub logins: Vec<(String, String)>,
    pub user_passwd: Option<(String, String)>,
    pub delivered: Vec<(u16, Vec<u8>)>,
    pub addrs: Option<(Ipv4Addr, Ipv4Addr)>,
    pub dns: Option<(Option<Ipv4Addr>, Option<Ipv4Addr>)>,
    pub mtu: Option<u16>,
    pub lower_up: bool,
    pub if_up: bool,
    pub terminated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MockSystem(pub Rc<RefCell<MockState>>);

impl MockSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.0.borrow_mut().sent)
    }

    /// Decoded control packets sent so far for one protocol (not drained).
    pub fn sent_of(&self, protocol: u16) -> Vec<Sent> {
        self.0
            .borrow()
            .sent
            .iter()
            .map(|f| decode(f))
            .filter(|s| s.protocol == protocol)
            .collect()
    }

    pub fn last_of(&self, protocol: u16, code: u8) -> Option<Sent> {
        self.sent_of(protocol).into_iter().rev().find(|s| s.code == code)
    }

    pub fn clear(&self) {
        self.0.borrow_mut().sent.clear();
    }

    pub fn add_secret(&self, name: &str, secret: &[u8]) {
        self.0.borrow_mut().secrets.push((name.to_string(), secret.to_vec()));
    }
}

impl System for MockSystem {
    fn output(&mut self, _unit: usize, frame: &[u8]) {
        self.0.borrow_mut().sent.push(frame.to_vec());
    }

    fn lower_up(&mut self, _unit: usize) {
        self.0.borrow_mut().lower_up = true;
    }

    fn lower_down(&mut self, _unit: usize) {
        self.0.borrow_mut().lower_up = false;
    }

    fn get_secret(&mut self, _unit: usize, name: &str) -> Option<Vec<u8>> {
        self.0
            .borrow()
            .secrets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.clone())
    }

    fn check_login(&mut self, _unit: usize, user: &str, passwd: &str) -> (bool, String) {
        let ok = self.0.borrow().logins.iter().any(|(u, p)| u == user && p == passwd);
        if ok {
            (true, "Login ok".into())
        } else {
            (false, "Login incorrect".into())
        }
    }

    fn get_user_passwd(&mut self, _unit: usize) -> Option<(String, String)> {
        self.0.borrow().user_passwd.clone()
    }

    fn set_mtu(&mut self, _unit: usize, mtu: u16) {
        self.0.borrow_mut().mtu = Some(mtu);
    }

    fn set_addrs(&mut self, _unit: usize, ours: Ipv4Addr, his: Ipv4Addr) -> bool {
        self.0.borrow_mut().addrs = Some((ours, his));
        true
    }

    fn clear_addrs(&mut self, _unit: usize, _ours: Ipv4Addr, _his: Ipv4Addr) {
        self.0.borrow_mut().addrs = None;
    }

    fn set_dns(&mut self, _unit: usize, dns1: Option<Ipv4Addr>, dns2: Option<Ipv4Addr>) {
        self.0.borrow_mut().dns = Some((dns1, dns2));
    }

    fn set_up(&mut self, _unit: usize) {
        self.0.borrow_mut().if_up = true;
    }

    fn set_down(&mut self, _unit: usize) {
        self.0.borrow_mut().if_up = false;
    }

    fn deliver(&mut self, _unit: usize, protocol: u16, data: &[u8]) {
        self.0.borrow_mut().delivered.push((protocol, data.to_vec()));
    }

    fn link_terminated(&mut self, _unit: usize) {
        self.0.borrow_mut().terminated = true;
    }
}

/// Разобранный отправленный пакет
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub protocol: u16,
    pub code: u8,
    pub id: u8,
    pub payload: Vec<u8>,
}

pub fn decode(frame: &[u8]) -> Sent {
    let f = parse_ppp_frame(frame).expect("bad PPP frame");
    let pkt = Packet::parse(f.info).expect("bad packet");
    Sent { protocol: f.protocol, code: pkt.code, id: pkt.id, payload: pkt.payload.to_vec() }
}

pub fn frame(protocol: u16, code: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    wrap_packet(protocol, code, id, payload)
}

pub fn ip(a: u8, b: u8, c: u8, d: u8) -> Ipv4Addr {
    Ipv4Addr::new(a, b, c, d)
}

pub fn config(local: Ipv4Addr, remote: Ipv4Addr) -> LinkConfig {
    LinkConfig {
        local_ip: Some(local),
        remote_ip: Some(remote),
        ..LinkConfig::default()
    }
}

pub fn link_with(config: LinkConfig) -> (Link, MockSystem) {
    let mock = MockSystem::new();
    let link = Link::new(0, config, Box::new(mock.clone()));
    (link, mock)
}

/// Поднимает LCP: пустой запрос от пира и Ack на наш
pub fn open_lcp(link: &mut Link, mock: &MockSystem) {
    link.lower_up();
    link.open();
    let req = mock.last_of(protocols::LCP, CONFREQ).expect("no LCP Configure-Request");
    link.input(&frame(protocols::LCP, CONFREQ, 1, &[]));
    link.input(&frame(protocols::LCP, CONFACK, req.id, &req.payload));
    assert!(link.lcp.is_open(), "LCP должен быть открыт");
}

/// Поднимает IPCP: пир просит `peer_addr` и подтверждает наш запрос
pub fn open_ipcp(link: &mut Link, mock: &MockSystem, peer_addr: Ipv4Addr) {
    let req = mock.last_of(protocols::IPCP, CONFREQ).expect("no IPCP Configure-Request");
    let mut ci = vec![3, 6];
    ci.extend_from_slice(&peer_addr.octets());
    link.input(&frame(protocols::IPCP, CONFREQ, 1, &ci));
    link.input(&frame(protocols::IPCP, CONFACK, req.id, &req.payload));
    assert!(link.ipcp.is_open(), "IPCP должен быть открыт");
}

/// Гоняет кадры между двумя линками, пока оба не замолчат
pub fn shuttle(a: &mut Link, am: &MockSystem, b: &mut Link, bm: &MockSystem) {
    for _ in 0..64 {
        let from_a = am.take_sent();
        let from_b = bm.take_sent();
        if from_a.is_empty() && from_b.is_empty() {
            return;
        }
        for f in from_a {
            b.input(&f);
        }
        for f in from_b {
            a.input(&f);
        }
    }
    panic!("links never went quiet");
}
