use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ppp_rust::config::{load_config, LinkConfig};
use ppp_rust::link::Link;
use ppp_rust::log::*;
use ppp_rust::parser::MAX_FRAME;
use ppp_rust::session::{run_link, LinkExit};
use ppp_rust::system::System;
use ppp_rust::DEBUG_PACKETS;

/// Кадры уходят в UDP через канал писателя
struct UdpSystem {
    out: mpsc::Sender<Vec<u8>>,
    config: LinkConfig,
}

impl System for UdpSystem {
    fn output(&mut self, _unit: usize, frame: &[u8]) {
        if let Err(e) = self.out.try_send(frame.to_vec()) {
            log_error(&format!("❌ Ошибка отправки в канал: {e}"));
        }
    }

    fn get_secret(&mut self, _unit: usize, name: &str) -> Option<Vec<u8>> {
        self.config.secret_for(name)
    }

    fn check_login(&mut self, _unit: usize, user: &str, passwd: &str) -> (bool, String) {
        if !self.config.user.is_empty() && user == self.config.user && passwd == self.config.password {
            (true, "Login ok".into())
        } else {
            (false, "Login incorrect".into())
        }
    }

    fn get_user_passwd(&mut self, _unit: usize) -> Option<(String, String)> {
        (!self.config.user.is_empty()).then(|| (self.config.user.clone(), self.config.password.clone()))
    }

    fn deliver(&mut self, _unit: usize, protocol: u16, data: &[u8]) {
        log_debug(&format!("📥 IP 0x{:04x} {} байт", protocol, data.len()));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().map_err(|e| anyhow::anyhow!("{e}"))?;
    if std::env::var("PPP_DEBUG").is_ok() {
        DEBUG_PACKETS.store(true, Ordering::Relaxed);
    }

    let socket = Arc::new(UdpSocket::bind(&config.bind).await?);
    socket.connect(&config.peer).await?;
    log_line(&format!("✅ UDP {} → {}", config.bind, config.peer));

    let cancel = CancellationToken::new();
    let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(1024);
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(1024);

    // === Чтение из UDP ===
    let reader = tokio::spawn({
        let socket = socket.clone();
        let cancel = cancel.clone();
        async move {
            let mut buf = vec![0u8; MAX_FRAME];
            loop {
                select! {
                    _ = cancel.cancelled() => {
                        println!("❌ Поток чтения UDP остановлен.");
                        break;
                    }
                    res = socket.recv(&mut buf) => match res {
                        Ok(n) => {
                            if in_tx.send(buf[..n].to_vec()).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => eprintln!("❌ Ошибка чтения из UDP: {e}"),
                    }
                }
            }
        }
    });

    // === Запись в UDP: до закрытия канала, чтобы ушёл Terminate-Request ===
    let writer = tokio::spawn({
        let socket = socket.clone();
        async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = socket.send(&frame).await {
                    eprintln!("❌ Ошибка записи в UDP: {e}");
                }
            }
        }
    });

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log_line("🛑 Ctrl-C");
                cancel.cancel();
            }
        }
    });

    let sys = UdpSystem { out: out_tx, config: config.clone() };
    let mut link = Link::new(0, config, Box::new(sys));
    let exit = run_link(&mut link, in_rx, cancel.clone()).await?;
    log_line(&format!("link finished: {:?}", exit));

    if let Some(info) = link.session_info() {
        log_line(&format!("last session: {} ↔ {}", info.ip, info.peer));
    }
    if exit == LinkExit::Cancelled {
        link.close();
    }

    cancel.cancel();
    drop(link);
    let _ = reader.await;
    let _ = writer.await;
    Ok(())
}
