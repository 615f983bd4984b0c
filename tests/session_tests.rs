mod common;

use std::time::Duration;

use common::*;
use ppp_rust::config::LinkConfig;
use ppp_rust::fsm::{CloseReason, FsmLimits};
use ppp_rust::link::Link;
use ppp_rust::session::{run_link, LinkExit};
use ppp_rust::system::System;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Кадры уходят в канал соседа; поднятие интерфейса гасит свой цикл
struct ChannelSystem {
    tx: mpsc::Sender<Vec<u8>>,
    up: CancellationToken,
}

impl System for ChannelSystem {
    fn output(&mut self, _unit: usize, frame: &[u8]) {
        let _ = self.tx.try_send(frame.to_vec());
    }

    fn set_up(&mut self, _unit: usize) {
        self.up.cancel();
    }
}

fn channel_link(config: LinkConfig, tx: mpsc::Sender<Vec<u8>>, up: CancellationToken) -> Link {
    Link::new(0, config, Box::new(ChannelSystem { tx, up }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_two_links_negotiate_over_channels() {
        let (to_a, from_b) = mpsc::channel(64);
        let (to_b, from_a) = mpsc::channel(64);
        let a_done = CancellationToken::new();
        let b_done = CancellationToken::new();

        let mut a = channel_link(config(ip(10, 0, 0, 1), ip(10, 0, 0, 2)), to_b, a_done.clone());
        let mut b = channel_link(config(ip(10, 0, 0, 2), ip(10, 0, 0, 1)), to_a, b_done.clone());

        let (ra, rb) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(run_link(&mut a, from_b, a_done), run_link(&mut b, from_a, b_done))
        })
        .await
        .expect("согласование не уложилось в 5 секунд");

        assert_eq!(ra.unwrap(), LinkExit::Cancelled);
        assert_eq!(rb.unwrap(), LinkExit::Cancelled);
        assert!(a.ipcp.is_open(), "IPCP на A должен быть открыт");
        assert!(b.ipcp.is_open(), "IPCP на B должен быть открыт");
        assert_eq!(a.session_info().map(|s| s.peer), Some(ip(10, 0, 0, 2)));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (_in_tx, in_rx) = mpsc::channel(16);
        let config = LinkConfig {
            limits: FsmLimits {
                timeout: Duration::from_millis(20),
                max_configure: 2,
                ..FsmLimits::default()
            },
            ..LinkConfig::default()
        };
        let mut link = channel_link(config, out_tx, CancellationToken::new());

        let exit = tokio::time::timeout(Duration::from_secs(5), run_link(&mut link, in_rx, CancellationToken::new()))
            .await
            .expect("цикл не завершился")
            .unwrap();
        assert_eq!(exit, LinkExit::Finished(CloseReason::NoResponse));

        let mut requests = 0;
        while let Ok(f) = out_rx.try_recv() {
            assert_eq!(decode(&f).code, ppp_rust::types::codes::CONFREQ);
            requests += 1;
        }
        assert_eq!(requests, 3, "первый запрос и два повтора");
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (out_tx, _out_rx) = mpsc::channel(16);
        let (_in_tx, in_rx) = mpsc::channel(16);
        let mut link = channel_link(LinkConfig::default(), out_tx, CancellationToken::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let exit = run_link(&mut link, in_rx, cancel).await.unwrap();
        assert_eq!(exit, LinkExit::Cancelled);
        assert!(link.finished().is_none(), "отмена не закрывает линк");
    }

    #[tokio::test]
    async fn test_input_closed_reports_lower_down() {
        let (out_tx, _out_rx) = mpsc::channel(16);
        let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(16);
        drop(in_tx);
        let mut link = channel_link(LinkConfig::default(), out_tx, CancellationToken::new());

        let exit = run_link(&mut link, in_rx, CancellationToken::new()).await.unwrap();
        assert_eq!(exit, LinkExit::InputClosed);
        assert_eq!(link.finished(), Some(CloseReason::LowerDown));
    }
}
