//! Single-threaded event loop for one link.
//!
//! Two sources only: the head callout and the input channel. Every wake
//! first charges real elapsed time against the callouts, then hands at
//! most one frame to the link. Nothing else touches the link meanwhile.

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::fsm::CloseReason;
use crate::link::Link;
use crate::log::*;

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkExit {
    /// LCP finished for this reason.
    Finished(CloseReason),
    /// The token was cancelled; the link is left as it was.
    Cancelled,
    /// The input channel closed; lower layer reported down.
    InputClosed,
}

/// Brings the lower layer up, opens the link and runs until LCP
/// finishes, the token is cancelled, or input goes away.
pub async fn run_link(
    link: &mut Link,
    mut input: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) -> anyhow::Result<LinkExit> {
    log_line(&format!("▶️ link {} session {}", link.unit(), link.ctx.session));
    let mut last = Instant::now();
    link.lower_up();
    link.open();

    loop {
        if let Some(reason) = link.finished() {
            return Ok(LinkExit::Finished(reason));
        }

        let deadline = link.next_timeout().map(|d| last + d);
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                log_line(&format!("❌ link {} loop cancelled", link.unit()));
                return Ok(LinkExit::Cancelled);
            }
            _ = sleep_until(deadline.unwrap_or(last)), if deadline.is_some() => None,
            f = input.recv() => match f {
                Some(f) => Some(f),
                None => {
                    log_line(&format!("🔌 link {} input closed", link.unit()));
                    link.lower_down();
                    return Ok(LinkExit::InputClosed);
                }
            },
        };

        let now = Instant::now();
        link.advance(now.saturating_duration_since(last));
        last = now;

        if let Some(f) = frame {
            link.input(&f);
        }
    }
}
