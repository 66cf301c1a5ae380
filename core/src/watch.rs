use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::substrate::{keys, ChangeEvent, Substrate, WatchOutcome};

/// What the change-feed consumer hands to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchMessage {
    Event(ChangeEvent),
    /// The substrate's bounded history dropped the index we were resuming
    /// from; events between `from` and `to` may have been missed.
    IndexSkip { from: u64, to: u64 },
    /// The substrate has been unreachable for several attempts in a row;
    /// subscribers should be disconnected so they resync on reconnect.
    ConnectionLost,
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Long-poll bound; on expiry the wait index is refreshed from the
    /// substrate head, which also recovers from back-in-time resets.
    pub poll_timeout: Duration,
    /// Consecutive transport failures before `ConnectionLost` is emitted.
    pub failure_threshold: u32,
}

impl Default for WatchConfig {
    fn default() -> Self { Self { poll_timeout: Duration::from_secs(20), failure_threshold: 3 } }
}

const BACKOFF_SECS: [u64; 4] = [0, 1, 3, 10];

/// The single long-poll consumer of the substrate's recursive change feed
/// over `resource/`. Decoded events come out of the queue in substrate
/// order per key.
pub struct ChangeFeed {
    handle: JoinHandle<()>,
}

impl ChangeFeed {
    pub fn spawn(substrate: Arc<dyn Substrate>, config: WatchConfig) -> (Self, mpsc::UnboundedReceiver<WatchMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(substrate, config, tx));
        (Self { handle }, rx)
    }

    pub fn shutdown(&self) { self.handle.abort(); }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) { self.handle.abort(); }
}

async fn run(substrate: Arc<dyn Substrate>, config: WatchConfig, tx: mpsc::UnboundedSender<WatchMessage>) {
    let mut wait_index: u64 = 0;
    let mut failures: u32 = 0;

    loop {
        match substrate.watch(keys::RESOURCE_ROOT, wait_index, config.poll_timeout).await {
            Ok(WatchOutcome::Event(event)) => {
                failures = 0;
                // Resume from the event's own index, never the header
                // index, which can include unrelated namespaces.
                wait_index = event.modified_index;
                if tx.send(WatchMessage::Event(event)).is_err() {
                    return;
                }
            }
            Ok(WatchOutcome::Timeout) => {
                failures = 0;
                match substrate.head_index().await {
                    Ok(head) => {
                        if head < wait_index {
                            warn!("substrate index went backwards: {wait_index} -> {head}");
                        }
                        debug!("watch timed out, wait index now {head}");
                        wait_index = head;
                    }
                    Err(e) => warn!("could not refresh wait index: {e}"),
                }
            }
            Ok(WatchOutcome::HistoryGone { .. }) => {
                failures = 0;
                let to = substrate.head_index().await.unwrap_or(0);
                warn!("substrate history not available, skipping {wait_index} -> {to}");
                if tx.send(WatchMessage::IndexSkip { from: wait_index, to }).is_err() {
                    return;
                }
                wait_index = to;
            }
            Err(e) => {
                failures += 1;
                warn!("could not contact substrate ({failures} in a row): {e}");
                if failures == config.failure_threshold {
                    info!("disconnecting all subscribed sockets");
                    if tx.send(WatchMessage::ConnectionLost).is_err() {
                        return;
                    }
                }
                let step = BACKOFF_SECS[(failures as usize).min(BACKOFF_SECS.len() - 1)];
                tokio::time::sleep(Duration::from_secs(step)).await;
            }
        }
    }
}
