//! Periodic keepalive task

use crate::ConnectionHandle;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Owned keepalive task, stopped and joined by `stop`
#[derive(Debug)]
pub(crate) struct Keepalive {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Keepalive {
    /// Start pinging through `handle` every `interval` while it is connected.
    ///
    /// `token` should be a child of the connection's shutdown token so a
    /// close or drop of the connection also ends the task.
    pub(crate) fn spawn(handle: ConnectionHandle, interval: Duration, token: CancellationToken) -> Self {
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if !handle.is_connected() {
                    continue;
                }

                // A write stuck on a full socket buffer must not delay close()
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    sent = handle.send_keepalive() => {
                        if !sent {
                            debug!("Keepalive ping failed");
                        }
                    }
                }
            }
            debug!("Keepalive task stopped");
        });

        Self { token, task }
    }

    /// Cancel the task and wait for it to finish
    pub(crate) async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!("Keepalive task failed: {}", e);
            }
        }
    }
}
