//! Idle-timeout teardown for a proxied connection pair.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{timeout, Instant};

/// Minimum gap between informational liveness log lines.
const LIVENESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Watches the activity pulses of one connection pair and force-closes the
/// pair when no pulse arrives within the idle timeout.
///
/// The watchdog has two states: while pulses keep arriving it stays active,
/// each pulse resetting the deadline. Once the deadline passes it closes the
/// pair exactly once (by aborting both direction tasks, which drops both
/// socket halves) and exits. When the pulse channel closes during normal
/// pair teardown the watchdog exits without touching anything.
pub struct IdleWatchdog {
    timeout: Duration,
    pulses: mpsc::Receiver<u64>,
    conn: u64,
}

impl IdleWatchdog {
    pub fn new(timeout: Duration, pulses: mpsc::Receiver<u64>, conn: u64) -> Self {
        Self {
            timeout,
            pulses,
            conn,
        }
    }

    /// Run until the pair is torn down or the idle timeout fires.
    ///
    /// `upstream` and `downstream` are the abort handles of the two direction
    /// tasks; aborting them is idempotent and unblocks any pending socket
    /// read or write promptly.
    pub async fn run(mut self, upstream: AbortHandle, downstream: AbortHandle) {
        let mut last_report = Instant::now();

        loop {
            match timeout(self.timeout, self.pulses.recv()).await {
                Ok(Some(forwarded)) => {
                    if last_report.elapsed() >= LIVENESS_LOG_INTERVAL {
                        last_report = Instant::now();
                        tracing::info!(conn = self.conn, forwarded, "connection is alive");
                    }
                }
                Ok(None) => {
                    // Pair teardown closed the channel.
                    tracing::debug!(conn = self.conn, "idle watchdog exiting");
                    return;
                }
                Err(_) => {
                    // Deliberate policy closure, not an error.
                    tracing::info!(conn = self.conn, "closing idle connection");
                    upstream.abort();
                    downstream.abort();
                    return;
                }
            }
        }
    }
}
