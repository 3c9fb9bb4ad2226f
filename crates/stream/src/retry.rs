//! Bounded-attempt reconnect loop.
//!
//! Wraps a single connect-and-stream attempt with a fixed-delay retry
//! policy. The failure counter counts *consecutive* failed attempts: a
//! successful (re)connection — signalled through the shared connected
//! flag, which the combined on-connect callback sets — resets it, so a
//! long-lived connection that eventually drops gets a fresh budget of
//! attempts rather than sharing a lifetime budget.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ConsumerError;

/// Attempts a consumer makes before giving up, absent any reconnect.
pub const MAX_RETRIES: u32 = 5;

/// Fixed delay between attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Retry policy for one streaming call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    /// Consecutive failures tolerated before the loop ends.
    pub max_attempts: u32,
    /// Sleep between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub(crate) fn reconnecting() -> Self {
        Self { max_attempts: MAX_RETRIES, delay: RECONNECT_DELAY }
    }

    pub(crate) fn single_attempt() -> Self {
        Self { max_attempts: 1, delay: RECONNECT_DELAY }
    }
}

/// Run `attempt` under `policy` until the stop token fires or
/// consecutive failures exhaust the budget.
///
/// Each attempt's terminal error (including a clean server-initiated
/// close) is sent on `errors`; the wrapper blocks on that send, so the
/// caller must drain the channel for retries to continue. The channel
/// closes (sender drops) when the loop ends; the stop token is checked
/// before every attempt and before every sleep, never during one.
pub(crate) async fn run_with_retry<F, Fut>(
    policy: RetryPolicy,
    stop: CancellationToken,
    errors: mpsc::Sender<ConsumerError>,
    connected: Arc<AtomicBool>,
    mut attempt: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ConsumerError>>,
{
    let mut consecutive_failures: u32 = 0;

    loop {
        if stop.is_cancelled() {
            return;
        }

        connected.store(false, Ordering::SeqCst);
        let result = attempt().await;

        if connected.load(Ordering::SeqCst) {
            consecutive_failures = 0;
        } else {
            consecutive_failures += 1;
        }

        if let Err(e) = result {
            debug!(error = %e, failures = consecutive_failures, "stream attempt ended");
            if errors.send(e).await.is_err() {
                // Caller stopped draining errors; nothing left to retry for.
                return;
            }
        }

        if consecutive_failures >= policy.max_attempts {
            debug!(attempts = policy.max_attempts, "retry budget exhausted");
            return;
        }
        if stop.is_cancelled() {
            return;
        }
        tokio::time::sleep(policy.delay).await;
    }
}
