//! Exponential backoff with jitter for reconnection attempts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::ReconnectConfig;
use crate::error::{BridgeError, Result};

/// Run `op` until it succeeds, sleeping between attempts.
///
/// Attempt `i` (0-indexed) is followed by a sleep of
/// `min(max_delay, delay) + jitter` with `jitter` uniform in
/// `[0, min(max_delay, delay) / 2)`, after which the delay doubles up to
/// `max_delay`. No sleep follows the final attempt. With
/// `max_attempts = None` the loop only ends on success.
pub async fn retry_with_backoff<F, Fut, T>(policy: &ReconnectConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 0usize;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if let Some(max) = policy.max_attempts {
                    if attempt >= max {
                        return Err(BridgeError::RetriesExhausted {
                            attempts: attempt,
                            last_error: err.to_string(),
                        });
                    }
                }

                let sleep = sleep_duration(delay, policy.max_delay);
                warn!(attempt, wait = ?sleep, error = %err, "retrying after backoff");
                tokio::time::sleep(sleep).await;
                delay = (delay * 2).min(policy.max_delay);
            }
        }
    }
}

fn sleep_duration(delay: Duration, max_delay: Duration) -> Duration {
    let capped = delay.min(max_delay);
    let half = capped.as_millis() as u64 / 2;
    let jitter = if half > 0 {
        Duration::from_millis(rand::thread_rng().gen_range(0..half))
    } else {
        Duration::ZERO
    };
    capped + jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn policy(initial_ms: u64, max_ms: u64, attempts: Option<usize>) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            max_attempts: attempts,
        }
    }

    #[tokio::test]
    async fn succeeds_without_sleeping_on_first_attempt() {
        let start = Instant::now();
        let out = retry_with_backoff(&policy(50, 200, Some(3)), || async { Ok(7) }).await;
        assert_eq!(out.unwrap(), 7);
        assert!(start.elapsed() < Duration::from_millis(40));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicUsize::new(0);
        let out = retry_with_backoff(&policy(10, 100, Some(5)), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 1 {
                    Err(BridgeError::DialFailed("transient".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(out.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausts_the_attempt_budget() {
        let calls = AtomicUsize::new(0);
        let out: Result<()> = retry_with_backoff(&policy(5, 20, Some(3)), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BridgeError::DialFailed("down".into())) }
        })
        .await;
        assert!(matches!(
            out,
            Err(BridgeError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn elapsed_time_follows_the_backoff_law() {
        // Three failures with (initial, max) = (40ms, 100ms) sleep for
        // 40, 80 and 100 ms before jitter; jitter adds at most half of each.
        let calls = AtomicUsize::new(0);
        let start = Instant::now();
        let out = retry_with_backoff(&policy(40, 100, Some(10)), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(BridgeError::DialFailed("outage".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(out.is_ok());

        let elapsed = start.elapsed();
        let floor = Duration::from_millis(40 + 80 + 100);
        let ceiling = Duration::from_millis(60 + 120 + 150 + 100); // + scheduling slack
        assert!(elapsed >= floor, "elapsed {elapsed:?} below backoff floor");
        assert!(elapsed < ceiling, "elapsed {elapsed:?} above backoff ceiling");
    }

    #[tokio::test]
    async fn zero_attempt_budget_still_runs_once() {
        // A ceiling of 1 means a single attempt and no sleep.
        let calls = AtomicUsize::new(0);
        let out: Result<()> = retry_with_backoff(&policy(5, 20, Some(1)), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BridgeError::DialFailed("down".into())) }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
