use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::capture::CaptureError;
use crate::process::ProcessingError;
use crate::transfer::TransferError;

/// Bounded exponential backoff: attempt N waits
/// `base * multiplier^(N-1)`, capped at `max_delay_ms`.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 60_000,
            multiplier: 2.0,
            max_delay_ms: 900_000,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let ms = (self.base_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

/// Classification seam: components report what went wrong, only the
/// orchestrator decides whether to retry it.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for CaptureError {
    fn is_retryable(&self) -> bool {
        CaptureError::is_retryable(self)
    }
}

impl Retryable for ProcessingError {
    fn is_retryable(&self) -> bool {
        ProcessingError::is_retryable(self)
    }
}

impl Retryable for TransferError {
    fn is_retryable(&self) -> bool {
        TransferError::is_retryable(self)
    }
}

/// How a stage ended, after retries.
pub enum StageOutcome<T> {
    Ok(T),
    Failed(String),
    Cancelled,
}

/// Drive one stage as an explicit bounded state machine: attempt counter plus
/// computed delay, no recursion. Returns the retries consumed alongside the
/// outcome. Cancellation interrupts backoff sleeps and is checked around
/// every attempt; the operation itself is expected to return promptly once
/// the token fires.
pub async fn run_stage<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    stage: &str,
    mut op: F,
) -> (u32, StageOutcome<T>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut retries = 0u32;
    loop {
        if cancel.is_cancelled() {
            return (retries, StageOutcome::Cancelled);
        }

        let result = op().await;
        if cancel.is_cancelled() {
            return (retries, StageOutcome::Cancelled);
        }

        match result {
            Ok(value) => return (retries, StageOutcome::Ok(value)),
            Err(e) if e.is_retryable() && retries < policy.max_retries => {
                retries += 1;
                let delay = policy.delay_for(retries);
                warn!("{stage} attempt {retries} failed: {e}; retrying in {delay:?}");
                tokio::select! {
                    _ = cancel.cancelled() => return (retries, StageOutcome::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return (retries, StageOutcome::Failed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 5000,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1,
            multiplier: 1.0,
            max_delay_ms: 1,
        };
        let cancel = CancellationToken::new();
        let mut calls = 0u32;
        let (retries, outcome) = run_stage(&policy, &cancel, "test", || {
            calls += 1;
            let fail = calls < 3;
            async move {
                if fail {
                    Err(CaptureError::Connection("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(calls, 3);
        assert_eq!(retries, 2);
        assert!(matches!(outcome, StageOutcome::Ok(42)));
    }

    #[tokio::test]
    async fn terminal_errors_do_not_retry() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1,
            multiplier: 1.0,
            max_delay_ms: 1,
        };
        let cancel = CancellationToken::new();
        let mut calls = 0u32;
        let (retries, outcome) = run_stage::<(), _, _, _>(&policy, &cancel, "test", || {
            calls += 1;
            async { Err(CaptureError::ProtocolUnsupported("file".into())) }
        })
        .await;
        assert_eq!(calls, 1);
        assert_eq!(retries, 0);
        assert!(matches!(outcome, StageOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn exhausting_retries_fails_with_last_error() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay_ms: 1,
            multiplier: 1.0,
            max_delay_ms: 1,
        };
        let cancel = CancellationToken::new();
        let mut calls = 0u32;
        let (retries, outcome) = run_stage::<(), _, _, _>(&policy, &cancel, "test", || {
            calls += 1;
            async { Err(CaptureError::Connection("still down".into())) }
        })
        .await;
        assert_eq!(calls, 3); // initial + 2 retries
        assert_eq!(retries, 2);
        match outcome {
            StageOutcome::Failed(msg) => assert!(msg.contains("still down")),
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 60_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        };
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let started = std::time::Instant::now();
        let (_, outcome) = run_stage::<(), _, _, _>(&policy, &cancel, "test", || async {
            Err(CaptureError::Connection("down".into()))
        })
        .await;
        assert!(matches!(outcome, StageOutcome::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
