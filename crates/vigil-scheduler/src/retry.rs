//! Retry logic with configurable backoff policies for job execution.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use vigil_types::{Result, RunResult};

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed {
        #[serde(rename = "delayMs", with = "millis")]
        delay: Duration,
    },
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential {
        #[serde(rename = "baseMs", with = "millis")]
        base: Duration,
        #[serde(rename = "maxMs", with = "millis")]
        max: Duration,
    },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed { delay } => *delay,
            BackoffPolicy::Exponential { base, max } => {
                let millis = (base.as_millis() as u64)
                    .saturating_mul(2u64.saturating_pow(attempt as u32));
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// What [`execute_with_retry`] ended with.
#[derive(Debug)]
pub struct RetryOutcome {
    /// The last attempt's result.
    pub result: Result<RunResult>,
    /// How many times the run was attempted.
    pub attempts: usize,
    /// Stopped by the cancel signal rather than by a verdict.
    pub cancelled: bool,
}

/// Whether a finished attempt is worth repeating.
fn is_transient(result: &Result<RunResult>) -> bool {
    match result {
        Ok(run) => run.is_transient_error(),
        Err(e) => e.is_retryable(),
    }
}

/// Resolves once `cancel` reads `true`. Never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Execute a job run with retry logic.
///
/// The closure `f` is called up to `max_retries + 1` times with the 0-indexed
/// attempt number. Retries occur when:
/// - The run ended `error` on a transient network failure
/// - The error satisfies [`vigil_types::VigilError::is_retryable`]
///
/// Between retries, the function sleeps for the duration dictated by `policy`.
/// A cancelled run, or a cancel signal during the sleep, ends the loop with
/// `cancelled` set.
pub async fn execute_with_retry<F, Fut>(
    f: F,
    max_retries: usize,
    policy: &BackoffPolicy,
    job_id: &str,
    cancel: &watch::Receiver<bool>,
) -> RetryOutcome
where
    F: Fn(usize) -> Fut,
    Fut: std::future::Future<Output = Result<RunResult>>,
{
    let mut cancel = cancel.clone();
    let mut attempt = 0;
    loop {
        let result = f(attempt).await;
        let attempts = attempt + 1;

        if matches!(&result, Ok(run) if run.cancelled) {
            return RetryOutcome {
                result,
                attempts,
                cancelled: true,
            };
        }
        if !is_transient(&result) || attempt >= max_retries {
            return RetryOutcome {
                result,
                attempts,
                cancelled: false,
            };
        }

        let delay = policy.delay_for_attempt(attempt);
        tracing::warn!(job = %job_id, attempt, delay_ms = %delay.as_millis(), "Transient failure, retrying");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancelled(&mut cancel) => {
                tracing::info!(job = %job_id, attempt, "Retry abandoned on shutdown");
                return RetryOutcome {
                    result,
                    attempts,
                    cancelled: true,
                };
            }
        }
        attempt += 1;
    }
}
