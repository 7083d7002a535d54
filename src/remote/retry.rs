//! Throttling retries for backend implementations.
//!
//! Cloud backends answer bursts of requests with 429-style throttling
//! replies, usually carrying a suggested delay. [`RetryPolicy::run`] wraps
//! an operation and retries it on such replies, growing the wait by a
//! constant factor per attempt. Anything that is not a throttle reply
//! propagates immediately.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::JobError;

/// What the backend should do with a reply.
pub enum Attempt<T> {
    /// The operation finished with this result.
    Done(Result<T, JobError>),
    /// The server throttled the request; retry after the suggested delay,
    /// or after the policy default if the server did not suggest one.
    Throttled(Option<Duration>),
}

/// Retry schedule for server-throttled requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Wait used when the server suggests none.
    pub default_delay: Duration,
    /// Multiplier applied to the delay on every further attempt.
    pub backoff_factor: f64,
    /// Attempts before giving up (including the first).
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            default_delay: Duration::from_secs(5),
            backoff_factor: 1.2,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Run `operation` until it is done or the attempt budget is spent.
    /// Exhausting the budget yields the last throttle as
    /// [`JobError::NetworkRequestFailed`].
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, JobError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let mut factor = 1.0;
        for attempt in 1..=self.max_attempts {
            match operation().await {
                Attempt::Done(result) => return result,
                Attempt::Throttled(suggested) => {
                    if attempt == self.max_attempts {
                        break;
                    }
                    let base = suggested.unwrap_or(self.default_delay);
                    let delay = base.mul_f64(factor);
                    debug!(?delay, attempt, "server throttled request, backing off");
                    tokio::time::sleep(delay).await;
                    factor *= self.backoff_factor;
                }
            }
        }
        Err(JobError::NetworkRequestFailed(
            "server kept throttling the request".into(),
        ))
    }
}
