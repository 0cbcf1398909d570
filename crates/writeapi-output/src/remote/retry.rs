//! Transport-level retries for transient append failures.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::error::RemoteError;
use super::traits::{AppendAck, AppendHandle, PendingAppend};

/// Errors that know whether another attempt may succeed.
pub trait Retryable {
    fn retryable(&self) -> bool;
}

impl Retryable for RemoteError {
    fn retryable(&self) -> bool {
        RemoteError::retryable(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retry number `attempt` (zero based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.min(32) as i32);
        let delay = self.base_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or the policy's
/// retry budget is spent.
pub async fn retry_async<T, E, Op, Fut>(policy: &RetryPolicy, mut operation: Op) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0usize;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.retryable() || attempt >= policy.max_retries {
                    return Err(error);
                }
                let delay = policy.delay_for(attempt);
                warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, %error, "retrying append");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Failure of one submit-and-acknowledge attempt.
#[derive(Debug)]
enum AttemptError {
    Submit(RemoteError),
    Ack(RemoteError),
}

impl Retryable for AttemptError {
    fn retryable(&self) -> bool {
        match self {
            AttemptError::Submit(err) | AttemptError::Ack(err) => err.retryable(),
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Submit(err) => write!(f, "submit: {err}"),
            AttemptError::Ack(err) => write!(f, "ack: {err}"),
        }
    }
}

/// Append handle that resubmits a batch when the submit or its acknowledgement fails
/// transiently.
pub struct RetryingAppendHandle {
    inner: Box<dyn AppendHandle>,
    policy: RetryPolicy,
}

impl RetryingAppendHandle {
    pub fn new(inner: Box<dyn AppendHandle>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl AppendHandle for RetryingAppendHandle {
    fn stream_name(&self) -> &str {
        self.inner.stream_name()
    }

    async fn append_rows(&self, rows: Vec<Vec<u8>>) -> Result<PendingAppend, RemoteError> {
        let inner = &self.inner;
        let outcome = retry_async(&self.policy, || {
            let rows = rows.clone();
            async move {
                let pending = inner.append_rows(rows).await.map_err(AttemptError::Submit)?;
                pending.result().await.map_err(AttemptError::Ack)
            }
        })
        .await;

        match outcome {
            Ok(ack) => Ok(PendingAppend::ready(Ok::<AppendAck, RemoteError>(ack))),
            Err(AttemptError::Submit(err)) => Err(err),
            Err(AttemptError::Ack(err)) => Ok(PendingAppend::ready(Err(err))),
        }
    }

    async fn close(&self) -> Result<(), RemoteError> {
        self.inner.close().await
    }
}
