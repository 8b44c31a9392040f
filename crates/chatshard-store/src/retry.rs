//! Bounded retry wrapper for store operations.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::ctx::OpCtx;
use crate::env;
use crate::error::{StoreError, StoreResult};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_INIT_BACKOFF: Duration = Duration::from_millis(15);

/// Shape of the backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// Attempt `i` sleeps `base^i` milliseconds.
    Exponential,
    /// Attempt `i` sleeps `i * base` milliseconds.
    Linear,
}

/// Retry policy wrapped around every store call.
///
/// Reconcilable failures are retried up to `max_retries` total attempts;
/// terminal failures and `NoRows` return immediately. The wrapper never
/// returns partial progress — each attempt is one committed-or-rolled-back
/// transaction downstream.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    init_backoff: Duration,
    kind: BackoffKind,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, init_backoff: Duration, kind: BackoffKind) -> Self {
        Self {
            max_retries: max_retries.max(1),
            init_backoff,
            kind,
        }
    }

    /// Read `MAX_RETRIES`, `INIT_RETRY_BACKOFF` and `BACKOFF_TYPE` once.
    /// Unknown backoff types warn and fall back to exponential.
    ///
    /// The default 15 ms exponential schedule gives [15, 225, 3375] ms —
    /// the controller must not back off for long, things go south fast.
    pub fn from_env() -> Self {
        let max_retries = env::u32_or("MAX_RETRIES", DEFAULT_MAX_RETRIES);
        let init_backoff = env::duration_ms_or("INIT_RETRY_BACKOFF", DEFAULT_INIT_BACKOFF);
        let raw_kind = env::string_or("BACKOFF_TYPE", "exp");
        let kind = match raw_kind.as_str() {
            "exp" => BackoffKind::Exponential,
            "lin" => BackoffKind::Linear,
            other => {
                warn!(provided = other, "invalid backoff strategy provided, using default");
                BackoffKind::Exponential
            }
        };
        Self::new(max_retries, init_backoff, kind)
    }

    /// Sleep before the attempt following `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.init_backoff.as_millis() as u64;
        let ms = match self.kind {
            BackoffKind::Exponential => base.saturating_pow(attempt),
            BackoffKind::Linear => base.saturating_mul(attempt as u64),
        };
        Duration::from_millis(ms)
    }

    /// Run `op`, retrying reconcilable failures per the schedule.
    ///
    /// Cancellation of `ctx` between attempts returns
    /// [`StoreError::Cancelled`] without further backoff.
    pub async fn run<T, F, Fut>(&self, ctx: &OpCtx, mut op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 1;
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    warn!(
                        trace_id = %ctx.trace_id,
                        attempt,
                        error = %err,
                        "store operation failed; retrying"
                    );
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => return Err(StoreError::Cancelled),
                        _ = tokio::time::sleep(self.delay(attempt)) => {}
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            DEFAULT_INIT_BACKOFF,
            BackoffKind::Exponential,
        )
    }
}
