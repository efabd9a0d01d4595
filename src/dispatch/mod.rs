// src/dispatch/mod.rs
//! Rate-limited, retrying delivery of rendered messages to a chat transport.
//!
//! Every transport call goes through one [`Dispatcher`], which owns the
//! "end of last call" clock. The clock's lock is held for the whole call, so
//! the minimum spacing holds no matter how many callers share the dispatcher.
//! The clock is stamped on drop, so a caller that gives up mid-call still
//! pushes the next call back.

pub mod local;
pub mod telegram;

use async_trait::async_trait;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

/// What a transport reports for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    RateLimited { retry_after: Option<Duration> },
    /// Network trouble or a server-side error; worth retrying.
    Transient(String),
    /// Malformed payload, bad credentials, unknown chat; never retried.
    Fatal(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &str) -> SendOutcome;
    fn name(&self) -> &'static str;
}

/// Successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("transport rejected message after {attempts} attempt(s): {reason}")]
    Rejected { attempts: u32, reason: String },
    #[error("gave up after {attempts} attempt(s): {last_reason}")]
    Exhausted { attempts: u32, last_reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchPolicy {
    /// Gap between the end of one transport call and the start of the next.
    pub min_interval: Duration,
    /// Floor for any retry wait; grows by `backoff_factor` per failed attempt.
    pub min_retry_delay: Duration,
    /// Ceiling for any single retry wait. A server hint above it ends
    /// delivery instead of being retried early.
    pub max_retry_delay: Duration,
    /// Total transport calls per payload, first attempt included.
    pub max_attempts: u32,
    pub backoff_factor: f64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1_100),
            min_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(300),
            max_attempts: 5,
            backoff_factor: 2.0,
        }
    }
}

impl DispatchPolicy {
    /// Clamp nonsensical values instead of failing: at least one attempt,
    /// a finite factor >= 1, and a ceiling no lower than the floor.
    pub fn sanitized(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            self.backoff_factor = 1.0;
        }
        if self.max_retry_delay < self.min_retry_delay {
            self.max_retry_delay = self.min_retry_delay;
        }
        self
    }

    /// Wait before the next attempt after `failures` failed ones (>= 1).
    /// The server's hint is never shortened.
    pub fn retry_delay(&self, failures: u32, hint: Option<Duration>) -> Duration {
        let exp = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let grown = self.min_retry_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let base = Duration::from_secs_f64(grown.min(self.max_retry_delay.as_secs_f64()));
        base.max(hint.unwrap_or_default())
    }

    fn hint_too_long(&self, hint: Option<Duration>) -> bool {
        hint.is_some_and(|h| h > self.max_retry_delay)
    }
}

/// Holds the spacing clock for one transport call and stamps it when dropped.
struct CallStamp<'a>(MutexGuard<'a, Option<Instant>>);

impl Drop for CallStamp<'_> {
    fn drop(&mut self) {
        *self.0 = Some(Instant::now());
    }
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    policy: DispatchPolicy,
    last_call_end: Mutex<Option<Instant>>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, policy: DispatchPolicy) -> Self {
        Self {
            transport,
            policy: policy.sanitized(),
            last_call_end: Mutex::new(None),
        }
    }

    /// Deliver `payload`, waiting out rate limits with growing backoff.
    /// Never makes more than `max_attempts` transport calls.
    pub async fn dispatch(&self, payload: &str) -> Result<Ack, DispatchError> {
        self.deliver(payload, None).await
    }

    /// Like [`Dispatcher::dispatch`], but gives up rather than wait for a
    /// retry that would start after `budget`. A call in flight always finishes.
    pub async fn dispatch_within(
        &self,
        payload: &str,
        budget: Duration,
    ) -> Result<Ack, DispatchError> {
        self.deliver(payload, Some(Instant::now() + budget)).await
    }

    async fn deliver(&self, payload: &str, deadline: Option<Instant>) -> Result<Ack, DispatchError> {
        let max = self.policy.max_attempts;
        let mut last_reason = String::new();
        let mut attempt = 0;

        while attempt < max {
            attempt += 1;
            let wait = match self.send_spaced(payload).await {
                SendOutcome::Delivered => {
                    counter!("watch_messages_sent_total").increment(1);
                    return Ok(Ack { attempts: attempt });
                }
                SendOutcome::Fatal(reason) => {
                    counter!("watch_dispatch_failures_total").increment(1);
                    tracing::error!(transport = self.transport.name(), %reason, "message rejected");
                    return Err(DispatchError::Rejected {
                        attempts: attempt,
                        reason,
                    });
                }
                SendOutcome::RateLimited { retry_after } => {
                    counter!("watch_rate_limited_total").increment(1);
                    last_reason = match retry_after {
                        Some(d) => format!("rate limited (retry after {}s)", d.as_secs()),
                        None => "rate limited".to_string(),
                    };
                    if self.policy.hint_too_long(retry_after) {
                        last_reason.push_str(&format!(
                            ", beyond the {}s retry ceiling",
                            self.policy.max_retry_delay.as_secs()
                        ));
                        break;
                    }
                    self.policy.retry_delay(attempt, retry_after)
                }
                SendOutcome::Transient(reason) => {
                    last_reason = reason;
                    self.policy.retry_delay(attempt, None)
                }
            };

            if attempt == max {
                break;
            }
            if deadline.is_some_and(|d| Instant::now() + wait > d) {
                last_reason.push_str(", no time left to retry");
                break;
            }
            tracing::warn!(
                transport = self.transport.name(),
                attempt,
                max,
                wait_ms = wait.as_millis() as u64,
                reason = %last_reason,
                "delivery deferred"
            );
            tokio::time::sleep(wait).await;
        }

        counter!("watch_dispatch_failures_total").increment(1);
        tracing::error!(transport = self.transport.name(), attempts = attempt, reason = %last_reason, "giving up on message");
        Err(DispatchError::Exhausted {
            attempts: attempt,
            last_reason,
        })
    }

    async fn send_spaced(&self, payload: &str) -> SendOutcome {
        let last_end = self.last_call_end.lock().await;
        if let Some(end) = *last_end {
            tokio::time::sleep_until(end + self.policy.min_interval).await;
        }
        let _stamp = CallStamp(last_end);
        self.transport.send(payload).await
    }
}
