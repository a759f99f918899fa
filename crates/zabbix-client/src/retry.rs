//! Bounded retry with exponential backoff.
//!
//! The loop is split into a pure state machine ([`RetryMachine`]) and a small
//! async driver ([`with_retry`]) so the attempt accounting can be tested
//! without a network or a real clock.

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;

use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

#[derive(Debug, PartialEq)]
pub enum RetryStep<T> {
    Done(Result<T, ApiError>),
    Backoff { delay: Duration, error: ApiError },
}

#[derive(Debug)]
pub struct RetryMachine<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
}

impl<'a> RetryMachine<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn on_outcome<T>(&mut self, outcome: Result<T, ApiError>) -> RetryStep<T> {
        match outcome {
            Ok(value) => RetryStep::Done(Ok(value)),
            Err(error) if error.is_transient() && self.attempt < self.policy.max_attempts => {
                RetryStep::Backoff {
                    delay: self.policy.delay_after(self.attempt),
                    error,
                }
            }
            Err(error) => RetryStep::Done(Err(error)),
        }
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync + Debug {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Run `operation` until it succeeds, fails fatally or the attempt budget is spent.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    label: &str,
    mut operation: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut machine = RetryMachine::new(policy);
    loop {
        let attempt = machine.begin_attempt();
        match machine.on_outcome(operation().await) {
            RetryStep::Done(result) => return result,
            RetryStep::Backoff { delay, error } => {
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    label, attempt, policy.max_attempts, error, delay
                );
                sleeper.sleep(delay).await;
            }
        }
    }
}
