//! Rate-limited call gateway for the decision service
//!
//! Every generative call goes through here. The gateway enforces an
//! optional minimum spacing between calls (shared across all runs holding a
//! clone of the gateway) and absorbs "too many requests" responses with
//! exponential backoff. Non-rate-limit errors propagate immediately.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::Rng;
use regex::Regex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{PlannerError, PlannerResult};

/// Servers often embed their own wait hint, e.g. "Please try again in 7s".
static RETRY_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)try again in\s+(\d+(?:\.\d+)?)\s*s").expect("retry hint regex")
});

/// Upper bound on the random jitter added to each retry delay.
const JITTER_MS: u64 = 1_000;

#[derive(Clone)]
pub struct CallGateway {
    /// Minimum spacing between consecutive call issuances; `None` disables
    /// spacing entirely.
    min_interval: Option<Duration>,
    /// Retries absorbed before the rate-limit error is re-raised.
    retry_budget: u32,
    /// Seed for the `base * attempt^2` backoff curve.
    backoff_base: Duration,
    /// Next allowed issuance instant, shared across clones so concurrent
    /// runs keep the spacing guarantee meaningful.
    next_slot: Arc<Mutex<Option<Instant>>>,
}

impl CallGateway {
    pub fn new(min_interval: Option<Duration>, retry_budget: u32, backoff_base: Duration) -> Self {
        Self {
            min_interval,
            retry_budget,
            backoff_base,
            next_slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Invoke `op`, retrying rate-limit failures with backoff.
    ///
    /// Exhausting the retry budget re-raises the original rate-limit error;
    /// any other error is returned on first sight.
    pub async fn call<T, F, Fut>(&self, op: F) -> PlannerResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = PlannerResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            self.wait_for_slot().await;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limit() && attempt < self.retry_budget => {
                    attempt += 1;
                    let delay = self.retry_delay(attempt, &err);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "decision service rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Deterministic part of the n-th retry delay: `base * n^2`, floored by
    /// any server-suggested wait parsed out of the error message.
    pub fn computed_delay(&self, attempt: u32, err: &PlannerError) -> Duration {
        let squared = self
            .backoff_base
            .saturating_mul(attempt.saturating_mul(attempt));
        match suggested_wait(&err.to_string()) {
            Some(hint) => squared.max(hint),
            None => squared,
        }
    }

    fn retry_delay(&self, attempt: u32, err: &PlannerError) -> Duration {
        let jitter = Duration::from_millis(rand::rng().random_range(0..JITTER_MS));
        self.computed_delay(attempt, err) + jitter
    }

    /// Reserve the next issuance slot. The slot is claimed while the lock
    /// is held, so two concurrent callers can never be granted overlapping
    /// slots, then waited out without the lock.
    async fn wait_for_slot(&self) {
        let Some(min) = self.min_interval else { return };
        let slot = {
            let mut next = self.next_slot.lock();
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + min);
            slot
        };
        if slot > Instant::now() {
            debug!("waiting for inter-call spacing slot");
        }
        tokio::time::sleep_until(slot).await;
    }
}

/// Parse a server-suggested wait out of an error message.
fn suggested_wait(message: &str) -> Option<Duration> {
    let caps = RETRY_HINT.captures(message)?;
    let secs: f64 = caps[1].parse().ok()?;
    Some(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn gateway(retry_budget: u32) -> CallGateway {
        CallGateway::new(None, retry_budget, Duration::from_secs(2))
    }

    #[test]
    fn suggested_wait_parses_seconds() {
        assert_eq!(
            suggested_wait("Rate limit reached. Please try again in 7s."),
            Some(Duration::from_secs(7))
        );
        assert_eq!(
            suggested_wait("try again in 1.5s"),
            Some(Duration::from_secs_f64(1.5))
        );
        assert_eq!(suggested_wait("server exploded"), None);
    }

    #[test]
    fn computed_delay_is_monotonic_in_attempt() {
        let gw = gateway(5);
        let err = PlannerError::RateLimited("slow down".into());
        let mut previous = Duration::ZERO;
        for attempt in 1..=6 {
            let delay = gw.computed_delay(attempt, &err);
            assert!(delay >= previous, "attempt {attempt} regressed");
            previous = delay;
        }
        // Squared curve: attempt 3 with a 2s base is 18s.
        assert_eq!(gw.computed_delay(3, &err), Duration::from_secs(18));
    }

    #[test]
    fn suggested_wait_floors_computed_delay() {
        let gw = gateway(5);
        let err = PlannerError::RateLimited("try again in 30s".into());
        assert_eq!(gw.computed_delay(1, &err), Duration::from_secs(30));
        // Once the curve exceeds the hint, the curve wins.
        assert_eq!(gw.computed_delay(4, &err), Duration::from_secs(32));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retries_then_reraises() {
        let gw = gateway(2);
        let calls = AtomicU32::new(0);
        let result: PlannerResult<()> = gw
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(PlannerError::RateLimited("busy".into())) }
            })
            .await;
        assert!(matches!(result, Err(PlannerError::RateLimited(_))));
        // Initial call plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_rate_limit_error_propagates_immediately() {
        let gw = gateway(5);
        let calls = AtomicU32::new(0);
        let result: PlannerResult<()> = gw
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(PlannerError::Service("HTTP 500: boom".into())) }
            })
            .await;
        assert!(matches!(result, Err(PlannerError::Service(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_recovers_mid_budget() {
        let gw = gateway(3);
        let calls = AtomicU32::new(0);
        let result = gw
            .call(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(PlannerError::RateLimited("busy".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .expect("recovers");
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn min_spacing_separates_consecutive_calls() {
        let gw = CallGateway::new(Some(Duration::from_millis(500)), 0, Duration::ZERO);
        let start = Instant::now();
        let mut issue_times = Vec::new();
        for _ in 0..3 {
            gw.call(|| async { Ok(Instant::now()) })
                .await
                .map(|at| issue_times.push(at))
                .expect("call");
        }
        assert!(issue_times[1] - start >= Duration::from_millis(500));
        assert!(issue_times[2] - issue_times[1] >= Duration::from_millis(500));
    }
}
