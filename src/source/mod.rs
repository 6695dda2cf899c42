//! Decision sources - where the runner's next actions come from
//!
//! Two providers share one contract: a scripted source draining a queue
//! built from uploaded cases, and a generative planner asking an external
//! decision service. The runner prefers scripted decisions and falls
//! through to the planner when the script runs dry.

mod gateway;
mod planner;

pub use gateway::CallGateway;
pub use planner::{GenerativePlanner, PlannerSettings};

use async_trait::async_trait;
use std::collections::VecDeque;
use thiserror::Error;

use crate::decision::Decision;
use crate::runner::ActionRecord;
use crate::summary::PageSummary;

/// Errors from the generative decision path.
#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("decision service rate limited: {0}")]
    RateLimited(String),

    #[error("decision service error: {0}")]
    Service(String),

    #[error("decision service transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl PlannerError {
    /// Whether this error is a "too many requests" signal the gateway
    /// should absorb with backoff.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::Transport(err) => {
                err.status().map(|s| s.as_u16()) == Some(429)
            }
            Self::Service(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("429")
                    || msg.contains("rate limit")
                    || msg.contains("too many requests")
            }
        }
    }
}

pub type PlannerResult<T> = Result<T, PlannerError>;

/// A provider of decision batches.
#[async_trait]
pub trait DecisionSource: Send {
    /// Produce up to `batch` decisions for the current page. An empty batch
    /// means this source has nothing left to propose; the runner treats
    /// that as an end signal for the source.
    async fn next_batch(
        &mut self,
        current: &PageSummary,
        history: &[ActionRecord],
        batch: usize,
    ) -> PlannerResult<Vec<Decision>>;

    fn name(&self) -> &'static str;
}

/// Decision source backed by a pre-built queue of explicit case decisions.
///
/// Never inspects the page or history; once the queue drains it stays
/// empty.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    queue: VecDeque<Decision>,
}

impl ScriptedSource {
    pub fn new(queue: VecDeque<Decision>) -> Self {
        Self { queue }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[async_trait]
impl DecisionSource for ScriptedSource {
    async fn next_batch(
        &mut self,
        _current: &PageSummary,
        _history: &[ActionRecord],
        batch: usize,
    ) -> PlannerResult<Vec<Decision>> {
        let take = batch.min(self.queue.len());
        Ok(self.queue.drain(..take).collect())
    }

    fn name(&self) -> &'static str {
        "scripted-cases"
    }
}
