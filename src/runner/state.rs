//! Run state and the action audit trail

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::artifacts::Artifact;
use crate::decision::{Decision, DecisionKind};

/// What a run is pointed at.
#[derive(Debug, Clone)]
pub enum RunTarget {
    /// Live site, loaded over HTTP(S).
    Url(String),
    /// Static image rendered as the page content (design-review runs).
    Image(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Ok,
    Error,
    End,
}

/// The immutable outcome of attempting one decision. Records are appended
/// in execution order and never rewritten; together they are the
/// authoritative audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub kind: DecisionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Applied value, already masked if the field was secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

impl ActionRecord {
    pub fn ok(kind: DecisionKind, target: Option<String>, value: Option<String>) -> Self {
        Self {
            kind,
            target,
            value,
            status: ActionStatus::Ok,
            note: None,
            at: Utc::now(),
        }
    }

    pub fn error(kind: DecisionKind, target: Option<String>, message: String) -> Self {
        Self {
            kind,
            target,
            value: None,
            status: ActionStatus::Error,
            note: Some(message),
            at: Utc::now(),
        }
    }

    pub fn end(note: Option<String>) -> Self {
        Self {
            kind: DecisionKind::End,
            target: None,
            value: None,
            status: ActionStatus::End,
            note,
            at: Utc::now(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Mutable state of one execution. Created at INIT, owned and mutated only
/// by the runner, finalized into a [`RunOutcome`] at END.
#[derive(Debug)]
pub struct RunState {
    pub id: Uuid,
    pub target: RunTarget,
    pub category: Option<String>,
    pub step: usize,
    pub queue: VecDeque<Decision>,
    pub actions: Vec<ActionRecord>,
    pub console_errors: Vec<String>,
    /// Origin of the initially loaded page; navigation never leaves it.
    pub start_origin: Option<Url>,
}

impl RunState {
    pub fn new(id: Uuid, target: RunTarget, category: Option<String>) -> Self {
        Self {
            id,
            target,
            category,
            step: 0,
            queue: VecDeque::new(),
            actions: Vec::new(),
            console_errors: Vec::new(),
            start_origin: None,
        }
    }
}

/// What a finished run hands back to the caller, success or graceful end
/// alike.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub artifacts: Vec<Artifact>,
    pub actions: Vec<ActionRecord>,
    pub console_errors: Vec<String>,
}

/// Failures that prevent a run from producing an outcome at all. Everything
/// else is recorded in the action trail and the run keeps going.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("session could not be started: {0}")]
    Init(String),

    #[error("run cancelled by caller")]
    Cancelled,
}
