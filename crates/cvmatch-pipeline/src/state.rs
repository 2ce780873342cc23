use std::fmt;

use cvmatch_core::{MatchError, MatchReport, MatchResult};

/// Phase of the current (or last) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Embedding,
    Indexing,
    Retrieving,
    Prompting,
    Generating,
    Completed,
    TimedOut,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::TimedOut | RunState::Cancelled | RunState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Embedding => "embedding",
            RunState::Indexing => "indexing",
            RunState::Retrieving => "retrieving",
            RunState::Prompting => "prompting",
            RunState::Generating => "generating",
            RunState::Completed => "completed",
            RunState::TimedOut => "timed_out",
            RunState::Cancelled => "cancelled",
            RunState::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Published on the orchestrator's watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatus {
    pub run_id: u64,
    pub state: RunState,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(MatchReport),
    /// Generation lost the race against the timer. `partial` is the cleaned text
    /// streamed before the deadline.
    TimedOut { matches: Vec<MatchResult>, partial: String },
    /// Superseded by a newer run or cancelled explicitly.
    Cancelled,
    Failed(MatchError),
}

impl RunOutcome {
    pub fn state(&self) -> RunState {
        match self {
            RunOutcome::Completed(_) => RunState::Completed,
            RunOutcome::TimedOut { .. } => RunState::TimedOut,
            RunOutcome::Cancelled => RunState::Cancelled,
            RunOutcome::Failed(_) => RunState::Failed,
        }
    }

    pub fn report(&self) -> Option<&MatchReport> {
        match self {
            RunOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}
