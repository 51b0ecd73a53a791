//! Run lifecycle tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fdm_types::{internal_error, BestEvaluation, FdmResult};

use crate::config::RunId;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Initializing,
    Running,
    Checkpointing,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Initializing, Running) => true,
            (Running, Checkpointing) | (Checkpointing, Running) => true,
            (Running, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Live status of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: RunId,
    pub state: RunState,
    pub total_rounds: usize,
    pub rounds_completed: usize,
    pub evaluations: usize,
    pub best: Option<BestEvaluation>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunStatus {
    pub fn new(run_id: RunId, total_rounds: usize) -> Self {
        Self {
            run_id,
            state: RunState::Initializing,
            total_rounds,
            rounds_completed: 0,
            evaluations: 0,
            best: None,
            started_at: None,
            finished_at: None,
            last_checkpoint_at: None,
            error: None,
        }
    }

    fn transition(&mut self, next: RunState) -> FdmResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(internal_error!(
                "Run {} cannot move from {:?} to {:?}",
                self.run_id,
                self.state,
                next
            ));
        }
        self.state = next;
        Ok(())
    }

    pub fn mark_running(&mut self) -> FdmResult<()> {
        self.transition(RunState::Running)?;
        self.started_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    pub fn mark_checkpointing(&mut self) -> FdmResult<()> {
        self.transition(RunState::Checkpointing)
    }

    /// Checkpoint written; back to running.
    pub fn mark_checkpointed(&mut self, at: DateTime<Utc>) -> FdmResult<()> {
        self.transition(RunState::Running)?;
        self.last_checkpoint_at = Some(at);
        Ok(())
    }

    pub fn mark_completed(&mut self) -> FdmResult<()> {
        self.transition(RunState::Completed)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Record the failure. A run that already finished keeps its state.
    pub fn mark_failed(&mut self, error: String) {
        if self.transition(RunState::Failed).is_ok() {
            self.finished_at = Some(Utc::now());
            self.error = Some(error);
        }
    }

    pub fn record_round(&mut self, evaluations: usize, best: Option<BestEvaluation>) {
        self.rounds_completed += 1;
        self.evaluations = evaluations;
        self.best = best;
    }

    pub fn progress(&self) -> f64 {
        if self.total_rounds == 0 {
            1.0
        } else {
            self.rounds_completed as f64 / self.total_rounds as f64
        }
    }
}
