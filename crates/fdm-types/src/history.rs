//! Append-only evaluation history.

use serde::{Deserialize, Serialize};

use crate::errors::{FdmError, FdmResult};
use crate::fitness::{FitnessVector, ObjectiveDirection};

/// One evaluated candidate: its flattened parameter vector and raw fitness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub eval_id: u64,
    pub vector: Vec<f64>,
    pub fitness: FitnessVector,
}

/// Best aggregate score found so far and where it sits in the history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestEvaluation {
    pub eval_id: u64,
    pub score: f64,
}

/// Ordered (candidate vector, fitness) pairs indexed by `eval_id`.
///
/// Entries are only ever appended; row `i` always holds `eval_id == i`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunHistory {
    entries: Vec<HistoryEntry>,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a history from stored rows, checking the `eval_id` sequence.
    pub fn from_entries(entries: Vec<HistoryEntry>) -> FdmResult<Self> {
        let mut history = Self::new();
        for entry in entries {
            history.push(entry)?;
        }
        Ok(history)
    }

    /// Append one entry. Its `eval_id` must be the next row index.
    pub fn push(&mut self, entry: HistoryEntry) -> FdmResult<()> {
        let expected = self.entries.len() as u64;
        if entry.eval_id != expected {
            return Err(FdmError::Validation(format!(
                "history expects eval_id {expected}, got {}",
                entry.eval_id
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn get(&self, eval_id: u64) -> Option<&HistoryEntry> {
        self.entries.get(eval_id as usize)
    }

    /// Flattened candidate vectors, one row per evaluation.
    pub fn vectors(&self) -> impl Iterator<Item = &[f64]> {
        self.entries.iter().map(|e| e.vector.as_slice())
    }

    /// Raw fitness vectors, one row per evaluation.
    pub fn scores(&self) -> impl Iterator<Item = &[f64]> {
        self.entries.iter().map(|e| e.fitness.components())
    }

    /// Drop every entry at or after `len`. Used when a checkpoint's history
    /// was written ahead of its optimizer state.
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Best aggregate score over the whole history. Ties keep the earliest
    /// evaluation.
    pub fn best(&self, direction: ObjectiveDirection) -> Option<BestEvaluation> {
        let mut best: Option<BestEvaluation> = None;
        for entry in &self.entries {
            let score = entry.fitness.total();
            let improves = match &best {
                None => true,
                Some(current) => direction.improves(score, current.score),
            };
            if improves {
                best = Some(BestEvaluation {
                    eval_id: entry.eval_id,
                    score,
                });
            }
        }
        best
    }
}
