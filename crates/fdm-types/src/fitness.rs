//! Fitness vectors and the direction-dependent reduction to a scalar loss.

use serde::{Deserialize, Serialize};

use crate::errors::{FdmError, FdmResult};

/// Default offset when maximizing: the optimizer
/// minimizes `offset - sum(components)`.
pub const DEFAULT_SCORE_OFFSET: f64 = 1640.0;

/// Raw per-maneuver result returned by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FitnessVector(Vec<f64>);

impl FitnessVector {
    /// Build a fitness vector, rejecting empty or non-finite results.
    ///
    /// The sum of the components must be finite as well, so `total()` never
    /// yields an infinite score.
    pub fn new(components: Vec<f64>) -> FdmResult<Self> {
        if components.is_empty() {
            return Err(FdmError::Evaluation(
                "fitness vector must have at least one component".to_string(),
            ));
        }
        if let Some(bad) = components.iter().find(|c| !c.is_finite()) {
            return Err(FdmError::Evaluation(format!(
                "fitness component {bad} is not finite"
            )));
        }
        let total: f64 = components.iter().sum();
        if !total.is_finite() {
            return Err(FdmError::Evaluation(format!(
                "fitness total of {} components overflows to {total}",
                components.len()
            )));
        }
        Ok(Self(components))
    }

    pub fn components(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Aggregate score: the plain sum of all components.
    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

/// Whether we are maximizing or minimizing the aggregate score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Maximize
    }
}

impl ObjectiveDirection {
    /// True when `candidate` strictly improves on `incumbent`.
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            ObjectiveDirection::Maximize => candidate > incumbent,
            ObjectiveDirection::Minimize => candidate < incumbent,
        }
    }
}

/// Reduction from a fitness vector to the scalar the optimizer minimizes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub direction: ObjectiveDirection,
    #[serde(default = "default_offset")]
    pub offset: f64,
}

fn default_offset() -> f64 {
    DEFAULT_SCORE_OFFSET
}

impl Default for Aggregation {
    fn default() -> Self {
        Self::maximize(DEFAULT_SCORE_OFFSET)
    }
}

impl Aggregation {
    pub fn maximize(offset: f64) -> Self {
        Self {
            direction: ObjectiveDirection::Maximize,
            offset,
        }
    }

    pub fn minimize() -> Self {
        Self {
            direction: ObjectiveDirection::Minimize,
            offset: DEFAULT_SCORE_OFFSET,
        }
    }

    /// Scalar reported to the optimizer (always minimized).
    pub fn loss(&self, fitness: &FitnessVector) -> f64 {
        match self.direction {
            ObjectiveDirection::Maximize => self.offset - fitness.total(),
            ObjectiveDirection::Minimize => fitness.total(),
        }
    }
}
