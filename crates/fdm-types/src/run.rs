//! Run identity and opaque optimizer state.

use serde::{Deserialize, Serialize};

use crate::errors::FdmResult;

/// Deterministic checkpoint identity: resuming with the same run name,
/// strategy and budget finds the same files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    pub run_name: String,
    pub strategy: String,
    pub budget: usize,
}

impl RunKey {
    pub fn new(run_name: impl Into<String>, strategy: impl Into<String>, budget: usize) -> Self {
        Self {
            run_name: run_name.into(),
            strategy: strategy.into(),
            budget,
        }
    }

    /// File stem shared by the history archive and the optimizer blob.
    pub fn file_stem(&self) -> String {
        format!("{}_{}_budget{}", self.run_name, self.strategy, self.budget)
    }
}

impl std::fmt::Display for RunKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.file_stem())
    }
}

/// Serialized optimizer state. Owned by the optimizer adapter; everybody
/// else only moves it around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptimizerState(serde_json::Value);

impl OptimizerState {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    pub fn to_bytes(&self) -> FdmResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> FdmResult<Self> {
        Ok(Self(serde_json::from_slice(bytes)?))
    }
}
