//! Evaluation task descriptors handed to workers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use fdm_optimizer::Candidate;

use crate::config::RunId;

/// Serializable payload for one candidate evaluation.
///
/// `parameters` is the candidate as a named mapping with `eval_id` included,
/// which is exactly what an external simulator receives on stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationTask {
    pub run_id: RunId,
    pub eval_id: u64,
    pub worker_index: usize,
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl EvaluationTask {
    pub fn new(run_id: RunId, eval_id: u64, worker_index: usize, candidate: &Candidate) -> Self {
        Self {
            run_id,
            eval_id,
            worker_index,
            parameters: candidate.to_named_map(),
        }
    }

    /// Numeric value of a scalar or choice parameter.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).and_then(|v| v.as_f64())
    }

    /// Elements of a vector parameter.
    pub fn array(&self, name: &str) -> Option<Vec<f64>> {
        self.parameters
            .get(name)?
            .as_array()?
            .iter()
            .map(|v| v.as_f64())
            .collect()
    }
}

/// External simulator invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl EvaluatorCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}
