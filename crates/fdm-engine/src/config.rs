//! Run configuration.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fdm_optimizer::{BuildMode, DesignSpace, OptimizerParams, ParameterSpace};
use fdm_types::{config_error, Aggregation, BaselineProvider, FdmResult, RunKey};

use crate::task::EvaluatorCommand;

/// Unique run identifier.
pub type RunId = Uuid;

fn default_checkpoint_interval() -> usize {
    5
}

fn default_log_interval() -> usize {
    5
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("fdm_runs")
}

fn default_mode() -> BuildMode {
    BuildMode::FullSearch
}

/// Everything needed to start or resume one optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "Uuid::new_v4")]
    pub id: RunId,
    pub run_name: String,

    /// Seeds the optimizer generator. Nothing else draws randomness.
    pub seed: u64,

    /// Total number of candidates to evaluate.
    pub budget: usize,

    /// Registered strategy name, e.g. "EvolutionaryDefault" or "Chaining".
    pub strategy: String,

    #[serde(default)]
    pub optimizer_params: OptimizerParams,

    /// Fitness reduction. Falls back to the build mode's direction with the
    /// default offset.
    #[serde(default)]
    pub objective: Option<Aggregation>,

    /// Checkpoint every K rounds.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,

    /// Progress line every N rounds.
    #[serde(default = "default_log_interval")]
    pub log_interval: usize,

    /// Number of concurrent evaluations. Defaults to the host's available
    /// parallelism.
    #[serde(default)]
    pub parallelism: Option<usize>,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_mode")]
    pub mode: BuildMode,

    #[serde(default)]
    pub design_space: DesignSpace,

    #[serde(default)]
    pub baselines_path: Option<PathBuf>,

    #[serde(default)]
    pub evaluator: Option<EvaluatorCommand>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl RunConfig {
    pub fn new(run_name: impl Into<String>, strategy: &str, budget: usize, seed: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_name: run_name.into(),
            seed,
            budget,
            strategy: strategy.to_string(),
            optimizer_params: OptimizerParams::default(),
            objective: None,
            checkpoint_interval: default_checkpoint_interval(),
            log_interval: default_log_interval(),
            parallelism: None,
            output_dir: default_output_dir(),
            mode: default_mode(),
            design_space: DesignSpace::default(),
            baselines_path: None,
            evaluator: None,
            created_at: Utc::now(),
        }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> FdmResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| config_error!("Cannot read run config {}: {}", path.display(), e))?;
        serde_json::from_str(&raw).map_err(|e| config_error!("Invalid run config {}: {}", path.display(), e))
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_log_interval(mut self, interval: usize) -> Self {
        self.log_interval = interval;
        self
    }

    pub fn with_objective(mut self, objective: Aggregation) -> Self {
        self.objective = Some(objective);
        self
    }

    pub fn with_optimizer_params(mut self, params: OptimizerParams) -> Self {
        self.optimizer_params = params;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_design_space(mut self, design_space: DesignSpace) -> Self {
        self.design_space = design_space;
        self
    }

    pub fn with_baselines_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.baselines_path = Some(path.into());
        self
    }

    pub fn with_evaluator(mut self, evaluator: EvaluatorCommand) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn effective_parallelism(&self) -> usize {
        self.parallelism.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn validate(&self) -> FdmResult<()> {
        if self.run_name.is_empty() {
            return Err(config_error!("Run name must not be empty"));
        }
        let parallelism = self.effective_parallelism();
        if parallelism == 0 {
            return Err(config_error!("Parallelism must be at least 1"));
        }
        if self.budget < parallelism {
            return Err(config_error!(
                "Budget {} is smaller than parallelism {}",
                self.budget,
                parallelism
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(config_error!("Checkpoint interval must be at least 1"));
        }
        if self.log_interval == 0 {
            return Err(config_error!("Log interval must be at least 1"));
        }
        Ok(())
    }

    pub fn aggregation(&self) -> Aggregation {
        self.objective.unwrap_or_else(|| Aggregation {
            direction: self.mode.default_direction(),
            ..Aggregation::default()
        })
    }

    pub fn run_key(&self) -> RunKey {
        RunKey::new(&self.run_name, &self.strategy, self.budget)
    }

    /// Full rounds only; a budget remainder smaller than one round is not run.
    pub fn total_rounds(&self) -> usize {
        self.budget / self.effective_parallelism()
    }

    pub fn build_space(&self, baselines: &dyn BaselineProvider) -> FdmResult<ParameterSpace> {
        self.mode.build(&self.design_space, baselines)
    }
}
