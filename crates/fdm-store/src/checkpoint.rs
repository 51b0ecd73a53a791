use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fdm_types::{CheckpointError, FdmResult, OptimizerState, RunHistory, RunKey};

use crate::archive::HistoryArchive;

const HISTORY_DIR: &str = "histories";
const OPTIMIZER_DIR: &str = "optimizers";

/// Optimizer blob as written to disk.
///
/// `evaluations` is the history length the optimizer state corresponds to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerCheckpoint {
    pub run: RunKey,
    pub evaluations: usize,
    pub saved_at: DateTime<Utc>,
    pub state: OptimizerState,
}

/// A loaded checkpoint pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub history: RunHistory,
    pub state: OptimizerState,
    pub saved_at: DateTime<Utc>,
}

/// Checkpoint store rooted at a fixed output directory.
///
/// Layout:
/// ```text
/// <root>/histories/<run>_<strategy>_budget<N>.parquet
/// <root>/optimizers/<run>_<strategy>_budget<N>_optim.json
/// ```
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    pub root: PathBuf,
    archive_dir: PathBuf,
    optimizer_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(root: P) -> FdmResult<Self> {
        let root = root.as_ref().to_path_buf();
        let archive_dir = root.join(HISTORY_DIR);
        let optimizer_dir = root.join(OPTIMIZER_DIR);
        fs::create_dir_all(&archive_dir)?;
        fs::create_dir_all(&optimizer_dir)?;

        Ok(Self {
            root,
            archive_dir,
            optimizer_dir,
        })
    }

    /// Path of the history archive for a run
    pub fn history_path(&self, key: &RunKey) -> PathBuf {
        self.archive_dir.join(format!("{}.parquet", key.file_stem()))
    }

    /// Path of the optimizer blob for a run
    pub fn optimizer_path(&self, key: &RunKey) -> PathBuf {
        self.optimizer_dir.join(format!("{}_optim.json", key.file_stem()))
    }

    pub fn exists(&self, key: &RunKey) -> bool {
        self.history_path(key).exists() && self.optimizer_path(key).exists()
    }

    /// Overwrite the checkpoint for `key`.
    ///
    /// Each file is written to a temporary sibling and renamed into place.
    /// The history goes first, so a crash between the two renames leaves a
    /// history that is at most ahead of the optimizer blob, never behind it.
    pub fn save(&self, key: &RunKey, history: &RunHistory, state: &OptimizerState) -> FdmResult<()> {
        let history_path = self.history_path(key);
        let optimizer_path = self.optimizer_path(key);

        let history_tmp = temp_sibling(&history_path);
        HistoryArchive::new().write(&history_tmp, history)?;
        sync_file(&history_tmp)?;

        let blob = OptimizerCheckpoint {
            run: key.clone(),
            evaluations: history.len(),
            saved_at: Utc::now(),
            state: state.clone(),
        };
        let optimizer_tmp = temp_sibling(&optimizer_path);
        {
            let mut file = fs::File::create(&optimizer_tmp)?;
            file.write_all(&serde_json::to_vec_pretty(&blob)?)?;
            file.sync_all()?;
        }

        fs::rename(&history_tmp, &history_path)?;
        fs::rename(&optimizer_tmp, &optimizer_path)?;

        tracing::debug!(run = %key, evaluations = history.len(), "Checkpoint saved");
        Ok(())
    }

    /// Load the checkpoint for `key`.
    pub fn load(&self, key: &RunKey) -> FdmResult<Checkpoint> {
        let history_path = self.history_path(key);
        let optimizer_path = self.optimizer_path(key);

        if !history_path.exists() || !optimizer_path.exists() {
            return Err(CheckpointError::NotFound { key: key.to_string() }.into());
        }

        let blob: OptimizerCheckpoint = serde_json::from_slice(&fs::read(&optimizer_path)?)?;
        if &blob.run != key {
            return Err(CheckpointError::KeyMismatch {
                expected: key.to_string(),
                found: blob.run.to_string(),
            }
            .into());
        }

        let mut history = HistoryArchive::new().read(&history_path)?;
        if history.len() < blob.evaluations {
            return Err(CheckpointError::Corruption {
                message: format!(
                    "history for {} has {} rows but optimizer state covers {}",
                    key,
                    history.len(),
                    blob.evaluations
                ),
            }
            .into());
        }
        if history.len() > blob.evaluations {
            tracing::warn!(
                run = %key,
                rows = history.len(),
                evaluations = blob.evaluations,
                "History is ahead of optimizer state, truncating to the last consistent checkpoint"
            );
            history.truncate(blob.evaluations);
        }

        tracing::info!(run = %key, evaluations = history.len(), saved_at = %blob.saved_at, "Checkpoint loaded");

        Ok(Checkpoint {
            history,
            state: blob.state,
            saved_at: blob.saved_at,
        })
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn sync_file(path: &Path) -> FdmResult<()> {
    fs::File::open(path)?.sync_all()?;
    Ok(())
}
