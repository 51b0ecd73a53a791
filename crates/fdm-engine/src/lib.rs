//! # fdm-engine
//!
//! Parallel ask/tell run controller for vehicle design optimization.
//!
//! A run proposes `parallelism` candidates per round, evaluates them on a
//! fixed worker pool, reports every result back to the optimizer in worker
//! order and checkpoints periodically so it can be resumed after a crash.

pub mod config;
pub mod controller;
pub mod observer;
pub mod pool;
pub mod status;
pub mod task;

pub use config::*;
pub use controller::*;
pub use observer::*;
pub use pool::*;
pub use status::*;
pub use task::*;

use fdm_store::{BaselineCatalog, CheckpointStore};
use fdm_types::{config_error, BaselineProvider, FdmResult};

/// Run `config` against its external evaluator command.
///
/// Baselines and the parameter space are validated before any optimizer is
/// created. With `resume` set, the run continues from its checkpoint, or
/// starts fresh when it has none. A checkpoint built over a different
/// parameter space is refused.
pub async fn drive(config: RunConfig, resume: bool) -> FdmResult<RunStatus> {
    config.validate()?;

    let catalog = match &config.baselines_path {
        Some(path) => BaselineCatalog::from_json_file(path)?,
        None => BaselineCatalog::new(),
    };
    catalog.validate(&config.mode.required_baselines())?;
    let space = config.build_space(&catalog)?;

    let command = config
        .evaluator
        .clone()
        .ok_or_else(|| config_error!("Run {} has no evaluator command", config.run_name))?;
    let parallelism = config.effective_parallelism();
    let make_pool = || {
        WorkerPool::from_factory(parallelism, |_| {
            Box::new(CommandEvaluator::new(command.clone())) as Box<dyn Evaluator>
        })
    };

    let store = CheckpointStore::new(&config.output_dir)?;
    tracing::info!(
        run = %config.run_key(),
        parameters = space.len(),
        dimension = space.dimension(),
        output_dir = %store.root.display(),
        "Parameter space ready"
    );

    let mut controller = if resume {
        match RunController::resume(&config, make_pool(), store.clone()) {
            Ok(controller) if controller.optimizer().space() != &space => {
                return Err(config_error!(
                    "Run {} was checkpointed with a different parameter space than mode and design_space now build",
                    config.run_key()
                ));
            }
            Ok(controller) => controller,
            Err(e) if e.is_not_found() => {
                tracing::warn!(run = %config.run_key(), "No checkpoint to resume, starting fresh");
                RunController::new(&config, space, make_pool(), store)?
            }
            Err(e) => return Err(e),
        }
    } else {
        RunController::new(&config, space, make_pool(), store)?
    };

    controller.add_observer(Box::new(LoggingObserver::new(config.log_interval)));
    controller.run().await
}
