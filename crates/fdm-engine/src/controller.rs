//! Round-based evaluation loop.

use chrono::Utc;

use fdm_optimizer::{OptimizerHandle, ParameterSpace};
use fdm_store::CheckpointStore;
use fdm_types::{
    config_error, Aggregation, CheckpointError, FdmError, FdmResult, HistoryEntry, RunHistory, RunKey,
};

use crate::config::{RunConfig, RunId};
use crate::observer::{RoundObserver, RoundSummary};
use crate::pool::WorkerPool;
use crate::status::{RunState, RunStatus};
use crate::task::EvaluationTask;

/// Drives one run: proposes a full round of candidates, evaluates them on the
/// pool, reports every result, appends the round to the history and
/// checkpoints every `checkpoint_interval` rounds.
///
/// The controller is the only writer of the history and the only caller of
/// `propose`/`report`. A failed round leaves both untouched and ends the run.
pub struct RunController {
    run_id: RunId,
    key: RunKey,
    aggregation: Aggregation,
    parallelism: usize,
    checkpoint_interval: usize,
    total_rounds: usize,
    optimizer: OptimizerHandle,
    history: RunHistory,
    pool: WorkerPool,
    store: CheckpointStore,
    status: RunStatus,
    observers: Vec<Box<dyn RoundObserver>>,
}

impl RunController {
    /// Start a fresh run over `space`.
    pub fn new(
        config: &RunConfig,
        space: ParameterSpace,
        pool: WorkerPool,
        store: CheckpointStore,
    ) -> FdmResult<Self> {
        config.validate()?;
        let parallelism = check_pool(config, &pool)?;
        let optimizer = OptimizerHandle::create(
            &config.strategy,
            space,
            config.budget,
            parallelism,
            &config.optimizer_params,
            config.seed,
        )?;

        tracing::info!(
            run = %config.run_key(),
            strategy = %config.strategy,
            budget = config.budget,
            parallelism,
            seed = config.seed,
            "Starting new run"
        );

        // An empty record marks the run as started; an existing one is left alone.
        let key = config.run_key();
        if !store.exists(&key) {
            store.save(&key, &RunHistory::new(), &optimizer.serialize()?)?;
        }

        Ok(Self::assemble(config, parallelism, optimizer, RunHistory::new(), pool, store))
    }

    /// Continue a run from its last checkpoint.
    ///
    /// Fails with a not-found checkpoint error when the run was never
    /// checkpointed; callers may start fresh in that case.
    pub fn resume(config: &RunConfig, pool: WorkerPool, store: CheckpointStore) -> FdmResult<Self> {
        config.validate()?;
        let parallelism = check_pool(config, &pool)?;
        let key = config.run_key();

        let checkpoint = store.load(&key)?;
        let optimizer = OptimizerHandle::deserialize(&checkpoint.state)?;
        if optimizer.parallelism() != parallelism {
            return Err(config_error!(
                "Run {} was checkpointed with parallelism {}, configured {}",
                key,
                optimizer.parallelism(),
                parallelism
            ));
        }
        if optimizer.seed() != config.seed {
            return Err(config_error!(
                "Run {} was checkpointed with seed {}, configured {}",
                key,
                optimizer.seed(),
                config.seed
            ));
        }

        let evaluations = checkpoint.history.len();
        if evaluations % parallelism != 0 || optimizer.num_tell() != evaluations as u64 || optimizer.num_pending() != 0 {
            return Err(CheckpointError::Corruption {
                message: format!(
                    "{} holds {} evaluations and {} optimizer reports, not a whole number of rounds of {}",
                    key,
                    evaluations,
                    optimizer.num_tell(),
                    parallelism
                ),
            }
            .into());
        }

        tracing::info!(
            run = %key,
            evaluations,
            saved_at = %checkpoint.saved_at,
            "Resuming run"
        );

        let mut controller = Self::assemble(config, parallelism, optimizer, checkpoint.history, pool, store);
        controller.status.rounds_completed = evaluations / parallelism;
        controller.status.evaluations = evaluations;
        controller.status.best = controller.history.best(controller.aggregation.direction);
        controller.status.last_checkpoint_at = Some(checkpoint.saved_at);
        Ok(controller)
    }

    fn assemble(
        config: &RunConfig,
        parallelism: usize,
        optimizer: OptimizerHandle,
        history: RunHistory,
        pool: WorkerPool,
        store: CheckpointStore,
    ) -> Self {
        let total_rounds = config.budget / parallelism;
        Self {
            run_id: config.id,
            key: config.run_key(),
            aggregation: config.aggregation(),
            parallelism,
            checkpoint_interval: config.checkpoint_interval,
            total_rounds,
            optimizer,
            history,
            pool,
            store,
            status: RunStatus::new(config.id, total_rounds),
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn RoundObserver>) {
        self.observers.push(observer);
    }

    pub fn with_observer(mut self, observer: Box<dyn RoundObserver>) -> Self {
        self.add_observer(observer);
        self
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    pub fn optimizer(&self) -> &OptimizerHandle {
        &self.optimizer
    }

    pub fn run_key(&self) -> &RunKey {
        &self.key
    }

    pub fn rounds_remaining(&self) -> usize {
        self.total_rounds.saturating_sub(self.status.rounds_completed)
    }

    /// Run every remaining round, then write the final checkpoint.
    pub async fn run(&mut self) -> FdmResult<RunStatus> {
        let remaining = self.rounds_remaining();
        self.run_rounds(remaining).await?;

        if let Err(e) = self.checkpoint() {
            return Err(self.fail(e));
        }
        self.status.mark_completed()?;

        tracing::info!(
            run = %self.key,
            evaluations = self.history.len(),
            best = ?self.status.best,
            "Run completed"
        );
        Ok(self.status.clone())
    }

    /// Run up to `rounds` more rounds.
    pub async fn run_rounds(&mut self, rounds: usize) -> FdmResult<()> {
        self.start()?;
        for _ in 0..rounds.min(self.rounds_remaining()) {
            if let Err(e) = self.run_round().await {
                return Err(self.fail(e));
            }
        }
        Ok(())
    }

    /// Persist the current history and optimizer state.
    pub fn checkpoint(&mut self) -> FdmResult<()> {
        self.start()?;
        self.status.mark_checkpointing()?;
        let state = self.optimizer.serialize()?;
        self.store.save(&self.key, &self.history, &state)?;
        self.status.mark_checkpointed(Utc::now())
    }

    fn start(&mut self) -> FdmResult<()> {
        match self.status.state {
            RunState::Initializing => self.status.mark_running(),
            RunState::Running => Ok(()),
            state => Err(config_error!("Run {} is {:?} and cannot continue", self.key, state)),
        }
    }

    fn fail(&mut self, error: FdmError) -> FdmError {
        tracing::error!(
            run = %self.key,
            round = self.status.rounds_completed,
            evaluations = self.history.len(),
            "Run failed: {}",
            error
        );
        self.status.mark_failed(error.to_string());
        error
    }

    async fn run_round(&mut self) -> FdmResult<()> {
        let round = self.status.rounds_completed;
        let first_eval_id = self.history.len() as u64;

        let mut candidates = Vec::with_capacity(self.parallelism);
        for offset in 0..self.parallelism {
            let mut candidate = self.optimizer.propose();
            candidate.assign_eval_id(first_eval_id + offset as u64);
            candidates.push(candidate);
        }

        for (worker, candidate) in candidates.iter().enumerate() {
            let eval_id = first_eval_id + worker as u64;
            self.pool
                .submit(worker, EvaluationTask::new(self.run_id, eval_id, worker, candidate))?;
        }

        // Worker order, not completion order.
        let mut results = Vec::with_capacity(self.parallelism);
        for worker in 0..self.parallelism {
            results.push(self.pool.collect(worker).await?);
        }

        // Every loss is checked before the first report so a bad result
        // cannot leave the optimizer ahead of the history.
        let losses: Vec<f64> = results.iter().map(|f| self.aggregation.loss(f)).collect();
        if let Some(worker_index) = losses.iter().position(|loss| !loss.is_finite()) {
            return Err(FdmError::WorkerFailure {
                worker_index,
                cause: format!(
                    "loss {} for eval_id {} is not finite",
                    losses[worker_index],
                    first_eval_id + worker_index as u64
                ),
            });
        }
        for (candidate, loss) in candidates.iter().zip(&losses) {
            self.optimizer.report(candidate, *loss)?;
        }

        let scores = results.iter().map(|f| f.total()).collect();
        for (offset, (candidate, fitness)) in candidates.iter().zip(results).enumerate() {
            self.history.push(HistoryEntry {
                eval_id: first_eval_id + offset as u64,
                vector: candidate.flatten(),
                fitness,
            })?;
        }

        let best = self.history.best(self.aggregation.direction);
        self.status.record_round(self.history.len(), best);
        tracing::debug!(run = %self.key, round, evaluations = self.history.len(), "Round complete");

        let checkpointed = round % self.checkpoint_interval == 0;
        if checkpointed {
            self.checkpoint()?;
        }

        let summary = RoundSummary {
            run: self.key.clone(),
            round,
            total_rounds: self.total_rounds,
            first_eval_id,
            losses,
            scores,
            direction: self.aggregation.direction,
            best,
            checkpointed,
        };
        for observer in &mut self.observers {
            observer.on_round(&summary);
        }
        Ok(())
    }
}

fn check_pool(config: &RunConfig, pool: &WorkerPool) -> FdmResult<usize> {
    let parallelism = config.effective_parallelism();
    if pool.size() != parallelism {
        return Err(config_error!(
            "Worker pool has {} workers but parallelism is {}",
            pool.size(),
            parallelism
        ));
    }
    Ok(parallelism)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ChannelObserver;
    use crate::pool::Evaluator;
    use crossbeam_channel::unbounded;
    use fdm_types::{FitnessVector, ObjectiveDirection};
    use tempfile::TempDir;

    /// Sum of every numeric parameter, eval_id excluded.
    fn sphere(task: &EvaluationTask) -> FdmResult<FitnessVector> {
        let mut total = 0.0;
        for (name, value) in &task.parameters {
            if name == "eval_id" {
                continue;
            }
            if let Some(x) = value.as_f64() {
                total += (x - 0.3) * (x - 0.3);
            } else if let Some(items) = value.as_array() {
                total += items.iter().filter_map(|v| v.as_f64()).map(|x| x * x).sum::<f64>();
            }
        }
        FitnessVector::new(vec![total, 1.0])
    }

    fn sphere_pool(size: usize) -> WorkerPool {
        WorkerPool::from_factory(size, |_| Box::new(sphere) as Box<dyn Evaluator>)
    }

    fn small_space() -> ParameterSpace {
        ParameterSpace::new()
            .add_choice("battery0", 3)
            .add_choice("motor0", 3)
            .add_scalar("arm_length0", 0.0, 1.0)
    }

    fn config(budget: usize, parallelism: usize, dir: &TempDir) -> RunConfig {
        RunConfig::new("quad", "EvolutionaryDefault", budget, 42)
            .with_parallelism(parallelism)
            .with_objective(Aggregation::minimize())
            .with_output_dir(dir.path())
    }

    #[tokio::test]
    async fn test_end_to_end_two_rounds() {
        let dir = TempDir::new().unwrap();
        let config = config(8, 4, &dir);
        let store = CheckpointStore::new(dir.path()).unwrap();

        let mut controller = RunController::new(&config, small_space(), sphere_pool(4), store.clone()).unwrap();
        let status = controller.run().await.unwrap();

        assert_eq!(status.state, RunState::Completed);
        assert_eq!(status.rounds_completed, 2);
        assert_eq!(controller.history().len(), 8);
        let ids: Vec<u64> = controller.history().entries().iter().map(|e| e.eval_id).collect();
        assert_eq!(ids, (0..8).collect::<Vec<u64>>());
        assert!(controller.history().vectors().all(|v| v.len() == 3));

        let key = config.run_key();
        assert!(store.history_path(&key).exists());
        assert!(store.optimizer_path(&key).exists());

        let checkpoint = store.load(&key).unwrap();
        assert_eq!(&checkpoint.history, controller.history());
        let mut restored = OptimizerHandle::deserialize(&checkpoint.state).unwrap();
        let mut live = controller.optimizer().clone();
        for _ in 0..6 {
            assert_eq!(restored.propose(), live.propose());
        }
    }

    #[tokio::test]
    async fn test_resume_matches_uninterrupted_run() {
        let full_dir = TempDir::new().unwrap();
        let mut full = RunController::new(
            &config(12, 2, &full_dir),
            small_space(),
            sphere_pool(2),
            CheckpointStore::new(full_dir.path()).unwrap(),
        )
        .unwrap();
        full.run().await.unwrap();

        let dir = TempDir::new().unwrap();
        let config = config(12, 2, &dir);
        let store = CheckpointStore::new(dir.path()).unwrap();
        {
            let mut first = RunController::new(&config, small_space(), sphere_pool(2), store.clone()).unwrap();
            first.run_rounds(3).await.unwrap();
            first.checkpoint().unwrap();
        }

        let mut resumed = RunController::resume(&config, sphere_pool(2), store).unwrap();
        assert_eq!(resumed.status().rounds_completed, 3);
        assert_eq!(resumed.rounds_remaining(), 3);
        resumed.run().await.unwrap();

        assert_eq!(resumed.history(), full.history());
        assert_eq!(
            resumed.optimizer().serialize().unwrap(),
            full.optimizer().serialize().unwrap()
        );
    }

    #[tokio::test]
    async fn test_resume_without_checkpoint_is_not_found() {
        let dir = TempDir::new().unwrap();
        let config = config(8, 2, &dir);
        let store = CheckpointStore::new(dir.path()).unwrap();
        let err = RunController::resume(&config, sphere_pool(2), store).err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_worker_failure_discards_partial_round() {
        let dir = TempDir::new().unwrap();
        let config = config(8, 2, &dir).with_checkpoint_interval(1);
        let store = CheckpointStore::new(dir.path()).unwrap();

        let flaky = |task: &EvaluationTask| -> FdmResult<FitnessVector> {
            if task.eval_id == 5 {
                return Err(FdmError::Evaluation("simulator crashed".to_string()));
            }
            sphere(task)
        };
        let pool = WorkerPool::from_factory(2, |_| Box::new(flaky) as Box<dyn Evaluator>);
        let mut controller = RunController::new(&config, small_space(), pool, store.clone()).unwrap();

        match controller.run().await {
            Err(FdmError::WorkerFailure { worker_index, cause }) => {
                assert_eq!(worker_index, 1);
                assert!(cause.contains("simulator crashed"));
            }
            other => panic!("expected worker failure, got {other:?}"),
        }

        assert_eq!(controller.status().state, RunState::Failed);
        assert!(controller.status().error.is_some());
        assert_eq!(controller.history().len(), 4);
        assert_eq!(controller.optimizer().num_tell(), 4);

        let checkpoint = store.load(&config.run_key()).unwrap();
        assert_eq!(checkpoint.history.len(), 4);

        // A failed run cannot be driven further.
        assert!(controller.run_rounds(1).await.is_err());
    }

    #[tokio::test]
    async fn test_overflowing_result_fails_whole_round() {
        // Round 1 holds eval_ids 2 and 3; worker 1 gets eval_id 3.
        for (objective, result, cause) in [
            (Aggregation::minimize(), vec![1e308, 1e308], "overflows"),
            (Aggregation::maximize(1e308), vec![-1e308], "not finite"),
        ] {
            let dir = TempDir::new().unwrap();
            let config = config(4, 2, &dir).with_objective(objective);
            let store = CheckpointStore::new(dir.path()).unwrap();

            let extreme = move |task: &EvaluationTask| -> FdmResult<FitnessVector> {
                if task.eval_id == 3 {
                    return FitnessVector::new(result.clone());
                }
                FitnessVector::new(vec![1.0, 2.0])
            };
            let pool = WorkerPool::from_factory(2, |_| Box::new(extreme.clone()) as Box<dyn Evaluator>);
            let mut controller = RunController::new(&config, small_space(), pool, store.clone()).unwrap();

            match controller.run().await {
                Err(FdmError::WorkerFailure { worker_index, cause: message }) => {
                    assert_eq!(worker_index, 1);
                    assert!(message.contains(cause), "unexpected cause: {message}");
                }
                other => panic!("expected worker failure, got {other:?}"),
            }

            assert_eq!(controller.status().state, RunState::Failed);
            assert_eq!(controller.history().len(), 2);
            assert_eq!(controller.optimizer().num_tell(), controller.history().len() as u64);

            let checkpoint = store.load(&config.run_key()).unwrap();
            assert_eq!(checkpoint.history.len(), 2);
            let restored = OptimizerHandle::deserialize(&checkpoint.state).unwrap();
            assert_eq!(restored.num_tell(), 2);
            assert_eq!(restored.num_pending(), 0);
        }
    }

    #[tokio::test]
    async fn test_new_run_writes_empty_checkpoint() {
        let dir = TempDir::new().unwrap();
        let config = config(4, 2, &dir);
        let store = CheckpointStore::new(dir.path()).unwrap();
        let key = config.run_key();

        let fresh = RunController::new(&config, small_space(), sphere_pool(2), store.clone()).unwrap();
        assert!(store.exists(&key));
        let checkpoint = store.load(&key).unwrap();
        assert!(checkpoint.history.is_empty());
        assert_eq!(
            OptimizerHandle::deserialize(&checkpoint.state).unwrap().serialize().unwrap(),
            fresh.optimizer().serialize().unwrap()
        );
        drop(fresh);

        let mut resumed = RunController::resume(&config, sphere_pool(2), store.clone()).unwrap();
        assert_eq!(resumed.status().rounds_completed, 0);
        assert_eq!(resumed.rounds_remaining(), 2);
        let status = resumed.run().await.unwrap();
        assert_eq!(status.state, RunState::Completed);
        assert_eq!(resumed.history().len(), 4);
    }

    #[tokio::test]
    async fn test_new_run_keeps_existing_checkpoint() {
        let dir = TempDir::new().unwrap();
        let config = config(4, 2, &dir);
        let store = CheckpointStore::new(dir.path()).unwrap();
        let key = config.run_key();

        let mut first = RunController::new(&config, small_space(), sphere_pool(2), store.clone()).unwrap();
        first.run_rounds(1).await.unwrap();
        first.checkpoint().unwrap();

        RunController::new(&config, small_space(), sphere_pool(2), store.clone()).unwrap();
        assert_eq!(store.load(&key).unwrap().history.len(), 2);
    }

    #[tokio::test]
    async fn test_reported_losses_follow_aggregation() {
        let fixed = |task: &EvaluationTask| -> FdmResult<FitnessVector> {
            if task.worker_index == 0 {
                FitnessVector::new(vec![1.0, 2.0])
            } else {
                FitnessVector::new(vec![3.0, 4.0])
            }
        };

        for (objective, expected) in [
            (Aggregation::maximize(10.0), vec![7.0, 3.0]),
            (Aggregation::minimize(), vec![3.0, 7.0]),
        ] {
            let dir = TempDir::new().unwrap();
            let config = config(2, 2, &dir).with_objective(objective);
            let (tx, rx) = unbounded();
            let pool = WorkerPool::from_factory(2, |_| Box::new(fixed) as Box<dyn Evaluator>);
            let mut controller = RunController::new(&config, small_space(), pool, CheckpointStore::new(dir.path()).unwrap())
                .unwrap()
                .with_observer(Box::new(ChannelObserver::new(tx)));
            controller.run().await.unwrap();

            let summary = rx.try_recv().unwrap();
            assert_eq!(summary.losses, expected);
            assert_eq!(summary.scores, vec![3.0, 7.0]);
            let best = summary.best.unwrap();
            match objective.direction {
                ObjectiveDirection::Maximize => assert_eq!(best.eval_id, 1),
                ObjectiveDirection::Minimize => assert_eq!(best.eval_id, 0),
            }
        }
    }

    #[tokio::test]
    async fn test_observers_see_every_round() {
        let dir = TempDir::new().unwrap();
        let config = config(10, 4, &dir).with_checkpoint_interval(2);
        let (tx, rx) = unbounded();
        let mut controller =
            RunController::new(&config, small_space(), sphere_pool(4), CheckpointStore::new(dir.path()).unwrap())
                .unwrap();
        controller.add_observer(Box::new(ChannelObserver::new(tx)));
        controller.run().await.unwrap();

        let summaries: Vec<RoundSummary> = rx.try_iter().collect();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].first_eval_id, 0);
        assert_eq!(summaries[1].first_eval_id, 4);
        assert!(summaries[0].checkpointed);
        assert!(!summaries[1].checkpointed);
        assert!(summaries[1].is_last());
        assert_eq!(controller.history().len(), 8);
    }

    #[test]
    fn test_pool_size_must_match_parallelism() {
        let dir = TempDir::new().unwrap();
        let config = config(8, 4, &dir);
        let store = CheckpointStore::new(dir.path()).unwrap();
        let result = RunController::new(&config, small_space(), sphere_pool(3), store);
        assert!(matches!(result, Err(FdmError::Config(_))));
    }

    #[test]
    fn test_unknown_strategy_fails_before_running() {
        let dir = TempDir::new().unwrap();
        let mut config = config(8, 4, &dir);
        config.strategy = "Simplex".to_string();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let result = RunController::new(&config, small_space(), sphere_pool(4), store);
        assert!(matches!(result, Err(FdmError::Optimizer(_))));
    }
}
