//! Fixed-size evaluation worker pool.

use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};

use tokio::task::JoinHandle;

use fdm_types::{FdmError, FdmResult, FitnessVector};

use crate::task::{EvaluationTask, EvaluatorCommand};

/// Computes the fitness of one candidate.
///
/// An evaluator lives inside its worker for the whole run, so it may cache
/// expensive setup between calls.
pub trait Evaluator: Send + 'static {
    fn evaluate(&mut self, task: &EvaluationTask) -> FdmResult<FitnessVector>;
}

impl<F> Evaluator for F
where
    F: FnMut(&EvaluationTask) -> FdmResult<FitnessVector> + Send + 'static,
{
    fn evaluate(&mut self, task: &EvaluationTask) -> FdmResult<FitnessVector> {
        self(task)
    }
}

/// Runs an external simulator per task: the task JSON goes to stdin and a
/// JSON array of numbers is read back from stdout.
#[derive(Debug, Clone)]
pub struct CommandEvaluator {
    command: EvaluatorCommand,
}

impl CommandEvaluator {
    pub fn new(command: EvaluatorCommand) -> Self {
        Self { command }
    }
}

impl Evaluator for CommandEvaluator {
    fn evaluate(&mut self, task: &EvaluationTask) -> FdmResult<FitnessVector> {
        let program = &self.command.program;
        let payload = serde_json::to_vec(task)?;

        let mut child = Command::new(program)
            .args(&self.command.args)
            .envs(&self.command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FdmError::Evaluation(format!("Failed to start {}: {}", program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&payload) {
                // The simulator may exit without reading its input.
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                other => other?,
            }
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(FdmError::Evaluation(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let components: Vec<f64> = serde_json::from_slice(&output.stdout).map_err(|e| {
            FdmError::Evaluation(format!("{} returned an unreadable fitness vector: {}", program, e))
        })?;
        FitnessVector::new(components)
    }
}

type Outcome = (Box<dyn Evaluator>, FdmResult<FitnessVector>);

enum Slot {
    Idle(Box<dyn Evaluator>),
    Busy(JoinHandle<Outcome>),
    /// The evaluator panicked and was dropped with its thread.
    Lost,
}

/// `parallelism` workers, each holding at most one outstanding submission.
///
/// Evaluations run on tokio's blocking pool. Every failure inside a worker,
/// including a panic, surfaces from [`WorkerPool::collect`] as
/// [`FdmError::WorkerFailure`] with that worker's index.
pub struct WorkerPool {
    slots: Vec<Slot>,
}

impl WorkerPool {
    pub fn new(evaluators: Vec<Box<dyn Evaluator>>) -> Self {
        Self {
            slots: evaluators.into_iter().map(Slot::Idle).collect(),
        }
    }

    pub fn from_factory<F>(size: usize, mut factory: F) -> Self
    where
        F: FnMut(usize) -> Box<dyn Evaluator>,
    {
        Self::new((0..size).map(&mut factory).collect())
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Start evaluating `task` on `worker`. Returns immediately.
    pub fn submit(&mut self, worker: usize, task: EvaluationTask) -> FdmResult<()> {
        let slot = self.slot_mut(worker)?;
        match std::mem::replace(slot, Slot::Lost) {
            Slot::Idle(mut evaluator) => {
                tracing::debug!(worker, eval_id = task.eval_id, "Submitting evaluation");
                *slot = Slot::Busy(tokio::task::spawn_blocking(move || {
                    let result = evaluator.evaluate(&task);
                    (evaluator, result)
                }));
                Ok(())
            }
            Slot::Busy(handle) => {
                *slot = Slot::Busy(handle);
                Err(failure(worker, "worker already has an outstanding submission"))
            }
            Slot::Lost => Err(failure(worker, "worker was lost to an earlier panic")),
        }
    }

    /// Wait for `worker`'s outstanding submission.
    pub async fn collect(&mut self, worker: usize) -> FdmResult<FitnessVector> {
        let slot = self.slot_mut(worker)?;
        let handle = match std::mem::replace(slot, Slot::Lost) {
            Slot::Busy(handle) => handle,
            Slot::Idle(evaluator) => {
                *slot = Slot::Idle(evaluator);
                return Err(failure(worker, "no outstanding submission to collect"));
            }
            Slot::Lost => return Err(failure(worker, "worker was lost to an earlier panic")),
        };

        match handle.await {
            Ok((evaluator, result)) => {
                *slot = Slot::Idle(evaluator);
                result.map_err(|e| failure(worker, e.to_string()))
            }
            Err(join_error) => {
                let cause = if join_error.is_panic() {
                    "evaluator panicked".to_string()
                } else {
                    join_error.to_string()
                };
                tracing::error!(worker, %cause, "Worker lost");
                Err(failure(worker, cause))
            }
        }
    }

    fn slot_mut(&mut self, worker: usize) -> FdmResult<&mut Slot> {
        let size = self.slots.len();
        self.slots
            .get_mut(worker)
            .ok_or_else(|| failure(worker, format!("no such worker in a pool of {}", size)))
    }
}

fn failure(worker_index: usize, cause: impl Into<String>) -> FdmError {
    FdmError::WorkerFailure {
        worker_index,
        cause: cause.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn task(eval_id: u64, worker_index: usize) -> EvaluationTask {
        let mut parameters = serde_json::Map::new();
        parameters.insert("eval_id".to_string(), eval_id.into());
        parameters.insert("x".to_string(), 2.5.into());
        EvaluationTask {
            run_id: Uuid::new_v4(),
            eval_id,
            worker_index,
            parameters,
        }
    }

    fn doubling(task: &EvaluationTask) -> FdmResult<FitnessVector> {
        FitnessVector::new(vec![task.number("x").unwrap_or(0.0) * 2.0, task.eval_id as f64])
    }

    #[tokio::test]
    async fn test_submit_then_collect_in_worker_order() {
        let mut pool = WorkerPool::from_factory(3, |_| Box::new(doubling) as Box<dyn Evaluator>);
        assert_eq!(pool.size(), 3);

        for worker in 0..3 {
            pool.submit(worker, task(10 + worker as u64, worker)).unwrap();
        }
        for worker in 0..3 {
            let fitness = pool.collect(worker).await.unwrap();
            assert_eq!(fitness.components(), &[5.0, 10.0 + worker as f64]);
        }

        // Workers are reusable after collection.
        pool.submit(0, task(20, 0)).unwrap();
        assert_eq!(pool.collect(0).await.unwrap().components(), &[5.0, 20.0]);
    }

    #[tokio::test]
    async fn test_evaluator_keeps_state_between_calls() {
        let mut calls = 0usize;
        let counting = move |_: &EvaluationTask| {
            calls += 1;
            FitnessVector::new(vec![calls as f64])
        };
        let mut pool = WorkerPool::new(vec![Box::new(counting) as Box<dyn Evaluator>]);

        for expected in 1..=3 {
            pool.submit(0, task(expected, 0)).unwrap();
            assert_eq!(pool.collect(0).await.unwrap().total(), expected as f64);
        }
    }

    #[tokio::test]
    async fn test_one_outstanding_submission_per_worker() {
        let mut pool = WorkerPool::from_factory(1, |_| Box::new(doubling) as Box<dyn Evaluator>);
        assert!(pool.collect(0).await.is_err());

        pool.submit(0, task(0, 0)).unwrap();
        let err = pool.submit(0, task(1, 0)).unwrap_err();
        assert!(matches!(err, FdmError::WorkerFailure { worker_index: 0, .. }));

        // The first submission is still collectable.
        assert!(pool.collect(0).await.is_ok());
        assert!(pool.submit(5, task(0, 5)).is_err());
    }

    #[tokio::test]
    async fn test_evaluator_error_becomes_worker_failure() {
        let failing = |_: &EvaluationTask| -> FdmResult<FitnessVector> {
            Err(FdmError::Evaluation("mesh did not converge".to_string()))
        };
        let mut pool = WorkerPool::new(vec![
            Box::new(doubling) as Box<dyn Evaluator>,
            Box::new(failing) as Box<dyn Evaluator>,
        ]);

        pool.submit(0, task(0, 0)).unwrap();
        pool.submit(1, task(1, 1)).unwrap();
        assert!(pool.collect(0).await.is_ok());
        match pool.collect(1).await {
            Err(FdmError::WorkerFailure { worker_index, cause }) => {
                assert_eq!(worker_index, 1);
                assert!(cause.contains("mesh did not converge"));
            }
            other => panic!("expected worker failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panicking_worker_is_lost() {
        let panicking = |_: &EvaluationTask| -> FdmResult<FitnessVector> { panic!("segfault in simulator") };
        let mut pool = WorkerPool::new(vec![Box::new(panicking) as Box<dyn Evaluator>]);

        pool.submit(0, task(0, 0)).unwrap();
        let err = pool.collect(0).await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
        assert!(pool.submit(0, task(1, 0)).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_evaluator_reads_stdout() {
        let command = EvaluatorCommand::new("sh").with_args(["-c", "cat > /dev/null; echo '[1.5, 2.5]'"]);
        let mut evaluator = CommandEvaluator::new(command);
        let fitness = evaluator.evaluate(&task(0, 0)).unwrap();
        assert_eq!(fitness.components(), &[1.5, 2.5]);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_evaluator_sees_task_on_stdin() {
        let command = EvaluatorCommand::new("sh").with_args(["-c", "grep -q '\"eval_id\":42' && echo '[1.0]'"]);
        let mut evaluator = CommandEvaluator::new(command);
        assert_eq!(evaluator.evaluate(&task(42, 0)).unwrap().total(), 1.0);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_evaluator_failures() {
        let mut exits = CommandEvaluator::new(EvaluatorCommand::new("sh").with_args(["-c", "exit 3"]));
        assert!(matches!(exits.evaluate(&task(0, 0)), Err(FdmError::Evaluation(_))));

        let mut garbage = CommandEvaluator::new(EvaluatorCommand::new("sh").with_args(["-c", "echo nope"]));
        assert!(garbage.evaluate(&task(0, 0)).is_err());

        let mut empty = CommandEvaluator::new(EvaluatorCommand::new("sh").with_args(["-c", "echo '[]'"]));
        assert!(empty.evaluate(&task(0, 0)).is_err());

        let mut missing = CommandEvaluator::new(EvaluatorCommand::new("/nonexistent/simulator"));
        assert!(missing.evaluate(&task(0, 0)).is_err());
    }
}
