//! Per-round observers.

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use fdm_types::{BestEvaluation, ObjectiveDirection, RunKey};

/// What happened in one completed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub run: RunKey,
    /// Zero-based round index.
    pub round: usize,
    pub total_rounds: usize,
    pub first_eval_id: u64,
    /// Scalars reported to the optimizer, in worker order.
    pub losses: Vec<f64>,
    /// Raw fitness totals, in worker order.
    pub scores: Vec<f64>,
    pub direction: ObjectiveDirection,
    /// Best aggregate score over the entire history so far.
    pub best: Option<BestEvaluation>,
    pub checkpointed: bool,
}

impl RoundSummary {
    pub fn is_last(&self) -> bool {
        self.round + 1 >= self.total_rounds
    }
}

/// Called by the controller after every round, once the round is committed.
pub trait RoundObserver: Send {
    fn on_round(&mut self, summary: &RoundSummary);
}

/// Logs the running best every `interval` rounds and after the last one.
#[derive(Debug, Clone)]
pub struct LoggingObserver {
    interval: usize,
}

impl LoggingObserver {
    pub fn new(interval: usize) -> Self {
        Self {
            interval: interval.max(1),
        }
    }
}

impl RoundObserver for LoggingObserver {
    fn on_round(&mut self, summary: &RoundSummary) {
        if summary.round % self.interval != 0 && !summary.is_last() {
            return;
        }
        let Some(best) = summary.best else {
            return;
        };
        let label = match summary.direction {
            ObjectiveDirection::Maximize => "High score",
            ObjectiveDirection::Minimize => "Lowest trim score",
        };
        tracing::info!(
            run = %summary.run,
            round = summary.round + 1,
            total_rounds = summary.total_rounds,
            eval_id = best.eval_id,
            score = best.score,
            "{}: {} at evaluation {}",
            label,
            best.score,
            best.eval_id
        );
    }
}

/// Forwards every summary to a channel. A full or disconnected channel drops
/// the summary; the run never blocks on a listener.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: Sender<RoundSummary>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<RoundSummary>) -> Self {
        Self { tx }
    }
}

impl RoundObserver for ChannelObserver {
    fn on_round(&mut self, summary: &RoundSummary) {
        let _ = self.tx.try_send(summary.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};

    fn summary(round: usize) -> RoundSummary {
        RoundSummary {
            run: RunKey::new("quad", "DE", 8),
            round,
            total_rounds: 2,
            first_eval_id: round as u64 * 4,
            losses: vec![1.0; 4],
            scores: vec![2.0; 4],
            direction: ObjectiveDirection::Maximize,
            best: Some(BestEvaluation { eval_id: 1, score: 2.0 }),
            checkpointed: round == 0,
        }
    }

    #[test]
    fn test_channel_observer_forwards() {
        let (tx, rx) = unbounded();
        let mut observer = ChannelObserver::new(tx);
        observer.on_round(&summary(0));
        observer.on_round(&summary(1));

        let received: Vec<RoundSummary> = rx.try_iter().collect();
        assert_eq!(received.len(), 2);
        assert!(received[1].is_last());
        assert_eq!(received[1].first_eval_id, 4);
    }

    #[test]
    fn test_channel_observer_never_blocks() {
        let (tx, rx) = bounded(1);
        let mut observer = ChannelObserver::new(tx);
        observer.on_round(&summary(0));
        observer.on_round(&summary(1));
        assert_eq!(rx.try_iter().count(), 1);

        drop(rx);
        observer.on_round(&summary(1));
    }

    #[test]
    fn test_logging_observer_handles_empty_best() {
        let mut observer = LoggingObserver::new(0);
        let mut empty = summary(0);
        empty.best = None;
        observer.on_round(&empty);
        observer.on_round(&summary(1));
    }
}
