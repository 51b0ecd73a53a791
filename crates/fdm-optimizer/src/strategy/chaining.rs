use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use fdm_types::FdmResult;

use super::{invalid, OptimizerParams, Proposal, SearchStrategy, Strategy, StrategyContext};

/// Runs a sequence of strategies, each for its slice of the ask budget.
///
/// When a stage hands over, the next stage is warm-started with the best
/// point seen so far. Reports are routed back to the stage that asked, even
/// after the chain has moved on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    stages: Vec<Strategy>,
    /// Cumulative ask count at which each non-final stage hands over.
    boundaries: Vec<usize>,
    current: usize,
    asked: usize,
    best: Option<(Vec<f64>, f64)>,
}

impl Chain {
    pub fn new(ctx: &StrategyContext, params: &OptimizerParams) -> FdmResult<Self> {
        if params.chain_optims.is_empty() {
            return Err(invalid("chain_optims", "at least one strategy is required".to_string()));
        }
        if params.chain_budget.len() + 1 != params.chain_optims.len() {
            return Err(invalid(
                "chain_budget",
                format!(
                    "{} strategies need {} budget slices, got {}",
                    params.chain_optims.len(),
                    params.chain_optims.len() - 1,
                    params.chain_budget.len()
                ),
            ));
        }

        let mut stages = Vec::with_capacity(params.chain_optims.len());
        for name in &params.chain_optims {
            if name == "Chaining" {
                return Err(invalid("chain_optims", "chains cannot be nested".to_string()));
            }
            stages.push(Strategy::from_name(name, ctx, params)?);
        }

        let mut boundaries = Vec::with_capacity(params.chain_budget.len());
        let mut total = 0;
        for slice in &params.chain_budget {
            total += slice.resolve(ctx);
            boundaries.push(total);
        }

        Ok(Self {
            stages,
            boundaries,
            current: 0,
            asked: 0,
            best: None,
        })
    }

    pub fn current_stage(&self) -> usize {
        self.current
    }

    fn advance(&mut self) {
        while self.current < self.boundaries.len() && self.asked >= self.boundaries[self.current] {
            self.current += 1;
            if let Some((genome, loss)) = &self.best {
                self.stages[self.current].warm_start(genome, *loss);
            }
            tracing::debug!(
                stage = self.current,
                strategy = self.stages[self.current].name(),
                asked = self.asked,
                "Chain advanced to next stage"
            );
        }
    }
}

impl SearchStrategy for Chain {
    fn ask(&mut self, rng: &mut ChaCha8Rng) -> Proposal {
        self.advance();
        let mut proposal = self.stages[self.current].ask(rng);
        proposal.ticket.stage = self.current;
        self.asked += 1;
        proposal
    }

    fn tell(&mut self, proposal: &Proposal, loss: f64) {
        if let Some(stage) = self.stages.get_mut(proposal.ticket.stage) {
            stage.tell(proposal, loss);
        }
        if self.best.as_ref().map_or(true, |(_, best)| loss < *best) {
            self.best = Some((proposal.genome.clone(), loss));
        }
    }

    fn warm_start(&mut self, genome: &[f64], loss: f64) {
        self.stages[self.current].warm_start(genome, loss);
        self.best = Some((genome.to_vec(), loss));
    }

    fn recommend(&self) -> Option<Vec<f64>> {
        self.stages[self.current].recommend()
    }

    fn name(&self) -> &str {
        "Chaining"
    }
}
