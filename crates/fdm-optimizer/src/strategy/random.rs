use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{Proposal, SearchStrategy, StrategyContext, Ticket};

/// Independent uniform sampling of the genome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomSearch {
    dimension: usize,
}

impl RandomSearch {
    pub fn new(ctx: &StrategyContext) -> Self {
        Self {
            dimension: ctx.dimension,
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn ask(&mut self, rng: &mut ChaCha8Rng) -> Proposal {
        Proposal {
            genome: (0..self.dimension).map(|_| rng.gen::<f64>()).collect(),
            ticket: Ticket::default(),
        }
    }

    fn tell(&mut self, _proposal: &Proposal, _loss: f64) {}

    fn name(&self) -> &str {
        "RandomSearch"
    }
}
