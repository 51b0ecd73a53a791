use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::{clamp_unit, Proposal, SearchStrategy, StrategyContext, Ticket};

const INITIAL_SIGMA: f64 = 0.2;

/// (1+1) evolution strategy with one-fifth success rule step-size control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnePlusOne {
    parent: Vec<f64>,
    parent_loss: Option<f64>,
    sigma: f64,
    asked_parent: bool,
}

impl OnePlusOne {
    pub fn new(ctx: &StrategyContext) -> Self {
        Self {
            parent: ctx.initial.clone(),
            parent_loss: None,
            sigma: INITIAL_SIGMA,
            asked_parent: false,
        }
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }
}

impl SearchStrategy for OnePlusOne {
    fn ask(&mut self, rng: &mut ChaCha8Rng) -> Proposal {
        // The first proposal is the starting point itself.
        if !self.asked_parent {
            self.asked_parent = true;
            return Proposal {
                genome: self.parent.clone(),
                ticket: Ticket::default(),
            };
        }

        let mut genome: Vec<f64> = self
            .parent
            .iter()
            .map(|x| {
                let z: f64 = rng.sample(StandardNormal);
                x + self.sigma * z
            })
            .collect();
        clamp_unit(&mut genome);

        Proposal {
            genome,
            ticket: Ticket::default(),
        }
    }

    fn tell(&mut self, proposal: &Proposal, loss: f64) {
        match self.parent_loss {
            None => {
                self.parent = proposal.genome.clone();
                self.parent_loss = Some(loss);
            }
            Some(incumbent) if loss < incumbent => {
                self.parent = proposal.genome.clone();
                self.parent_loss = Some(loss);
                self.sigma *= (1.0f64 / 3.0).exp();
            }
            Some(_) => {
                self.sigma *= (-1.0f64 / 12.0).exp();
            }
        }
        self.sigma = self.sigma.clamp(1e-4, 1.0);
    }

    fn warm_start(&mut self, genome: &[f64], loss: f64) {
        self.parent = genome.to_vec();
        self.parent_loss = Some(loss);
        self.asked_parent = true;
    }

    fn name(&self) -> &str {
        "OnePlusOne"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn ctx() -> StrategyContext {
        StrategyContext {
            dimension: 2,
            budget: 50,
            parallelism: 1,
            initial: vec![0.25, 0.75],
        }
    }

    #[test]
    fn first_ask_is_initial_point() {
        let mut strategy = OnePlusOne::new(&ctx());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(strategy.ask(&mut rng).genome, vec![0.25, 0.75]);
        assert_ne!(strategy.ask(&mut rng).genome, vec![0.25, 0.75]);
    }

    #[test]
    fn step_size_follows_success() {
        let mut strategy = OnePlusOne::new(&ctx());
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let first = strategy.ask(&mut rng);
        strategy.tell(&first, 1.0);
        assert_eq!(strategy.sigma(), INITIAL_SIGMA);

        let better = strategy.ask(&mut rng);
        strategy.tell(&better, 0.5);
        assert!(strategy.sigma() > INITIAL_SIGMA);
        assert_eq!(strategy.parent, better.genome);

        let grown = strategy.sigma();
        let worse = strategy.ask(&mut rng);
        strategy.tell(&worse, 2.0);
        assert!(strategy.sigma() < grown);
        assert_eq!(strategy.parent, better.genome);
    }
}
