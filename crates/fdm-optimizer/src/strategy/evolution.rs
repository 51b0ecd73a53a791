use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::{clamp_unit, Proposal, SearchStrategy, StrategyContext, Ticket};

const INITIAL_SIGMA: f64 = 0.3;
const MIN_SIGMA: f64 = 1e-3;
const MAX_SIGMA: f64 = 0.5;
const SIGMA_MEMORY: f64 = 0.8;

/// Evolution strategy with a diagonal (per-coordinate) step size.
///
/// Samples `lambda` offspring around the mean, then moves the mean to the
/// log-weighted average of the best half and re-estimates each coordinate's
/// spread from the same selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagonalEs {
    mean: Vec<f64>,
    sigma: Vec<f64>,
    lambda: usize,
    generation: u64,
    offspring: Vec<(Vec<f64>, f64)>,
}

impl DiagonalEs {
    pub fn new(ctx: &StrategyContext, popsize: Option<usize>) -> Self {
        let lambda = popsize.unwrap_or_else(|| Self::default_popsize(ctx)).max(2);
        Self {
            mean: ctx.initial.clone(),
            sigma: vec![INITIAL_SIGMA; ctx.dimension],
            lambda,
            generation: 0,
            offspring: Vec::with_capacity(lambda),
        }
    }

    /// `max(parallelism, 4 + floor(3 ln d))`
    pub fn default_popsize(ctx: &StrategyContext) -> usize {
        let n = ctx.dimension.max(1) as f64;
        let standard = 4 + (3.0 * n.ln()).floor() as usize;
        standard.max(ctx.parallelism)
    }

    pub fn lambda(&self) -> usize {
        self.lambda
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn update(&mut self) {
        let mut selected = std::mem::take(&mut self.offspring);
        selected.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mu = (self.lambda / 2).max(1);
        let raw: Vec<f64> = (0..mu)
            .map(|i| (mu as f64 + 0.5).ln() - ((i + 1) as f64).ln())
            .collect();
        let total: f64 = raw.iter().sum();
        let weights: Vec<f64> = raw.iter().map(|w| w / total).collect();

        for d in 0..self.mean.len() {
            let mean: f64 = selected
                .iter()
                .zip(&weights)
                .map(|((genome, _), w)| w * genome[d])
                .sum();
            let variance: f64 = selected
                .iter()
                .zip(&weights)
                .map(|((genome, _), w)| w * (genome[d] - mean).powi(2))
                .sum();

            self.mean[d] = mean;
            self.sigma[d] = (SIGMA_MEMORY * self.sigma[d] + (1.0 - SIGMA_MEMORY) * variance.sqrt())
                .clamp(MIN_SIGMA, MAX_SIGMA);
        }

        self.generation += 1;
        self.offspring = Vec::with_capacity(self.lambda);
    }
}

impl SearchStrategy for DiagonalEs {
    fn ask(&mut self, rng: &mut ChaCha8Rng) -> Proposal {
        let mut genome: Vec<f64> = self
            .mean
            .iter()
            .zip(&self.sigma)
            .map(|(m, s)| {
                let z: f64 = rng.sample(StandardNormal);
                m + s * z
            })
            .collect();
        clamp_unit(&mut genome);

        Proposal {
            genome,
            ticket: Ticket::default(),
        }
    }

    fn tell(&mut self, proposal: &Proposal, loss: f64) {
        self.offspring.push((proposal.genome.clone(), loss));
        if self.offspring.len() >= self.lambda {
            self.update();
        }
    }

    fn warm_start(&mut self, genome: &[f64], _loss: f64) {
        self.mean = genome.to_vec();
    }

    fn name(&self) -> &str {
        "EvolutionaryDefault"
    }
}
