use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{clamp_unit, Proposal, SearchStrategy, StrategyContext, Ticket};

const MUTATION_FACTOR: f64 = 0.8;
const CROSSOVER_RATE: f64 = 0.5;
const MIN_POPULATION: usize = 30;

/// How a mutant is recombined with its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Crossover {
    /// Each coordinate comes from the mutant with probability CR, at least one always does.
    Binomial,
    /// One contiguous run of coordinates comes from the mutant.
    TwoPoints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Member {
    genome: Vec<f64>,
    loss: Option<f64>,
    issued: bool,
}

/// DE/rand/1 differential evolution.
///
/// Population slots are asked round-robin; a trial replaces its slot's member
/// when its loss is no worse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferentialEvolution {
    name: String,
    crossover: Crossover,
    noisy_recommendation: bool,
    dimension: usize,
    population_size: usize,
    initial: Vec<f64>,
    population: Vec<Member>,
    cursor: usize,
}

impl DifferentialEvolution {
    pub fn new(
        ctx: &StrategyContext,
        popsize: Option<usize>,
        name: &str,
        crossover: Crossover,
        noisy_recommendation: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            crossover,
            noisy_recommendation,
            dimension: ctx.dimension,
            population_size: popsize.unwrap_or_else(|| MIN_POPULATION.max(ctx.parallelism)).max(4),
            initial: ctx.initial.clone(),
            population: Vec::new(),
            cursor: 0,
        }
    }

    pub fn population_size(&self) -> usize {
        self.population_size
    }

    fn ensure_population(&mut self, rng: &mut ChaCha8Rng) {
        if !self.population.is_empty() {
            return;
        }
        for i in 0..self.population_size {
            let genome = if i == 0 {
                self.initial.clone()
            } else {
                (0..self.dimension).map(|_| rng.gen::<f64>()).collect()
            };
            self.population.push(Member {
                genome,
                loss: None,
                issued: false,
            });
        }
    }

    /// Three distinct evaluated members other than `target`.
    fn pick_donors(&self, target: usize, rng: &mut ChaCha8Rng) -> Option<[usize; 3]> {
        let evaluated: Vec<usize> = self
            .population
            .iter()
            .enumerate()
            .filter(|(i, m)| *i != target && m.loss.is_some())
            .map(|(i, _)| i)
            .collect();
        if evaluated.len() < 3 {
            return None;
        }

        let mut picked = [usize::MAX; 3];
        let mut n = 0;
        while n < 3 {
            let candidate = evaluated[rng.gen_range(0..evaluated.len())];
            if !picked[..n].contains(&candidate) {
                picked[n] = candidate;
                n += 1;
            }
        }
        Some(picked)
    }

    fn recombine(&self, target: &[f64], mutant: &[f64], rng: &mut ChaCha8Rng) -> Vec<f64> {
        let d = target.len();
        if d == 0 {
            return Vec::new();
        }
        match self.crossover {
            Crossover::Binomial => {
                let forced = rng.gen_range(0..d);
                (0..d)
                    .map(|j| {
                        if j == forced || rng.gen::<f64>() < CROSSOVER_RATE {
                            mutant[j]
                        } else {
                            target[j]
                        }
                    })
                    .collect()
            }
            Crossover::TwoPoints => {
                let start = rng.gen_range(0..d);
                let end = rng.gen_range(start + 1..=d);
                (0..d)
                    .map(|j| if (start..end).contains(&j) { mutant[j] } else { target[j] })
                    .collect()
            }
        }
    }
}

impl SearchStrategy for DifferentialEvolution {
    fn ask(&mut self, rng: &mut ChaCha8Rng) -> Proposal {
        self.ensure_population(rng);

        let slot = self.cursor % self.population_size;
        self.cursor += 1;
        let ticket = Ticket { stage: 0, slot };

        if !self.population[slot].issued {
            self.population[slot].issued = true;
            return Proposal {
                genome: self.population[slot].genome.clone(),
                ticket,
            };
        }

        let genome = match self.pick_donors(slot, rng) {
            Some([a, b, c]) => {
                let (a, b, c) = (
                    &self.population[a].genome,
                    &self.population[b].genome,
                    &self.population[c].genome,
                );
                let mutant: Vec<f64> = (0..self.dimension)
                    .map(|j| a[j] + MUTATION_FACTOR * (b[j] - c[j]))
                    .collect();
                let mut trial = self.recombine(&self.population[slot].genome, &mutant, rng);
                clamp_unit(&mut trial);
                trial
            }
            // Not enough evaluated members yet to build a difference vector.
            None => (0..self.dimension).map(|_| rng.gen::<f64>()).collect(),
        };

        Proposal { genome, ticket }
    }

    fn tell(&mut self, proposal: &Proposal, loss: f64) {
        if let Some(member) = self.population.get_mut(proposal.ticket.slot) {
            if member.loss.map_or(true, |current| loss <= current) {
                member.genome = proposal.genome.clone();
                member.loss = Some(loss);
            }
        }
    }

    fn warm_start(&mut self, genome: &[f64], loss: f64) {
        self.initial = genome.to_vec();
        if let Some(first) = self.population.first_mut() {
            first.genome = genome.to_vec();
            first.loss = Some(loss);
            first.issued = true;
        }
    }

    /// The noisy variant recommends the population centroid instead of the
    /// single best evaluation.
    fn recommend(&self) -> Option<Vec<f64>> {
        if !self.noisy_recommendation {
            return None;
        }
        let evaluated: Vec<&Member> = self.population.iter().filter(|m| m.loss.is_some()).collect();
        if evaluated.is_empty() {
            return None;
        }
        let n = evaluated.len() as f64;
        Some(
            (0..self.dimension)
                .map(|j| evaluated.iter().map(|m| m.genome[j]).sum::<f64>() / n)
                .collect(),
        )
    }

    fn name(&self) -> &str {
        &self.name
    }
}
