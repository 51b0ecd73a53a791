use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{clamp_unit, Proposal, SearchStrategy, StrategyContext, Ticket};

const OMEGA: f64 = 0.7298;
const PHI_P: f64 = 1.496;
const PHI_G: f64 = 1.496;
const MIN_SWARM: usize = 40;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Particle {
    position: Vec<f64>,
    velocity: Vec<f64>,
    best_position: Vec<f64>,
    best_loss: Option<f64>,
    issued: bool,
}

/// Particle swarm optimization with constriction coefficients.
///
/// Particles are asked round-robin; the ticket slot carries the particle
/// index so each report updates the particle that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleSwarm {
    dimension: usize,
    swarm_size: usize,
    initial: Vec<f64>,
    particles: Vec<Particle>,
    global_best: Option<(Vec<f64>, f64)>,
    cursor: usize,
}

impl ParticleSwarm {
    pub fn new(ctx: &StrategyContext, popsize: Option<usize>) -> Self {
        Self {
            dimension: ctx.dimension,
            swarm_size: popsize.unwrap_or_else(|| MIN_SWARM.max(ctx.parallelism)),
            initial: ctx.initial.clone(),
            particles: Vec::new(),
            global_best: None,
            cursor: 0,
        }
    }

    pub fn swarm_size(&self) -> usize {
        self.swarm_size
    }

    /// Particles are placed on first use so placement draws from the run's generator.
    fn ensure_swarm(&mut self, rng: &mut ChaCha8Rng) {
        if !self.particles.is_empty() {
            return;
        }
        for i in 0..self.swarm_size {
            let position: Vec<f64> = if i == 0 {
                self.initial.clone()
            } else {
                (0..self.dimension).map(|_| rng.gen::<f64>()).collect()
            };
            let velocity = (0..self.dimension).map(|_| rng.gen_range(-0.1..0.1)).collect();
            self.particles.push(Particle {
                best_position: position.clone(),
                position,
                velocity,
                best_loss: None,
                issued: false,
            });
        }
    }
}

impl SearchStrategy for ParticleSwarm {
    fn ask(&mut self, rng: &mut ChaCha8Rng) -> Proposal {
        self.ensure_swarm(rng);

        let slot = self.cursor % self.swarm_size;
        self.cursor += 1;

        let global = self.global_best.as_ref().map(|(g, _)| g.clone());
        let particle = &mut self.particles[slot];

        if particle.issued {
            let attractor = global.unwrap_or_else(|| particle.best_position.clone());
            for d in 0..particle.position.len() {
                let rp: f64 = rng.gen();
                let rg: f64 = rng.gen();
                particle.velocity[d] = OMEGA * particle.velocity[d]
                    + PHI_P * rp * (particle.best_position[d] - particle.position[d])
                    + PHI_G * rg * (attractor[d] - particle.position[d]);
                particle.position[d] += particle.velocity[d];
            }
            clamp_unit(&mut particle.position);
        }
        particle.issued = true;

        Proposal {
            genome: particle.position.clone(),
            ticket: Ticket { stage: 0, slot },
        }
    }

    fn tell(&mut self, proposal: &Proposal, loss: f64) {
        if let Some(particle) = self.particles.get_mut(proposal.ticket.slot) {
            if particle.best_loss.map_or(true, |best| loss < best) {
                particle.best_loss = Some(loss);
                particle.best_position = proposal.genome.clone();
            }
        }
        if self.global_best.as_ref().map_or(true, |(_, best)| loss < *best) {
            self.global_best = Some((proposal.genome.clone(), loss));
        }
    }

    fn warm_start(&mut self, genome: &[f64], loss: f64) {
        self.initial = genome.to_vec();
        self.global_best = Some((genome.to_vec(), loss));
    }

    fn name(&self) -> &str {
        "PSO"
    }
}
