//! Ask/tell optimizer handle with serializable state.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use fdm_types::{FdmResult, OptimizerError, OptimizerState};

use crate::space::{Candidate, ParameterSpace, ParameterValue};
use crate::strategy::{OptimizerParams, Proposal, SearchStrategy, Strategy, StrategyContext};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BestPoint {
    ask_id: u64,
    genome: Vec<f64>,
    loss: f64,
}

/// Recommended parameters and, when it was actually evaluated, their loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub parameters: Vec<(String, ParameterValue)>,
    pub loss: Option<f64>,
}

/// A configured search strategy bound to its parameter space and seeded
/// generator.
///
/// Every candidate handed out by [`OptimizerHandle::propose`] stays pending
/// until it is reported exactly once. The handle serializes completely (the
/// generator position included), so a restored handle continues the same
/// proposal sequence as the handle it was saved from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerHandle {
    strategy_name: String,
    space: ParameterSpace,
    budget: usize,
    parallelism: usize,
    seed: u64,
    #[serde(with = "rng_state")]
    rng: ChaCha8Rng,
    strategy: Strategy,
    next_ask_id: u64,
    num_tell: u64,
    pending: BTreeMap<u64, Proposal>,
    best: Option<BestPoint>,
}

impl OptimizerHandle {
    /// Resolve `strategy_name` against the registry and bind it to `space`.
    pub fn create(
        strategy_name: &str,
        space: ParameterSpace,
        budget: usize,
        parallelism: usize,
        params: &OptimizerParams,
        seed: u64,
    ) -> FdmResult<Self> {
        space.validate()?;

        let ctx = StrategyContext {
            dimension: space.dimension(),
            budget,
            parallelism,
            initial: space.initial_genome(),
        };
        let strategy = Strategy::from_name(strategy_name, &ctx, params)?;

        tracing::info!(
            strategy = strategy_name,
            dimension = ctx.dimension,
            budget,
            parallelism,
            seed,
            "Optimizer created"
        );

        Ok(Self {
            strategy_name: strategy_name.to_string(),
            space,
            budget,
            parallelism,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            strategy,
            next_ask_id: 0,
            num_tell: 0,
            pending: BTreeMap::new(),
            best: None,
        })
    }

    /// Ask the strategy for its next candidate.
    pub fn propose(&mut self) -> Candidate {
        let proposal = self.strategy.ask(&mut self.rng);
        let ask_id = self.next_ask_id;
        self.next_ask_id += 1;

        let parameters = self.space.decode(&proposal.genome);
        self.pending.insert(ask_id, proposal);

        Candidate {
            ask_id,
            eval_id: None,
            parameters,
        }
    }

    /// Tell the strategy the loss of a pending candidate.
    ///
    /// Fails with `UnknownCandidate` if the candidate was not proposed by this
    /// handle or has already been reported.
    pub fn report(&mut self, candidate: &Candidate, loss: f64) -> FdmResult<()> {
        if !loss.is_finite() {
            return Err(OptimizerError::State {
                message: format!("loss {loss} for candidate {} is not finite", candidate.ask_id),
            }
            .into());
        }
        let proposal = self
            .pending
            .remove(&candidate.ask_id)
            .ok_or(OptimizerError::UnknownCandidate {
                ask_id: candidate.ask_id,
            })?;

        self.strategy.tell(&proposal, loss);
        self.num_tell += 1;

        if self.best.as_ref().map_or(true, |best| loss < best.loss) {
            self.best = Some(BestPoint {
                ask_id: candidate.ask_id,
                genome: proposal.genome,
                loss,
            });
        }
        Ok(())
    }

    /// Current recommendation: the strategy's own when it has one, otherwise
    /// the best reported candidate.
    pub fn recommend(&self) -> Option<Recommendation> {
        if let Some(genome) = self.strategy.recommend() {
            return Some(Recommendation {
                parameters: self.space.decode(&genome),
                loss: None,
            });
        }
        self.best.as_ref().map(|best| Recommendation {
            parameters: self.space.decode(&best.genome),
            loss: Some(best.loss),
        })
    }

    pub fn serialize(&self) -> FdmResult<OptimizerState> {
        Ok(OptimizerState::new(serde_json::to_value(self)?))
    }

    pub fn deserialize(state: &OptimizerState) -> FdmResult<Self> {
        let handle: Self = serde_json::from_value(state.as_value().clone())?;
        if handle.strategy.name() != handle.strategy_name {
            return Err(OptimizerError::State {
                message: format!(
                    "state names strategy {} but holds {}",
                    handle.strategy_name,
                    handle.strategy.name()
                ),
            }
            .into());
        }
        Ok(handle)
    }

    pub fn strategy_name(&self) -> &str {
        &self.strategy_name
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn num_ask(&self) -> u64 {
        self.next_ask_id
    }

    pub fn num_tell(&self) -> u64 {
        self.num_tell
    }

    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }
}

/// ChaCha generator state as seed, stream and 128-bit word position.
mod rng_state {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct RngState {
        seed: [u8; 32],
        stream: u64,
        word_pos_hi: u64,
        word_pos_lo: u64,
    }

    pub fn serialize<S: Serializer>(rng: &ChaCha8Rng, serializer: S) -> Result<S::Ok, S::Error> {
        let word_pos = rng.get_word_pos();
        RngState {
            seed: rng.get_seed(),
            stream: rng.get_stream(),
            word_pos_hi: (word_pos >> 64) as u64,
            word_pos_lo: word_pos as u64,
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ChaCha8Rng, D::Error> {
        let state = RngState::deserialize(deserializer)?;
        let mut rng = ChaCha8Rng::from_seed(state.seed);
        rng.set_stream(state.stream);
        rng.set_word_pos(((state.word_pos_hi as u128) << 64) | state.word_pos_lo as u128);
        Ok(rng)
    }
}
