//! Search strategies and their registry.
//!
//! Every strategy minimizes a loss over the normalized genome `[0, 1]^d`
//! produced by [`crate::ParameterSpace`]. Strategies own their population and
//! step-size state; randomness comes from the caller so one seeded generator
//! drives the whole optimizer.

mod chaining;
mod differential;
mod evolution;
mod one_plus_one;
mod random;
mod swarm;

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use fdm_types::{FdmResult, OptimizerError};

pub use chaining::Chain;
pub use differential::{Crossover, DifferentialEvolution};
pub use evolution::DiagonalEs;
pub use one_plus_one::OnePlusOne;
pub use random::RandomSearch;
pub use swarm::ParticleSwarm;

/// Routing information a strategy attaches to each proposal so the matching
/// report lands on the right population slot or chain stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub stage: usize,
    pub slot: usize,
}

/// One genome handed out by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub genome: Vec<f64>,
    pub ticket: Ticket,
}

/// Common trait for all search strategies.
pub trait SearchStrategy {
    /// Produce the next genome to evaluate.
    fn ask(&mut self, rng: &mut ChaCha8Rng) -> Proposal;

    /// Report the loss of a genome previously returned by `ask`.
    fn tell(&mut self, proposal: &Proposal, loss: f64);

    /// Seed the strategy with an already evaluated point.
    fn warm_start(&mut self, _genome: &[f64], _loss: f64) {}

    /// Strategy-specific recommendation; `None` defers to the best told point.
    fn recommend(&self) -> Option<Vec<f64>> {
        None
    }

    /// Registered strategy name.
    fn name(&self) -> &str;
}

/// Everything a strategy needs to size itself.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyContext {
    pub dimension: usize,
    pub budget: usize,
    pub parallelism: usize,
    pub initial: Vec<f64>,
}

/// Population size hyperparameter: `"default"` or a positive integer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PopulationSize {
    Fixed(i64),
    Float(f64),
    Keyword(String),
}

impl Default for PopulationSize {
    fn default() -> Self {
        Self::Keyword("default".to_string())
    }
}

impl PopulationSize {
    /// `Some(n)` for a configured size, `None` for the strategy default.
    pub fn resolve(&self) -> FdmResult<Option<usize>> {
        match self {
            Self::Fixed(n) if *n > 0 => Ok(Some(*n as usize)),
            Self::Fixed(n) => Err(invalid("popsize", format!("{n} is not a positive integer"))),
            Self::Float(x) => Err(invalid("popsize", format!("{x} is not a positive integer"))),
            Self::Keyword(k) if k == "default" => Ok(None),
            Self::Keyword(k) => Err(invalid("popsize", format!("expected \"default\" or a positive integer, got {k:?}"))),
        }
    }
}

/// Named budget fractions accepted by the chaining strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceKeyword {
    Third,
    Half,
    Tenth,
    Sqrt,
    Dimension,
    NumWorkers,
}

/// Number of asks a chain stage receives before handing over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BudgetSlice {
    Absolute(usize),
    Named(SliceKeyword),
}

impl BudgetSlice {
    pub fn resolve(&self, ctx: &StrategyContext) -> usize {
        match self {
            Self::Absolute(n) => *n,
            Self::Named(SliceKeyword::Third) => ctx.budget / 3,
            Self::Named(SliceKeyword::Half) => ctx.budget / 2,
            Self::Named(SliceKeyword::Tenth) => ctx.budget / 10,
            Self::Named(SliceKeyword::Sqrt) => (ctx.budget as f64).sqrt().floor() as usize,
            Self::Named(SliceKeyword::Dimension) => ctx.dimension,
            Self::Named(SliceKeyword::NumWorkers) => ctx.parallelism,
        }
    }
}

/// Strategy hyperparameters as they appear in run configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerParams {
    #[serde(default)]
    pub popsize: PopulationSize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain_optims: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain_budget: Vec<BudgetSlice>,
}

impl OptimizerParams {
    pub fn with_popsize(mut self, popsize: i64) -> Self {
        self.popsize = PopulationSize::Fixed(popsize);
        self
    }

    pub fn with_chain(mut self, optims: Vec<String>, budget: Vec<BudgetSlice>) -> Self {
        self.chain_optims = optims;
        self.chain_budget = budget;
        self
    }
}

/// Names accepted by [`Strategy::from_name`].
pub const REGISTERED_STRATEGIES: [&str; 8] = [
    "EvolutionaryDefault",
    "OnePlusOne",
    "RandomSearch",
    "PSO",
    "DE",
    "NoisyDE",
    "TwoPointsDE",
    "Chaining",
];

/// All registered strategies behind one serializable type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Strategy {
    Evolution(DiagonalEs),
    OnePlusOne(OnePlusOne),
    Random(RandomSearch),
    Swarm(ParticleSwarm),
    Differential(DifferentialEvolution),
    Chaining(Chain),
}

impl Strategy {
    /// Resolve a registered name into a configured strategy.
    pub fn from_name(name: &str, ctx: &StrategyContext, params: &OptimizerParams) -> FdmResult<Self> {
        let popsize = params.popsize.resolve()?;

        let strategy = match name {
            "EvolutionaryDefault" => Self::Evolution(DiagonalEs::new(ctx, popsize)),
            "OnePlusOne" => Self::OnePlusOne(OnePlusOne::new(ctx)),
            "RandomSearch" => Self::Random(RandomSearch::new(ctx)),
            "PSO" => Self::Swarm(ParticleSwarm::new(ctx, popsize)),
            "DE" => Self::Differential(DifferentialEvolution::new(ctx, popsize, "DE", Crossover::Binomial, false)),
            "NoisyDE" => Self::Differential(DifferentialEvolution::new(ctx, popsize, "NoisyDE", Crossover::Binomial, true)),
            "TwoPointsDE" => {
                Self::Differential(DifferentialEvolution::new(ctx, popsize, "TwoPointsDE", Crossover::TwoPoints, false))
            }
            "Chaining" => Self::Chaining(Chain::new(ctx, params)?),
            other => {
                return Err(OptimizerError::UnknownStrategy {
                    name: other.to_string(),
                }
                .into())
            }
        };

        tracing::debug!(strategy = name, dimension = ctx.dimension, "Created search strategy");
        Ok(strategy)
    }

    fn inner(&self) -> &dyn SearchStrategy {
        match self {
            Self::Evolution(s) => s,
            Self::OnePlusOne(s) => s,
            Self::Random(s) => s,
            Self::Swarm(s) => s,
            Self::Differential(s) => s,
            Self::Chaining(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn SearchStrategy {
        match self {
            Self::Evolution(s) => s,
            Self::OnePlusOne(s) => s,
            Self::Random(s) => s,
            Self::Swarm(s) => s,
            Self::Differential(s) => s,
            Self::Chaining(s) => s,
        }
    }
}

impl SearchStrategy for Strategy {
    fn ask(&mut self, rng: &mut ChaCha8Rng) -> Proposal {
        self.inner_mut().ask(rng)
    }

    fn tell(&mut self, proposal: &Proposal, loss: f64) {
        self.inner_mut().tell(proposal, loss)
    }

    fn warm_start(&mut self, genome: &[f64], loss: f64) {
        self.inner_mut().warm_start(genome, loss)
    }

    fn recommend(&self) -> Option<Vec<f64>> {
        self.inner().recommend()
    }

    fn name(&self) -> &str {
        self.inner().name()
    }
}

fn invalid(parameter: &str, message: String) -> fdm_types::FdmError {
    OptimizerError::InvalidHyperparameter {
        parameter: parameter.to_string(),
        message,
    }
    .into()
}

/// Clamp every coordinate into the unit cube.
fn clamp_unit(genome: &mut [f64]) {
    for x in genome.iter_mut() {
        *x = x.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdm_types::FdmError;
    use rand::SeedableRng;

    fn ctx(dimension: usize) -> StrategyContext {
        StrategyContext {
            dimension,
            budget: 120,
            parallelism: 4,
            initial: vec![0.5; dimension],
        }
    }

    fn sphere(genome: &[f64]) -> f64 {
        genome.iter().map(|x| (x - 0.3).powi(2)).sum()
    }

    #[test]
    fn every_registered_strategy_stays_in_unit_cube() {
        let params = OptimizerParams::default().with_chain(
            vec!["OnePlusOne".into(), "DE".into()],
            vec![BudgetSlice::Named(SliceKeyword::Third)],
        );
        for name in REGISTERED_STRATEGIES {
            let mut strategy = Strategy::from_name(name, &ctx(3), &params).unwrap();
            let mut rng = ChaCha8Rng::seed_from_u64(11);
            for _ in 0..30 {
                let batch: Vec<Proposal> = (0..4).map(|_| strategy.ask(&mut rng)).collect();
                for proposal in &batch {
                    assert_eq!(proposal.genome.len(), 3, "{name}");
                    assert!(proposal.genome.iter().all(|x| (0.0..=1.0).contains(x)), "{name}");
                }
                for proposal in &batch {
                    strategy.tell(proposal, sphere(&proposal.genome));
                }
            }
            assert_eq!(strategy.name(), name);
        }
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        match Strategy::from_name("NelderMead", &ctx(2), &OptimizerParams::default()) {
            Err(FdmError::Optimizer(OptimizerError::UnknownStrategy { name })) => assert_eq!(name, "NelderMead"),
            other => panic!("Expected unknown strategy, got: {:?}", other),
        }
    }

    #[test]
    fn population_size_validation() {
        assert_eq!(PopulationSize::default().resolve().unwrap(), None);
        assert_eq!(PopulationSize::Fixed(12).resolve().unwrap(), Some(12));

        for bad in [PopulationSize::Fixed(0), PopulationSize::Fixed(-3), PopulationSize::Keyword("big".into())] {
            match bad.resolve() {
                Err(FdmError::Optimizer(OptimizerError::InvalidHyperparameter { parameter, .. })) => {
                    assert_eq!(parameter, "popsize")
                }
                other => panic!("Expected invalid hyperparameter, got: {:?}", other),
            }
        }

        let params = OptimizerParams::default().with_popsize(-1);
        assert!(Strategy::from_name("PSO", &ctx(2), &params).is_err());
    }

    #[test]
    fn fractional_popsize_is_invalid_hyperparameter() {
        let params: OptimizerParams = serde_json::from_str(r#"{"popsize": 12.5}"#).unwrap();
        assert_eq!(params.popsize, PopulationSize::Float(12.5));
        match Strategy::from_name("PSO", &ctx(2), &params) {
            Err(FdmError::Optimizer(OptimizerError::InvalidHyperparameter { parameter, .. })) => {
                assert_eq!(parameter, "popsize")
            }
            other => panic!("Expected invalid hyperparameter, got: {:?}", other),
        }
    }

    #[test]
    fn params_schema() {
        let params: OptimizerParams = serde_json::from_str(
            r#"{"popsize": 20, "chain_optims": ["PSO", "DE"], "chain_budget": ["third"]}"#,
        )
        .unwrap();
        assert_eq!(params.popsize, PopulationSize::Fixed(20));
        assert_eq!(params.chain_budget, vec![BudgetSlice::Named(SliceKeyword::Third)]);

        let params: OptimizerParams = serde_json::from_str(r#"{"popsize": "default", "chain_budget": [25, "num_workers"]}"#).unwrap();
        assert_eq!(params.popsize, PopulationSize::default());
        assert_eq!(
            params.chain_budget,
            vec![BudgetSlice::Absolute(25), BudgetSlice::Named(SliceKeyword::NumWorkers)]
        );
    }

    #[test]
    fn budget_slices_resolve_against_context() {
        let ctx = ctx(7);
        assert_eq!(BudgetSlice::Absolute(9).resolve(&ctx), 9);
        assert_eq!(BudgetSlice::Named(SliceKeyword::Third).resolve(&ctx), 40);
        assert_eq!(BudgetSlice::Named(SliceKeyword::Half).resolve(&ctx), 60);
        assert_eq!(BudgetSlice::Named(SliceKeyword::Tenth).resolve(&ctx), 12);
        assert_eq!(BudgetSlice::Named(SliceKeyword::Sqrt).resolve(&ctx), 10);
        assert_eq!(BudgetSlice::Named(SliceKeyword::Dimension).resolve(&ctx), 7);
        assert_eq!(BudgetSlice::Named(SliceKeyword::NumWorkers).resolve(&ctx), 4);
    }

    #[test]
    fn strategies_improve_on_sphere() {
        for name in ["EvolutionaryDefault", "OnePlusOne", "PSO", "DE", "TwoPointsDE"] {
            let mut strategy = Strategy::from_name(name, &ctx(2), &OptimizerParams::default()).unwrap();
            let mut rng = ChaCha8Rng::seed_from_u64(3);
            let mut first = f64::MAX;
            let mut best = f64::MAX;
            for round in 0..100 {
                let batch: Vec<Proposal> = (0..4).map(|_| strategy.ask(&mut rng)).collect();
                for proposal in &batch {
                    let loss = sphere(&proposal.genome);
                    if round == 0 {
                        first = first.min(loss);
                    }
                    best = best.min(loss);
                    strategy.tell(proposal, loss);
                }
            }
            assert!(best <= first, "{name}");
            assert!(best < 0.05, "{name} only reached {best}");
        }
    }
}
