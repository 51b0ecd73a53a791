//! Mixed discrete/continuous parameter spaces and the candidates drawn from them.

use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use fdm_types::{config_error, FdmResult};

/// A single named field in the parameter space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Field name (e.g. "battery0", "lqr_vector").
    pub name: String,
    pub spec: ParameterSpec,
}

/// Describes how a field is searched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterSpec {
    /// Categorical index in `[0, cardinality)`.
    Choice { cardinality: usize },
    /// Continuous value in the closed interval `[lower, upper]`.
    Scalar {
        lower: f64,
        upper: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        init: Option<f64>,
    },
    /// Fixed-length array of scalars sharing the same bounds.
    Vector {
        length: usize,
        lower: f64,
        upper: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        init: Option<Vec<f64>>,
    },
    /// Fixed values, carried through every candidate and never optimized.
    Constant { value: Vec<f64> },
}

impl ParameterSpec {
    /// Number of entries this field contributes to a flattened candidate.
    pub fn width(&self) -> usize {
        match self {
            Self::Choice { .. } | Self::Scalar { .. } => 1,
            Self::Vector { length, .. } => *length,
            Self::Constant { value } => value.len(),
        }
    }

    /// Number of normalized genome dimensions the optimizer searches for this field.
    pub fn genome_width(&self) -> usize {
        match self {
            Self::Choice { .. } | Self::Scalar { .. } => 1,
            Self::Vector { length, .. } => *length,
            Self::Constant { .. } => 0,
        }
    }
}

/// A concrete field value in a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Index(usize),
    Float(f64),
    Array(Vec<f64>),
}

impl ParameterValue {
    fn extend_flat(&self, out: &mut Vec<f64>) {
        match self {
            Self::Index(v) => out.push(*v as f64),
            Self::Float(v) => out.push(*v),
            Self::Array(values) => out.extend_from_slice(values),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Array(values) => write!(f, "{values:?}"),
        }
    }
}

/// The full parameter space: an ordered list of field definitions.
///
/// Insertion order fixes both the genome layout and the flattening order
/// used for stored history vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    pub parameters: Vec<ParameterDef>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.push(name, spec);
        self
    }

    pub fn add_choice(self, name: impl Into<String>, cardinality: usize) -> Self {
        self.add(name, ParameterSpec::Choice { cardinality })
    }

    pub fn add_scalar(self, name: impl Into<String>, lower: f64, upper: f64) -> Self {
        self.add(name, ParameterSpec::Scalar { lower, upper, init: None })
    }

    pub fn add_vector(self, name: impl Into<String>, length: usize, lower: f64, upper: f64) -> Self {
        self.add(
            name,
            ParameterSpec::Vector {
                length,
                lower,
                upper,
                init: None,
            },
        )
    }

    pub fn add_constant(self, name: impl Into<String>, value: Vec<f64>) -> Self {
        self.add(name, ParameterSpec::Constant { value })
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, spec: ParameterSpec) {
        self.parameters.push(ParameterDef {
            name: name.into(),
            spec,
        });
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name).map(|p| &p.spec)
    }

    /// Length of a flattened candidate.
    pub fn flat_width(&self) -> usize {
        self.parameters.iter().map(|p| p.spec.width()).sum()
    }

    /// Number of searched genome dimensions.
    pub fn dimension(&self) -> usize {
        self.parameters.iter().map(|p| p.spec.genome_width()).sum()
    }

    /// Check names, bounds, cardinalities and initial values.
    pub fn validate(&self) -> FdmResult<()> {
        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(config_error!("Duplicate parameter name: {}", param.name));
            }

            match &param.spec {
                ParameterSpec::Choice { cardinality } => {
                    if *cardinality == 0 {
                        return Err(config_error!("Choice {} must have at least one option", param.name));
                    }
                }
                ParameterSpec::Scalar { lower, upper, init } => {
                    check_bounds(&param.name, *lower, *upper)?;
                    if let Some(v) = init {
                        check_init(&param.name, *v, *lower, *upper)?;
                    }
                }
                ParameterSpec::Vector {
                    length,
                    lower,
                    upper,
                    init,
                } => {
                    check_bounds(&param.name, *lower, *upper)?;
                    if *length == 0 {
                        return Err(config_error!("Vector {} must have a positive length", param.name));
                    }
                    if let Some(values) = init {
                        if values.len() != *length {
                            return Err(config_error!(
                                "Vector {} has length {} but its initial value has {} entries",
                                param.name,
                                length,
                                values.len()
                            ));
                        }
                        for v in values {
                            check_init(&param.name, *v, *lower, *upper)?;
                        }
                    }
                }
                ParameterSpec::Constant { value } => {
                    if value.iter().any(|v| !v.is_finite()) {
                        return Err(config_error!("Constant {} holds a non-finite value", param.name));
                    }
                }
            }
        }
        Ok(())
    }

    /// Genome of the declared initial point. Fields without an initial value
    /// start at the middle of their range.
    pub fn initial_genome(&self) -> Vec<f64> {
        let mut genome = Vec::with_capacity(self.dimension());
        for param in &self.parameters {
            match &param.spec {
                ParameterSpec::Choice { .. } => genome.push(0.5),
                ParameterSpec::Scalar { lower, upper, init } => {
                    genome.push(init.map_or(0.5, |v| normalize(v, *lower, *upper)));
                }
                ParameterSpec::Vector {
                    length,
                    lower,
                    upper,
                    init,
                } => match init {
                    Some(values) => genome.extend(values.iter().map(|v| normalize(*v, *lower, *upper))),
                    None => genome.extend(std::iter::repeat(0.5).take(*length)),
                },
                ParameterSpec::Constant { .. } => {}
            }
        }
        genome
    }

    /// Map a normalized genome onto concrete field values, in space order.
    ///
    /// Genome entries are clamped to `[0, 1]`; missing entries read as 0.5.
    pub fn decode(&self, genome: &[f64]) -> Vec<(String, ParameterValue)> {
        let mut cursor = 0;
        let mut next = || {
            let u = genome.get(cursor).copied().unwrap_or(0.5).clamp(0.0, 1.0);
            cursor += 1;
            u
        };

        self.parameters
            .iter()
            .map(|param| {
                let value = match &param.spec {
                    ParameterSpec::Choice { cardinality } => {
                        let index = (next() * *cardinality as f64).floor() as usize;
                        ParameterValue::Index(index.min(cardinality.saturating_sub(1)))
                    }
                    ParameterSpec::Scalar { lower, upper, .. } => {
                        ParameterValue::Float(denormalize(next(), *lower, *upper))
                    }
                    ParameterSpec::Vector {
                        length, lower, upper, ..
                    } => ParameterValue::Array(
                        (0..*length).map(|_| denormalize(next(), *lower, *upper)).collect(),
                    ),
                    ParameterSpec::Constant { value } => ParameterValue::Array(value.clone()),
                };
                (param.name.clone(), value)
            })
            .collect()
    }

    /// Uniform random genome.
    pub fn sample_genome<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        (0..self.dimension()).map(|_| rng.gen::<f64>()).collect()
    }

    /// Independent uniform sample of every field.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<(String, ParameterValue)> {
        let genome = self.sample_genome(rng);
        self.decode(&genome)
    }
}

fn check_bounds(name: &str, lower: f64, upper: f64) -> FdmResult<()> {
    if !lower.is_finite() || !upper.is_finite() {
        return Err(config_error!("Parameter {} has non-finite bounds", name));
    }
    if lower > upper {
        return Err(config_error!(
            "Parameter {} has inverted bounds [{}, {}]",
            name,
            lower,
            upper
        ));
    }
    Ok(())
}

fn check_init(name: &str, value: f64, lower: f64, upper: f64) -> FdmResult<()> {
    if !(lower..=upper).contains(&value) {
        return Err(config_error!(
            "Initial value {} of {} lies outside [{}, {}]",
            value,
            name,
            lower,
            upper
        ));
    }
    Ok(())
}

fn normalize(value: f64, lower: f64, upper: f64) -> f64 {
    if upper > lower {
        ((value - lower) / (upper - lower)).clamp(0.0, 1.0)
    } else {
        0.5
    }
}

fn denormalize(u: f64, lower: f64, upper: f64) -> f64 {
    (lower + u * (upper - lower)).clamp(lower, upper)
}

/// One proposed assignment of every field in a [`ParameterSpace`].
///
/// `ask_id` identifies the proposal inside the optimizer that produced it;
/// `eval_id` is assigned by the run controller at dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub ask_id: u64,
    pub eval_id: Option<u64>,
    pub parameters: Vec<(String, ParameterValue)>,
}

impl Candidate {
    pub fn assign_eval_id(&mut self, eval_id: u64) {
        self.eval_id = Some(eval_id);
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.parameters.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Flattened numeric vector in space order. Choices contribute their index.
    pub fn flatten(&self) -> Vec<f64> {
        let mut out = Vec::new();
        for (_, value) in &self.parameters {
            value.extend_flat(&mut out);
        }
        out
    }

    /// Named mapping handed to the evaluator, with `eval_id` included once assigned.
    pub fn to_named_map(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.parameters {
            let json = match value {
                ParameterValue::Index(v) => serde_json::Value::from(*v),
                ParameterValue::Float(v) => serde_json::Value::from(*v),
                ParameterValue::Array(values) => serde_json::Value::from(values.clone()),
            };
            map.insert(name.clone(), json);
        }
        if let Some(eval_id) = self.eval_id {
            map.insert("eval_id".to_string(), serde_json::Value::from(eval_id));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdm_types::FdmError;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sample_space() -> ParameterSpace {
        ParameterSpace::new()
            .add_choice("battery0", 3)
            .add_choice("motor0", 7)
            .add_scalar("arm_length0", 50.0, 400.0)
            .add_vector("lqr_vector", 4, 0.1, 10.0)
            .add_constant("lat_vel", vec![1.5, 2.5])
    }

    #[test]
    fn widths_and_dimension() {
        let space = sample_space();
        assert_eq!(space.flat_width(), 1 + 1 + 1 + 4 + 2);
        assert_eq!(space.dimension(), 1 + 1 + 1 + 4);
    }

    #[test]
    fn samples_respect_bounds_and_order() {
        let space = sample_space();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..200 {
            let values = space.sample(&mut rng);
            let names: Vec<&str> = values.iter().map(|(n, _)| n.as_str()).collect();
            assert_eq!(names, vec!["battery0", "motor0", "arm_length0", "lqr_vector", "lat_vel"]);

            match &values[0].1 {
                ParameterValue::Index(v) => assert!(*v < 3),
                other => panic!("unexpected battery0 value: {other:?}"),
            }
            match &values[1].1 {
                ParameterValue::Index(v) => assert!(*v < 7),
                other => panic!("unexpected motor0 value: {other:?}"),
            }
            match &values[2].1 {
                ParameterValue::Float(v) => assert!(*v >= 50.0 && *v <= 400.0),
                other => panic!("unexpected arm_length0 value: {other:?}"),
            }
            match &values[3].1 {
                ParameterValue::Array(v) => {
                    assert_eq!(v.len(), 4);
                    assert!(v.iter().all(|x| *x >= 0.1 && *x <= 10.0));
                }
                other => panic!("unexpected lqr_vector value: {other:?}"),
            }
            assert_eq!(values[4].1, ParameterValue::Array(vec![1.5, 2.5]));

            let candidate = Candidate {
                ask_id: 0,
                eval_id: None,
                parameters: values,
            };
            assert_eq!(candidate.flatten().len(), space.flat_width());
        }
    }

    #[test]
    fn decode_clamps_boundaries() {
        let space = ParameterSpace::new().add_choice("c", 3).add_scalar("s", -1.0, 1.0);
        let low = space.decode(&[-0.5, -3.0]);
        assert_eq!(low[0].1, ParameterValue::Index(0));
        assert_eq!(low[1].1, ParameterValue::Float(-1.0));

        let high = space.decode(&[1.0, 2.0]);
        assert_eq!(high[0].1, ParameterValue::Index(2));
        assert_eq!(high[1].1, ParameterValue::Float(1.0));
    }

    #[test]
    fn initial_genome_uses_init_or_midpoint() {
        let space = ParameterSpace::new()
            .add(
                "s",
                ParameterSpec::Scalar {
                    lower: 0.0,
                    upper: 10.0,
                    init: Some(2.5),
                },
            )
            .add_vector("v", 2, 0.0, 1.0)
            .add_constant("k", vec![3.0]);
        assert_eq!(space.initial_genome(), vec![0.25, 0.5, 0.5]);

        let decoded = space.decode(&space.initial_genome());
        assert_eq!(decoded[0].1, ParameterValue::Float(2.5));
    }

    #[test]
    fn validation_rejects_bad_spaces() {
        let duplicate = ParameterSpace::new().add_choice("a", 2).add_scalar("a", 0.0, 1.0);
        assert!(matches!(duplicate.validate(), Err(FdmError::Config(_))));

        let inverted = ParameterSpace::new().add_scalar("a", 2.0, 1.0);
        assert!(matches!(inverted.validate(), Err(FdmError::Config(_))));

        let empty_choice = ParameterSpace::new().add_choice("a", 0);
        assert!(empty_choice.validate().is_err());

        let bad_init = ParameterSpace::new().add(
            "v",
            ParameterSpec::Vector {
                length: 2,
                lower: 0.0,
                upper: 1.0,
                init: Some(vec![0.5]),
            },
        );
        assert!(bad_init.validate().is_err());

        assert!(sample_space().validate().is_ok());
    }

    #[test]
    fn named_map_includes_eval_id() {
        let mut candidate = Candidate {
            ask_id: 3,
            eval_id: None,
            parameters: vec![
                ("battery0".to_string(), ParameterValue::Index(2)),
                ("lqr_vector".to_string(), ParameterValue::Array(vec![1.0, 2.0])),
            ],
        };
        assert!(!candidate.to_named_map().contains_key("eval_id"));

        candidate.assign_eval_id(17);
        let map = candidate.to_named_map();
        assert_eq!(map["eval_id"], serde_json::json!(17));
        assert_eq!(map["battery0"], serde_json::json!(2));
        assert_eq!(map["lqr_vector"], serde_json::json!([1.0, 2.0]));
        assert_eq!(candidate.flatten(), vec![2.0, 1.0, 2.0]);
    }
}
