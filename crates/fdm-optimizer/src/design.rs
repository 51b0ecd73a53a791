//! Vehicle design-space schema and the build modes that turn it into a
//! [`ParameterSpace`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use fdm_types::{config_error, BaselineProvider, FdmResult, ObjectiveDirection};

use crate::space::{ParameterSpace, ParameterSpec};

/// Field categories a design space may describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCategory {
    Battery,
    Esc,
    Arm,
    Prop,
    Motor,
    Support,
    WingSupport,
    FlangeSupport,
    Wing,
    Servo,
    ArmLength,
    SupportLength,
    FlangeSupportLength,
    WingOffset,
    WingSpan,
    WingChord,
    #[serde(rename = "LQR")]
    Lqr,
    #[serde(rename = "LQR_1")]
    Lqr1,
    #[serde(rename = "LQR_3")]
    Lqr3,
    #[serde(rename = "LQR_4")]
    Lqr4,
    #[serde(rename = "LQR_5")]
    Lqr5,
    LateralVelocity,
    VerticalVelocity,
}

impl FieldCategory {
    pub fn is_discrete(self) -> bool {
        matches!(
            self,
            Self::Battery
                | Self::Esc
                | Self::Arm
                | Self::Prop
                | Self::Motor
                | Self::Support
                | Self::WingSupport
                | Self::FlangeSupport
                | Self::Wing
                | Self::Servo
        )
    }

    /// Prefix used when emitting one field per index (`battery0`, `arm_length2`, ...).
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Battery => "battery",
            Self::Esc => "esc",
            Self::Arm => "arm",
            Self::Prop => "prop",
            Self::Motor => "motor",
            Self::Support => "support",
            Self::WingSupport => "wing_support",
            Self::FlangeSupport => "flange_support",
            Self::Wing => "wing",
            Self::Servo => "servo",
            Self::ArmLength => "arm_length",
            Self::SupportLength => "support_length",
            Self::FlangeSupportLength => "flange_support_length",
            Self::WingOffset => "wing_offset",
            Self::WingSpan => "wing_span",
            Self::WingChord => "wing_chord",
            Self::Lqr => "lqr_vector",
            Self::Lqr1 => "lqr_vector1",
            Self::Lqr3 => "lqr_vector3",
            Self::Lqr4 => "lqr_vector4",
            Self::Lqr5 => "lqr_vector5",
            Self::LateralVelocity => "lat_vel",
            Self::VerticalVelocity => "vert_vel",
        }
    }
}

const QUAD_DISCRETE: [FieldCategory; 6] = [
    FieldCategory::Battery,
    FieldCategory::Esc,
    FieldCategory::Arm,
    FieldCategory::Prop,
    FieldCategory::Motor,
    FieldCategory::Support,
];

const QUAD_LENGTHS: [FieldCategory; 2] = [FieldCategory::ArmLength, FieldCategory::SupportLength];

const FIXED_WING_DISCRETE: [FieldCategory; 9] = [
    FieldCategory::Battery,
    FieldCategory::Esc,
    FieldCategory::Arm,
    FieldCategory::WingSupport,
    FieldCategory::Prop,
    FieldCategory::Motor,
    FieldCategory::FlangeSupport,
    FieldCategory::Wing,
    FieldCategory::Servo,
];

const FIXED_WING_LENGTHS: [FieldCategory; 5] = [
    FieldCategory::ArmLength,
    FieldCategory::FlangeSupportLength,
    FieldCategory::WingOffset,
    FieldCategory::WingSpan,
    FieldCategory::WingChord,
];

/// One design-space entry: `[count, cardinality]` or `[count, lower, upper]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dimension {
    Discrete(usize, usize),
    Continuous(usize, f64, f64),
}

impl Dimension {
    pub fn count(&self) -> usize {
        match self {
            Self::Discrete(count, _) | Self::Continuous(count, _, _) => *count,
        }
    }
}

/// Declarative description of the vehicle's searchable fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesignSpace {
    pub dimensions: BTreeMap<FieldCategory, Dimension>,
}

impl DesignSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_discrete(mut self, category: FieldCategory, count: usize, cardinality: usize) -> Self {
        self.dimensions.insert(category, Dimension::Discrete(count, cardinality));
        self
    }

    pub fn with_continuous(mut self, category: FieldCategory, count: usize, lower: f64, upper: f64) -> Self {
        self.dimensions
            .insert(category, Dimension::Continuous(count, lower, upper));
        self
    }

    /// Check that every entry's kind matches its category.
    pub fn validate(&self) -> FdmResult<()> {
        for (category, dimension) in &self.dimensions {
            match (category.is_discrete(), dimension) {
                (true, Dimension::Discrete(_, cardinality)) => {
                    if *cardinality == 0 {
                        return Err(config_error!("{:?} needs a cardinality of at least 1", category));
                    }
                }
                (false, Dimension::Continuous(_, lower, upper)) => {
                    if lower > upper {
                        return Err(config_error!(
                            "{:?} has inverted bounds [{}, {}]",
                            category,
                            lower,
                            upper
                        ));
                    }
                }
                (true, _) => {
                    return Err(config_error!("{:?} must be given as [count, cardinality]", category))
                }
                (false, _) => {
                    return Err(config_error!("{:?} must be given as [count, lower, upper]", category))
                }
            }
        }
        Ok(())
    }

    fn discrete(&self, category: FieldCategory) -> FdmResult<(usize, usize)> {
        match self.dimensions.get(&category) {
            Some(Dimension::Discrete(count, cardinality)) => Ok((*count, *cardinality)),
            Some(_) => Err(config_error!("{:?} must be given as [count, cardinality]", category)),
            None => Err(config_error!("Design space is missing {:?}", category)),
        }
    }

    fn continuous(&self, category: FieldCategory) -> FdmResult<(usize, f64, f64)> {
        match self.dimensions.get(&category) {
            Some(Dimension::Continuous(count, lower, upper)) => Ok((*count, *lower, *upper)),
            Some(_) => Err(config_error!("{:?} must be given as [count, lower, upper]", category)),
            None => Err(config_error!("Design space is missing {:?}", category)),
        }
    }

    fn count(&self, category: FieldCategory) -> FdmResult<usize> {
        match self.dimensions.get(&category) {
            Some(dimension) => Ok(dimension.count()),
            None => Err(config_error!("Design space is missing {:?}", category)),
        }
    }

    fn total_count(&self, categories: &[FieldCategory]) -> FdmResult<usize> {
        categories.iter().map(|c| self.count(*c)).sum()
    }
}

/// Gain sub-vector selectable for single-path tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum GainPath {
    One,
    Three,
    Four,
    Five,
}

const GAIN_PATHS: [GainPath; 4] = [GainPath::One, GainPath::Three, GainPath::Four, GainPath::Five];

impl GainPath {
    fn category(self) -> FieldCategory {
        match self {
            Self::One => FieldCategory::Lqr1,
            Self::Three => FieldCategory::Lqr3,
            Self::Four => FieldCategory::Lqr4,
            Self::Five => FieldCategory::Lqr5,
        }
    }
}

impl TryFrom<u8> for GainPath {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            3 => Ok(Self::Three),
            4 => Ok(Self::Four),
            5 => Ok(Self::Five),
            other => Err(format!("no gain path {other}, expected one of 1, 3, 4, 5")),
        }
    }
}

impl From<GainPath> for u8 {
    fn from(path: GainPath) -> Self {
        match path {
            GainPath::One => 1,
            GainPath::Three => 3,
            GainPath::Four => 4,
            GainPath::Five => 5,
        }
    }
}

/// How the design space is turned into a parameter space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BuildMode {
    /// Every quad field is searched.
    FullSearch,
    /// Every fixed-wing field is searched.
    FullSearchFixedWing,
    /// Discrete design fixed from `baseline`, the four gain paths tuned from
    /// `gain_baseline`, velocities fixed.
    WarmStartTrim { baseline: String, gain_baseline: String },
    /// Like [`BuildMode::WarmStartTrim`] with only `path` tunable.
    TuneOnePath {
        baseline: String,
        gain_baseline: String,
        path: GainPath,
    },
    /// Discrete design fixed, continuous fields tuned from `baseline`.
    WarmStart { baseline: String },
    /// Only component choices are searched.
    DiscreteOnly { vehicle: String },
    /// Choices and lengths searched with default gains.
    TrimOnly,
    /// Choices searched with the vehicle's default lengths and gains.
    TrimDiscreteOnly { vehicle: String },
    /// Only lengths searched on a fixed discrete design.
    TrimArmOnly { baseline: String },
    /// Only the four gain paths are searched.
    UseExisting {
        lateral_velocity: Vec<f64>,
        vertical_velocity: Vec<f64>,
    },
}

impl BuildMode {
    /// Trim modes minimize the raw score sum; everything else maximizes.
    ///
    /// The direction applies to both the loss reported to the optimizer and
    /// the best score logged for the run. `TrimArmOnly` therefore reports the
    /// plain sum rather than `offset - sum`, keeping its search and its logged
    /// best pointed the same way.
    pub fn default_direction(&self) -> ObjectiveDirection {
        match self {
            Self::TrimOnly | Self::TrimDiscreteOnly { .. } | Self::TrimArmOnly { .. } => {
                ObjectiveDirection::Minimize
            }
            _ => ObjectiveDirection::Maximize,
        }
    }

    /// Baseline names this mode reads.
    pub fn required_baselines(&self) -> Vec<String> {
        let defaults = || {
            vec![
                "default_lqr".to_string(),
                "default_latvel".to_string(),
                "default_vertvel".to_string(),
            ]
        };
        match self {
            Self::FullSearch | Self::FullSearchFixedWing | Self::UseExisting { .. } => Vec::new(),
            Self::WarmStartTrim {
                baseline,
                gain_baseline,
            }
            | Self::TuneOnePath {
                baseline,
                gain_baseline,
                ..
            } => {
                let gains = GainBaselines::names(gain_baseline);
                vec![baseline.clone(), gains.lqr, gains.latvel, gains.vertvel]
            }
            Self::WarmStart { baseline } => vec![baseline.clone()],
            Self::DiscreteOnly { vehicle } | Self::TrimDiscreteOnly { vehicle } => {
                let mut names = vec![
                    format!("{vehicle}_arm_lengths"),
                    format!("{vehicle}_support_lengths"),
                ];
                names.extend(defaults());
                names
            }
            Self::TrimOnly => defaults(),
            Self::TrimArmOnly { baseline } => {
                let mut names = vec![baseline.clone()];
                names.extend(defaults());
                names
            }
        }
    }

    pub fn build(&self, design: &DesignSpace, baselines: &dyn BaselineProvider) -> FdmResult<ParameterSpace> {
        build_space(design, self, baselines)
    }
}

struct GainBaselines {
    lqr: String,
    latvel: String,
    vertvel: String,
}

impl GainBaselines {
    fn names(prefix: &str) -> Self {
        Self {
            lqr: format!("{prefix}_lqr"),
            latvel: format!("{prefix}_latvel"),
            vertvel: format!("{prefix}_vertvel"),
        }
    }
}

/// A design baseline split along `[discrete, lengths, LQR, lateral, vertical]`.
struct DesignBaseline {
    discrete: Vec<f64>,
    lengths: Vec<f64>,
    lqr: Vec<f64>,
    lateral: Vec<f64>,
    vertical: Vec<f64>,
}

impl DesignBaseline {
    fn load(design: &DesignSpace, baselines: &dyn BaselineProvider, name: &str) -> FdmResult<Self> {
        let values = baselines.get(name)?;

        let num_discrete = design.total_count(&QUAD_DISCRETE)?;
        let num_lengths = design.total_count(&QUAD_LENGTHS)?;
        let num_lqr = design.count(FieldCategory::Lqr)?;
        let num_lateral = design.count(FieldCategory::LateralVelocity)?;
        let num_vertical = design.count(FieldCategory::VerticalVelocity)?;

        let expected = num_discrete + num_lengths + num_lqr + num_lateral + num_vertical;
        if values.len() != expected {
            return Err(config_error!(
                "Baseline {} has {} values, design space needs {}",
                name,
                values.len(),
                expected
            ));
        }

        let mut rest = values.as_slice();
        let mut take = |n: usize| {
            let (head, tail) = rest.split_at(n);
            rest = tail;
            head.to_vec()
        };

        let discrete = truncate_choices(design, name, &take(num_discrete))?;
        Ok(Self {
            discrete,
            lengths: take(num_lengths),
            lqr: take(num_lqr),
            lateral: take(num_lateral),
            vertical: take(num_vertical),
        })
    }

    /// Discrete indices followed by the raw lengths.
    fn discrete_with_lengths(&self) -> Vec<f64> {
        let mut values = self.discrete.clone();
        values.extend_from_slice(&self.lengths);
        values
    }
}

/// Truncate baseline discrete values to indices and check them against the
/// cardinality of the field they land on.
fn truncate_choices(design: &DesignSpace, name: &str, values: &[f64]) -> FdmResult<Vec<f64>> {
    let mut out = Vec::with_capacity(values.len());
    let mut iter = values.iter();
    for category in QUAD_DISCRETE {
        let (count, cardinality) = design.discrete(category)?;
        for i in 0..count {
            let raw = iter
                .next()
                .ok_or_else(|| config_error!("Baseline {} is too short for {:?}", name, category))?;
            let index = raw.trunc();
            if index < 0.0 || index >= cardinality as f64 {
                return Err(config_error!(
                    "Baseline {} sets {}{} to {}, outside [0, {})",
                    name,
                    category.prefix(),
                    i,
                    raw,
                    cardinality
                ));
            }
            out.push(index);
        }
    }
    Ok(out)
}

fn expect_len(name: &str, values: Vec<f64>, expected: usize) -> FdmResult<Vec<f64>> {
    if values.len() != expected {
        return Err(config_error!(
            "Baseline {} has {} values, expected {}",
            name,
            values.len(),
            expected
        ));
    }
    Ok(values)
}

fn push_choices(space: &mut ParameterSpace, design: &DesignSpace, categories: &[FieldCategory]) -> FdmResult<()> {
    for category in categories {
        let (count, cardinality) = design.discrete(*category)?;
        for i in 0..count {
            space.push(format!("{}{}", category.prefix(), i), ParameterSpec::Choice { cardinality });
        }
    }
    Ok(())
}

/// One scalar per index for each category; `init` (when given) covers all of
/// them in order.
fn push_scalars(
    space: &mut ParameterSpace,
    design: &DesignSpace,
    categories: &[FieldCategory],
    init: Option<&[f64]>,
) -> FdmResult<()> {
    let mut offset = 0;
    for category in categories {
        let (count, lower, upper) = design.continuous(*category)?;
        for i in 0..count {
            let init = init.and_then(|values| values.get(offset).copied());
            space.push(
                format!("{}{}", category.prefix(), i),
                ParameterSpec::Scalar { lower, upper, init },
            );
            offset += 1;
        }
    }
    Ok(())
}

fn push_vector(
    space: &mut ParameterSpace,
    design: &DesignSpace,
    category: FieldCategory,
    init: Option<Vec<f64>>,
) -> FdmResult<()> {
    let (length, lower, upper) = design.continuous(category)?;
    space.push(
        category.prefix(),
        ParameterSpec::Vector {
            length,
            lower,
            upper,
            init,
        },
    );
    Ok(())
}

/// Gain vectors, lateral and vertical velocities from a gain baseline.
struct GainSet {
    paths: Vec<(GainPath, Vec<f64>)>,
    lateral: Vec<f64>,
    vertical: Vec<f64>,
}

impl GainSet {
    fn load(design: &DesignSpace, baselines: &dyn BaselineProvider, prefix: &str) -> FdmResult<Self> {
        let names = GainBaselines::names(prefix);

        let mut lengths = Vec::with_capacity(GAIN_PATHS.len());
        for path in GAIN_PATHS {
            lengths.push(design.count(path.category())?);
        }
        let lqr = expect_len(&names.lqr, baselines.get(&names.lqr)?, lengths.iter().sum())?;

        let mut offset = 0;
        let paths = GAIN_PATHS
            .iter()
            .zip(lengths)
            .map(|(path, len)| {
                let slice = lqr[offset..offset + len].to_vec();
                offset += len;
                (*path, slice)
            })
            .collect();

        let lateral = expect_len(
            &names.latvel,
            baselines.get(&names.latvel)?,
            design.count(FieldCategory::LateralVelocity)?,
        )?;
        let vertical = expect_len(
            &names.vertvel,
            baselines.get(&names.vertvel)?,
            design.count(FieldCategory::VerticalVelocity)?,
        )?;

        Ok(Self {
            paths,
            lateral,
            vertical,
        })
    }
}

/// Default gains and velocities: `default_lqr ++ default_latvel ++ default_vertvel`.
fn default_gains(design: &DesignSpace, baselines: &dyn BaselineProvider) -> FdmResult<Vec<f64>> {
    let mut values = expect_len(
        "default_lqr",
        baselines.get("default_lqr")?,
        design.count(FieldCategory::Lqr)?,
    )?;
    values.extend(expect_len(
        "default_latvel",
        baselines.get("default_latvel")?,
        design.count(FieldCategory::LateralVelocity)?,
    )?);
    values.extend(expect_len(
        "default_vertvel",
        baselines.get("default_vertvel")?,
        design.count(FieldCategory::VerticalVelocity)?,
    )?);
    Ok(values)
}

/// The vehicle's default lengths followed by the default gains.
fn vehicle_defaults(design: &DesignSpace, baselines: &dyn BaselineProvider, vehicle: &str) -> FdmResult<Vec<f64>> {
    let arm_name = format!("{vehicle}_arm_lengths");
    let support_name = format!("{vehicle}_support_lengths");

    let mut values = expect_len(
        &arm_name,
        baselines.get(&arm_name)?,
        design.count(FieldCategory::ArmLength)?,
    )?;
    values.extend(expect_len(
        &support_name,
        baselines.get(&support_name)?,
        design.count(FieldCategory::SupportLength)?,
    )?);
    values.extend(default_gains(design, baselines)?);
    Ok(values)
}

/// Build the parameter space for `mode`.
///
/// Fails with a configuration error when a required category or baseline is
/// missing, a baseline has the wrong length, or any bounds are inverted.
pub fn build_space(
    design: &DesignSpace,
    mode: &BuildMode,
    baselines: &dyn BaselineProvider,
) -> FdmResult<ParameterSpace> {
    design.validate()?;
    let mut space = ParameterSpace::new();

    match mode {
        BuildMode::FullSearch => {
            push_choices(&mut space, design, &QUAD_DISCRETE)?;
            push_scalars(&mut space, design, &QUAD_LENGTHS, None)?;
            push_vector(&mut space, design, FieldCategory::Lqr, None)?;
            push_vector(&mut space, design, FieldCategory::LateralVelocity, None)?;
            push_vector(&mut space, design, FieldCategory::VerticalVelocity, None)?;
        }
        BuildMode::FullSearchFixedWing => {
            push_choices(&mut space, design, &FIXED_WING_DISCRETE)?;
            push_scalars(&mut space, design, &FIXED_WING_LENGTHS, None)?;
            push_vector(&mut space, design, FieldCategory::Lqr, None)?;
            push_vector(&mut space, design, FieldCategory::LateralVelocity, None)?;
            push_vector(&mut space, design, FieldCategory::VerticalVelocity, None)?;
        }
        BuildMode::WarmStartTrim {
            baseline,
            gain_baseline,
        } => {
            let base = DesignBaseline::load(design, baselines, baseline)?;
            let gains = GainSet::load(design, baselines, gain_baseline)?;

            space.push("discrete_baseline", ParameterSpec::Constant { value: base.discrete_with_lengths() });
            for (path, init) in gains.paths {
                push_vector(&mut space, design, path.category(), Some(init))?;
            }
            space.push("lat_vel", ParameterSpec::Constant { value: gains.lateral });
            space.push("vert_vel", ParameterSpec::Constant { value: gains.vertical });
        }
        BuildMode::TuneOnePath {
            baseline,
            gain_baseline,
            path: tuned,
        } => {
            let base = DesignBaseline::load(design, baselines, baseline)?;
            let gains = GainSet::load(design, baselines, gain_baseline)?;

            space.push("discrete_baseline", ParameterSpec::Constant { value: base.discrete_with_lengths() });
            for (path, value) in gains.paths {
                if path == *tuned {
                    push_vector(&mut space, design, path.category(), None)?;
                } else {
                    space.push(path.category().prefix(), ParameterSpec::Constant { value });
                }
            }
            space.push("lat_vel", ParameterSpec::Constant { value: gains.lateral });
            space.push("vert_vel", ParameterSpec::Constant { value: gains.vertical });
        }
        BuildMode::WarmStart { baseline } => {
            let base = DesignBaseline::load(design, baselines, baseline)?;

            push_scalars(&mut space, design, &QUAD_LENGTHS, Some(&base.lengths))?;
            push_vector(&mut space, design, FieldCategory::Lqr, Some(base.lqr))?;
            push_vector(&mut space, design, FieldCategory::LateralVelocity, Some(base.lateral))?;
            push_vector(&mut space, design, FieldCategory::VerticalVelocity, Some(base.vertical))?;
            space.push("discrete_baseline", ParameterSpec::Constant { value: base.discrete });
        }
        BuildMode::DiscreteOnly { vehicle } => {
            push_choices(&mut space, design, &QUAD_DISCRETE)?;
            space.push(
                "continuous_baseline",
                ParameterSpec::Constant {
                    value: vehicle_defaults(design, baselines, vehicle)?,
                },
            );
        }
        BuildMode::TrimOnly => {
            push_choices(&mut space, design, &QUAD_DISCRETE)?;
            push_scalars(&mut space, design, &QUAD_LENGTHS, None)?;
            space.push(
                "trim_baseline",
                ParameterSpec::Constant {
                    value: default_gains(design, baselines)?,
                },
            );
        }
        BuildMode::TrimDiscreteOnly { vehicle } => {
            push_choices(&mut space, design, &QUAD_DISCRETE)?;
            space.push(
                "trim_discrete_baseline",
                ParameterSpec::Constant {
                    value: vehicle_defaults(design, baselines, vehicle)?,
                },
            );
        }
        BuildMode::TrimArmOnly { baseline } => {
            let base = DesignBaseline::load(design, baselines, baseline)?;

            space.push("discrete_baseline", ParameterSpec::Constant { value: base.discrete });
            push_scalars(&mut space, design, &QUAD_LENGTHS, None)?;
            space.push(
                "trim_discrete_baseline",
                ParameterSpec::Constant {
                    value: default_gains(design, baselines)?,
                },
            );
        }
        BuildMode::UseExisting {
            lateral_velocity,
            vertical_velocity,
        } => {
            for path in GAIN_PATHS {
                push_vector(&mut space, design, path.category(), None)?;
            }
            space.push("lat_vel", ParameterSpec::Constant { value: lateral_velocity.clone() });
            space.push("vert_vel", ParameterSpec::Constant { value: vertical_velocity.clone() });
        }
    }

    space.validate()?;
    tracing::debug!(
        fields = space.len(),
        dimension = space.dimension(),
        "Built parameter space for {:?}",
        mode
    );
    Ok(space)
}
