//! Treatment protocol: pulse timing, focal pattern, beamforming methods and
//! safety constraints.
//!
//! Methods and patterns are closed enums. They are read from JSON records of
//! the form `{"method": "<name>", <numeric params>...}` so an unknown method
//! name is rejected with [`PlanningError::UnsupportedMethod`] when the
//! protocol is loaded, not when it is used.
//!
//! Constraints are keyed by [`SafetyQuantity`] and carry an explicit
//! [`ConstraintRule`] per severity tier. [`Protocol::validate`] checks that
//! every rule fits the kind of quantity it constrains and that no quantity is
//! constrained twice.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{AnatomicalDirection, LengthUnit, PlanResult, PlanningError, Real};

// ─────────────────────────────────────────────────────────────────────────────
// Pulse and sequence
// ─────────────────────────────────────────────────────────────────────────────

/// Acoustic pulse driven on every element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pulse {
    pub frequency_hz: Real,
    pub duration_s: Real,
    /// Drive level as a fraction of the maximum (0..=1).
    pub amplitude: Real,
}

impl Default for Pulse {
    fn default() -> Self {
        Self {
            frequency_hz: 400e3,
            duration_s: 20e-3,
            amplitude: 1.0,
        }
    }
}

/// Pulse repetition within one sonication.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub pulse_interval_s: Real,
    pub pulse_count: u32,
    /// Interval between pulse trains; 0 means a single train.
    pub pulse_train_interval_s: Real,
    pub pulse_train_count: u32,
}

impl Default for Sequence {
    fn default() -> Self {
        Self {
            pulse_interval_s: 100e-3,
            pulse_count: 10,
            pulse_train_interval_s: 1.0,
            pulse_train_count: 1,
        }
    }
}

impl Sequence {
    /// Time-averaged fraction of time the beam is on.
    pub fn duty_cycle(&self, pulse: &Pulse) -> Real {
        let pulse_duty = (pulse.duration_s / self.pulse_interval_s).min(1.0);
        let train_duty = if self.pulse_train_interval_s > 0.0 {
            (self.pulse_count as Real * self.pulse_interval_s / self.pulse_train_interval_s)
                .min(1.0)
        } else {
            1.0
        };
        pulse_duty * train_duty
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Focal pattern
// ─────────────────────────────────────────────────────────────────────────────

/// Rule expanding one target into the points that are sonicated.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FocalPattern {
    #[default]
    SinglePoint,
    /// Optional centre plus `num_spokes` points on a circle around the target.
    Wheel {
        include_center: bool,
        num_spokes: u32,
        spoke_radius_mm: Real,
    },
}

impl FocalPattern {
    /// Pattern parameters must be finite and positive.
    pub fn validate(&self) -> PlanResult<()> {
        match *self {
            FocalPattern::SinglePoint => Ok(()),
            FocalPattern::Wheel {
                num_spokes,
                spoke_radius_mm,
                ..
            } => {
                if num_spokes < 1 {
                    return Err(PlanningError::InvalidPattern(format!(
                        "wheel needs at least one spoke, got {num_spokes}"
                    )));
                }
                if !(spoke_radius_mm.is_finite() && spoke_radius_mm > 0.0) {
                    return Err(PlanningError::InvalidPattern(format!(
                        "spoke radius must be positive, got {spoke_radius_mm}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Number of focal points this pattern expands to.
    pub fn num_points(&self) -> usize {
        match *self {
            FocalPattern::SinglePoint => 1,
            FocalPattern::Wheel {
                include_center,
                num_spokes,
                ..
            } => num_spokes as usize + usize::from(include_center),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Methods
// ─────────────────────────────────────────────────────────────────────────────

/// Wire form shared by the method enums.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MethodRecord {
    method: String,
    #[serde(flatten)]
    params: BTreeMap<String, Real>,
}

fn method_key(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn reject_unknown_params(
    method: &str,
    params: &BTreeMap<String, Real>,
    allowed: &[&str],
) -> PlanResult<()> {
    match params.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(k) => Err(PlanningError::InvalidInput(format!(
            "unknown parameter '{k}' for method '{method}'"
        ))),
        None => Ok(()),
    }
}

pub const DEFAULT_SPEED_OF_SOUND_M_S: Real = 1500.0;

/// Per-element delay rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MethodRecord", into = "MethodRecord")]
pub enum DelayMethod {
    /// Geometric time of flight through a homogeneous medium.
    Direct { speed_of_sound_m_s: Real },
}

impl Default for DelayMethod {
    fn default() -> Self {
        DelayMethod::Direct {
            speed_of_sound_m_s: DEFAULT_SPEED_OF_SOUND_M_S,
        }
    }
}

impl DelayMethod {
    /// Rejects a non-positive speed of sound.
    pub fn validate(&self) -> PlanResult<()> {
        match *self {
            DelayMethod::Direct { speed_of_sound_m_s } => {
                if !(speed_of_sound_m_s.is_finite() && speed_of_sound_m_s > 0.0) {
                    return Err(PlanningError::InvalidInput(format!(
                        "speed of sound must be positive, got {speed_of_sound_m_s}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Name used in records and messages.
    pub fn name(&self) -> &'static str {
        match self {
            DelayMethod::Direct { .. } => "direct",
        }
    }
}

impl TryFrom<MethodRecord> for DelayMethod {
    type Error = PlanningError;

    fn try_from(rec: MethodRecord) -> Result<Self, Self::Error> {
        match method_key(&rec.method).as_str() {
            "direct" => {
                reject_unknown_params(&rec.method, &rec.params, &["speed_of_sound_m_s"])?;
                Ok(DelayMethod::Direct {
                    speed_of_sound_m_s: rec
                        .params
                        .get("speed_of_sound_m_s")
                        .copied()
                        .unwrap_or(DEFAULT_SPEED_OF_SOUND_M_S),
                })
            }
            _ => Err(PlanningError::UnsupportedMethod(format!(
                "delay method '{}'",
                rec.method
            ))),
        }
    }
}

impl From<DelayMethod> for MethodRecord {
    fn from(m: DelayMethod) -> Self {
        let mut params = BTreeMap::new();
        match m {
            DelayMethod::Direct { speed_of_sound_m_s } => {
                params.insert("speed_of_sound_m_s".to_string(), speed_of_sound_m_s);
            }
        }
        MethodRecord {
            method: m.name().to_string(),
            params,
        }
    }
}

impl FromStr for DelayMethod {
    type Err = PlanningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DelayMethod::try_from(MethodRecord {
            method: s.to_string(),
            params: BTreeMap::new(),
        })
    }
}

/// Per-element amplitude weighting rule.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "MethodRecord", into = "MethodRecord")]
pub enum ApodizationMethod {
    #[default]
    Uniform,
    /// Elements whose normal is more than `max_angle_deg` off the focus are
    /// switched off.
    MaxAngle { max_angle_deg: Real },
    /// Full weight below `rolloff_start_deg`, linear taper to zero at
    /// `rolloff_end_deg`.
    PiecewiseLinear {
        rolloff_start_deg: Real,
        rolloff_end_deg: Real,
    },
}

impl ApodizationMethod {
    /// Checks the angle limits.
    pub fn validate(&self) -> PlanResult<()> {
        match *self {
            ApodizationMethod::Uniform => Ok(()),
            ApodizationMethod::MaxAngle { max_angle_deg } => {
                if !(max_angle_deg > 0.0 && max_angle_deg <= 180.0) {
                    return Err(PlanningError::InvalidInput(format!(
                        "max angle must be in (0, 180], got {max_angle_deg}"
                    )));
                }
                Ok(())
            }
            ApodizationMethod::PiecewiseLinear {
                rolloff_start_deg,
                rolloff_end_deg,
            } => {
                if !(rolloff_start_deg >= 0.0 && rolloff_end_deg > rolloff_start_deg) {
                    return Err(PlanningError::InvalidInput(format!(
                        "rolloff must satisfy 0 <= start < end, got {rolloff_start_deg}..{rolloff_end_deg}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Name used in records and messages.
    pub fn name(&self) -> &'static str {
        match self {
            ApodizationMethod::Uniform => "uniform",
            ApodizationMethod::MaxAngle { .. } => "max_angle",
            ApodizationMethod::PiecewiseLinear { .. } => "piecewise_linear",
        }
    }
}

impl TryFrom<MethodRecord> for ApodizationMethod {
    type Error = PlanningError;

    fn try_from(rec: MethodRecord) -> Result<Self, Self::Error> {
        let get = |key: &str, default: Real| rec.params.get(key).copied().unwrap_or(default);
        match method_key(&rec.method).as_str() {
            "uniform" => {
                reject_unknown_params(&rec.method, &rec.params, &[])?;
                Ok(ApodizationMethod::Uniform)
            }
            "maxangle" => {
                reject_unknown_params(&rec.method, &rec.params, &["max_angle_deg"])?;
                Ok(ApodizationMethod::MaxAngle {
                    max_angle_deg: get("max_angle_deg", 30.0),
                })
            }
            "piecewiselinear" => {
                reject_unknown_params(
                    &rec.method,
                    &rec.params,
                    &["rolloff_start_deg", "rolloff_end_deg"],
                )?;
                Ok(ApodizationMethod::PiecewiseLinear {
                    rolloff_start_deg: get("rolloff_start_deg", 15.0),
                    rolloff_end_deg: get("rolloff_end_deg", 30.0),
                })
            }
            _ => Err(PlanningError::UnsupportedMethod(format!(
                "apodization method '{}'",
                rec.method
            ))),
        }
    }
}

impl From<ApodizationMethod> for MethodRecord {
    fn from(m: ApodizationMethod) -> Self {
        let mut params = BTreeMap::new();
        match m {
            ApodizationMethod::Uniform => {}
            ApodizationMethod::MaxAngle { max_angle_deg } => {
                params.insert("max_angle_deg".to_string(), max_angle_deg);
            }
            ApodizationMethod::PiecewiseLinear {
                rolloff_start_deg,
                rolloff_end_deg,
            } => {
                params.insert("rolloff_start_deg".to_string(), rolloff_start_deg);
                params.insert("rolloff_end_deg".to_string(), rolloff_end_deg);
            }
        }
        MethodRecord {
            method: m.name().to_string(),
            params,
        }
    }
}

impl FromStr for ApodizationMethod {
    type Err = PlanningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApodizationMethod::try_from(MethodRecord {
            method: s.to_string(),
            params: BTreeMap::new(),
        })
    }
}

/// Acoustic medium model used by the field estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SegmentationMethod {
    /// Homogeneous water.
    #[default]
    Water,
    /// Homogeneous soft tissue.
    Tissue,
    /// Voxel-wise media from a segmented volume.
    Segmented,
}

impl SegmentationMethod {
    /// Name used in records and messages.
    pub fn name(&self) -> &'static str {
        match self {
            SegmentationMethod::Water => "water",
            SegmentationMethod::Tissue => "tissue",
            SegmentationMethod::Segmented => "segmented",
        }
    }
}

impl FromStr for SegmentationMethod {
    type Err = PlanningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match method_key(s).as_str() {
            "water" => Ok(SegmentationMethod::Water),
            "tissue" => Ok(SegmentationMethod::Tissue),
            "segmented" => Ok(SegmentationMethod::Segmented),
            _ => Err(PlanningError::UnsupportedMethod(format!(
                "segmentation method '{s}'"
            ))),
        }
    }
}

impl TryFrom<String> for SegmentationMethod {
    type Error = PlanningError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SegmentationMethod> for String {
    fn from(value: SegmentationMethod) -> Self {
        value.name().to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Constraints
// ─────────────────────────────────────────────────────────────────────────────

/// Quantities the safety validator knows how to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyQuantity {
    /// Peak focal pressure (MPa).
    PeakPressure,
    /// Mechanical index.
    MechanicalIndex,
    /// Spatial-peak pulse-average intensity (W/cm²).
    Isppa,
    /// Spatial-peak time-average intensity (W/cm²).
    Ispta,
    /// Distance from the transducer origin to the focal point (mm).
    FocalDistance,
    /// Angle between the transducer axis and the focal direction (deg).
    SteeringAngle,
    /// Distance from the target to the nearest skin vertex (mm).
    TargetSkinDistance,
    /// Largest minus smallest element delay (µs).
    DelaySpan,
    /// Fraction of elements with non-zero apodization.
    ActiveElementFraction,
    /// Whether the focal point lies in front of the transducer face.
    FocusAhead,
}

/// Whether a quantity is numeric or boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityKind {
    Scalar,
    Flag,
}

impl SafetyQuantity {
    pub const ALL: [SafetyQuantity; 10] = [
        SafetyQuantity::PeakPressure,
        SafetyQuantity::MechanicalIndex,
        SafetyQuantity::Isppa,
        SafetyQuantity::Ispta,
        SafetyQuantity::FocalDistance,
        SafetyQuantity::SteeringAngle,
        SafetyQuantity::TargetSkinDistance,
        SafetyQuantity::DelaySpan,
        SafetyQuantity::ActiveElementFraction,
        SafetyQuantity::FocusAhead,
    ];

    /// Scalar or flag.
    pub fn kind(self) -> QuantityKind {
        match self {
            SafetyQuantity::FocusAhead => QuantityKind::Flag,
            _ => QuantityKind::Scalar,
        }
    }

    /// Unit symbol used in findings.
    pub fn unit(self) -> &'static str {
        match self {
            SafetyQuantity::PeakPressure => "MPa",
            SafetyQuantity::MechanicalIndex => "",
            SafetyQuantity::Isppa | SafetyQuantity::Ispta => "W/cm²",
            SafetyQuantity::FocalDistance | SafetyQuantity::TargetSkinDistance => "mm",
            SafetyQuantity::SteeringAngle => "deg",
            SafetyQuantity::DelaySpan => "µs",
            SafetyQuantity::ActiveElementFraction => "",
            SafetyQuantity::FocusAhead => "",
        }
    }
}

impl fmt::Display for SafetyQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SafetyQuantity::PeakPressure => "peak_pressure",
            SafetyQuantity::MechanicalIndex => "mechanical_index",
            SafetyQuantity::Isppa => "isppa",
            SafetyQuantity::Ispta => "ispta",
            SafetyQuantity::FocalDistance => "focal_distance",
            SafetyQuantity::SteeringAngle => "steering_angle",
            SafetyQuantity::TargetSkinDistance => "target_skin_distance",
            SafetyQuantity::DelaySpan => "delay_span",
            SafetyQuantity::ActiveElementFraction => "active_element_fraction",
            SafetyQuantity::FocusAhead => "focus_ahead",
        };
        f.write_str(s)
    }
}

/// An observed value of a safety quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Observation {
    Scalar(Real),
    Flag(bool),
}

impl Observation {
    pub fn as_scalar(&self) -> Option<Real> {
        match *self {
            Observation::Scalar(v) => Some(v),
            Observation::Flag(_) => None,
        }
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observation::Scalar(v) => write!(f, "{v:.4}"),
            Observation::Flag(b) => write!(f, "{b}"),
        }
    }
}

fn default_inclusive() -> bool {
    true
}

/// Allowed values for a constrained quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ConstraintRule {
    /// Interval with optional open ends.
    Range {
        #[serde(default)]
        min: Option<Real>,
        #[serde(default)]
        max: Option<Real>,
        #[serde(default = "default_inclusive")]
        inclusive: bool,
    },
    /// Value must equal one of the listed values.
    OneOf { values: Vec<Real> },
    /// Boolean quantity must equal `expected`.
    Flag { expected: bool },
}

/// Relative tolerance for set membership.
const ONE_OF_TOLERANCE: Real = 1e-9;

impl ConstraintRule {
    /// Check the rule is well-formed and applicable to `quantity`.
    pub fn validate_for(&self, quantity: SafetyQuantity) -> PlanResult<()> {
        let kind = quantity.kind();
        match self {
            ConstraintRule::Range { min, max, .. } => {
                if kind != QuantityKind::Scalar {
                    return Err(PlanningError::InvalidConstraint(format!(
                        "range rule cannot constrain boolean quantity {quantity}"
                    )));
                }
                if min.is_none() && max.is_none() {
                    return Err(PlanningError::InvalidConstraint(format!(
                        "range rule for {quantity} has neither min nor max"
                    )));
                }
                if let (Some(lo), Some(hi)) = (min, max)
                    && lo > hi
                {
                    return Err(PlanningError::InvalidConstraint(format!(
                        "range rule for {quantity} has min {lo} > max {hi}"
                    )));
                }
                if min.iter().chain(max.iter()).any(|v| v.is_nan()) {
                    return Err(PlanningError::InvalidConstraint(format!(
                        "range rule for {quantity} has NaN bounds"
                    )));
                }
                Ok(())
            }
            ConstraintRule::OneOf { values } => {
                if kind != QuantityKind::Scalar {
                    return Err(PlanningError::InvalidConstraint(format!(
                        "set rule cannot constrain boolean quantity {quantity}"
                    )));
                }
                if values.is_empty() {
                    return Err(PlanningError::InvalidConstraint(format!(
                        "set rule for {quantity} is empty"
                    )));
                }
                Ok(())
            }
            ConstraintRule::Flag { .. } => {
                if kind != QuantityKind::Flag {
                    return Err(PlanningError::InvalidConstraint(format!(
                        "flag rule cannot constrain numeric quantity {quantity}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// True if `observed` satisfies the rule. Mismatched kinds never satisfy.
    pub fn admits(&self, observed: &Observation) -> bool {
        match (self, observed) {
            (
                ConstraintRule::Range {
                    min,
                    max,
                    inclusive,
                },
                Observation::Scalar(v),
            ) => {
                if v.is_nan() {
                    return false;
                }
                let above = match min {
                    Some(lo) if *inclusive => v >= lo,
                    Some(lo) => v > lo,
                    None => true,
                };
                let below = match max {
                    Some(hi) if *inclusive => v <= hi,
                    Some(hi) => v < hi,
                    None => true,
                };
                above && below
            }
            (ConstraintRule::OneOf { values }, Observation::Scalar(v)) => values
                .iter()
                .any(|x| (x - v).abs() <= ONE_OF_TOLERANCE * x.abs().max(1.0)),
            (ConstraintRule::Flag { expected }, Observation::Flag(b)) => expected == b,
            _ => false,
        }
    }
}

impl fmt::Display for ConstraintRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintRule::Range {
                min,
                max,
                inclusive,
            } => {
                let (open, close) = if *inclusive { ('[', ']') } else { ('(', ')') };
                let lo = min.map_or("-inf".to_string(), |v| format!("{v}"));
                let hi = max.map_or("+inf".to_string(), |v| format!("{v}"));
                write!(f, "{open}{lo}, {hi}{close}")
            }
            ConstraintRule::OneOf { values } => {
                let items: Vec<String> = values.iter().map(|v| format!("{v}")).collect();
                write!(f, "{{{}}}", items.join(", "))
            }
            ConstraintRule::Flag { expected } => write!(f, "== {expected}"),
        }
    }
}

/// Two-tier constraint on one quantity.
///
/// Violating `error` is fatal; violating only `warning` needs operator
/// acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterConstraint {
    pub quantity: SafetyQuantity,
    #[serde(default)]
    pub warning: Option<ConstraintRule>,
    #[serde(default)]
    pub error: Option<ConstraintRule>,
}

impl ParameterConstraint {
    /// Needs at least one rule, each valid for the quantity.
    pub fn validate(&self) -> PlanResult<()> {
        if self.warning.is_none() && self.error.is_none() {
            return Err(PlanningError::InvalidConstraint(format!(
                "constraint on {} has no rule",
                self.quantity
            )));
        }
        for rule in self.warning.iter().chain(self.error.iter()) {
            rule.validate_for(self.quantity)?;
        }
        Ok(())
    }
}

/// Allowed range of the target position along one anatomical direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConstraint {
    pub direction: AnatomicalDirection,
    #[serde(default)]
    pub units: LengthUnit,
    pub min: Real,
    pub max: Real,
}

impl TargetConstraint {
    /// Both limits must be finite and ordered.
    pub fn validate(&self) -> PlanResult<()> {
        if !(self.min.is_finite() && self.max.is_finite() && self.min <= self.max) {
            return Err(PlanningError::InvalidConstraint(format!(
                "target constraint along {:?} needs finite min <= max, got {}..{}",
                self.direction, self.min, self.max
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Protocol
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable treatment protocol snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pulse: Pulse,
    #[serde(default)]
    pub sequence: Sequence,
    #[serde(default)]
    pub focal_pattern: FocalPattern,
    #[serde(default)]
    pub delay_method: DelayMethod,
    #[serde(default)]
    pub apodization_method: ApodizationMethod,
    #[serde(default)]
    pub segmentation_method: SegmentationMethod,
    #[serde(default)]
    pub parameter_constraints: Vec<ParameterConstraint>,
    #[serde(default)]
    pub target_constraints: Vec<TargetConstraint>,
}

impl Protocol {
    /// Protocol with the default pulse, sequence and methods and no constraints.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            pulse: Pulse::default(),
            sequence: Sequence::default(),
            focal_pattern: FocalPattern::default(),
            delay_method: DelayMethod::default(),
            apodization_method: ApodizationMethod::default(),
            segmentation_method: SegmentationMethod::default(),
            parameter_constraints: Vec::new(),
            target_constraints: Vec::new(),
        }
    }

    /// Load-time validation of every part of the protocol.
    pub fn validate(&self) -> PlanResult<()> {
        self.focal_pattern.validate()?;
        self.delay_method.validate()?;
        self.apodization_method.validate()?;

        let p = &self.pulse;
        if !(p.frequency_hz > 0.0 && p.duration_s > 0.0) {
            return Err(PlanningError::InvalidInput(
                "pulse frequency and duration must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&p.amplitude) {
            return Err(PlanningError::InvalidInput(format!(
                "pulse amplitude must be within [0, 1], got {}",
                p.amplitude
            )));
        }
        let s = &self.sequence;
        if !(s.pulse_interval_s >= p.duration_s && s.pulse_count >= 1) {
            return Err(PlanningError::InvalidInput(
                "sequence needs at least one pulse and an interval >= pulse duration".into(),
            ));
        }
        if s.pulse_train_interval_s < 0.0 {
            return Err(PlanningError::InvalidInput(
                "pulse train interval cannot be negative".into(),
            ));
        }

        let mut seen = BTreeSet::new();
        for c in &self.parameter_constraints {
            c.validate()?;
            if !seen.insert(c.quantity) {
                return Err(PlanningError::InvalidConstraint(format!(
                    "duplicate constraint on {}",
                    c.quantity
                )));
            }
        }
        for c in &self.target_constraints {
            c.validate()?;
        }
        Ok(())
    }

    /// First constraint on `quantity`, if the protocol limits it.
    pub fn constraint_for(&self, quantity: SafetyQuantity) -> Option<&ParameterConstraint> {
        self.parameter_constraints
            .iter()
            .find(|c| c.quantity == quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wheel_validation() {
        let bad_spokes = FocalPattern::Wheel {
            include_center: true,
            num_spokes: 0,
            spoke_radius_mm: 5.0,
        };
        assert!(matches!(
            bad_spokes.validate(),
            Err(PlanningError::InvalidPattern(_))
        ));
        let bad_radius = FocalPattern::Wheel {
            include_center: false,
            num_spokes: 3,
            spoke_radius_mm: 0.0,
        };
        assert!(matches!(
            bad_radius.validate(),
            Err(PlanningError::InvalidPattern(_))
        ));
        let ok = FocalPattern::Wheel {
            include_center: true,
            num_spokes: 4,
            spoke_radius_mm: 5.0,
        };
        assert!(ok.validate().is_ok());
        assert_eq!(ok.num_points(), 5);
    }

    #[test]
    fn method_names_parse() {
        assert_eq!("Direct".parse::<DelayMethod>().unwrap(), DelayMethod::default());
        assert_eq!(
            "max_angle".parse::<ApodizationMethod>().unwrap(),
            ApodizationMethod::MaxAngle {
                max_angle_deg: 30.0
            }
        );
        assert!(matches!(
            "PiecewiseLinear".parse::<ApodizationMethod>(),
            Ok(ApodizationMethod::PiecewiseLinear { .. })
        ));
        assert!(matches!(
            "hanning".parse::<ApodizationMethod>(),
            Err(PlanningError::UnsupportedMethod(_))
        ));
        assert!(matches!(
            "focus_scan".parse::<DelayMethod>(),
            Err(PlanningError::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn unknown_method_rejected_at_load() {
        let json = r#"{"method": "time_reversal"}"#;
        let err = serde_json::from_str::<DelayMethod>(json).unwrap_err();
        assert!(err.to_string().contains("unsupported method"), "{err}");

        let json = r#"{"method": "max_angle", "max_angle_deg": 25.0}"#;
        let m: ApodizationMethod = serde_json::from_str(json).unwrap();
        assert_eq!(
            m,
            ApodizationMethod::MaxAngle {
                max_angle_deg: 25.0
            }
        );
        let back = serde_json::to_string(&m).unwrap();
        assert!(back.contains("\"method\":\"max_angle\""));
    }

    #[test]
    fn range_rule_edges() {
        let rule = ConstraintRule::Range {
            min: Some(0.0),
            max: Some(1.9),
            inclusive: true,
        };
        assert!(rule.admits(&Observation::Scalar(1.9)));
        assert!(!rule.admits(&Observation::Scalar(1.90001)));
        assert!(!rule.admits(&Observation::Scalar(Real::NAN)));
        let open = ConstraintRule::Range {
            min: None,
            max: Some(1.9),
            inclusive: false,
        };
        assert!(!open.admits(&Observation::Scalar(1.9)));
        assert!(open.admits(&Observation::Scalar(-100.0)));
    }

    #[test]
    fn rule_kind_must_match_quantity() {
        let flag = ConstraintRule::Flag { expected: true };
        assert!(flag.validate_for(SafetyQuantity::FocusAhead).is_ok());
        assert!(flag.validate_for(SafetyQuantity::PeakPressure).is_err());
        let set = ConstraintRule::OneOf { values: vec![] };
        assert!(set.validate_for(SafetyQuantity::DelaySpan).is_err());
        let inverted = ConstraintRule::Range {
            min: Some(2.0),
            max: Some(1.0),
            inclusive: true,
        };
        assert!(matches!(
            inverted.validate_for(SafetyQuantity::Isppa),
            Err(PlanningError::InvalidConstraint(_))
        ));
    }

    #[test]
    fn duplicate_constraints_rejected() {
        let mut protocol = Protocol::new("p");
        let c = ParameterConstraint {
            quantity: SafetyQuantity::MechanicalIndex,
            warning: Some(ConstraintRule::Range {
                min: None,
                max: Some(1.0),
                inclusive: true,
            }),
            error: None,
        };
        protocol.parameter_constraints = vec![c.clone(), c];
        assert!(matches!(
            protocol.validate(),
            Err(PlanningError::InvalidConstraint(_))
        ));
    }

    #[test]
    fn protocol_json_defaults() {
        let json = r#"{
            "id": "p1",
            "focal_pattern": {"kind": "wheel", "include_center": true, "num_spokes": 6, "spoke_radius_mm": 2.0},
            "apodization_method": {"method": "uniform"},
            "segmentation_method": "tissue",
            "parameter_constraints": [
                {"quantity": "mechanical_index", "error": {"rule": "range", "max": 1.9}},
                {"quantity": "focus_ahead", "error": {"rule": "flag", "expected": true}}
            ]
        }"#;
        let p: Protocol = serde_json::from_str(json).unwrap();
        assert!(p.validate().is_ok());
        assert_eq!(p.delay_method, DelayMethod::default());
        assert_eq!(p.segmentation_method, SegmentationMethod::Tissue);
        assert_eq!(p.focal_pattern.num_points(), 7);
        assert!(p.constraint_for(SafetyQuantity::FocusAhead).is_some());
    }

    #[test]
    fn duty_cycle() {
        let pulse = Pulse {
            frequency_hz: 500e3,
            duration_s: 10e-3,
            amplitude: 1.0,
        };
        let seq = Sequence {
            pulse_interval_s: 100e-3,
            pulse_count: 5,
            pulse_train_interval_s: 1.0,
            pulse_train_count: 3,
        };
        assert!((seq.duty_cycle(&pulse) - 0.05).abs() < 1e-12);
    }
}
