use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScarletError};
use crate::prox::{
    prox_hard, prox_l0, prox_plus, prox_soft, prox_soft_plus, prox_unity_plus, CenterOperator,
    GradientAxis, GradientOperator, MonotonicMode, MonotonicOperator, SymmetryOperator,
};

/// Configurable morphology constraint, before it is bound to a box geometry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Non-negative pixels.
    Positive,
    /// Pixels do not brighten moving away from the peak.
    Monotonic {
        #[serde(default)]
        mode: MonotonicMode,
        /// Each pixel is capped at `(1 - min_gradient) * reference`.
        #[serde(default)]
        min_gradient: f64,
    },
    /// 180-degree rotational symmetry about the peak.
    Symmetric,
    /// The peak pixel is the brightest pixel.
    CenterOnPeak,
    /// Pixels do not brighten moving left or right away from the peak column.
    GradientX,
    /// Pixels do not brighten moving up or down away from the peak row.
    GradientY,
    /// Keep at most `budget` non-zero pixels.
    L0 { budget: usize },
    /// Zero pixels with magnitude below `thresh`.
    HardThreshold { thresh: f64 },
    /// Soft threshold by `thresh * step`.
    L1 { thresh: f64 },
}

impl ConstraintKind {
    pub fn monotonic(mode: MonotonicMode) -> Self {
        Self::Monotonic {
            mode,
            min_gradient: 0.0,
        }
    }

    /// Bind this constraint to a morphology of `shape` whose peak sits at
    /// `center` (row, col), precomputing any geometry it needs.
    pub fn bind(&self, shape: (usize, usize), center: (usize, usize)) -> Result<Constraint> {
        let constraint = match self {
            Self::Positive => Constraint::Positive,
            Self::Monotonic { mode, min_gradient } => {
                Constraint::Monotonic(MonotonicOperator::new(shape, center, *mode, *min_gradient)?)
            }
            Self::Symmetric => Constraint::Symmetric(SymmetryOperator::new(shape, center)?),
            Self::CenterOnPeak => Constraint::CenterOnPeak(CenterOperator::new(shape, center)?),
            Self::GradientX => Constraint::Gradient(GradientOperator::new(shape, center, GradientAxis::X)?),
            Self::GradientY => Constraint::Gradient(GradientOperator::new(shape, center, GradientAxis::Y)?),
            Self::L0 { budget } => Constraint::L0 { budget: *budget },
            Self::HardThreshold { thresh } => {
                check_threshold("hard threshold", *thresh)?;
                Constraint::HardThreshold { thresh: *thresh }
            }
            Self::L1 { thresh } => {
                check_threshold("L1 threshold", *thresh)?;
                Constraint::L1 {
                    thresh: *thresh,
                    positive: false,
                }
            }
        };
        Ok(constraint)
    }
}

fn check_threshold(what: &str, thresh: f64) -> Result<()> {
    if !(thresh.is_finite() && thresh >= 0.0) {
        return Err(ScarletError::InvalidParameter(format!(
            "{what} must be finite and non-negative, got {thresh}"
        )));
    }
    Ok(())
}

fn parse_arg<T: FromStr>(name: &str, arg: Option<&str>) -> Result<T> {
    arg.and_then(|a| a.parse().ok()).ok_or_else(|| {
        ScarletError::InvalidParameter(format!("constraint '{name}' needs a numeric argument, e.g. '{name}:5'"))
    })
}

impl FromStr for ConstraintKind {
    type Err = ScarletError;

    /// Parse a short constraint name such as `monotonic`, `symmetric` or
    /// `l0:25`. The single-letter codes `M`, `m`, `S`, `X` and `Y` are accepted
    /// as aliases.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg.trim())),
            None => (s, None),
        };

        match name {
            "M" => return Ok(Self::monotonic(MonotonicMode::Weighted)),
            "m" => return Ok(Self::monotonic(MonotonicMode::Nearest)),
            "S" => return Ok(Self::Symmetric),
            "X" => return Ok(Self::GradientX),
            "Y" => return Ok(Self::GradientY),
            _ => {}
        }

        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "positive" | "+" => Ok(Self::Positive),
            "monotonic" | "monotonic-nearest" => Ok(Self::monotonic(MonotonicMode::Nearest)),
            "monotonic-weighted" => Ok(Self::monotonic(MonotonicMode::Weighted)),
            "monotonic-exact" => Ok(Self::monotonic(MonotonicMode::Exact)),
            "symmetric" | "symmetry" => Ok(Self::Symmetric),
            "center" | "center-on-peak" => Ok(Self::CenterOnPeak),
            "gradient-x" => Ok(Self::GradientX),
            "gradient-y" => Ok(Self::GradientY),
            "l0" => Ok(Self::L0 {
                budget: parse_arg(&lower, arg)?,
            }),
            "hard" => Ok(Self::HardThreshold {
                thresh: parse_arg(&lower, arg)?,
            }),
            "l1" => Ok(Self::L1 {
                thresh: parse_arg(&lower, arg)?,
            }),
            "cone" | "sed-mean" | "disk-sed" => Err(ScarletError::UnsupportedOperator(format!(
                "'{name}' projection is deprecated and not available"
            ))),
            _ => Err(ScarletError::UnsupportedOperator(format!(
                "unknown constraint '{s}'"
            ))),
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positive => write!(f, "positive"),
            Self::Monotonic { mode, .. } => match mode {
                MonotonicMode::Nearest => write!(f, "monotonic"),
                MonotonicMode::Weighted => write!(f, "monotonic-weighted"),
                MonotonicMode::Exact => write!(f, "monotonic-exact"),
            },
            Self::Symmetric => write!(f, "symmetric"),
            Self::CenterOnPeak => write!(f, "center"),
            Self::GradientX => write!(f, "gradient-x"),
            Self::GradientY => write!(f, "gradient-y"),
            Self::L0 { budget } => write!(f, "l0:{budget}"),
            Self::HardThreshold { thresh } => write!(f, "hard:{thresh}"),
            Self::L1 { thresh } => write!(f, "l1:{thresh}"),
        }
    }
}

/// A constraint bound to one morphology geometry.
#[derive(Clone, Debug)]
pub enum Constraint {
    Positive,
    Monotonic(MonotonicOperator),
    Symmetric(SymmetryOperator),
    CenterOnPeak(CenterOperator),
    Gradient(GradientOperator),
    L0 { budget: usize },
    HardThreshold { thresh: f64 },
    L1 { thresh: f64, positive: bool },
}

impl Constraint {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Monotonic(_) => "monotonic",
            Self::Symmetric(_) => "symmetric",
            Self::CenterOnPeak(_) => "center",
            Self::Gradient(op) => match op.axis() {
                GradientAxis::X => "gradient-x",
                GradientAxis::Y => "gradient-y",
            },
            Self::L0 { .. } => "l0",
            Self::HardThreshold { .. } => "hard",
            Self::L1 { .. } => "l1",
        }
    }

    /// Apply the proximal operator in place. `step` is the gradient step that
    /// preceded the projection; only the L1 threshold scales with it.
    pub fn apply(&self, x: &mut Array2<f64>, step: f64) {
        match self {
            Self::Positive => prox_plus(x),
            Self::Monotonic(op) => op.apply(x),
            Self::Symmetric(op) => op.apply(x),
            Self::CenterOnPeak(op) => op.apply(x),
            Self::Gradient(op) => op.apply(x),
            Self::L0 { budget } => prox_l0(x, *budget),
            Self::HardThreshold { thresh } => prox_hard(x, *thresh),
            Self::L1 { thresh, positive } => {
                if *positive {
                    prox_soft_plus(x, thresh * step)
                } else {
                    prox_soft(x, thresh * step)
                }
            }
        }
    }
}

/// Ordered list of constraints applied left to right. Later constraints may
/// undo earlier ones.
#[derive(Clone, Debug, Default)]
pub struct ConstraintChain {
    constraints: Vec<Constraint>,
}

impl ConstraintChain {
    /// Bind `kinds` to a morphology geometry. With `positive` set, a
    /// positivity projection is appended after the caller's list (unless the
    /// list already has one) and L1 thresholds become non-negative.
    pub fn bind(
        kinds: &[ConstraintKind],
        shape: (usize, usize),
        center: (usize, usize),
        positive: bool,
    ) -> Result<Self> {
        let mut constraints = kinds
            .iter()
            .map(|k| k.bind(shape, center))
            .collect::<Result<Vec<_>>>()?;

        if positive {
            for c in &mut constraints {
                if let Constraint::L1 { positive, .. } = c {
                    *positive = true;
                }
            }
            if !kinds.contains(&ConstraintKind::Positive) {
                constraints.push(Constraint::Positive);
            }
        }

        Ok(Self { constraints })
    }

    pub fn push(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn apply(&self, x: &mut Array2<f64>, step: f64) {
        for c in &self.constraints {
            c.apply(x, step);
        }
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.constraints.iter().map(Constraint::name).collect()
    }
}

/// Projection applied to a component's SED after every update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SedConstraint {
    /// Non-negative entries only.
    Positive,
    /// Non-negative entries normalised to unit sum.
    #[default]
    Unity,
}

impl SedConstraint {
    /// Project `sed` in place and return the amplitude removed from it (the
    /// pre-normalisation sum for `Unity`, 1 for `Positive`).
    pub fn apply(&self, sed: &mut Array1<f64>) -> f64 {
        match self {
            Self::Positive => {
                prox_plus(sed);
                1.0
            }
            Self::Unity => prox_unity_plus(sed),
        }
    }
}

impl fmt::Display for SedConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positive => write!(f, "Positive"),
            Self::Unity => write!(f, "Unity"),
        }
    }
}
