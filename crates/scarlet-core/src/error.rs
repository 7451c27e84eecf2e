use thiserror::Error;

use crate::scene::BoundingBox;

#[derive(Error, Debug)]
pub enum ScarletError {
    #[error("Peak at ({x:.1}, {y:.1}) has insufficient flux: {flux:.3e} <= {threshold:.3e}")]
    SourceInit {
        x: f64,
        y: f64,
        flux: f64,
        threshold: f64,
    },

    #[error("Peak at ({x:.1}, {y:.1}) lies outside the {width}x{height} scene")]
    PeakOutsideScene {
        x: f64,
        y: f64,
        width: usize,
        height: usize,
    },

    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Bounding box {bbox} lies outside the {width}x{height} scene")]
    BoxOutsideScene {
        bbox: BoundingBox,
        height: usize,
        width: usize,
    },

    #[error("Unsupported proximal operator: {0}")]
    UnsupportedOperator(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Blend contains no components")]
    EmptyBlend,

    #[error("Component index {index} out of range (total: {total})")]
    ComponentIndexOutOfRange { index: usize, total: usize },
}

impl ScarletError {
    /// Only a failed source initialisation can be skipped by the caller; every
    /// other variant signals malformed input or configuration.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SourceInit { .. })
    }
}

pub type Result<T> = std::result::Result<T, ScarletError>;
