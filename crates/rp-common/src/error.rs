//! Error types for Reco Post.
//!
//! One unified error enum covers the whole pipeline. Two classes matter for
//! callers:
//! - Construction-time errors (`Configuration`, `Expression`) are fatal and
//!   are never raised while an entry is being processed.
//! - Entry-time errors (`Unit`, `MissingProduct`, `ProductType`,
//!   `LengthMismatch`, `Calibration`) abort the current entry; no processor
//!   silently skips a failed particle and continues.

use thiserror::Error;

/// Result type alias for Reco Post operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for Reco Post.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad processor configuration: unknown name, unrecognized mode value,
    /// malformed block. Raised at construction, before any entry runs.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed scaling/fudge-factor arithmetic expression.
    #[error("invalid arithmetic expression {expr:?}: {message}")]
    Expression { expr: String, message: String },

    /// Particle coordinates in a unit with no known conversion to cm.
    #[error("cannot convert particle coordinates from {unit} to cm")]
    Unit { unit: String },

    /// A data product a processor declared as required is absent.
    #[error("missing data product {key:?} required by {consumer}")]
    MissingProduct { key: String, consumer: String },

    /// A data product exists under the key but holds the wrong product kind.
    #[error("data product {key:?} is not a {expected}")]
    ProductType { key: String, expected: &'static str },

    /// Parallel per-point arrays disagree in length.
    #[error("length mismatch for {context}: expected {expected}, got {actual}")]
    LengthMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Failure propagated unmodified from the calibration collaborator.
    #[error("calibration failed: {0}")]
    Calibration(String),
}

impl Error {
    /// Whether this error class can only arise at construction time.
    pub fn is_construction(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::Expression { .. })
    }
}
