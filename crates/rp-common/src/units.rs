//! Length units for particle coordinates.
//!
//! The pipeline works in centimeters. Coordinates arriving in another metric
//! unit are normalized in place; pixel coordinates carry no physical scale of
//! their own, so they cannot be converted and fail the unit check.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Unit the coordinates of a particle are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthUnit {
    /// Centimeters, the working unit of every processor.
    Cm,
    /// Millimeters.
    Mm,
    /// Raw image/voxel pixels, no inferable physical scale.
    Px,
}

impl LengthUnit {
    /// Multiplicative factor taking this unit to cm, if one is known.
    pub fn scale_to_cm(&self) -> Option<f64> {
        match self {
            LengthUnit::Cm => Some(1.0),
            LengthUnit::Mm => Some(0.1),
            LengthUnit::Px => None,
        }
    }

    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            LengthUnit::Cm => "cm",
            LengthUnit::Mm => "mm",
            LengthUnit::Px => "px",
        }
    }

    /// Factor to cm, or a `Unit` error when no conversion is known.
    pub fn try_scale_to_cm(&self) -> Result<f64> {
        self.scale_to_cm().ok_or_else(|| Error::Unit {
            unit: self.name().to_string(),
        })
    }
}

impl Default for LengthUnit {
    fn default() -> Self {
        LengthUnit::Cm
    }
}

impl std::fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
