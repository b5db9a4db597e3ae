//! Particle data model.
//!
//! Particles come in two domains with different backing attributes:
//! - Reconstructed particles carry one point/deposition pair plus per-point
//!   indices into the shared per-entry deposition tensor.
//! - Truth particles carry two point/deposition families (label points and
//!   "adapted" points matched to the reco voxelization), each with a
//!   charge-domain and an energy-domain deposition array.
//!
//! Processors never touch these fields blindly; they resolve which attribute
//! pair to read through their configured truth modes (see `rp-post`).

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::units::LengthUnit;

/// Semantic shape (topology) of a particle.
///
/// Only `Track` changes processor behavior: tracks skip the shower fudge
/// factor and are eligible for segmented calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// Electromagnetic shower.
    Shower,
    /// Track-like trajectory (muon, pion, proton, ...).
    Track,
    /// Michel electron.
    Michel,
    /// Delta ray.
    Delta,
    /// Low-energy blip.
    LowEnergy,
    /// Unclassified.
    Unknown,
}

impl Default for Shape {
    fn default() -> Self {
        Shape::Unknown
    }
}

/// Per-point provenance tag: which detector module and TPC produced a point.
///
/// Consumed by calibration to select gain/geometry constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Source {
    pub module: i32,
    pub tpc: i32,
}

/// A reconstructed particle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoParticle {
    /// Index of this particle within its entry's collection.
    pub id: usize,
    /// Semantic shape of the particle.
    pub shape: Shape,
    /// Ordered 3D point coordinates.
    pub points: Vec<[f64; 3]>,
    /// One charge/energy deposition per point.
    pub depositions: Vec<f64>,
    /// One provenance tag per point.
    pub sources: Vec<Source>,
    /// Per-point indices into the shared entry deposition tensor.
    ///
    /// Explicit index-based write-back keeps the particle view and the
    /// shared tensor in agreement without live aliasing.
    pub index: Vec<usize>,
    /// Unit the point coordinates are expressed in.
    pub units: LengthUnit,
    /// Calorimetric kinetic energy estimate, set by post-processing.
    pub calo_ke: Option<f64>,
}

/// A truth particle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TruthParticle {
    /// Index of this particle within its entry's collection.
    pub id: usize,
    /// Semantic shape of the particle.
    pub shape: Shape,
    /// Label point coordinates.
    pub points: Vec<[f64; 3]>,
    /// Energy depositions at the label points.
    pub depositions: Vec<f64>,
    /// Charge depositions at the label points.
    pub depositions_q: Vec<f64>,
    /// Point coordinates adapted to the reco voxelization.
    pub points_adapt: Vec<[f64; 3]>,
    /// Energy depositions at the adapted points.
    pub depositions_adapt: Vec<f64>,
    /// Charge depositions at the adapted points.
    pub depositions_adapt_q: Vec<f64>,
    /// One provenance tag per label point.
    pub sources: Vec<Source>,
    /// Unit the point coordinates are expressed in.
    pub units: LengthUnit,
    /// Calorimetric kinetic energy estimate, set by post-processing.
    pub calo_ke: Option<f64>,
}

/// A particle from either domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Particle {
    Reco(RecoParticle),
    Truth(TruthParticle),
}

impl Particle {
    /// Whether this is a truth-domain particle.
    pub fn is_truth(&self) -> bool {
        matches!(self, Particle::Truth(_))
    }

    /// Semantic shape of the particle.
    pub fn shape(&self) -> Shape {
        match self {
            Particle::Reco(p) => p.shape,
            Particle::Truth(p) => p.shape,
        }
    }

    /// Per-point provenance tags.
    pub fn sources(&self) -> &[Source] {
        match self {
            Particle::Reco(p) => &p.sources,
            Particle::Truth(p) => &p.sources,
        }
    }

    /// Unit the coordinates are expressed in.
    pub fn units(&self) -> LengthUnit {
        match self {
            Particle::Reco(p) => p.units,
            Particle::Truth(p) => p.units,
        }
    }

    /// Calorimetric kinetic energy estimate, if computed.
    pub fn calo_ke(&self) -> Option<f64> {
        match self {
            Particle::Reco(p) => p.calo_ke,
            Particle::Truth(p) => p.calo_ke,
        }
    }

    /// Record the calorimetric kinetic energy estimate.
    pub fn set_calo_ke(&mut self, ke: f64) {
        match self {
            Particle::Reco(p) => p.calo_ke = Some(ke),
            Particle::Truth(p) => p.calo_ke = Some(ke),
        }
    }

    pub fn as_reco(&self) -> Option<&RecoParticle> {
        match self {
            Particle::Reco(p) => Some(p),
            Particle::Truth(_) => None,
        }
    }

    pub fn as_reco_mut(&mut self) -> Option<&mut RecoParticle> {
        match self {
            Particle::Reco(p) => Some(p),
            Particle::Truth(_) => None,
        }
    }

    pub fn as_truth(&self) -> Option<&TruthParticle> {
        match self {
            Particle::Truth(p) => Some(p),
            Particle::Reco(_) => None,
        }
    }

    pub fn as_truth_mut(&mut self) -> Option<&mut TruthParticle> {
        match self {
            Particle::Truth(p) => Some(p),
            Particle::Reco(_) => None,
        }
    }

    /// Check the parallel per-point arrays agree in length.
    pub fn validate(&self) -> Result<()> {
        match self {
            Particle::Reco(p) => {
                let n = p.points.len();
                check_len("reco depositions", n, p.depositions.len())?;
                check_len("reco sources", n, p.sources.len())?;
                check_len("reco tensor index", n, p.index.len())
            }
            Particle::Truth(p) => {
                let n = p.points.len();
                check_len("truth depositions", n, p.depositions.len())?;
                check_len("truth charge depositions", n, p.depositions_q.len())?;
                check_len("truth sources", n, p.sources.len())?;
                let m = p.points_adapt.len();
                check_len("adapted depositions", m, p.depositions_adapt.len())?;
                check_len("adapted charge depositions", m, p.depositions_adapt_q.len())
            }
        }
    }
}

fn check_len(context: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::LengthMismatch {
            context,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reco(points: usize) -> RecoParticle {
        RecoParticle {
            id: 0,
            shape: Shape::Track,
            points: vec![[0.0; 3]; points],
            depositions: vec![1.0; points],
            sources: vec![Source::default(); points],
            index: (0..points).collect(),
            units: LengthUnit::Cm,
            calo_ke: None,
        }
    }

    #[test]
    fn test_validate_parallel_arrays() {
        assert!(Particle::Reco(reco(3)).validate().is_ok());

        let mut bad = reco(3);
        bad.sources.pop();
        let err = Particle::Reco(bad).validate().unwrap_err();
        assert!(matches!(
            err,
            Error::LengthMismatch {
                context: "reco sources",
                expected: 3,
                actual: 2,
            }
        ));
    }

    #[test]
    fn test_calo_ke_roundtrip() {
        let mut p = Particle::Reco(reco(2));
        assert_eq!(p.calo_ke(), None);
        p.set_calo_ke(12.5);
        assert_eq!(p.calo_ke(), Some(12.5));
    }

    #[test]
    fn test_truth_adapted_arrays_validate_independently() {
        let t = TruthParticle {
            points: vec![[0.0; 3]; 2],
            depositions: vec![1.0; 2],
            depositions_q: vec![1.0; 2],
            points_adapt: vec![[0.0; 3]; 5],
            depositions_adapt: vec![1.0; 5],
            depositions_adapt_q: vec![1.0; 5],
            sources: vec![Source::default(); 2],
            ..Default::default()
        };
        assert!(Particle::Truth(t).validate().is_ok());
    }
}
