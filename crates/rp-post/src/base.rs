//! Shared processor lifecycle and reco/truth attribute resolution.
//!
//! Every processor fixes three things at construction time:
//! - which object collection(s) it iterates (`obj_keys`, from [`ObjType`]
//!   and [`RunMode`]),
//! - which truth attribute pair it reads (the truth modes), and
//! - which data-product keys it needs, and whether each is mandatory.
//!
//! None of this is re-resolved per entry; `process` only applies it.

use serde::{Deserialize, Serialize};

use rp_common::{EventData, Particle, Result};

/// Which data domain a processor acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Reconstructed objects only.
    Reco,
    /// Truth objects only.
    Truth,
    /// Both domains.
    Both,
}

impl RunMode {
    pub fn covers_reco(&self) -> bool {
        matches!(self, RunMode::Reco | RunMode::Both)
    }

    pub fn covers_truth(&self) -> bool {
        matches!(self, RunMode::Truth | RunMode::Both)
    }
}

impl Default for RunMode {
    fn default() -> Self {
        RunMode::Reco
    }
}

/// Which kind of object collection a processor iterates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjType {
    Particle,
    Fragment,
}

impl ObjType {
    /// Data-product key of the reconstructed collection.
    pub fn reco_key(&self) -> &'static str {
        match self {
            ObjType::Particle => "reco_particles",
            ObjType::Fragment => "reco_fragments",
        }
    }

    /// Data-product key of the truth collection.
    pub fn truth_key(&self) -> &'static str {
        match self {
            ObjType::Particle => "truth_particles",
            ObjType::Fragment => "truth_fragments",
        }
    }
}

impl Default for ObjType {
    fn default() -> Self {
        ObjType::Particle
    }
}

/// Which truth point attribute a processor reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruthPointMode {
    /// Label points.
    Points,
    /// Points adapted to the reco voxelization.
    PointsAdapt,
}

impl Default for TruthPointMode {
    fn default() -> Self {
        TruthPointMode::Points
    }
}

/// Which truth deposition attribute a processor reads (or writes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruthDepMode {
    /// Energy depositions at the label points.
    Depositions,
    /// Charge depositions at the label points.
    DepositionsQ,
    /// Energy depositions at the adapted points.
    DepositionsAdapt,
    /// Charge depositions at the adapted points.
    DepositionsAdaptQ,
}

impl Default for TruthDepMode {
    fn default() -> Self {
        TruthDepMode::Depositions
    }
}

/// Declaration of one data-product key a processor touches.
///
/// The pipeline runner checks every `required` key for presence before any
/// processor runs on an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    pub key: String,
    pub required: bool,
}

impl KeySpec {
    pub fn new(key: impl Into<String>, required: bool) -> Self {
        KeySpec {
            key: key.into(),
            required,
        }
    }
}

/// Construction-time state shared by every concrete processor.
#[derive(Debug, Clone)]
pub struct PostCore {
    /// Concrete object-collection keys to iterate, resolved from the
    /// object type and run mode.
    pub obj_keys: Vec<&'static str>,
    pub run_mode: RunMode,
    pub truth_point_mode: TruthPointMode,
    pub truth_dep_mode: TruthDepMode,
    /// Data-product keys this processor touches.
    pub keys: Vec<KeySpec>,
}

impl PostCore {
    pub fn new(
        obj_type: ObjType,
        run_mode: RunMode,
        truth_point_mode: TruthPointMode,
        truth_dep_mode: TruthDepMode,
    ) -> Self {
        let mut obj_keys = Vec::new();
        if run_mode.covers_reco() {
            obj_keys.push(obj_type.reco_key());
        }
        if run_mode.covers_truth() {
            obj_keys.push(obj_type.truth_key());
        }

        let keys = obj_keys
            .iter()
            .map(|k| KeySpec::new(*k, true))
            .collect();

        PostCore {
            obj_keys,
            run_mode,
            truth_point_mode,
            truth_dep_mode,
            keys,
        }
    }

    /// Declare an additional data-product key, updating any prior declaration.
    pub fn require(&mut self, key: impl Into<String>, required: bool) {
        let key = key.into();
        if let Some(spec) = self.keys.iter_mut().find(|s| s.key == key) {
            spec.required = required;
        } else {
            self.keys.push(KeySpec { key, required });
        }
    }

    /// Point coordinates of a particle, resolved per domain.
    pub fn get_points<'a>(&self, particle: &'a Particle) -> &'a [[f64; 3]] {
        match particle {
            Particle::Reco(p) => &p.points,
            Particle::Truth(p) => match self.truth_point_mode {
                TruthPointMode::Points => &p.points,
                TruthPointMode::PointsAdapt => &p.points_adapt,
            },
        }
    }

    /// Depositions of a particle, resolved per domain.
    pub fn get_depositions<'a>(&self, particle: &'a Particle) -> &'a [f64] {
        match particle {
            Particle::Reco(p) => &p.depositions,
            Particle::Truth(p) => match self.truth_dep_mode {
                TruthDepMode::Depositions => &p.depositions,
                TruthDepMode::DepositionsQ => &p.depositions_q,
                TruthDepMode::DepositionsAdapt => &p.depositions_adapt,
                TruthDepMode::DepositionsAdaptQ => &p.depositions_adapt_q,
            },
        }
    }

    /// Normalize a particle's coordinates to cm in place.
    ///
    /// Fails with a unit error when no conversion factor is known; the
    /// entry is aborted rather than processed in the wrong unit.
    pub fn check_units(&self, particle: &mut Particle) -> Result<()> {
        let factor = particle.units().try_scale_to_cm()?;
        if factor == 1.0 {
            return Ok(());
        }
        match particle {
            Particle::Reco(p) => {
                scale_points(&mut p.points, factor);
                p.units = rp_common::LengthUnit::Cm;
            }
            Particle::Truth(p) => {
                scale_points(&mut p.points, factor);
                scale_points(&mut p.points_adapt, factor);
                p.units = rp_common::LengthUnit::Cm;
            }
        }
        Ok(())
    }
}

fn scale_points(points: &mut [[f64; 3]], factor: f64) {
    for point in points {
        for coord in point {
            *coord *= factor;
        }
    }
}

/// One post-processing pass over an entry.
///
/// Instances hold configuration only, so a processor is safely shareable
/// across concurrently processed entries with disjoint `EventData`.
pub trait Processor: std::fmt::Debug + Send + Sync {
    /// Canonical processor name (as used in configuration).
    fn name(&self) -> &'static str;

    /// Data-product keys this processor touches.
    fn keys(&self) -> &[KeySpec];

    /// Run the pass over one entry, mutating particles and shared tensors
    /// in place.
    fn process(&self, data: &mut EventData) -> Result<()>;
}
