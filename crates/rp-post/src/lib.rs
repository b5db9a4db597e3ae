//! Reco Post processing core.
//!
//! This crate provides:
//! - The [`base::Processor`] contract and the construction-time state every
//!   processor shares (object selection, run mode, truth attribute modes,
//!   key declarations)
//! - The [`factory::Registry`] turning configuration blocks into runnable
//!   processors by name or alias
//! - The two correction passes: calorimetric energy summation and
//!   point-wise calibration
//! - The [`pipeline::Pipeline`] runner validating key declarations and
//!   executing processors in configured order

pub mod base;
pub mod calib;
pub mod calo;
pub mod expr;
pub mod factory;
pub mod pipeline;

pub use base::{KeySpec, ObjType, PostCore, Processor, RunMode, TruthDepMode, TruthPointMode};
pub use calib::{Calibrator, GainCalibrator, GainCalibratorConfig};
pub use calo::{CalibrationConfig, CalibrationProcessor, CaloConfig, CalorimetricEnergyProcessor};
pub use expr::ScaleFactor;
pub use factory::{BuildOverrides, Registry};
pub use pipeline::Pipeline;
