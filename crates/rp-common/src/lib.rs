//! Reco Post shared types.
//!
//! This crate provides:
//! - The particle data model (reco and truth variants)
//! - Keyed per-entry data products (`EventData`)
//! - Length units and cm-normalization
//! - The unified error type shared by all crates

pub mod error;
pub mod event;
pub mod particle;
pub mod units;

pub use error::{Error, Result};
pub use event::{EventData, Product, RunInfo};
pub use particle::{Particle, RecoParticle, Shape, Source, TruthParticle};
pub use units::LengthUnit;
