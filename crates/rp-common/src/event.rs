//! Per-entry data products.
//!
//! One entry (event) is a mapping from data-product key to product. The
//! object collections hold the particles themselves; the shared deposition
//! tensors hold one scalar per point of the whole entry, which per-particle
//! deposition arrays are index-based views into.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::particle::Particle;

/// Run-level metadata for one entry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunInfo {
    /// Run identifier, used by calibration to select run conditions.
    pub run: i64,
    /// Subrun identifier.
    pub subrun: i64,
    /// Event number within the run.
    pub event: i64,
}

/// One keyed data product of an entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Product {
    /// An object collection (e.g. `reco_particles`, `truth_particles`).
    Particles(Vec<Particle>),
    /// A shared per-entry deposition tensor (e.g. `depositions`).
    Tensor(Vec<f64>),
    /// Optional run metadata, under the `run_info` key.
    RunInfo(RunInfo),
}

impl Product {
    /// Product kind name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Product::Particles(_) => "particle collection",
            Product::Tensor(_) => "tensor",
            Product::RunInfo(_) => "run info",
        }
    }
}

/// All data products of one entry, keyed by product name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventData {
    products: HashMap<String, Product>,
}

impl EventData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a product under a key, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, product: Product) {
        self.products.insert(key.into(), product);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.products.contains_key(key)
    }

    /// Keys of all products present in this entry.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.products.keys().map(String::as_str)
    }

    /// Borrow an object collection.
    pub fn particles(&self, key: &str) -> Result<&[Particle]> {
        match self.products.get(key) {
            Some(Product::Particles(parts)) => Ok(parts),
            Some(_) => Err(wrong_kind(key, "particle collection")),
            None => Err(missing(key)),
        }
    }

    /// Mutably borrow an object collection.
    pub fn particles_mut(&mut self, key: &str) -> Result<&mut Vec<Particle>> {
        match self.products.get_mut(key) {
            Some(Product::Particles(parts)) => Ok(parts),
            Some(_) => Err(wrong_kind(key, "particle collection")),
            None => Err(missing(key)),
        }
    }

    /// Borrow a shared deposition tensor.
    pub fn tensor(&self, key: &str) -> Result<&[f64]> {
        match self.products.get(key) {
            Some(Product::Tensor(t)) => Ok(t),
            Some(_) => Err(wrong_kind(key, "tensor")),
            None => Err(missing(key)),
        }
    }

    /// Mutably borrow a shared deposition tensor.
    pub fn tensor_mut(&mut self, key: &str) -> Result<&mut Vec<f64>> {
        match self.products.get_mut(key) {
            Some(Product::Tensor(t)) => Ok(t),
            Some(_) => Err(wrong_kind(key, "tensor")),
            None => Err(missing(key)),
        }
    }

    /// Run metadata, if the entry carries any.
    pub fn run_info(&self) -> Option<&RunInfo> {
        match self.products.get("run_info") {
            Some(Product::RunInfo(info)) => Some(info),
            _ => None,
        }
    }

    /// Remove and return an object collection.
    ///
    /// Processors that mutate both a collection and a shared tensor take the
    /// collection out, work on it, and put it back — the map cannot hand out
    /// two disjoint mutable borrows.
    pub fn take_particles(&mut self, key: &str) -> Result<Vec<Particle>> {
        match self.products.remove(key) {
            Some(Product::Particles(parts)) => Ok(parts),
            Some(other) => {
                // Restore before failing so the entry stays intact.
                self.products.insert(key.to_string(), other);
                Err(wrong_kind(key, "particle collection"))
            }
            None => Err(missing(key)),
        }
    }

    /// Put an object collection back under its key.
    pub fn put_particles(&mut self, key: impl Into<String>, parts: Vec<Particle>) {
        self.products.insert(key.into(), Product::Particles(parts));
    }
}

fn missing(key: &str) -> Error {
    Error::MissingProduct {
        key: key.to_string(),
        consumer: "accessor".to_string(),
    }
}

fn wrong_kind(key: &str, expected: &'static str) -> Error {
    Error::ProductType {
        key: key.to_string(),
        expected,
    }
}
