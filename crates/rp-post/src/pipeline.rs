//! Ordered execution of configured processors over entries.
//!
//! The pipeline owns no entry data; the surrounding event loop hands each
//! entry in and gets it back mutated. Required data-product keys of every
//! processor are validated up front, so an entry either fails before any
//! processor touched it or runs the declared sequence to completion (a
//! per-particle failure still aborts the remainder of the entry).
//!
//! Processor order is taken from configuration verbatim. In particular,
//! whether calibration runs before calorimetric summation is a configuration
//! concern; the pipeline does not reorder.

use serde_yaml::Value;
use tracing::debug;

use rp_common::{Error, EventData, Result};

use crate::base::Processor;
use crate::factory::{BuildOverrides, Registry};

/// A configured sequence of post-processors.
#[derive(Debug)]
pub struct Pipeline {
    processors: Vec<Box<dyn Processor>>,
}

impl Pipeline {
    /// Assemble a pipeline from already-built processors.
    pub fn new(processors: Vec<Box<dyn Processor>>) -> Self {
        Pipeline { processors }
    }

    /// Build every configuration block through the registry, in declared
    /// order. Fails on the first bad block, before any entry is processed.
    pub fn from_config(
        blocks: &[Value],
        registry: &Registry,
        overrides: &BuildOverrides,
    ) -> Result<Self> {
        let processors = blocks
            .iter()
            .map(|block| registry.build(block, overrides))
            .collect::<Result<Vec<_>>>()?;
        Ok(Pipeline::new(processors))
    }

    /// Processors in execution order.
    pub fn processors(&self) -> impl Iterator<Item = &dyn Processor> {
        self.processors.iter().map(|p| p.as_ref())
    }

    /// Check every processor's required data products are present.
    pub fn validate(&self, data: &EventData) -> Result<()> {
        for processor in &self.processors {
            for spec in processor.keys() {
                if spec.required && !data.contains_key(&spec.key) {
                    return Err(Error::MissingProduct {
                        key: spec.key.clone(),
                        consumer: processor.name().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Run all processors over one entry, in order.
    pub fn run(&self, data: &mut EventData) -> Result<()> {
        self.validate(data)?;
        for processor in &self.processors {
            debug!(processor = processor.name(), "running post-processor");
            processor.process(data)?;
        }
        Ok(())
    }
}
