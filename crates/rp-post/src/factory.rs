//! Processor registry and factory.
//!
//! Processors are discovered from configuration alone: a block names a
//! processor, the registry maps the name (or any alias) to its builder, and
//! the remaining fields of the block become the builder's configuration.
//! The registry is an explicit map populated once at startup; there is no
//! runtime type scanning.

use std::collections::HashMap;

use serde_yaml::{Mapping, Value};

use rp_common::{Error, Result};

use crate::base::{ObjType, Processor, RunMode};
use crate::calo::{CalibrationProcessor, CalorimetricEnergyProcessor};

/// Builder signature: configuration block (with `name` stripped) in,
/// runnable processor out.
pub type BuilderFn = fn(Value) -> Result<Box<dyn Processor>>;

/// Pipeline-level settings injected into every block that does not set
/// them itself.
#[derive(Debug, Clone, Default)]
pub struct BuildOverrides {
    pub obj_type: Option<ObjType>,
    pub run_mode: Option<RunMode>,
}

/// Name/alias to builder map for all known processors.
pub struct Registry {
    builders: HashMap<&'static str, BuilderFn>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Registry {
            builders: HashMap::new(),
        }
    }

    /// Registry holding every processor this crate ships.
    pub fn standard() -> Self {
        let mut registry = Registry::new();
        registry.register(
            CalorimetricEnergyProcessor::NAME,
            CalorimetricEnergyProcessor::ALIASES,
            CalorimetricEnergyProcessor::from_config,
        );
        registry.register(
            CalibrationProcessor::NAME,
            CalibrationProcessor::ALIASES,
            CalibrationProcessor::from_config,
        );
        registry
    }

    /// Register a processor under its canonical name and aliases.
    ///
    /// Canonical and alias lookups resolve identically.
    pub fn register(&mut self, name: &'static str, aliases: &[&'static str], builder: BuilderFn) {
        self.builders.insert(name, builder);
        for alias in aliases {
            self.builders.insert(alias, builder);
        }
    }

    /// Names and aliases currently registered, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.builders.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Build a processor from one configuration block.
    ///
    /// The block must be a mapping with a `name` field; `name` is stripped
    /// and the rest is handed to the builder. Overrides fill in `obj_type`
    /// and `run_mode` for blocks that leave them unset.
    pub fn build(&self, block: &Value, overrides: &BuildOverrides) -> Result<Box<dyn Processor>> {
        let mapping = block
            .as_mapping()
            .ok_or_else(|| Error::Configuration("processor block must be a mapping".into()))?;

        let mut config = mapping.clone();
        let name = match config.remove("name") {
            Some(Value::String(name)) => name,
            Some(_) => {
                return Err(Error::Configuration(
                    "processor name must be a string".into(),
                ))
            }
            None => {
                return Err(Error::Configuration(
                    "processor block is missing a name".into(),
                ))
            }
        };

        let builder = self.builders.get(name.as_str()).ok_or_else(|| {
            Error::Configuration(format!(
                "unknown processor {name:?}; known processors: {}",
                self.names().join(", ")
            ))
        })?;

        inject(&mut config, "obj_type", &overrides.obj_type)?;
        inject(&mut config, "run_mode", &overrides.run_mode)?;

        builder(Value::Mapping(config))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::standard()
    }
}

/// Insert an override under `key` unless the block already sets it.
fn inject<T: serde::Serialize>(config: &mut Mapping, key: &str, value: &Option<T>) -> Result<()> {
    if let Some(value) = value {
        if !config.contains_key(key) {
            let value = serde_yaml::to_value(value)
                .map_err(|e| Error::Configuration(format!("invalid {key} override: {e}")))?;
            config.insert(Value::String(key.to_string()), value);
        }
    }
    Ok(())
}
