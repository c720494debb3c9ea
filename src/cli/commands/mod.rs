//! Command implementations.

pub mod consult;
pub mod health;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::adapters::sages::builtin_sages;
use crate::domain::models::Config;
use crate::domain::ports::Sage;
use crate::infrastructure::config::ConfigLoader;
use crate::services::{ConsultationOrchestrator, SageRegistry};

/// Explicit file when given, otherwise the layered project configuration.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Orchestrator over the built-in keyword sages.
pub fn build_orchestrator(config: &Config) -> Result<ConsultationOrchestrator> {
    let registry = SageRegistry::from_sages(builtin_sages().into_iter().map(|s| s as Arc<dyn Sage>))
        .context("Failed to register built-in sages")?;
    Ok(ConsultationOrchestrator::new(config, registry))
}
