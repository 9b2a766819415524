//! Builders to construct a [`ResourceManager`] from configuration.

use crate::config::ManagerConfig;
use crate::core::{ConnectionFactory, ResourceError, ResourceManager};

/// Validate `cfg` and build a stopped manager around `factory`.
///
/// # Errors
///
/// Returns `ResourceError::InvalidConfig` naming the failing section.
pub fn build_manager<F: ConnectionFactory>(
    cfg: &ManagerConfig,
    factory: F,
) -> Result<ResourceManager<F>, ResourceError> {
    cfg.validate()
        .map_err(|e| ResourceError::InvalidConfig(format!("config invalid: {e}")))?;
    ResourceManager::new(factory, cfg.clone())
}

/// Build a stopped manager from `RESOURCE_*` environment variables (and `.env`).
///
/// # Errors
///
/// Returns `ResourceError::InvalidConfig` if a variable does not parse or validation fails.
pub fn build_manager_from_env<F: ConnectionFactory>(
    factory: F,
) -> Result<ResourceManager<F>, ResourceError> {
    let cfg = ManagerConfig::from_env().map_err(ResourceError::InvalidConfig)?;
    build_manager(&cfg, factory)
}
