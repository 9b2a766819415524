//! Builders to construct the resource manager from configuration.

pub mod manager_builder;

pub use manager_builder::{build_manager, build_manager_from_env};
