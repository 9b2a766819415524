//! Runtime-facing surfaces.

pub mod status;

pub use status::{health, status_report, Health, StatusReport};
