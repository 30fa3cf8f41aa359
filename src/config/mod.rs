//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the scheduler service.

mod error;
mod yaml;

pub use error::ConfigError;
pub use yaml::{ConfigLoader, ServiceConfig, StorageConfig};
