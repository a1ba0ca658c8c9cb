//! Configuration module for Sumi-Mirror
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! and resolving per-job options to their effective values.
//!
//! # Example
//!
//! ```no_run
//! use sumi_mirror::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("mirror.toml")).unwrap();
//! println!("Concurrency: {}", config.job.resolve().concurrency);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CacheSettings, CheckpointSettings, Config, DiscoverySettings, DistributedSettings, JobOptions,
    OutputSettings, PoolSettings, RenderSettings, ResolvedOptions, RetrySettings,
    DEFAULT_CONCURRENCY, DEFAULT_MAX_DEPTH, DEFAULT_MAX_PAGES,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::{validate, validate_root_url};
