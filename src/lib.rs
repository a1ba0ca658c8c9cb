//! Sumi-Mirror: a resumable full-site cloner
//!
//! This crate walks a site's link graph from a root URL, renders each page
//! through a pooled renderer, captures and deduplicates assets, and persists a
//! self-contained offline copy. Progress is checkpointed so an interrupted clone
//! resumes without re-fetching completed work.

pub mod assets;
pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod crawler;
pub mod distributed;
pub mod output;
pub mod render;
pub mod retry;
pub mod state;
pub mod url;

use std::time::Duration;
use thiserror::Error;

/// Main error type for job-level Sumi-Mirror operations
///
/// Per-page failures are reported as [`PageError`] and never surface here;
/// a `MirrorError` aborts the whole job.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] cache::CacheError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Checkpoint directory {path} is not writable: {source}")]
    CheckpointUnwritable {
        path: String,
        source: std::io::Error,
    },

    #[error("Render resource error: {0}")]
    Render(#[from] PageError),

    #[error("Invalid phase transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::JobPhase,
        to: state::JobPhase,
    },

    #[error("No pages were cloned from {root} ({failed} failed)")]
    NoPagesCloned { root: String, failed: usize },

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Per-page failure taxonomy
///
/// These are caught at the page-task boundary, classified by
/// [`retry::classify`], and recorded in the checkpoint's failed-URL ledger.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("Navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },

    #[error("Renderer control channel timed out: {0}")]
    ProtocolTimeout(String),

    #[error("Render target closed while processing {url}")]
    TargetClosed { url: String },

    #[error("HTTP {status} for {url}")]
    Http { url: String, status: u16 },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Failed to capture asset {url}: {message}")]
    AssetCapture { url: String, message: String },

    #[error("Checkpoint is corrupt: {0}")]
    CheckpointCorrupt(String),

    #[error("Failed to save {url}: {message}")]
    PageWrite { url: String, message: String },

    #[error("No render resource became available within {0:?}")]
    ResourcePoolExhausted(Duration),

    #[error("Renderer does not support {0}")]
    Unsupported(&'static str),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Sumi-Mirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::{Config, JobOptions, ResolvedOptions};
pub use crawler::{CloneSummary, Orchestrator};
pub use state::JobPhase;
pub use url::{normalize_url, same_origin};
