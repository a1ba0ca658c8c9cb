//! Output module for the offline copy
//!
//! This module handles:
//! - Crash-safe file writes into the output tree
//! - The clone manifest written by the exporting phase
//! - Clone statistics for the CLI

mod manifest;
pub mod stats;

pub use manifest::{
    read_manifest, write_manifest, CloneManifest, ManifestAsset, ManifestCounters,
    ManifestFailure, ManifestPage, MANIFEST_FILE,
};
pub use stats::{load_statistics, print_statistics, CloneStatistics, StatsSource};

use std::io;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Writes `bytes` to `path` through a temporary sibling and a rename
///
/// Parent directories are created as needed. Readers never observe a
/// half-written file: they see either the old content or the new one.
///
/// # Arguments
///
/// * `path` - Destination file
/// * `bytes` - Complete new content
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    // Replacing a dangling dedup symlink must not write through it
    if let Ok(meta) = tokio::fs::symlink_metadata(path).await {
        if meta.file_type().is_symlink() {
            tokio::fs::remove_file(path).await?;
        }
    }

    tokio::fs::rename(&tmp, path).await
}
