//! Clone statistics
//!
//! Statistics come from the checkpoint of an unfinished job, from the manifest
//! of an exported one, or straight from a [`CloneSummary`].

use crate::checkpoint::CheckpointStore;
use crate::crawler::CloneSummary;
use crate::state::JobPhase;
use crate::Result;
use std::path::Path;
use std::time::Duration;

use super::manifest::{read_manifest, CloneManifest};

/// Where a set of statistics was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsSource {
    Checkpoint,
    Manifest,
    Summary,
}

/// Clone statistics summary
#[derive(Debug, Clone, PartialEq)]
pub struct CloneStatistics {
    pub source: StatsSource,
    pub root_url: String,
    /// Unknown for an interrupted job read from its checkpoint
    pub phase: Option<JobPhase>,
    pub pages_cloned: usize,
    pub pages_failed: usize,
    pub pages_pending: usize,
    pub assets_captured: usize,
    pub bytes_downloaded: u64,
    pub missing_files: usize,
    pub elapsed: Option<Duration>,
}

impl From<&CloneManifest> for CloneStatistics {
    fn from(manifest: &CloneManifest) -> Self {
        let elapsed = (manifest.generated_at - manifest.started_at).to_std().ok();
        Self {
            source: StatsSource::Manifest,
            root_url: manifest.root_url.clone(),
            phase: Some(manifest.phase),
            pages_cloned: manifest.counters.pages_cloned,
            pages_failed: manifest.counters.pages_failed,
            pages_pending: manifest.counters.pages_pending,
            assets_captured: manifest.counters.assets_captured,
            bytes_downloaded: manifest.counters.bytes_downloaded,
            missing_files: manifest.counters.missing_files,
            elapsed,
        }
    }
}

impl From<&CloneSummary> for CloneStatistics {
    fn from(summary: &CloneSummary) -> Self {
        Self {
            source: StatsSource::Summary,
            root_url: summary.root_url.clone(),
            phase: Some(summary.phase),
            pages_cloned: summary.pages_cloned,
            pages_failed: summary.pages_failed,
            pages_pending: summary.pages_pending,
            assets_captured: summary.assets_captured,
            bytes_downloaded: summary.bytes_downloaded,
            missing_files: summary.missing_files.len(),
            elapsed: Some(summary.elapsed),
        }
    }
}

/// Loads statistics for the clone in `output_dir`
///
/// A checkpoint wins over a manifest: it means the last job did not finish.
///
/// # Returns
///
/// * `Ok(Some(CloneStatistics))` - A checkpoint or manifest was found
/// * `Ok(None)` - The directory holds no clone
/// * `Err(MirrorError)` - The manifest exists but could not be read
pub async fn load_statistics(output_dir: &Path) -> Result<Option<CloneStatistics>> {
    if let Some(cp) = CheckpointStore::load(output_dir).await.checkpoint {
        let elapsed = (cp.updated_at - cp.started_at).to_std().ok();
        return Ok(Some(CloneStatistics {
            source: StatsSource::Checkpoint,
            root_url: cp.root_url.clone(),
            phase: None,
            pages_cloned: cp.pages_cloned,
            pages_failed: cp.failed_urls.len(),
            pages_pending: cp.pending_urls.len(),
            assets_captured: cp.assets_captured,
            bytes_downloaded: cp.bytes_downloaded,
            missing_files: 0,
            elapsed,
        }));
    }

    Ok(read_manifest(output_dir)
        .await?
        .as_ref()
        .map(CloneStatistics::from))
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CloneStatistics) {
    println!("=== Clone Statistics ===\n");

    println!("Overview:");
    println!("  Root URL: {}", stats.root_url);
    match stats.phase {
        Some(phase) => println!("  Phase: {}", phase.as_str()),
        None => println!("  Phase: interrupted (resumable)"),
    }
    if let Some(elapsed) = stats.elapsed {
        println!("  Elapsed: {:.1} min", elapsed.as_secs_f64() / 60.0);
    }
    println!();

    println!("Pages:");
    println!("  Cloned: {}", stats.pages_cloned);
    println!("  Failed: {}", stats.pages_failed);
    println!("  Pending: {}", stats.pages_pending);
    if stats.missing_files > 0 {
        println!("  Missing files: {}", stats.missing_files);
    }
    println!();

    println!("Assets:");
    println!("  Captured: {}", stats.assets_captured);
    println!("  Downloaded: {}", format_bytes(stats.bytes_downloaded));
    println!();

    let attempted = stats.pages_cloned + stats.pages_failed;
    let success_rate = if attempted > 0 {
        (stats.pages_cloned as f64 / attempted as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Success Rate: {:.1}% ({} / {} pages cloned)",
        success_rate, stats.pages_cloned, attempted
    );
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
