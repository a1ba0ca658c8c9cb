//! `clone-manifest.json`, the index of an offline copy

use crate::checkpoint::Checkpoint;
use crate::state::JobPhase;
use crate::url::page_path;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use super::write_atomic;

/// File name of the manifest inside the output directory
pub const MANIFEST_FILE: &str = "clone-manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestPage {
    pub url: String,
    pub local_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestAsset {
    pub url: String,
    pub local_path: PathBuf,
    pub hash: String,
    pub size: u64,
    /// How many asset URLs share this content
    pub references: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFailure {
    pub url: String,
    pub error: String,
    pub attempts: u32,
    pub permanent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestCounters {
    pub pages_cloned: usize,
    pub pages_failed: usize,
    pub pages_pending: usize,
    pub assets_captured: usize,
    pub unique_assets: usize,
    pub bytes_downloaded: u64,
    pub bytes_saved: u64,
    pub missing_files: usize,
}

/// Everything a reader needs to navigate the offline copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneManifest {
    pub job_id: String,
    pub root_url: String,
    pub phase: JobPhase,
    pub started_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub pages: Vec<ManifestPage>,
    pub assets: Vec<ManifestAsset>,
    pub failures: Vec<ManifestFailure>,
    /// Completed pages whose file was not found while verifying
    pub missing_files: Vec<String>,
    pub counters: ManifestCounters,
}

impl CloneManifest {
    /// Builds a manifest from the job's checkpoint
    ///
    /// # Arguments
    ///
    /// * `checkpoint` - Final in-memory checkpoint of the job
    /// * `phase` - Phase the job was in when exporting
    /// * `missing_files` - URLs reported missing by the verifying phase
    /// * `references` - Dedup fan-in for a content hash
    /// * `bytes_saved` - Bytes saved by deduplication
    pub fn from_checkpoint<F>(
        checkpoint: &Checkpoint,
        phase: JobPhase,
        missing_files: Vec<String>,
        references: F,
        bytes_saved: u64,
    ) -> Self
    where
        F: Fn(&str) -> usize,
    {
        let pages: Vec<ManifestPage> = checkpoint
            .completed_urls
            .iter()
            .filter_map(|url| {
                let parsed = Url::parse(url).ok()?;
                Some(ManifestPage {
                    url: url.clone(),
                    local_path: page_path(&parsed),
                })
            })
            .collect();

        let assets: Vec<ManifestAsset> = checkpoint
            .downloaded_assets
            .iter()
            .map(|a| ManifestAsset {
                url: a.url.clone(),
                local_path: a.local_path.clone(),
                hash: a.hash.clone(),
                size: a.size,
                references: references(&a.hash).max(1),
            })
            .collect();

        let failures: Vec<ManifestFailure> = checkpoint
            .failed_urls
            .iter()
            .map(|(url, f)| ManifestFailure {
                url: url.clone(),
                error: f.error.clone(),
                attempts: f.attempts,
                permanent: f.permanent,
            })
            .collect();

        let unique_assets = {
            let mut hashes: Vec<&str> = assets.iter().map(|a| a.hash.as_str()).collect();
            hashes.sort_unstable();
            hashes.dedup();
            hashes.len()
        };

        let counters = ManifestCounters {
            pages_cloned: checkpoint.pages_cloned,
            pages_failed: failures.len(),
            pages_pending: checkpoint.pending_urls.len(),
            assets_captured: checkpoint.assets_captured,
            unique_assets,
            bytes_downloaded: checkpoint.bytes_downloaded,
            bytes_saved,
            missing_files: missing_files.len(),
        };

        Self {
            job_id: checkpoint.job_id.clone(),
            root_url: checkpoint.root_url.clone(),
            phase,
            started_at: checkpoint.started_at,
            generated_at: Utc::now(),
            pages,
            assets,
            failures,
            missing_files,
            counters,
        }
    }
}

/// Writes the manifest into `output_dir`
pub async fn write_manifest(output_dir: &Path, manifest: &CloneManifest) -> Result<PathBuf> {
    let path = output_dir.join(MANIFEST_FILE);
    let json = serde_json::to_vec_pretty(manifest)?;
    write_atomic(&path, &json).await?;
    Ok(path)
}

/// Reads the manifest from `output_dir`, if one was exported
pub async fn read_manifest(output_dir: &Path) -> Result<Option<CloneManifest>> {
    let path = output_dir.join(MANIFEST_FILE);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{DownloadedAsset, FailedUrl};
    use crate::config::JobOptions;
    use tempfile::TempDir;

    fn checkpoint(dir: &Path) -> Checkpoint {
        let mut cp = Checkpoint::new("https://x.com/", dir, JobOptions::default());
        cp.mark_completed("https://x.com/");
        cp.mark_completed("https://x.com/about");
        cp.mark_failed(
            "https://x.com/broken",
            FailedUrl {
                error: "HTTP 404".to_string(),
                attempts: 1,
                depth: 1,
                permanent: true,
            },
        );
        for (url, path) in [
            ("https://x.com/a.png", "_assets/x.com/a.png"),
            ("https://x.com/b.png", "_assets/x.com/b.png"),
        ] {
            cp.record_asset(DownloadedAsset {
                url: url.to_string(),
                local_path: PathBuf::from(path),
                hash: "same".to_string(),
                size: 10,
            });
        }
        cp
    }

    #[tokio::test]
    async fn test_manifest_written_and_read_back() {
        let dir = TempDir::new().unwrap();
        let cp = checkpoint(dir.path());

        let manifest = CloneManifest::from_checkpoint(
            &cp,
            JobPhase::Exporting,
            vec![],
            |hash| if hash == "same" { 2 } else { 0 },
            10,
        );
        assert_eq!(manifest.counters.pages_cloned, 2);
        assert_eq!(manifest.counters.pages_failed, 1);
        assert_eq!(manifest.counters.assets_captured, 2);
        assert_eq!(manifest.counters.unique_assets, 1);
        assert_eq!(manifest.assets[0].references, 2);
        assert!(manifest
            .pages
            .iter()
            .any(|p| p.local_path == PathBuf::from("x.com/about/index.html")));

        let path = write_manifest(dir.path(), &manifest).await.unwrap();
        assert!(path.ends_with(MANIFEST_FILE));

        let read = read_manifest(dir.path()).await.unwrap().unwrap();
        assert_eq!(read.counters, manifest.counters);
        assert_eq!(read.failures[0].url, "https://x.com/broken");
    }

    #[tokio::test]
    async fn test_read_missing_manifest() {
        let dir = TempDir::new().unwrap();
        assert!(read_manifest(dir.path()).await.unwrap().is_none());
    }
}
