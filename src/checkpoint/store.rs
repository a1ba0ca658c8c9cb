//! Checkpoint persistence
//!
//! Save order is: write `<primary>.tmp` and fsync it, copy the current primary
//! to the backup (through its own temp file), then rename the temp file over
//! the primary. A crash at any point leaves either the old or the new primary
//! readable, and the backup is always a complete earlier version.

use crate::assets::asset_exists;
use crate::checkpoint::{
    Checkpoint, DownloadedAsset, FailedUrl, PendingUrl, BACKUP_FILE, CHECKPOINT_FILE,
    SCHEMA_VERSION,
};
use crate::config::JobOptions;
use crate::{MirrorError, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome of [`CheckpointStore::load`]
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub can_resume: bool,
    /// Present when a checkpoint parsed, even if resume was refused
    pub checkpoint: Option<Checkpoint>,
    /// Why resume was refused, or how the checkpoint was recovered
    pub reason: Option<String>,
    /// The primary file was unreadable and the backup was used instead
    pub used_backup: bool,
}

impl LoadResult {
    fn refused(
        reason: impl Into<String>,
        checkpoint: Option<Checkpoint>,
        used_backup: bool,
    ) -> Self {
        Self {
            can_resume: false,
            checkpoint,
            reason: Some(reason.into()),
            used_backup,
        }
    }
}

struct StoreState {
    checkpoint: Checkpoint,
    completions_since_save: usize,
}

/// Single-writer owner of a job's checkpoint
pub struct CheckpointStore {
    dir: PathBuf,
    save_every: usize,
    state: Mutex<StoreState>,
}

impl CheckpointStore {
    /// Path of the primary checkpoint file inside `dir`
    pub fn primary_path(dir: &Path) -> PathBuf {
        dir.join(CHECKPOINT_FILE)
    }

    /// Path of the backup checkpoint file inside `dir`
    pub fn backup_path(dir: &Path) -> PathBuf {
        dir.join(BACKUP_FILE)
    }

    /// Creates a fresh checkpoint for a new job and persists it
    ///
    /// # Arguments
    ///
    /// * `dir` - Output directory (created if missing)
    /// * `root_url` - Normalized root URL
    /// * `options` - Job options exactly as given
    /// * `save_every` - Force a save every this many completions
    ///
    /// # Returns
    ///
    /// * `Ok(CheckpointStore)` - The checkpoint is on disk
    /// * `Err(MirrorError::CheckpointUnwritable)` - The directory cannot be written
    pub async fn initialize(
        dir: &Path,
        root_url: &str,
        options: JobOptions,
        save_every: usize,
    ) -> Result<Self> {
        let checkpoint = Checkpoint::new(root_url, dir, options);
        let store = Self::from_checkpoint(dir, checkpoint, save_every);
        store.save().await?;
        info!("Initialized checkpoint in {}", dir.display());
        Ok(store)
    }

    /// Wraps a loaded checkpoint for continued mutation
    pub fn from_checkpoint(dir: &Path, checkpoint: Checkpoint, save_every: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            save_every: save_every.max(1),
            state: Mutex::new(StoreState {
                checkpoint,
                completions_since_save: 0,
            }),
        }
    }

    /// Loads the checkpoint in `dir` and decides whether it can be resumed
    ///
    /// Resume is refused when no checkpoint exists, when neither file parses,
    /// when the schema version differs, when the recorded output directory is
    /// gone, or when a recorded asset no longer resolves on disk.
    pub async fn load(dir: &Path) -> LoadResult {
        let primary = Self::primary_path(dir);
        let backup = Self::backup_path(dir);

        let (checkpoint, used_backup, recovered_from) = match read_checkpoint(&primary).await {
            Ok(Some(cp)) => (cp, false, None),
            primary_result => {
                let primary_problem = match primary_result {
                    Err(e) => e,
                    _ => "primary checkpoint missing".to_string(),
                };
                match read_checkpoint(&backup).await {
                    Ok(Some(cp)) => {
                        warn!(
                            "Primary checkpoint unusable ({}); resuming from backup",
                            primary_problem
                        );
                        (cp, true, Some(primary_problem))
                    }
                    Ok(None) if primary.exists() => {
                        return LoadResult::refused(
                            format!("checkpoint corrupt and no backup: {}", primary_problem),
                            None,
                            false,
                        )
                    }
                    Ok(None) => return LoadResult::refused("no checkpoint found", None, false),
                    Err(backup_problem) => {
                        return LoadResult::refused(
                            format!(
                                "checkpoint corrupt: {}; backup corrupt: {}",
                                primary_problem, backup_problem
                            ),
                            None,
                            true,
                        )
                    }
                }
            }
        };

        if checkpoint.schema_version != SCHEMA_VERSION {
            return LoadResult::refused(
                format!(
                    "schema version {} does not match supported version {}",
                    checkpoint.schema_version, SCHEMA_VERSION
                ),
                Some(checkpoint),
                used_backup,
            );
        }

        if !checkpoint.output_dir.is_dir() {
            let reason = format!(
                "output directory {} no longer exists",
                checkpoint.output_dir.display()
            );
            return LoadResult::refused(reason, Some(checkpoint), used_backup);
        }

        if let Some(asset) = checkpoint.downloaded_assets.last() {
            if !asset_exists(&checkpoint.output_dir, &asset.local_path) {
                let reason = format!(
                    "recorded asset {} is missing from the output tree",
                    asset.local_path.display()
                );
                return LoadResult::refused(reason, Some(checkpoint), used_backup);
            }
        }

        LoadResult {
            can_resume: true,
            checkpoint: Some(checkpoint),
            reason: recovered_from.map(|p| format!("recovered from backup: {}", p)),
            used_backup,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns a copy of the current in-memory checkpoint
    pub async fn snapshot(&self) -> Checkpoint {
        self.state.lock().await.checkpoint.clone()
    }

    pub async fn set_config_hash(&self, hash: Option<String>) {
        self.state.lock().await.checkpoint.config_hash = hash;
    }

    /// Records a completed page; saves every `save_every` completions
    pub async fn mark_completed(&self, url: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.checkpoint.mark_completed(url) {
            return Ok(());
        }
        state.completions_since_save += 1;
        if state.completions_since_save >= self.save_every {
            self.persist(&mut state).await?;
        }
        Ok(())
    }

    /// Records a failed page and saves immediately
    pub async fn mark_failed(&self, url: &str, failure: FailedUrl) -> Result<()> {
        let mut state = self.state.lock().await;
        state.checkpoint.mark_failed(url, failure);
        self.persist(&mut state).await
    }

    /// Notes assets about to be downloaded
    pub async fn add_pending_assets<I>(&self, urls: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut state = self.state.lock().await;
        for url in urls {
            let known = state.checkpoint.downloaded_assets.iter().any(|a| a.url == url);
            if !known {
                state.checkpoint.pending_assets.insert(url);
            }
        }
    }

    /// Drops an asset from the pending set without recording a download
    pub async fn abandon_asset(&self, url: &str) {
        self.state.lock().await.checkpoint.pending_assets.remove(url);
    }

    /// Records a downloaded asset (in memory; persisted with the next save)
    pub async fn record_asset(&self, asset: DownloadedAsset) {
        self.state.lock().await.checkpoint.record_asset(asset);
    }

    /// Replaces the pending-URL snapshot (in memory)
    pub async fn set_pending(&self, pending: Vec<PendingUrl>) {
        self.state.lock().await.checkpoint.set_pending(pending);
    }

    /// Forces a save
    pub async fn save(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.persist(&mut state).await
    }

    /// Deletes both checkpoint files; a finished job leaves no resume artifact
    pub async fn mark_job_completed(&self) -> Result<()> {
        let _state = self.state.lock().await;
        for path in [Self::primary_path(&self.dir), Self::backup_path(&self.dir)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!("Job completed; removed checkpoint from {}", self.dir.display());
        Ok(())
    }

    async fn persist(&self, state: &mut StoreState) -> Result<()> {
        state.checkpoint.updated_at = Utc::now();
        let json = serde_json::to_vec_pretty(&state.checkpoint)?;

        let unwritable = |source: std::io::Error| MirrorError::CheckpointUnwritable {
            path: self.dir.display().to_string(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(unwritable)?;

        let primary = Self::primary_path(&self.dir);
        let backup = Self::backup_path(&self.dir);
        let tmp = self.dir.join(format!("{}.tmp", CHECKPOINT_FILE));

        write_synced(&tmp, &json).await.map_err(unwritable)?;

        if primary.exists() {
            let backup_tmp = self.dir.join(format!("{}.tmp", BACKUP_FILE));
            tokio::fs::copy(&primary, &backup_tmp)
                .await
                .map_err(unwritable)?;
            tokio::fs::rename(&backup_tmp, &backup)
                .await
                .map_err(unwritable)?;
        }

        tokio::fs::rename(&tmp, &primary)
            .await
            .map_err(unwritable)?;

        state.completions_since_save = 0;
        debug!(
            completed = state.checkpoint.completed_urls.len(),
            pending = state.checkpoint.pending_urls.len(),
            failed = state.checkpoint.failed_urls.len(),
            "Checkpoint saved"
        );
        Ok(())
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

/// Reads and parses a checkpoint file
///
/// `Ok(None)` means the file does not exist; `Err` carries a description of
/// why an existing file is unusable.
async fn read_checkpoint(path: &Path) -> std::result::Result<Option<Checkpoint>, String> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("{}: {}", path.display(), e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| format!("{}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(dir: &Path, save_every: usize) -> CheckpointStore {
        CheckpointStore::initialize(dir, "https://example.com/", JobOptions::default(), save_every)
            .await
            .unwrap()
    }

    fn transient(error: &str) -> FailedUrl {
        FailedUrl {
            error: error.to_string(),
            attempts: 4,
            depth: 1,
            permanent: false,
        }
    }

    async fn on_disk(dir: &Path) -> Checkpoint {
        let bytes = tokio::fs::read(CheckpointStore::primary_path(dir))
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_persists() {
        let dir = TempDir::new().unwrap();
        store(dir.path(), 5).await;

        let result = CheckpointStore::load(dir.path()).await;
        assert!(result.can_resume, "{:?}", result.reason);
        assert!(!result.used_backup);
        assert_eq!(
            result.checkpoint.unwrap().root_url,
            "https://example.com/"
        );
    }

    #[tokio::test]
    async fn test_saves_every_k_completions_not_every_success() {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path(), 3).await;

        store.mark_completed("https://example.com/1").await.unwrap();
        store.mark_completed("https://example.com/2").await.unwrap();
        assert!(on_disk(dir.path()).await.completed_urls.is_empty());

        store.mark_completed("https://example.com/3").await.unwrap();
        assert_eq!(on_disk(dir.path()).await.completed_urls.len(), 3);
    }

    #[tokio::test]
    async fn test_failure_saves_immediately() {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path(), 100).await;

        store
            .mark_failed("https://example.com/bad", transient("HTTP 503"))
            .await
            .unwrap();
        let cp = on_disk(dir.path()).await;
        assert_eq!(cp.failed_urls["https://example.com/bad"].attempts, 4);
    }

    #[tokio::test]
    async fn test_backup_holds_previous_version() {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path(), 1).await;

        store.mark_completed("https://example.com/a").await.unwrap();
        store.mark_completed("https://example.com/b").await.unwrap();

        let bytes = tokio::fs::read(CheckpointStore::backup_path(dir.path()))
            .await
            .unwrap();
        let backup: Checkpoint = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(backup.completed_urls.len(), 1);
        assert_eq!(on_disk(dir.path()).await.completed_urls.len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_primary_falls_back_to_backup() {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path(), 1).await;
        store.mark_completed("https://example.com/a").await.unwrap();
        store.mark_completed("https://example.com/b").await.unwrap();

        // Simulate a torn write of the primary.
        tokio::fs::write(CheckpointStore::primary_path(dir.path()), b"{\"schemaVers")
            .await
            .unwrap();

        let result = CheckpointStore::load(dir.path()).await;
        assert!(result.can_resume);
        assert!(result.used_backup);
        assert!(result.reason.unwrap().contains("backup"));
        assert_eq!(result.checkpoint.unwrap().completed_urls.len(), 1);
    }

    #[tokio::test]
    async fn test_stray_temp_file_does_not_affect_load() {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path(), 1).await;
        store.mark_completed("https://example.com/a").await.unwrap();

        // Crash after the temp write, before the rename.
        tokio::fs::write(dir.path().join(".checkpoint.json.tmp"), b"{partial")
            .await
            .unwrap();

        let result = CheckpointStore::load(dir.path()).await;
        assert!(result.can_resume);
        assert!(!result.used_backup);
        assert_eq!(result.checkpoint.unwrap().completed_urls.len(), 1);
    }

    #[tokio::test]
    async fn test_both_files_corrupt_refuses_resume() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(CheckpointStore::primary_path(dir.path()), b"nope")
            .await
            .unwrap();
        tokio::fs::write(CheckpointStore::backup_path(dir.path()), b"nope")
            .await
            .unwrap();

        let result = CheckpointStore::load(dir.path()).await;
        assert!(!result.can_resume);
        assert!(result.reason.unwrap().contains("corrupt"));
    }

    #[tokio::test]
    async fn test_missing_checkpoint_refuses_resume() {
        let dir = TempDir::new().unwrap();
        let result = CheckpointStore::load(dir.path()).await;
        assert!(!result.can_resume);
        assert!(result.checkpoint.is_none());
    }

    #[tokio::test]
    async fn test_schema_mismatch_refuses_resume() {
        let dir = TempDir::new().unwrap();
        let mut cp = Checkpoint::new("https://example.com/", dir.path(), JobOptions::default());
        cp.schema_version = SCHEMA_VERSION + 1;
        tokio::fs::write(
            CheckpointStore::primary_path(dir.path()),
            serde_json::to_vec(&cp).unwrap(),
        )
        .await
        .unwrap();

        let result = CheckpointStore::load(dir.path()).await;
        assert!(!result.can_resume);
        assert!(result.reason.unwrap().contains("schema version"));
    }

    #[tokio::test]
    async fn test_missing_asset_refuses_resume() {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path(), 1).await;
        store
            .record_asset(DownloadedAsset {
                url: "https://example.com/a.png".to_string(),
                local_path: PathBuf::from("_assets/example.com/a.png"),
                hash: "00".to_string(),
                size: 1,
            })
            .await;
        store.save().await.unwrap();

        let result = CheckpointStore::load(dir.path()).await;
        assert!(!result.can_resume);
        assert!(result.reason.unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_mark_job_completed_removes_files() {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path(), 1).await;
        store.mark_completed("https://example.com/a").await.unwrap();
        store.mark_job_completed().await.unwrap();

        assert!(!CheckpointStore::primary_path(dir.path()).exists());
        assert!(!CheckpointStore::backup_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn test_unwritable_directory_is_reported() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        tokio::fs::write(&blocker, b"x").await.unwrap();

        let result = CheckpointStore::initialize(
            &blocker.join("out"),
            "https://example.com/",
            JobOptions::default(),
            5,
        )
        .await;
        assert!(matches!(
            result,
            Err(MirrorError::CheckpointUnwritable { .. })
        ));
    }
}
