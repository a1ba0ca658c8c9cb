//! Progress events for embedding callers
//!
//! The orchestrator emits a [`ProgressEvent`] after every page and on every
//! phase transition. Events go over an unbounded channel so a slow consumer
//! never blocks the crawl; a dropped receiver simply stops delivery.

use crate::state::{JobPhase, PageStatus};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// How many recently written files an event carries
pub const RECENT_FILES: usize = 5;

/// What triggered an event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ProgressStatus {
    Phase { phase: JobPhase },
    Page { status: PageStatus },
}

/// One progress update
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub current_page: usize,
    /// Best-effort total; grows as links are discovered
    pub total_pages: usize,
    pub current_url: Option<String>,
    pub status: ProgressStatus,
    pub assets_captured: usize,
    /// Most recent files written, newest last
    pub recent_files: Vec<PathBuf>,
    pub elapsed_minutes: f64,
}

/// Creates a progress channel
pub fn channel() -> (ProgressSender, UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender::new(Some(tx)), rx)
}

/// Sending half used by the orchestrator
///
/// Also remembers the last few files written so each event can carry them.
#[derive(Debug, Default)]
pub struct ProgressSender {
    tx: Option<UnboundedSender<ProgressEvent>>,
    recent: VecDeque<PathBuf>,
}

impl ProgressSender {
    pub fn new(tx: Option<UnboundedSender<ProgressEvent>>) -> Self {
        Self {
            tx,
            recent: VecDeque::with_capacity(RECENT_FILES),
        }
    }

    /// A sender that drops every event
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Remembers a written file
    pub fn file_written(&mut self, path: PathBuf) {
        if self.recent.len() == RECENT_FILES {
            self.recent.pop_front();
        }
        self.recent.push_back(path);
    }

    /// Sends an event built from the current counters
    pub fn emit(
        &self,
        current_page: usize,
        total_pages: usize,
        current_url: Option<String>,
        status: ProgressStatus,
        assets_captured: usize,
        elapsed: Duration,
    ) {
        let Some(tx) = &self.tx else {
            return;
        };
        let event = ProgressEvent {
            current_page,
            total_pages: total_pages.max(current_page),
            current_url,
            status,
            assets_captured,
            recent_files: self.recent.iter().cloned().collect(),
            elapsed_minutes: elapsed.as_secs_f64() / 60.0,
        };
        // A closed receiver only means nobody is listening anymore
        let _ = tx.send(event);
    }
}
