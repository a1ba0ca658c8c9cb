/// Job phase definitions for the clone state machine
///
/// A job moves `Initializing → Discovering → Crawling → LinkFixing → Verifying
/// → Exporting` and ends in one of the terminal phases.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current phase of a clone job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    // ===== Active Phases =====
    /// Checkpoint loaded or created, scheduler seeded
    Initializing,

    /// Fetching robots.txt and sitemaps to seed the frontier
    Discovering,

    /// Dequeue / render / enqueue loop
    Crawling,

    /// Rewriting links in saved pages to local paths
    LinkFixing,

    /// Confirming saved files exist
    Verifying,

    /// Writing the clone manifest
    Exporting,

    // ===== Terminal Phases =====
    /// Frontier exhausted or page budget reached
    Completed,

    /// The elapsed-time budget stopped the crawl
    TimeLimitReached,

    /// No page could be cloned, or a job-level error occurred
    Failed,
}

impl JobPhase {
    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::TimeLimitReached | Self::Failed
        )
    }

    /// Returns true if the transition `self -> next` is allowed
    ///
    /// Any active phase may fail. Post-crawl phases run for both normal and
    /// time-limited crawls, so `Exporting` may end in either terminal success.
    pub fn can_transition_to(&self, next: JobPhase) -> bool {
        use JobPhase::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }

        matches!(
            (self, next),
            (Initializing, Discovering)
                | (Initializing, Crawling)
                | (Discovering, Crawling)
                | (Crawling, LinkFixing)
                | (LinkFixing, Verifying)
                | (Verifying, Exporting)
                | (Exporting, Completed)
                | (Exporting, TimeLimitReached)
        )
    }

    /// Stable string form used in progress events and the manifest
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Discovering => "discovering",
            Self::Crawling => "crawling",
            Self::LinkFixing => "link_fixing",
            Self::Verifying => "verifying",
            Self::Exporting => "exporting",
            Self::Completed => "completed",
            Self::TimeLimitReached => "time_limit_reached",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
