/// Per-page status reported in progress events
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a single page task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// Rendered through the render pool
    Rendered,

    /// Served from the page cache without rendering
    Cached,

    /// Failed; eligible for retry on resume
    Failed,

    /// Failed with a non-retryable error
    PermanentlyFailed,
}

impl PageStatus {
    /// Returns true if the page was cloned (rendered or from cache)
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Rendered | Self::Cached)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rendered => "rendered",
            Self::Cached => "cached",
            Self::Failed => "failed",
            Self::PermanentlyFailed => "permanently_failed",
        }
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_success() {
        assert!(PageStatus::Rendered.is_success());
        assert!(PageStatus::Cached.is_success());
        assert!(!PageStatus::Failed.is_success());
        assert!(!PageStatus::PermanentlyFailed.is_success());
    }

    #[test]
    fn test_display() {
        assert_eq!(PageStatus::Cached.to_string(), "cached");
        assert_eq!(
            PageStatus::PermanentlyFailed.to_string(),
            "permanently_failed"
        );
    }
}
