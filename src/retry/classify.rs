//! Error classification for page failures

use crate::PageError;

/// How a page error should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Worth retrying with backoff (timeouts, 5xx, dropped connections)
    Transient,

    /// Recorded as a permanent failure on first occurrence (4xx, unsupported)
    Permanent,

    /// Indicates the whole job cannot make progress
    JobFatal,
}

/// Classifies a page error
///
/// | Error | Class |
/// |-------|-------|
/// | `NavigationTimeout`, `ProtocolTimeout`, `Network` | Transient |
/// | `TargetClosed` | Transient (the retry gets the next wait strategy) |
/// | `Http` >= 500, `Http` 429 | Transient |
/// | `Http` other 4xx | Permanent |
/// | `AssetCapture`, `Unsupported`, `CheckpointCorrupt`, `PageWrite` | Permanent |
/// | `ResourcePoolExhausted` | JobFatal |
pub fn classify(error: &PageError) -> ErrorClass {
    match error {
        PageError::NavigationTimeout { .. }
        | PageError::ProtocolTimeout(_)
        | PageError::Network { .. }
        | PageError::TargetClosed { .. } => ErrorClass::Transient,
        PageError::Http { status, .. } if *status >= 500 || *status == 429 => {
            ErrorClass::Transient
        }
        PageError::Http { .. } => ErrorClass::Permanent,
        PageError::AssetCapture { .. }
        | PageError::Unsupported(_)
        | PageError::CheckpointCorrupt(_)
        | PageError::PageWrite { .. } => ErrorClass::Permanent,
        PageError::ResourcePoolExhausted(_) => ErrorClass::JobFatal,
    }
}

/// Returns true if a page that ultimately failed with `error` should never be
/// retried, not even by a resumed job
///
/// `TargetClosed` is retryable within the wait-strategy chain, but once every
/// fallback has been exhausted it is recorded as permanent.
pub fn is_permanent(error: &PageError) -> bool {
    matches!(classify(error), ErrorClass::Permanent)
        || matches!(error, PageError::TargetClosed { .. })
}

/// A short operator-facing hint logged alongside a page failure
pub fn recovery_hint(error: &PageError) -> &'static str {
    match error {
        PageError::NavigationTimeout { .. } => {
            "page is slow to settle; raise render.navigation-timeout-ms or add a faster wait strategy"
        }
        PageError::ProtocolTimeout(_) => "renderer stopped responding; it will be replaced",
        PageError::TargetClosed { .. } => "render context crashed; lower job.concurrency",
        PageError::Http { status, .. } if *status == 429 => {
            "server is rate limiting; lower job.concurrency"
        }
        PageError::Http { status, .. } if *status >= 500 => {
            "server error; the page will be retried on resume"
        }
        PageError::Http { .. } => "page is missing or forbidden; it will not be retried",
        PageError::Network { .. } => "check connectivity or render.proxy",
        PageError::AssetCapture { .. } => "asset left pointing at its original URL",
        PageError::CheckpointCorrupt(_) => "delete the checkpoint or run with --fresh",
        PageError::PageWrite { .. } => "page could not be saved under the output directory",
        PageError::ResourcePoolExhausted(_) => {
            "no renderer available; raise pool.max-size or pool.acquire-timeout-secs"
        }
        PageError::Unsupported(_) => "use a renderer that supports this capability",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn http(status: u16) -> PageError {
        PageError::Http {
            url: "https://example.com/".to_string(),
            status,
        }
    }

    #[test]
    fn test_http_classes() {
        assert_eq!(classify(&http(500)), ErrorClass::Transient);
        assert_eq!(classify(&http(503)), ErrorClass::Transient);
        assert_eq!(classify(&http(429)), ErrorClass::Transient);
        assert_eq!(classify(&http(404)), ErrorClass::Permanent);
        assert_eq!(classify(&http(403)), ErrorClass::Permanent);
    }

    #[test]
    fn test_timeouts_are_transient() {
        let err = PageError::NavigationTimeout {
            url: "https://example.com/".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(classify(&err), ErrorClass::Transient);
        assert!(!is_permanent(&err));
    }

    #[test]
    fn test_target_closed_is_permanent_once_exhausted() {
        let err = PageError::TargetClosed {
            url: "https://example.com/".to_string(),
        };
        assert_eq!(classify(&err), ErrorClass::Transient);
        assert!(is_permanent(&err));
    }

    #[test]
    fn test_pool_exhaustion_is_job_fatal() {
        let err = PageError::ResourcePoolExhausted(Duration::from_secs(1));
        assert_eq!(classify(&err), ErrorClass::JobFatal);
        assert!(!is_permanent(&err));
    }

    #[test]
    fn test_page_write_failures_are_permanent() {
        let err = PageError::PageWrite {
            url: "https://example.com/long".to_string(),
            message: "File name too long".to_string(),
        };
        assert_eq!(classify(&err), ErrorClass::Permanent);
        assert!(is_permanent(&err));
    }

    #[test]
    fn test_every_error_has_a_hint() {
        assert!(!recovery_hint(&http(404)).is_empty());
        assert!(!recovery_hint(&PageError::Unsupported("screenshots")).is_empty());
    }
}
