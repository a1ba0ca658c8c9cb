//! Render capability and the bounded pool of render resources
//!
//! The actual rendering engine is an external collaborator. The core only
//! needs the [`Renderer`] shape (navigate, extract links, screenshot, close) and
//! a [`RendererFactory`] that can create one for a given identity. A static
//! HTTP implementation ([`HttpRendererFactory`]) is provided so the crate is
//! usable without a browser.

mod http;
mod pool;

pub use http::{build_http_client, HttpRenderer, HttpRendererFactory, DEFAULT_USER_AGENT};
pub(crate) use http::transport_error;
pub use pool::{PoolStats, RenderLease, RenderPool, RenderPoolConfig};

use crate::config::RenderSettings;
use crate::PageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

/// When a navigation is considered finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitStrategy {
    /// No network activity for a short window (fastest for most sites)
    NetworkIdle,
    /// The DOM has been parsed
    DomContentLoaded,
    /// The full load event, including subresources
    Load,
}

impl WaitStrategy {
    /// The fallback chain tried in order when navigation fails
    pub fn default_chain() -> Vec<WaitStrategy> {
        vec![
            WaitStrategy::NetworkIdle,
            WaitStrategy::DomContentLoaded,
            WaitStrategy::Load,
        ]
    }
}

impl fmt::Display for WaitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NetworkIdle => "network-idle",
            Self::DomContentLoaded => "dom-content-loaded",
            Self::Load => "load",
        };
        write!(f, "{}", name)
    }
}

/// Identity and network configuration a render resource is bound to
///
/// Pooled resources are only reused for callers asking for an equal config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RenderConfig {
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
    pub locale: Option<String>,
}

impl From<&RenderSettings> for RenderConfig {
    fn from(settings: &RenderSettings) -> Self {
        Self {
            user_agent: settings.user_agent.clone(),
            proxy: settings.proxy.clone(),
            locale: settings.locale.clone(),
        }
    }
}

/// Result of a navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    /// Rendered document
    pub html: String,
    /// HTTP status of the main document
    pub status: u16,
    /// URL after redirects
    pub final_url: String,
    /// Response validators, when the renderer can see them
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// A stateful render resource (one browser context, one HTTP session, ...)
///
/// A renderer is exclusively owned by one caller at a time through a
/// [`RenderLease`], so methods take `&mut self`.
#[async_trait]
pub trait Renderer: Send {
    /// Navigates to `url`, waiting according to `wait`, failing after `timeout`
    async fn navigate(
        &mut self,
        url: &Url,
        wait: WaitStrategy,
        timeout: Duration,
    ) -> Result<Navigation, PageError>;

    /// Returns the absolute link targets of the current document
    async fn extract_links(&mut self) -> Result<Vec<String>, PageError>;

    /// Captures the current document as a PNG
    async fn screenshot(&mut self) -> Result<Vec<u8>, PageError>;

    /// Cheap liveness probe used before handing a pooled resource out
    async fn is_healthy(&mut self) -> bool {
        true
    }

    /// Releases any external process or connection
    async fn close(&mut self);
}

/// Creates render resources for the pool
#[async_trait]
pub trait RendererFactory: Send + Sync {
    async fn create(&self, config: &RenderConfig) -> Result<Box<dyn Renderer>, PageError>;
}
