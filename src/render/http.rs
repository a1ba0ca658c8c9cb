//! Static HTTP renderer
//!
//! Fetches the document with `reqwest` and returns it without executing any
//! scripts. Every [`WaitStrategy`] behaves the same here since there is no
//! page lifecycle to wait on.

use crate::crawler::extract_links;
use crate::render::{Navigation, RenderConfig, Renderer, RendererFactory, WaitStrategy};
use crate::PageError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_LANGUAGE, ETAG, LAST_MODIFIED};
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// User agent sent when the render config does not set one
pub const DEFAULT_USER_AGENT: &str = concat!("sumi-mirror/", env!("CARGO_PKG_VERSION"));

/// Builds an HTTP client bound to a render identity
///
/// # Arguments
///
/// * `config` - User agent, proxy and locale to apply
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Invalid proxy or TLS backend failure
pub fn build_http_client(config: &RenderConfig) -> Result<Client, reqwest::Error> {
    let user_agent = config
        .user_agent
        .clone()
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

    let mut headers = HeaderMap::new();
    if let Some(locale) = &config.locale {
        if let Ok(value) = HeaderValue::from_str(locale) {
            headers.insert(ACCEPT_LANGUAGE, value);
        }
    }

    let mut builder = Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = &config.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
    }

    builder.build()
}

/// Maps a transport-level `reqwest` failure onto the page error taxonomy
pub(crate) fn transport_error(url: &Url, timeout: Duration, error: reqwest::Error) -> PageError {
    if error.is_timeout() {
        PageError::NavigationTimeout {
            url: url.to_string(),
            timeout,
        }
    } else {
        PageError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

/// A renderer backed by plain HTTP GET requests
pub struct HttpRenderer {
    client: Client,
    current: Option<(Url, String)>,
    closed: bool,
}

impl HttpRenderer {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            current: None,
            closed: false,
        }
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn navigate(
        &mut self,
        url: &Url,
        _wait: WaitStrategy,
        timeout: Duration,
    ) -> Result<Navigation, PageError> {
        if self.closed {
            return Err(PageError::TargetClosed {
                url: url.to_string(),
            });
        }

        let fetch = async {
            let response = self.client.get(url.clone()).send().await?;
            let status = response.status().as_u16();
            let final_url = response.url().to_string();
            let header = |name: HeaderName| {
                response
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            let etag = header(ETAG);
            let last_modified = header(LAST_MODIFIED);
            let html = response.text().await?;
            Ok::<_, reqwest::Error>((status, final_url, html, etag, last_modified))
        };

        let (status, final_url, html, etag, last_modified) =
            match tokio::time::timeout(timeout, fetch).await {
                Ok(Ok(parts)) => parts,
                Ok(Err(e)) => return Err(transport_error(url, timeout, e)),
                Err(_) => {
                    return Err(PageError::NavigationTimeout {
                        url: url.to_string(),
                        timeout,
                    })
                }
            };

        let base = Url::parse(&final_url).unwrap_or_else(|_| url.clone());
        self.current = Some((base, html.clone()));

        Ok(Navigation {
            html,
            status,
            final_url,
            etag,
            last_modified,
        })
    }

    async fn extract_links(&mut self) -> Result<Vec<String>, PageError> {
        let (base, html) = self
            .current
            .as_ref()
            .ok_or(PageError::Unsupported("link extraction before navigation"))?;
        Ok(extract_links(html, base)
            .into_iter()
            .map(String::from)
            .collect())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, PageError> {
        Err(PageError::Unsupported("screenshots"))
    }

    async fn is_healthy(&mut self) -> bool {
        !self.closed
    }

    async fn close(&mut self) {
        self.closed = true;
        self.current = None;
    }
}

/// Creates one [`HttpRenderer`] (with its own connection pool) per resource
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpRendererFactory;

#[async_trait]
impl RendererFactory for HttpRendererFactory {
    async fn create(&self, config: &RenderConfig) -> Result<Box<dyn Renderer>, PageError> {
        let client = build_http_client(config).map_err(|e| PageError::Network {
            url: config.proxy.clone().unwrap_or_default(),
            message: format!("failed to build HTTP client: {}", e),
        })?;
        Ok(Box::new(HttpRenderer::new(client)))
    }
}
