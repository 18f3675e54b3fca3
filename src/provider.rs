use std::future::Future;

use async_trait::async_trait;
use tracing::error;

use crate::{
    error::{AniResolveError, Result},
    http::HttpClient,
    model::{MediaInfo, MediaResult, ProviderStats, SearchPage, Source},
    proxy::ProxyConfig,
    servers::{StreamingServer, SubOrDub},
};

/// The capability set every content source offers.
///
/// Public methods fail with either a validation error, a cancellation, or the generic
/// [`AniResolveError::Upstream`]; the underlying cause is only logged.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn base_url(&self) -> &str;

    fn is_nsfw(&self) -> bool {
        false
    }

    fn is_working(&self) -> bool {
        true
    }

    fn stats(&self) -> ProviderStats;

    async fn search(&self, query: &str, page: u32) -> Result<SearchPage<MediaResult>>;

    async fn fetch_info(&self, id: &str) -> Result<MediaInfo>;

    async fn fetch_streams(
        &self,
        episode_id: &str,
        server: StreamingServer,
        sub_or_dub: SubOrDub,
    ) -> Result<Source>;

    fn set_proxy(&self, config: ProxyConfig) -> Result<()>;
}

/// Shared plumbing injected into each provider: its http client and the error wrap.
#[derive(Debug, Clone)]
pub struct Toolkit {
    name: &'static str,
    client: HttpClient,
}

impl Toolkit {
    pub fn new(name: &'static str, client: HttpClient) -> Self {
        Toolkit { name, client }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }

    pub fn set_proxy(&self, config: ProxyConfig) -> Result<()> {
        self.client.set_proxy(config)
    }

    /// Logs an upstream failure under `step` and swaps it for the generic error.
    pub fn wrap<T>(&self, step: &str, result: Result<T>) -> Result<T> {
        result.map_err(|e| {
            if e.passes_through() {
                return e;
            }
            error!(provider = self.name, step, error = %e, "provider step failed");
            AniResolveError::Upstream
        })
    }

    pub async fn guard<T, F>(&self, step: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.wrap(step, fut.await)
    }

    pub fn stats(&self, class_path: &str, languages: &[&str], logo: Option<&str>) -> ProviderStats {
        ProviderStats {
            name: self.name.to_string(),
            base_url: self.base_url().to_string(),
            class_path: class_path.to_string(),
            is_nsfw: false,
            is_working: true,
            languages: languages.iter().map(|l| l.to_string()).collect(),
            logo: logo.map(str::to_string),
        }
    }
}
