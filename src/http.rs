use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    env::DEFAULT_TIMEOUT_MS,
    error::{AniResolveError, Result},
    proxy::{ActiveProxy, ProxyConfig, ProxyState, PROXY_KEY_HEADER},
};

pub type TokenProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&AniResolveError) + Send + Sync>;

tokio::task_local! {
    static CANCELLATION: CancellationToken;
}

/// Runs `fut` with `token` attached to every request the client makes inside it.
///
/// Once the token fires, the in-flight call fails with [`AniResolveError::Cancelled`] and
/// nothing after it is dispatched.
pub async fn with_cancellation<F: Future>(token: CancellationToken, fut: F) -> F::Output {
    CANCELLATION.scope(token, fut).await
}

fn current_cancellation() -> Option<CancellationToken> {
    CANCELLATION.try_with(CancellationToken::clone).ok()
}

#[derive(Clone)]
pub struct HttpClientOptions {
    pub base_url: String,
    pub timeout: Duration,
    pub default_headers: Vec<(String, String)>,
    pub get_token: Option<TokenProvider>,
    pub on_error: Option<ErrorHook>,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        HttpClientOptions {
            base_url: String::new(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            default_headers: Vec::new(),
            get_token: None,
            on_error: None,
        }
    }
}

impl HttpClientOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpClientOptions {
            base_url: base_url.into(),
            ..HttpClientOptions::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn token_provider(mut self, get_token: TokenProvider) -> Self {
        self.get_token = Some(get_token);
        self
    }

    pub fn on_error(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }
}

/// Reqwest client bound to one base url, with bearer injection and a swappable proxy rewrite.
///
/// Clones share the connection pool and the proxy state.
#[derive(Clone)]
pub struct HttpClient {
    inner: Client,
    base_url: String,
    get_token: Option<TokenProvider>,
    on_error: Option<ErrorHook>,
    proxy: Arc<ProxyState>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("proxy", &self.proxy.snapshot().map(|p| p.url))
            .finish_non_exhaustive()
    }
}

pub fn header_map(pairs: &[(&str, &str)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        headers.insert(parse_header_name(name)?, parse_header_value(value)?);
    }
    Ok(headers)
}

fn parse_header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| AniResolveError::validation(format!("invalid header name `{}`", name)))
}

fn parse_header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| AniResolveError::validation(format!("invalid header value `{}`", value)))
}

impl HttpClient {
    pub fn new(options: HttpClientOptions) -> Result<Self> {
        let mut defaults = HeaderMap::new();
        for (name, value) in &options.default_headers {
            defaults.insert(parse_header_name(name)?, parse_header_value(value)?);
        }

        let inner = Client::builder()
            .timeout(options.timeout)
            .default_headers(defaults)
            .build()?;

        Ok(HttpClient {
            inner,
            base_url: options.base_url,
            get_token: options.get_token,
            on_error: options.on_error,
            proxy: Arc::new(ProxyState::default()),
        })
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        HttpClient::new(HttpClientOptions::new(base_url))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Validates then installs `config`, replacing any previous proxy and rotation.
    ///
    /// On a validation error nothing changes.
    pub fn set_proxy(&self, config: ProxyConfig) -> Result<()> {
        self.proxy.install(config)
    }

    pub fn stop_proxy_rotation(&self) {
        self.proxy.stop_rotation();
    }

    pub fn active_proxy(&self) -> Option<ActiveProxy> {
        self.proxy.snapshot()
    }

    pub fn active_rotations(&self) -> usize {
        self.proxy.active_rotations()
    }

    /// Absolute urls pass through; anything else is joined onto the base url.
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") || self.base_url.is_empty() {
            return url.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }

    pub async fn get_text(&self, url: &str, headers: Option<HeaderMap>) -> Result<String> {
        self.send(Method::GET, url, headers, None::<&()>).await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: Option<HeaderMap>,
    ) -> Result<T> {
        let body = self.send(Method::GET, url, headers, None::<&()>).await?;
        self.parse_json(&body)
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        headers: Option<HeaderMap>,
    ) -> Result<T> {
        let body = self.send(Method::POST, url, headers, Some(body)).await?;
        self.parse_json(&body)
    }

    fn parse_json<T: DeserializeOwned>(&self, body: &str) -> Result<T> {
        serde_json::from_str(body).map_err(|e| self.report(AniResolveError::from(e)))
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        headers: Option<HeaderMap>,
        body: Option<&B>,
    ) -> Result<String> {
        let cancel = current_cancellation();
        if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(AniResolveError::Cancelled);
        }

        let target = self.resolve_url(url);
        // One read per request; a rotation after this point does not affect it.
        let proxy = self.proxy.snapshot();
        let final_url = match &proxy {
            Some(active) => active.rewrite(&target),
            None => target,
        };

        let mut request = self.inner.request(method.clone(), &final_url);
        if let Some(headers) = headers {
            request = request.headers(headers);
        }
        if let Some(active) = &proxy {
            request = request.header(PROXY_KEY_HEADER, parse_header_value(&active.key)?);
        }
        if let Some(token) = self.get_token.as_ref().and_then(|get| get()) {
            request = request.header(AUTHORIZATION, parse_header_value(&format!("Bearer {}", token))?);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(method = %method, url = %final_url, "dispatching request");

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                warn!(status = status.as_u16(), url = %final_url, "upstream returned non-success status");
                return Err(AniResolveError::Status {
                    status: status.as_u16(),
                    url: final_url.clone(),
                });
            }
            Ok(response.text().await?)
        };

        let outcome = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(AniResolveError::Cancelled),
                outcome = exchange => outcome,
            },
            None => exchange.await,
        };

        outcome.map_err(|e| self.report(e))
    }

    fn report(&self, error: AniResolveError) -> AniResolveError {
        if let Some(hook) = &self.on_error {
            hook(&error);
        }
        error
    }
}
