use thiserror::Error;

/// Message handed to callers whenever an upstream step fails.
pub const UPSTREAM_ERROR_MESSAGE: &str = "Something went wrong. Please try again later.";

/// Custom error enum to handle different types of errors
#[derive(Debug, Error)]
pub enum AniResolveError {
    /// Caller input rejected before any network call
    #[error("Validation error: {0}")]
    Validation(String),
    /// Proxy url failing the `^https?://` check
    #[error("Invalid proxy URL at index {index}: {url}")]
    InvalidProxyUrl { index: usize, url: String },
    /// Reqwest error
    #[error("Reqwest error: {0}")]
    Http(#[from] reqwest::Error),
    /// Upstream answered with a non-2xx status
    #[error("Upstream responded with {status} for {url}")]
    Status { status: u16, url: String },
    #[error("Failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid url: {0}")]
    Url(#[from] url::ParseError),
    /// A DOM node required to continue the pipeline is absent
    #[error("Required node not found: {0}")]
    MissingNode(&'static str),
    #[error("Server {0} not found")]
    ServerNotFound(String),
    #[error("Request cancelled")]
    Cancelled,
    /// The only error a public provider method lets through for upstream failures
    #[error("{}", UPSTREAM_ERROR_MESSAGE)]
    Upstream,
}

impl AniResolveError {
    pub fn validation(message: impl Into<String>) -> Self {
        AniResolveError::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AniResolveError::Validation(_) | AniResolveError::InvalidProxyUrl { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AniResolveError::Cancelled)
    }

    /// Errors the provider wrap hands back untouched instead of collapsing into `Upstream`.
    pub(crate) fn passes_through(&self) -> bool {
        self.is_validation() || self.is_cancelled() || matches!(self, AniResolveError::Upstream)
    }
}

pub type Result<T> = std::result::Result<T, AniResolveError>;
