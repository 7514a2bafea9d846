//! Places-search provider capability
//!
//! The pipeline only knows [`PlacesProvider`]: a text search anchored on a
//! postal code and a details lookup by place id. Each call is a single
//! attempt; retries and backoff belong to the caller. A search may span
//! several HTTP requests, and every one of them must first pass the
//! caller's [`RequestGate`].

use crate::postal::PostalCode;
use crate::RawPlaceRecord;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub mod google;

/// HTTP connect timeout (seconds)
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Build an HTTP client with the given overall request timeout
///
/// Connect timeout is fixed; `request_timeout` bounds the whole request so
/// that no provider call blocks indefinitely.
///
/// # Errors
/// [`ProviderError::ClientSetup`] when the TLS backend cannot be initialized.
pub fn build_http_client(request_timeout: Duration) -> ProviderResult<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(request_timeout)
        .build()
        .map_err(|e| ProviderError::ClientSetup(e.to_string()))
}

/// Provider errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Credentials rejected; no further requests should be made
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Request budget exhausted on the provider side
    #[error("quota exceeded")]
    QuotaExceeded {
        /// Pause requested by the provider, if any
        retry_after: Option<Duration>,
    },

    /// The postal code could not be resolved to a location
    #[error("could not geocode postal code '{0}'")]
    GeocodeFailure(String),

    /// Timeout, connection failure or 5xx response
    #[error("network error: {0}")]
    Network(String),

    /// Details lookup for an unknown place
    #[error("place not found: {0}")]
    NotFound(String),

    /// Response body could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    ClientSetup(String),
}

impl ProviderError {
    /// Worth retrying after a backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::QuotaExceeded { .. } | ProviderError::Network(_)
        )
    }

    /// Ends the whole run on first occurrence
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, ProviderError::Auth(_))
    }

    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Auth(_) => "auth",
            ProviderError::QuotaExceeded { .. } => "quota_exceeded",
            ProviderError::GeocodeFailure(_) => "geocode_failure",
            ProviderError::Network(_) => "network",
            ProviderError::NotFound(_) => "not_found",
            ProviderError::InvalidResponse(_) => "invalid_response",
            ProviderError::ClientSetup(_) => "client_setup",
        }
    }

    /// Pause requested by the provider, for quota errors
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::QuotaExceeded { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Admission control consulted before every outbound request.
#[async_trait]
pub trait RequestGate: Send + Sync {
    /// Wait until one more request may be sent
    async fn admit(&self);
}

/// Source of business listings.
#[async_trait]
pub trait PlacesProvider: Send + Sync {
    /// Search for `query` around `location`.
    ///
    /// # Arguments
    /// * `query` - Free-text query, already containing the postal code
    /// * `location` - Postal code the search is anchored on
    /// * `radius_m` - Search radius in metres
    /// * `gate` - Admits each HTTP request the search makes
    ///
    /// # Returns
    /// Results in provider order, possibly empty
    async fn search(
        &self,
        query: &str,
        location: &PostalCode,
        radius_m: u32,
        gate: &dyn RequestGate,
    ) -> ProviderResult<Vec<RawPlaceRecord>>;

    /// Look up full details for one place
    async fn details(&self, place_id: &str, gate: &dyn RequestGate) -> ProviderResult<RawPlaceRecord>;

    /// Provider name for logs
    fn name(&self) -> &'static str;
}
