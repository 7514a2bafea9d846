//! CLI error types and conversions

use crate::harvest::{ConfigError, IngestionError};
use crate::metrics::MetricsError;
use crate::output::OutputError;
use crate::postal::PostalCodeError;
use crate::provider::ProviderError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Harvest run failed
    #[error("harvest error: {0}")]
    IngestionError(#[from] IngestionError),

    /// Postal code error
    #[error("postal code error: {0}")]
    PostalCodeError(#[from] PostalCodeError),

    /// Invalid harvest configuration
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Provider could not be set up
    #[error("provider error: {0}")]
    ProviderError(#[from] ProviderError),

    /// Metrics exporter could not start
    #[error("metrics error: {0}")]
    MetricsError(#[from] MetricsError),

    /// Summary could not be serialized
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Required setting missing
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}
