//! Error types for provider connectors.

use thiserror::Error;

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Comprehensive error type for provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The provider answered, but not in a shape we can use (missing
    /// pagination metadata, truncated pages, malformed body).
    #[error("{provider} protocol error: {message}")]
    Protocol {
        /// Provider name.
        provider: String,
        /// What was wrong with the response.
        message: String,
    },

    /// API returned a non-success status.
    #[error("{provider} API error: {status} - {message}")]
    ApiError {
        /// Provider name.
        provider: String,
        /// HTTP status code.
        status: u16,
        /// Error message from API.
        message: String,
    },

    /// Authentication failed or credentials missing.
    #[error("{provider} authentication failed: {message}")]
    AuthenticationError {
        /// Provider name.
        provider: String,
        /// Error message from API.
        message: String,
    },

    /// Resource not found (project, group, user).
    #[error("{provider}: resource not found: {resource}")]
    NotFound {
        /// Provider name.
        provider: String,
        /// Path of the missing resource.
        resource: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    /// Unsupported provider type.
    #[error("Unsupported provider type: {0}")]
    UnsupportedProvider(String),

    /// A name or revision pattern is not a valid glob.
    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        /// The offending pattern.
        pattern: String,
        /// Parser error.
        source: globset::Error,
    },

    /// URL parsing failed.
    #[error("URL parsing failed: {0}")]
    UrlParseError(#[from] url::ParseError),
}

impl ProviderError {
    /// Create a protocol error.
    #[must_use]
    pub fn protocol(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from the provider's response rather than transport.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}
