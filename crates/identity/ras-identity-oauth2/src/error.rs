//! OAuth2 error types.

use thiserror::Error;

pub type SettingsResult<T> = Result<T, SettingsError>;

/// Fatal provider misconfiguration, raised when the provider is built.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(
        "Provider '{provider_id}' is missing required configuration keys: {}",
        .keys.join(", ")
    )]
    MissingKeys {
        provider_id: String,
        keys: Vec<String>,
    },

    #[error("Provider '{provider_id}' has an invalid value for '{key}': {reason}")]
    InvalidValue {
        provider_id: String,
        key: String,
        reason: String,
    },

    #[error("Failed to build HTTP client for provider '{provider_id}': {source}")]
    HttpClient {
        provider_id: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Failure of the code-for-token exchange. Never shown to end users.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token request timed out")]
    Timeout,

    #[error("Token endpoint returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Invalid token response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}
