//! Core identity provider traits and types.
//!
//! A provider drives a two-phase flow: the first request produces a redirect,
//! the second completes it and yields a [`PartialIdentity`]. Every expected
//! failure is a [`FlowError`] variant so callers are forced to handle it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Access denied")]
    AccessDenied,

    #[error("Authorization server error from provider {provider_id}: {message}")]
    AuthorizationServerError { provider_id: String, message: String },

    #[error("Missing or mismatched state")]
    MissingOrMismatchedState,

    /// The detail lives in `cause` and is meant for server-side logs only.
    #[error("Token exchange failed")]
    TokenExchangeFailure {
        #[source]
        cause: BoxError,
    },

    #[error("Token exchange timed out")]
    Timeout,
}

pub type FlowResult<T> = Result<T, FlowError>;

/// The closed set of outcomes that may be shown to an end user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicOutcome {
    AccessDenied,
    AuthenticationFailed,
}

impl PublicOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            PublicOutcome::AccessDenied => "Sign-in was cancelled.",
            PublicOutcome::AuthenticationFailed => "Authentication failed. Please try again.",
        }
    }
}

impl FlowError {
    pub fn token_exchange(cause: impl Into<BoxError>) -> Self {
        FlowError::TokenExchangeFailure {
            cause: cause.into(),
        }
    }

    /// True for both a failed and a timed out token exchange.
    pub fn is_exchange_failure(&self) -> bool {
        matches!(
            self,
            FlowError::TokenExchangeFailure { .. } | FlowError::Timeout
        )
    }

    pub fn public_outcome(&self) -> PublicOutcome {
        match self {
            FlowError::AccessDenied => PublicOutcome::AccessDenied,
            _ => PublicOutcome::AuthenticationFailed,
        }
    }
}

/// Authentication method marker carried on every identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
    #[serde(rename = "oauth2")]
    OAuth2,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::OAuth2 => "oauth2",
        }
    }
}

/// Normalized access token response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Token-bearing identity shell. Profile enrichment happens downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialIdentity {
    pub provider_id: String,
    pub token: TokenRecord,
    pub auth_method: AuthMethod,
    pub profile: Option<serde_json::Value>,
}

/// An inbound request as seen by a provider: query parameters plus the
/// session identifier carried by the caller's session mechanism.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    query: HashMap<String, String>,
    session_id: Option<String>,
}

impl AuthRequest {
    pub fn new(query: HashMap<String, String>, session_id: Option<String>) -> Self {
        Self { query, session_id }
    }

    pub fn from_query_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            query: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            session_id: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

/// What a provider asks the caller to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthStep {
    /// Send the browser to `location` and attach `session_id` to the
    /// outgoing session so it comes back on the callback.
    Redirect { location: String, session_id: String },
    Authenticated(PartialIdentity),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn authenticate(&self, request: &AuthRequest) -> FlowResult<AuthStep>;
}
