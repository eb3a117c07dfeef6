//! OAuth2 state management for CSRF protection.

use crate::cache::CacheBackend;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::{Rng, thread_rng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::warn;
use uuid::Uuid;

/// CSRF state stored during the authorization flow, keyed by session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfState {
    pub session_id: String,
    pub state_token: String,
    pub created_at: DateTime<Utc>,
}

impl CsrfState {
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            state_token: generate_state_token(),
            created_at: Utc::now(),
        }
    }

    /// Exact, constant-time comparison against the `state` query parameter.
    pub fn matches(&self, candidate: &str) -> bool {
        self.state_token
            .as_bytes()
            .ct_eq(candidate.as_bytes())
            .into()
    }
}

pub fn generate_state_token() -> String {
    Uuid::new_v4().to_string()
}

pub fn generate_session_id() -> String {
    let bytes: [u8; 32] = thread_rng().r#gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Thin wrapper over a [`CacheBackend`] holding one state per session.
#[derive(Clone)]
pub struct CsrfStateStore {
    cache: Arc<dyn CacheBackend>,
    provider_id: String,
}

impl CsrfStateStore {
    pub fn new(provider_id: impl Into<String>, cache: Arc<dyn CacheBackend>) -> Self {
        Self {
            cache,
            provider_id: provider_id.into(),
        }
    }

    fn cache_key(&self, session_id: &str) -> String {
        format!("oauth2:csrf:{}:{}", self.provider_id, session_id)
    }

    /// Store a state for `state.session_id`, replacing any earlier one.
    pub async fn put(&self, state: &CsrfState, ttl: Duration) {
        let value = match serde_json::to_string(state) {
            Ok(value) => value,
            Err(e) => {
                // Unreachable for this type; the callback will fail closed.
                warn!(provider_id = %self.provider_id, "Failed to encode CSRF state: {}", e);
                return;
            }
        };
        self.cache
            .set(&self.cache_key(&state.session_id), value, ttl)
            .await;
    }

    /// A miss covers expiry, another node's cache, and tampering alike.
    pub async fn get(&self, session_id: &str) -> Option<CsrfState> {
        let raw = self.cache.get(&self.cache_key(session_id)).await?;

        match serde_json::from_str::<CsrfState>(&raw) {
            Ok(state) if state.session_id == session_id => Some(state),
            Ok(_) => {
                warn!(provider_id = %self.provider_id, "Cached CSRF state belongs to another session");
                None
            }
            Err(e) => {
                warn!(provider_id = %self.provider_id, "Discarding undecodable CSRF state: {}", e);
                None
            }
        }
    }
}
