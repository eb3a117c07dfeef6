//! OAuth2 authorization code identity provider.
//!
//! This crate drives the client side of the OAuth2 Authorization Code grant:
//! it redirects the user to the provider, checks the callback against a CSRF
//! state held in a pluggable cache, exchanges the code for an access token and
//! yields a [`PartialIdentity`]. It integrates with the ras-identity-core
//! traits so it can sit next to other identity providers.

mod cache;
mod client;
mod error;
mod identity;
mod provider;
mod settings;
mod state;


pub use cache::{CacheBackend, InMemoryCache};
pub use client::TokenExchangeClient;
pub use error::{ExchangeError, SettingsError, SettingsResult};
pub use identity::assemble_identity;
pub use provider::{ACCESS_DENIED, OAuth2Provider};
pub use settings::{
    ACCESS_TOKEN_URL, AUTHORIZATION_URL, CLIENT_ID, CLIENT_SECRET, DEFAULT_HTTP_TIMEOUT,
    DEFAULT_STATE_TTL, FORCE_HTTPS, HTTP_TIMEOUT_SECONDS, ProviderSettings, SCOPE,
    STATE_TTL_SECONDS, SettingsSource, settings_key,
};
pub use state::{CsrfState, CsrfStateStore, generate_session_id, generate_state_token};

// Re-export common types for convenience
pub use ras_identity_core::{
    AuthMethod, AuthRequest, AuthStep, FlowError, FlowResult, IdentityProvider, PartialIdentity,
    PublicOutcome, TokenRecord,
};
