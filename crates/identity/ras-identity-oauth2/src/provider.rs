//! OAuth2 authorization code flow engine.
//!
//! Each request is routed on its query parameters alone:
//!
//! 1. `error` present: the authorization server refused, fail immediately.
//! 2. `code` present: a callback. Check the CSRF state for the session, then
//!    exchange the code for a token.
//! 3. Neither: start the flow. Persist a fresh state and redirect.
//!
//! Nothing is kept in process between the two halves of the flow. The state
//! token lives in the cache and the session id travels with the browser.

use crate::cache::CacheBackend;
use crate::client::TokenExchangeClient;
use crate::error::{ExchangeError, SettingsError, SettingsResult};
use crate::identity::assemble_identity;
use crate::settings::{ProviderSettings, SettingsSource};
use crate::state::{CsrfState, CsrfStateStore, generate_session_id};
use async_trait::async_trait;
use ras_identity_core::{
    AuthRequest, AuthStep, FlowError, FlowResult, IdentityProvider, PartialIdentity,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

/// Canonical `error` value sent when the user declines consent.
pub const ACCESS_DENIED: &str = "access_denied";

/// OAuth2 provider that implements IdentityProvider
#[derive(Clone)]
pub struct OAuth2Provider {
    settings: Arc<ProviderSettings>,
    callback_url: String,
    state_store: CsrfStateStore,
    client: TokenExchangeClient,
}

impl OAuth2Provider {
    /// `callback_url` is the fixed route the provider redirects back to.
    pub fn new(
        settings: ProviderSettings,
        mut callback_url: Url,
        cache: Arc<dyn CacheBackend>,
    ) -> SettingsResult<Self> {
        let provider_id = settings.provider_id().to_string();

        match callback_url.scheme() {
            "https" => {}
            "http" if settings.force_https_callback() => {
                callback_url
                    .set_scheme("https")
                    .map_err(|()| SettingsError::InvalidValue {
                        provider_id: provider_id.clone(),
                        key: "redirect_uri".to_string(),
                        reason: "cannot switch callback scheme to https".to_string(),
                    })?;
            }
            "http" => {}
            other => {
                return Err(SettingsError::InvalidValue {
                    provider_id,
                    key: "redirect_uri".to_string(),
                    reason: format!("unsupported scheme '{}'", other),
                });
            }
        }

        let client = TokenExchangeClient::new(settings.http_timeout()).map_err(|source| {
            SettingsError::HttpClient {
                provider_id: provider_id.clone(),
                source,
            }
        })?;

        Ok(Self {
            settings: Arc::new(settings),
            callback_url: callback_url.into(),
            state_store: CsrfStateStore::new(provider_id, cache),
            client,
        })
    }

    /// Load settings for `provider_id` and build the provider in one step, so
    /// misconfiguration surfaces at startup.
    pub fn from_config<S>(
        provider_id: &str,
        source: &S,
        callback_url: Url,
        cache: Arc<dyn CacheBackend>,
    ) -> SettingsResult<Self>
    where
        S: SettingsSource + ?Sized,
    {
        let settings = ProviderSettings::load(provider_id, source)?;
        Self::new(settings, callback_url, cache)
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    /// Route a request through the flow.
    pub async fn handle(&self, request: &AuthRequest) -> FlowResult<AuthStep> {
        if let Some(error) = request.param("error") {
            return Err(self.authorization_error(error, request.param("error_description")));
        }

        if let Some(code) = request.param("code") {
            return self
                .complete(request, code)
                .await
                .map(AuthStep::Authenticated);
        }

        self.initiate(request).await
    }

    fn authorization_error(&self, error: &str, description: Option<&str>) -> FlowError {
        let provider_id = self.settings.provider_id();

        if error == ACCESS_DENIED {
            info!(provider_id = %provider_id, "User denied authorization");
            return FlowError::AccessDenied;
        }

        warn!(
            provider_id = %provider_id,
            error = %error,
            description = description.unwrap_or("none"),
            "Authorization server returned an error"
        );
        FlowError::AuthorizationServerError {
            provider_id: provider_id.to_string(),
            message: error.to_string(),
        }
    }

    async fn initiate(&self, request: &AuthRequest) -> FlowResult<AuthStep> {
        let session_id = request
            .session_id()
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(generate_session_id);

        // Persisted before the redirect leaves, so the callback can never
        // arrive ahead of its state.
        let state = CsrfState::new(session_id);
        self.state_store.put(&state, self.settings.state_ttl()).await;

        let location = self.authorization_url(&state.state_token);

        info!(provider_id = %self.settings.provider_id(), "Started OAuth2 flow");

        Ok(AuthStep::Redirect {
            location: location.into(),
            session_id: state.session_id,
        })
    }

    /// Authorization endpoint URL with every parameter form-encoded.
    pub fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.settings.authorization_url().clone();

        {
            let mut params = url.query_pairs_mut();
            params.append_pair("client_id", self.settings.client_id());
            params.append_pair("redirect_uri", &self.callback_url);
            params.append_pair("response_type", "code");
            params.append_pair("state", state);

            if let Some(scope) = self.settings.scope() {
                params.append_pair("scope", scope);
            }
        }

        url
    }

    async fn complete(&self, request: &AuthRequest, code: &str) -> FlowResult<PartialIdentity> {
        let provider_id = self.settings.provider_id();

        let Some(session_id) = request.session_id().filter(|id| !id.is_empty()) else {
            warn!(provider_id = %provider_id, "Callback without a session id");
            return Err(FlowError::MissingOrMismatchedState);
        };

        let Some(stored) = self.state_store.get(session_id).await else {
            warn!(provider_id = %provider_id, "No CSRF state found for session");
            return Err(FlowError::MissingOrMismatchedState);
        };

        let Some(supplied) = request.param("state") else {
            warn!(provider_id = %provider_id, "Callback without a state parameter");
            return Err(FlowError::MissingOrMismatchedState);
        };

        if !stored.matches(supplied) {
            warn!(
                provider_id = %provider_id,
                state_age_secs = (chrono::Utc::now() - stored.created_at).num_seconds(),
                "State parameter does not match stored state"
            );
            return Err(FlowError::MissingOrMismatchedState);
        }

        let token = self
            .client
            .exchange(code, &self.callback_url, &self.settings)
            .await
            .map_err(|e| self.exchange_failure(e))?;

        info!(provider_id = %provider_id, "OAuth2 flow completed");

        Ok(assemble_identity(provider_id, token))
    }

    fn exchange_failure(&self, error: ExchangeError) -> FlowError {
        let provider_id = self.settings.provider_id();

        match error {
            ExchangeError::Timeout => {
                error!(
                    provider_id = %provider_id,
                    timeout = ?self.settings.http_timeout(),
                    "Token exchange timed out"
                );
                FlowError::Timeout
            }
            other => {
                error!(provider_id = %provider_id, error = %other, "Token exchange failed");
                FlowError::token_exchange(other)
            }
        }
    }
}

#[async_trait]
impl IdentityProvider for OAuth2Provider {
    fn provider_id(&self) -> &str {
        self.settings.provider_id()
    }

    async fn authenticate(&self, request: &AuthRequest) -> FlowResult<AuthStep> {
        self.handle(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::settings::{
        AUTHORIZATION_URL, CLIENT_ID, FORCE_HTTPS, SCOPE, settings_key, tests::github_source,
    };
    use std::collections::HashMap;

    fn provider_with(overrides: &[(&str, &str)], callback: &str) -> OAuth2Provider {
        let mut source = github_source();
        for (key, value) in overrides {
            source.insert(settings_key("github", key), value.to_string());
        }

        OAuth2Provider::from_config(
            "github",
            &source,
            Url::parse(callback).unwrap(),
            Arc::new(InMemoryCache::new()),
        )
        .unwrap()
    }

    fn create_test_provider() -> OAuth2Provider {
        provider_with(&[], "https://app.example.com/auth/callback")
    }

    fn query_of(location: &str) -> HashMap<String, String> {
        Url::parse(location)
            .unwrap()
            .query_pairs()
            .into_owned()
            .collect()
    }

    async fn start(provider: &OAuth2Provider, request: &AuthRequest) -> (String, String) {
        match provider.handle(request).await.unwrap() {
            AuthStep::Redirect {
                location,
                session_id,
            } => (location, session_id),
            other => panic!("Expected redirect, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initiation_redirect() {
        let provider = create_test_provider();
        let (location, session_id) = start(&provider, &AuthRequest::default()).await;

        assert!(location.starts_with("https://github.com/login/oauth/authorize?"));
        assert!(!session_id.is_empty());

        let params = query_of(&location);
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["redirect_uri"], "https://app.example.com/auth/callback");
        assert_eq!(params["response_type"], "code");
        assert!(!params.contains_key("scope"));

        let stored = provider.state_store.get(&session_id).await.unwrap();
        assert_eq!(params["state"], stored.state_token);
    }

    #[tokio::test]
    async fn test_initiation_reuses_session_and_replaces_state() {
        let provider = create_test_provider();
        let request = AuthRequest::default().with_session_id("existing-session");

        let (first, session_id) = start(&provider, &request).await;
        assert_eq!(session_id, "existing-session");

        let (second, _) = start(&provider, &request).await;
        let first_state = query_of(&first)["state"].clone();
        let second_state = query_of(&second)["state"].clone();
        assert_ne!(first_state, second_state);

        let stored = provider.state_store.get("existing-session").await.unwrap();
        assert_eq!(stored.state_token, second_state);
    }

    #[tokio::test]
    async fn test_empty_session_id_gets_replaced() {
        let provider = create_test_provider();
        let (_, session_id) = start(&provider, &AuthRequest::default().with_session_id("")).await;
        assert!(!session_id.is_empty());
    }

    #[tokio::test]
    async fn test_reserved_characters_round_trip() {
        // (scope, client_id, callback)
        let cases = [
            (
                "openid email&admin=true #frag/ü+%20",
                "id with spaces?&=/",
                "https://app.example.com/auth/callback?tenant=a&b",
            ),
            ("a+b", "c++", "https://app.example.com/cb?x=1+2"),
            ("100%", "%zz%", "https://app.example.com/cb?pct=%25"),
            ("%20%2B", "%41", "https://app.example.com/cb"),
            ("repo 😀 read:org", "𝔘𝔫𝔦𝔠𝔬𝔡𝔢", "https://app.example.com/cb/😀"),
            ("a;b;;c", ";", "https://app.example.com/cb;jsessionid=1"),
            ("==", "k=v=w", "https://app.example.com/cb?a==b"),
            ("a&&b", "&&", "https://app.example.com/cb?a=1&&b=2"),
            ("x#y?z", "?#", "https://app.example.com/cb?q=?"),
        ];

        for (scope, client_id, callback) in cases {
            let provider = provider_with(&[(SCOPE, scope), (CLIENT_ID, client_id)], callback);
            let (location, _) = start(&provider, &AuthRequest::default()).await;
            assert!(!location.contains(' '), "{:?}", location);
            assert!(!location.contains('#'), "{:?}", location);

            let params = query_of(&location);
            assert_eq!(params["scope"], scope);
            assert_eq!(params["client_id"], client_id);
            assert_eq!(params["redirect_uri"], provider.callback_url());
            assert_eq!(params.len(), 5, "{:?}", location);
        }
    }

    #[tokio::test]
    async fn test_existing_query_on_authorization_url_is_kept() {
        let provider = provider_with(
            &[(AUTHORIZATION_URL, "https://idp.example.com/authorize?audience=api")],
            "https://app.example.com/auth/callback",
        );

        let (location, _) = start(&provider, &AuthRequest::default()).await;
        let params = query_of(&location);
        assert_eq!(params["audience"], "api");
        assert_eq!(params["response_type"], "code");
    }

    #[test]
    fn test_force_https_upgrades_callback() {
        let provider = provider_with(&[(FORCE_HTTPS, "true")], "http://app.example.com/cb");
        assert_eq!(provider.callback_url(), "https://app.example.com/cb");

        // Port, credentials and query survive the upgrade
        let provider = provider_with(
            &[(FORCE_HTTPS, "true")],
            "http://user@app.example.com:8080/cb?tenant=a",
        );
        assert_eq!(
            provider.callback_url(),
            "https://user@app.example.com:8080/cb?tenant=a"
        );

        let provider = provider_with(&[], "http://localhost:3000/cb");
        assert_eq!(provider.callback_url(), "http://localhost:3000/cb");
    }

    #[test]
    fn test_unsupported_callback_scheme_rejected() {
        let result = OAuth2Provider::from_config(
            "github",
            &github_source(),
            Url::parse("ftp://app.example.com/cb").unwrap(),
            Arc::new(InMemoryCache::new()),
        );
        assert!(matches!(result, Err(SettingsError::InvalidValue { ref key, .. }) if key == "redirect_uri"));
    }

    #[test]
    fn test_construction_fails_on_missing_settings() {
        let result = OAuth2Provider::from_config(
            "github",
            &HashMap::<String, String>::new(),
            Url::parse("https://app.example.com/cb").unwrap(),
            Arc::new(InMemoryCache::new()),
        );
        assert!(matches!(result, Err(SettingsError::MissingKeys { .. })));
    }

    #[tokio::test]
    async fn test_access_denied_takes_precedence() {
        let provider = create_test_provider();
        let (location, session_id) = start(&provider, &AuthRequest::default()).await;
        let state = query_of(&location)["state"].clone();

        let request = AuthRequest::from_query_pairs([
            ("error", ACCESS_DENIED.to_string()),
            ("code", "valid-code".to_string()),
            ("state", state),
        ])
        .with_session_id(session_id);

        let result = provider.handle(&request).await;
        assert!(matches!(result, Err(FlowError::AccessDenied)));
    }

    #[tokio::test]
    async fn test_other_errors_carry_provider_and_message() {
        let provider = create_test_provider();
        let request = AuthRequest::from_query_pairs([
            ("error", "temporarily_unavailable"),
            ("error_description", "try later"),
        ]);

        match provider.handle(&request).await {
            Err(FlowError::AuthorizationServerError {
                provider_id,
                message,
            }) => {
                assert_eq!(provider_id, "github");
                assert_eq!(message, "temporarily_unavailable");
            }
            other => panic!("Expected AuthorizationServerError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_provider_trait_object() {
        let provider: Arc<dyn IdentityProvider> = Arc::new(create_test_provider());
        assert_eq!(provider.provider_id(), "github");

        let step = provider.authenticate(&AuthRequest::default()).await.unwrap();
        assert!(matches!(step, AuthStep::Redirect { .. }));
    }
}
