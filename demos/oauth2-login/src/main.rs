use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use config::{Config, Environment, File};
use ras_identity_oauth2::{
    AuthRequest, AuthStep, IdentityProvider, InMemoryCache, OAuth2Provider, PartialIdentity,
    PublicOutcome,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

const SESSION_COOKIE: &str = "oauth2_session";

/// Configuration for the login demo
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider_id: String,
    pub callback_url: Url,
    pub bind_addr: String,
    pub config_file: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let callback_url = std::env::var("OAUTH2_CALLBACK_URL")
            .unwrap_or_else(|_| "http://localhost:3000/auth/callback".to_string());

        Ok(Self {
            provider_id: std::env::var("OAUTH2_PROVIDER").unwrap_or_else(|_| "github".to_string()),
            callback_url: Url::parse(&callback_url)
                .context("OAUTH2_CALLBACK_URL must be an absolute URL")?,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string()),
            config_file: std::env::var("OAUTH2_CONFIG_FILE")
                .unwrap_or_else(|_| "oauth2-login".to_string()),
        })
    }

    /// Provider settings come from the config file, overridden by
    /// `OAUTH2__<PROVIDER>__<KEY>` environment variables.
    fn settings_source(&self) -> Result<Config> {
        load_settings_source(&self.config_file, settings_environment())
    }
}

/// `OAUTH2__GITHUB__CLIENTSECRET` lands on `oauth2.github.clientsecret`.
fn settings_environment() -> Environment {
    Environment::with_prefix("OAUTH2")
        .separator("__")
        .keep_prefix(true)
}

fn load_settings_source(config_file: &str, environment: Environment) -> Result<Config> {
    Config::builder()
        .add_source(File::with_name(config_file).required(false))
        .add_source(environment)
        .build()
        .context("Failed to read provider configuration")
}

#[derive(Clone)]
struct AppState {
    provider: Arc<dyn IdentityProvider>,
    secure_cookie: bool,
}

#[derive(Debug, Serialize)]
struct LoginSuccess {
    provider_id: String,
    auth_method: &'static str,
    token_type: Option<String>,
    expires_in: Option<u64>,
    has_refresh_token: bool,
}

impl From<PartialIdentity> for LoginSuccess {
    fn from(identity: PartialIdentity) -> Self {
        Self {
            provider_id: identity.provider_id,
            auth_method: identity.auth_method.as_str(),
            token_type: identity.token.token_type,
            expires_in: identity.token.expires_in,
            has_refresh_token: identity.token.refresh_token.is_some(),
        }
    }
}

#[derive(Debug, Serialize)]
struct LoginFailure {
    outcome: PublicOutcome,
    message: &'static str,
}

fn failure_status(outcome: PublicOutcome) -> StatusCode {
    match outcome {
        PublicOutcome::AccessDenied => StatusCode::FORBIDDEN,
        PublicOutcome::AuthenticationFailed => StatusCode::UNAUTHORIZED,
    }
}

fn session_cookie(session_id: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

/// Both the login entry point and the provider callback land here; the
/// provider decides which half of the flow a request belongs to.
async fn oauth2_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let session_id = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    let request = AuthRequest::new(query, session_id);

    match state.provider.authenticate(&request).await {
        Ok(AuthStep::Redirect {
            location,
            session_id,
        }) => {
            let cookie = session_cookie(session_id, state.secure_cookie);
            (jar.add(cookie), Redirect::to(&location)).into_response()
        }
        Ok(AuthStep::Authenticated(identity)) => {
            info!(provider_id = %identity.provider_id, "User signed in");
            Json(LoginSuccess::from(identity)).into_response()
        }
        Err(e) => {
            warn!(error = %e, "OAuth2 login failed");
            let outcome = e.public_outcome();
            let body = LoginFailure {
                outcome,
                message: outcome.message(),
            };
            (failure_status(outcome), Json(body)).into_response()
        }
    }
}

fn spawn_cache_purge(cache: InMemoryCache) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let purged = cache.purge_expired().await;
            if purged > 0 {
                debug!("Purged {} expired CSRF states", purged);
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oauth2_login_demo=debug,ras_identity_oauth2=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    let source = config.settings_source()?;

    let cache = InMemoryCache::new();
    spawn_cache_purge(cache.clone());

    let provider = OAuth2Provider::from_config(
        &config.provider_id,
        &source,
        config.callback_url.clone(),
        Arc::new(cache),
    )
    .with_context(|| format!("OAuth2 provider '{}' is misconfigured", config.provider_id))?;

    info!(
        provider_id = %config.provider_id,
        callback_url = %provider.callback_url(),
        "OAuth2 provider initialized"
    );

    let secure_cookie = provider.callback_url().starts_with("https");
    let app = Router::new()
        .route("/auth/login", get(oauth2_handler))
        .route("/auth/callback", get(oauth2_handler))
        .with_state(AppState {
            provider: Arc::new(provider),
            secure_cookie,
        });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("Server running on http://{}", config.bind_addr);
    info!("Start a login at http://{}/auth/login", config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
