//! Authorization code exchange against the provider's token endpoint.

use crate::error::ExchangeError;
use crate::settings::ProviderSettings;
use ras_identity_core::TokenRecord;
use reqwest::Client;
use reqwest::header::ACCEPT;
use std::time::Duration;
use tracing::debug;

/// HTTP client for the access-token exchange.
///
/// Requests are never retried: authorization codes are single-use at most
/// providers, so a second attempt could only fail or burn the code.
#[derive(Clone)]
pub struct TokenExchangeClient {
    http_client: Client,
}

impl TokenExchangeClient {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self { http_client })
    }

    /// Exchange an authorization code for tokens
    pub async fn exchange(
        &self,
        code: &str,
        redirect_uri: &str,
        settings: &ProviderSettings,
    ) -> Result<TokenRecord, ExchangeError> {
        let params = [
            ("client_id", settings.client_id()),
            ("client_secret", settings.client_secret()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .http_client
            .post(settings.access_token_url().clone())
            .header(ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body = response.text().await.map_err(classify)?;

        if !status.is_success() {
            return Err(ExchangeError::Status { status, body });
        }

        let token: TokenRecord = serde_json::from_str(&body)?;

        debug!(
            provider_id = %settings.provider_id(),
            token_type = ?token.token_type,
            expires_in = ?token.expires_in,
            "Exchanged authorization code for access token"
        );
        Ok(token)
    }
}

fn classify(error: reqwest::Error) -> ExchangeError {
    if error.is_timeout() {
        ExchangeError::Timeout
    } else {
        ExchangeError::Http(error)
    }
}
