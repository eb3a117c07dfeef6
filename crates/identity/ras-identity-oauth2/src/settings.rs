//! Provider settings loaded from a key-value configuration source.

use crate::error::{SettingsError, SettingsResult};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const AUTHORIZATION_URL: &str = "authorizationUrl";
pub const ACCESS_TOKEN_URL: &str = "accessTokenUrl";
pub const CLIENT_ID: &str = "clientId";
pub const CLIENT_SECRET: &str = "clientSecret";
pub const SCOPE: &str = "scope";
pub const STATE_TTL_SECONDS: &str = "stateTtlSeconds";
pub const HTTP_TIMEOUT_SECONDS: &str = "httpTimeoutSeconds";
pub const FORCE_HTTPS: &str = "forceHttps";

pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(600);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Full configuration key for a provider setting, e.g. `oauth2.github.clientId`.
pub fn settings_key(provider_id: &str, key: &str) -> String {
    format!("oauth2.{}.{}", provider_id, key)
}

/// Generic key-value configuration source.
pub trait SettingsSource {
    fn get_string(&self, key: &str) -> Option<String>;
}

impl SettingsSource for HashMap<String, String> {
    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Keys from `config::Environment` arrive lowercased. The lowercase form is
/// read first so an environment variable overrides a camelCase file key.
impl SettingsSource for config::Config {
    fn get_string(&self, key: &str) -> Option<String> {
        config::Config::get_string(self, &key.to_lowercase())
            .or_else(|_| config::Config::get_string(self, key))
            .ok()
    }
}

/// Immutable configuration for a single OAuth2 provider.
#[derive(Clone)]
pub struct ProviderSettings {
    provider_id: String,
    authorization_url: Url,
    access_token_url: Url,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    state_ttl: Duration,
    http_timeout: Duration,
    force_https_callback: bool,
}

impl ProviderSettings {
    /// Load settings for `provider_id`.
    ///
    /// Every missing required key is reported at once so a broken deployment
    /// can be fixed in one pass.
    pub fn load<S>(provider_id: &str, source: &S) -> SettingsResult<Self>
    where
        S: SettingsSource + ?Sized,
    {
        let mut reader = KeyReader {
            provider_id,
            source,
            missing: Vec::new(),
        };

        let authorization_url = reader.required(AUTHORIZATION_URL);
        let access_token_url = reader.required(ACCESS_TOKEN_URL);
        let client_id = reader.required(CLIENT_ID);
        let client_secret = reader.required(CLIENT_SECRET);
        reader.finish()?;

        let authorization_url = reader.parse_url(AUTHORIZATION_URL, &authorization_url)?;
        let access_token_url = reader.parse_url(ACCESS_TOKEN_URL, &access_token_url)?;

        let state_ttl = reader
            .parse_optional::<u64>(STATE_TTL_SECONDS)?
            .map(|secs| reader.positive_duration(STATE_TTL_SECONDS, secs))
            .transpose()?
            .unwrap_or(DEFAULT_STATE_TTL);
        let http_timeout = reader
            .parse_optional::<u64>(HTTP_TIMEOUT_SECONDS)?
            .map(|secs| reader.positive_duration(HTTP_TIMEOUT_SECONDS, secs))
            .transpose()?
            .unwrap_or(DEFAULT_HTTP_TIMEOUT);
        let force_https_callback = reader.parse_optional::<bool>(FORCE_HTTPS)?.unwrap_or(false);

        Ok(Self {
            provider_id: provider_id.to_string(),
            authorization_url,
            access_token_url,
            client_id,
            client_secret,
            scope: reader.optional(SCOPE),
            state_ttl,
            http_timeout,
            force_https_callback,
        })
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn authorization_url(&self) -> &Url {
        &self.authorization_url
    }

    pub fn access_token_url(&self) -> &Url {
        &self.access_token_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn state_ttl(&self) -> Duration {
        self.state_ttl
    }

    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    pub fn force_https_callback(&self) -> bool {
        self.force_https_callback
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("provider_id", &self.provider_id)
            .field("authorization_url", &self.authorization_url.as_str())
            .field("access_token_url", &self.access_token_url.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .field("state_ttl", &self.state_ttl)
            .field("http_timeout", &self.http_timeout)
            .field("force_https_callback", &self.force_https_callback)
            .finish()
    }
}

struct KeyReader<'a, S: ?Sized> {
    provider_id: &'a str,
    source: &'a S,
    missing: Vec<String>,
}

impl<S: SettingsSource + ?Sized> KeyReader<'_, S> {
    /// Blank values count as absent.
    fn optional(&self, key: &str) -> Option<String> {
        self.source
            .get_string(&settings_key(self.provider_id, key))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&mut self, key: &str) -> String {
        match self.optional(key) {
            Some(value) => value,
            None => {
                self.missing.push(key.to_string());
                String::new()
            }
        }
    }

    fn finish(&mut self) -> SettingsResult<()> {
        if self.missing.is_empty() {
            return Ok(());
        }

        Err(SettingsError::MissingKeys {
            provider_id: self.provider_id.to_string(),
            keys: std::mem::take(&mut self.missing),
        })
    }

    fn invalid(&self, key: &str, reason: impl ToString) -> SettingsError {
        SettingsError::InvalidValue {
            provider_id: self.provider_id.to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    fn parse_url(&self, key: &str, value: &str) -> SettingsResult<Url> {
        let url = Url::parse(value).map_err(|e| self.invalid(key, e))?;
        if url.cannot_be_a_base() {
            return Err(self.invalid(key, "not a hierarchical URL"));
        }
        Ok(url)
    }

    fn parse_optional<T>(&self, key: &str) -> SettingsResult<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.optional(key)
            .map(|value| value.parse::<T>().map_err(|e| self.invalid(key, e)))
            .transpose()
    }

    fn positive_duration(&self, key: &str, secs: u64) -> SettingsResult<Duration> {
        if secs == 0 {
            return Err(self.invalid(key, "must be greater than zero"));
        }
        Ok(Duration::from_secs(secs))
    }
}
