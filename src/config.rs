use std::{collections::HashMap, time::Duration};

use config::{Config as ConfigLib, ConfigError, Environment, File};
use redis::{
    Client as RedisClient, RedisResult,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::auth::{AuthConfig, RefreshConfig};
use crate::credential::Credential;
use crate::gateway::GatewayConfig;

/// The only authentication method this client implements.
pub const TOKEN_AUTH_METHOD: &str = "token";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiSettings,
    pub auth: AuthSettings,
    pub refresh: RefreshSettings,
    pub cache: CacheSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    pub base_url: String,
    pub auth_method: String,
    #[serde(default)]
    pub token: Option<SecretString>,
    pub request_timeout_secs: u64,
}

impl ApiSettings {
    /// The configured credential, if token authentication is selected and a token is set.
    pub fn credential(&self) -> Option<Credential> {
        if !self.auth_method.eq_ignore_ascii_case(TOKEN_AUTH_METHOD) {
            return None;
        }
        self.token
            .as_ref()
            .filter(|token| !token.expose_secret().trim().is_empty())
            .map(|token| Credential::new(token.expose_secret().trim()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    pub poll_interval_ms: u64,
    pub poll_timeout_ms: u64,
    pub fail_on_status_timeout: bool,
}

impl From<&AuthSettings> for AuthConfig {
    fn from(settings: &AuthSettings) -> Self {
        AuthConfig {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            poll_timeout: Duration::from_millis(settings.poll_timeout_ms),
            fail_on_status_timeout: settings.fail_on_status_timeout,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshSettings {
    pub interval_secs: u64,
    pub threshold_secs: u64,
}

impl From<&RefreshSettings> for RefreshConfig {
    fn from(settings: &RefreshSettings) -> Self {
        RefreshConfig {
            check_interval: Duration::from_secs(settings.interval_secs),
            threshold: Duration::from_secs(settings.threshold_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    pub freshness_secs: u64,
    pub lookback_days: u64,
    /// Unset keeps every cached invoice.
    #[serde(default)]
    pub retention_days: Option<u64>,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

impl From<&CacheSettings> for GatewayConfig {
    fn from(settings: &CacheSettings) -> Self {
        const DAY: u64 = 24 * 60 * 60;
        GatewayConfig {
            freshness: Duration::from_secs(settings.freshness_secs),
            lookback: Duration::from_secs(settings.lookback_days.saturating_mul(DAY)),
            retention: settings
                .retention_days
                .map(|days| Duration::from_secs(days.saturating_mul(DAY))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub uri: SecretString,
}

impl RedisConfig {
    /// Establishes a new Redis connection based on the provided URI.
    ///
    /// - To enable TLS, the URI must use the `rediss://` scheme.
    /// - To enable insecure TLS, the URI must use the `rediss://` scheme and end with `/#insecure`.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn start(&self) -> RedisResult<ConnectionManager> {
        let client = RedisClient::open(self.uri.expose_secret())?;
        let config = ConnectionManagerConfig::new().set_connection_timeout(Duration::from_secs(60));
        client.get_connection_manager_with_config(config).await
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    /// Used when `RUST_LOG` is not set.
    pub filter: String,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ConfigLib::builder()
            .set_default("api.base_url", "https://api.ksef.mf.gov.pl/v2")?
            .set_default("api.auth_method", TOKEN_AUTH_METHOD)?
            .set_default("api.request_timeout_secs", 30)?
            .set_default("auth.poll_interval_ms", 500)?
            .set_default("auth.poll_timeout_ms", 5000)?
            .set_default("auth.fail_on_status_timeout", false)?
            .set_default("refresh.interval_secs", 60)?
            .set_default("refresh.threshold_secs", 300)?
            .set_default("cache.freshness_secs", 300)?
            .set_default("cache.lookback_days", 30)?
            .set_default("log.filter", "info")?
            .add_source(File::with_name("config/settings").required(false));

        // Explicit sources replace the process environment so tests stay isolated
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // e.g. KSEF_API__TOKEN or KSEF_CACHE__REDIS__URI
            builder = builder.add_source(
                Environment::with_prefix("KSEF")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        builder.build()?.try_deserialize()
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::from(&self.auth)
    }

    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig::from(&self.refresh)
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig::from(&self.cache)
    }
}
