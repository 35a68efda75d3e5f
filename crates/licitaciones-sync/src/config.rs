use std::fmt;
use std::time::Duration;

use licitaciones_adapters::DEFAULT_API_URL;
use licitaciones_storage::HttpClientConfig;
use thiserror::Error;

pub const API_URL_VAR: &str = "CHILECOMPRA_API_URL";
pub const API_KEY_VAR: &str = "CHILECOMPRA_API_KEY";
pub const STORE_URL_VAR: &str = "SUPABASE_URL";
pub const STORE_URL_FALLBACK_VAR: &str = "NEXT_PUBLIC_SUPABASE_URL";
pub const STORE_KEY_VAR: &str = "SUPABASE_SERVICE_ROLE_KEY";
pub const HTTP_TIMEOUT_VAR: &str = "CHILECOMPRA_HTTP_TIMEOUT_SECS";
pub const USER_AGENT_VAR: &str = "LICITACIONES_USER_AGENT";

/// Value shipped in sample `.env` files; never a usable ticket.
pub const API_KEY_PLACEHOLDER: &str = "YOUR_API_KEY_HERE";

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be set")]
    Missing { var: &'static str },
    #[error("{var} still holds the placeholder value; set a real ChileCompra ticket")]
    Placeholder { var: &'static str },
    #[error("{var} must be a positive number of seconds, got {value:?}")]
    InvalidTimeout { var: &'static str, value: String },
    #[error("{var} must be an http(s):// or postgres:// URL, got {value:?}")]
    UnsupportedStoreUrl { var: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Supabase REST (PostgREST) endpoint.
    Postgrest,
    /// Direct Postgres connection string.
    Postgres,
}

impl StoreBackend {
    fn for_url(url: &str) -> Option<Self> {
        let scheme = url.split_once("://")?.0.to_ascii_lowercase();
        match scheme.as_str() {
            "http" | "https" => Some(Self::Postgrest),
            "postgres" | "postgresql" => Some(Self::Postgres),
            _ => None,
        }
    }
}

/// Everything the ingest needs from the environment, validated once at
/// startup and handed to the source and store constructors.
#[derive(Clone)]
pub struct IngestConfig {
    pub api_url: String,
    pub api_key: String,
    pub store_url: String,
    pub store_key: String,
    pub store_backend: StoreBackend,
    pub http_timeout: Duration,
    pub user_agent: String,
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("store_url", &self.store_url)
            .field("store_key", &"<redacted>")
            .field("store_backend", &self.store_backend)
            .field("http_timeout", &self.http_timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let (store_url_var, store_url) = match get(STORE_URL_VAR) {
            Some(url) => (STORE_URL_VAR, url),
            None => match get(STORE_URL_FALLBACK_VAR) {
                Some(url) => (STORE_URL_FALLBACK_VAR, url),
                None => return Err(ConfigError::Missing { var: STORE_URL_VAR }),
            },
        };
        let store_backend = StoreBackend::for_url(&store_url).ok_or_else(|| ConfigError::UnsupportedStoreUrl {
            var: store_url_var,
            value: store_url.clone(),
        })?;
        let store_key = get(STORE_KEY_VAR).ok_or(ConfigError::Missing { var: STORE_KEY_VAR })?;

        let api_key = get(API_KEY_VAR).ok_or(ConfigError::Missing { var: API_KEY_VAR })?;
        if api_key == API_KEY_PLACEHOLDER {
            return Err(ConfigError::Placeholder { var: API_KEY_VAR });
        }

        let http_timeout = match get(HTTP_TIMEOUT_VAR) {
            None => Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidTimeout {
                        var: HTTP_TIMEOUT_VAR,
                        value: raw,
                    })
                }
            },
        };

        Ok(Self {
            api_url: get(API_URL_VAR).unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key,
            store_url,
            store_key,
            store_backend,
            http_timeout,
            user_agent: get(USER_AGENT_VAR)
                .unwrap_or_else(|| format!("licitaciones-sync/{}", env!("CARGO_PKG_VERSION"))),
        })
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: self.http_timeout,
            user_agent: Some(self.user_agent.clone()),
        }
    }
}
