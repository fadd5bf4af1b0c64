use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.vdab.be/openservices";
pub const DEFAULT_RATE_LIMIT: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_PINNED_CERT: &str = "sha256//VdabCertificateFingerprint=";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Invalid {name} '{value}': {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Process-wide gateway settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// API root; request paths are appended to it.
    pub base_url: String,
    /// Maximum dispatches per second.
    pub rate_limit: u32,
    /// Deadline per call, covering queue wait and flight.
    pub timeout: Duration,
    /// Value of the `X-Pinned-Cert` header sent with every request.
    pub pinned_cert: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            rate_limit: DEFAULT_RATE_LIMIT,
            timeout: DEFAULT_TIMEOUT,
            pinned_cert: DEFAULT_PINNED_CERT.to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ConfigError> {
        Self::default().with_base_url(base_url)
    }

    /// Read configuration from environment variables.
    ///
    /// - `WERKZOEK_BASE_URL` (optional, defaults to the VDAB open services root)
    /// - `WERKZOEK_RATE_LIMIT` (optional, requests per second, defaults to 3)
    /// - `WERKZOEK_TIMEOUT_SECS` (optional, defaults to 15)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("WERKZOEK_BASE_URL") {
            Ok(url) => Self::new(url)?,
            Err(_) => Self::default(),
        };

        if let Ok(raw) = std::env::var("WERKZOEK_RATE_LIMIT") {
            config = config.with_rate_limit(parse_positive("WERKZOEK_RATE_LIMIT", &raw)?)?;
        }

        if let Ok(raw) = std::env::var("WERKZOEK_TIMEOUT_SECS") {
            let secs = parse_positive("WERKZOEK_TIMEOUT_SECS", &raw)?;
            config.timeout = Duration::from_secs(u64::from(secs));
        }

        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Result<Self, ConfigError> {
        let base_url = base_url.into();
        let parsed = Url::parse(&base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;
        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(ConfigError::InvalidBaseUrl {
                    url: base_url,
                    reason: format!("scheme '{scheme}' is not allowed (only http/https)"),
                });
            }
        }
        self.base_url = base_url.trim_end_matches('/').to_string();
        Ok(self)
    }

    pub fn with_rate_limit(mut self, rate_limit: u32) -> Result<Self, ConfigError> {
        if rate_limit == 0 {
            return Err(ConfigError::InvalidValue {
                name: "rate limit",
                value: rate_limit.to_string(),
                reason: "must be at least 1 request per second",
            });
        }
        self.rate_limit = rate_limit;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_pinned_cert(mut self, pinned_cert: impl Into<String>) -> Self {
        self.pinned_cert = pinned_cert.into();
        self
    }

    /// Minimum spacing between the starts of two consecutive dispatches.
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(1) / self.rate_limit.max(1)
    }
}

fn parse_positive(name: &'static str, raw: &str) -> Result<u32, ConfigError> {
    let parsed: u32 = raw.parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: raw.to_string(),
        reason: "must be a positive integer",
    })?;
    if parsed == 0 {
        return Err(ConfigError::InvalidValue {
            name,
            value: raw.to_string(),
            reason: "must be at least 1",
        });
    }
    Ok(parsed)
}
