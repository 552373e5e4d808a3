//! Configuration loading and representation.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_DIRECTORY_TIMEOUT_MS: u64 = 2_000;
const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Process configuration, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub bind_addr: SocketAddr,
    /// Postgres stores when set, in-memory stores otherwise.
    pub database_url: Option<String>,
    /// External group directory; without it the fallback yields no groups.
    pub group_directory_url: Option<String>,
    pub group_directory_timeout: Duration,
    /// Accept identity from `x-principal-*` headers set by a trusted proxy.
    pub trust_proxy_headers: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = match non_empty(lookup("JWT_SECRET")) {
            Some(secret) => secret,
            None => {
                tracing::warn!("JWT_SECRET not set; using insecure dev default");
                DEV_JWT_SECRET.to_string()
            }
        };

        let bind_addr = non_empty(lookup("BIND_ADDR"))
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                key: "BIND_ADDR",
                message: e.to_string(),
            })?;

        let group_directory_timeout = match non_empty(lookup("GROUP_DIRECTORY_TIMEOUT_MS")) {
            Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                key: "GROUP_DIRECTORY_TIMEOUT_MS",
                message: e.to_string(),
            })?,
            None => DEFAULT_DIRECTORY_TIMEOUT_MS,
        };

        let trust_proxy_headers = match non_empty(lookup("TRUST_PROXY_HEADERS")) {
            Some(raw) => raw.parse::<bool>().map_err(|e| ConfigError::Invalid {
                key: "TRUST_PROXY_HEADERS",
                message: e.to_string(),
            })?,
            None => false,
        };

        Ok(Self {
            jwt_secret,
            bind_addr,
            database_url: non_empty(lookup("DATABASE_URL")),
            group_directory_url: non_empty(lookup("GROUP_DIRECTORY_URL")),
            group_directory_timeout: Duration::from_millis(group_directory_timeout),
            trust_proxy_headers,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.jwt_secret, DEV_JWT_SECRET);
        assert_eq!(cfg.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(cfg.group_directory_timeout, Duration::from_millis(2_000));
        assert!(cfg.database_url.is_none());
        assert!(!cfg.trust_proxy_headers);
    }

    #[test]
    fn values_are_read_and_trimmed() {
        let cfg = config(&[
            ("JWT_SECRET", "  prod-secret "),
            ("DATABASE_URL", "postgres://localhost/keel"),
            ("GROUP_DIRECTORY_URL", "https://directory.internal"),
            ("GROUP_DIRECTORY_TIMEOUT_MS", "500"),
            ("TRUST_PROXY_HEADERS", "true"),
        ])
        .unwrap();

        assert_eq!(cfg.jwt_secret, "prod-secret");
        assert_eq!(cfg.group_directory_timeout, Duration::from_millis(500));
        assert!(cfg.trust_proxy_headers);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/keel"));
    }

    #[test]
    fn bad_values_name_the_key() {
        let err = config(&[("GROUP_DIRECTORY_TIMEOUT_MS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("GROUP_DIRECTORY_TIMEOUT_MS"));

        let err = config(&[("BIND_ADDR", "localhost")]).unwrap_err();
        assert!(err.to_string().contains("BIND_ADDR"));
    }
}
