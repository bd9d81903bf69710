// API server configuration loaded from environment variables.
// Decision: Every setting has a local-development default; only DATABASE_URL switches behaviour
// Decision: Invalid numeric values are startup errors, not silent fallbacks

use std::net::SocketAddr;

use anyhow::{Context, Result};

/// Server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// PostgreSQL history store when set, in-memory otherwise
    pub database_url: Option<String>,
    /// Probability with which the demo activities fail transiently
    pub activity_failure_rate: f64,
    /// Prefix for `statusQueryLocation`; relative locations when unset
    pub public_base_url: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            database_url: None,
            activity_failure_rate: 0.0,
            public_base_url: None,
        }
    }
}

impl ApiConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (used by tests)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let port = match get("PORT") {
            Some(port) => port
                .trim()
                .parse()
                .with_context(|| format!("PORT must be a port number, got {port:?}"))?,
            None => defaults.port,
        };

        let activity_failure_rate = match get("ACTIVITY_FAILURE_RATE") {
            Some(rate) => {
                let rate: f64 = rate.trim().parse().with_context(|| {
                    format!("ACTIVITY_FAILURE_RATE must be a number, got {rate:?}")
                })?;
                anyhow::ensure!(
                    (0.0..=1.0).contains(&rate),
                    "ACTIVITY_FAILURE_RATE must be between 0.0 and 1.0, got {rate}"
                );
                rate
            }
            None => defaults.activity_failure_rate,
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port,
            database_url: get("DATABASE_URL"),
            activity_failure_rate,
            public_base_url: get("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
        })
    }

    /// Socket address to bind the HTTP listener to
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid HOST/PORT: {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ApiConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ApiConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, ApiConfig::default());
        assert_eq!(config.bind_addr().unwrap().port(), 9000);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("DATABASE_URL", "postgres://localhost/orchestra"),
            ("ACTIVITY_FAILURE_RATE", "0.25"),
            ("PUBLIC_BASE_URL", "https://orders.example.com/"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:8080");
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/orchestra"));
        assert_eq!(config.activity_failure_rate, 0.25);
        assert_eq!(config.public_base_url.as_deref(), Some("https://orders.example.com"));
    }

    #[test]
    fn test_empty_values_use_defaults() {
        let config = load(&[("DATABASE_URL", ""), ("PORT", " ")]).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(load(&[("PORT", "ninety")]).is_err());
        assert!(load(&[("ACTIVITY_FAILURE_RATE", "1.5")]).is_err());
        assert!(load(&[("ACTIVITY_FAILURE_RATE", "often")]).is_err());
    }
}
