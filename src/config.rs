use anyhow::{Context, Result};
use std::{
    env,
    net::SocketAddr,
    str::FromStr,
    time::Duration,
};

use crate::ratelimit::quota::QuotaRegistry;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub limiter: LimiterConfig,
}

#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Present only when both the store URL and token are non-empty.
    pub store: Option<StoreConfig>,
    pub key_prefix: String,
    pub store_timeout: Duration,
    pub fail_open_on_error: bool,
    pub quotas: QuotaRegistry,
}

#[derive(Clone)]
pub struct StoreConfig {
    pub url: String,
    pub token: String,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            store: None,
            key_prefix: "ratelimit".to_string(),
            store_timeout: Duration::from_millis(1_500),
            fail_open_on_error: false,
            quotas: QuotaRegistry::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let lookup = |key: &str| env::var(key).ok();

        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse::<SocketAddr>()
            .context("invalid BIND_ADDR")?;

        Ok(Self {
            bind_addr,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            limiter: LimiterConfig::from_lookup(lookup)?,
        })
    }
}

impl LimiterConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let store = match (
            non_empty("RATE_LIMIT_STORE_URL"),
            non_empty("RATE_LIMIT_STORE_TOKEN"),
        ) {
            (Some(url), Some(token)) => Some(StoreConfig { url, token }),
            _ => None,
        };

        let defaults = Self::default();
        let timeout_ms = parse_or(
            &lookup,
            "RATE_LIMIT_STORE_TIMEOUT_MS",
            defaults.store_timeout.as_millis() as u64,
        )?;

        Ok(Self {
            store,
            key_prefix: non_empty("RATE_LIMIT_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            store_timeout: Duration::from_millis(timeout_ms.max(1)),
            fail_open_on_error: parse_or(&lookup, "RATE_LIMIT_FAIL_OPEN", false)?,
            quotas: QuotaRegistry::from_lookup(&lookup).context("invalid quota override")?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid {key}: {raw}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<LimiterConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LimiterConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn store_requires_both_url_and_token() {
        let config = config_from(&[
            ("RATE_LIMIT_STORE_URL", "https://store.example.com"),
            ("RATE_LIMIT_STORE_TOKEN", "secret"),
        ])
        .unwrap();
        assert_eq!(config.store.unwrap().url, "https://store.example.com");

        for pairs in [
            &[("RATE_LIMIT_STORE_URL", "https://store.example.com")][..],
            &[("RATE_LIMIT_STORE_TOKEN", "secret")][..],
            &[
                ("RATE_LIMIT_STORE_URL", "https://store.example.com"),
                ("RATE_LIMIT_STORE_TOKEN", "  "),
            ][..],
            &[][..],
        ] {
            assert!(config_from(pairs).unwrap().store.is_none());
        }
    }

    #[test]
    fn defaults_are_fail_closed() {
        let config = config_from(&[]).unwrap();
        assert!(!config.fail_open_on_error);
        assert_eq!(config.key_prefix, "ratelimit");
        assert_eq!(config.store_timeout, Duration::from_millis(1_500));
    }

    #[test]
    fn rejects_unparseable_values() {
        assert!(config_from(&[("RATE_LIMIT_FAIL_OPEN", "maybe")]).is_err());
        assert!(config_from(&[("RATE_LIMIT_STORE_TIMEOUT_MS", "soon")]).is_err());
        assert!(config_from(&[("RATE_LIMIT_QUOTA_CORE", "0/60")]).is_err());
    }

    #[test]
    fn debug_output_redacts_the_token() {
        let store = StoreConfig {
            url: "https://store.example.com".to_string(),
            token: "secret".to_string(),
        };
        assert!(!format!("{store:?}").contains("secret"));
    }
}
