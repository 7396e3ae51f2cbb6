use std::{str::FromStr, time::Duration};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
    /// Take the client address from `X-Forwarded-For` when present.
    pub trust_proxy: bool,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 15 * 60,
            max_requests: 100,
            trust_proxy: false,
        }
    }
}

/// Argon2id cost parameters. Defaults hash in tens of milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct HashingConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Mount prefix for every route, e.g. `/api`. Empty mounts at the root.
    pub api_prefix: String,
    pub rate_limit: RateLimitConfig,
    pub hashing: HashingConfig,
    /// Extra form fields accepted and stored next to the canonical ones.
    pub extra_fields: Vec<String>,
    /// Usernames that are always reported as taken.
    pub reserved_usernames: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            api_prefix: String::new(),
            rate_limit: RateLimitConfig::default(),
            hashing: HashingConfig::default(),
            extra_fields: vec!["firstName".into(), "lastName".into(), "phone".into()],
            reserved_usernames: vec!["existinguser".into()],
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let rate_limit = RateLimitConfig {
            window_secs: env_parse("RATE_LIMIT_WINDOW_SECS", defaults.rate_limit.window_secs)?,
            max_requests: env_parse("RATE_LIMIT_MAX_REQUESTS", defaults.rate_limit.max_requests)?,
            trust_proxy: env_parse("SIGNUP_TRUST_PROXY", defaults.rate_limit.trust_proxy)?,
        };
        anyhow::ensure!(rate_limit.window_secs > 0, "RATE_LIMIT_WINDOW_SECS must be positive");
        anyhow::ensure!(rate_limit.max_requests > 0, "RATE_LIMIT_MAX_REQUESTS must be positive");

        let hashing = HashingConfig {
            memory_kib: env_parse("ARGON2_MEMORY_KIB", defaults.hashing.memory_kib)?,
            iterations: env_parse("ARGON2_ITERATIONS", defaults.hashing.iterations)?,
            parallelism: env_parse("ARGON2_PARALLELISM", defaults.hashing.parallelism)?,
        };

        Ok(Self {
            host: std::env::var("APP_HOST").unwrap_or(defaults.host),
            port: env_parse("APP_PORT", defaults.port)?,
            api_prefix: std::env::var("SIGNUP_API_PREFIX")
                .map(|p| normalize_prefix(&p))
                .unwrap_or(defaults.api_prefix),
            rate_limit,
            hashing,
            extra_fields: std::env::var("SIGNUP_EXTRA_FIELDS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.extra_fields),
            reserved_usernames: std::env::var("SIGNUP_RESERVED_USERNAMES")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.reserved_usernames),
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `api/` and `/api/` both become `/api`; `/` and blank become empty.
pub(crate) fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}
