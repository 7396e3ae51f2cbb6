use std::sync::Arc;

use crate::config::{AppConfig, HashingConfig};
use crate::middleware::rate_limit::RateLimiter;
use crate::registration::{
    password::PasswordHashing,
    repo::{Directory, MemoryDirectory},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub directory: Arc<dyn Directory>,
    pub hasher: PasswordHashing,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn init() -> anyhow::Result<Self> {
        Self::from_config(AppConfig::from_env()?)
    }

    /// State backed by a fresh in-memory directory seeded with the
    /// configured reserved usernames.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let directory =
            Arc::new(MemoryDirectory::with_reserved(&config.reserved_usernames)) as Arc<dyn Directory>;
        Self::from_parts(Arc::new(config), directory)
    }

    pub fn from_parts(config: Arc<AppConfig>, directory: Arc<dyn Directory>) -> anyhow::Result<Self> {
        let hasher = PasswordHashing::new(&config.hashing)?;
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        Ok(Self {
            config,
            directory,
            hasher,
            rate_limiter,
        })
    }

    /// Default configuration with cheap hashing, for tests.
    pub fn fake() -> Self {
        Self::fake_with(AppConfig::default())
    }

    pub fn fake_with(mut config: AppConfig) -> Self {
        config.hashing = HashingConfig {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        };
        Self::from_config(config).expect("fake state config is valid")
    }
}
