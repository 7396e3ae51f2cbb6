use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::registration::repo_types::{directory_key, Identity};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("username `{0}` is already taken")]
    Taken(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Registered identities keyed by lowercased username.
///
/// Every method takes the username as typed; implementations apply
/// [`directory_key`] themselves so lookups stay case-insensitive.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn get(&self, username: &str) -> Result<Option<Identity>, DirectoryError>;
    async fn contains(&self, username: &str) -> Result<bool, DirectoryError>;
    /// Atomically insert unless the key exists; `Taken` otherwise.
    async fn insert_if_absent(&self, identity: Identity) -> Result<Identity, DirectoryError>;
    async fn count(&self) -> Result<usize, DirectoryError>;
}

/// Process-lifetime directory. Lost on restart.
#[derive(Default)]
pub struct MemoryDirectory {
    reserved: HashSet<String>,
    records: RwLock<HashMap<String, Identity>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory whose given names always report as taken.
    pub fn with_reserved<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            reserved: names.into_iter().map(|n| directory_key(n.as_ref())).collect(),
            records: RwLock::default(),
        }
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn get(&self, username: &str) -> Result<Option<Identity>, DirectoryError> {
        Ok(self.records.read().await.get(&directory_key(username)).cloned())
    }

    async fn contains(&self, username: &str) -> Result<bool, DirectoryError> {
        let key = directory_key(username);
        if self.reserved.contains(&key) {
            return Ok(true);
        }
        Ok(self.records.read().await.contains_key(&key))
    }

    async fn insert_if_absent(&self, identity: Identity) -> Result<Identity, DirectoryError> {
        let key = identity.key();
        if self.reserved.contains(&key) {
            return Err(DirectoryError::Taken(identity.username));
        }
        // Check and insert under one write guard.
        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Err(DirectoryError::Taken(identity.username));
        }
        records.insert(key.clone(), identity.clone());
        debug!(%key, total = records.len(), "identity stored");
        Ok(identity)
    }

    async fn count(&self) -> Result<usize, DirectoryError> {
        Ok(self.records.read().await.len())
    }
}
