//! Key/value persistence for the result store.
//!
//! Each slot is stored under its own key as JSON. A `snapshotVersion` key
//! guards the layout: snapshots written under another version are ignored,
//! never coerced into the current shape.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::{OnceCell, RwLock};

pub const SNAPSHOT_VERSION: u32 = 2;

pub mod keys {
    pub const SUBMITTED_PROMPT: &str = "submittedPrompt";
    /// Validated ingredient list only.
    pub const INGREDIENT_FOUND: &str = "ingredientFound";
    /// Full ingredient stage result, raw text included.
    pub const AI_RESPONSE: &str = "aiResponse";
    pub const ACTIONABLE_SUMMARY: &str = "actionableSummary";
    pub const ACTIVE_FILTERS_INFO: &str = "activeFiltersInfo";
    pub const SEARCH_HISTORY: &str = "searchHistory";
    pub const REPORT_THEME: &str = "reportTheme";
    pub const SNAPSHOT_VERSION: &str = "snapshotVersion";
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Minimal string key/value backend.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Redis-backed store. Keys are namespaced with `prefix`.
///
/// One reconnecting connection is opened on first use and shared by every
/// operation after that.
pub struct RedisStore {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    prefix: String,
}

impl RedisStore {
    pub fn open(url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            conn: OnceCell::new(),
            prefix: prefix.into(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        Ok(conn.get::<_, Option<String>>(self.key(key)).await?)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        conn.set::<_, _, ()>(self.key(key), value).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.key(key)).await?;
        Ok(())
    }
}

/// Process-local store, used when no Redis URL is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
