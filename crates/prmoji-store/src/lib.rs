//! Durable PR URL to Slack message mapping store.
//!
//! A mapping links one pull-request URL to one chat message that mentioned it.
//! Many messages may map to the same URL. Mappings are deleted when the PR
//! reaches a terminal state or when they age past the retention cutoff.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;

pub use sqlite::SqliteMappingStore;

/// Result type for mapping store operations.
pub type StoreResult<T> = Result<T, MappingStoreError>;

/// Source of insertion timestamps. Stores stamp `inserted_at` themselves.
pub type MappingClock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> MappingClock {
    Arc::new(Utc::now)
}

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum MappingStoreError {
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error("mapping store connection lock is poisoned")]
    LockPoisoned,
    #[error("mapping store operation was cancelled before it ran")]
    Cancelled,
    #[error("mapping store task failed: {0}")]
    TaskJoin(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One persisted link from a PR URL to the Slack message that mentioned it.
pub struct PrMessageMapping {
    pub id: i64,
    pub inserted_at: DateTime<Utc>,
    pub pr_url: String,
    pub channel: String,
    pub message_timestamp: String,
}

impl PrMessageMapping {
    /// UTC calendar date the mapping was inserted on.
    pub fn inserted_on(&self) -> NaiveDate {
        self.inserted_at.date_naive()
    }
}

/// Async store contract used by ingestion, dispatch and retention.
///
/// `pr_url` is an opaque key: lookups and deletes use exact string equality.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Appends one mapping stamped with the store's current UTC time.
    async fn insert(&self, pr_url: &str, channel: &str, message_timestamp: &str)
        -> StoreResult<()>;

    /// Returns every mapping for `pr_url` in insertion order.
    async fn list_by_pr_url(&self, pr_url: &str) -> StoreResult<Vec<PrMessageMapping>>;

    /// Removes every mapping for `pr_url`; absent keys are a no-op.
    async fn delete_by_pr_url(&self, pr_url: &str) -> StoreResult<u64>;

    /// Removes mappings inserted on a UTC date strictly before `cutoff`.
    async fn delete_older_than(&self, cutoff: NaiveDate) -> StoreResult<u64>;
}

/// In-memory implementation for tests and local experimentation.
pub struct InMemoryMappingStore {
    inner: RwLock<StoreInner>,
    clock: MappingClock,
}

#[derive(Debug, Default)]
struct StoreInner {
    next_id: i64,
    mappings: Vec<PrMessageMapping>,
}

impl Default for InMemoryMappingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMappingStore {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: MappingClock) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.mappings.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.mappings.is_empty()
    }
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn insert(
        &self,
        pr_url: &str,
        channel: &str,
        message_timestamp: &str,
    ) -> StoreResult<()> {
        let inserted_at = (self.clock)();
        let mut inner = self.inner.write().await;
        inner.next_id = inner.next_id.saturating_add(1);
        let id = inner.next_id;
        inner.mappings.push(PrMessageMapping {
            id,
            inserted_at,
            pr_url: pr_url.to_string(),
            channel: channel.to_string(),
            message_timestamp: message_timestamp.to_string(),
        });
        Ok(())
    }

    async fn list_by_pr_url(&self, pr_url: &str) -> StoreResult<Vec<PrMessageMapping>> {
        let inner = self.inner.read().await;
        Ok(inner
            .mappings
            .iter()
            .filter(|mapping| mapping.pr_url == pr_url)
            .cloned()
            .collect())
    }

    async fn delete_by_pr_url(&self, pr_url: &str) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.mappings.len();
        inner.mappings.retain(|mapping| mapping.pr_url != pr_url);
        Ok((before - inner.mappings.len()) as u64)
    }

    async fn delete_older_than(&self, cutoff: NaiveDate) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.mappings.len();
        inner
            .mappings
            .retain(|mapping| mapping.inserted_on() >= cutoff);
        Ok((before - inner.mappings.len()) as u64)
    }
}
