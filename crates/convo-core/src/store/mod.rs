//! Persistence collaborator used by the migration runner.
//!
//! [`ConversationStore`] is the only seam between merge logic and storage:
//! the runner reads pages of active conversations, hands each group's changes
//! over as a single [`MergeWrite`] batch, and coordinates with other runs
//! through the lease-based run lock in [`lock`].

pub mod lock;
pub mod sqlite;

pub use lock::{LockError, LockInfo, LockLease};
pub use sqlite::SqliteStore;

use crate::error::ErrorCode;
use crate::model::{Channel, ConversationRecord, Message};
use crate::planner::MergePlan;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;

/// Store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation {id} not found")]
    NotFound { id: String },

    #[error("conversation {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::RecordNotFound,
            Self::Corrupt { .. } | Self::Encode(_) => ErrorCode::CorruptStore,
            Self::Unavailable(_) | Self::Sqlite(_) => ErrorCode::StoreUnavailable,
        }
    }
}

/// Position after the last record of a page. Scans order by `(created_at, id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

impl PageCursor {
    #[must_use]
    pub fn after(record: &ConversationRecord) -> Self {
        Self {
            created_at: record.created_at,
            id: record.id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub after: Option<PageCursor>,
    pub page_size: usize,
    /// Empty means every channel.
    pub channels: Vec<Channel>,
}

/// What happens to the non-primary members of a merged group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscardMode {
    Delete,
    /// Keep the record with `status = archived` and `merged_into` set.
    #[default]
    Archive,
}

/// One group's changes, applied by the store as a single atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeWrite {
    pub primary_id: String,
    pub identity_key: String,
    pub appended_messages: Vec<Message>,
    pub tags: BTreeSet<String>,
    pub metadata: BTreeMap<String, JsonValue>,
    pub assigned_to: Option<String>,
    pub last_activity_at: DateTime<Utc>,
    pub discard_ids: Vec<String>,
    pub discard_mode: DiscardMode,
}

impl MergeWrite {
    #[must_use]
    pub fn from_plan(plan: &MergePlan, discard_mode: DiscardMode) -> Self {
        Self {
            primary_id: plan.primary_id().to_string(),
            identity_key: plan.group.identity_key.clone(),
            appended_messages: plan.appended_messages.clone(),
            tags: plan.merged_tags.clone(),
            metadata: plan.merged_metadata.clone(),
            assigned_to: plan.assigned_to.clone(),
            last_activity_at: plan.last_activity_at,
            discard_ids: plan.discarded_ids.clone(),
            discard_mode,
        }
    }
}

/// Document store holding conversation records.
///
/// Implementations must make [`ConversationStore::apply_merge`] all-or-nothing:
/// a failed batch leaves every record in the group as it was.
pub trait ConversationStore {
    /// Active records after `request.after`, ordered by `(created_at, id)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the page cannot be read.
    fn scan_page(&self, request: &PageRequest) -> Result<Vec<ConversationRecord>, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    fn get(&self, id: &str) -> Result<Option<ConversationRecord>, StoreError>;

    /// Insert or replace a record, returning its id. An empty id is replaced
    /// by a generated one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn insert(&self, record: &ConversationRecord) -> Result<String, StoreError>;

    /// Delete a record and its messages. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if any part of the batch fails; nothing is
    /// written in that case.
    fn apply_merge(&self, write: &MergeWrite) -> Result<(), StoreError>;

    /// Take the run lock for `holder` unless another live lease holds it.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Held`] when the lock is owned by a live lease.
    fn acquire_lock(&self, holder: &str, ttl: Duration) -> Result<LockLease, LockError>;

    /// Extend a lease.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Lost`] when the lease no longer owns the lock.
    fn refresh_lock(&self, lease: &LockLease, ttl: Duration) -> Result<LockLease, LockError>;

    /// # Errors
    ///
    /// Returns [`LockError::Lost`] when the lease no longer owns the lock.
    fn release_lock(&self, lease: &LockLease) -> Result<(), LockError>;

    /// # Errors
    ///
    /// Returns [`LockError::Store`] if the lock row cannot be read.
    fn lock_status(&self) -> Result<Option<LockInfo>, LockError>;

    /// Clear the lock regardless of holder, returning what was held.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Store`] if the lock row cannot be cleared.
    fn force_release_lock(&self) -> Result<Option<LockInfo>, LockError>;
}
