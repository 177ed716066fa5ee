//! SQLite-backed [`ConversationStore`].

use super::lock::expiry_after;
use super::{
    ConversationStore, DiscardMode, LockError, LockInfo, LockLease, MergeWrite, PageRequest,
    StoreError,
};
use crate::db;
use crate::model::{Channel, ConversationRecord, Direction, Message, Status};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{
    Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params, params_from_iter,
};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const CONVERSATION_COLUMNS: &str = "conversation_id, channel, identity, identity_key, tags_json, \
     metadata_json, assigned_to, status, merged_into, last_activity_at_us, created_at_us";

/// Row counts shown after imports and in `convo init` output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCounts {
    pub active: u64,
    pub archived: u64,
    pub messages: u64,
}

/// Conversation store over a single SQLite connection.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Wrap an already configured and migrated connection.
    #[must_use]
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Open the database at `path`, creating and migrating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(db::open_database(path)?))
    }

    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be migrated.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Ok(Self::new(db::open_in_memory()?))
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the counts cannot be read.
    pub fn counts(&self) -> Result<StoreCounts, StoreError> {
        let count = |sql: &str| -> Result<u64, StoreError> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(u64::try_from(n).unwrap_or_default())
        };
        Ok(StoreCounts {
            active: count("SELECT COUNT(*) FROM conversations WHERE status = 'active'")?,
            archived: count("SELECT COUNT(*) FROM conversations WHERE status = 'archived'")?,
            messages: count("SELECT COUNT(*) FROM messages")?,
        })
    }

    fn immediate(&self) -> rusqlite::Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
    }

    fn load_messages(conn: &Connection, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let mut stmt = conn.prepare_cached(
            "SELECT message_id, direction, body, sent_at_us, source_conversation_id
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY sent_at_us, rowid",
        )?;
        let rows = stmt
            .query_map([conversation_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, direction, body, sent_at_us, source)| {
                let direction = direction
                    .parse::<Direction>()
                    .map_err(|err| corrupt(conversation_id, err))?;
                Ok(Message {
                    id,
                    direction,
                    body,
                    sent_at: from_us(conversation_id, sent_at_us)?,
                    source_conversation_id: source,
                })
            })
            .collect()
    }

    fn hydrate(&self, rows: Vec<ConversationRow>) -> Result<Vec<ConversationRecord>, StoreError> {
        rows.into_iter()
            .map(|row| {
                let messages = Self::load_messages(&self.conn, &row.id)?;
                row.into_record(messages)
            })
            .collect()
    }

    fn insert_message(
        tx: &Transaction<'_>,
        conversation_id: &str,
        message: &Message,
    ) -> rusqlite::Result<()> {
        tx.prepare_cached(
            "INSERT INTO messages
                (conversation_id, message_id, direction, body, sent_at_us, source_conversation_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?
        .execute(params![
            conversation_id,
            message.id,
            message.direction.as_str(),
            message.body,
            to_us(message.sent_at),
            message.source_conversation_id,
        ])?;
        Ok(())
    }

    fn read_lock(conn: &Connection) -> Result<Option<(LockInfo, String)>, LockError> {
        let row = conn
            .query_row(
                "SELECT holder, token, acquired_at_us, expires_at_us FROM run_lock WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(
            |(holder, token, acquired_us, expires_us)| -> Result<(LockInfo, String), LockError> {
                Ok((
                    LockInfo {
                        holder,
                        acquired_at: from_us("run_lock", acquired_us)?,
                        expires_at: from_us("run_lock", expires_us)?,
                    },
                    token,
                ))
            },
        )
        .transpose()
    }
}

struct ConversationRow {
    id: String,
    channel: String,
    identity: String,
    identity_key: Option<String>,
    tags_json: String,
    metadata_json: String,
    assigned_to: Option<String>,
    status: String,
    merged_into: Option<String>,
    last_activity_at_us: i64,
    created_at_us: i64,
}

impl ConversationRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            channel: row.get(1)?,
            identity: row.get(2)?,
            identity_key: row.get(3)?,
            tags_json: row.get(4)?,
            metadata_json: row.get(5)?,
            assigned_to: row.get(6)?,
            status: row.get(7)?,
            merged_into: row.get(8)?,
            last_activity_at_us: row.get(9)?,
            created_at_us: row.get(10)?,
        })
    }

    fn into_record(self, messages: Vec<Message>) -> Result<ConversationRecord, StoreError> {
        let id = self.id;
        Ok(ConversationRecord {
            channel: self
                .channel
                .parse::<Channel>()
                .map_err(|err| corrupt(&id, err))?,
            identity: self.identity,
            identity_key: self.identity_key,
            messages,
            tags: serde_json::from_str(&self.tags_json).map_err(|err| corrupt(&id, err))?,
            metadata: serde_json::from_str(&self.metadata_json).map_err(|err| corrupt(&id, err))?,
            assigned_to: self.assigned_to,
            status: self.status.parse::<Status>().map_err(|err| corrupt(&id, err))?,
            merged_into: self.merged_into,
            last_activity_at: from_us(&id, self.last_activity_at_us)?,
            created_at: from_us(&id, self.created_at_us)?,
            id,
        })
    }
}

fn corrupt(id: &str, reason: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

fn to_us(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_us(id: &str, us: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(us).ok_or_else(|| corrupt(id, format!("timestamp {us} out of range")))
}

impl ConversationStore for SqliteStore {
    fn scan_page(&self, request: &PageRequest) -> Result<Vec<ConversationRecord>, StoreError> {
        let (after_us, after_id) = request
            .after
            .as_ref()
            .map_or((i64::MIN, String::new()), |cursor| {
                (to_us(cursor.created_at), cursor.id.clone())
            });

        let mut values = vec![Value::Integer(after_us), Value::Text(after_id)];
        let channel_clause = if request.channels.is_empty() {
            String::new()
        } else {
            let placeholders: Vec<String> = request
                .channels
                .iter()
                .map(|channel| {
                    values.push(Value::Text(channel.as_str().to_string()));
                    format!("?{}", values.len())
                })
                .collect();
            format!(" AND channel IN ({})", placeholders.join(", "))
        };
        values.push(Value::Integer(
            i64::try_from(request.page_size).unwrap_or(i64::MAX),
        ));

        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS}
             FROM conversations
             WHERE status = 'active'
               AND (created_at_us > ?1 OR (created_at_us = ?1 AND conversation_id > ?2)){channel_clause}
             ORDER BY created_at_us, conversation_id
             LIMIT ?{}",
            values.len()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), ConversationRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        debug!(rows = rows.len(), page_size = request.page_size, "scanned conversation page");
        self.hydrate(rows)
    }

    fn get(&self, id: &str) -> Result<Option<ConversationRecord>, StoreError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE conversation_id = ?1"),
                [id],
                ConversationRow::read,
            )
            .optional()?;
        match row {
            Some(row) => Ok(self.hydrate(vec![row])?.pop()),
            None => Ok(None),
        }
    }

    fn insert(&self, record: &ConversationRecord) -> Result<String, StoreError> {
        let id = if record.id.trim().is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            record.id.clone()
        };

        let tx = self.immediate()?;
        tx.execute("DELETE FROM conversations WHERE conversation_id = ?1", [&id])?;
        tx.execute(
            &format!(
                "INSERT INTO conversations ({CONVERSATION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                id,
                record.channel.as_str(),
                record.identity,
                record.identity_key,
                serde_json::to_string(&record.tags)?,
                serde_json::to_string(&record.metadata)?,
                record.assigned_to,
                record.status.as_str(),
                record.merged_into,
                to_us(record.last_activity_at),
                to_us(record.created_at),
            ],
        )?;
        for message in &record.messages {
            Self::insert_message(&tx, &id, message)?;
        }
        tx.commit()?;
        Ok(id)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM conversations WHERE conversation_id = ?1", [id])?;
        Ok(changed > 0)
    }

    fn apply_merge(&self, write: &MergeWrite) -> Result<(), StoreError> {
        let tx = self.immediate()?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM conversations WHERE conversation_id = ?1",
                [&write.primary_id],
                |row| row.get(0),
            )
            .optional()?;
        match status.as_deref() {
            None => {
                return Err(StoreError::NotFound {
                    id: write.primary_id.clone(),
                });
            }
            Some("active") => {}
            Some(other) => return Err(corrupt(&write.primary_id, format!("primary is {other}"))),
        }

        for message in &write.appended_messages {
            Self::insert_message(&tx, &write.primary_id, message)?;
        }

        tx.execute(
            "UPDATE conversations
             SET tags_json = ?2, metadata_json = ?3, assigned_to = ?4,
                 identity_key = ?5, last_activity_at_us = ?6
             WHERE conversation_id = ?1",
            params![
                write.primary_id,
                serde_json::to_string(&write.tags)?,
                serde_json::to_string(&write.metadata)?,
                write.assigned_to,
                write.identity_key,
                to_us(write.last_activity_at),
            ],
        )?;

        for discard in &write.discard_ids {
            let changed = match write.discard_mode {
                DiscardMode::Delete => tx.execute(
                    "DELETE FROM conversations WHERE conversation_id = ?1",
                    [discard],
                )?,
                DiscardMode::Archive => tx.execute(
                    "UPDATE conversations
                     SET status = 'archived', merged_into = ?2, identity_key = ?3
                     WHERE conversation_id = ?1",
                    params![discard, write.primary_id, write.identity_key],
                )?,
            };
            if changed == 0 {
                return Err(StoreError::NotFound { id: discard.clone() });
            }
            tx.execute(
                "UPDATE conversations SET merged_into = ?2 WHERE merged_into = ?1",
                params![discard, write.primary_id],
            )?;
        }

        tx.execute(
            "UPDATE store_meta SET last_merge_at_us = ?1 WHERE id = 1",
            [to_us(Utc::now())],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn acquire_lock(&self, holder: &str, ttl: Duration) -> Result<LockLease, LockError> {
        let now = Utc::now();
        let tx = self.immediate()?;

        if let Some((info, _)) = Self::read_lock(&tx)?
            && !info.is_expired(now)
        {
            return Err(LockError::Held {
                holder: info.holder,
                expires_at: info.expires_at,
            });
        }

        let lease = LockLease {
            holder: holder.to_string(),
            token: uuid::Uuid::new_v4().to_string(),
            expires_at: expiry_after(now, ttl),
        };
        tx.execute(
            "INSERT OR REPLACE INTO run_lock (id, holder, token, acquired_at_us, expires_at_us)
             VALUES (1, ?1, ?2, ?3, ?4)",
            params![lease.holder, lease.token, to_us(now), to_us(lease.expires_at)],
        )?;
        tx.commit()?;
        Ok(lease)
    }

    fn refresh_lock(&self, lease: &LockLease, ttl: Duration) -> Result<LockLease, LockError> {
        let expires_at = expiry_after(Utc::now(), ttl);
        let changed = self.conn.execute(
            "UPDATE run_lock SET expires_at_us = ?1 WHERE id = 1 AND token = ?2",
            params![to_us(expires_at), lease.token],
        )?;
        if changed == 0 {
            return Err(LockError::Lost);
        }
        Ok(LockLease {
            expires_at,
            ..lease.clone()
        })
    }

    fn release_lock(&self, lease: &LockLease) -> Result<(), LockError> {
        let changed = self.conn.execute(
            "DELETE FROM run_lock WHERE id = 1 AND token = ?1",
            [&lease.token],
        )?;
        if changed == 0 {
            return Err(LockError::Lost);
        }
        Ok(())
    }

    fn lock_status(&self) -> Result<Option<LockInfo>, LockError> {
        Ok(Self::read_lock(&self.conn)?.map(|(info, _)| info))
    }

    fn force_release_lock(&self) -> Result<Option<LockInfo>, LockError> {
        let tx = self.immediate()?;
        let held = Self::read_lock(&tx)?.map(|(info, _)| info);
        tx.execute("DELETE FROM run_lock WHERE id = 1", [])?;
        tx.commit()?;
        Ok(held)
    }
}
