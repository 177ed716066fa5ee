//! Shared fixtures and an in-memory `ConversationStore` double.
//!
//! Included by sibling test files with `#[path = "support.rs"] mod support;`.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use convo_core::model::{Channel, ConversationRecord, Direction, Message, Status};
use convo_core::store::lock::expiry_after;
use convo_core::store::{
    ConversationStore, DiscardMode, LockError, LockInfo, LockLease, MergeWrite, PageRequest,
    StoreError,
};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()
}

pub fn at(minutes: i64) -> DateTime<Utc> {
    base_time() + chrono::Duration::minutes(minutes)
}

pub fn message(id: &str, direction: Direction, body: &str, minute: i64) -> Message {
    Message {
        id: id.to_string(),
        direction,
        body: body.to_string(),
        sent_at: at(minute),
        source_conversation_id: None,
    }
}

pub fn record(
    id: &str,
    channel: Channel,
    identity: &str,
    created_minute: i64,
    messages: Vec<Message>,
) -> ConversationRecord {
    let mut record = ConversationRecord::new(id, channel, identity, at(created_minute));
    for message in messages {
        record.push_message(message);
    }
    record
}

/// `count` WhatsApp duplicate pairs. In pair `i`, `a{i}` holds two messages
/// and `b{i}` one, so `a{i}` is always the primary and one message is
/// appended per group.
pub fn duplicate_pairs(count: usize) -> Vec<ConversationRecord> {
    let mut records = Vec::with_capacity(count * 2);
    for i in 0..count {
        let minute = i64::try_from(i).unwrap() * 10;
        records.push(record(
            &format!("a{i:02}"),
            Channel::Whatsapp,
            &format!("0531 000 00 {i:02}"),
            minute,
            vec![
                message("m1", Direction::Inbound, "merhaba", minute + 1),
                message("m2", Direction::Outbound, "hos geldiniz", minute + 2),
            ],
        ));
        records.push(record(
            &format!("b{i:02}"),
            Channel::Whatsapp,
            &format!("+90 531-000-00{i:02}"),
            minute + 1,
            vec![message("m1", Direction::Inbound, "fiyat nedir?", minute + 3)],
        ));
    }
    records
}

/// Store double that counts every mutating call and can inject failures.
#[derive(Default)]
pub struct MemoryStore {
    records: RefCell<BTreeMap<String, ConversationRecord>>,
    merge_calls: Cell<usize>,
    committed_merges: Cell<usize>,
    inserts: Cell<usize>,
    deletes: Cell<usize>,
    lock_calls: Cell<usize>,
    pages_served: Cell<usize>,
    /// primary id -> remaining injected failures.
    failing_primaries: RefCell<HashMap<String, usize>>,
    fail_scan_on_page: Cell<Option<usize>>,
    steal_lock_after_refreshes: Cell<Option<usize>>,
    lock: RefCell<Option<(LockInfo, String)>>,
    next_token: Cell<u64>,
}

impl MemoryStore {
    pub fn with_records(records: Vec<ConversationRecord>) -> Self {
        let store = Self::default();
        store.seed(records);
        store
    }

    /// Load records without counting them as writes.
    pub fn seed(&self, records: Vec<ConversationRecord>) {
        let mut map = self.records.borrow_mut();
        for record in records {
            map.insert(record.id.clone(), record);
        }
    }

    /// Fail `times` merge batches whose primary is `primary_id`.
    pub fn fail_merges_for(&self, primary_id: &str, times: usize) {
        self.failing_primaries
            .borrow_mut()
            .insert(primary_id.to_string(), times);
    }

    /// Fail the `page`th scan (zero-based).
    pub fn fail_scan_on_page(&self, page: usize) {
        self.fail_scan_on_page.set(Some(page));
    }

    /// After `refreshes` successful refreshes, another holder takes the lock.
    pub fn steal_lock_after_refreshes(&self, refreshes: usize) {
        self.steal_lock_after_refreshes.set(Some(refreshes));
    }

    pub fn hold_lock(&self, holder: &str, ttl: Duration) {
        let now = Utc::now();
        *self.lock.borrow_mut() = Some((
            LockInfo {
                holder: holder.to_string(),
                acquired_at: now,
                expires_at: expiry_after(now, ttl),
            },
            "foreign".to_string(),
        ));
    }

    pub fn merge_calls(&self) -> usize {
        self.merge_calls.get()
    }

    pub fn committed_merges(&self) -> usize {
        self.committed_merges.get()
    }

    /// Every mutating call on conversation data, successful or not.
    pub fn write_calls(&self) -> usize {
        self.merge_calls.get() + self.inserts.get() + self.deletes.get()
    }

    pub fn lock_calls(&self) -> usize {
        self.lock_calls.get()
    }

    pub fn pages_served(&self) -> usize {
        self.pages_served.get()
    }

    pub fn record(&self, id: &str) -> Option<ConversationRecord> {
        self.records.borrow().get(id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.records
            .borrow()
            .values()
            .filter(|r| r.status == Status::Active)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.borrow().is_some()
    }

    fn new_token(&self) -> String {
        let next = self.next_token.get() + 1;
        self.next_token.set(next);
        format!("token-{next}")
    }
}

impl ConversationStore for MemoryStore {
    fn scan_page(&self, request: &PageRequest) -> Result<Vec<ConversationRecord>, StoreError> {
        let page = self.pages_served.get();
        self.pages_served.set(page + 1);
        if self.fail_scan_on_page.get() == Some(page) {
            return Err(StoreError::Unavailable("injected scan failure".to_string()));
        }

        let mut active: Vec<ConversationRecord> = self
            .records
            .borrow()
            .values()
            .filter(|r| r.status == Status::Active)
            .filter(|r| request.channels.is_empty() || request.channels.contains(&r.channel))
            .filter(|r| {
                request.after.as_ref().is_none_or(|cursor| {
                    (r.created_at, r.id.as_str()) > (cursor.created_at, cursor.id.as_str())
                })
            })
            .cloned()
            .collect();
        active.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        active.truncate(request.page_size);
        Ok(active)
    }

    fn get(&self, id: &str) -> Result<Option<ConversationRecord>, StoreError> {
        Ok(self.record(id))
    }

    fn insert(&self, record: &ConversationRecord) -> Result<String, StoreError> {
        self.inserts.set(self.inserts.get() + 1);
        self.records
            .borrow_mut()
            .insert(record.id.clone(), record.clone());
        Ok(record.id.clone())
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.deletes.set(self.deletes.get() + 1);
        Ok(self.records.borrow_mut().remove(id).is_some())
    }

    fn apply_merge(&self, write: &MergeWrite) -> Result<(), StoreError> {
        self.merge_calls.set(self.merge_calls.get() + 1);

        if let Some(remaining) = self
            .failing_primaries
            .borrow_mut()
            .get_mut(&write.primary_id)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }

        let mut records = self.records.borrow_mut();
        for id in std::iter::once(&write.primary_id).chain(&write.discard_ids) {
            if !records.contains_key(id) {
                return Err(StoreError::NotFound { id: id.clone() });
            }
        }

        if let Some(primary) = records.get_mut(&write.primary_id) {
            primary.messages.extend(write.appended_messages.iter().cloned());
            primary.messages.sort_by_key(|m| m.sent_at);
            primary.tags = write.tags.clone();
            primary.metadata = write.metadata.clone();
            primary.assigned_to = write.assigned_to.clone();
            primary.identity_key = Some(write.identity_key.clone());
            primary.last_activity_at = write.last_activity_at;
        }
        for id in &write.discard_ids {
            match write.discard_mode {
                DiscardMode::Delete => {
                    records.remove(id);
                }
                DiscardMode::Archive => {
                    if let Some(record) = records.get_mut(id) {
                        record.status = Status::Archived;
                        record.merged_into = Some(write.primary_id.clone());
                    }
                }
            }
        }
        self.committed_merges.set(self.committed_merges.get() + 1);
        Ok(())
    }

    fn acquire_lock(&self, holder: &str, ttl: Duration) -> Result<LockLease, LockError> {
        self.lock_calls.set(self.lock_calls.get() + 1);
        let now = Utc::now();
        if let Some((info, _)) = self.lock.borrow().as_ref()
            && !info.is_expired(now)
        {
            return Err(LockError::Held {
                holder: info.holder.clone(),
                expires_at: info.expires_at,
            });
        }
        let lease = LockLease {
            holder: holder.to_string(),
            token: self.new_token(),
            expires_at: expiry_after(now, ttl),
        };
        *self.lock.borrow_mut() = Some((
            LockInfo {
                holder: holder.to_string(),
                acquired_at: now,
                expires_at: lease.expires_at,
            },
            lease.token.clone(),
        ));
        Ok(lease)
    }

    fn refresh_lock(&self, lease: &LockLease, ttl: Duration) -> Result<LockLease, LockError> {
        self.lock_calls.set(self.lock_calls.get() + 1);
        if let Some(remaining) = self.steal_lock_after_refreshes.get() {
            if remaining == 0 {
                self.steal_lock_after_refreshes.set(None);
                self.hold_lock("intruder", Duration::from_secs(600));
            } else {
                self.steal_lock_after_refreshes.set(Some(remaining - 1));
            }
        }

        let mut lock = self.lock.borrow_mut();
        match lock.as_mut() {
            Some((info, token)) if *token == lease.token => {
                info.expires_at = expiry_after(Utc::now(), ttl);
                Ok(LockLease {
                    expires_at: info.expires_at,
                    ..lease.clone()
                })
            }
            _ => Err(LockError::Lost),
        }
    }

    fn release_lock(&self, lease: &LockLease) -> Result<(), LockError> {
        self.lock_calls.set(self.lock_calls.get() + 1);
        let mut lock = self.lock.borrow_mut();
        match lock.as_ref() {
            Some((_, token)) if *token == lease.token => {
                *lock = None;
                Ok(())
            }
            _ => Err(LockError::Lost),
        }
    }

    fn lock_status(&self) -> Result<Option<LockInfo>, LockError> {
        Ok(self.lock.borrow().as_ref().map(|(info, _)| info.clone()))
    }

    fn force_release_lock(&self) -> Result<Option<LockInfo>, LockError> {
        Ok(self.lock.borrow_mut().take().map(|(info, _)| info))
    }
}
