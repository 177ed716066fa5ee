//! Migration runner: load, match, plan, then apply or simulate merges.
//!
//! One run is strictly sequential. Records are loaded page by page up to the
//! requested limit, partitioned by the [`DuplicateMatcher`], planned group by
//! group, and (unless dry) each group's plan is handed to the store as one
//! atomic [`MergeWrite`]. Per-record and per-group failures are folded into
//! the [`MigrationReport`]; only a failed load or a contended lock aborts the
//! run.

use crate::config::ProjectConfig;
use crate::error::ErrorCode;
use crate::matcher::{DuplicateMatcher, UnmatchedRecord};
use crate::model::{Channel, ConversationRecord, MergeGroup};
use crate::normalize::IdentityNormalizer;
use crate::planner::{self, MergePlan};
use crate::store::{
    ConversationStore, DiscardMode, LockError, LockLease, MergeWrite, PageCursor, PageRequest,
    StoreError,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Caller-chosen parameters for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Maximum number of records loaded.
    pub limit: usize,
    /// Delete duplicates instead of archiving them.
    pub delete_duplicates: bool,
    /// Empty means every channel.
    pub channels: Vec<Channel>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            limit: 1000,
            delete_duplicates: false,
            channels: Vec::new(),
        }
    }
}

impl RunOptions {
    /// Forced dry run over every channel.
    #[must_use]
    pub fn preview(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    const fn discard_mode(&self) -> DiscardMode {
        if self.delete_duplicates {
            DiscardMode::Delete
        } else {
            DiscardMode::Archive
        }
    }
}

/// Operator configuration shared by every run of a process.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub page_size: usize,
    /// Total tries per group batch, including the first.
    pub max_write_attempts: u32,
    pub lock_ttl: Duration,
    pub lock_holder: String,
    pub normalizer: IdentityNormalizer,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            page_size: 200,
            max_write_attempts: 2,
            lock_ttl: Duration::from_secs(300),
            lock_holder: format!("convo:{}", std::process::id()),
            normalizer: IdentityNormalizer::default(),
        }
    }
}

impl RunnerSettings {
    /// # Errors
    ///
    /// Returns an error if the configured country code is invalid.
    pub fn from_config(config: &ProjectConfig, holder: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            page_size: config.migration.page_size.max(1),
            max_write_attempts: config.migration.max_write_attempts.max(1),
            lock_ttl: config.lock.ttl(),
            lock_holder: holder.into(),
            normalizer: IdentityNormalizer::new(config.phone_normalizer()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Planned,
    Merged,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Normalization,
    Planning,
    GroupMerge,
    Lock,
}

/// Outcome for a single duplicate group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupReport {
    pub group_key: String,
    pub channel: Channel,
    pub identity_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_id: Option<String>,
    pub discarded_ids: Vec<String>,
    pub merged_message_count: usize,
    pub appended_message_count: usize,
    pub merged_tags: Vec<String>,
    pub status: GroupStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GroupReport {
    fn from_plan(plan: &MergePlan, status: GroupStatus) -> Self {
        Self {
            group_key: plan.group.group_key(),
            channel: plan.group.channel,
            identity_key: plan.group.identity_key.clone(),
            primary_id: plan.group.primary_id.clone(),
            discarded_ids: plan.discarded_ids.clone(),
            merged_message_count: plan.merged_message_count,
            appended_message_count: plan.appended_messages.len(),
            merged_tags: plan.merged_tags.iter().cloned().collect(),
            status,
            error: None,
        }
    }

    fn unplanned(group: &MergeGroup, error: String) -> Self {
        Self {
            group_key: group.group_key(),
            channel: group.channel,
            identity_key: group.identity_key.clone(),
            primary_id: None,
            discarded_ids: Vec::new(),
            merged_message_count: 0,
            appended_message_count: 0,
            merged_tags: Vec::new(),
            status: GroupStatus::Failed,
            error: Some(error),
        }
    }
}

/// A recoverable failure folded into the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportError {
    pub group_key: String,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
}

/// Summary of one run. Counters for effects (`messagesMerged`,
/// `recordsDeleted`, `recordsArchived`) are projections in a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub dry_run: bool,
    pub records_scanned: usize,
    pub groups_found: usize,
    pub groups_merged: usize,
    pub groups_failed: usize,
    pub messages_merged: usize,
    pub records_deleted: usize,
    pub records_archived: usize,
    pub unmatched: Vec<UnmatchedRecord>,
    pub groups: Vec<GroupReport>,
    pub errors: Vec<ReportError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl MigrationReport {
    #[must_use]
    pub fn new(dry_run: bool, started_at: DateTime<Utc>) -> Self {
        Self {
            dry_run,
            records_scanned: 0,
            groups_found: 0,
            groups_merged: 0,
            groups_failed: 0,
            messages_merged: 0,
            records_deleted: 0,
            records_archived: 0,
            unmatched: Vec::new(),
            groups: Vec::new(),
            errors: Vec::new(),
            started_at,
            finished_at: started_at,
        }
    }

    fn record_effects(&mut self, plan: &MergePlan, mode: DiscardMode) {
        self.messages_merged += plan.appended_messages.len();
        match mode {
            DiscardMode::Delete => self.records_deleted += plan.discarded_ids.len(),
            DiscardMode::Archive => self.records_archived += plan.discarded_ids.len(),
        }
    }

    fn record_unmatched(&mut self, unmatched: UnmatchedRecord) {
        self.errors.push(ReportError {
            group_key: format!("{}:{}", unmatched.channel, unmatched.identity),
            kind: ErrorKind::Normalization,
            message: unmatched.reason.clone(),
            record_id: Some(unmatched.record_id.clone()),
        });
        self.unmatched.push(unmatched);
    }

    fn record_planned(&mut self, plan: &MergePlan, mode: DiscardMode) {
        self.record_effects(plan, mode);
        self.groups.push(GroupReport::from_plan(plan, GroupStatus::Planned));
    }

    fn record_merged(&mut self, plan: &MergePlan, mode: DiscardMode) {
        self.groups_merged += 1;
        self.record_effects(plan, mode);
        self.groups.push(GroupReport::from_plan(plan, GroupStatus::Merged));
    }

    fn record_failed(&mut self, plan: &MergePlan, kind: ErrorKind, message: String) {
        self.groups_failed += 1;
        let mut group = GroupReport::from_plan(plan, GroupStatus::Failed);
        group.error = Some(message.clone());
        self.errors.push(ReportError {
            group_key: group.group_key.clone(),
            kind,
            message,
            record_id: None,
        });
        self.groups.push(group);
    }

    fn record_unplanned(&mut self, group: &MergeGroup, message: String) {
        self.groups_failed += 1;
        self.errors.push(ReportError {
            group_key: group.group_key(),
            kind: ErrorKind::Planning,
            message: message.clone(),
            record_id: None,
        });
        self.groups.push(GroupReport::unplanned(group, message));
    }
}

/// Run-level failure. Anything not listed here is folded into the report.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration already running: lock held by {holder} until {expires_at}")]
    Locked {
        holder: String,
        expires_at: DateTime<Utc>,
    },

    #[error("failed to load conversations: {source}")]
    Load {
        #[source]
        source: StoreError,
        report: Box<MigrationReport>,
    },

    #[error("run lock: {0}")]
    Lock(#[source] LockError),
}

impl MigrationError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Locked { .. } => ErrorCode::LockContention,
            Self::Load { source, .. } => source.code(),
            Self::Lock(err) => err.code(),
        }
    }

    /// Partial report, when the run got far enough to produce one.
    #[must_use]
    pub fn report(&self) -> Option<&MigrationReport> {
        match self {
            Self::Load { report, .. } => Some(&**report),
            _ => None,
        }
    }
}

impl From<LockError> for MigrationError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Held { holder, expires_at } => Self::Locked { holder, expires_at },
            other => Self::Lock(other),
        }
    }
}

pub struct MigrationRunner<'a, S: ConversationStore + ?Sized> {
    store: &'a S,
    settings: RunnerSettings,
}

impl<'a, S: ConversationStore + ?Sized> MigrationRunner<'a, S> {
    pub const fn new(store: &'a S, settings: RunnerSettings) -> Self {
        Self { store, settings }
    }

    #[must_use]
    pub const fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Execute one run.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Locked`] if another run holds the lock and
    /// [`MigrationError::Load`] (with the partial report) if a page read
    /// fails. Group-level failures are reported, not returned.
    pub fn run(&self, options: &RunOptions) -> Result<MigrationReport, MigrationError> {
        let mut report = MigrationReport::new(options.dry_run, Utc::now());
        info!(
            dry_run = options.dry_run,
            limit = options.limit,
            delete = options.delete_duplicates,
            "conversation migration started"
        );

        let mut lease = if options.dry_run {
            None
        } else {
            Some(
                self.store
                    .acquire_lock(&self.settings.lock_holder, self.settings.lock_ttl)?,
            )
        };

        let outcome = self.execute(options, &mut lease, &mut report);

        if let Some(lease) = lease
            && let Err(err) = self.store.release_lock(&lease)
        {
            warn!(error = %err, "failed to release migration lock");
        }
        report.finished_at = Utc::now();

        match outcome {
            Ok(()) => {
                info!(
                    found = report.groups_found,
                    merged = report.groups_merged,
                    failed = report.groups_failed,
                    messages = report.messages_merged,
                    "conversation migration finished"
                );
                Ok(report)
            }
            Err(source) => {
                warn!(error = %source, scanned = report.records_scanned, "conversation load failed");
                Err(MigrationError::Load {
                    source,
                    report: Box::new(report),
                })
            }
        }
    }

    fn execute(
        &self,
        options: &RunOptions,
        lease: &mut Option<LockLease>,
        report: &mut MigrationReport,
    ) -> Result<(), StoreError> {
        let mut records = Vec::new();
        let loaded = self.load(options, &mut records);
        report.records_scanned = records.len();
        loaded?;

        let matcher = DuplicateMatcher::new(self.settings.normalizer.clone());
        let outcome = matcher.partition(&records);
        for unmatched in outcome.unmatched {
            warn!(record = %unmatched.record_id, reason = %unmatched.reason, "record left unmatched");
            report.record_unmatched(unmatched);
        }
        report.groups_found = outcome.groups.len();

        let by_id: HashMap<String, ConversationRecord> = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        let mode = options.discard_mode();
        let mut lock_lost = false;

        for group in &outcome.groups {
            let plan = match planner::plan(group, &by_id) {
                Ok(plan) => plan,
                Err(err) => {
                    warn!(group = %group.group_key(), error = %err, "merge planning failed");
                    report.record_unplanned(group, err.to_string());
                    continue;
                }
            };

            if options.dry_run {
                report.record_planned(&plan, mode);
                continue;
            }

            if lock_lost {
                report.record_failed(&plan, ErrorKind::Lock, LockError::Lost.to_string());
                continue;
            }

            let write = MergeWrite::from_plan(&plan, mode);
            match self.apply_with_retry(&write, &plan.group.group_key()) {
                Ok(()) => {
                    debug!(group = %plan.group.group_key(), primary = plan.primary_id(), "group merged");
                    report.record_merged(&plan, mode);
                }
                Err(err) => {
                    warn!(group = %plan.group.group_key(), error = %err, "group merge failed");
                    report.record_failed(&plan, ErrorKind::GroupMerge, err.to_string());
                }
            }

            if let Some(current) = lease.as_ref() {
                match self.store.refresh_lock(current, self.settings.lock_ttl) {
                    Ok(next) => *lease = Some(next),
                    Err(err) => {
                        warn!(error = %err, "migration lock lost; remaining groups will fail");
                        *lease = None;
                        lock_lost = true;
                    }
                }
            }
        }

        Ok(())
    }

    /// Fill `records` page by page until `limit` or the end of the store.
    fn load(
        &self,
        options: &RunOptions,
        records: &mut Vec<ConversationRecord>,
    ) -> Result<(), StoreError> {
        let mut after = None;
        while records.len() < options.limit {
            let page_size = self.settings.page_size.min(options.limit - records.len()).max(1);
            let page = self.store.scan_page(&PageRequest {
                after: after.clone(),
                page_size,
                channels: options.channels.clone(),
            })?;
            debug!(fetched = page.len(), total = records.len(), "loaded page");

            let exhausted = page.len() < page_size;
            if let Some(last) = page.last() {
                after = Some(PageCursor::after(last));
            }
            records.extend(page);
            if exhausted {
                break;
            }
        }
        records.truncate(options.limit);
        Ok(())
    }

    fn apply_with_retry(&self, write: &MergeWrite, group_key: &str) -> Result<(), StoreError> {
        let attempts = self.settings.max_write_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.apply_merge(write) {
                Ok(()) => return Ok(()),
                Err(err) if attempt < attempts => {
                    warn!(group = %group_key, attempt, error = %err, "merge batch failed; retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
