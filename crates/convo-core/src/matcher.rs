//! Duplicate detection by normalized identity.
//!
//! Records are bucketed by `(channel, normalized identity)`. Buckets with two
//! or more members become [`MergeGroup`]s. Records whose identity does not
//! normalize are set aside as [`UnmatchedRecord`]s and never merged.

use crate::model::{Channel, ConversationRecord, MergeGroup};
use crate::normalize::{IdentityNormalizer, NormalizationError};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// A record excluded from matching because its identity failed normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmatchedRecord {
    pub record_id: String,
    pub channel: Channel,
    pub identity: String,
    pub reason: String,
    pub error_code: String,
}

impl UnmatchedRecord {
    fn new(record: &ConversationRecord, err: &NormalizationError) -> Self {
        Self {
            record_id: record.id.clone(),
            channel: record.channel,
            identity: record.identity.clone(),
            reason: err.to_string(),
            error_code: err.code().code().to_string(),
        }
    }
}

/// Result of partitioning a record set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    pub groups: Vec<MergeGroup>,
    pub unmatched: Vec<UnmatchedRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct DuplicateMatcher {
    normalizer: IdentityNormalizer,
}

impl DuplicateMatcher {
    #[must_use]
    pub const fn new(normalizer: IdentityNormalizer) -> Self {
        Self { normalizer }
    }

    /// Partition `records` into duplicate groups and unmatched records.
    ///
    /// Groups appear in order of their key's first occurrence; members keep
    /// input order. Re-running on the same snapshot yields the same output.
    #[must_use]
    pub fn partition(&self, records: &[ConversationRecord]) -> MatchOutcome {
        let mut buckets: Vec<MergeGroup> = Vec::new();
        let mut index: HashMap<(Channel, String), usize> = HashMap::new();
        let mut unmatched = Vec::new();

        for record in records {
            let key = match self.normalizer.normalize(record.channel, &record.identity) {
                Ok(key) => key,
                Err(err) => {
                    debug!(record = %record.id, error = %err, "identity did not normalize");
                    unmatched.push(UnmatchedRecord::new(record, &err));
                    continue;
                }
            };

            let slot = *index
                .entry((record.channel, key.clone()))
                .or_insert_with(|| {
                    buckets.push(MergeGroup {
                        identity_key: key,
                        channel: record.channel,
                        members: Vec::new(),
                        primary_id: None,
                    });
                    buckets.len() - 1
                });
            buckets[slot].members.push(record.id.clone());
        }

        let groups = buckets
            .into_iter()
            .filter(|group| group.members.len() > 1)
            .collect();

        MatchOutcome { groups, unmatched }
    }
}

/// Group `records` by normalized identity using the default country code.
#[must_use]
pub fn find_duplicate_groups(records: &[ConversationRecord]) -> Vec<MergeGroup> {
    DuplicateMatcher::default().partition(records).groups
}
