//! Merge planning for one duplicate group.
//!
//! Pure computation over already-loaded records: choose the surviving primary,
//! fold every member's messages, tags and metadata into it, and list the ids to
//! discard. No I/O, so the rules can be tested exhaustively without a store.

use crate::model::{ConversationRecord, MergeGroup, Message};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// Planning failure for a single group.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("group {group_key} has no members")]
    EmptyGroup { group_key: String },

    #[error("group {group_key} member {record_id} was not loaded")]
    MissingRecord { group_key: String, record_id: String },
}

/// Everything needed to fold a duplicate group into its primary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePlan {
    /// The group with `primary_id` filled in.
    pub group: MergeGroup,
    /// Deduplicated union of all members' messages, oldest first.
    pub merged_messages: Vec<Message>,
    pub merged_message_count: usize,
    /// Messages from `merged_messages` not already held by the primary.
    pub appended_messages: Vec<Message>,
    pub merged_tags: BTreeSet<String>,
    pub merged_metadata: BTreeMap<String, JsonValue>,
    pub assigned_to: Option<String>,
    pub last_activity_at: DateTime<Utc>,
    /// Members other than the primary, in group order.
    pub discarded_ids: Vec<String>,
}

impl MergePlan {
    /// Id of the surviving record.
    #[must_use]
    pub fn primary_id(&self) -> &str {
        self.group.primary_id.as_deref().unwrap_or_default()
    }
}

/// Ordering used for primary selection: most messages, then latest activity,
/// then smallest id. `Ordering::Less` means `a` is the better primary.
fn primary_rank(a: &ConversationRecord, b: &ConversationRecord) -> Ordering {
    b.messages
        .len()
        .cmp(&a.messages.len())
        .then_with(|| b.last_activity_at.cmp(&a.last_activity_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Plan the merge of `group` using the loaded `records`.
///
/// # Errors
///
/// Returns [`PlanError`] if the group is empty or a member is absent from
/// `records`.
pub fn plan<S: std::hash::BuildHasher>(
    group: &MergeGroup,
    records: &HashMap<String, ConversationRecord, S>,
) -> Result<MergePlan, PlanError> {
    let members = group
        .members
        .iter()
        .map(|id| {
            records.get(id).ok_or_else(|| PlanError::MissingRecord {
                group_key: group.group_key(),
                record_id: id.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let primary = members
        .iter()
        .copied()
        .min_by(|a, b| primary_rank(a, b))
        .ok_or_else(|| PlanError::EmptyGroup {
            group_key: group.group_key(),
        })?;

    let others: Vec<&ConversationRecord> = members
        .iter()
        .copied()
        .filter(|m| m.id != primary.id)
        .collect();

    let (merged_messages, appended_messages) = merge_messages(primary, &others);

    let mut merged_tags = BTreeSet::new();
    for member in &members {
        merged_tags.extend(member.tags.iter().cloned());
    }

    let mut merged_metadata = primary.metadata.clone();
    for member in &others {
        for (key, value) in &member.metadata {
            merged_metadata
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    let assigned_to = primary
        .assigned_to
        .clone()
        .or_else(|| others.iter().find_map(|m| m.assigned_to.clone()));

    let last_activity_at = members
        .iter()
        .map(|m| m.last_activity_at)
        .chain(merged_messages.iter().map(|m| m.sent_at))
        .max()
        .unwrap_or(primary.last_activity_at);

    let mut planned = group.clone();
    planned.primary_id = Some(primary.id.clone());

    Ok(MergePlan {
        group: planned,
        merged_message_count: merged_messages.len(),
        merged_messages,
        appended_messages,
        merged_tags,
        merged_metadata,
        assigned_to,
        last_activity_at,
        discarded_ids: others.iter().map(|m| m.id.clone()).collect(),
    })
}

/// Union of the primary's and the other members' messages.
///
/// The first copy of each [`Message::dedup_key`] wins, visiting the primary
/// first. Copied messages keep an existing provenance or take their owner's
/// id. Every id the primary already stores is reserved, including ids of its
/// own duplicates, so a copied id never collides with a stored row; clashing
/// ids are re-keyed by [`unique_id`]. Returns the full merged set and the
/// messages copied from members other than the primary.
fn merge_messages(
    primary: &ConversationRecord,
    others: &[&ConversationRecord],
) -> (Vec<Message>, Vec<Message>) {
    let mut seen = HashSet::new();
    let mut ids: HashSet<String> = primary.messages.iter().map(|m| m.id.clone()).collect();
    let mut merged = Vec::new();
    let mut appended = Vec::new();

    for message in &primary.messages {
        if !seen.insert(message.dedup_key()) {
            continue;
        }
        let mut copy = message.clone();
        if copy.source_conversation_id.is_none() {
            copy.source_conversation_id = Some(primary.id.clone());
        }
        merged.push(copy);
    }

    for owner in others.iter().copied() {
        for message in &owner.messages {
            if !seen.insert(message.dedup_key()) {
                continue;
            }
            let mut copy = message.clone();
            if copy.source_conversation_id.is_none() {
                copy.source_conversation_id = Some(owner.id.clone());
            }
            copy.id = unique_id(&mut ids, &owner.id, &message.id);
            appended.push(copy.clone());
            merged.push(copy);
        }
    }

    merged.sort_by_key(|m| m.sent_at);
    appended.sort_by_key(|m| m.sent_at);
    (merged, appended)
}

/// Reserve `id`, or the first free of `<owner>/<id>`, `<owner>/<id>/2`, ...
fn unique_id(ids: &mut HashSet<String>, owner: &str, id: &str) -> String {
    if ids.insert(id.to_string()) {
        return id.to_string();
    }
    let base = format!("{owner}/{id}");
    let mut candidate = base.clone();
    let mut n = 2_u32;
    while !ids.insert(candidate.clone()) {
        candidate = format!("{base}/{n}");
        n += 1;
    }
    candidate
}
