//! Load-boundary schema for imported conversation documents.
//!
//! Exported CRM documents come in several historical shapes: phone numbers
//! under `phone`, `phoneNumber` or `waId`, Instagram ids under
//! `instagramUserId` or `channelUserId`, and WhatsApp details nested in a
//! legacy `whatsappMetadata` object. [`RawConversation`] accepts all of them
//! with every field optional, and [`RawConversation::into_record`] validates
//! the document once into a [`ConversationRecord`] so nothing downstream has
//! to guess at shapes.

use super::conversation::{Channel, ConversationRecord, Direction, Message, Status};
use crate::error::ErrorCode;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;

/// A document that cannot become a [`ConversationRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct RecordError {
    pub field: String,
    pub reason: String,
}

impl RecordError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::InvalidRecord
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawWhatsappMetadata {
    pub wa_id: Option<String>,
    pub phone_number_id: Option<String>,
    pub profile_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMessage {
    pub id: Option<String>,
    pub direction: Option<String>,
    #[serde(alias = "text", alias = "content")]
    pub body: Option<String>,
    #[serde(alias = "timestamp", alias = "createdAt")]
    pub sent_at: Option<JsonValue>,
    pub source_conversation_id: Option<String>,
}

/// Loosely typed conversation document as found in exports.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawConversation {
    pub id: Option<String>,
    pub channel: Option<String>,
    pub phone: Option<String>,
    pub phone_number: Option<String>,
    pub wa_id: Option<String>,
    pub instagram_user_id: Option<String>,
    pub channel_user_id: Option<String>,
    pub email: Option<String>,
    pub whatsapp_metadata: Option<RawWhatsappMetadata>,
    pub messages: Vec<RawMessage>,
    #[serde(alias = "labels")]
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, JsonValue>,
    pub assigned_to: Option<String>,
    pub status: Option<String>,
    pub last_activity_at: Option<JsonValue>,
    pub created_at: Option<JsonValue>,
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

impl RawConversation {
    fn legacy_wa_id(&self) -> Option<&String> {
        self.whatsapp_metadata
            .as_ref()
            .and_then(|meta| meta.wa_id.as_ref())
    }

    fn phone_candidates(&self) -> [Option<&String>; 4] {
        [
            self.phone.as_ref(),
            self.phone_number.as_ref(),
            self.wa_id.as_ref(),
            self.legacy_wa_id(),
        ]
    }

    fn resolve_channel(&self) -> Result<Channel, RecordError> {
        if let Some(raw) = present(self.channel.as_ref()) {
            return raw
                .parse::<Channel>()
                .map_err(|err| RecordError::new("channel", err.to_string()));
        }
        if self.phone_candidates().into_iter().any(|c| present(c).is_some()) {
            Ok(Channel::Whatsapp)
        } else {
            Ok(Channel::Other)
        }
    }

    fn resolve_identity(&self, channel: Channel) -> Option<String> {
        let instagram = [
            self.instagram_user_id.as_ref(),
            self.channel_user_id.as_ref(),
        ];
        let email = [self.email.as_ref()];

        let found = match channel {
            Channel::Whatsapp => self.phone_candidates().into_iter().find_map(present),
            Channel::Instagram => instagram.into_iter().find_map(present),
            Channel::Email => email.into_iter().find_map(present),
            Channel::Other => self
                .phone_candidates()
                .into_iter()
                .chain(instagram)
                .chain(email)
                .find_map(present),
        };
        found.map(str::to_string)
    }

    /// Validate the document into a record.
    ///
    /// `fallback_id` is used when the document carries no id; `now` stands in
    /// for `createdAt` when neither it nor any message timestamp is present.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] naming the first field that fails validation.
    pub fn into_record(
        self,
        fallback_id: impl FnOnce() -> String,
        now: DateTime<Utc>,
    ) -> Result<ConversationRecord, RecordError> {
        let channel = self.resolve_channel()?;
        let identity = self.resolve_identity(channel).ok_or_else(|| {
            RecordError::new("identity", format!("no identity field for channel {channel}"))
        })?;

        let mut metadata = self.metadata.clone();
        if let Some(legacy) = &self.whatsapp_metadata {
            let fields = [
                ("waId", &legacy.wa_id),
                ("phoneNumberId", &legacy.phone_number_id),
                ("profileName", &legacy.profile_name),
            ];
            for (key, value) in fields {
                if let Some(value) = value {
                    metadata
                        .entry(key.to_string())
                        .or_insert_with(|| JsonValue::String(value.clone()));
                }
            }
        }

        let status = match present(self.status.as_ref()) {
            Some(raw) => raw
                .parse::<Status>()
                .map_err(|err| RecordError::new("status", err.to_string()))?,
            None => Status::Active,
        };

        let mut messages = Vec::with_capacity(self.messages.len());
        let mut message_ids = HashSet::with_capacity(self.messages.len());
        for (index, raw) in self.messages.into_iter().enumerate() {
            let message = convert_message(raw, index)?;
            if !message_ids.insert(message.id.clone()) {
                return Err(RecordError::new(
                    format!("messages[{index}].id"),
                    format!("duplicate message id '{}'", message.id),
                ));
            }
            messages.push(message);
        }
        messages.sort_by_key(|m| m.sent_at);

        let created_at = match self.created_at.as_ref() {
            Some(value) => parse_timestamp(value, "createdAt")?,
            None => messages.first().map_or(now, |m| m.sent_at),
        };
        let last_activity_at = match self.last_activity_at.as_ref() {
            Some(value) => parse_timestamp(value, "lastActivityAt")?,
            None => messages.last().map_or(created_at, |m| m.sent_at),
        };

        let id = present(self.id.as_ref()).map_or_else(fallback_id, str::to_string);

        Ok(ConversationRecord {
            id,
            channel,
            identity,
            identity_key: None,
            messages,
            tags: self
                .tags
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect::<BTreeSet<_>>(),
            metadata,
            assigned_to: present(self.assigned_to.as_ref()).map(str::to_string),
            status,
            merged_into: None,
            last_activity_at,
            created_at,
        })
    }
}

fn convert_message(raw: RawMessage, index: usize) -> Result<Message, RecordError> {
    let field = |name: &str| format!("messages[{index}].{name}");

    let direction = match present(raw.direction.as_ref()) {
        Some(text) => text
            .parse::<Direction>()
            .map_err(|err| RecordError::new(field("direction"), err.to_string()))?,
        None => Direction::Inbound,
    };
    let sent_at = raw
        .sent_at
        .as_ref()
        .ok_or_else(|| RecordError::new(field("sentAt"), "missing timestamp"))
        .and_then(|value| parse_timestamp(value, &field("sentAt")))?;

    Ok(Message {
        id: present(raw.id.as_ref()).map_or_else(|| format!("m{index}"), str::to_string),
        direction,
        body: raw.body.unwrap_or_default(),
        sent_at,
        source_conversation_id: present(raw.source_conversation_id.as_ref()).map(str::to_string),
    })
}

/// Accept RFC 3339 strings, integer epoch milliseconds, and the exported
/// `{ "_seconds": .., "_nanoseconds": .. }` timestamp object.
fn parse_timestamp(value: &JsonValue, field: &str) -> Result<DateTime<Utc>, RecordError> {
    let parsed = match value {
        JsonValue::String(text) => DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        JsonValue::Number(number) => number.as_i64().and_then(DateTime::from_timestamp_millis),
        JsonValue::Object(map) => {
            let seconds = map
                .get("_seconds")
                .or_else(|| map.get("seconds"))
                .and_then(JsonValue::as_i64);
            let nanos = map
                .get("_nanoseconds")
                .or_else(|| map.get("nanoseconds"))
                .and_then(JsonValue::as_u64)
                .unwrap_or(0);
            seconds.and_then(|s| DateTime::from_timestamp(s, u32::try_from(nanos).ok()?))
        }
        _ => None,
    };
    parsed.ok_or_else(|| RecordError::new(field, format!("unparseable timestamp {value}")))
}
