use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::{fmt, str::FromStr};

/// Messaging channel a conversation arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Instagram,
    Email,
    Other,
}

impl Channel {
    pub const ALL: [Self; 4] = [Self::Whatsapp, Self::Instagram, Self::Email, Self::Other];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Instagram => "instagram",
            Self::Email => "email",
            Self::Other => "other",
        }
    }
}

/// Who sent a message, relative to the business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Whether a conversation is live or was folded into another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
    Archived,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }
}

/// A single chat message. Never edited after creation; merges copy it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub direction: Direction,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    /// Record the message originally belonged to, stamped when merged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_conversation_id: Option<String>,
}

impl Message {
    /// Exact-match key used to recognise the same message held by two records.
    #[must_use]
    pub fn dedup_key(&self) -> (Direction, DateTime<Utc>, &str) {
        (self.direction, self.sent_at, self.body.as_str())
    }
}

/// A customer conversation as held by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub id: String,
    pub channel: Channel,
    /// Raw identity as stored: phone number, channel user id or email address.
    pub identity: String,
    /// Normalized identity, persisted once a migration has touched the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_key: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<String>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ConversationRecord {
    /// Create an empty active conversation.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        channel: Channel,
        identity: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            channel,
            identity: identity.into(),
            identity_key: None,
            messages: Vec::new(),
            tags: BTreeSet::new(),
            metadata: BTreeMap::new(),
            assigned_to: None,
            status: Status::Active,
            merged_into: None,
            last_activity_at: created_at,
            created_at,
        }
    }

    /// Append a message, keeping `last_activity_at` current.
    pub fn push_message(&mut self, message: Message) {
        if message.sent_at > self.last_activity_at {
            self.last_activity_at = message.sent_at;
        }
        self.messages.push(message);
    }
}

/// Records sharing one `(channel, identity key)`. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeGroup {
    pub identity_key: String,
    pub channel: Channel,
    /// Member ids in input order.
    pub members: Vec<String>,
    /// Surviving member; `None` until the planner has chosen one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_id: Option<String>,
}

impl MergeGroup {
    /// Stable label used in reports and logs, e.g. `whatsapp:+905314942594`.
    #[must_use]
    pub fn group_key(&self) -> String {
        format!("{}:{}", self.channel, self.identity_key)
    }
}

/// Error returned when parsing an enum from text fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidValue {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for InvalidValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for InvalidValue {}

macro_rules! text_enum {
    ($ty:ty, $kind:literal, { $($text:literal => $variant:expr),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = InvalidValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($variant),)+
                    _ => Err(InvalidValue {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

text_enum!(Channel, "channel", {
    "whatsapp" => Channel::Whatsapp,
    "instagram" => Channel::Instagram,
    "email" => Channel::Email,
    "other" => Channel::Other,
});

text_enum!(Direction, "direction", {
    "inbound" => Direction::Inbound,
    "outbound" => Direction::Outbound,
});

text_enum!(Status, "status", {
    "active" => Status::Active,
    "archived" => Status::Archived,
});
