use super::StoreError;
use crate::error::ErrorCode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Run lock errors.
#[derive(Debug)]
pub enum LockError {
    Held {
        holder: String,
        expires_at: DateTime<Utc>,
    },
    Lost,
    Store(StoreError),
}

impl From<StoreError> for LockError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<rusqlite::Error> for LockError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(err))
    }
}

impl LockError {
    /// Machine-readable code associated with this lock error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Held { .. } => ErrorCode::LockContention,
            Self::Lost => ErrorCode::LockLost,
            Self::Store(err) => err.code(),
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Held { holder, expires_at } => write!(
                f,
                "{}: migration lock held by {holder} until {}",
                self.code().code(),
                expires_at.to_rfc3339()
            ),
            Self::Lost => write!(f, "{}: migration lock lease expired or was taken", self.code().code()),
            Self::Store(err) => write!(f, "{}: {err}", self.code().code()),
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

/// Proof of lock ownership returned by a successful acquire or refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub holder: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Current state of the lock row, as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// `now + ttl`, saturating at the far future.
#[must_use]
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn held_error_names_holder_and_code() {
        let err = LockError::Held {
            holder: "cli:host:42".into(),
            expires_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap(),
        };
        let text = err.to_string();
        assert!(text.starts_with("E5001"));
        assert!(text.contains("cli:host:42"));
        assert!(err.hint().is_some());
    }

    #[test]
    fn lost_maps_to_lock_lost() {
        assert_eq!(LockError::Lost.code(), ErrorCode::LockLost);
    }

    #[test]
    fn expiry_saturates() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            expiry_after(now, Duration::from_secs(300)),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap()
        );
        assert_eq!(expiry_after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn zero_ttl_is_expired_immediately() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let info = LockInfo {
            holder: "x".into(),
            acquired_at: now,
            expires_at: expiry_after(now, Duration::ZERO),
        };
        assert!(info.is_expired(now));
    }
}
