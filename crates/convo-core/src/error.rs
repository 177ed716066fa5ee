use std::fmt;

/// Machine-readable error codes shared by the CLI, the HTTP surface and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    InvalidPhone,
    InvalidIdentity,
    InvalidRecord,
    RecordNotFound,
    InvalidEnumValue,
    StoreUnavailable,
    CorruptStore,
    GroupMergeFailed,
    LockContention,
    LockLost,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::InvalidPhone => "E2001",
            Self::InvalidIdentity => "E2002",
            Self::InvalidRecord => "E2003",
            Self::RecordNotFound => "E2004",
            Self::InvalidEnumValue => "E2005",
            Self::StoreUnavailable => "E3001",
            Self::CorruptStore => "E3002",
            Self::GroupMergeFailed => "E4001",
            Self::LockContention => "E5001",
            Self::LockLost => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Project not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidPhone => "Phone number could not be normalized",
            Self::InvalidIdentity => "Channel identity could not be normalized",
            Self::InvalidRecord => "Conversation document failed validation",
            Self::RecordNotFound => "Conversation not found",
            Self::InvalidEnumValue => "Invalid channel/direction/status value",
            Self::StoreUnavailable => "Conversation store unavailable",
            Self::CorruptStore => "Corrupt conversation store row",
            Self::GroupMergeFailed => "Merge group write failed",
            Self::LockContention => "Migration already in progress",
            Self::LockLost => "Migration lock lost",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `convo init` to initialize this directory."),
            Self::ConfigParseError => Some("Fix syntax in .convo/config.toml and retry."),
            Self::InvalidPhone => {
                Some("Store at least 10 significant digits, optionally with a leading +.")
            }
            Self::InvalidIdentity => Some("Check the channel user id or email address."),
            Self::InvalidRecord => Some("Fix the document field named in the message and re-import."),
            Self::RecordNotFound => None,
            Self::InvalidEnumValue => {
                Some("Use one of: whatsapp, instagram, email, other / inbound, outbound.")
            }
            Self::StoreUnavailable => Some("Check the database path and file permissions."),
            Self::CorruptStore => Some("Inspect the named row; re-import it if necessary."),
            Self::GroupMergeFailed => Some("Re-run the migration; merged groups are skipped."),
            Self::LockContention => {
                Some("Wait for the running migration, or `convo unlock` if it is stale.")
            }
            Self::LockLost => Some("Another run took over an expired lock; re-run when it ends."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    const ALL: [ErrorCode; 13] = [
        ErrorCode::NotInitialized,
        ErrorCode::ConfigParseError,
        ErrorCode::InvalidPhone,
        ErrorCode::InvalidIdentity,
        ErrorCode::InvalidRecord,
        ErrorCode::RecordNotFound,
        ErrorCode::InvalidEnumValue,
        ErrorCode::StoreUnavailable,
        ErrorCode::CorruptStore,
        ErrorCode::GroupMergeFailed,
        ErrorCode::LockContention,
        ErrorCode::LockLost,
        ErrorCode::InternalUnexpected,
    ];

    #[test]
    fn all_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        for code in ALL {
            let text = code.code();
            assert_eq!(text.len(), 5);
            assert!(text.starts_with('E'));
            assert!(text.chars().skip(1).all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn display_matches_code() {
        assert_eq!(ErrorCode::LockContention.to_string(), "E5001");
    }
}
