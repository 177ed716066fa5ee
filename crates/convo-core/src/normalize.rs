//! Identity normalization.
//!
//! Raw phone strings arrive in every format operators and channel webhooks
//! produce: `0531 494 25 94`, `+90 531-494-2594`, `(0531) 4942594 ext. 12`.
//! [`PhoneNormalizer`] turns them into one comparable E.164-style key
//! (`+905314942594`). [`IdentityNormalizer`] picks the right rule per channel.
//!
//! Everything here is pure: same input, same output, no I/O.

use crate::error::ErrorCode;
use crate::model::Channel;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Country code assumed for numbers written without one.
pub const DEFAULT_COUNTRY_CODE: &str = "90";

/// Minimum digits in the national significant number.
pub const MIN_SIGNIFICANT_DIGITS: usize = 10;

/// E.164 caps a full number at 15 digits.
pub const MAX_E164_DIGITS: usize = 15;

/// Why a raw identity could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("no digits in phone number '{raw}'")]
    Empty { raw: String },

    #[error("phone number '{raw}' has {digits} significant digits, need at least {}", MIN_SIGNIFICANT_DIGITS)]
    TooShort { raw: String, digits: usize },

    #[error("phone number '{raw}' has {digits} digits, more than {}", MAX_E164_DIGITS)]
    TooLong { raw: String, digits: usize },

    #[error("invalid {channel} identity '{raw}': {reason}")]
    InvalidIdentity {
        channel: Channel,
        raw: String,
        reason: &'static str,
    },

    #[error("invalid default country code '{code}'")]
    InvalidCountryCode { code: String },
}

impl NormalizationError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Empty { .. } | Self::TooShort { .. } | Self::TooLong { .. } => {
                ErrorCode::InvalidPhone
            }
            Self::InvalidIdentity { .. } => ErrorCode::InvalidIdentity,
            Self::InvalidCountryCode { .. } => ErrorCode::ConfigParseError,
        }
    }
}

/// Canonical phone key: `+` followed by country code and national digits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NormalizedPhone(String);

impl NormalizedPhone {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digits without the leading `+`.
    #[must_use]
    pub fn digits(&self) -> &str {
        &self.0[1..]
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for NormalizedPhone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedPhone {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Phone normalizer bound to a default country code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneNormalizer {
    default_country_code: String,
}

impl Default for PhoneNormalizer {
    fn default() -> Self {
        Self {
            default_country_code: DEFAULT_COUNTRY_CODE.to_string(),
        }
    }
}

fn is_formatting(c: char) -> bool {
    c.is_whitespace() || matches!(c, '-' | '.' | '(' | ')' | '/')
}

impl PhoneNormalizer {
    /// Build a normalizer for `country_code` (1-3 digits, no `+`).
    ///
    /// # Errors
    ///
    /// Returns [`NormalizationError::InvalidCountryCode`] for anything else.
    pub fn new(country_code: &str) -> Result<Self, NormalizationError> {
        let code = country_code.trim().trim_start_matches('+');
        if code.is_empty() || code.len() > 3 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(NormalizationError::InvalidCountryCode {
                code: country_code.to_string(),
            });
        }
        Ok(Self {
            default_country_code: code.to_string(),
        })
    }

    #[must_use]
    pub fn default_country_code(&self) -> &str {
        &self.default_country_code
    }

    /// Normalize a raw phone string.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizationError`] when no digits remain, fewer than
    /// [`MIN_SIGNIFICANT_DIGITS`] significant digits remain, or the result
    /// exceeds [`MAX_E164_DIGITS`].
    pub fn normalize(&self, raw: &str) -> Result<NormalizedPhone, NormalizationError> {
        let trimmed = raw.trim();
        let (international, rest) = match trimmed.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let digits = collect_digits(rest);
        if digits.is_empty() {
            return Err(NormalizationError::Empty {
                raw: raw.to_string(),
            });
        }

        let (national, needs_country_code) = if international {
            (digits.as_str(), false)
        } else if let Some(stripped) = digits.strip_prefix("00") {
            (stripped, false)
        } else if let Some(stripped) = digits.strip_prefix('0') {
            (stripped, true)
        } else {
            (digits.as_str(), digits.len() == MIN_SIGNIFICANT_DIGITS)
        };

        if national.len() < MIN_SIGNIFICANT_DIGITS {
            return Err(NormalizationError::TooShort {
                raw: raw.to_string(),
                digits: national.len(),
            });
        }

        let mut key = String::with_capacity(national.len() + 4);
        key.push('+');
        if needs_country_code {
            key.push_str(&self.default_country_code);
        }
        key.push_str(national);

        let total = key.len() - 1;
        if total > MAX_E164_DIGITS {
            return Err(NormalizationError::TooLong {
                raw: raw.to_string(),
                digits: total,
            });
        }

        Ok(NormalizedPhone(key))
    }

    /// True when both strings normalize to the same key.
    #[must_use]
    pub fn equivalent(&self, a: &str, b: &str) -> bool {
        match (self.normalize(a), self.normalize(b)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

/// Collect digits up to the first non-formatting, non-digit run once digits
/// have started. That run marks an extension suffix (`ext. 12`, `x12`, `#3`).
///
/// Run length is not what decides truncation: `) ` and ` - ` are formatting
/// runs longer than one character and are skipped, while a lone `x` or `#`
/// already ends the number.
fn collect_digits(text: &str) -> String {
    let mut digits = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if is_formatting(c) {
            continue;
        } else if !digits.is_empty() {
            break;
        }
    }
    digits
}

/// Normalize with the default country code.
///
/// # Errors
///
/// See [`PhoneNormalizer::normalize`].
pub fn normalize(raw: &str) -> Result<NormalizedPhone, NormalizationError> {
    PhoneNormalizer::default().normalize(raw)
}

/// Compare two raw phone strings for identity equivalence.
#[must_use]
pub fn phones_equivalent(a: &str, b: &str) -> bool {
    PhoneNormalizer::default().equivalent(a, b)
}

/// Channel-aware identity normalizer used by the duplicate matcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityNormalizer {
    phone: PhoneNormalizer,
}

impl IdentityNormalizer {
    #[must_use]
    pub const fn new(phone: PhoneNormalizer) -> Self {
        Self { phone }
    }

    #[must_use]
    pub const fn phone(&self) -> &PhoneNormalizer {
        &self.phone
    }

    /// Normalize `raw` as an identity on `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizationError`] when the identity is unusable as a key.
    pub fn normalize(&self, channel: Channel, raw: &str) -> Result<String, NormalizationError> {
        match channel {
            Channel::Whatsapp | Channel::Other => {
                self.phone.normalize(raw).map(NormalizedPhone::into_string)
            }
            Channel::Instagram => normalize_handle(raw),
            Channel::Email => normalize_email(raw),
        }
    }
}

fn normalize_handle(raw: &str) -> Result<String, NormalizationError> {
    let handle = raw.trim().trim_start_matches('@').to_lowercase();
    if handle.is_empty() {
        return Err(NormalizationError::InvalidIdentity {
            channel: Channel::Instagram,
            raw: raw.to_string(),
            reason: "empty channel user id",
        });
    }
    if handle.chars().any(char::is_whitespace) {
        return Err(NormalizationError::InvalidIdentity {
            channel: Channel::Instagram,
            raw: raw.to_string(),
            reason: "channel user id contains whitespace",
        });
    }
    Ok(handle)
}

fn normalize_email(raw: &str) -> Result<String, NormalizationError> {
    let address = raw.trim().to_lowercase();
    let invalid = |reason| NormalizationError::InvalidIdentity {
        channel: Channel::Email,
        raw: raw.to_string(),
        reason,
    };

    let mut parts = address.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid("expected exactly one '@'"));
    };
    if local.is_empty() || domain.is_empty() {
        return Err(invalid("empty local part or domain"));
    }
    if address.chars().any(char::is_whitespace) {
        return Err(invalid("address contains whitespace"));
    }
    Ok(address)
}
