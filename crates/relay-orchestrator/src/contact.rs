use std::fmt;

use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Remote address used by the transport for status/broadcast updates.
pub const BROADCAST_STATUS_ADDRESS: &str = "status@broadcast";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
/// Digits-only contact identifier; partition key for all per-contact state.
pub struct ContactKey(String);

impl ContactKey {
    /// Normalizes a raw transport address (`5491122334455:7@s.whatsapp.net`)
    /// into its digits-only form. Returns `None` when no digits remain or the
    /// address is the broadcast pseudo-contact.
    pub fn from_address(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(BROADCAST_STATUS_ADDRESS) {
            return None;
        }
        let local = trimmed.split('@').next().unwrap_or_default();
        let account = local.split(':').next().unwrap_or_default();
        let digits = account
            .chars()
            .filter(char::is_ascii_digit)
            .collect::<String>();
        if digits.is_empty() {
            return None;
        }
        Some(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ContactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercases, strips diacritics, and collapses whitespace runs.
pub fn normalize_command_text(raw: &str) -> String {
    let folded = raw
        .nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .collect::<String>()
        .to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}
