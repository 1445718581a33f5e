//! Credit bureau detection for target documents.
//!
//! Detection is a plain case-insensitive scan of the target text. Anything
//! that does not name a known bureau is `UNKNOWN`, which only means no
//! bureau translation map is applied.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Credit bureau a target document was issued by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bureau {
    /// TransUnion.
    Transunion,
    /// Experian.
    Experian,
    /// Equifax.
    Equifax,
    /// Not detected.
    Unknown,
}

impl Bureau {
    /// Upper-case name used in translation map file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transunion => "TRANSUNION",
            Self::Experian => "EXPERIAN",
            Self::Equifax => "EQUIFAX",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl Default for Bureau {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for Bureau {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Detect the issuing bureau from the target text.
///
/// Checked in order: `transunion`, `experian`, `equifax`, then the spaced
/// `trans union` variant. The first hit wins.
pub fn detect_bureau(text: &str) -> Bureau {
    let lower = text.to_lowercase();

    if lower.contains("transunion") {
        Bureau::Transunion
    } else if lower.contains("experian") {
        Bureau::Experian
    } else if lower.contains("equifax") {
        Bureau::Equifax
    } else if lower.contains("trans union") {
        Bureau::Transunion
    } else {
        Bureau::Unknown
    }
}
