//! Canonical content transformation for passage and document hashing.
//!
//! ## Canonical Content Specification
//!
//! ```text
//! content_hash(bytes) = hex(SHA256(bytes))
//! text_hash(text)     = hex(SHA256(UTF-8(normalize_text(text))))
//! normalize_text(t)   = join(" ", split_whitespace(t))
//! ```
//!
//! A document's `content_hash` addresses the exact bytes that were
//! ingested. A passage's `text_hash` addresses only its normalized text, so
//! re-flowing whitespace in a reference manual does not invalidate
//! citations, while any change to the words does.

use sha2::{Digest, Sha256};

/// Version of the canonical content specification.
///
/// Changes to this version invalidate all existing passage hashes.
pub const CANONICAL_CONTENT_VERSION: &str = "1.0.0";

/// Collapse every whitespace run to a single space and trim.
///
/// ```rust
/// use consistency_kernel::canonical_content::normalize_text;
///
/// assert_eq!(normalize_text("  Date of\r\n  First   Delinquency "), "Date of First Delinquency");
/// ```
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 of raw document bytes as 64 lowercase hex characters.
pub fn compute_content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 of the normalized form of `text`.
///
/// ```rust
/// use consistency_kernel::canonical_content::compute_text_hash;
///
/// assert_eq!(compute_text_hash("a  b"), compute_text_hash("a b"));
/// assert_eq!(compute_text_hash("a b").len(), 64);
/// ```
pub fn compute_text_hash(text: &str) -> String {
    compute_content_hash(normalize_text(text).as_bytes())
}

/// Constant-time comparison of two hex hashes.
pub fn hashes_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Outcome of checking a passage text against a recorded hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashValidation {
    /// Hash matches the normalized text.
    Valid,
    /// Hash does not match.
    Mismatch {
        /// The hash that was recorded.
        expected: String,
        /// The hash computed from the text now.
        computed: String,
    },
}

/// Validate a recorded text hash against the current text.
pub fn validate_text_hash(text: &str, recorded: &str) -> HashValidation {
    let computed = compute_text_hash(text);
    if hashes_equal(&computed, recorded) {
        HashValidation::Valid
    } else {
        HashValidation::Mismatch {
            expected: recorded.to_string(),
            computed,
        }
    }
}
