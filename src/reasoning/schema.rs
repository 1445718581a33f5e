//! Strict claim schema for reasoning responses.
//!
//! The response must be exactly one JSON object:
//!
//! ```json
//! {
//!   "confidence": 0.92,
//!   "claims": [
//!     {
//!       "claim_id": "C1",
//!       "statement": "Account reports a Date of First Delinquency",
//!       "assertion": "CONFORMANT",
//!       "cited_passage_ids": ["METRO2_CRRG.md#P14"]
//!     }
//!   ]
//! }
//! ```
//!
//! Surrounding prose, unknown fields, duplicate claim ids, empty ids or
//! statements, and a confidence outside `[0, 1]` are all schema failures.

use std::collections::BTreeSet;
use serde::Deserialize;

use crate::types::{Claim, ClaimAssertion};

/// Why a response failed the schema.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaViolation {
    /// Response was empty or whitespace.
    #[error("response is empty")]
    Empty,
    /// Response is not a JSON object of the expected shape.
    #[error("response does not match claim schema: {0}")]
    Malformed(String),
    /// Confidence is NaN, infinite, or outside [0, 1].
    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),
    /// A claim has an empty id.
    #[error("claim at index {0} has an empty claim_id")]
    EmptyClaimId(usize),
    /// A claim has an empty statement.
    #[error("claim {0} has an empty statement")]
    EmptyStatement(String),
    /// Two claims share an id.
    #[error("duplicate claim_id {0}")]
    DuplicateClaimId(String),
}

/// Result of parsing a raw response.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    /// Schema-valid response.
    Claims {
        /// Self-reported confidence.
        confidence: f64,
        /// Claims in response order.
        claims: Vec<Claim>,
    },
    /// Response failed the schema.
    SchemaFailure {
        /// The raw text received.
        raw: String,
        /// What was wrong with it.
        violation: SchemaViolation,
    },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WireResponse {
    confidence: f64,
    claims: Vec<WireClaim>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WireClaim {
    claim_id: String,
    statement: String,
    assertion: ClaimAssertion,
    cited_passage_ids: Vec<String>,
}

fn check(raw: &str) -> Result<(f64, Vec<Claim>), SchemaViolation> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SchemaViolation::Empty);
    }

    let wire: WireResponse =
        serde_json::from_str(trimmed).map_err(|e| SchemaViolation::Malformed(e.to_string()))?;

    if !wire.confidence.is_finite() || !(0.0..=1.0).contains(&wire.confidence) {
        return Err(SchemaViolation::ConfidenceOutOfRange(wire.confidence));
    }

    let mut seen = BTreeSet::new();
    let mut claims = Vec::with_capacity(wire.claims.len());
    for (i, c) in wire.claims.into_iter().enumerate() {
        let claim_id = c.claim_id.trim().to_string();
        if claim_id.is_empty() {
            return Err(SchemaViolation::EmptyClaimId(i));
        }
        if c.statement.trim().is_empty() {
            return Err(SchemaViolation::EmptyStatement(claim_id));
        }
        if !seen.insert(claim_id.clone()) {
            return Err(SchemaViolation::DuplicateClaimId(claim_id));
        }
        claims.push(Claim {
            claim_id,
            statement_text: c.statement,
            assertion: c.assertion,
            cited_passage_ids: c.cited_passage_ids,
        });
    }

    Ok((wire.confidence, claims))
}

/// Parse raw reasoning output against the claim schema. Never fails.
pub fn parse_response(raw: &str) -> ParsedResponse {
    match check(raw) {
        Ok((confidence, claims)) => ParsedResponse::Claims { confidence, claims },
        Err(violation) => ParsedResponse::SchemaFailure {
            raw: raw.to_string(),
            violation,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(raw: &str) -> SchemaViolation {
        match parse_response(raw) {
            ParsedResponse::SchemaFailure { violation, .. } => violation,
            other => panic!("expected schema failure, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_response() {
        let raw = r#"
            {"confidence": 0.9, "claims": [
                {"claim_id": "C1", "statement": "DOFD reported", "assertion": "CONFORMANT", "cited_passage_ids": ["P1"]},
                {"claim_id": "C2", "statement": "Status 13 with balance", "assertion": "NON_CONFORMANT", "cited_passage_ids": []}
            ]}
        "#;
        match parse_response(raw) {
            ParsedResponse::Claims { confidence, claims } => {
                assert_eq!(confidence, 0.9);
                assert_eq!(claims.len(), 2);
                assert_eq!(claims[0].cited_passage_ids, vec!["P1"]);
                assert!(claims[1].asserts_non_conformance());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_prose_is_rejected() {
        assert!(matches!(violation("Sure! Here is the JSON: {}"), SchemaViolation::Malformed(_)));
        assert!(matches!(violation(""), SchemaViolation::Empty));
        assert!(matches!(violation("[]"), SchemaViolation::Malformed(_)));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let raw = r#"{"confidence": 0.9, "claims": [], "notes": "x"}"#;
        assert!(matches!(violation(raw), SchemaViolation::Malformed(_)));

        let raw = r#"{"confidence": 0.9, "claims": [{"claim_id": "C1", "statement": "s", "assertion": "CONFORMANT", "cited_passage_ids": [], "extra": 1}]}"#;
        assert!(matches!(violation(raw), SchemaViolation::Malformed(_)));
    }

    #[test]
    fn test_bad_assertion_rejected() {
        let raw = r#"{"confidence": 0.9, "claims": [{"claim_id": "C1", "statement": "s", "assertion": "MAYBE", "cited_passage_ids": []}]}"#;
        assert!(matches!(violation(raw), SchemaViolation::Malformed(_)));
    }

    #[test]
    fn test_confidence_range() {
        let raw = r#"{"confidence": 1.5, "claims": []}"#;
        assert_eq!(violation(raw), SchemaViolation::ConfidenceOutOfRange(1.5));
        assert!(matches!(
            parse_response(r#"{"confidence": 0, "claims": []}"#),
            ParsedResponse::Claims { .. }
        ));
    }

    #[test]
    fn test_claim_field_rules() {
        let raw = r#"{"confidence": 0.9, "claims": [{"claim_id": " ", "statement": "s", "assertion": "CONFORMANT", "cited_passage_ids": []}]}"#;
        assert_eq!(violation(raw), SchemaViolation::EmptyClaimId(0));

        let raw = r#"{"confidence": 0.9, "claims": [{"claim_id": "C1", "statement": "", "assertion": "CONFORMANT", "cited_passage_ids": []}]}"#;
        assert_eq!(violation(raw), SchemaViolation::EmptyStatement("C1".to_string()));

        let raw = r#"{"confidence": 0.9, "claims": [
            {"claim_id": "C1", "statement": "a", "assertion": "CONFORMANT", "cited_passage_ids": []},
            {"claim_id": "C1", "statement": "b", "assertion": "CONFORMANT", "cited_passage_ids": []}
        ]}"#;
        assert_eq!(violation(raw), SchemaViolation::DuplicateClaimId("C1".to_string()));
    }

    #[test]
    fn test_failure_keeps_raw_text() {
        match parse_response("not json") {
            ParsedResponse::SchemaFailure { raw, .. } => assert_eq!(raw, "not json"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
