//! Boundary to the external reasoning capability.
//!
//! The kernel treats the reasoning capability as an untrusted black box: it
//! sends a bounded [`ReasoningRequest`] and receives raw text. Nothing in the
//! raw text is believed until it has been parsed against the strict claim
//! schema ([`schema::parse_response`]) and every claim has passed the
//! evidence binder.

pub mod schema;
pub mod scripted;

#[cfg(feature = "service")]
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use schema::{parse_response, ParsedResponse, SchemaViolation};
pub use scripted::ScriptedReasoningClient;

#[cfg(feature = "service")]
pub use http::HttpReasoningClient;

/// A reference passage as presented to the reasoning capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedPassage {
    /// Qualified citation id (`document#passage`).
    pub passage_id: String,
    /// Passage text, or its summary when `summarized` is set.
    pub normalized_text: String,
    /// Whether `normalized_text` is a summary of the passage.
    #[serde(default)]
    pub summarized: bool,
}

impl IndexedPassage {
    /// Size contribution to the prompt budget.
    pub fn size_chars(&self) -> usize {
        self.passage_id.chars().count() + self.normalized_text.chars().count()
    }
}

/// Bounded request sent to the reasoning capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningRequest {
    /// Check this request belongs to.
    pub check_id: Uuid,
    /// Role, scope, output schema and bureau instructions.
    pub instructions: String,
    /// Logical id of the document under check.
    pub target_document_ref: String,
    /// Full text of the document under check.
    pub target_text: String,
    /// Manifest version the passages were drawn from.
    pub manifest_version: String,
    /// Indexed reference passages.
    pub passages: Vec<IndexedPassage>,
}

impl ReasoningRequest {
    /// Size counted against the prompt budget.
    pub fn size_chars(&self) -> usize {
        self.instructions.chars().count()
            + self.target_text.chars().count()
            + self.passages.iter().map(IndexedPassage::size_chars).sum::<usize>()
    }

    /// Render the request as a single prompt string.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.size_chars() + 256);
        out.push_str(&self.instructions);
        out.push_str("\n\nREFERENCE PASSAGES (manifest ");
        out.push_str(&self.manifest_version);
        out.push_str("):\n");
        for p in &self.passages {
            out.push('[');
            out.push_str(&p.passage_id);
            out.push_str(if p.summarized { "] (summary) " } else { "] " });
            out.push_str(&p.normalized_text);
            out.push('\n');
        }
        out.push_str("\nTARGET DOCUMENT (");
        out.push_str(&self.target_document_ref);
        out.push_str("):\n");
        out.push_str(&self.target_text);
        out
    }
}

/// Transport-level failure talking to the reasoning capability.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReasoningTransportError {
    /// Could not reach the endpoint.
    #[error("Reasoning endpoint unreachable: {0}")]
    Unreachable(String),
    /// Endpoint answered with a non-success status.
    #[error("Reasoning endpoint returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },
    /// Other transport failure.
    #[error("Reasoning transport error: {0}")]
    Other(String),
}

/// Client for the reasoning capability.
///
/// Implementations only move bytes. Timeouts, retries and cancellation are
/// owned by the kernel.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Send a request and return the raw response text.
    async fn complete(&self, request: &ReasoningRequest) -> Result<String, ReasoningTransportError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "reasoning"
    }
}
