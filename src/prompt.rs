//! Bounded request assembly.
//!
//! Request size is `len(instructions) + len(target) + Σ(len(id) + len(text))`
//! in characters. Full passages are sent when they fit the budget. Otherwise
//! every passage longer than `passage_summary_chars` is replaced by a
//! word-boundary prefix flagged `summarized`. If that still does not fit,
//! assembly fails; nothing is dropped silently.

use uuid::Uuid;

use crate::config::KernelConfig;
use crate::reasoning::{IndexedPassage, ReasoningRequest};
use crate::store::{LookupError, ReferenceStore};
use crate::types::Manifest;
use crate::{KERNEL_VERSION, SCOPE_NOTE};

/// Error type for request assembly.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PromptError {
    /// Even the smallest form of the request exceeds the budget.
    #[error("Request needs {required} chars, budget is {budget}")]
    BudgetExceeded {
        /// Size of the smallest request that could be built.
        required: usize,
        /// Configured budget.
        budget: usize,
    },
    /// A manifest passage could not be read from the store.
    #[error("Cannot read reference passages: {0}")]
    Store(String),
}

/// Role, scope and output contract given to the reasoning capability.
pub fn instructions(bureau_instruction: &str) -> String {
    format!(
        "ROLE: Technical Auditor. SCOPE: {scope}. Kernel {version}.\n\
         Compare the TARGET DOCUMENT against the REFERENCE PASSAGES only.\n\
         Output exactly one JSON object and nothing else:\n\
         {{\"confidence\": <number 0..1>, \"claims\": [{{\"claim_id\": \"C1\", \
         \"statement\": \"...\", \"assertion\": \"CONFORMANT\" | \"NON_CONFORMANT\", \
         \"cited_passage_ids\": [\"<id as shown in brackets>\"]}}]}}\n\
         Every claim must cite the passages it relies on. Claims without a \
         resolvable citation make the check inconclusive.\n\
         {btm}",
        scope = SCOPE_NOTE,
        version = KERNEL_VERSION,
        btm = bureau_instruction,
    )
}

/// Read every passage indexed by the manifest from the store.
///
/// Documents come in manifest order; passages within a document come in
/// document order. Ids are qualified.
pub async fn collect_passages<S: ReferenceStore>(
    store: &S,
    manifest: &Manifest,
) -> Result<Vec<IndexedPassage>, PromptError> {
    let mut passages = Vec::with_capacity(manifest.num_passages());

    for entry in manifest.entries.values() {
        let document = store
            .lookup(&entry.document_id)
            .await
            .map_err(|e: LookupError| PromptError::Store(e.to_string()))?;

        if let Some(missing) = entry.passages.keys().find(|id| document.passage(id).is_none()) {
            return Err(PromptError::Store(format!(
                "passage {}{}{} missing from store",
                entry.document_id,
                crate::CITATION_SEPARATOR,
                missing
            )));
        }

        passages.extend(
            document
                .passages
                .iter()
                .filter(|p| entry.passages.contains_key(&p.passage_id))
                .map(|passage| IndexedPassage {
                    passage_id: passage.citation(),
                    normalized_text: passage.normalized_text.clone(),
                    summarized: false,
                }),
        );
    }

    Ok(passages)
}

/// First `max_chars` characters of `text`, cut back to a word boundary.
///
/// A single word longer than `max_chars` is cut mid-word.
pub fn summarize(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let prefix = &text[..cut];

    if text[cut..].starts_with(char::is_whitespace) {
        return prefix.trim_end().to_string();
    }
    match prefix.rfind(char::is_whitespace) {
        Some(space) if space > 0 => prefix[..space].trim_end().to_string(),
        _ => prefix.to_string(),
    }
}

/// Assemble a request within the configured budget.
pub fn build_request(
    check_id: Uuid,
    instructions: String,
    target_document_ref: &str,
    target_text: &str,
    manifest_version: &str,
    passages: Vec<IndexedPassage>,
    config: &KernelConfig,
) -> Result<ReasoningRequest, PromptError> {
    let budget = config.prompt_budget_chars;
    let mut request = ReasoningRequest {
        check_id,
        instructions,
        target_document_ref: target_document_ref.to_string(),
        target_text: target_text.to_string(),
        manifest_version: manifest_version.to_string(),
        passages,
    };

    let full = request.size_chars();
    if full <= budget {
        tracing::debug!(%check_id, size = full, budget, "Request built with full passages");
        return Ok(request);
    }

    for passage in &mut request.passages {
        if passage.normalized_text.chars().count() > config.passage_summary_chars {
            passage.normalized_text = summarize(&passage.normalized_text, config.passage_summary_chars);
            passage.summarized = true;
        }
    }

    let reduced = request.size_chars();
    if reduced > budget {
        tracing::warn!(%check_id, full, reduced, budget, "Request exceeds budget");
        return Err(PromptError::BudgetExceeded {
            required: reduced,
            budget,
        });
    }

    tracing::info!(
        %check_id,
        full,
        reduced,
        budget,
        summarized = request.passages.iter().filter(|p| p.summarized).count(),
        "Request built with passage summaries"
    );
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(id: &str, text: &str) -> IndexedPassage {
        IndexedPassage {
            passage_id: id.to_string(),
            normalized_text: text.to_string(),
            summarized: false,
        }
    }

    fn config(budget: usize, summary: usize) -> KernelConfig {
        KernelConfig {
            prompt_budget_chars: budget,
            passage_summary_chars: summary,
            ..Default::default()
        }
    }

    #[test]
    fn test_summarize_cuts_on_word_boundary() {
        assert_eq!(summarize("alpha beta gamma", 100), "alpha beta gamma");
        assert_eq!(summarize("alpha beta gamma", 8), "alpha");
        assert_eq!(summarize("alpha beta gamma", 10), "alpha beta");
        assert_eq!(summarize("abcdefghij", 4), "abcd");
    }

    #[test]
    fn test_full_passages_when_they_fit() {
        let request = build_request(
            Uuid::new_v4(),
            "ins".to_string(),
            "t",
            "target",
            "v1",
            vec![passage("a#P1", "one two three")],
            &config(1000, 4),
        )
        .unwrap();
        assert!(!request.passages[0].summarized);
        assert_eq!(request.passages[0].normalized_text, "one two three");
    }

    #[test]
    fn test_summaries_when_over_budget() {
        let long = "word ".repeat(50);
        let request = build_request(
            Uuid::new_v4(),
            "ins".to_string(),
            "t",
            "target",
            "v1",
            vec![passage("a#P1", long.trim()), passage("a#P2", "short")],
            &config(60, 20),
        )
        .unwrap();
        assert!(request.passages[0].summarized);
        assert!(request.passages[0].normalized_text.chars().count() <= 20);
        assert!(!request.passages[1].summarized);
        assert_eq!(request.passages[0].passage_id, "a#P1");
        assert!(request.size_chars() <= 60);
    }

    #[test]
    fn test_budget_exceeded_even_after_summaries() {
        let err = build_request(
            Uuid::new_v4(),
            "ins".to_string(),
            "t",
            &"x".repeat(100),
            "v1",
            vec![passage("a#P1", "short")],
            &config(50, 20),
        )
        .unwrap_err();
        assert!(matches!(err, PromptError::BudgetExceeded { budget: 50, .. }));
    }

    #[tokio::test]
    async fn test_passages_follow_document_order() {
        use crate::manifest::{InMemoryManifestRepository, ManifestManager};
        use crate::segment::SegmentationPolicy;
        use crate::store::InMemoryReferenceStore;
        use std::sync::Arc;

        let text = (1..=12)
            .map(|i| format!("Rule number {} applies.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let store = Arc::new(InMemoryReferenceStore::new());
        let document = store
            .ingest(text.as_bytes(), "m.md", &SegmentationPolicy::default())
            .await
            .unwrap();
        let manager = ManifestManager::new(Arc::clone(&store), Arc::new(InMemoryManifestRepository::new()));
        let manifest = manager.build_manifest(&[document.id]).await.unwrap();

        let passages = collect_passages(store.as_ref(), &manifest).await.unwrap();
        let ids: Vec<String> = passages.iter().map(|p| p.passage_id.clone()).collect();
        let expected: Vec<String> = (1..=12).map(|i| format!("m.md#P{}", i)).collect();
        assert_eq!(ids, expected);
        assert_eq!(passages[9].normalized_text, "Rule number 10 applies.");
    }

    #[test]
    fn test_instructions_carry_scope_and_btm() {
        let text = instructions("BTM: NONE.");
        assert!(text.contains("make the check inconclusive"));
        assert!(!text.contains("discarded"));
        assert!(text.contains(SCOPE_NOTE));
        assert!(text.contains("NON_CONFORMANT"));
        assert!(text.ends_with("BTM: NONE."));
    }
}
