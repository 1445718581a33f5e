//! Kernel configuration.
//!
//! ## Environment
//!
//! - `SOUL_MAX_PASSAGE_CHARS`: passage cap for segmentation (default: 1200)
//! - `SOUL_PROMPT_BUDGET_CHARS`: request size budget (default: 120000)
//! - `SOUL_PASSAGE_SUMMARY_CHARS`: summary length when over budget (default: 240)
//! - `SOUL_REASONING_TIMEOUT_MS`: per-attempt timeout (default: 60000)
//! - `SOUL_MAX_TRANSPORT_RETRIES`: retries after a transport error (default: 2)
//! - `SOUL_RETRY_BACKOFF_MS`: sleep between retries (default: 500)
//! - `SOUL_CONFIDENCE_GATE`: minimum response confidence (default: 0.70)
//! - `SOUL_DIR`: directory holding `BTM/` translation maps (optional)
//!
//! Unparseable values fall back to the default; [`KernelConfig::validate`]
//! rejects values that parse but make no sense.

use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::canonical::canonical_hash_hex;
use crate::segment::{SegmentationPolicy, DEFAULT_MAX_PASSAGE_CHARS};

/// Default request size budget in characters.
pub const DEFAULT_PROMPT_BUDGET_CHARS: usize = 120_000;

/// Default confidence gate.
pub const DEFAULT_CONFIDENCE_GATE: f64 = 0.70;

/// Upper bound on transport retries per check.
pub const MAX_TRANSPORT_RETRIES: u32 = 10;

/// Configuration error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A value is out of range.
    #[error("Invalid configuration: {field} {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// A required setting is absent.
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

/// Configuration for a consistency kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Passage cap used when ingesting.
    pub max_passage_chars: usize,
    /// Request size budget.
    pub prompt_budget_chars: usize,
    /// Summary length used when full passages exceed the budget.
    pub passage_summary_chars: usize,
    /// Per-attempt reasoning timeout.
    pub reasoning_timeout_ms: u64,
    /// Retries after a transport error.
    pub max_transport_retries: u32,
    /// Sleep between retries.
    pub retry_backoff_ms: u64,
    /// Minimum confidence for a response to be considered.
    pub confidence_gate: f64,
    /// Directory holding bureau translation maps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soul_dir: Option<PathBuf>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_passage_chars: DEFAULT_MAX_PASSAGE_CHARS,
            prompt_budget_chars: DEFAULT_PROMPT_BUDGET_CHARS,
            passage_summary_chars: 240,
            reasoning_timeout_ms: 60_000,
            max_transport_retries: 2,
            retry_backoff_ms: 500,
            confidence_gate: DEFAULT_CONFIDENCE_GATE,
            soul_dir: None,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl KernelConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_passage_chars: env_or("SOUL_MAX_PASSAGE_CHARS", defaults.max_passage_chars),
            prompt_budget_chars: env_or("SOUL_PROMPT_BUDGET_CHARS", defaults.prompt_budget_chars),
            passage_summary_chars: env_or("SOUL_PASSAGE_SUMMARY_CHARS", defaults.passage_summary_chars),
            reasoning_timeout_ms: env_or("SOUL_REASONING_TIMEOUT_MS", defaults.reasoning_timeout_ms),
            max_transport_retries: env_or("SOUL_MAX_TRANSPORT_RETRIES", defaults.max_transport_retries),
            retry_backoff_ms: env_or("SOUL_RETRY_BACKOFF_MS", defaults.retry_backoff_ms),
            confidence_gate: env_or("SOUL_CONFIDENCE_GATE", defaults.confidence_gate),
            soul_dir: std::env::var("SOUL_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Reject nonsensical values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_passage_chars", self.max_passage_chars),
            ("prompt_budget_chars", self.prompt_budget_chars),
            ("passage_summary_chars", self.passage_summary_chars),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.reasoning_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "reasoning_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_transport_retries > MAX_TRANSPORT_RETRIES {
            return Err(ConfigError::Invalid {
                field: "max_transport_retries",
                reason: format!(
                    "must be at most {}, got {}",
                    MAX_TRANSPORT_RETRIES, self.max_transport_retries
                ),
            });
        }
        if !self.confidence_gate.is_finite() || !(0.0..=1.0).contains(&self.confidence_gate) {
            return Err(ConfigError::Invalid {
                field: "confidence_gate",
                reason: format!("must be within [0, 1], got {}", self.confidence_gate),
            });
        }
        Ok(())
    }

    /// Segmentation policy for ingestion.
    pub fn segmentation_policy(&self) -> SegmentationPolicy {
        SegmentationPolicy::with_max_chars(self.max_passage_chars)
    }

    /// Per-attempt reasoning timeout.
    pub fn reasoning_timeout(&self) -> Duration {
        Duration::from_millis(self.reasoning_timeout_ms)
    }

    /// Sleep between transport retries.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Hash of every setting that affects a verdict.
    ///
    /// `soul_dir` is excluded: it is a location, not a behavior. The bureau
    /// translation map it points at is reflected in the prompt instead.
    pub fn fingerprint(&self) -> String {
        canonical_hash_hex(&(
            self.segmentation_policy().params_hash(),
            self.prompt_budget_chars,
            self.passage_summary_chars,
            self.reasoning_timeout_ms,
            self.max_transport_retries,
            self.retry_backoff_ms,
            self.confidence_gate,
        ))
    }
}
