//! LLM-assisted stages of the write path
//!
//! Provides:
//! - Fact extraction from conversation turns
//! - Reconciliation of new facts against stored ones (ADD / UPDATE / DELETE / NOOP)

pub mod fact_extraction;
pub mod reconcile;

use std::sync::Arc;

pub use fact_extraction::{parse_facts, FactExtractor, FACT_EXTRACTION_PROMPT};
pub use reconcile::{
    is_retraction, parse_reconcile_answer, LlmReconciler, Reconciler, SimilarityReconciler,
    RECONCILE_PROMPT,
};

use crate::llm::TextCompletionPort;
use crate::types::{ReconcileConfig, ReconcileStrategy};

/// Build the reconciler selected by `config.strategy`
pub fn create_reconciler(
    config: &ReconcileConfig,
    completion: Arc<dyn TextCompletionPort>,
    model: &str,
) -> Arc<dyn Reconciler> {
    match config.strategy {
        ReconcileStrategy::Similarity => Arc::new(SimilarityReconciler::new(config.clone())),
        ReconcileStrategy::Llm => Arc::new(LlmReconciler::new(completion, model, config.clone())),
    }
}
