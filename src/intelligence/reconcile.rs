//! Reconciliation of new facts against the facts already stored in a scope
//!
//! There is no join key between a freshly extracted fact and the stored
//! ones, so matching is by embedding similarity (cosine, the same metric the
//! store ranks with). For each candidate:
//!
//! - exact content-hash match, or similarity >= `duplicate_threshold`: NOOP
//! - retraction ("no longer ...") matching a fact >= `update_threshold`: DELETE
//! - similarity >= `update_threshold`: UPDATE the best match in place
//! - otherwise: ADD
//!
//! The best match is the highest similarity; equal similarities go to the
//! most recently updated fact. Candidates of one batch see the decisions made
//! for the candidates before them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::embedding::{compare_similarity, cosine_similarity};
use crate::error::{RecollectError, Result};
use crate::llm::{parse_json_object, TextCompletionPort};
use crate::types::{
    Candidate, DecisionKind, Fact, FactId, ReconcileConfig, ReconciliationDecision,
};

/// Statement that withdraws a fact without replacing it ("no longer ...")
///
/// Latin markers must stand as whole words; CJK markers match anywhere.
static RETRACTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:^|[^a-z0-9])(?:no longer|not anymore|anymore|any more|stopped|quit|gave up)(?:$|[^a-z0-9])|不再|已经不|没有再|放弃了|戒了",
    )
    .expect("valid regex")
});

/// Replacement value ("now a product manager")
static REPLACEMENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:^|[^a-z0-9])(?:now|instead|switched to|became)(?:$|[^a-z0-9])|现在|改为|改成|换成|成为|变成",
    )
    .expect("valid regex")
});

/// Maps candidates onto ADD / UPDATE / DELETE / NOOP decisions
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// One decision per candidate, in candidate order
    async fn reconcile(
        &self,
        candidates: Vec<Candidate>,
        existing: &[Fact],
    ) -> Vec<ReconciliationDecision>;
}

/// True when `text` withdraws a fact without giving a new value
pub fn is_retraction(text: &str) -> bool {
    RETRACTION_PATTERN.is_match(text) && !REPLACEMENT_PATTERN.is_match(text)
}

/// A stored fact, or one added earlier in the same batch (no id yet)
#[derive(Debug, Clone)]
struct WorkingEntry {
    id: Option<FactId>,
    text: String,
    embedding: Vec<f32>,
    content_hash: String,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Match {
    index: usize,
    similarity: f32,
}

/// The scope's facts as seen by the next candidate
struct WorkingSet {
    entries: Vec<WorkingEntry>,
    now: DateTime<Utc>,
}

impl WorkingSet {
    fn new(existing: &[Fact]) -> Self {
        Self {
            entries: existing
                .iter()
                .map(|f| WorkingEntry {
                    id: Some(f.id),
                    text: f.text.clone(),
                    embedding: f.embedding.clone(),
                    content_hash: f.content_hash.clone(),
                    updated_at: f.updated_at,
                })
                .collect(),
            now: Utc::now(),
        }
    }

    fn has_hash(&self, content_hash: &str) -> bool {
        self.entries.iter().any(|e| e.content_hash == content_hash)
    }

    /// All entries by descending similarity, ties by freshest first
    fn ranked(&self, candidate: &Candidate) -> Vec<Match> {
        let mut matches: Vec<Match> = self
            .entries
            .iter()
            .enumerate()
            .map(|(index, e)| Match {
                index,
                similarity: cosine_similarity(&candidate.embedding, &e.embedding),
            })
            .collect();

        matches.sort_by(|a, b| {
            compare_similarity(b.similarity, a.similarity).then_with(|| {
                self.entries[b.index]
                    .updated_at
                    .cmp(&self.entries[a.index].updated_at)
            })
        });
        matches
    }

    fn best_match(&self, candidate: &Candidate) -> Option<Match> {
        self.ranked(candidate).into_iter().next()
    }

    fn entry(&self, m: Match) -> &WorkingEntry {
        &self.entries[m.index]
    }

    /// Fold a decision into the view
    fn record(&mut self, decision: &ReconciliationDecision) {
        match decision {
            ReconciliationDecision::Add(candidate) => self.entries.push(WorkingEntry {
                id: None,
                text: candidate.text.clone(),
                embedding: candidate.embedding.clone(),
                content_hash: candidate.content_hash.clone(),
                updated_at: self.now,
            }),
            ReconciliationDecision::Update {
                id,
                text,
                embedding,
            } => {
                if let Some(entry) = self.entries.iter_mut().find(|e| e.id == Some(*id)) {
                    entry.text = text.clone();
                    entry.embedding = embedding.clone();
                    entry.content_hash = crate::storage::queries::compute_content_hash(text);
                    entry.updated_at = self.now;
                }
            }
            ReconciliationDecision::Delete { id } => {
                self.entries.retain(|e| e.id != Some(*id));
            }
            ReconciliationDecision::Noop => {}
        }
    }
}

/// Threshold-only reconciliation; deterministic and LLM-free
#[derive(Debug, Clone, Default)]
pub struct SimilarityReconciler {
    config: ReconcileConfig,
}

impl SimilarityReconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Pure decision function over a candidate batch
    pub fn decide_all(
        &self,
        candidates: Vec<Candidate>,
        existing: &[Fact],
    ) -> Vec<ReconciliationDecision> {
        let mut working = WorkingSet::new(existing);
        candidates
            .into_iter()
            .map(|candidate| {
                let decision = self.decide(candidate, &working);
                working.record(&decision);
                decision
            })
            .collect()
    }

    fn decide(&self, candidate: Candidate, working: &WorkingSet) -> ReconciliationDecision {
        if working.has_hash(&candidate.content_hash) {
            return ReconciliationDecision::Noop;
        }

        let best = match working.best_match(&candidate) {
            Some(best) => best,
            None => return ReconciliationDecision::Add(candidate),
        };
        let target = working.entry(best);

        if best.similarity.is_nan() || best.similarity < self.config.update_threshold {
            return ReconciliationDecision::Add(candidate);
        }

        if is_retraction(&candidate.text) && !is_retraction(&target.text) {
            return match target.id {
                Some(id) => ReconciliationDecision::Delete { id },
                // Retracting something only added in this batch
                None => ReconciliationDecision::Noop,
            };
        }

        if best.similarity >= self.config.duplicate_threshold {
            return ReconciliationDecision::Noop;
        }

        match target.id {
            Some(id) => ReconciliationDecision::Update {
                id,
                text: candidate.text,
                embedding: candidate.embedding,
            },
            None => ReconciliationDecision::Add(candidate),
        }
    }
}

#[async_trait]
impl Reconciler for SimilarityReconciler {
    async fn reconcile(
        &self,
        candidates: Vec<Candidate>,
        existing: &[Fact],
    ) -> Vec<ReconciliationDecision> {
        self.decide_all(candidates, existing)
    }
}

/// System prompt for LLM-backed reconciliation
pub const RECONCILE_PROMPT: &str = r#"You maintain a memory of facts about a user.
You receive a list of existing memories, each with an integer "index", and one "new_fact".
Decide what the new fact means for the memory and answer ONLY with JSON:
{"event": "ADD" | "UPDATE" | "DELETE" | "NONE", "index": <integer or null>}

- ADD: the new fact is about something none of the memories cover.
- UPDATE: the new fact is about the same subject as memory <index> but with a
  different or more recent value; the memory will be replaced by the new fact.
- DELETE: the new fact says memory <index> is no longer true and gives no new value.
- NONE: the new fact is already expressed by a memory.
"index" is required for UPDATE and DELETE and must be one of the given indices."#;

/// LLM classification over a similarity shortlist
///
/// Existing facts are shown to the model under temporary indices; stored ids
/// never leave the process. A failed or invalid answer yields NOOP for that
/// candidate.
pub struct LlmReconciler {
    completion: Arc<dyn TextCompletionPort>,
    model: String,
    config: ReconcileConfig,
}

impl LlmReconciler {
    pub fn new(
        completion: Arc<dyn TextCompletionPort>,
        model: impl Into<String>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            completion,
            model: model.into(),
            config,
        }
    }

    async fn decide(&self, candidate: Candidate, working: &WorkingSet) -> ReconciliationDecision {
        if working.has_hash(&candidate.content_hash) {
            return ReconciliationDecision::Noop;
        }

        let ranked = working.ranked(&candidate);

        // Pending additions of this batch only count as duplicates
        let duplicates_pending = ranked.iter().any(|m| {
            working.entry(*m).id.is_none() && m.similarity >= self.config.duplicate_threshold
        });
        if duplicates_pending {
            return ReconciliationDecision::Noop;
        }

        let shortlist: Vec<(FactId, &WorkingEntry)> = ranked
            .iter()
            .filter(|m| m.similarity >= self.config.llm_shortlist_floor)
            .filter_map(|m| {
                let entry = working.entry(*m);
                entry.id.map(|id| (id, entry))
            })
            .take(self.config.llm_shortlist_size)
            .collect();

        if shortlist.is_empty() {
            return ReconciliationDecision::Add(candidate);
        }

        let memories: Vec<serde_json::Value> = shortlist
            .iter()
            .enumerate()
            .map(|(index, (_, entry))| json!({"index": index, "text": entry.text}))
            .collect();
        let user_content = json!({"memories": memories, "new_fact": candidate.text}).to_string();

        let response = match self
            .completion
            .complete(&self.model, RECONCILE_PROMPT, &user_content)
            .await
        {
            Some(response) => response,
            None => {
                warn!("Reconciliation call failed, skipping candidate");
                return ReconciliationDecision::Noop;
            }
        };

        let ids: Vec<FactId> = shortlist.iter().map(|(id, _)| *id).collect();
        match parse_reconcile_answer(&response, &ids) {
            Ok((DecisionKind::Add, _)) => ReconciliationDecision::Add(candidate),
            Ok((DecisionKind::Update, Some(id))) => ReconciliationDecision::Update {
                id,
                text: candidate.text,
                embedding: candidate.embedding,
            },
            Ok((DecisionKind::Delete, Some(id))) => ReconciliationDecision::Delete { id },
            Ok(_) => ReconciliationDecision::Noop,
            Err(e) => {
                warn!("Unusable reconciliation answer, skipping candidate: {}", e);
                ReconciliationDecision::Noop
            }
        }
    }
}

/// Parse `{"event": ..., "index": ...}` and map the index back to a fact id
pub fn parse_reconcile_answer(
    response: &str,
    shortlist: &[FactId],
) -> Result<(DecisionKind, Option<FactId>)> {
    let value = parse_json_object(response)?;

    let kind: DecisionKind = value
        .get("event")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RecollectError::MalformedResponse("Missing \"event\"".to_string()))?
        .parse::<DecisionKind>()
        .map_err(RecollectError::MalformedResponse)?;

    let index = match value.get("index") {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    match kind {
        DecisionKind::Update | DecisionKind::Delete => {
            let id = index
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| shortlist.get(i).copied())
                .ok_or_else(|| {
                    RecollectError::MalformedResponse(format!(
                        "{} without a valid index (got {:?})",
                        kind,
                        value.get("index")
                    ))
                })?;
            Ok((kind, Some(id)))
        }
        _ => Ok((kind, None)),
    }
}

#[async_trait]
impl Reconciler for LlmReconciler {
    #[instrument(skip_all, fields(candidates = candidates.len(), existing = existing.len()))]
    async fn reconcile(
        &self,
        candidates: Vec<Candidate>,
        existing: &[Fact],
    ) -> Vec<ReconciliationDecision> {
        let mut working = WorkingSet::new(existing);
        let mut decisions = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let decision = self.decide(candidate, &working).await;
            debug!(decision = %decision.kind(), "reconciled candidate");
            working.record(&decision);
            decisions.push(decision);
        }

        decisions
    }
}
