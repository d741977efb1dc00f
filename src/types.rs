//! Core types for Recollect

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RecollectError, Result};

/// Unique identifier for a stored fact
pub type FactId = Uuid;

/// The (user, agent) pair that delimits which facts a request may see
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub user_id: String,
    pub agent_id: String,
}

impl Scope {
    pub fn new(user_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            agent_id: agent_id.into(),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_id, self.agent_id)
    }
}

/// An atomic statement about a user, persisted with its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Unique identifier
    pub id: FactId,
    /// The fact itself, self-contained natural language
    pub text: String,
    /// Vector embedding of `text`
    pub embedding: Vec<f32>,
    /// Owning user
    pub user_id: String,
    /// Owning agent
    pub agent_id: String,
    /// Content hash for exact duplicate detection (SHA256 of normalized text)
    pub content_hash: String,
    /// When the fact was first stored
    pub created_at: DateTime<Utc>,
    /// When the fact was last written
    pub updated_at: DateTime<Utc>,
}

impl Fact {
    pub fn scope(&self) -> Scope {
        Scope::new(self.user_id.clone(), self.agent_id.clone())
    }
}

/// A fact with its similarity to a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredFact {
    pub fact: Fact,
    pub score: f32,
}

/// Public search result shape: internal identifiers and timestamps are dropped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub score: f32,
}

impl From<ScoredFact> for SearchHit {
    fn from(scored: ScoredFact) -> Self {
        Self {
            text: scored.fact.text,
            score: scored.score,
        }
    }
}

/// An extracted, not yet persisted fact with its embedding
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub text: String,
    pub embedding: Vec<f32>,
    pub content_hash: String,
}

impl Candidate {
    pub fn new(text: impl Into<String>, embedding: Vec<f32>) -> Self {
        let text = text.into();
        let content_hash = crate::storage::queries::compute_content_hash(&text);
        Self {
            text,
            embedding,
            content_hash,
        }
    }
}

/// What to do with one candidate against the existing facts of its scope
#[derive(Debug, Clone, PartialEq)]
pub enum ReconciliationDecision {
    /// Store the candidate as a new fact
    Add(Candidate),
    /// Replace text and embedding of an existing fact
    Update {
        id: FactId,
        text: String,
        embedding: Vec<f32>,
    },
    /// Remove an existing fact
    Delete { id: FactId },
    /// Nothing to do (duplicate or discarded)
    Noop,
}

impl ReconciliationDecision {
    pub fn kind(&self) -> DecisionKind {
        match self {
            ReconciliationDecision::Add(_) => DecisionKind::Add,
            ReconciliationDecision::Update { .. } => DecisionKind::Update,
            ReconciliationDecision::Delete { .. } => DecisionKind::Delete,
            ReconciliationDecision::Noop => DecisionKind::Noop,
        }
    }

    /// The existing fact this decision targets, if any
    pub fn target(&self) -> Option<FactId> {
        match self {
            ReconciliationDecision::Update { id, .. } | ReconciliationDecision::Delete { id } => {
                Some(*id)
            }
            _ => None,
        }
    }
}

/// Decision kind without payload, for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionKind {
    Add,
    Update,
    Delete,
    Noop,
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionKind::Add => write!(f, "ADD"),
            DecisionKind::Update => write!(f, "UPDATE"),
            DecisionKind::Delete => write!(f, "DELETE"),
            DecisionKind::Noop => write!(f, "NOOP"),
        }
    }
}

impl std::str::FromStr for DecisionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ADD" => Ok(DecisionKind::Add),
            "UPDATE" => Ok(DecisionKind::Update),
            "DELETE" => Ok(DecisionKind::Delete),
            "NOOP" | "NONE" => Ok(DecisionKind::Noop),
            _ => Err(format!("Unknown decision kind: {}", s)),
        }
    }
}

/// Result of applying one decision to the store
///
/// A fact whose embedding was unavailable never reaches the reconciler.
/// It is reported with `reconciled: false`, kind `Add` (the only decision a
/// fact without neighbours could get), no `fact_id` and the embedding error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub kind: DecisionKind,
    /// Fact created, updated or deleted
    pub fact_id: Option<FactId>,
    /// Text written (ADD / UPDATE) or the candidate text that failed before reconciliation
    pub text: Option<String>,
    /// Error message if the decision could not be applied
    pub error: Option<String>,
    /// False when the fact was dropped before reconciliation
    #[serde(default = "default_reconciled")]
    pub reconciled: bool,
}

fn default_reconciled() -> bool {
    true
}

impl DecisionOutcome {
    pub fn applied(kind: DecisionKind, fact_id: Option<FactId>, text: Option<String>) -> Self {
        Self {
            kind,
            fact_id,
            text,
            error: None,
            reconciled: true,
        }
    }

    pub fn failed(
        kind: DecisionKind,
        fact_id: Option<FactId>,
        text: Option<String>,
        error: impl std::fmt::Display,
    ) -> Self {
        Self {
            kind,
            fact_id,
            text,
            error: Some(error.to_string()),
            reconciled: true,
        }
    }

    /// Fact dropped before reconciliation because it could not be embedded
    pub fn unreconciled(text: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            kind: DecisionKind::Add,
            fact_id: None,
            text: Some(text.into()),
            error: Some(error.to_string()),
            reconciled: false,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of one `write_memory` call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteReport {
    /// Facts returned by extraction
    pub extracted: usize,
    /// Facts that were embedded and reconciled
    pub reconciled: usize,
    /// One entry per decision (plus one per fact whose embedding was unavailable)
    pub outcomes: Vec<DecisionOutcome>,
}

impl WriteReport {
    fn count(&self, kind: DecisionKind) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.is_ok() && o.kind == kind)
            .count()
    }

    pub fn added(&self) -> usize {
        self.count(DecisionKind::Add)
    }

    pub fn updated(&self) -> usize {
        self.count(DecisionKind::Update)
    }

    pub fn deleted(&self) -> usize {
        self.count(DecisionKind::Delete)
    }

    pub fn unchanged(&self) -> usize {
        self.count(DecisionKind::Noop)
    }

    pub fn failures(&self) -> Vec<&DecisionOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok()).collect()
    }

    /// Facts that never reached the reconciler
    pub fn unreconciled(&self) -> Vec<&DecisionOutcome> {
        self.outcomes.iter().filter(|o| !o.reconciled).collect()
    }

    /// True when the store was not modified
    pub fn is_noop(&self) -> bool {
        self.added() + self.updated() + self.deleted() == 0
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// DashScope's OpenAI-compatible endpoint
pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_CHAT_MODEL: &str = "qwen-plus";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-v3";
pub const DEFAULT_API_EMBEDDING_DIMENSIONS: usize = 1024;
pub const DEFAULT_TFIDF_DIMENSIONS: usize = 384;

/// Configuration for the storage engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database (":memory:" for a process-local store)
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: ":memory:".to_string(),
        }
    }
}

/// Configuration for the chat completion port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key (DashScope / OpenAI / OpenRouter...)
    pub api_key: Option<String>,
    /// OpenAI-compatible API base URL
    pub base_url: String,
    /// Chat model used for extraction and reconciliation
    pub model: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Configuration for embedding generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend to use: "openai" or "tfidf"
    pub model: String,
    /// API key (for openai backend)
    pub api_key: Option<String>,
    /// OpenAI-compatible API base URL
    pub base_url: Option<String>,
    /// Embedding model name override (e.g., "text-embedding-v3")
    pub embedding_model: Option<String>,
    /// Embedding dimensions (must match model output)
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "tfidf".to_string(),
            api_key: None,
            base_url: None,
            embedding_model: None,
            dimensions: DEFAULT_TFIDF_DIMENSIONS,
        }
    }
}

/// How reconciliation decisions are made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileStrategy {
    /// Similarity thresholds only
    #[default]
    Similarity,
    /// Shortlist by similarity, then let the LLM classify
    Llm,
}

impl std::str::FromStr for ReconcileStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "similarity" => Ok(ReconcileStrategy::Similarity),
            "llm" => Ok(ReconcileStrategy::Llm),
            _ => Err(format!("Unknown reconcile strategy: {}", s)),
        }
    }
}

/// Reconciliation thresholds (cosine similarity, 0.0 - 1.0)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub strategy: ReconcileStrategy,
    /// At or above: the candidate restates an existing fact (NOOP)
    pub duplicate_threshold: f32,
    /// At or above: same subject, different value (UPDATE / DELETE)
    pub update_threshold: f32,
    /// Minimum similarity for an existing fact to be shown to the LLM
    pub llm_shortlist_floor: f32,
    /// Maximum existing facts shown to the LLM per candidate
    pub llm_shortlist_size: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            strategy: ReconcileStrategy::Similarity,
            duplicate_threshold: 0.92,
            update_threshold: 0.75,
            llm_shortlist_floor: 0.5,
            llm_shortlist_size: 5,
        }
    }
}

impl ReconcileConfig {
    /// Thresholds must satisfy 0 <= floor <= update <= duplicate <= 1
    pub fn validate(&self) -> Result<()> {
        let in_range = |v: f32| (0.0..=1.0).contains(&v);
        if !in_range(self.duplicate_threshold)
            || !in_range(self.update_threshold)
            || !in_range(self.llm_shortlist_floor)
        {
            return Err(RecollectError::Config(
                "Reconcile thresholds must be within [0, 1]".to_string(),
            ));
        }
        if self.update_threshold > self.duplicate_threshold {
            return Err(RecollectError::Config(format!(
                "update_threshold ({}) must not exceed duplicate_threshold ({})",
                self.update_threshold, self.duplicate_threshold
            )));
        }
        if self.llm_shortlist_floor > self.update_threshold {
            return Err(RecollectError::Config(format!(
                "llm_shortlist_floor ({}) must not exceed update_threshold ({})",
                self.llm_shortlist_floor, self.update_threshold
            )));
        }
        if self.llm_shortlist_size == 0 {
            return Err(RecollectError::Config(
                "llm_shortlist_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything needed to build a `MemorySystem`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub storage: StorageConfig,
    pub reconcile: ReconcileConfig,
}

impl MemoryConfig {
    /// Build configuration from environment variables
    ///
    /// - `DASHSCOPE_API_KEY` / `OPENAI_API_KEY`: API key (DashScope wins)
    /// - `RECOLLECT_BASE_URL`, `RECOLLECT_CHAT_MODEL`
    /// - `RECOLLECT_EMBEDDING_BACKEND` (openai|tfidf, default: openai when a key is set)
    /// - `RECOLLECT_EMBEDDING_MODEL`, `RECOLLECT_EMBEDDING_DIMENSIONS`
    /// - `RECOLLECT_DB_PATH`
    /// - `RECOLLECT_RECONCILE` (similarity|llm), `RECOLLECT_DUPLICATE_THRESHOLD`,
    ///   `RECOLLECT_UPDATE_THRESHOLD`
    pub fn from_env() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let api_key = env("DASHSCOPE_API_KEY").or_else(|| env("OPENAI_API_KEY"));
        let base_url = env("RECOLLECT_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let llm = LlmConfig {
            api_key: api_key.clone(),
            base_url: base_url.clone(),
            model: env("RECOLLECT_CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            ..LlmConfig::default()
        };

        let backend = env("RECOLLECT_EMBEDDING_BACKEND").unwrap_or_else(|| {
            if api_key.is_some() {
                "openai".to_string()
            } else {
                "tfidf".to_string()
            }
        });
        let default_dimensions = if backend == "tfidf" {
            DEFAULT_TFIDF_DIMENSIONS
        } else {
            DEFAULT_API_EMBEDDING_DIMENSIONS
        };
        let dimensions = match env("RECOLLECT_EMBEDDING_DIMENSIONS") {
            Some(raw) => raw.parse().map_err(|_| {
                RecollectError::Config(format!("Invalid RECOLLECT_EMBEDDING_DIMENSIONS: {}", raw))
            })?,
            None => default_dimensions,
        };
        let embedding = EmbeddingConfig {
            model: backend,
            api_key,
            base_url: Some(base_url),
            embedding_model: env("RECOLLECT_EMBEDDING_MODEL"),
            dimensions,
        };

        let storage = StorageConfig {
            db_path: env("RECOLLECT_DB_PATH").unwrap_or_else(|| ":memory:".to_string()),
        };

        let mut reconcile = ReconcileConfig::default();
        if let Some(raw) = env("RECOLLECT_RECONCILE") {
            reconcile.strategy = raw.parse().map_err(RecollectError::Config)?;
        }
        if let Some(raw) = env("RECOLLECT_DUPLICATE_THRESHOLD") {
            reconcile.duplicate_threshold = parse_threshold("RECOLLECT_DUPLICATE_THRESHOLD", &raw)?;
        }
        if let Some(raw) = env("RECOLLECT_UPDATE_THRESHOLD") {
            reconcile.update_threshold = parse_threshold("RECOLLECT_UPDATE_THRESHOLD", &raw)?;
        }
        reconcile.validate()?;

        Ok(Self {
            llm,
            embedding,
            storage,
            reconcile,
        })
    }
}

fn parse_threshold(key: &str, raw: &str) -> Result<f32> {
    raw.parse()
        .map_err(|_| RecollectError::Config(format!("Invalid {}: {}", key, raw)))
}
