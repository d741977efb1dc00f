//! Scoped fact store with similarity search
//!
//! `MemoryStore` enforces the store-level contract on top of the raw queries:
//! a fixed embedding dimension with finite components, scope isolation, and `NotFound` on missing ids.

use tracing::debug;

use super::connection::Storage;
use super::queries;
use crate::error::{RecollectError, Result};
use crate::types::{
    DecisionKind, DecisionOutcome, Fact, FactId, ReconciliationDecision, Scope, ScoredFact,
    StorageConfig,
};

/// Per-(user, agent) fact store over SQLite
#[derive(Clone)]
pub struct MemoryStore {
    storage: Storage,
    dimensions: usize,
}

impl MemoryStore {
    /// Open a store whose facts all carry `dimensions`-long embeddings
    pub fn open(config: StorageConfig, dimensions: usize) -> Result<Self> {
        Self::with_storage(Storage::open(config)?, dimensions)
    }

    /// Process-local store, mainly for tests
    pub fn open_in_memory(dimensions: usize) -> Result<Self> {
        Self::with_storage(Storage::open_in_memory()?, dimensions)
    }

    pub fn with_storage(storage: Storage, dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(RecollectError::Config(
                "Embedding dimensions must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            storage,
            dimensions,
        })
    }

    /// Configured embedding dimension
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Embeddings must match the configured dimension and be finite
    fn check_embedding(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimensions {
            return Err(RecollectError::InvalidEmbeddingDimension {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }
        if let Some(index) = embedding.iter().position(|x| !x.is_finite()) {
            return Err(RecollectError::NonFiniteEmbedding { index });
        }
        Ok(())
    }

    /// Append a new fact and return its id
    pub fn insert(&self, scope: &Scope, text: &str, embedding: &[f32]) -> Result<FactId> {
        self.check_embedding(embedding)?;
        let fact = self
            .storage
            .with_connection(|conn| queries::insert_fact(conn, scope, text, embedding))?;
        debug!(scope = %scope, id = %fact.id, "inserted fact");
        Ok(fact.id)
    }

    /// Replace text and embedding of a fact in place
    pub fn update(&self, scope: &Scope, id: FactId, text: &str, embedding: &[f32]) -> Result<()> {
        self.check_embedding(embedding)?;
        self.storage
            .with_connection(|conn| queries::update_fact(conn, scope, id, text, embedding))?;
        debug!(scope = %scope, id = %id, "updated fact");
        Ok(())
    }

    /// Remove a fact; deleting twice fails the second time
    pub fn delete(&self, scope: &Scope, id: FactId) -> Result<()> {
        self.storage
            .with_connection(|conn| queries::delete_fact(conn, scope, id))?;
        debug!(scope = %scope, id = %id, "deleted fact");
        Ok(())
    }

    /// Up to `limit` facts of `scope`, by descending similarity
    ///
    /// `limit <= 0` yields an empty result.
    pub fn search(&self, scope: &Scope, query_embedding: &[f32], limit: i64) -> Result<Vec<ScoredFact>> {
        if limit <= 0 {
            return Ok(vec![]);
        }
        self.check_embedding(query_embedding)?;
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        self.storage
            .with_connection(|conn| queries::search_facts(conn, scope, query_embedding, limit))
    }

    pub fn get(&self, scope: &Scope, id: FactId) -> Result<Option<Fact>> {
        self.storage
            .with_connection(|conn| queries::get_fact(conn, scope, id))
    }

    /// Full scope scan, most recently updated first
    pub fn list(&self, scope: &Scope) -> Result<Vec<Fact>> {
        self.storage
            .with_connection(|conn| queries::list_facts(conn, scope))
    }

    pub fn count(&self, scope: &Scope) -> Result<i64> {
        self.storage
            .with_connection(|conn| queries::count_facts(conn, scope))
    }

    /// Apply a decision sequence in order, inside one transaction
    ///
    /// Each decision is applied independently: a failing decision writes
    /// nothing and is reported in its outcome, its siblings still apply.
    /// Concurrent readers observe the scope either before or after the
    /// whole sequence.
    pub fn apply(
        &self,
        scope: &Scope,
        decisions: Vec<ReconciliationDecision>,
    ) -> Result<Vec<DecisionOutcome>> {
        self.storage.with_transaction(|conn| {
            let outcomes = decisions
                .into_iter()
                .map(|decision| self.apply_one(conn, scope, decision))
                .collect();
            Ok(outcomes)
        })
    }

    fn apply_one(
        &self,
        conn: &rusqlite::Connection,
        scope: &Scope,
        decision: ReconciliationDecision,
    ) -> DecisionOutcome {
        match decision {
            ReconciliationDecision::Add(candidate) => {
                let result = self
                    .check_embedding(&candidate.embedding)
                    .and_then(|_| queries::insert_fact(conn, scope, &candidate.text, &candidate.embedding));
                match result {
                    Ok(fact) => DecisionOutcome::applied(DecisionKind::Add, Some(fact.id), Some(fact.text)),
                    Err(e) => DecisionOutcome::failed(DecisionKind::Add, None, Some(candidate.text), e),
                }
            }
            ReconciliationDecision::Update { id, text, embedding } => {
                let result = self
                    .check_embedding(&embedding)
                    .and_then(|_| queries::update_fact(conn, scope, id, &text, &embedding));
                match result {
                    Ok(fact) => DecisionOutcome::applied(DecisionKind::Update, Some(id), Some(fact.text)),
                    Err(e) => DecisionOutcome::failed(DecisionKind::Update, Some(id), Some(text), e),
                }
            }
            ReconciliationDecision::Delete { id } => match queries::delete_fact(conn, scope, id) {
                Ok(()) => DecisionOutcome::applied(DecisionKind::Delete, Some(id), None),
                Err(e) => DecisionOutcome::failed(DecisionKind::Delete, Some(id), None, e),
            },
            ReconciliationDecision::Noop => DecisionOutcome::applied(DecisionKind::Noop, None, None),
        }
    }
}
