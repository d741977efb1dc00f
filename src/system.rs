//! The memory system: extraction, reconciliation and retrieval over one store
//!
//! Writes to the same (user, agent) scope are serialized through a per-scope
//! async lock held across the whole read-reconcile-write sequence. Searches
//! never take that lock; they read through the store, which applies each
//! write's decisions in a single transaction.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use crate::embedding::{create_embedder, EmbeddingPort};
use crate::error::{RecollectError, Result};
use crate::intelligence::{create_reconciler, FactExtractor, Reconciler};
use crate::llm::{create_completion_client, TextCompletionPort};
use crate::storage::MemoryStore;
use crate::types::{
    Candidate, DecisionOutcome, Fact, FactId, MemoryConfig, Scope, SearchHit,
    WriteReport,
};

type ScopeLocks = DashMap<Scope, Arc<tokio::sync::Mutex<()>>>;

/// Exclusive write access to one scope
///
/// On drop the lock is released and its map entry removed, unless another
/// task still holds or waits on it.
struct ScopeWriteGuard<'a> {
    locks: &'a ScopeLocks,
    scope: Scope,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for ScopeWriteGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.scope, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Conversational fact memory, partitioned by (user, agent)
pub struct MemorySystem {
    extractor: FactExtractor,
    embedder: Arc<dyn EmbeddingPort>,
    reconciler: Arc<dyn Reconciler>,
    store: MemoryStore,
    scope_locks: ScopeLocks,
}

impl MemorySystem {
    /// Assemble a system from explicit ports
    pub fn new(
        completion: Arc<dyn TextCompletionPort>,
        chat_model: impl Into<String>,
        embedder: Arc<dyn EmbeddingPort>,
        reconciler: Arc<dyn Reconciler>,
        store: MemoryStore,
    ) -> Self {
        Self {
            extractor: FactExtractor::new(completion, chat_model),
            embedder,
            reconciler,
            store,
            scope_locks: DashMap::new(),
        }
    }

    /// Build ports and store from configuration
    pub fn from_config(config: MemoryConfig) -> Result<Self> {
        config.reconcile.validate()?;

        let completion = create_completion_client(&config.llm)?;
        let embedder = create_embedder(&config.embedding)?;
        let store = MemoryStore::open(config.storage.clone(), embedder.dimensions())?;
        let reconciler = create_reconciler(&config.reconcile, completion.clone(), &config.llm.model);

        info!(
            chat_model = %config.llm.model,
            embedding_model = %embedder.model_name(),
            dimensions = embedder.dimensions(),
            db_path = %config.storage.db_path,
            strategy = ?config.reconcile.strategy,
            "memory system ready"
        );

        Ok(Self::new(
            completion,
            config.llm.model,
            embedder,
            reconciler,
            store,
        ))
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    fn scope_lock(&self, scope: &Scope) -> Arc<tokio::sync::Mutex<()>> {
        self.scope_locks
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn lock_scope(&self, scope: &Scope) -> ScopeWriteGuard<'_> {
        let mut held = ScopeWriteGuard {
            locks: &self.scope_locks,
            scope: scope.clone(),
            guard: None,
        };
        let lock = self.scope_lock(scope);
        held.guard = Some(lock.lock_owned().await);
        held
    }

    /// Extract facts from one conversation turn and fold them into the scope
    ///
    /// Extraction failure is a no-op write. Facts whose embedding is
    /// unavailable, and decisions the store rejects, are reported in the
    /// returned [`WriteReport`] without aborting the others.
    #[instrument(skip(self, conversation), fields(conversation_len = conversation.len()))]
    pub async fn write_memory(
        &self,
        conversation: &str,
        user_id: &str,
        agent_id: &str,
    ) -> Result<WriteReport> {
        let scope = Scope::new(user_id, agent_id);
        let _write = self.lock_scope(&scope).await;

        let facts = self.extractor.extract_facts(conversation).await;
        let mut report = WriteReport {
            extracted: facts.len(),
            ..WriteReport::default()
        };
        if facts.is_empty() {
            debug!("no facts extracted");
            return Ok(report);
        }

        let mut candidates = Vec::with_capacity(facts.len());
        for text in facts {
            let embedding = self.embedder.embed(&text).await;
            let rejection = if embedding.is_empty() || embedding.iter().any(|x| !x.is_finite()) {
                Some(RecollectError::EmbeddingUnavailable(text.clone()))
            } else if embedding.len() != self.store.dimensions() {
                Some(RecollectError::InvalidEmbeddingDimension {
                    expected: self.store.dimensions(),
                    actual: embedding.len(),
                })
            } else {
                None
            };

            match rejection {
                Some(e) => {
                    warn!("Skipping fact: {}", e);
                    report.outcomes.push(DecisionOutcome::unreconciled(text, e));
                }
                None => candidates.push(Candidate::new(text, embedding)),
            }
        }

        if candidates.is_empty() {
            return Ok(report);
        }
        report.reconciled = candidates.len();

        let existing = self.store.list(&scope)?;
        let decisions = self.reconciler.reconcile(candidates, &existing).await;
        let outcomes = self.store.apply(&scope, decisions)?;

        for failure in outcomes.iter().filter(|o| !o.is_ok()) {
            warn!(
                kind = %failure.kind,
                fact_id = ?failure.fact_id,
                "Decision not applied: {}",
                failure.error.as_deref().unwrap_or_default()
            );
        }
        report.outcomes.extend(outcomes);

        info!(
            extracted = report.extracted,
            added = report.added(),
            updated = report.updated(),
            deleted = report.deleted(),
            unchanged = report.unchanged(),
            failed = report.failures().len(),
            "memory written"
        );
        Ok(report)
    }

    /// Facts of the scope most similar to `query`, best first
    ///
    /// `limit <= 0` yields an empty result.
    #[instrument(skip(self, query))]
    pub async fn search_memory(
        &self,
        query: &str,
        user_id: &str,
        agent_id: &str,
        limit: i64,
    ) -> Result<Vec<SearchHit>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query).await;
        if query_embedding.is_empty() || query_embedding.iter().any(|x| !x.is_finite()) {
            return Err(RecollectError::EmbeddingUnavailable(query.to_string()));
        }

        let scope = Scope::new(user_id, agent_id);
        let results = self.store.search(&scope, &query_embedding, limit)?;
        debug!(results = results.len(), "search complete");

        Ok(results.into_iter().map(SearchHit::from).collect())
    }

    /// Run extraction alone, without touching the store
    pub async fn extract_facts(&self, conversation: &str) -> Vec<String> {
        self.extractor.extract_facts(conversation).await
    }

    /// All facts of the scope, most recently updated first
    pub fn list_memories(&self, user_id: &str, agent_id: &str) -> Result<Vec<Fact>> {
        self.store.list(&Scope::new(user_id, agent_id))
    }

    /// Remove one fact, waiting for in-flight writes of the scope
    pub async fn delete_memory(&self, id: FactId, user_id: &str, agent_id: &str) -> Result<()> {
        let scope = Scope::new(user_id, agent_id);
        let _write = self.lock_scope(&scope).await;
        self.store.delete(&scope, id)
    }

    pub fn memory_count(&self, user_id: &str, agent_id: &str) -> Result<i64> {
        self.store.count(&Scope::new(user_id, agent_id))
    }
}
