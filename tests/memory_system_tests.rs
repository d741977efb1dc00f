//! End-to-end tests for the memory system
//!
//! The ports are replaced by deterministic fakes: a completion port that
//! answers from a script, and an embedder that maps keywords onto fixed
//! concept axes so similarities are known in advance.
//!
//! Run with: cargo test --test memory_system_tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use recollect::embedding::EmbeddingPort;
use recollect::intelligence::{LlmReconciler, Reconciler, SimilarityReconciler, RECONCILE_PROMPT};
use recollect::llm::TextCompletionPort;
use recollect::{DecisionKind, MemoryStore, MemorySystem, ReconcileConfig, RecollectError};

// ============================================================================
// FAKES
// ============================================================================

/// Keyword -> (axis, weight); text embeds to the sum of its keywords
const CONCEPTS: &[(&str, usize, f32)] = &[
    ("名字", 0, 1.0),
    ("张三", 0, 1.0),
    ("职业", 1, 2.0),
    ("works as", 1, 2.0),
    ("软件工程师", 2, 1.0),
    ("software engineer", 2, 1.0),
    ("产品经理", 3, 1.0),
    ("product manager", 3, 1.0),
    ("电影", 4, 1.0),
    ("科幻", 5, 1.0),
    ("猫", 6, 1.0),
];

const AXES: usize = 8;

struct ConceptEmbedder;

#[async_trait]
impl EmbeddingPort for ConceptEmbedder {
    async fn embed(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut embedding = vec![0.0; AXES];
        for (keyword, axis, weight) in CONCEPTS {
            if lower.contains(keyword) {
                embedding[*axis] += weight;
            }
        }
        if embedding.iter().all(|&x| x == 0.0) {
            return Vec::new();
        }
        embedding
    }

    fn dimensions(&self) -> usize {
        AXES
    }

    fn model_name(&self) -> &str {
        "concepts"
    }
}

/// Replies with the first script entry whose needle occurs in the user content
struct ScriptedCompletion {
    script: Vec<(&'static str, &'static str)>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedCompletion {
    fn new(script: Vec<(&'static str, &'static str)>) -> Self {
        Self {
            script,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn reconcile_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(system, _)| system == RECONCILE_PROMPT)
            .count()
    }
}

#[async_trait]
impl TextCompletionPort for ScriptedCompletion {
    async fn complete(&self, _model: &str, system_prompt: &str, user_content: &str) -> Option<String> {
        self.calls
            .lock()
            .push((system_prompt.to_string(), user_content.to_string()));

        if user_content.contains("hang forever") {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.script
            .iter()
            .find(|(needle, _)| user_content.contains(needle))
            .map(|(_, reply)| reply.to_string())
    }
}

const INTRODUCTION: &str = "我叫张三，是一名软件工程师";
const CAREER_CHANGE: &str = "我现在不做软件工程师了，转行做产品经理";
const SHORT_CAREER_CHANGE: &str = "我现在是产品经理";
const QUERY: &str = "张三的职业是什么？";

fn script() -> Vec<(&'static str, &'static str)> {
    vec![
        (INTRODUCTION, r#"{"facts": ["名字是张三", "职业是软件工程师"]}"#),
        (CAREER_CHANGE, "```json\n{\"facts\": [\"职业是产品经理\"]}\n```"),
        (SHORT_CAREER_CHANGE, r#"{"facts": ["职业是产品经理"]}"#),
        ("你好", r#"{"facts": []}"#),
        ("我喜欢看科幻电影", r#"{"facts": ["喜欢看科幻电影"]}"#),
        ("I used to be a software engineer", r#"{"facts": ["Works as a software engineer"]}"#),
        ("I switched careers", r#"{"facts": ["Works as a product manager"]}"#),
    ]
}

fn build(completion: Arc<ScriptedCompletion>, reconciler: Arc<dyn Reconciler>) -> MemorySystem {
    MemorySystem::new(
        completion,
        "test-model",
        Arc::new(ConceptEmbedder),
        reconciler,
        MemoryStore::open_in_memory(AXES).unwrap(),
    )
}

fn similarity_system() -> MemorySystem {
    build(
        Arc::new(ScriptedCompletion::new(script())),
        Arc::new(SimilarityReconciler::new(ReconcileConfig::default())),
    )
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn test_chinese_profile_update_end_to_end() {
    let system = similarity_system();

    let report = system
        .write_memory(INTRODUCTION, "user_001", "agent_001")
        .await
        .unwrap();
    assert_eq!(report.extracted, 2);
    assert_eq!(report.added(), 2);

    let hits = system
        .search_memory(QUERY, "user_001", "agent_001", 3)
        .await
        .unwrap();
    assert_eq!(hits[0].text, "职业是软件工程师");
    assert!(hits[0].score > 0.5, "score was {}", hits[0].score);

    let report = system
        .write_memory(CAREER_CHANGE, "user_001", "agent_001")
        .await
        .unwrap();
    assert_eq!(report.updated(), 1);
    assert_eq!(report.added(), 0);

    let hits = system
        .search_memory(QUERY, "user_001", "agent_001", 3)
        .await
        .unwrap();
    let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
    assert_eq!(texts, vec!["职业是产品经理", "名字是张三"]);
    assert_eq!(system.memory_count("user_001", "agent_001").unwrap(), 2);
}

#[tokio::test]
async fn test_short_career_update_sentence() {
    let system = similarity_system();

    system
        .write_memory(INTRODUCTION, "user_001", "agent_001")
        .await
        .unwrap();

    let report = system
        .write_memory(SHORT_CAREER_CHANGE, "user_001", "agent_001")
        .await
        .unwrap();
    assert_eq!(report.extracted, 1);
    assert_eq!(report.updated(), 1);
    assert_eq!(report.added(), 0);
    assert_eq!(report.deleted(), 0);

    let hits = system
        .search_memory(QUERY, "user_001", "agent_001", 3)
        .await
        .unwrap();
    assert_eq!(hits[0].text, "职业是产品经理");
    assert!(hits[0].score > 0.5, "score was {}", hits[0].score);
    assert!(hits.iter().all(|h| h.text != "职业是软件工程师"));
    assert_eq!(system.memory_count("user_001", "agent_001").unwrap(), 2);
}

#[tokio::test]
async fn test_scopes_are_isolated() {
    let system = similarity_system();
    system
        .write_memory(INTRODUCTION, "user_001", "agent_001")
        .await
        .unwrap();

    for (user, agent) in [("user_002", "agent_001"), ("user_001", "agent_002")] {
        let hits = system.search_memory(QUERY, user, agent, 10).await.unwrap();
        assert!(hits.is_empty(), "{}/{} saw {:?}", user, agent, hits);
        assert!(system.list_memories(user, agent).unwrap().is_empty());
    }

    // The same fact in another scope is a fresh ADD, not a duplicate
    let report = system
        .write_memory(INTRODUCTION, "user_002", "agent_001")
        .await
        .unwrap();
    assert_eq!(report.added(), 2);
}

#[tokio::test]
async fn test_resubmission_is_noop() {
    let system = similarity_system();
    system
        .write_memory(INTRODUCTION, "user_001", "agent_001")
        .await
        .unwrap();
    let before = system.list_memories("user_001", "agent_001").unwrap();

    let report = system
        .write_memory(INTRODUCTION, "user_001", "agent_001")
        .await
        .unwrap();
    assert!(report.is_noop());
    assert_eq!(report.unchanged(), 2);

    let after = system.list_memories("user_001", "agent_001").unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_english_update_supersedes() {
    let system = similarity_system();
    system
        .write_memory("I used to be a software engineer at a startup", "u", "a")
        .await
        .unwrap();
    system
        .write_memory("I switched careers last month", "u", "a")
        .await
        .unwrap();

    let facts = system.list_memories("u", "a").unwrap();
    let texts: Vec<&str> = facts.iter().map(|f| f.text.as_str()).collect();
    assert_eq!(texts, vec!["Works as a product manager"]);
    assert!(facts[0].updated_at >= facts[0].created_at);
}

#[tokio::test]
async fn test_search_ranking_and_limit() {
    let system = similarity_system();
    system.write_memory(INTRODUCTION, "u", "a").await.unwrap();
    system.write_memory("我喜欢看科幻电影", "u", "a").await.unwrap();

    let hits = system.search_memory(QUERY, "u", "a", 10).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

    assert_eq!(system.search_memory(QUERY, "u", "a", 1).await.unwrap().len(), 1);
    assert!(system.search_memory(QUERY, "u", "a", 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_contract() {
    let system = similarity_system();
    system.write_memory(INTRODUCTION, "u", "a").await.unwrap();

    let facts = system.list_memories("u", "a").unwrap();
    let victim = facts[0].id;

    // Wrong scope cannot see the fact
    assert!(matches!(
        system.delete_memory(victim, "u", "other").await,
        Err(RecollectError::NotFound(_))
    ));

    system.delete_memory(victim, "u", "a").await.unwrap();
    assert!(matches!(
        system.delete_memory(victim, "u", "a").await,
        Err(RecollectError::NotFound(id)) if id == victim
    ));
    assert_eq!(system.memory_count("u", "a").unwrap(), 1);
}

#[tokio::test]
async fn test_extraction_failure_is_noop_write() {
    let system = similarity_system();

    // Unscripted conversation: the completion port answers None
    let report = system
        .write_memory("something the model never answers", "u", "a")
        .await
        .unwrap();
    assert_eq!(report.extracted, 0);
    assert!(report.outcomes.is_empty());

    let report = system.write_memory("你好", "u", "a").await.unwrap();
    assert!(report.is_noop());
    assert_eq!(system.memory_count("u", "a").unwrap(), 0);
}

#[tokio::test]
async fn test_unembeddable_query_is_an_error() {
    let system = similarity_system();
    assert!(matches!(
        system.search_memory("天气怎么样", "u", "a", 5).await,
        Err(RecollectError::EmbeddingUnavailable(_))
    ));
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_to_one_scope_are_serialized() {
    let completion = Arc::new(ScriptedCompletion::new(script()).with_delay(Duration::from_millis(20)));
    let system = Arc::new(build(
        completion,
        Arc::new(SimilarityReconciler::new(ReconcileConfig::default())),
    ));

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let system = system.clone();
            tokio::spawn(async move {
                system
                    .write_memory(INTRODUCTION, "user_001", "agent_001")
                    .await
            })
        })
        .collect();

    let mut added = 0;
    for writer in writers {
        added += writer.await.unwrap().unwrap().added();
    }

    // Every writer after the first sees the facts already stored
    assert_eq!(added, 2);
    assert_eq!(system.memory_count("user_001", "agent_001").unwrap(), 2);
}

#[tokio::test]
async fn test_cancelled_write_releases_scope() {
    let system = similarity_system();

    let stalled = tokio::time::timeout(
        Duration::from_millis(50),
        system.write_memory("please hang forever", "u", "a"),
    )
    .await;
    assert!(stalled.is_err());

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        system.write_memory(INTRODUCTION, "u", "a"),
    )
    .await
    .expect("scope lock was not released")
    .unwrap();
    assert_eq!(report.added(), 2);
}

// ============================================================================
// LLM RECONCILIATION
// ============================================================================

#[tokio::test]
async fn test_llm_reconciler_end_to_end() {
    let mut script = script();
    script.insert(0, (r#""new_fact":"职业是产品经理""#, r#"{"event": "UPDATE", "index": 0}"#));
    let completion = Arc::new(ScriptedCompletion::new(script));
    let reconciler = Arc::new(LlmReconciler::new(
        completion.clone(),
        "test-model",
        ReconcileConfig::default(),
    ));
    let system = build(completion.clone(), reconciler);

    // Empty scope: no shortlist, no reconciliation calls
    let report = system.write_memory(INTRODUCTION, "u", "a").await.unwrap();
    assert_eq!(report.added(), 2);
    assert_eq!(completion.reconcile_calls(), 0);

    let report = system.write_memory(CAREER_CHANGE, "u", "a").await.unwrap();
    assert_eq!(completion.reconcile_calls(), 1);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].kind, DecisionKind::Update);

    let hits = system.search_memory(QUERY, "u", "a", 1).await.unwrap();
    assert_eq!(hits[0].text, "职业是产品经理");
}
