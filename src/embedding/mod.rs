//! Embedding generation
//!
//! Supports multiple embedding backends:
//! - OpenAI-compatible API (DashScope text-embedding-v3 by default) - requires `openai` feature
//! - TF-IDF fallback (no external dependencies)
//!
//! Every backend sits behind [`EmbeddingPort`], whose contract is to return an
//! empty vector when no embedding could be produced. Response shapes of the
//! different providers are normalized once, in [`extract_embedding`].
//!
//! # Feature Flags
//!
//! - `openai`: Enables the OpenAI-compatible embedding backend (requires API key)

mod tfidf;

pub use tfidf::TfIdfEmbedder;

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{RecollectError, Result};
use crate::types::EmbeddingConfig;

/// Turns text into a fixed-length vector
#[async_trait]
pub trait EmbeddingPort: Send + Sync {
    /// Embed `text`; an empty vector means "embedding unavailable"
    async fn embed(&self, text: &str) -> Vec<f32>;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// Pull the first embedding vector out of a provider response
///
/// Accepts the OpenAI shape (`data[0].embedding`), the DashScope native shape
/// (`output.embeddings[0].embedding`) and a bare `embeddings[0].embedding`.
pub fn extract_embedding(response: &Value) -> Option<Vec<f32>> {
    const POINTERS: [&str; 3] = [
        "/data/0/embedding",
        "/output/embeddings/0/embedding",
        "/embeddings/0/embedding",
    ];

    let array = POINTERS
        .iter()
        .find_map(|p| response.pointer(p).and_then(Value::as_array))?;

    // Values beyond f32 range would become infinities
    let embedding: Vec<f32> = array
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .filter(|f| f.is_finite())
        .collect();

    if embedding.len() != array.len() || embedding.is_empty() {
        return None;
    }
    Some(embedding)
}

/// OpenAI-compatible embedding client
///
/// Requires the `openai` feature to be enabled.
/// Works with DashScope compatible-mode, OpenAI, OpenRouter and Azure OpenAI.
#[cfg(feature = "openai")]
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
}

#[cfg(feature = "openai")]
impl OpenAIEmbedder {
    /// Create a new embedder with custom settings
    ///
    /// # Arguments
    /// * `api_key` - API key for authentication
    /// * `base_url` - API base URL (default: DashScope compatible-mode)
    /// * `model` - Model name (default: "text-embedding-v3")
    /// * `dimensions` - Expected embedding dimensions (must match model output)
    pub fn with_config(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        dimensions: Option<usize>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| crate::types::DEFAULT_BASE_URL.to_string()),
            model: model.unwrap_or_else(|| crate::types::DEFAULT_EMBEDDING_MODEL.to_string()),
            dimensions: dimensions.unwrap_or(crate::types::DEFAULT_API_EMBEDDING_DIMENSIONS),
        }
    }

    /// Async embedding call to an OpenAI-compatible API
    pub async fn embed_async(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "input": text,
                "model": self.model,
                "dimensions": self.dimensions,
                "encoding_format": "float",
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RecollectError::Transport(format!(
                "Embedding API error {}: {}",
                status, text
            )));
        }

        let data: Value = response.json().await?;
        let embedding = extract_embedding(&data).ok_or_else(|| {
            RecollectError::MalformedResponse("No embedding in response".to_string())
        })?;

        if embedding.len() != self.dimensions {
            return Err(RecollectError::InvalidEmbeddingDimension {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }

        Ok(embedding)
    }
}

#[cfg(feature = "openai")]
#[async_trait]
impl EmbeddingPort for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Vec<f32> {
        match self.embed_async(text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(model = %self.model, "Embedding failed: {}", e);
                Vec::new()
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Create an embedder from configuration
///
/// Available models depend on enabled features:
/// - `"tfidf"`: Always available, no external dependencies
/// - `"openai"`: Requires `openai` feature and API key
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingPort>> {
    match config.model.as_str() {
        #[cfg(feature = "openai")]
        "openai" => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                RecollectError::Config(
                    "DASHSCOPE_API_KEY or OPENAI_API_KEY required for the openai embedding backend"
                        .to_string(),
                )
            })?;
            Ok(Arc::new(OpenAIEmbedder::with_config(
                api_key,
                config.base_url.clone(),
                config.embedding_model.clone(),
                Some(config.dimensions),
            )))
        }
        #[cfg(not(feature = "openai"))]
        "openai" => Err(RecollectError::Config(
            "OpenAI embeddings require the 'openai' feature to be enabled. Build with: cargo build --features openai".to_string(),
        )),
        "tfidf" => Ok(Arc::new(TfIdfEmbedder::new(config.dimensions))),
        _ => Err(RecollectError::Config(format!(
            "Unknown embedding model: '{}'. Use 'openai' or 'tfidf'",
            config.model
        ))),
    }
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Total order on similarity scores, with NaN below every number
pub fn compare_similarity(a: f32, b: f32) -> Ordering {
    fn key(score: f32) -> f32 {
        if score.is_nan() {
            f32::NEG_INFINITY
        } else {
            // folds -0.0 into 0.0
            score + 0.0
        }
    }
    key(a).total_cmp(&key(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);

        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_extract_embedding_shapes() {
        let openai = json!({"data": [{"embedding": [0.1, 0.2], "index": 0}]});
        let dashscope = json!({"output": {"embeddings": [{"embedding": [0.3, 0.4], "text_index": 0}]}});
        let bare = json!({"embeddings": [{"embedding": [0.5]}]});

        assert_eq!(extract_embedding(&openai), Some(vec![0.1, 0.2]));
        assert_eq!(extract_embedding(&dashscope), Some(vec![0.3, 0.4]));
        assert_eq!(extract_embedding(&bare), Some(vec![0.5]));
    }

    #[test]
    fn test_extract_embedding_rejects_garbage() {
        assert_eq!(extract_embedding(&json!({"data": []})), None);
        assert_eq!(extract_embedding(&json!({"data": [{"embedding": []}]})), None);
        assert_eq!(
            extract_embedding(&json!({"data": [{"embedding": [0.1, "x"]}]})),
            None
        );
        assert_eq!(extract_embedding(&json!({"error": "quota"})), None);
    }

    #[test]
    fn test_compare_similarity_is_total() {
        assert_eq!(compare_similarity(0.9, 0.1), Ordering::Greater);
        assert_eq!(compare_similarity(f32::NAN, -1.0), Ordering::Less);
        assert_eq!(compare_similarity(f32::NAN, f32::NAN), Ordering::Equal);
        assert_eq!(compare_similarity(-0.0, 0.0), Ordering::Equal);

        let mut scores = vec![0.2, f32::NAN, 1.0, f32::INFINITY, -0.5, f32::NAN];
        scores.sort_by(|a, b| compare_similarity(*b, *a));
        assert_eq!(&scores[..4], &[f32::INFINITY, 1.0, 0.2, -0.5]);
        assert!(scores[4..].iter().all(|s| s.is_nan()));
    }

    #[test]
    fn test_extract_embedding_rejects_out_of_range_values() {
        assert_eq!(
            extract_embedding(&json!({"data": [{"embedding": [0.1, 1e39, 0.2]}]})),
            None
        );
        assert_eq!(
            extract_embedding(&json!({"data": [{"embedding": [-1e300]}]})),
            None
        );
        assert_eq!(
            extract_embedding(&json!({"data": [{"embedding": [0.1, 3.0e38]}]})),
            Some(vec![0.1, 3.0e38])
        );
    }

    #[tokio::test]
    async fn test_create_tfidf_embedder() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.dimensions(), 384);
        assert_eq!(embedder.embed("Hello world").await.len(), 384);
    }

    #[test]
    fn test_create_embedder_unknown_model() {
        let config = EmbeddingConfig {
            model: "word2vec".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_embedder(&config),
            Err(RecollectError::Config(_))
        ));
    }
}
