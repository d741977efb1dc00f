//! Chat completion port
//!
//! The core only ever asks "system prompt + user content -> text". Provider
//! response shapes are normalized in [`extract_completion_text`]; a failed
//! call is `None`, never an error, and the diagnostic is logged here.
//!
//! # Feature Flags
//!
//! - `openai`: Enables [`OpenAICompatClient`] (DashScope compatible-mode, OpenAI, OpenRouter...)

pub mod parse;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{RecollectError, Result};
use crate::types::LlmConfig;

pub use parse::{first_balanced_object, parse_json_object};

/// Sends one system + user prompt pair and returns the model's text
#[async_trait]
pub trait TextCompletionPort: Send + Sync {
    /// `None` on transport failure or non-success status
    async fn complete(&self, model: &str, system_prompt: &str, user_content: &str) -> Option<String>;
}

/// Pull the completion text out of a provider response
///
/// Accepts the OpenAI shape (`choices[0].message.content`) and the DashScope
/// native shapes (`output.choices[0].message.content`, `output.text`).
pub fn extract_completion_text(response: &Value) -> Option<String> {
    const POINTERS: [&str; 3] = [
        "/choices/0/message/content",
        "/output/choices/0/message/content",
        "/output/text",
    ];

    POINTERS
        .iter()
        .find_map(|p| response.pointer(p).and_then(Value::as_str))
        .map(str::to_string)
}

/// OpenAI-compatible chat completion client
#[cfg(feature = "openai")]
pub struct OpenAICompatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[cfg(feature = "openai")]
impl OpenAICompatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            RecollectError::Config(
                "DASHSCOPE_API_KEY or OPENAI_API_KEY required for the chat completion client"
                    .to_string(),
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Async chat completion call
    pub async fn complete_async(
        &self,
        model: &str,
        system_prompt: &str,
        user_content: &str,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": model,
                "messages": [
                    {"role": "system", "content": system_prompt},
                    {"role": "user", "content": user_content},
                ],
                "temperature": 0.1,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RecollectError::Transport(format!(
                "Completion API error {}: {}",
                status, text
            )));
        }

        let data: Value = response.json().await?;
        extract_completion_text(&data).ok_or_else(|| {
            RecollectError::MalformedResponse("No completion text in response".to_string())
        })
    }
}

#[cfg(feature = "openai")]
#[async_trait]
impl TextCompletionPort for OpenAICompatClient {
    async fn complete(&self, model: &str, system_prompt: &str, user_content: &str) -> Option<String> {
        match self.complete_async(model, system_prompt, user_content).await {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(model = %model, "Completion failed: {}", e);
                None
            }
        }
    }
}

/// Create a completion client from configuration
pub fn create_completion_client(config: &LlmConfig) -> Result<Arc<dyn TextCompletionPort>> {
    #[cfg(feature = "openai")]
    {
        Ok(Arc::new(OpenAICompatClient::new(config)?))
    }
    #[cfg(not(feature = "openai"))]
    {
        let _ = config;
        Err(RecollectError::Config(
            "Chat completion requires the 'openai' feature to be enabled. Build with: cargo build --features openai".to_string(),
        ))
    }
}
