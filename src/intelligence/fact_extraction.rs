//! Fact extraction from conversation turns
//!
//! One completion request per turn. The model answers `{"facts": [...]}`;
//! anything it gets wrong degrades to "no facts", never to an error on the
//! write path.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::error::{RecollectError, Result};
use crate::llm::{parse_json_object, TextCompletionPort};

/// System prompt for fact extraction
pub const FACT_EXTRACTION_PROMPT: &str = r#"You extract personal facts about the user from a conversation.

Rules:
- Return ONLY a JSON object of the form {"facts": ["fact 1", "fact 2"]}.
- Each fact is atomic (one piece of information) and self-contained: it must be
  understandable without the conversation, so name the subject explicitly.
- Keep facts about the user: identity, age, occupation, preferences, dislikes,
  plans, relationships, habits.
- When the user changes something ("I am now...", "I no longer..."), state the
  new situation as the fact.
- Greetings, small talk and questions carry no facts: return {"facts": []}.
- Write the facts in the same language as the conversation.

Examples:
Input: 你好
Output: {"facts": []}

Input: 我叫李四，今年25岁
Output: {"facts": ["名字是李四", "今年25岁"]}

Input: 我最喜欢的电影是《泰坦尼克号》
Output: {"facts": ["最喜欢的电影是《泰坦尼克号》"]}

Input: 我计划下周去北京旅游
Output: {"facts": ["计划下周去北京旅游"]}

Input: I don't like spicy food, and I work as a doctor at a hospital.
Output: {"facts": ["Does not like spicy food", "Works as a doctor at a hospital"]}
"#;

/// Turns a conversation turn into atomic fact statements
pub struct FactExtractor {
    completion: Arc<dyn TextCompletionPort>,
    model: String,
}

impl FactExtractor {
    pub fn new(completion: Arc<dyn TextCompletionPort>, model: impl Into<String>) -> Self {
        Self {
            completion,
            model: model.into(),
        }
    }

    /// Extract facts, degrading every failure to an empty list
    #[instrument(skip(self, conversation), fields(conversation_len = conversation.len()))]
    pub async fn extract_facts(&self, conversation: &str) -> Vec<String> {
        match self.try_extract_facts(conversation).await {
            Ok(facts) => {
                debug!(count = facts.len(), "extracted facts");
                facts
            }
            Err(e) => {
                warn!("Fact extraction failed, treating as no facts: {}", e);
                Vec::new()
            }
        }
    }

    /// Extract facts, surfacing transport and parse failures
    pub async fn try_extract_facts(&self, conversation: &str) -> Result<Vec<String>> {
        let conversation = conversation.trim();
        if conversation.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .completion
            .complete(&self.model, FACT_EXTRACTION_PROMPT, conversation)
            .await
            .ok_or_else(|| {
                RecollectError::Transport("Completion returned no content".to_string())
            })?;

        parse_facts(&response)
    }
}

/// Parse a `{"facts": [...]}` response
///
/// A missing `facts` key means no facts. Entries are trimmed; empty strings,
/// non-strings and repeats are dropped.
pub fn parse_facts(response: &str) -> Result<Vec<String>> {
    let value = parse_json_object(response)?;

    let entries = match value.get("facts") {
        None => return Ok(Vec::new()),
        Some(facts) => facts.as_array().ok_or_else(|| {
            RecollectError::MalformedResponse("\"facts\" is not an array".to_string())
        })?,
    };

    let mut seen = HashSet::new();
    Ok(entries
        .iter()
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .filter(|f| seen.insert(f.to_string()))
        .map(str::to_string)
        .collect())
}
