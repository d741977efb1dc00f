//! TF-IDF based embedding fallback
//!
//! Simple, fast, no external dependencies. Good for testing and
//! environments where API calls aren't possible. Latin text is split into
//! words; CJK runs, which carry no spaces, are split into character bigrams.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::embedding::EmbeddingPort;

/// TF-IDF based embedder using hashing trick
pub struct TfIdfEmbedder {
    dimensions: usize,
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{3040}'..='\u{30FF}'
        | '\u{AC00}'..='\u{D7AF}'
        | '\u{F900}'..='\u{FAFF}')
}

impl TfIdfEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Tokenize text into lowercase words and CJK character bigrams
    fn tokenize(text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut word = String::new();
        let mut cjk_run: Vec<char> = Vec::new();

        fn flush_word(word: &mut String, tokens: &mut Vec<String>) {
            if word.len() > 1 {
                tokens.push(word.clone());
            }
            word.clear();
        }

        fn flush_cjk(run: &mut Vec<char>, tokens: &mut Vec<String>) {
            match run.len() {
                0 => {}
                1 => tokens.push(run[0].to_string()),
                _ => tokens.extend(run.windows(2).map(|w| w.iter().collect::<String>())),
            }
            run.clear();
        }

        for c in text.to_lowercase().chars() {
            if is_cjk(c) {
                flush_word(&mut word, &mut tokens);
                cjk_run.push(c);
            } else if c.is_alphanumeric() {
                flush_cjk(&mut cjk_run, &mut tokens);
                word.push(c);
            } else {
                flush_word(&mut word, &mut tokens);
                flush_cjk(&mut cjk_run, &mut tokens);
            }
        }
        flush_word(&mut word, &mut tokens);
        flush_cjk(&mut cjk_run, &mut tokens);

        tokens
    }

    /// Hash a token to a dimension index
    fn hash_token(token: &str, dimensions: usize) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % dimensions
    }

    /// Get sign for feature hashing (reduces collision impact)
    fn hash_sign(token: &str) -> f32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        format!("{}_sign", token).hash(&mut hasher);
        if hasher.finish() % 2 == 0 {
            1.0
        } else {
            -1.0
        }
    }

    /// Synchronous embedding; all-zero for text without tokens
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let tokens = Self::tokenize(text);
        let mut embedding = vec![0.0_f32; self.dimensions];

        if tokens.is_empty() || self.dimensions == 0 {
            return embedding;
        }

        let mut tf: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        let doc_len = tokens.len() as f32;
        for (token, count) in tf {
            // TF: log(1 + count/doc_len)
            let tf_score = (1.0 + count / doc_len).ln();

            // IDF approximation based on token length (longer = rarer)
            let idf_score = 1.0 + (token.chars().count() as f32 * 0.1);

            let idx = Self::hash_token(token, self.dimensions);
            embedding[idx] += tf_score * idf_score * Self::hash_sign(token);
        }

        // Bigrams of tokens, weighted less
        for window in tokens.windows(2) {
            let bigram = format!("{}_{}", window[0], window[1]);
            let idx = Self::hash_token(&bigram, self.dimensions);
            embedding[idx] += 0.5 * Self::hash_sign(&bigram);
        }

        // L2 normalize
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingPort for TfIdfEmbedder {
    async fn embed(&self, text: &str) -> Vec<f32> {
        let embedding = self.embed_text(text);
        // An all-zero vector carries no direction; report it as unavailable
        if embedding.iter().all(|&x| x == 0.0) {
            return Vec::new();
        }
        embedding
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "tfidf"
    }
}
