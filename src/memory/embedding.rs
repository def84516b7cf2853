//! Embedding provider seam for semantic recall.
//!
//! The embedding service is an external collaborator; the runtime only
//! needs `text -> unit-length f32 vector`. Two implementations ship:
//! an OpenAI-compatible HTTP client, and a deterministic local hashing
//! embedder used when no endpoint is configured.

use crate::error::{AssistantError, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Output dimensions of the local hashing embedder.
pub const HASH_EMBEDDING_DIM: usize = 384;

/// Produces sentence embeddings.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text into an L2-normalized vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Vector dimensionality.
    fn dimension(&self) -> usize;
}

/// L2-normalize in place; zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Deterministic local embedder: character unigrams + bigrams hashed into
/// a fixed-width term-frequency vector, then L2-normalized. No model
/// download, stable across runs, good enough for token-overlap similarity.
pub struct HashEmbedder {
    dim: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            dim: HASH_EMBEDDING_DIM,
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % self.dim
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        let chars: Vec<char> = text
            .chars()
            .filter(|c| !c.is_whitespace() && !c.is_ascii_punctuation())
            .collect();
        for c in &chars {
            let token = c.to_string();
            vector[self.bucket(&token)] += 1.0;
        }
        for pair in chars.windows(2) {
            let token: String = pair.iter().collect();
            vector[self.bucket(&token)] += 1.0;
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

/// OpenAI-compatible `/v1/embeddings` client.
pub struct ApiEmbedder {
    api_url: String,
    api_key: String,
    model: String,
    dim: usize,
    agent: ureq::Agent,
}

impl ApiEmbedder {
    pub fn new(api_url: &str, api_key: &str, model: &str, dim: usize) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
            model: model.to_owned(),
            dim,
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(15))
                .build(),
        }
    }
}

impl EmbeddingProvider for ApiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.api_url);
        let mut request = self.agent.post(&url);
        if !self.api_key.is_empty() {
            request = request.set("Authorization", &format!("Bearer {}", self.api_key));
        }
        let response = request
            .send_json(serde_json::json!({
                "model": self.model,
                "input": text,
            }))
            .map_err(|e| AssistantError::Embedding(format!("request failed: {e}")))?;
        let body: serde_json::Value = response
            .into_json()
            .map_err(|e| AssistantError::Embedding(format!("bad response body: {e}")))?;
        let values = body["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| AssistantError::Embedding("response missing embedding".to_owned()))?;
        let mut vector: Vec<f32> = values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();
        if vector.is_empty() {
            return Err(AssistantError::Embedding("empty embedding".to_owned()));
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::vector::cosine_similarity;

    #[test]
    fn embeddings_are_unit_length() {
        let embedder = HashEmbedder::new();
        let v = embedder.embed("导航到中关村").expect("embed");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn similar_texts_score_higher_than_unrelated() {
        let embedder = HashEmbedder::new();
        let nav_a = embedder.embed("导航到中关村").expect("embed");
        let nav_b = embedder.embed("导航去公司").expect("embed");
        let music = embedder.embed("播放周杰伦的歌").expect("embed");
        assert!(cosine_similarity(&nav_a, &nav_b) > cosine_similarity(&nav_a, &music));
    }

    #[test]
    fn embedding_is_deterministic() {
        let embedder = HashEmbedder::new();
        assert_eq!(
            embedder.embed("打开空调").expect("embed"),
            embedder.embed("打开空调").expect("embed")
        );
    }

    #[test]
    fn empty_text_yields_zero_vector() {
        let embedder = HashEmbedder::new();
        let v = embedder.embed("").expect("embed");
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
