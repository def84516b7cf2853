//! Memory subsystem: short-term conversation ring plus long-term profile,
//! with ordered and similarity recall over the vector store.

pub mod embedding;
pub mod long_term;
pub mod vector;

pub use embedding::{ApiEmbedder, EmbeddingProvider, HashEmbedder};
pub use long_term::{LongTermMetadata, LongTermRecord};
pub use vector::{
    LONG_TERM_COLLECTION, SHORT_TERM_COLLECTION, SqliteVectorStore, VectorHit, VectorRecord,
    VectorStore, cosine_similarity,
};

use crate::bus::events::now_epoch_ms;
use crate::config::MemoryConfig;
use crate::error::Result;
use crate::llm::{ChatMessage, LlmClient, chat_json};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// One short-term conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortTermEntry {
    pub query: String,
    pub response: String,
    pub timestamp_ms: u64,
    pub agent: String,
    pub success: bool,
}

/// A similarity-recall hit.
#[derive(Debug, Clone)]
pub struct RelatedMemory {
    pub entry: ShortTermEntry,
    pub score: f32,
}

struct Inner {
    ring: VecDeque<ShortTermEntry>,
    appends: u64,
    last_stm_ts: u64,
}

/// The memory subsystem. Writes are serialized by the internal mutex so
/// ring order and vector ids stay consistent; reads clone snapshots.
pub struct MemorySubsystem {
    config: MemoryConfig,
    inner: Mutex<Inner>,
    long_term: Mutex<LongTermRecord>,
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl MemorySubsystem {
    /// Build the subsystem, loading the long-term record from disk when
    /// present (failures log and start empty).
    pub fn new(
        config: MemoryConfig,
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let record = LongTermRecord::load_or_default(&config.long_term_file);
        Self {
            config,
            inner: Mutex::new(Inner {
                ring: VecDeque::new(),
                appends: 0,
                last_stm_ts: 0,
            }),
            long_term: Mutex::new(record),
            vector,
            embedder,
        }
    }

    /// Record one completed turn. Returns `true` when the long-term
    /// extraction is due (every `trigger_count` appends).
    pub fn record_turn(&self, entry: ShortTermEntry) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        // Monotonic stm ids even when two appends land in the same ms.
        let ts = now_epoch_ms().max(inner.last_stm_ts + 1);
        inner.last_stm_ts = ts;

        let document = format!("user: {}\nassistant: {}", entry.query, entry.response);
        let embedding = self.embedder.embed(&document)?;
        let record = VectorRecord {
            id: format!("stm_{ts}"),
            embedding,
            document,
            metadata: serde_json::to_value(&entry).unwrap_or(serde_json::Value::Null),
        };
        if let Err(e) = self.vector.upsert(SHORT_TERM_COLLECTION, record) {
            warn!("short-term vector upsert failed: {e}");
        }

        inner.ring.push_back(entry);
        while inner.ring.len() > self.config.short_term_capacity {
            inner.ring.pop_front();
        }
        inner.appends += 1;
        Ok(inner.appends % self.config.trigger_count as u64 == 0)
    }

    /// The last `n` turns in insertion order.
    pub fn recall_recent(&self, n: usize) -> Vec<ShortTermEntry> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let skip = inner.ring.len().saturating_sub(n);
        inner.ring.iter().skip(skip).cloned().collect()
    }

    /// Top-`k` turns by cosine similarity against `query`, scoring at or
    /// above the configured threshold, deduplicated against the last
    /// `exclude_recent` turns.
    pub fn recall_related(
        &self,
        query: &str,
        top_k: usize,
        exclude_recent: usize,
    ) -> Result<Vec<RelatedMemory>> {
        let embedding = self.embedder.embed(query)?;
        let recent = self.recall_recent(exclude_recent);
        // Over-fetch so dedup does not starve the result set.
        let hits = self
            .vector
            .query(SHORT_TERM_COLLECTION, &embedding, top_k + exclude_recent)?;

        let mut related = Vec::new();
        for hit in hits {
            if hit.score < self.config.similarity_threshold {
                continue;
            }
            let Ok(entry) = serde_json::from_value::<ShortTermEntry>(hit.record.metadata.clone())
            else {
                continue;
            };
            let duplicate = recent
                .iter()
                .any(|r| r.query == entry.query && r.response == entry.response);
            if duplicate {
                continue;
            }
            related.push(RelatedMemory {
                entry,
                score: hit.score,
            });
            if related.len() >= top_k {
                break;
            }
        }
        Ok(related)
    }

    /// Snapshot of the long-term record.
    pub fn long_term(&self) -> LongTermRecord {
        self.long_term.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run the LLM extraction over recent history and fold the result into
    /// the long-term record, persisting JSON and vector entries.
    ///
    /// Persistence failures are logged; the in-memory record still
    /// advances.
    ///
    /// # Errors
    ///
    /// Returns an error when the LLM call itself fails.
    pub async fn update_long_term(&self, llm: &dyn LlmClient) -> Result<()> {
        let turns = self.recall_recent(self.config.max_history_rounds);
        if turns.is_empty() {
            return Ok(());
        }
        let current = self.long_term();
        let prompt = build_extraction_prompt(&turns, &current);
        let extracted = chat_json(
            llm,
            &[
                ChatMessage::system(
                    "你是一个用户画像分析系统，只输出合法的JSON，不要输出其他文字。",
                ),
                ChatMessage::user(prompt),
            ],
        )
        .await?;

        let record = {
            let mut record = self.long_term.lock().unwrap_or_else(|e| e.into_inner());
            record.merge(&extracted);
            record.clone()
        };

        if let Err(e) = record.save(&self.config.long_term_file) {
            warn!("long-term persistence failed, continuing in memory: {e}");
        }
        for (field, rendered) in record.vector_fields() {
            match self.embedder.embed(&rendered) {
                Ok(embedding) => {
                    let row = VectorRecord {
                        id: format!("ltm_{field}"),
                        embedding,
                        document: rendered,
                        metadata: serde_json::json!({"field": field}),
                    };
                    if let Err(e) = self.vector.upsert(LONG_TERM_COLLECTION, row) {
                        warn!(field, "long-term vector upsert failed: {e}");
                    }
                }
                Err(e) => warn!(field, "long-term embedding failed: {e}"),
            }
        }
        info!(
            update_count = record.metadata.update_count,
            "long-term memory updated"
        );
        Ok(())
    }

    pub fn statistics(&self) -> serde_json::Value {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let record = self.long_term.lock().unwrap_or_else(|e| e.into_inner());
        serde_json::json!({
            "short_term": inner.ring.len(),
            "appends": inner.appends,
            "long_term_updates": record.metadata.update_count,
            "short_term_vectors": self.vector.count(SHORT_TERM_COLLECTION).unwrap_or(0),
            "long_term_vectors": self.vector.count(LONG_TERM_COLLECTION).unwrap_or(0),
        })
    }
}

fn build_extraction_prompt(turns: &[ShortTermEntry], current: &LongTermRecord) -> String {
    let conversations: Vec<serde_json::Value> = turns
        .iter()
        .map(|t| {
            serde_json::json!({
                "user": t.query,
                "assistant": t.response,
            })
        })
        .collect();
    format!(
        "从下面的对话历史中提取用户的长期记忆。\n\n\
         对话历史:\n{}\n\n\
         当前用户画像:\n{}\n\n\
         当前偏好:\n{}\n\n\
         要求:\n\
         1. 只提取对话中明确提到的信息，不要猜测\n\
         2. 在现有画像基础上补充，不要覆盖已有的准确信息\n\
         3. 输出JSON: {{\"summary\": \"总体摘要\", \"profile\": {{...}}, \"preferences\": {{\"music\": [..], ...}}}}",
        serde_json::to_string(&conversations).unwrap_or_default(),
        serde_json::to_string(&current.profile).unwrap_or_default(),
        serde_json::to_string(&current.preferences).unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;

    fn entry(query: &str, response: &str) -> ShortTermEntry {
        ShortTermEntry {
            query: query.to_owned(),
            response: response.to_owned(),
            timestamp_ms: now_epoch_ms(),
            agent: "chat_agent".to_owned(),
            success: true,
        }
    }

    fn subsystem(config: MemoryConfig) -> MemorySubsystem {
        MemorySubsystem::new(
            config,
            Arc::new(SqliteVectorStore::in_memory().expect("store")),
            Arc::new(HashEmbedder::new()),
        )
    }

    #[test]
    fn recent_returns_last_n_in_insertion_order() {
        let memory = subsystem(MemoryConfig::default());
        for i in 0..8 {
            memory
                .record_turn(entry(&format!("q{i}"), &format!("r{i}")))
                .expect("record");
        }
        let recent = memory.recall_recent(3);
        let queries: Vec<&str> = recent.iter().map(|e| e.query.as_str()).collect();
        assert_eq!(queries, vec!["q5", "q6", "q7"]);
    }

    #[test]
    fn ring_respects_capacity() {
        let config = MemoryConfig {
            short_term_capacity: 4,
            ..MemoryConfig::default()
        };
        let memory = subsystem(config);
        for i in 0..10 {
            memory.record_turn(entry(&format!("q{i}"), "r")).expect("record");
        }
        let recent = memory.recall_recent(100);
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[0].query, "q6");
    }

    #[test]
    fn trigger_fires_every_n_appends() {
        let config = MemoryConfig {
            trigger_count: 3,
            ..MemoryConfig::default()
        };
        let memory = subsystem(config);
        let mut fired = Vec::new();
        for i in 0..7 {
            let due = memory.record_turn(entry(&format!("q{i}"), "r")).expect("record");
            fired.push(due);
        }
        assert_eq!(fired, vec![false, false, true, false, false, true, false]);
    }

    #[test]
    fn related_recall_ranks_and_filters() {
        let config = MemoryConfig {
            // Hashing embeddings overlap less than model embeddings; a
            // lower floor keeps the semantics observable.
            similarity_threshold: 0.25,
            ..MemoryConfig::default()
        };
        let memory = subsystem(config);
        memory
            .record_turn(entry("导航到中关村", "正在规划路线"))
            .expect("record");
        memory
            .record_turn(entry("播放周杰伦", "已播放"))
            .expect("record");

        // Nothing recent excluded: exclude_recent = 0.
        let related = memory
            .recall_related("导航到中关村附近", 5, 0)
            .expect("recall");
        assert!(!related.is_empty());
        assert_eq!(related[0].entry.query, "导航到中关村");
        assert!(related[0].score >= 0.25);
        // The music turn must not outrank navigation.
        if related.len() > 1 {
            assert!(related[0].score > related[1].score);
        }
    }

    #[test]
    fn related_recall_dedups_against_recent() {
        let config = MemoryConfig {
            similarity_threshold: 0.1,
            ..MemoryConfig::default()
        };
        let memory = subsystem(config);
        memory
            .record_turn(entry("导航到中关村", "正在规划路线"))
            .expect("record");
        let related = memory
            .recall_related("导航到中关村", 5, 5)
            .expect("recall");
        assert!(related.is_empty(), "entry already covered by Recent");
    }

    #[tokio::test]
    async fn long_term_update_persists_and_counts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = MemoryConfig {
            trigger_count: 2,
            long_term_file: dir.path().join("ltm.json"),
            ..MemoryConfig::default()
        };
        let memory = subsystem(config.clone());
        let llm = ScriptedLlm::new().with_fallback(
            "{\"summary\": \"通勤用户\", \"profile\": {\"name\": \"小明\"}, \"preferences\": {\"music\": [\"周杰伦\"]}}",
        );

        memory.record_turn(entry("我叫小明", "你好小明")).expect("record");
        let due = memory
            .record_turn(entry("播放周杰伦", "已播放"))
            .expect("record");
        assert!(due);
        memory.update_long_term(&llm).await.expect("update");

        let record = memory.long_term();
        assert_eq!(record.profile["name"], "小明");
        assert_eq!(record.metadata.update_count, 1);
        assert!(config.long_term_file.exists());
        assert!(memory.statistics()["long_term_vectors"].as_u64().unwrap_or(0) >= 2);

        // A fresh subsystem over the same file sees the same record.
        let reloaded = subsystem(config);
        assert_eq!(reloaded.long_term().profile["name"], "小明");
        assert_eq!(reloaded.long_term().metadata.update_count, 1);
    }
}
