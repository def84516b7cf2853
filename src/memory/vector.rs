//! Vector store: named collections of `(id, embedding, document, metadata)`
//! rows queried by cosine similarity.
//!
//! The production backend is a single SQLite file; embeddings are stored
//! as little-endian f32 blobs and scored in process after a collection
//! scan, which is plenty for the row counts a per-vehicle assistant sees.

use crate::error::{AssistantError, Result};
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;

/// Collection holding short-term conversation memories.
pub const SHORT_TERM_COLLECTION: &str = "short_term_memories";
/// Collection holding long-term profile fields.
pub const LONG_TERM_COLLECTION: &str = "long_term_memories";

/// One stored row.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub document: String,
    pub metadata: serde_json::Value,
}

/// One query hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub record: VectorRecord,
    pub score: f32,
}

/// Cosine similarity; 0.0 for mismatched or zero-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// Storage seam for vector collections.
pub trait VectorStore: Send + Sync {
    /// Insert or replace a row by `(collection, id)`.
    fn upsert(&self, collection: &str, record: VectorRecord) -> Result<()>;

    /// Top-`k` rows by cosine similarity against `embedding`.
    fn query(&self, collection: &str, embedding: &[f32], top_k: usize) -> Result<Vec<VectorHit>>;

    /// Number of rows in a collection.
    fn count(&self, collection: &str) -> Result<usize>;
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// SQLite-backed store. Thread-safe via an internal connection mutex.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
}

impl SqliteVectorStore {
    /// Open (or create) the database file and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| AssistantError::Persistence(format!("open {}: {e}", path.display())))?;
        Self::apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests and evaluation mode.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AssistantError::Persistence(format!("open :memory:: {e}")))?;
        Self::apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn apply_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vectors (
                collection TEXT NOT NULL,
                id         TEXT NOT NULL,
                embedding  BLOB NOT NULL,
                document   TEXT NOT NULL,
                metadata   TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (collection, id)
            );
            CREATE INDEX IF NOT EXISTS idx_vectors_collection ON vectors(collection);",
        )
        .map_err(|e| AssistantError::Persistence(format!("apply schema: {e}")))
    }
}

impl VectorStore for SqliteVectorStore {
    fn upsert(&self, collection: &str, record: VectorRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let metadata = serde_json::to_string(&record.metadata)
            .map_err(|e| AssistantError::Persistence(format!("metadata encode: {e}")))?;
        conn.execute(
            "INSERT INTO vectors (collection, id, embedding, document, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(collection, id) DO UPDATE SET
                embedding = excluded.embedding,
                document = excluded.document,
                metadata = excluded.metadata",
            params![
                collection,
                record.id,
                embedding_to_blob(&record.embedding),
                record.document,
                metadata
            ],
        )
        .map_err(|e| AssistantError::Persistence(format!("upsert: {e}")))?;
        Ok(())
    }

    fn query(&self, collection: &str, embedding: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn
            .prepare("SELECT id, embedding, document, metadata FROM vectors WHERE collection = ?1")
            .map_err(|e| AssistantError::Persistence(format!("prepare query: {e}")))?;
        let rows = stmt
            .query_map(params![collection], |row| {
                let id: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                let document: String = row.get(2)?;
                let metadata: String = row.get(3)?;
                Ok((id, blob, document, metadata))
            })
            .map_err(|e| AssistantError::Persistence(format!("query: {e}")))?;

        let mut hits = Vec::new();
        for row in rows {
            let (id, blob, document, metadata) =
                row.map_err(|e| AssistantError::Persistence(format!("row: {e}")))?;
            let stored = blob_to_embedding(&blob);
            let score = cosine_similarity(embedding, &stored);
            hits.push(VectorHit {
                record: VectorRecord {
                    id,
                    embedding: stored,
                    document,
                    metadata: serde_json::from_str(&metadata)
                        .unwrap_or(serde_json::Value::Null),
                },
                score,
            });
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    fn count(&self, collection: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM vectors WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )
            .map_err(|e| AssistantError::Persistence(format!("count: {e}")))?;
        Ok(count as usize)
    }
}
