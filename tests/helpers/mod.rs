#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use mneme::config::SearchConfig;
use mneme::db::engine::SqliteEngine;
use mneme::db::messages::{insert_message, NewMessage};
use mneme::embedding::EmbeddingProvider;
use mneme::search::{Abort, MemorySearch, MessageQuery, MessageRow, QueryEngine};
use serde_json::Value;

/// Dimensionality used by test embeddings.
pub const DIM: usize = 16;

/// Open a fresh in-memory engine with schema and SQL functions in place.
pub fn test_engine() -> Arc<SqliteEngine> {
    Arc::new(SqliteEngine::open_in_memory().unwrap())
}

/// Deterministic unit vector with a spike at position `seed`.
pub fn spike(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[seed % DIM] = 1.0;
    v
}

/// L2-normalized weighted sum of spikes.
pub fn blend(parts: &[(usize, f32)]) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for &(dim, weight) in parts {
        v[dim % DIM] += weight;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / norm).collect()
}

pub fn ts(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
}

/// Builder for a stored test message.
pub struct Msg<'a> {
    pub session_id: &'a str,
    pub content: &'a str,
    pub metadata: Option<Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub embedding: Option<Vec<f32>>,
}

impl<'a> Msg<'a> {
    pub fn new(session_id: &'a str, content: &'a str) -> Self {
        Self {
            session_id,
            content,
            metadata: None,
            created_at: None,
            embedding: None,
        }
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Store the message. Returns its UUID.
    pub fn insert(self, engine: &SqliteEngine) -> String {
        let message = NewMessage {
            role: "user".into(),
            content: self.content.into(),
            metadata: self.metadata,
            token_count: self.content.split_whitespace().count() as i64,
            created_at: self.created_at,
        };
        let session_id = self.session_id;
        let embedding = self.embedding;
        engine
            .with_connection(|conn| insert_message(conn, session_id, &message, embedding.as_deref()))
            .unwrap()
    }
}

/// Embedding provider mapping known texts to fixed vectors; unknown texts
/// get `spike(0)`.
#[derive(Default)]
pub struct StaticEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl StaticEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for StaticEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| self.vectors.get(*t).cloned().unwrap_or_else(|| spike(0)))
            .collect())
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// Provider that sleeps before answering.
pub struct SlowEmbedder(pub Duration);

impl EmbeddingProvider for SlowEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        std::thread::sleep(self.0);
        Ok(texts.iter().map(|_| spike(0)).collect())
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// Engine wrapper that records every query it executes.
pub struct RecordingEngine {
    pub inner: Arc<SqliteEngine>,
    pub seen: Mutex<Vec<MessageQuery>>,
}

impl RecordingEngine {
    pub fn new(inner: Arc<SqliteEngine>) -> Self {
        Self {
            inner,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn last(&self) -> MessageQuery {
        self.seen.lock().unwrap().last().cloned().unwrap()
    }
}

impl QueryEngine for RecordingEngine {
    fn execute(&self, query: &MessageQuery, abort: &Abort) -> anyhow::Result<Vec<MessageRow>> {
        self.seen.lock().unwrap().push(query.clone());
        self.inner.execute(query, abort)
    }
}

/// Engine that blocks until its call is aborted, then fails like an
/// interrupted statement.
#[derive(Default)]
pub struct HangingEngine {
    pub interrupted: AtomicBool,
}

impl QueryEngine for HangingEngine {
    fn execute(&self, _query: &MessageQuery, abort: &Abort) -> anyhow::Result<Vec<MessageRow>> {
        while !abort.is_raised() {
            std::thread::sleep(Duration::from_millis(5));
        }
        self.interrupted.store(true, Ordering::SeqCst);
        anyhow::bail!("interrupted")
    }
}

pub fn search_service(
    engine: Arc<dyn QueryEngine>,
    embedder: impl EmbeddingProvider + 'static,
) -> MemorySearch {
    MemorySearch::new(Arc::new(embedder), engine, SearchConfig::default())
}

pub fn uuids(results: &[mneme::search::SearchResult]) -> Vec<String> {
    results.iter().map(|r| r.message.uuid.clone()).collect()
}
