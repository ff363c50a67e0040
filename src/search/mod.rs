//! Semantic memory search.
//!
//! A search runs in five steps:
//! 1. The metadata filter payload is parsed and compiled ([`filter`]).
//! 2. Free text is turned into a query vector ([`resolver`]).
//! 3. Both are combined into one storage query ([`query::assemble`]).
//! 4. The query is executed and rows without a score are dropped ([`validate`]).
//! 5. MMR searches rerank the candidate pool for diversity ([`mmr`]).
//!
//! [`MemorySearch`] wires the steps to an [`EmbeddingProvider`] and a
//! [`QueryEngine`].

pub mod cancel;
pub mod filter;
pub mod jsonpath;
pub mod mmr;
pub mod query;
pub mod resolver;
pub mod validate;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::SearchConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::SearchError;

pub use cancel::{cancel_pair, cancel_when, Abort, CancelHandle, CancelSignal};
pub use filter::{DateBounds, FilterNode, MetadataFilter, Predicate};
pub use jsonpath::JsonPath;
pub use query::{MessageQuery, MessageRow, QueryEngine, SortOrder};

// ── Query types ───────────────────────────────────────────────────────────────

/// Ranking strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    /// Rank by similarity to the query text.
    #[default]
    Similarity,
    /// Rerank an over-fetched pool with Maximal Marginal Relevance.
    Mmr,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Similarity => "similarity",
            Self::Mmr => "mmr",
        }
    }
}

impl std::str::FromStr for SearchType {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "similarity" => Ok(Self::Similarity),
            "mmr" => Ok(Self::Mmr),
            other => Err(SearchError::invalid(format!(
                "unknown search type `{other}`, expected `similarity` or `mmr`"
            ))),
        }
    }
}

impl std::fmt::Display for SearchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A search request as it arrives over the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// A metadata filter object: `where`, `start_date`, `end_date`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, rename = "type")]
    pub search_type: SearchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mmr_lambda: Option<f32>,
}

/// A validated, immutable search request with defaults resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    text: Option<String>,
    metadata: MetadataFilter,
    search_type: SearchType,
    mmr_lambda: f32,
    limit: usize,
}

impl SearchQuery {
    /// Validate a payload and resolve its defaults.
    ///
    /// - `limit == 0` becomes `config.default_limit`.
    /// - An MMR lambda of 0 (or none) becomes `config.mmr_lambda`.
    /// - Blank text counts as no text.
    ///
    /// Fails with [`SearchError::InvalidQuery`] when neither text nor a
    /// metadata constraint is given, when an MMR search has no text, or when
    /// the lambda lies outside `[0, 1]`.
    pub fn from_payload(
        payload: &SearchPayload,
        limit: usize,
        config: &SearchConfig,
    ) -> Result<Self, SearchError> {
        let text = payload
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let metadata = match &payload.metadata {
            Some(value) => MetadataFilter::parse(value)?,
            None => MetadataFilter::default(),
        };

        if text.is_none() && metadata.is_empty() {
            return Err(SearchError::invalid(
                "search needs query text or a metadata filter",
            ));
        }

        let requested_lambda = payload.mmr_lambda.unwrap_or(0.0);
        if !(0.0..=1.0).contains(&requested_lambda) {
            return Err(SearchError::invalid(format!(
                "mmr_lambda must be in [0, 1], got {requested_lambda}"
            )));
        }

        let search_type = payload.search_type;
        let mmr_lambda = match search_type {
            SearchType::Mmr if text.is_none() => {
                return Err(SearchError::invalid("mmr search requires query text"));
            }
            SearchType::Mmr if requested_lambda == 0.0 => config.mmr_lambda,
            _ => requested_lambda,
        };

        Ok(Self {
            text,
            metadata,
            search_type,
            mmr_lambda,
            limit: if limit == 0 { config.default_limit } else { limit },
        })
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn metadata(&self) -> &MetadataFilter {
        &self.metadata
    }

    pub fn search_type(&self) -> SearchType {
        self.search_type
    }

    pub fn mmr_lambda(&self) -> f32 {
        self.mmr_lambda
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

// ── Result types ──────────────────────────────────────────────────────────────

/// A stored message as seen by search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub uuid: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub token_count: i64,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub message: MessageRecord,
    /// Inner product of the stored embedding with the query vector; larger is
    /// more similar. `None` when the search had no text or the message has
    /// no embedding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Stored embedding, present for MMR searches only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl From<MessageRow> for SearchResult {
    fn from(row: MessageRow) -> Self {
        Self {
            message: row.message,
            distance: row.distance.filter(|d| !d.is_nan()),
            embedding: row.embedding,
        }
    }
}

// ── Orchestration ─────────────────────────────────────────────────────────────

/// Search over stored messages, backed by an embedding provider and a query engine.
///
/// Holds no per-request state; one instance serves concurrent searches.
#[derive(Clone)]
pub struct MemorySearch {
    embedder: Arc<dyn EmbeddingProvider>,
    engine: Arc<dyn QueryEngine>,
    config: SearchConfig,
}

impl MemorySearch {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        engine: Arc<dyn QueryEngine>,
        config: SearchConfig,
    ) -> Self {
        Self {
            embedder,
            engine,
            config,
        }
    }

    /// Search the messages of one session.
    ///
    /// Any failing stage aborts the search; no partial results are returned.
    pub async fn search(
        &self,
        session_id: &str,
        payload: &SearchPayload,
        limit: usize,
        cancel: &CancelSignal,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let query = SearchQuery::from_payload(payload, limit, &self.config)?;
        self.run(session_id, &query, cancel).await
    }

    /// Execute an already-validated query.
    pub async fn run(
        &self,
        session_id: &str,
        query: &SearchQuery,
        cancel: &CancelSignal,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let filter = query.metadata().compile();
        let has_metadata_filter = !query.metadata().is_empty();

        let query_vector = match query.text() {
            Some(text) => Some(resolver::resolve(&self.embedder, text, cancel).await?),
            None => None,
        };

        let assembled = query::assemble(
            session_id,
            query,
            filter,
            query_vector.clone(),
            self.config.mmr_pool_multiplier,
        );
        debug!(
            session_id,
            search_type = %query.search_type(),
            pool = assembled.limit,
            has_text = query_vector.is_some(),
            has_metadata_filter,
            "executing search"
        );

        let results = validate::execute(&self.engine, assembled, has_metadata_filter, cancel).await?;

        let (SearchType::Mmr, Some(query_vector)) = (query.search_type(), query_vector) else {
            return Ok(results);
        };

        let pool = results.len();
        let candidates: Vec<SearchResult> = results
            .into_iter()
            .filter(|r| r.embedding.is_some())
            .collect();
        if candidates.is_empty() {
            debug!(session_id, pool, "no embedded candidates to rerank");
            return Ok(Vec::new());
        }

        let reranked = mmr::rerank(&query_vector, candidates, query.mmr_lambda(), query.limit())?;
        debug!(
            session_id,
            pool,
            returned = reranked.len(),
            lambda = query.mmr_lambda(),
            "mmr rerank complete"
        );
        Ok(reranked)
    }
}
