//! Typed error taxonomy for the search core.
//!
//! Each [`SearchError`] variant names the stage that produced it. Collaborator
//! failures (embedding provider, storage engine) are carried as the `source`.

use thiserror::Error;

/// The pipeline stage an error or cancellation originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Embedding,
    Storage,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Embedding => f.write_str("embedding"),
            Self::Storage => f.write_str("storage"),
        }
    }
}

/// Errors surfaced by [`crate::search::MemorySearch::search`].
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("malformed metadata filter: {0}")]
    MalformedFilter(#[from] FilterError),

    #[error("embedding provider failed: {source}")]
    EmbeddingProvider {
        #[source]
        source: anyhow::Error,
    },

    #[error("storage execution failed: {source}")]
    StorageExecution {
        #[source]
        source: anyhow::Error,
    },

    #[error("mmr rerank failed: {0}")]
    Rerank(#[from] RerankError),

    #[error("search cancelled during {stage} stage")]
    Cancelled { stage: Stage },
}

impl SearchError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    pub fn embedding(source: impl Into<anyhow::Error>) -> Self {
        Self::EmbeddingProvider {
            source: source.into(),
        }
    }

    pub fn storage(source: impl Into<anyhow::Error>) -> Self {
        Self::StorageExecution {
            source: source.into(),
        }
    }

    /// Wrap a collaborator failure as the error of `stage`.
    pub fn at(stage: Stage, source: anyhow::Error) -> Self {
        match stage {
            Stage::Embedding => Self::embedding(source),
            Stage::Storage => Self::storage(source),
        }
    }
}

/// Reasons a filter payload fails to parse into the typed filter tree.
#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("metadata filter must be a JSON object")]
    NotAnObject,

    #[error("unknown metadata filter key `{0}`")]
    UnknownKey(String),

    #[error("invalid filter node: {0}")]
    InvalidNode(String),

    #[error("filter node has no jsonpath and no and/or children")]
    EmptyNode,

    #[error("invalid jsonpath `{path}` at offset {offset}: {reason}")]
    JsonPath {
        path: String,
        offset: usize,
        reason: String,
    },

    #[error("invalid {key}: {reason}")]
    InvalidDate { key: &'static str, reason: String },
}

/// Failures of the MMR reranker.
#[derive(Debug, Error, PartialEq)]
pub enum RerankError {
    #[error("no candidates to rerank (k = {k})")]
    EmptyCandidates { k: usize },

    #[error("candidate {index} has no embedding")]
    MissingEmbedding { index: usize },

    #[error("candidate {index} embedding has {actual} dimensions, query has {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
}
