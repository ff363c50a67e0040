//! Query assembly: the storage-neutral description of one search round-trip.
//!
//! [`assemble`] combines the session scope, the soft-delete guard, the compiled
//! metadata predicate, the optional vector-distance projection and the
//! sort/limit policy into a [`MessageQuery`]. A [`QueryEngine`] executes it.

use anyhow::Result;

use super::cancel::Abort;
use super::filter::Predicate;
use super::{MessageRecord, SearchQuery, SearchType};

/// Result ordering requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Most similar first. Requires a distance projection.
    DistanceDesc,
    /// Most recent first.
    CreatedAtDesc,
}

/// A retrievable query over stored messages.
///
/// The engine always selects the message identity, timestamp, role, content,
/// metadata and token count. `query_vector` adds the similarity projection
/// `stored · query` (the negated `vec_negative_inner_product`), larger
/// meaning more similar; `include_embedding` adds the raw stored vector.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageQuery {
    /// Conjoined conditions.
    pub predicates: Vec<Predicate>,
    pub query_vector: Option<Vec<f32>>,
    pub include_embedding: bool,
    pub order: SortOrder,
    pub limit: usize,
}

/// A row returned by a [`QueryEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub message: MessageRecord,
    /// `None` when no distance was projected, or the message has no embedding.
    pub distance: Option<f64>,
    pub embedding: Option<Vec<f32>>,
}

/// The storage collaborator that executes assembled queries.
///
/// Implementations are synchronous; async callers run them on the blocking pool.
/// `abort` belongs to this one call: once raised, the engine should give up
/// on `query` as soon as it can, and must not touch work owned by other calls.
pub trait QueryEngine: Send + Sync {
    fn execute(&self, query: &MessageQuery, abort: &Abort) -> Result<Vec<MessageRow>>;
}

/// Build the query for one search.
///
/// MMR queries over-fetch `limit * pool_multiplier` candidates for the reranker.
pub fn assemble(
    session_id: &str,
    query: &SearchQuery,
    filter: Option<Predicate>,
    query_vector: Option<Vec<f32>>,
    pool_multiplier: usize,
) -> MessageQuery {
    let mut predicates = vec![
        Predicate::SessionIs(session_id.to_string()),
        Predicate::NotDeleted,
    ];
    predicates.extend(filter);

    let order = if query_vector.is_some() {
        SortOrder::DistanceDesc
    } else {
        SortOrder::CreatedAtDesc
    };

    let limit = match query.search_type() {
        SearchType::Mmr => query.limit().saturating_mul(pool_multiplier.max(1)),
        SearchType::Similarity => query.limit(),
    };

    MessageQuery {
        predicates,
        query_vector,
        include_embedding: query.search_type() == SearchType::Mmr,
        order,
        limit,
    }
}
