//! Query execution and result validation.

use std::sync::Arc;

use tracing::debug;

use super::cancel::{run_blocking, CancelSignal};
use super::query::{MessageQuery, QueryEngine};
use super::SearchResult;
use crate::error::{SearchError, Stage};

/// Execute `query` and keep the rows that carry a similarity score.
///
/// Unscored rows survive only when the search had a metadata filter. On
/// cancellation this call's statement is aborted and nothing is returned.
pub async fn execute(
    engine: &Arc<dyn QueryEngine>,
    query: MessageQuery,
    has_metadata_filter: bool,
    cancel: &CancelSignal,
) -> Result<Vec<SearchResult>, SearchError> {
    let call_engine = Arc::clone(engine);
    let rows = run_blocking(Stage::Storage, cancel, move |abort| {
        call_engine.execute(&query, abort)
    })
    .await?;

    let fetched = rows.len();
    let results = retain_scored(
        rows.into_iter().map(SearchResult::from).collect(),
        has_metadata_filter,
    );
    debug!(fetched, dropped = fetched - results.len(), "validated search rows");
    Ok(results)
}

/// Drop results without a distance unless the search had a metadata filter.
pub fn retain_scored(mut results: Vec<SearchResult>, has_metadata_filter: bool) -> Vec<SearchResult> {
    if !has_metadata_filter {
        results.retain(|r| r.distance.is_some());
    }
    results
}
