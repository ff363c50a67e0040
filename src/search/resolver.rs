//! Embedding resolution for query text.

use std::sync::Arc;

use anyhow::{ensure, Result};

use super::cancel::{run_blocking, CancelSignal};
use crate::embedding::EmbeddingProvider;
use crate::error::{SearchError, Stage};

/// Turn query text into exactly one vector of the provider's dimensionality.
///
/// The provider runs on the blocking pool and races `cancel`; a cancelled
/// call has its request aborted.
pub async fn resolve(
    provider: &Arc<dyn EmbeddingProvider>,
    text: &str,
    cancel: &CancelSignal,
) -> Result<Vec<f32>, SearchError> {
    let call_provider = Arc::clone(provider);
    let text = text.to_string();
    let vectors = run_blocking(Stage::Embedding, cancel, move |abort| {
        call_provider.embed_batch_abortable(&[text.as_str()], abort)
    })
    .await?;

    single_vector(vectors, provider.dimensions()).map_err(SearchError::embedding)
}

fn single_vector(mut vectors: Vec<Vec<f32>>, dimensions: usize) -> Result<Vec<f32>> {
    ensure!(
        vectors.len() == 1,
        "provider returned {} vectors for one input",
        vectors.len()
    );
    let vector = vectors.swap_remove(0);
    ensure!(!vector.is_empty(), "provider returned an empty vector");
    ensure!(
        vector.len() == dimensions,
        "provider returned {} dimensions, configured for {dimensions}",
        vector.len()
    );
    ensure!(
        vector.iter().all(|x| x.is_finite()),
        "provider returned a non-finite vector"
    );
    Ok(vector)
}
