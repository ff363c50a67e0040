//! Maximal Marginal Relevance reranking.
//!
//! Greedy selection: each round picks the unselected candidate maximising
//! `lambda * relevance - (1 - lambda) * redundancy`, where relevance is the
//! inner product with the query vector and redundancy is the largest inner
//! product with any already-selected candidate. Selection order is the final
//! rank order.

use super::SearchResult;
use crate::error::RerankError;

#[derive(Clone, Copy)]
struct Pick {
    index: usize,
    score: f32,
}

impl Pick {
    /// Higher score wins; equal scores go to the earlier retrieval position.
    fn better_than(self, other: &Self) -> bool {
        self.score > other.score || (self.score == other.score && self.index < other.index)
    }
}

pub fn inner_product(lhs: &[f32], rhs: &[f32]) -> f32 {
    lhs.iter().zip(rhs).map(|(l, r)| l * r).sum()
}

/// Select up to `k` candidate indices in MMR order.
///
/// Fails when there are no candidates while `k > 0`, or when a candidate's
/// dimensionality differs from the query's.
pub fn maximal_marginal_relevance(
    query: &[f32],
    embeddings: &[&[f32]],
    lambda: f32,
    k: usize,
) -> Result<Vec<usize>, RerankError> {
    if k == 0 {
        return Ok(Vec::new());
    }
    if embeddings.is_empty() {
        return Err(RerankError::EmptyCandidates { k });
    }
    if let Some((index, e)) = embeddings
        .iter()
        .enumerate()
        .find(|(_, e)| e.len() != query.len())
    {
        return Err(RerankError::DimensionMismatch {
            index,
            expected: query.len(),
            actual: e.len(),
        });
    }

    let relevance: Vec<f32> = embeddings.iter().map(|e| inner_product(query, e)).collect();
    // Max similarity to the selected set; None while nothing is selected.
    let mut redundancy: Vec<Option<f32>> = vec![None; embeddings.len()];
    let mut taken = vec![false; embeddings.len()];
    let target = k.min(embeddings.len());
    let mut selected = Vec::with_capacity(target);

    while selected.len() < target {
        let mut best: Option<Pick> = None;
        for index in (0..embeddings.len()).filter(|&i| !taken[i]) {
            let penalty = redundancy[index].unwrap_or(0.0);
            let score = lambda * relevance[index] - (1.0 - lambda) * penalty;
            let pick = Pick {
                index,
                score: if score.is_nan() { f32::NEG_INFINITY } else { score },
            };
            if best.map_or(true, |b| pick.better_than(&b)) {
                best = Some(pick);
            }
        }
        let Some(pick) = best else { break };

        taken[pick.index] = true;
        selected.push(pick.index);

        let chosen = embeddings[pick.index];
        for index in (0..embeddings.len()).filter(|&i| !taken[i]) {
            let similarity = inner_product(embeddings[index], chosen);
            redundancy[index] = Some(redundancy[index].map_or(similarity, |r| r.max(similarity)));
        }
    }

    Ok(selected)
}

/// Rerank search results with MMR, returning at most `k` in selection order.
///
/// Every candidate must carry its embedding.
pub fn rerank(
    query: &[f32],
    candidates: Vec<SearchResult>,
    lambda: f32,
    k: usize,
) -> Result<Vec<SearchResult>, RerankError> {
    let embeddings = candidates
        .iter()
        .enumerate()
        .map(|(index, c)| {
            c.embedding
                .as_deref()
                .ok_or(RerankError::MissingEmbedding { index })
        })
        .collect::<Result<Vec<&[f32]>, _>>()?;

    let order = maximal_marginal_relevance(query, &embeddings, lambda, k)?;

    let mut slots: Vec<Option<SearchResult>> = candidates.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}
