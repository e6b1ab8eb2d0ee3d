//! Outlier rejection and quality-weighted aggregation of enrollment samples.

use crate::types::{Embedding, Sample};

/// Minimum number of embeddings for the consensus filter to run.
const MIN_CONSENSUS_SIZE: usize = 3;

/// Consensus filter over pairwise cosine similarity.
///
/// Returns the indices (in input order) of the embeddings whose mean
/// similarity to the others is at least `overall_mean - margin`. Fewer than
/// three embeddings are returned unchanged. A non-empty input never yields an
/// empty result: if nothing survives, only the first embedding is kept.
pub fn filter_outliers(embeddings: &[Embedding], margin: f32) -> Vec<usize> {
    let n = embeddings.len();
    if n < MIN_CONSENSUS_SIZE {
        return (0..n).collect();
    }

    let mean_similarities: Vec<f32> = (0..n)
        .map(|i| {
            let total: f32 = (0..n)
                .filter(|&j| j != i)
                .map(|j| embeddings[i].similarity(&embeddings[j]))
                .sum();
            total / (n - 1) as f32
        })
        .collect();

    let overall = mean_similarities.iter().sum::<f32>() / n as f32;
    let cutoff = overall - margin;

    let kept: Vec<usize> = mean_similarities
        .iter()
        .enumerate()
        .filter(|&(_, &sim)| sim >= cutoff)
        .map(|(i, _)| i)
        .collect();

    tracing::debug!(
        candidates = n,
        kept = kept.len(),
        overall_similarity = overall,
        cutoff,
        "consensus filter"
    );

    if kept.is_empty() {
        tracing::warn!(
            candidates = n,
            "consensus filter rejected every embedding; keeping the first"
        );
        vec![0]
    } else {
        kept
    }
}

/// Per-dimension weighted mean of embeddings.
///
/// Weights are normalized to sum to 1. If they sum to zero or less, every
/// embedding is weighted equally. Returns `None` for an empty input or
/// embeddings of differing dimension.
pub fn weighted_mean(weighted: &[(&Embedding, f32)]) -> Option<Embedding> {
    let (first, _) = weighted.first()?;
    let dim = first.dim();
    if weighted.iter().any(|(e, _)| e.dim() != dim) {
        tracing::warn!(dim, "cannot aggregate embeddings of differing dimension");
        return None;
    }

    let total: f32 = weighted.iter().map(|(_, w)| w).sum();
    let equal = 1.0 / weighted.len() as f32;

    let mut values = vec![0.0f32; dim];
    for (embedding, weight) in weighted {
        let w = if total > 0.0 { weight / total } else { equal };
        for (acc, v) in values.iter_mut().zip(&embedding.values) {
            *acc += w * v;
        }
    }

    Some(Embedding::new(values))
}

/// Final identity embedding and what went into it.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub embedding: Embedding,
    /// Samples passed to the consensus filter (top-K by quality).
    pub candidates: usize,
    /// Samples that survived the filter and were averaged.
    pub used: usize,
    /// Mean quality of the samples used.
    pub mean_quality: f32,
    /// Lowest cosine similarity between a used sample and the result.
    pub min_similarity: f32,
}

/// Rank samples by quality, keep the best `top_k`, drop outliers, and average
/// the rest weighted by their own quality scores.
///
/// Each embedding keeps its originating sample's index through filtering,
/// so identical embeddings from different samples keep their own weights.
pub fn aggregate(samples: &[Sample], top_k: usize, margin: f32) -> Option<Aggregate> {
    let mut ranked: Vec<&Sample> = samples.iter().collect();
    // Stable sort: equal qualities keep capture order.
    ranked.sort_by(|a, b| {
        b.quality
            .partial_cmp(&a.quality)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(top_k);
    if ranked.is_empty() {
        return None;
    }

    let candidates: Vec<Embedding> = ranked.iter().map(|s| s.embedding.clone()).collect();
    let kept = filter_outliers(&candidates, margin);

    let weighted: Vec<(&Embedding, f32)> = kept
        .iter()
        .map(|&i| (&ranked[i].embedding, ranked[i].quality))
        .collect();
    let embedding = weighted_mean(&weighted)?;

    let mean_quality = weighted.iter().map(|(_, q)| q).sum::<f32>() / weighted.len() as f32;
    let min_similarity = weighted
        .iter()
        .map(|(e, _)| e.similarity(&embedding))
        .fold(f32::INFINITY, f32::min);

    tracing::info!(
        candidates = ranked.len(),
        used = kept.len(),
        mean_quality,
        min_similarity,
        "aggregated identity embedding"
    );

    Some(Aggregate {
        embedding,
        candidates: ranked.len(),
        used: kept.len(),
        mean_quality,
        min_similarity,
    })
}
