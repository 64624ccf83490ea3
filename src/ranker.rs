use std::cmp::Ordering;

use rayon::prelude::*;

use crate::{
    encoder::Embedding,
    error::{Error, Result},
};

/// A candidate paired with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate<T> {
    pub item: T,
    pub score: f32,
}

/// Cosine similarity between two vectors of equal length.
///
/// Lies in `[-1, 1]`. A zero-magnitude vector on either side has no
/// direction, so its similarity is `f32::NEG_INFINITY` and it sorts after
/// every real score.
///
/// ```
/// use kbseek::ranker::cosine_similarity;
///
/// assert!((cosine_similarity(&[3.0, 4.0], &[4.0, 3.0]) - 0.96).abs() < 1e-6);
/// assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), f32::NEG_INFINITY);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 || !denominator.is_finite() {
        return f32::NEG_INFINITY;
    }

    let score = dot / denominator;
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}

/// Rank `candidates` by cosine similarity to `query` and keep the best
/// `top_n`.
///
/// Returns `min(top_n, candidates.len())` items, highest score first.
/// Candidates with equal scores keep their input order, so the output is a
/// pure function of the input.
pub fn rank<T: Send>(
    query: &[f32],
    candidates: Vec<(T, Embedding)>,
    top_n: usize,
) -> Result<Vec<ScoredCandidate<T>>> {
    if let Some((position, (_, embedding))) = candidates
        .iter()
        .enumerate()
        .find(|(_, (_, e))| e.len() != query.len())
    {
        return Err(Error::Encoding(format!(
            "embedding dimension mismatch: query has {}, candidate {position} has {}",
            query.len(),
            embedding.len()
        )));
    }

    let mut scored: Vec<(usize, ScoredCandidate<T>)> = candidates
        .into_par_iter()
        .enumerate()
        .map(|(position, (item, embedding))| {
            let score = cosine_similarity(query, &embedding);
            (position, ScoredCandidate { item, score })
        })
        .collect();

    let keep = top_n.min(scored.len());
    if keep == 0 {
        return Ok(Vec::new());
    }

    if keep < scored.len() {
        scored.select_nth_unstable_by(keep - 1, by_score_then_position);
        scored.truncate(keep);
    }
    scored.sort_unstable_by(by_score_then_position);

    Ok(scored.into_iter().map(|(_, candidate)| candidate).collect())
}

fn by_score_then_position<T>(
    a: &(usize, ScoredCandidate<T>),
    b: &(usize, ScoredCandidate<T>),
) -> Ordering {
    b.1.score.total_cmp(&a.1.score).then(a.0.cmp(&b.0))
}
