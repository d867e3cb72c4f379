//! Brute-force cosine ranking over an [`Index`].

use codeseek_core::CodeseekError;

use crate::store::{Index, IndexEntry};

/// An entry and its similarity to the query.
#[derive(Debug, Clone, Copy)]
pub struct QueryResult<'a> {
    pub entry: &'a IndexEntry,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

/// Cosine similarity between two vectors of equal length.
///
/// Accumulates in `f64` and clamps into `[-1, 1]`. A zero-magnitude input
/// or a non-finite result scores `-1.0`, which sorts it last.
///
/// # Examples
///
/// ```
/// use codeseek_index::rank::cosine_similarity;
///
/// assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
/// assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
/// assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), -1.0);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine(a, b).unwrap_or(-1.0)
}

/// Cosine similarity, or `None` when either side has zero magnitude or the
/// result is not finite.
fn cosine(a: &[f32], b: &[f32]) -> Option<f32> {
    debug_assert_eq!(a.len(), b.len());

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return None;
    }
    let score = dot / denom;
    score.is_finite().then(|| score.clamp(-1.0, 1.0) as f32)
}

/// Score every entry against `query` and return the best `top_k`.
///
/// Results are ordered by descending score; equal scores keep index order.
/// Entries whose similarity is undefined (zero vectors) score `-1.0` and
/// come after every entry with a real score, even one that also scored
/// `-1.0`.
///
/// # Errors
///
/// Returns [`CodeseekError::DimensionMismatch`] if `query` does not have
/// the index's vector length.
pub fn rank<'a>(
    query: &[f32],
    index: &'a Index,
    top_k: usize,
) -> Result<Vec<QueryResult<'a>>, CodeseekError> {
    if query.len() != index.vector_dim() {
        return Err(CodeseekError::DimensionMismatch {
            expected: index.vector_dim(),
            actual: query.len(),
        });
    }
    if top_k == 0 {
        return Ok(Vec::new());
    }

    let mut scored: Vec<(bool, QueryResult<'a>)> = index
        .entries()
        .iter()
        .map(|entry| {
            let score = cosine(query, &entry.vector);
            (
                score.is_none(),
                QueryResult {
                    entry,
                    score: score.unwrap_or(-1.0),
                },
            )
        })
        .collect();

    // sort_by is stable, so ties stay in insertion order
    scored.sort_by(|(a_degenerate, a), (b_degenerate, b)| {
        a_degenerate
            .cmp(b_degenerate)
            .then_with(|| b.score.total_cmp(&a.score))
    });
    Ok(scored
        .into_iter()
        .take(top_k)
        .map(|(_, result)| result)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IndexMetadata;
    use chrono::Utc;
    use codeseek_core::{CodeUnit, UnitKind};

    fn index(vectors: &[&[f32]]) -> Index {
        let dim = vectors.first().map_or(2, |v| v.len());
        let entries = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| IndexEntry {
                unit: CodeUnit::new(
                    "f.c",
                    i as u32 + 1,
                    i as u32 + 1,
                    format!("int f{i};"),
                    UnitKind::Block,
                    format!("f{i}"),
                ),
                vector: v.to_vec(),
            })
            .collect();
        Index::from_parts(
            IndexMetadata {
                source_root: ".".into(),
                provider_model_id: "fake".into(),
                vector_dim: dim,
                created_at: Utc::now(),
            },
            entries,
        )
        .unwrap()
    }

    #[test]
    fn best_match_comes_first() {
        let idx = index(&[&[0.0, 1.0], &[1.0, 0.0], &[0.7, 0.7]]);
        let results = rank(&[1.0, 0.1], &idx, 3).unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.entry.unit.name.as_str()).collect();
        assert_eq!(names, vec!["f1", "f2", "f0"]);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn top_k_limits_and_zero_returns_nothing() {
        let idx = index(&[&[1.0, 0.0], &[0.0, 1.0], &[1.0, 1.0]]);
        assert_eq!(rank(&[1.0, 0.0], &idx, 2).unwrap().len(), 2);
        assert_eq!(rank(&[1.0, 0.0], &idx, 10).unwrap().len(), 3);
        assert!(rank(&[1.0, 0.0], &idx, 0).unwrap().is_empty());
    }

    #[test]
    fn ties_keep_insertion_order() {
        let idx = index(&[&[1.0, 0.0], &[2.0, 0.0], &[3.0, 0.0]]);
        let results = rank(&[1.0, 0.0], &idx, 3).unwrap();
        let lines: Vec<u32> = results.iter().map(|r| r.entry.unit.start_line).collect();
        assert_eq!(lines, vec![1, 2, 3]);
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let idx = index(&[&[1.0, 0.0]]);
        let err = rank(&[1.0, 0.0, 0.0], &idx, 1).unwrap_err();
        assert!(matches!(
            err,
            CodeseekError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn zero_vectors_score_lowest() {
        let idx = index(&[&[0.0, 0.0], &[-1.0, 0.0]]);
        let results = rank(&[1.0, 0.0], &idx, 2).unwrap();
        assert!(results.iter().all(|r| r.score == -1.0));
        // The opposite vector has a real score, so it beats the zero vector
        assert_eq!(results[0].entry.unit.start_line, 2);
        assert_eq!(results[1].entry.unit.start_line, 1);
        assert_eq!(rank(&[1.0, 0.0], &idx, 1).unwrap()[0].entry.unit.start_line, 2);
        assert_eq!(rank(&[0.0, 0.0], &idx, 1).unwrap()[0].score, -1.0);
    }

    #[test]
    fn zero_query_keeps_index_order() {
        let idx = index(&[&[0.0, 1.0], &[1.0, 0.0]]);
        let lines: Vec<u32> = rank(&[0.0, 0.0], &idx, 2)
            .unwrap()
            .iter()
            .map(|r| r.entry.unit.start_line)
            .collect();
        assert_eq!(lines, vec![1, 2]);
    }

    #[test]
    fn exact_match_scores_one_and_ranks_first() {
        let stored: [&[f32]; 4] = [&[0.3, -0.2, 0.9], &[0.1, 0.8, 0.2], &[0.0, 0.0, 0.0], &[-0.5, 0.5, 0.5]];
        let idx = index(&stored);
        for (i, vector) in stored.iter().enumerate() {
            if vector.iter().all(|x| *x == 0.0) {
                continue;
            }
            let results = rank(vector, &idx, 1).unwrap();
            assert_eq!(results[0].entry.unit.name, format!("f{i}"));
            assert!((results[0].score - 1.0).abs() < 1e-6, "score {}", results[0].score);
        }
    }

    #[test]
    fn scores_stay_in_range() {
        let big = f32::MAX / 2.0;
        let idx = index(&[&[big, big], &[1e-30, 1e-30]]);
        for r in rank(&[big, big], &idx, 2).unwrap() {
            assert!((-1.0..=1.0).contains(&r.score));
        }
    }
}
