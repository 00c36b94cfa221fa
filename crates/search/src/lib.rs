//! kuberef search: approximate ranking of candidate names against a query.
//!
//! Scores are Sørensen–Dice coefficients over character bigrams, in `[0, 1]`:
//! identical strings score 1, strings sharing no bigram score 0.

#![forbid(unsafe_code)]

use serde::Serialize;
use tracing::trace;

/// Acceptance thresholds per reference kind. A suggestion is offered only when
/// its score is strictly above the threshold.
pub mod thresholds {
    /// Whole resource names (Services, Secrets, ConfigMaps).
    pub const NAME: f64 = 0.8;
    /// Secret / ConfigMap data keys.
    pub const KEY: f64 = 0.5;
    /// Symbolic Service port names.
    pub const NAMED_PORT: f64 = 0.5;
    /// Numeric ports are short strings and share few bigrams.
    pub const NUMERIC_PORT: f64 = 0.2;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranked {
    pub candidate: String,
    /// Position of the candidate in the input slice.
    pub index: usize,
    pub score: f64,
}

pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::sorensen_dice(a, b)
}

/// Rank all candidates by similarity to `query`, best first. Ties keep input
/// order so results are deterministic.
pub fn rank<S: AsRef<str>>(candidates: &[S], query: &str) -> Vec<Ranked> {
    let mut out: Vec<Ranked> = candidates
        .iter()
        .enumerate()
        .map(|(index, c)| Ranked { candidate: c.as_ref().to_string(), index, score: similarity(c.as_ref(), query) })
        .collect();
    out.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.index.cmp(&b.index)));
    out
}

/// Candidates scoring strictly above `threshold`, best first.
pub fn best_above<S: AsRef<str>>(candidates: &[S], query: &str, threshold: f64) -> Vec<Ranked> {
    let ranked = rank(candidates, query);
    let total = ranked.len();
    let kept: Vec<Ranked> = ranked.into_iter().filter(|r| r.score > threshold).collect();
    trace!(query, total, kept = kept.len(), threshold, "ranked suggestions");
    kept
}
