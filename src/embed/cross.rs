use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;

use crate::index::bm25::tokenize;

/// Environment switch: enables the cross-encoder rerank signal.
pub const CROSS_ENCODER_ENABLED_ENV: &str = "CROSS_ENCODER_ENABLED";
/// Environment switch: explicit cross-encoder model id (implies enabled).
pub const CROSS_ENCODER_MODEL_ENV: &str = "CROSS_ENCODER_MODEL";

/// Pairwise relevance scorer reading query and document jointly.
///
/// Scores are best-effort: callers treat a failure as a 0 for that
/// candidate and never propagate it.
pub trait CrossEncoder: Send + Sync {
    /// Relevance of `text` to `query`, in [0, 1].
    fn score(&self, query: &str, text: &str) -> Result<f32>;
}

/// Token-overlap scorer used when no learned model is configured: the
/// Jaccard overlap of the query and document token sets, with a containment
/// bonus so short queries fully covered by a document are not penalised for
/// the document's length.
#[derive(Debug, Default)]
pub struct TokenOverlapCrossEncoder;

impl CrossEncoder for TokenOverlapCrossEncoder {
    fn score(&self, query: &str, text: &str) -> Result<f32> {
        let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
        let text_tokens: HashSet<String> = tokenize(text).into_iter().collect();
        if query_tokens.is_empty() || text_tokens.is_empty() {
            return Ok(0.0);
        }
        let overlap = query_tokens.intersection(&text_tokens).count() as f32;
        let union = query_tokens.union(&text_tokens).count() as f32;
        let jaccard = overlap / union;
        let containment = overlap / query_tokens.len() as f32;
        Ok(((jaccard + containment) / 2.0).clamp(0.0, 1.0))
    }
}

/// Load a cross-encoder when requested, either explicitly (`enabled`) or via
/// the environment switches. Returns `None` when disabled; a load failure
/// would also return `None` rather than propagate.
pub fn build_cross_encoder(enabled: bool) -> Option<Arc<dyn CrossEncoder>> {
    let env_enabled = std::env::var(CROSS_ENCODER_ENABLED_ENV)
        .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
        || std::env::var(CROSS_ENCODER_MODEL_ENV).is_ok_and(|v| !v.is_empty());

    if enabled || env_enabled {
        Some(Arc::new(TokenOverlapCrossEncoder))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_is_bounded() {
        let encoder = TokenOverlapCrossEncoder;
        let score = encoder
            .score("authenticate user", "function authenticateUser(user) {}")
            .unwrap();
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_full_containment_beats_partial() {
        let encoder = TokenOverlapCrossEncoder;
        let full = encoder
            .score("login token", "login token session handler")
            .unwrap();
        let partial = encoder
            .score("login token", "render layout login view")
            .unwrap();
        assert!(full > partial);
    }

    #[test]
    fn test_empty_inputs_score_zero() {
        let encoder = TokenOverlapCrossEncoder;
        assert_eq!(encoder.score("", "some text").unwrap(), 0.0);
        assert_eq!(encoder.score("query", "").unwrap(), 0.0);
    }

    #[test]
    fn test_build_respects_explicit_enable() {
        assert!(build_cross_encoder(true).is_some());
    }
}
