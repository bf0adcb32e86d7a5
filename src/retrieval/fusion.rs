use std::collections::HashMap;

/// RRF smoothing constant. Higher k flattens the influence of top ranks
/// from any single list.
pub const RRF_K: f32 = 60.0;

/// A node-level hit after fusing the semantic and lexical rankings.
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub id: String,
    /// Reciprocal-rank-fused score.
    pub score: f32,
    /// Raw ANN similarity, when the id appeared in the semantic list.
    pub semantic: Option<f32>,
    /// Raw BM25 score, when the id appeared in the lexical list.
    pub lexical: Option<f32>,
}

/// Reciprocal Rank Fusion over the (semantic, lexical) ranked lists: each
/// id at 0-based rank `r` in a list contributes `1 / (k + r + 1)`. Original
/// per-source scores ride along for telemetry.
pub fn reciprocal_rank_fusion(
    semantic: &[(String, f32)],
    lexical: &[(String, f32)],
    top_k: usize,
) -> Vec<FusedHit> {
    let mut fused: HashMap<String, FusedHit> = HashMap::new();

    for (rank, (id, raw)) in semantic.iter().enumerate() {
        let entry = fused.entry(id.clone()).or_insert_with(|| FusedHit {
            id: id.clone(),
            score: 0.0,
            semantic: None,
            lexical: None,
        });
        entry.score += 1.0 / (RRF_K + rank as f32 + 1.0);
        entry.semantic = Some(*raw);
    }
    for (rank, (id, raw)) in lexical.iter().enumerate() {
        let entry = fused.entry(id.clone()).or_insert_with(|| FusedHit {
            id: id.clone(),
            score: 0.0,
            semantic: None,
            lexical: None,
        });
        entry.score += 1.0 / (RRF_K + rank as f32 + 1.0);
        entry.lexical = Some(*raw);
    }

    let mut hits: Vec<FusedHit> = fused.into_values().collect();
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    hits.truncate(top_k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(ids: &[&str]) -> Vec<(String, f32)> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| (id.to_string(), 1.0 - i as f32 * 0.1))
            .collect()
    }

    #[test]
    fn test_agreement_on_rank_zero_wins() {
        let fused = reciprocal_rank_fusion(&list(&["x", "y"]), &list(&["x", "y"]), 10);
        assert_eq!(fused[0].id, "x");
        assert_eq!(fused[1].id, "y");
        assert!(fused[0].score > fused[1].score);
    }

    #[test]
    fn test_id_in_both_lists_beats_single_list() {
        let fused = reciprocal_rank_fusion(&list(&["both", "semantic_only"]), &list(&["both"]), 10);
        assert_eq!(fused[0].id, "both");
        let both = &fused[0];
        assert!(both.semantic.is_some() && both.lexical.is_some());
    }

    #[test]
    fn test_raw_scores_are_preserved() {
        let fused = reciprocal_rank_fusion(
            &[("a".into(), 0.87)],
            &[("a".into(), 3.2)],
            10,
        );
        assert_eq!(fused[0].semantic, Some(0.87));
        assert_eq!(fused[0].lexical, Some(3.2));
    }

    #[test]
    fn test_truncates_to_top_k() {
        let fused = reciprocal_rank_fusion(&list(&["a", "b", "c", "d"]), &[], 2);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn test_empty_lists_fuse_to_empty() {
        assert!(reciprocal_rank_fusion(&[], &[], 5).is_empty());
    }
}
