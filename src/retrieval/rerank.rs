use crate::embed::cross::CrossEncoder;
use crate::graph::CodeGraph;
use crate::graph::node::Node;

use super::fusion::FusedHit;

/// Signal weights for the hybrid reranker. Without a cross-encoder the
/// first three apply; with one, all four are renormalised to sum to 1.
#[derive(Debug, Clone, Copy)]
pub struct RerankWeights {
    pub semantic: f32,
    pub lexical: f32,
    pub structural: f32,
    pub cross: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        RerankWeights {
            semantic: 0.5,
            lexical: 0.3,
            structural: 0.2,
            cross: 0.2,
        }
    }
}

/// A node-level hit after the weighted blend.
#[derive(Debug, Clone)]
pub struct RerankedHit {
    pub id: String,
    /// Blended score over normalised signals, in [0, 1].
    pub score: f32,
    pub semantic_raw: f32,
    pub lexical_raw: f32,
    pub structural_raw: f32,
    pub cross_raw: Option<f32>,
}

/// Structural prior of a node: an exported bit blended with a locality
/// factor that prefers tight spans over sprawling ones.
pub fn structural_signal(node: &Node) -> f32 {
    let exported = if node.meta.exported { 1.0 } else { 0.0 };
    let locality = 1.0 / ((node.line_span() as f32 + 1.0).ln());
    exported * 0.7 + locality * 0.3
}

/// Blend four normalised signals per candidate: semantic (ANN raw),
/// lexical (BM25 raw), structural, and — when a cross-encoder is present —
/// its pairwise score. Signals are min-max normalised over the candidate
/// set so the blend stays meaningful at small candidate counts; a constant
/// signal normalises to all ones. Cross-encoder calls are best-effort: a
/// failure contributes 0 for that candidate.
pub fn rerank(
    hits: &[FusedHit],
    graph: &CodeGraph,
    query: &str,
    cross_encoder: Option<&dyn CrossEncoder>,
    weights: &RerankWeights,
) -> Vec<RerankedHit> {
    if hits.is_empty() {
        return Vec::new();
    }

    let semantic_raw: Vec<f32> = hits.iter().map(|h| h.semantic.unwrap_or(0.0)).collect();
    let lexical_raw: Vec<f32> = hits.iter().map(|h| h.lexical.unwrap_or(0.0)).collect();
    let structural_raw: Vec<f32> = hits
        .iter()
        .map(|h| graph.get_node(&h.id).map(structural_signal).unwrap_or(0.0))
        .collect();
    let cross_raw: Option<Vec<f32>> = cross_encoder.map(|encoder| {
        hits.iter()
            .map(|h| {
                graph
                    .get_node(&h.id)
                    .and_then(|node| encoder.score(query, &rerank_text(node)).ok())
                    .unwrap_or(0.0)
            })
            .collect()
    });

    let semantic = min_max(&semantic_raw);
    let lexical = min_max(&lexical_raw);
    let structural = min_max(&structural_raw);
    let cross = cross_raw.as_deref().map(min_max);

    let (w_sem, w_lex, w_str, w_cross) = match cross {
        Some(_) => {
            let total = weights.semantic + weights.lexical + weights.structural + weights.cross;
            (
                weights.semantic / total,
                weights.lexical / total,
                weights.structural / total,
                weights.cross / total,
            )
        }
        None => (weights.semantic, weights.lexical, weights.structural, 0.0),
    };

    let mut reranked: Vec<RerankedHit> = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            let mut score =
                semantic[i] * w_sem + lexical[i] * w_lex + structural[i] * w_str;
            if let Some(cross) = &cross {
                score += cross[i] * w_cross;
            }
            RerankedHit {
                id: hit.id.clone(),
                score,
                semantic_raw: semantic_raw[i],
                lexical_raw: lexical_raw[i],
                structural_raw: structural_raw[i],
                cross_raw: cross_raw.as_ref().map(|c| c[i]),
            }
        })
        .collect();

    reranked.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    reranked
}

/// Text the cross-encoder reads for a node.
fn rerank_text(node: &Node) -> String {
    node.meta
        .embedding_text
        .clone()
        .unwrap_or_else(|| format!("{}\n{}", node.name, node.content))
}

/// Min-max normalisation over the candidate set; a constant vector comes
/// back as all ones.
fn min_max(values: &[f32]) -> Vec<f32> {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !min.is_finite() || !max.is_finite() || (max - min).abs() < f32::EPSILON {
        return vec![1.0; values.len()];
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}
