pub mod fusion;
pub mod rerank;
pub mod resolver;
pub mod retriever;

use std::collections::HashMap;

use serde::Serialize;

pub use resolver::{ResolveOptions, TargetResolver};
pub use retriever::{DependencyAwareRetriever, DependencyContext, RetrieverOptions};

/// Per-file aggregate of scoring signals. Ordering is strictly by total
/// score descending.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Candidate {
    pub path: String,
    /// Fused total score, including seed and intent boosts.
    pub score: f32,
    pub semantic: f32,
    pub lexical: f32,
    pub structural: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross: Option<f32>,
    /// Raw per-source maxima for telemetry ("semantic", "lexical", ...).
    pub source_scores: HashMap<String, f32>,
    pub reasons: Vec<String>,
    /// Ids of the graph nodes that contributed to this file's score.
    pub nodes: Vec<String>,
}

/// Ordered candidate list; `primary` aliases the top element.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Resolution {
    pub candidates: Vec<Candidate>,
}

impl Resolution {
    pub fn empty() -> Self {
        Resolution::default()
    }

    pub fn primary(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        self.candidates.iter().map(|c| c.path.clone()).collect()
    }
}
