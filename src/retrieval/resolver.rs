use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Result;

use crate::embed::Embedder;
use crate::embed::cross::CrossEncoder;
use crate::graph::CodeGraph;
use crate::index::bm25::{Bm25Index, tokenize};
use crate::index::hnsw::{HnswConfig, HnswIndex};

use super::fusion::reciprocal_rank_fusion;
use super::rerank::{RerankWeights, rerank};
use super::{Candidate, Resolution};

/// Fixed score bonus for injected seed paths.
const SEED_SCORE: f32 = 5.0;
/// Bonus per candidate whose path appears in the recent-paths hint.
const RECENT_FOCUS_BOOST: f32 = 1.0;

/// A query-intent heuristic: when any keyword appears in the query, every
/// candidate whose path contains the pattern gets the boost.
#[derive(Debug, Clone)]
pub struct IntentBoost {
    pub keywords: Vec<String>,
    pub path_pattern: String,
    pub boost: f32,
    pub reason: String,
}

/// Built-in defaults: authentication, UI, and test intent patterns.
pub fn default_intent_boosts() -> Vec<IntentBoost> {
    vec![
        IntentBoost {
            keywords: ["auth", "token", "login", "oauth"]
                .map(str::to_owned)
                .to_vec(),
            path_pattern: "src/auth/".to_owned(),
            boost: 2.0,
            reason: "Intent boost: authentication path".to_owned(),
        },
        IntentBoost {
            keywords: [
                "ui", "component", "tsx", "react", "form", "input", "button", "validation",
            ]
            .map(str::to_owned)
            .to_vec(),
            path_pattern: "src/ui/".to_owned(),
            boost: 2.0,
            reason: "Intent boost: ui path".to_owned(),
        },
        IntentBoost {
            keywords: ["test", "spec"].map(str::to_owned).to_vec(),
            path_pattern: "tests/".to_owned(),
            boost: 1.5,
            reason: "Intent boost: test path".to_owned(),
        },
    ]
}

/// Per-call options for [`TargetResolver::resolve`].
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Paths the caller is focused on: injected as seeds and given the
    /// recent-focus boost.
    pub recent_paths: Vec<String>,
    /// Override the resolver's construction-time limit.
    pub limit: Option<usize>,
}

/// Turns a natural-language query into ranked candidate files.
///
/// The ANN and BM25 indexes are built once at construction from the graph
/// the resolver is given and never mutate afterwards; enabling the
/// cross-encoder means constructing a fresh resolver.
pub struct TargetResolver {
    graph: Arc<CodeGraph>,
    embedder: Arc<dyn Embedder>,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
    ann: HnswIndex,
    bm25: Bm25Index,
    /// lowercased symbol name → normalised paths declaring it.
    name_paths: HashMap<String, BTreeSet<String>>,
    limit: usize,
    weights: RerankWeights,
    intent_boosts: Vec<IntentBoost>,
}

impl TargetResolver {
    pub fn new(
        graph: Arc<CodeGraph>,
        embedder: Arc<dyn Embedder>,
        cross_encoder: Option<Arc<dyn CrossEncoder>>,
        limit: usize,
    ) -> Result<Self> {
        let mut ann = HnswIndex::new(HnswConfig::default());
        let mut bm25 = Bm25Index::new();
        let mut name_paths: HashMap<String, BTreeSet<String>> = HashMap::new();

        let mut nodes: Vec<_> = graph.all_nodes().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        for node in nodes {
            if let Some(embedding) = &node.embedding {
                ann.add(&node.id, embedding)?;
            }
            let text = match &node.meta.embedding_text {
                Some(t) => format!("{} {} {}", node.name, node.path, t),
                None => format!("{} {} {}", node.name, node.path, node.content),
            };
            bm25.add_document(&node.id, &text);
            if !node.is_file() {
                name_paths
                    .entry(node.name.to_lowercase())
                    .or_default()
                    .insert(normalize_path(&node.path));
            }
        }

        Ok(TargetResolver {
            graph,
            embedder,
            cross_encoder,
            ann,
            bm25,
            name_paths,
            limit: limit.max(1),
            weights: RerankWeights::default(),
            intent_boosts: default_intent_boosts(),
        })
    }

    /// Replace the default intent-boost table (config override).
    pub fn with_intent_boosts(mut self, boosts: Vec<IntentBoost>) -> Self {
        self.intent_boosts = boosts;
        self
    }

    pub fn has_cross_encoder(&self) -> bool {
        self.cross_encoder.is_some()
    }

    /// Resolve a query into ranked candidate files.
    pub fn resolve(&self, query: &str, options: &ResolveOptions) -> Result<Resolution> {
        let limit = options.limit.unwrap_or(self.limit).max(1);
        let seed = (limit * 3).max(limit);

        let query_vector = self.embedder.embed(query)?;
        let semantic_hits = self.ann.search(&query_vector, seed, None)?;
        let lexical_hits = self.bm25.search(query, seed);

        if semantic_hits.is_empty() && lexical_hits.is_empty() {
            return Ok(Resolution::empty());
        }

        let fused = reciprocal_rank_fusion(&semantic_hits, &lexical_hits, seed);
        let reranked = rerank(
            &fused,
            &self.graph,
            query,
            self.cross_encoder.as_deref(),
            &self.weights,
        );

        // Aggregate node-level scores into file-level candidates.
        let mut by_path: HashMap<String, Candidate> = HashMap::new();
        for hit in &reranked {
            let Some(node) = self.graph.get_node(&hit.id) else {
                continue;
            };
            let path = normalize_path(&node.path);
            let candidate = by_path.entry(path.clone()).or_insert_with(|| Candidate {
                path,
                ..Default::default()
            });
            candidate.score += hit.score;
            candidate.semantic = candidate.semantic.max(hit.semantic_raw);
            candidate.lexical = candidate.lexical.max(hit.lexical_raw);
            candidate.structural = candidate.structural.max(hit.structural_raw);
            if let Some(cross) = hit.cross_raw {
                candidate.cross = Some(candidate.cross.unwrap_or(0.0).max(cross));
            }
            for (key, value) in [
                ("semantic", hit.semantic_raw),
                ("lexical", hit.lexical_raw),
                ("structural", hit.structural_raw),
            ] {
                let slot = candidate.source_scores.entry(key.to_owned()).or_insert(0.0);
                *slot = slot.max(value);
            }
            if let Some(cross) = hit.cross_raw {
                let slot = candidate.source_scores.entry("cross".to_owned()).or_insert(0.0);
                *slot = slot.max(cross);
            }
            candidate
                .reasons
                .push(format!("{} {} matched", node.kind.as_str(), node.name));
            candidate.nodes.push(hit.id.clone());
        }

        // Seed paths: recent hints plus paths inferred from the query.
        let mut seeds: BTreeSet<String> = options
            .recent_paths
            .iter()
            .map(|p| normalize_path(p))
            .collect();
        seeds.extend(self.paths_from_query(query));
        for path in &seeds {
            let candidate = by_path.entry(path.clone()).or_insert_with(|| Candidate {
                path: path.clone(),
                ..Default::default()
            });
            candidate.score += SEED_SCORE;
            candidate.reasons.push("Seed path (dataset hint)".to_owned());
        }

        // Recent-focus boost.
        let recent: BTreeSet<String> = options
            .recent_paths
            .iter()
            .map(|p| normalize_path(p))
            .collect();
        for candidate in by_path.values_mut() {
            if recent.contains(&candidate.path) {
                candidate.score += RECENT_FOCUS_BOOST;
                candidate.reasons.push("Recent focus".to_owned());
            }
        }

        // Intent boosts.
        let query_tokens: BTreeSet<String> = tokenize(query).into_iter().collect();
        for boost in &self.intent_boosts {
            if !boost.keywords.iter().any(|k| query_tokens.contains(k)) {
                continue;
            }
            for candidate in by_path.values_mut() {
                if candidate.path.contains(&boost.path_pattern) {
                    candidate.score += boost.boost;
                    candidate.reasons.push(boost.reason.clone());
                }
            }
        }

        let mut candidates: Vec<Candidate> = by_path.into_values().collect();
        for candidate in &mut candidates {
            dedup_preserving_order(&mut candidate.reasons);
        }
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.path.cmp(&b.path))
        });
        candidates.truncate(limit);

        Ok(Resolution { candidates })
    }

    /// Infer seed paths from the query text: literal file tokens with known
    /// extensions, plus declaring paths of any token matching an indexed
    /// symbol name.
    fn paths_from_query(&self, query: &str) -> BTreeSet<String> {
        let mut paths = BTreeSet::new();

        let known_paths: Vec<String> = self.graph.paths().map(normalize_path).collect();
        for word in query.split_whitespace() {
            let token = word.trim_matches(|c: char| !c.is_alphanumeric() && !"./_-".contains(c));
            if has_source_extension(token) {
                let token = normalize_path(token);
                for path in &known_paths {
                    if path == &token || path.ends_with(&format!("/{token}")) {
                        paths.insert(path.clone());
                    }
                }
            }
        }

        for token in tokenize(query) {
            if let Some(declared) = self.name_paths.get(&token) {
                paths.extend(declared.iter().cloned());
            }
        }
        paths
    }
}

fn has_source_extension(token: &str) -> bool {
    [".ts", ".tsx", ".js", ".jsx", ".py"]
        .iter()
        .any(|ext| token.ends_with(ext) && token.len() > ext.len())
}

/// Forward slashes, no leading `./`.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .trim_start_matches("./")
        .to_owned()
}

fn dedup_preserving_order(items: &mut Vec<String>) {
    let mut seen = BTreeSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{HashingEmbedder, NoopEmbedder};
    use crate::graph::node::{Node, NodeKind, NodeMeta, symbol_id};

    fn symbol(path: &str, name: &str, exported: bool, embedder: &dyn Embedder) -> Node {
        let text = format!("function {name}() {{ /* {name} */ }}");
        let embedding = embedder.embed(&format!("{name}\n{text}")).unwrap();
        Node {
            id: symbol_id(path, NodeKind::Function, name, 1, 3, None),
            kind: NodeKind::Function,
            name: name.to_owned(),
            path: path.to_owned(),
            content: text.clone(),
            start_line: 1,
            end_line: 3,
            embedding: (!embedding.is_empty()).then_some(embedding),
            meta: NodeMeta {
                exported,
                embedding_text: Some(format!("{name}\n{text}")),
                ..Default::default()
            },
        }
    }

    fn fixture_resolver(embedder: Arc<dyn Embedder>) -> TargetResolver {
        let mut graph = CodeGraph::new();
        for (path, name) in [
            ("src/auth/session.ts", "authenticateUser"),
            ("src/auth/session.ts", "issueToken"),
            ("src/ui/login_form.tsx", "renderLoginForm"),
            ("src/store.ts", "saveRecord"),
        ] {
            graph.add_node(Node::file(path, ""));
            graph.add_node(symbol(path, name, true, embedder.as_ref()));
        }
        TargetResolver::new(Arc::new(graph), embedder, None, 5).unwrap()
    }

    #[test]
    fn test_query_resolves_matching_file_first() {
        let resolver = fixture_resolver(Arc::new(HashingEmbedder::new(64)));
        let resolution = resolver
            .resolve("refactor authenticateUser", &ResolveOptions::default())
            .unwrap();
        assert!(!resolution.is_empty());
        assert_eq!(resolution.primary().unwrap().path, "src/auth/session.ts");
    }

    #[test]
    fn test_lexical_fallback_when_embeddings_disabled() {
        let resolver = fixture_resolver(Arc::new(NoopEmbedder));
        let resolution = resolver
            .resolve("saveRecord persistence", &ResolveOptions::default())
            .unwrap();
        assert_eq!(resolution.primary().unwrap().path, "src/store.ts");
    }

    #[test]
    fn test_no_signal_query_returns_empty_resolution() {
        let resolver = fixture_resolver(Arc::new(NoopEmbedder));
        let resolution = resolver
            .resolve("zzqx qqzz", &ResolveOptions::default())
            .unwrap();
        assert!(resolution.is_empty());
        assert!(resolution.primary().is_none());
    }

    #[test]
    fn test_recent_paths_are_seeded_and_boosted() {
        let resolver = fixture_resolver(Arc::new(HashingEmbedder::new(64)));
        let options = ResolveOptions {
            recent_paths: vec!["src/store.ts".into()],
            limit: None,
        };
        let resolution = resolver.resolve("refactor authenticateUser", &options).unwrap();
        let store = resolution
            .candidates
            .iter()
            .find(|c| c.path == "src/store.ts")
            .expect("seeded path must be a candidate");
        assert!(store.reasons.iter().any(|r| r == "Seed path (dataset hint)"));
        assert!(store.score >= SEED_SCORE);
    }

    #[test]
    fn test_intent_boost_prefers_auth_paths() {
        let resolver = fixture_resolver(Arc::new(NoopEmbedder));
        let resolution = resolver
            .resolve("fix token handling in issueToken", &ResolveOptions::default())
            .unwrap();
        let auth = resolution
            .candidates
            .iter()
            .find(|c| c.path.starts_with("src/auth/"))
            .expect("auth path should surface");
        assert!(
            auth.reasons.iter().any(|r| r.contains("authentication")),
            "reasons were {:?}",
            auth.reasons
        );
    }

    #[test]
    fn test_literal_file_token_is_seeded() {
        let resolver = fixture_resolver(Arc::new(NoopEmbedder));
        let resolution = resolver
            .resolve("update login_form.tsx rendering validation", &ResolveOptions::default())
            .unwrap();
        let form = resolution
            .candidates
            .iter()
            .find(|c| c.path == "src/ui/login_form.tsx")
            .expect("literal file token must seed its path");
        assert!(form.reasons.iter().any(|r| r == "Seed path (dataset hint)"));
    }

    #[test]
    fn test_candidates_sorted_by_score_desc() {
        let resolver = fixture_resolver(Arc::new(HashingEmbedder::new(64)));
        let resolution = resolver
            .resolve("authenticateUser token auth", &ResolveOptions::default())
            .unwrap();
        for pair in resolution.candidates.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}
