pub mod imports;
pub mod languages;
pub mod references;
pub mod resolve;
pub mod snapshot;
pub mod symbols;
pub mod walker;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use rayon::prelude::*;

use crate::embed::cache::EmbeddingCache;
use crate::embed::{Embedder, NoopEmbedder, embeddings_disabled};
use crate::graph::CodeGraph;
use crate::graph::edge::Edge;
use crate::graph::node::{NodeKind, export_key, parse_placeholder};
use resolve::ImportResolver;
use snapshot::{FileSnapshot, build_file_snapshot};
use walker::walk_project;

/// Counters and degradation notes from one build.
#[derive(Debug, Default, Clone)]
pub struct BuildReport {
    pub parsed: usize,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

/// AST-driven graph construction: walk, parse in parallel, snapshot each
/// file, then assemble nodes, resolve placeholder edges, and attach
/// embeddings through the content-hashed cache.
pub struct GraphBuilder {
    root: PathBuf,
    embedder: Arc<dyn Embedder>,
    cache: EmbeddingCache,
}

impl GraphBuilder {
    pub fn new(root: &Path, embedder: Arc<dyn Embedder>, cache: EmbeddingCache) -> Self {
        GraphBuilder {
            root: root.to_path_buf(),
            embedder,
            cache,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build a fresh graph from the project root.
    pub fn build(&mut self) -> Result<CodeGraph> {
        self.build_with_report().map(|(graph, _)| graph)
    }

    /// Build a fresh graph, returning parse/skip counters and degradation
    /// warnings alongside.
    pub fn build_with_report(&mut self) -> Result<(CodeGraph, BuildReport)> {
        let mut report = BuildReport::default();

        // Embedding pipeline first: a load failure downgrades to the no-op
        // embedder rather than failing the build.
        if embeddings_disabled() {
            self.embedder = Arc::new(NoopEmbedder);
            self.cache.clear()?;
        } else if let Err(e) = self.embedder.initialize() {
            report
                .warnings
                .push(format!("embedder unavailable, proceeding without vectors: {e}"));
            self.embedder = Arc::new(NoopEmbedder);
            self.cache.clear()?;
        }

        let files = walk_project(&self.root)?;
        let resolver = ImportResolver::new(&self.root);

        // Parse phase is CPU-bound: one snapshot per file, in parallel.
        // A file that fails to parse is skipped, never fatal to the build.
        let snapshots: Vec<FileSnapshot> = files
            .par_iter()
            .filter_map(|path| build_file_snapshot(&self.root, path, &resolver).ok())
            .collect();

        report.parsed = snapshots.len();
        report.skipped = files.len() - snapshots.len();

        let mut graph = CodeGraph::new();
        apply_snapshots(&mut graph, &snapshots)?;

        if self.embedder.is_enabled() {
            self.attach_embeddings(&mut graph)?;
            self.cache.flush()?;
        }

        Ok((graph, report))
    }

    /// Snapshot a single project-relative file. Used by the graph manager
    /// to turn a file modification into overlay operations.
    pub fn snapshot_file(&self, rel_path: &str) -> Result<FileSnapshot> {
        let resolver = ImportResolver::new(&self.root);
        let mut snapshot = build_file_snapshot(&self.root, &self.root.join(rel_path), &resolver)?;
        if self.embedder.is_enabled() {
            for node in &mut snapshot.symbols {
                if node.kind == NodeKind::Import {
                    continue;
                }
                if let Some(text) = node.meta.embedding_text.clone() {
                    let vector = self.embedder.embed(&text)?;
                    if !vector.is_empty() {
                        node.embedding = Some(vector);
                    }
                }
            }
        }
        Ok(snapshot)
    }

    /// Look up or compute an embedding for every symbol node.
    fn attach_embeddings(&mut self, graph: &mut CodeGraph) -> Result<()> {
        let pending: Vec<(String, String)> = graph
            .all_nodes()
            .filter(|n| !n.is_file() && n.kind != NodeKind::Import)
            .filter_map(|n| n.meta.embedding_text.clone().map(|t| (n.id.clone(), t)))
            .collect();

        for (id, text) in pending {
            let key = EmbeddingCache::key(&text);
            let vector = match self.cache.get(&key) {
                Some(hit) => hit.clone(),
                None => {
                    let computed = self.embedder.embed(&text)?;
                    self.cache.insert(key, computed.clone());
                    computed
                }
            };
            if vector.is_empty() {
                continue;
            }
            if let Some(node) = graph.get_node(&id) {
                let mut updated = node.clone();
                updated.embedding = Some(vector);
                graph.upsert_node(updated);
            }
        }
        Ok(())
    }
}

/// Install snapshots into a graph: drop any prior nodes for the affected
/// paths, upsert the new nodes, then resolve and add the surviving edges.
pub fn apply_snapshots(graph: &mut CodeGraph, snapshots: &[FileSnapshot]) -> Result<()> {
    for snapshot in snapshots {
        graph.remove_nodes_by_path(&snapshot.path);
    }
    for snapshot in snapshots {
        for node in snapshot.nodes() {
            graph.upsert_node(node.clone());
        }
    }

    let export_index = graph.export_index();
    for snapshot in snapshots {
        for edge in resolve_edges(graph, &export_index, &snapshot.edges) {
            graph.add_edge(edge)?;
        }
    }
    Ok(())
}

/// Swap placeholder targets for real node ids via the export index and keep
/// only edges whose endpoints exist in `graph`. Edge ids are recomputed
/// from the resolved endpoints.
pub fn resolve_edges(
    graph: &CodeGraph,
    export_index: &HashMap<String, String>,
    edges: &[Edge],
) -> Vec<Edge> {
    edges
        .iter()
        .filter_map(|edge| {
            let target = match parse_placeholder(&edge.to) {
                Some(("*", name)) => {
                    // Raw placeholder: any exported symbol with this name,
                    // smallest path for determinism.
                    let suffix = format!("#{name}");
                    export_index
                        .iter()
                        .filter(|(key, _)| key.ends_with(&suffix))
                        .min_by(|(a, _), (b, _)| a.cmp(b))
                        .map(|(_, id)| id.clone())?
                }
                Some((path, name)) => export_index.get(&export_key(path, name))?.clone(),
                None => edge.to.clone(),
            };
            if !graph.contains_node(&edge.from) || !graph.contains_node(&target) {
                return None;
            }
            if target == edge.from {
                return None;
            }
            Some(Edge::new(edge.from.clone(), target, edge.kind).with_meta(edge.meta.clone()))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;
    use crate::graph::edge::EdgeKind;

    fn fixture_project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/auth.ts"),
            "// Core credential check.\nexport function authenticateUser(user) {\n  return user.token;\n}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("src/login.ts"),
            "import { authenticateUser } from './auth';\nexport function handleLogin(form) {\n  return authenticateUser(form.user);\n}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("src/ui.ts"),
            "import { handleLogin } from './login';\nexport function renderLogin() {\n  return handleLogin({ user: null });\n}\n",
        )
        .unwrap();
        dir
    }

    fn build(dir: &Path) -> CodeGraph {
        let mut builder = GraphBuilder::new(
            dir,
            Arc::new(HashingEmbedder::new(64)),
            EmbeddingCache::in_memory(),
        );
        builder.build().unwrap()
    }

    #[test]
    fn test_build_produces_files_symbols_and_resolved_calls() {
        let dir = fixture_project();
        let graph = build(dir.path());

        assert_eq!(graph.files().len(), 3);
        let auth = graph
            .all_nodes()
            .find(|n| n.name == "authenticateUser")
            .expect("symbol must be in graph");
        let handle = graph
            .all_nodes()
            .find(|n| n.name == "handleLogin")
            .expect("symbol must be in graph");

        // Cross-file call resolved via the export index.
        assert!(
            graph
                .get_outgoing_edges(&handle.id)
                .iter()
                .any(|e| e.kind == EdgeKind::Calls && e.to == auth.id),
            "handleLogin must call authenticateUser after placeholder resolution"
        );
    }

    #[test]
    fn test_symbols_carry_embeddings() {
        let dir = fixture_project();
        let graph = build(dir.path());
        let auth = graph.all_nodes().find(|n| n.name == "authenticateUser").unwrap();
        let embedding = auth.embedding.as_ref().expect("embedding attached");
        assert_eq!(embedding.len(), 64);
    }

    #[test]
    fn test_build_twice_yields_identical_json() {
        let dir = fixture_project();
        let first = serde_json::to_string(&build(dir.path())).unwrap();
        let second = serde_json::to_string(&build(dir.path())).unwrap();
        assert_eq!(first, second, "rebuilds must be byte-identical");
    }

    #[test]
    fn test_unparseable_file_is_skipped_not_fatal() {
        let dir = fixture_project();
        // Invalid UTF-8 bytes: the file is read but the symbol extraction
        // sees an empty/garbled tree; worst case the file contributes a bare
        // file node. A missing-extension file is simply not walked.
        std::fs::write(dir.path().join("src/broken.ts"), [0xFF, 0xFE, 0x00]).unwrap();
        let mut builder = GraphBuilder::new(
            dir.path(),
            Arc::new(NoopEmbedder),
            EmbeddingCache::in_memory(),
        );
        let (graph, _report) = builder.build_with_report().unwrap();
        assert!(graph.files().len() >= 3, "healthy files must still be indexed");
    }

    #[test]
    fn test_noop_embedder_leaves_vectors_absent() {
        let dir = fixture_project();
        let mut builder = GraphBuilder::new(
            dir.path(),
            Arc::new(NoopEmbedder),
            EmbeddingCache::in_memory(),
        );
        let graph = builder.build().unwrap();
        assert!(graph.all_nodes().all(|n| n.embedding.is_none()));
    }

    #[test]
    fn test_resolve_edges_drops_unresolvable_placeholders() {
        let dir = fixture_project();
        let graph = build(dir.path());
        let export_index = graph.export_index();

        let auth = graph.all_nodes().find(|n| n.name == "authenticateUser").unwrap();
        let edges = vec![
            Edge::new(
                auth.id.clone(),
                crate::graph::node::placeholder_id("*", "noSuchSymbol"),
                EdgeKind::Calls,
            ),
            Edge::new(
                auth.id.clone(),
                crate::graph::node::placeholder_id("src/login.ts", "handleLogin"),
                EdgeKind::Calls,
            ),
        ];
        let resolved = resolve_edges(&graph, &export_index, &edges);
        assert_eq!(resolved.len(), 1, "unresolvable placeholder must be dropped");
        let handle = graph.all_nodes().find(|n| n.name == "handleLogin").unwrap();
        assert_eq!(resolved[0].to, handle.id);
    }
}
