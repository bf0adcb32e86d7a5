use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::tool::Parameters;
use rmcp::model::{ServerCapabilities, ServerInfo};
use rmcp::{ServerHandler, tool, tool_handler, tool_router};
use tokio::sync::Mutex;

use crate::builder::GraphBuilder;
use crate::config::CodeContextConfig;
use crate::embed::cache::{EmbeddingCache, cache_root};
use crate::embed::{Embedder, build_embedder};
use crate::graph::CodeGraph;
use crate::manager::GraphManager;
use crate::pipeline::{Pipeline, PipelineRequest};
use crate::retrieval::{
    DependencyAwareRetriever, ResolveOptions, RetrieverOptions, TargetResolver,
};
use crate::store::InMemoryGraphStore;

use super::params::{
    BuildContextParams, GetGraphStatsParams, ResolveTargetParams, RunPipelineParams,
};

// ---------------------------------------------------------------------------
// ContextServer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ContextServer {
    default_project_root: Arc<PathBuf>,
    graph_cache: Arc<Mutex<HashMap<PathBuf, Arc<CodeGraph>>>>,
    tool_router: ToolRouter<Self>,
}

impl ContextServer {
    pub fn new(project_root: PathBuf) -> Self {
        Self {
            default_project_root: Arc::new(project_root),
            graph_cache: Arc::new(Mutex::new(HashMap::new())),
            tool_router: Self::tool_router(),
        }
    }

    fn embedder_for(root: &std::path::Path) -> Arc<dyn Embedder> {
        let config = CodeContextConfig::load(root);
        build_embedder(config.embeddings.dimension, config.embeddings.disabled)
    }

    /// Resolve the effective project root (override > default), build the
    /// graph or retrieve it from the per-root cache.
    async fn resolve_graph(
        &self,
        project_path_override: Option<&str>,
    ) -> Result<(Arc<CodeGraph>, PathBuf), String> {
        let path: PathBuf = match project_path_override {
            Some(p) => PathBuf::from(p),
            None => (*self.default_project_root).clone(),
        };

        let mut cache = self.graph_cache.lock().await;
        if let Some(graph) = cache.get(&path) {
            return Ok((Arc::clone(graph), path));
        }

        // Graph construction is CPU-bound; run it off the async executor.
        let path_clone = path.clone();
        let graph = tokio::task::spawn_blocking(move || {
            let embedder = Self::embedder_for(&path_clone);
            let mut builder =
                GraphBuilder::new(&path_clone, embedder, EmbeddingCache::open(&cache_root()));
            builder.build()
        })
        .await
        .map_err(|e| format!("task join error: {e}"))?
        .map_err(|e| e.to_string())?;

        if graph.files().is_empty() {
            return Err(format!(
                "No indexable source files found at '{}'.",
                path.display()
            ));
        }

        let graph = Arc::new(graph);
        cache.insert(path.clone(), Arc::clone(&graph));
        Ok((graph, path))
    }
}

// ---------------------------------------------------------------------------
// Tool implementations
// ---------------------------------------------------------------------------

#[tool_router]
impl ContextServer {
    #[tool(
        description = "Resolve a change request into ranked candidate files with score breakdowns."
    )]
    async fn resolve_target(
        &self,
        Parameters(p): Parameters<ResolveTargetParams>,
    ) -> Result<String, String> {
        let (graph, root) = self.resolve_graph(p.project_path.as_deref()).await?;
        let config = CodeContextConfig::load(&root);
        let embedder = Self::embedder_for(&root);
        let limit = p.limit.unwrap_or(config.retrieval.limit);

        let resolver = TargetResolver::new(graph, embedder, None, limit)
            .map_err(|e| e.to_string())?
            .with_intent_boosts(config.intent_boosts());
        let resolution = resolver
            .resolve(&p.query, &ResolveOptions::default())
            .map_err(|e| e.to_string())?;

        if resolution.is_empty() {
            return Err(format!("no candidates for query '{}'", p.query));
        }

        let mut out = String::new();
        for (rank, candidate) in resolution.candidates.iter().enumerate() {
            out.push_str(&format!(
                "{}. {} (score {:.3}) — {}\n",
                rank + 1,
                candidate.path,
                candidate.score,
                candidate.reasons.join("; "),
            ));
        }
        Ok(out)
    }

    #[tool(
        description = "Build a dependency-aware context for a change request: target code, dependents that MUST update on signature changes, dependencies, and related code, packed under a token budget."
    )]
    async fn build_context(
        &self,
        Parameters(p): Parameters<BuildContextParams>,
    ) -> Result<String, String> {
        let (graph, root) = self.resolve_graph(p.project_path.as_deref()).await?;
        let config = CodeContextConfig::load(&root);
        let embedder = Self::embedder_for(&root);

        let resolver = TargetResolver::new(
            Arc::clone(&graph),
            Arc::clone(&embedder),
            None,
            config.retrieval.limit,
        )
        .map_err(|e| e.to_string())?
        .with_intent_boosts(config.intent_boosts());
        let resolution = resolver
            .resolve(&p.query, &ResolveOptions::default())
            .map_err(|e| e.to_string())?;

        let retriever = DependencyAwareRetriever::new(graph, embedder);
        let context = retriever
            .build_context(
                &p.query,
                p.target_file.as_deref(),
                p.token_budget.unwrap_or(config.pipeline.token_budget),
                &resolution,
                &RetrieverOptions::default(),
            )
            .map_err(|e| e.to_string())?;

        Ok(format!(
            "{}\n[{} tokens used / {} budget, {} saved]",
            context.formatted,
            context.tokens_used,
            context.telemetry.token_budget,
            context.tokens_saved,
        ))
    }

    #[tool(
        description = "Run the iterative retrieval pipeline against ground-truth paths; returns metrics, widening actions, and the stage trace."
    )]
    async fn run_pipeline(
        &self,
        Parameters(p): Parameters<RunPipelineParams>,
    ) -> Result<String, String> {
        let path: PathBuf = match p.project_path.as_deref() {
            Some(root) => PathBuf::from(root),
            None => (*self.default_project_root).clone(),
        };

        let request = PipelineRequest {
            query: p.query,
            target_file: p.target_file,
            candidate_paths: Vec::new(),
            ground_truth: p
                .ground_truth
                .split(',')
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .collect(),
        };

        let result = tokio::task::spawn_blocking(move || {
            let config = CodeContextConfig::load(&path);
            let embedder = Self::embedder_for(&path);
            let builder = GraphBuilder::new(
                &path,
                Arc::clone(&embedder),
                EmbeddingCache::open(&cache_root()),
            );
            let manager = GraphManager::new(builder, Arc::new(InMemoryGraphStore::new()));
            let mut pipeline = Pipeline::new(manager, embedder, config.pipeline_config());
            pipeline.run(&request)
        })
        .await
        .map_err(|e| format!("task join error: {e}"))?;

        if let Some(error) = &result.error {
            return Err(error.clone());
        }

        let mut out = String::new();
        if let Some(evaluation) = &result.evaluation {
            out.push_str(&format!(
                "{} after {} iteration(s): precision {:.3}, recall {:.3}, coverage {:.3}\n",
                if evaluation.passed { "PASS" } else { "FAIL" },
                result.iterations,
                evaluation.precision,
                evaluation.recall,
                evaluation.coverage,
            ));
        }
        if !result.actions_applied.is_empty() {
            let actions: Vec<&str> = result.actions_applied.iter().map(|a| a.as_str()).collect();
            out.push_str(&format!("widened with: {}\n", actions.join(", ")));
        }
        for entry in &result.trace.entries {
            out.push_str(&format!("{} ({}ms)\n", entry.node, entry.duration_ms));
        }
        Ok(out)
    }

    #[tool(description = "Graph overview: file, symbol, and edge counts for the indexed project.")]
    async fn get_graph_stats(
        &self,
        Parameters(p): Parameters<GetGraphStatsParams>,
    ) -> Result<String, String> {
        let (graph, _root) = self.resolve_graph(p.project_path.as_deref()).await?;
        let symbols = graph.all_nodes().filter(|n| !n.is_file()).count();
        Ok(format!(
            "{} files, {} symbols, {} edges",
            graph.files().len(),
            symbols,
            graph.edge_count(),
        ))
    }
}

// ---------------------------------------------------------------------------
// ServerHandler
// ---------------------------------------------------------------------------

#[tool_handler]
impl ServerHandler for ContextServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "code-context: dependency-aware retrieval over a code graph. Resolve a change request to candidate files, then build a packed context whose DEPENDENTS section lists the callers that break on signature changes.".into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
