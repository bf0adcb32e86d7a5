pub mod trace;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use serde::Serialize;

use crate::embed::Embedder;
use crate::embed::cross::build_cross_encoder;
use crate::eval::{EvalConfig, Evaluation, EvaluationAgent, WideningAction};
use crate::graph::CodeGraph;
use crate::manager::GraphManager;
use crate::retrieval::retriever::{DependencyContext, MAX_TOKEN_BUDGET};
use crate::retrieval::{
    DependencyAwareRetriever, Resolution, ResolveOptions, RetrieverOptions, TargetResolver,
};
use trace::Trace;

/// Run-wide knobs. Thresholds feed the evaluation agent; the rest bound
/// the widening loop.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_iterations: usize,
    pub resolver_limit: usize,
    pub token_budget: usize,
    pub precision_threshold: f32,
    pub recall_threshold: f32,
    pub max_k: Option<usize>,
    pub coverage_threshold: f32,
    pub force_rebuild: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            max_iterations: 2,
            resolver_limit: 10,
            token_budget: 6_000,
            precision_threshold: 0.5,
            recall_threshold: 0.5,
            max_k: None,
            coverage_threshold: 0.85,
            force_rebuild: false,
        }
    }
}

/// One retrieval task: the query, optional target/candidate hints, and the
/// ground-truth paths the evaluation scores against.
#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    pub query: String,
    pub target_file: Option<String>,
    pub candidate_paths: Vec<String>,
    pub ground_truth: BTreeSet<String>,
}

/// Widening state, stepped monotonically by proposed actions between
/// iterations.
#[derive(Debug, Clone, Copy, Serialize)]
struct WideningState {
    token_budget: usize,
    walk_depth: usize,
    related_limit: usize,
    breadth_limit: usize,
    use_cross_encoder: bool,
}

impl WideningState {
    fn new(token_budget: usize) -> Self {
        WideningState {
            token_budget,
            walk_depth: 2,
            related_limit: 5,
            breadth_limit: 3,
            use_cross_encoder: false,
        }
    }

    fn apply(&mut self, actions: &[WideningAction]) {
        for action in actions {
            match action {
                WideningAction::EnableCrossEncoder => self.use_cross_encoder = true,
                WideningAction::IncreaseWalkDepth => {
                    self.walk_depth = (self.walk_depth + 1).min(5);
                }
                WideningAction::ExpandRelated => {
                    self.related_limit += 2;
                    self.breadth_limit = (self.breadth_limit + 1).min(6);
                }
                WideningAction::IncreaseTokenBudget => {
                    self.token_budget = (self.token_budget + 2_000).min(MAX_TOKEN_BUDGET);
                }
            }
        }
    }
}

/// The run's final payload: whatever the last completed iteration
/// produced, plus the full trace and the concatenated action history.
/// `error` is set when a stage failed and the run short-circuited.
#[derive(Debug)]
pub struct PipelineResult {
    pub context: Option<DependencyContext>,
    pub resolution: Option<Resolution>,
    pub evaluation: Option<Evaluation>,
    pub iterations: usize,
    pub trace: Trace,
    pub actions_applied: Vec<WideningAction>,
    pub error: Option<String>,
}

/// Iterative retrieval orchestration: load the graph once, then per
/// iteration build components, resolve targets, build a context, and
/// evaluate — widening the search until the evaluation passes, proposes
/// nothing, or the iteration cap is hit. Strictly serialised within one
/// run so the trace reflects dispatch order.
pub struct Pipeline {
    manager: GraphManager,
    embedder: Arc<dyn Embedder>,
    config: PipelineConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl Pipeline {
    pub fn new(manager: GraphManager, embedder: Arc<dyn Embedder>, config: PipelineConfig) -> Self {
        Pipeline {
            manager,
            embedder,
            config,
            cancel: None,
        }
    }

    /// Attach a cooperative cancellation flag, checked between stages and
    /// iterations.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Execute a full run. Stage errors land in the trace and short-circuit
    /// the loop; the partial result always comes back, with `error` set.
    pub fn run(&mut self, request: &PipelineRequest) -> PipelineResult {
        let mut result = PipelineResult {
            context: None,
            resolution: None,
            evaluation: None,
            iterations: 0,
            trace: Trace::new(),
            actions_applied: Vec::new(),
            error: None,
        };

        let agent = EvaluationAgent::new(EvalConfig {
            precision_threshold: self.config.precision_threshold,
            recall_threshold: self.config.recall_threshold,
            max_k: self.config.max_k,
            coverage_threshold: self.config.coverage_threshold,
        });

        let force_rebuild = self.config.force_rebuild;
        let manager = &mut self.manager;
        let graph: Arc<CodeGraph> = match result.trace.record("graph.load", || {
            manager.initialize(force_rebuild)?;
            let graph = manager.graph()?.clone();
            let metadata = serde_json::json!({
                "nodes": graph.node_count(),
                "edges": graph.edge_count(),
            });
            Ok((Arc::new(graph), Some(metadata)))
        }) {
            Ok(graph) => graph,
            Err(e) => {
                result.error = Some(format!("{e:#}"));
                return result;
            }
        };

        let mut state = WideningState::new(self.config.token_budget);
        let mut seeds: Vec<String> = request.candidate_paths.clone();

        for iteration in 1..=self.config.max_iterations.max(1) {
            result.iterations = iteration;
            if self.cancelled() {
                result.error = Some("cancelled".to_owned());
                return result;
            }

            let outcome = self.run_iteration(&graph, request, &agent, state, &seeds, iteration, &mut result);
            let evaluation = match outcome {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    result.error = Some(format!("{e:#}"));
                    return result;
                }
            };

            let done = evaluation.passed || evaluation.actions.is_empty();
            let actions = evaluation.actions.clone();
            result.evaluation = Some(evaluation);
            if done {
                break;
            }

            if let Some(resolution) = &result.resolution {
                for path in resolution.paths() {
                    if !seeds.contains(&path) {
                        seeds.push(path);
                    }
                }
            }
            state.apply(&actions);
            result.actions_applied.extend(actions);
        }

        result
    }

    fn run_iteration(
        &mut self,
        graph: &Arc<CodeGraph>,
        request: &PipelineRequest,
        agent: &EvaluationAgent,
        state: WideningState,
        seeds: &[String],
        iteration: usize,
        result: &mut PipelineResult,
    ) -> Result<Evaluation> {
        let trace = &mut result.trace;
        let embedder = Arc::clone(&self.embedder);
        let resolver_limit = self.config.resolver_limit;

        // Enabling the cross-encoder means a fresh resolver: the indexes
        // are immutable after construction, there is no stateful toggle.
        let resolver = trace.record("components.build", || {
            let cross_encoder = if state.use_cross_encoder {
                build_cross_encoder(true)
            } else {
                build_cross_encoder(false)
            };
            let metadata = serde_json::json!({
                "cross_encoder": cross_encoder.is_some(),
                "state": state,
            });
            let resolver =
                TargetResolver::new(Arc::clone(graph), Arc::clone(&embedder), cross_encoder, resolver_limit)?;
            Ok((resolver, Some(metadata)))
        })?;

        if self.cancelled() {
            anyhow::bail!("cancelled");
        }

        let retriever = trace.record("retriever.initialize", || {
            let retriever = DependencyAwareRetriever::new(Arc::clone(graph), Arc::clone(&embedder));
            Ok((retriever, None))
        })?;

        if self.cancelled() {
            anyhow::bail!("cancelled");
        }

        let resolution = trace.record("target.resolve", || {
            let options = ResolveOptions {
                recent_paths: seeds.to_vec(),
                limit: None,
            };
            let resolution = resolver.resolve(&request.query, &options)?;
            let metadata = serde_json::json!({
                "candidates": resolution.candidates.len(),
                "primary": resolution.primary().map(|c| c.path.clone()),
            });
            Ok((resolution, Some(metadata)))
        })?;

        if self.cancelled() {
            anyhow::bail!("cancelled");
        }

        let context = trace.record("context.build", || {
            let options = RetrieverOptions {
                candidate_paths: seeds.to_vec(),
                walk_depth: state.walk_depth,
                related_limit: state.related_limit,
                breadth_limit: state.breadth_limit,
            };
            let context = retriever.build_context(
                &request.query,
                request.target_file.as_deref(),
                state.token_budget,
                &resolution,
                &options,
            )?;
            let metadata = serde_json::to_value(&context.telemetry).ok();
            Ok((context, metadata))
        })?;

        let evaluation = trace.record("agent.evaluate", || {
            let evaluation = agent.evaluate(&resolution, &context, &request.ground_truth, iteration);
            let metadata = serde_json::to_value(&evaluation).ok();
            Ok((evaluation, metadata))
        })?;

        result.resolution = Some(resolution);
        result.context = Some(context);
        Ok(evaluation)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
