mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, anyhow};
use clap::Parser;

use code_context::bench::report::{TaskOutcome, write_report};
use code_context::bench::load_dataset;
use code_context::builder::GraphBuilder;
use code_context::builder::walker::relative_path;
use code_context::config::CodeContextConfig;
use code_context::embed::cache::{EmbeddingCache, cache_root};
use code_context::embed::{Embedder, build_embedder};
use code_context::manager::GraphManager;
use code_context::output::{IndexStats, print_index_stats, print_resolution, print_run_result};
use code_context::pipeline::{Pipeline, PipelineRequest};
use code_context::retrieval::{
    DependencyAwareRetriever, ResolveOptions, RetrieverOptions, TargetResolver,
};
use code_context::store::InMemoryGraphStore;
use code_context::watcher;
use code_context::{CodeGraph, mcp};

use cli::{Cli, Commands};

fn make_embedder(config: &CodeContextConfig) -> Arc<dyn Embedder> {
    build_embedder(config.embeddings.dimension, config.embeddings.disabled)
}

fn make_builder(root: &Path, embedder: Arc<dyn Embedder>) -> GraphBuilder {
    GraphBuilder::new(root, embedder, EmbeddingCache::open(&cache_root()))
}

/// Shared pipeline used by all one-shot query subcommands.
fn build_graph(root: &Path, config: &CodeContextConfig) -> Result<(CodeGraph, usize, f64)> {
    let start = Instant::now();
    let mut builder = make_builder(root, make_embedder(config));
    let (graph, report) = builder.build_with_report()?;
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    Ok((graph, report.skipped, start.elapsed().as_secs_f64()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Index {
            path,
            json,
            dump_graph,
        } => {
            let config = CodeContextConfig::load(&path);
            let (graph, skipped, elapsed) = build_graph(&path, &config)?;
            if dump_graph {
                println!("{}", serde_json::to_string_pretty(&graph)?);
            } else {
                let stats = IndexStats::from_graph(&graph, skipped, elapsed);
                print_index_stats(&stats, json);
            }
        }

        Commands::Resolve {
            query,
            path,
            limit,
            json,
        } => {
            let config = CodeContextConfig::load(&path);
            let embedder = make_embedder(&config);
            let (graph, ..) = build_graph(&path, &config)?;
            let resolver =
                TargetResolver::new(Arc::new(graph), embedder, None, limit)?
                    .with_intent_boosts(config.intent_boosts());
            let resolution = resolver.resolve(&query, &ResolveOptions::default())?;
            print_resolution(&resolution, json);
        }

        Commands::Context {
            query,
            path,
            target,
            budget,
            json,
        } => {
            let config = CodeContextConfig::load(&path);
            let embedder = make_embedder(&config);
            let (graph, ..) = build_graph(&path, &config)?;
            let graph = Arc::new(graph);
            let resolver = TargetResolver::new(
                Arc::clone(&graph),
                Arc::clone(&embedder),
                None,
                config.retrieval.limit,
            )?
            .with_intent_boosts(config.intent_boosts());
            let resolution = resolver.resolve(&query, &ResolveOptions::default())?;
            let retriever = DependencyAwareRetriever::new(graph, embedder);
            let context = retriever.build_context(
                &query,
                target.as_deref(),
                budget,
                &resolution,
                &RetrieverOptions::default(),
            )?;
            if json {
                println!("{}", serde_json::to_string_pretty(&context.telemetry)?);
            } else {
                println!("{}", context.formatted);
                eprintln!(
                    "[{} tokens used / {} budget, {} saved]",
                    context.tokens_used, context.telemetry.token_budget, context.tokens_saved
                );
            }
        }

        Commands::Run {
            query,
            path,
            ground_truth,
            target,
            precision,
            recall,
            max_iterations,
            json,
        } => {
            let config = CodeContextConfig::load(&path);
            let mut pipeline_config = config.pipeline_config();
            if let Some(precision) = precision {
                pipeline_config.precision_threshold = precision;
            }
            if let Some(recall) = recall {
                pipeline_config.recall_threshold = recall;
            }
            if let Some(max_iterations) = max_iterations {
                pipeline_config.max_iterations = max_iterations;
            }

            let embedder = make_embedder(&config);
            let builder = make_builder(&path, Arc::clone(&embedder));
            let manager = GraphManager::new(builder, Arc::new(InMemoryGraphStore::new()));
            let mut pipeline = Pipeline::new(manager, embedder, pipeline_config);

            let request = PipelineRequest {
                query,
                target_file: target,
                candidate_paths: Vec::new(),
                ground_truth: ground_truth.into_iter().collect(),
            };
            let result = pipeline.run(&request);
            print_run_result(&result, json);
            if let Some(error) = result.error {
                return Err(anyhow!(error));
            }
        }

        Commands::Bench { dataset, path } => {
            let config = CodeContextConfig::load(&path);
            let dataset = load_dataset(&dataset)?;

            let embedder = make_embedder(&config);
            let builder = make_builder(&path, Arc::clone(&embedder));
            let manager = GraphManager::new(builder, Arc::new(InMemoryGraphStore::new()));
            let mut pipeline = Pipeline::new(manager, embedder, config.pipeline_config());

            let mut outcomes = Vec::with_capacity(dataset.tasks.len());
            for task in &dataset.tasks {
                let request = PipelineRequest {
                    query: task.query.clone(),
                    target_file: task.target_file_path.clone(),
                    candidate_paths: task.candidate_file_paths.clone(),
                    ground_truth: task.ground_truth.iter().cloned().collect(),
                };
                let result = pipeline.run(&request);
                let passed = result
                    .evaluation
                    .as_ref()
                    .is_some_and(|evaluation| evaluation.passed);
                eprintln!(
                    "[bench] {}: {} ({} iterations)",
                    task.id,
                    if passed { "pass" } else { "fail" },
                    result.iterations,
                );
                outcomes.push(TaskOutcome {
                    task_id: task.id.clone(),
                    evaluation: result.evaluation,
                    iterations: result.iterations,
                    tokens_used: result
                        .context
                        .as_ref()
                        .map(|c| c.tokens_used)
                        .unwrap_or(0),
                    primary_path: result
                        .resolution
                        .as_ref()
                        .and_then(|r| r.primary().map(|c| c.path.clone())),
                    error: result.error,
                });
            }

            let report_path = write_report(&path, &dataset, &outcomes)?;
            println!("report written to {}", report_path.display());
        }

        Commands::Watch { path } => {
            let config = CodeContextConfig::load(&path);
            let embedder = make_embedder(&config);
            let builder = make_builder(&path, embedder);
            let mut manager = GraphManager::new(builder, Arc::new(InMemoryGraphStore::new()));

            eprintln!("Indexing {}...", path.display());
            manager.initialize(false)?;
            let graph = manager.graph()?;
            eprintln!(
                "Indexed {} files, {} nodes. Watching for changes... (press Ctrl+C to stop)",
                graph.files().len(),
                graph.node_count(),
            );

            let (handle, mut rx) = watcher::start_watcher(&path)
                .map_err(|e| anyhow!("failed to start watcher: {e}"))?;
            let _handle = handle; // dropping it stops the watcher

            while let Some(event) = rx.recv().await {
                match event {
                    watcher::event::WatchEvent::Modified(p) => {
                        let rel = relative_path(&path, &p);
                        match manager.record_file_modification(&rel) {
                            Ok(()) => eprintln!(
                                "[watch] modified: {rel} (overlay pending: {})",
                                manager.has_pending_overlay()
                            ),
                            Err(e) => eprintln!("[watch] {rel}: {e}"),
                        }
                    }
                    watcher::event::WatchEvent::Deleted(p) => {
                        let rel = relative_path(&path, &p);
                        match manager.record_file_deletion(&rel) {
                            Ok(()) => eprintln!("[watch] deleted: {rel}"),
                            Err(e) => eprintln!("[watch] {rel}: {e}"),
                        }
                    }
                    watcher::event::WatchEvent::ConfigChanged => {
                        eprintln!("[watch] config changed — full rebuild...");
                        manager.initialize(true)?;
                    }
                }
            }
        }

        Commands::Mcp { path } => {
            let project_root = match path {
                Some(path) => path,
                None => std::env::current_dir()?,
            };
            mcp::run(project_root).await?;
        }
    }

    Ok(())
}
