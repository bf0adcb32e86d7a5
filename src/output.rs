use serde::Serialize;

use crate::graph::CodeGraph;
use crate::graph::node::NodeKind;
use crate::pipeline::PipelineResult;
use crate::retrieval::Resolution;

/// Index summary printed by the `index` command.
#[derive(Debug, Serialize)]
pub struct IndexStats {
    pub file_count: usize,
    pub functions: usize,
    pub classes: usize,
    pub imports: usize,
    pub edges: usize,
    pub skipped: usize,
    pub elapsed_secs: f64,
}

impl IndexStats {
    pub fn from_graph(graph: &CodeGraph, skipped: usize, elapsed_secs: f64) -> Self {
        let count = |kind: NodeKind| graph.all_nodes().filter(|n| n.kind == kind).count();
        IndexStats {
            file_count: graph.files().len(),
            functions: count(NodeKind::Function),
            classes: count(NodeKind::Class),
            imports: count(NodeKind::Import),
            edges: graph.edge_count(),
            skipped,
            elapsed_secs,
        }
    }
}

pub fn print_index_stats(stats: &IndexStats, json: bool) {
    if json {
        println!("{}", serde_json::to_string_pretty(stats).unwrap_or_default());
        return;
    }
    println!(
        "Indexed {} files in {:.2}s ({} functions, {} classes, {} imports, {} edges{})",
        stats.file_count,
        stats.elapsed_secs,
        stats.functions,
        stats.classes,
        stats.imports,
        stats.edges,
        if stats.skipped > 0 {
            format!(", {} skipped", stats.skipped)
        } else {
            String::new()
        },
    );
}

/// Candidate list, one line per file with score and top reasons.
pub fn print_resolution(resolution: &Resolution, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(resolution).unwrap_or_default()
        );
        return;
    }
    if resolution.is_empty() {
        println!("no candidates");
        return;
    }
    for (rank, candidate) in resolution.candidates.iter().enumerate() {
        let reasons = candidate
            .reasons
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ");
        println!(
            "{:>2}. {:<40} {:>7.3}  {}",
            rank + 1,
            candidate.path,
            candidate.score,
            reasons
        );
    }
}

/// Pipeline summary: verdict, metrics, widening history, and the trace.
pub fn print_run_result(result: &PipelineResult, json: bool) {
    if json {
        let payload = serde_json::json!({
            "iterations": result.iterations,
            "error": result.error,
            "evaluation": result.evaluation,
            "actions_applied": result.actions_applied,
            "trace": result.trace,
            "resolution": result.resolution,
        });
        println!("{}", serde_json::to_string_pretty(&payload).unwrap_or_default());
        return;
    }

    if let Some(evaluation) = &result.evaluation {
        println!(
            "{} after {} iteration(s): precision {:.3}, recall {:.3}, f1 {:.3}, coverage {:.3}",
            if evaluation.passed { "PASS" } else { "FAIL" },
            result.iterations,
            evaluation.precision,
            evaluation.recall,
            evaluation.f1,
            evaluation.coverage,
        );
    }
    if !result.actions_applied.is_empty() {
        let actions: Vec<&str> = result.actions_applied.iter().map(|a| a.as_str()).collect();
        println!("widened with: {}", actions.join(", "));
    }
    if let Some(context) = &result.context {
        println!(
            "context: {} tokens used / {} budget ({} saved vs whole files)",
            context.tokens_used, context.telemetry.token_budget, context.tokens_saved
        );
    }
    println!("trace:");
    for entry in &result.trace.entries {
        println!(
            "  {:<22} {:>6}ms  {}",
            entry.node,
            entry.duration_ms,
            match &entry.error {
                Some(error) => format!("error: {error}"),
                None => "ok".to_owned(),
            }
        );
    }
    if let Some(error) = &result.error {
        eprintln!("pipeline error: {error}");
    }
}
