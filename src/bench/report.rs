use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

use super::BenchmarkDataset;
use crate::eval::Evaluation;

/// Directory benchmark reports land in, under the project root.
pub const ARTIFACT_DIR: &str = ".benchmark-artifacts";

/// One task's result as it appears in the report.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: String,
    pub evaluation: Option<Evaluation>,
    pub iterations: usize,
    pub tokens_used: usize,
    pub primary_path: Option<String>,
    pub error: Option<String>,
}

/// Write the markdown report: an aggregate table followed by a section per
/// task. Returns the report path
/// (`.benchmark-artifacts/<family>-<variant>-<ts>.md`).
pub fn write_report(
    root: &Path,
    dataset: &BenchmarkDataset,
    outcomes: &[TaskOutcome],
) -> Result<PathBuf> {
    let dir = root.join(ARTIFACT_DIR);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating {}", dir.display()))?;

    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let path = dir.join(format!("{}-{}-{ts}.md", dataset.family, dataset.variant));

    let mut out = String::new();
    writeln!(out, "# Benchmark: {} ({}/{})", dataset.name, dataset.family, dataset.variant)?;
    writeln!(out)?;

    let scored: Vec<&Evaluation> = outcomes
        .iter()
        .filter_map(|o| o.evaluation.as_ref())
        .collect();
    let avg = |f: fn(&Evaluation) -> f32| -> f32 {
        if scored.is_empty() {
            0.0
        } else {
            scored.iter().map(|e| f(e)).sum::<f32>() / scored.len() as f32
        }
    };
    let passed = scored.iter().filter(|e| e.passed).count();

    writeln!(out, "| tasks | passed | avg precision | avg recall | avg f1 | avg coverage |")?;
    writeln!(out, "|---|---|---|---|---|---|")?;
    writeln!(
        out,
        "| {} | {} | {:.3} | {:.3} | {:.3} | {:.3} |",
        outcomes.len(),
        passed,
        avg(|e| e.precision),
        avg(|e| e.recall),
        avg(|e| e.f1),
        avg(|e| e.coverage),
    )?;
    writeln!(out)?;

    for outcome in outcomes {
        writeln!(out, "## {}", outcome.task_id)?;
        writeln!(out)?;
        if let Some(error) = &outcome.error {
            writeln!(out, "- error: {error}")?;
        }
        if let Some(evaluation) = &outcome.evaluation {
            writeln!(
                out,
                "- precision {:.3}, recall {:.3}, f1 {:.3}, coverage {:.3} — {}",
                evaluation.precision,
                evaluation.recall,
                evaluation.f1,
                evaluation.coverage,
                if evaluation.passed { "pass" } else { "fail" },
            )?;
            if !evaluation.actions.is_empty() {
                let actions: Vec<&str> =
                    evaluation.actions.iter().map(|a| a.as_str()).collect();
                writeln!(out, "- proposed: {}", actions.join(", "))?;
            }
        }
        writeln!(out, "- iterations: {}", outcome.iterations)?;
        writeln!(out, "- tokens used: {}", outcome.tokens_used)?;
        if let Some(primary) = &outcome.primary_path {
            writeln!(out, "- primary: {primary}")?;
        }
        writeln!(out)?;
    }

    std::fs::write(&path, out).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
