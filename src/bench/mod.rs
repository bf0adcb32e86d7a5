pub mod report;

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// One retrieval task with its ground truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkTask {
    pub id: String,
    pub query: String,
    pub ground_truth: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidate_file_paths: Vec<String>,
}

/// A named set of tasks, grouped by family/variant for report naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkDataset {
    pub name: String,
    pub family: String,
    pub variant: String,
    pub tasks: Vec<BenchmarkTask>,
}

/// Load and validate a dataset file. Malformed JSON, an empty task list,
/// or a task without ground truth are configuration errors.
pub fn load_dataset(path: &Path) -> Result<BenchmarkDataset> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading dataset {}", path.display()))?;
    let dataset: BenchmarkDataset = serde_json::from_str(&raw)
        .with_context(|| format!("parsing dataset {}", path.display()))?;

    if dataset.tasks.is_empty() {
        bail!("dataset {} has no tasks", dataset.name);
    }
    for task in &dataset.tasks {
        if task.ground_truth.is_empty() {
            bail!("task {} is missing ground truth", task.id);
        }
    }
    Ok(dataset)
}
