use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Dependency-aware context retrieval for coding assistants.
///
/// code-context indexes a codebase into a symbol graph, finds the files a
/// change request touches, and packs the code an assistant must see —
/// dependents first — under a token budget.
#[derive(Parser, Debug)]
#[command(
    name = "code-context",
    version,
    about,
    long_about = None,
    propagate_version = true,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index a project directory, discovering and parsing all source files.
    Index {
        /// Path to the project root to index.
        path: PathBuf,

        /// Output results as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,

        /// Dump the canonical graph JSON to stdout instead of a summary.
        #[arg(long)]
        dump_graph: bool,
    },

    /// Resolve a change request into ranked candidate files.
    Resolve {
        /// Natural-language change request.
        query: String,

        /// Path to the project root to index and query.
        path: PathBuf,

        /// Maximum candidate files to return.
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Output results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Build a dependency-aware context for a change request.
    ///
    /// Prints the packed context: target code, dependents, dependencies,
    /// and related code, within the token budget.
    Context {
        /// Natural-language change request.
        query: String,

        /// Path to the project root to index and query.
        path: PathBuf,

        /// Explicit target file (overrides resolution).
        #[arg(long)]
        target: Option<String>,

        /// Token budget (clamped to 6000..=12000).
        #[arg(long, default_value_t = 6000)]
        budget: usize,

        /// Print telemetry JSON instead of the packed context.
        #[arg(long)]
        json: bool,
    },

    /// Run the full evaluation pipeline against an inline ground truth.
    Run {
        /// Natural-language change request.
        query: String,

        /// Path to the project root.
        path: PathBuf,

        /// Ground-truth relevant paths (comma-separated, project-relative).
        #[arg(long, value_delimiter = ',')]
        ground_truth: Vec<String>,

        /// Explicit target file.
        #[arg(long)]
        target: Option<String>,

        /// Precision threshold override.
        #[arg(long)]
        precision: Option<f32>,

        /// Recall threshold override.
        #[arg(long)]
        recall: Option<f32>,

        /// Maximum widening iterations.
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Output the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run a benchmark dataset and write a markdown report under
    /// .benchmark-artifacts/.
    Bench {
        /// Path to the dataset JSON file.
        dataset: PathBuf,

        /// Path to the project root the tasks run against.
        path: PathBuf,
    },

    /// Watch for file changes and fold them into a pending overlay.
    ///
    /// Prints overlay transitions; changed files are re-snapshotted and
    /// layered over the base graph without a full rebuild.
    Watch {
        /// Path to the project root to watch.
        path: PathBuf,
    },

    /// Start an MCP stdio server exposing retrieval tools.
    Mcp {
        /// Path to the project root (defaults to current directory).
        path: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_resolve_parses_with_defaults() {
        let cli = Cli::parse_from(["code-context", "resolve", "fix login", "."]);
        match cli.command {
            Commands::Resolve { query, limit, json, .. } => {
                assert_eq!(query, "fix login");
                assert_eq!(limit, 10);
                assert!(!json);
            }
            _ => panic!("expected Resolve command"),
        }
    }

    #[test]
    fn test_run_ground_truth_is_comma_separated() {
        let cli = Cli::parse_from([
            "code-context",
            "run",
            "refactor auth",
            ".",
            "--ground-truth",
            "src/auth.ts,src/login.ts",
        ]);
        match cli.command {
            Commands::Run { ground_truth, .. } => {
                assert_eq!(ground_truth, vec!["src/auth.ts", "src/login.ts"]);
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn test_context_budget_default() {
        let cli = Cli::parse_from(["code-context", "context", "q", "."]);
        match cli.command {
            Commands::Context { budget, target, .. } => {
                assert_eq!(budget, 6000);
                assert!(target.is_none());
            }
            _ => panic!("expected Context command"),
        }
    }

    #[test]
    fn test_mcp_path_is_optional() {
        let cli = Cli::parse_from(["code-context", "mcp"]);
        match cli.command {
            Commands::Mcp { path } => assert!(path.is_none()),
            _ => panic!("expected Mcp command"),
        }
    }
}
