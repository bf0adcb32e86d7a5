use std::path::Path;

use serde::Deserialize;

use crate::pipeline::PipelineConfig;
use crate::retrieval::resolver::{IntentBoost, default_intent_boosts};

/// Retrieval tuning parsed from the `[retrieval]` section.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalSection {
    /// Candidate-file limit for the resolver (default: 10).
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Query-intent path boosts. Omitting the table keeps the built-in
    /// auth/ui/test patterns.
    #[serde(default)]
    pub intent_boosts: Option<Vec<IntentBoostSection>>,
}

fn default_limit() -> usize {
    10
}

impl Default for RetrievalSection {
    fn default() -> Self {
        RetrievalSection {
            limit: default_limit(),
            intent_boosts: None,
        }
    }
}

/// One configured intent boost.
#[derive(Debug, Deserialize, Clone)]
pub struct IntentBoostSection {
    pub keywords: Vec<String>,
    pub path_pattern: String,
    pub boost: f32,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Pipeline thresholds and widening bounds from the `[pipeline]` section.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default = "default_precision")]
    pub precision_threshold: f32,
    #[serde(default = "default_recall")]
    pub recall_threshold: f32,
    #[serde(default = "default_coverage")]
    pub coverage_threshold: f32,
}

fn default_max_iterations() -> usize {
    2
}
fn default_token_budget() -> usize {
    6_000
}
fn default_precision() -> f32 {
    0.5
}
fn default_recall() -> f32 {
    0.5
}
fn default_coverage() -> f32 {
    0.85
}

impl Default for PipelineSection {
    fn default() -> Self {
        PipelineSection {
            max_iterations: default_max_iterations(),
            token_budget: default_token_budget(),
            precision_threshold: default_precision(),
            recall_threshold: default_recall(),
            coverage_threshold: default_coverage(),
        }
    }
}

/// Embedding knobs from the `[embeddings]` section. The
/// `EMBEDDINGS_DISABLED` environment switch overrides `disabled = false`.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingsSection {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

fn default_dimension() -> usize {
    256
}

impl Default for EmbeddingsSection {
    fn default() -> Self {
        EmbeddingsSection {
            disabled: false,
            dimension: default_dimension(),
        }
    }
}

/// Configuration loaded from `code-context.toml` at the project root.
#[derive(Debug, Deserialize, Default)]
pub struct CodeContextConfig {
    #[serde(default)]
    pub retrieval: RetrievalSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub embeddings: EmbeddingsSection,
}

impl CodeContextConfig {
    /// Load configuration from `code-context.toml` in the given root.
    ///
    /// Returns defaults when the file is absent or unparsable (with a
    /// stderr warning for the latter).
    pub fn load(root: &Path) -> Self {
        let config_path = root.join("code-context.toml");
        if !config_path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("warning: failed to parse code-context.toml: {err}. Using defaults.");
                    Self::default()
                }
            },
            Err(err) => {
                eprintln!("warning: failed to read code-context.toml: {err}. Using defaults.");
                Self::default()
            }
        }
    }

    /// The resolver's intent-boost table: configured entries, or the
    /// built-in defaults.
    pub fn intent_boosts(&self) -> Vec<IntentBoost> {
        match &self.retrieval.intent_boosts {
            Some(sections) => sections
                .iter()
                .map(|s| IntentBoost {
                    keywords: s.keywords.clone(),
                    path_pattern: s.path_pattern.clone(),
                    boost: s.boost,
                    reason: s
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("Intent boost: {}", s.path_pattern)),
                })
                .collect(),
            None => default_intent_boosts(),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_iterations: self.pipeline.max_iterations,
            resolver_limit: self.retrieval.limit,
            token_budget: self.pipeline.token_budget,
            precision_threshold: self.pipeline.precision_threshold,
            recall_threshold: self.pipeline.recall_threshold,
            max_k: None,
            coverage_threshold: self.pipeline.coverage_threshold,
            force_rebuild: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_config(toml_str: &str) -> CodeContextConfig {
        toml::from_str(toml_str).expect("TOML should parse without error")
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse_config("");
        assert_eq!(cfg.retrieval.limit, 10);
        assert_eq!(cfg.pipeline.max_iterations, 2);
        assert_eq!(cfg.pipeline.token_budget, 6_000);
        assert!(!cfg.embeddings.disabled);
        assert_eq!(cfg.embeddings.dimension, 256);
        assert_eq!(cfg.intent_boosts().len(), 3, "built-in boost table applies");
    }

    #[test]
    fn test_partial_sections_respected() {
        let cfg = parse_config(
            r#"
[pipeline]
max_iterations = 4
precision_threshold = 0.8

[embeddings]
dimension = 128
"#,
        );
        assert_eq!(cfg.pipeline.max_iterations, 4);
        assert_eq!(cfg.pipeline.recall_threshold, 0.5, "unset fields stay default");
        assert_eq!(cfg.embeddings.dimension, 128);
    }

    #[test]
    fn test_configured_intent_boosts_replace_defaults() {
        let cfg = parse_config(
            r#"
[[retrieval.intent_boosts]]
keywords = ["billing", "invoice"]
path_pattern = "src/billing/"
boost = 3.0
"#,
        );
        let boosts = cfg.intent_boosts();
        assert_eq!(boosts.len(), 1);
        assert_eq!(boosts[0].path_pattern, "src/billing/");
        assert_eq!(boosts[0].boost, 3.0);
    }

    #[test]
    fn test_load_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CodeContextConfig::load(dir.path());
        assert_eq!(cfg.retrieval.limit, 10);
    }

    #[test]
    fn test_invalid_type_fails_parse() {
        let result = toml::from_str::<CodeContextConfig>("[retrieval]\nlimit = \"ten\"");
        assert!(result.is_err(), "load() falls back to defaults on this error");
    }
}
