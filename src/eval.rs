use std::collections::BTreeSet;

use serde::Serialize;

use crate::retrieval::retriever::DependencyContext;
use crate::retrieval::{Resolution, resolver::normalize_path};

/// Thresholds the evaluation agent scores against.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub precision_threshold: f32,
    pub recall_threshold: f32,
    /// Cap on k for precision@k; defaults to the candidate count.
    pub max_k: Option<usize>,
    pub coverage_threshold: f32,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            precision_threshold: 0.5,
            recall_threshold: 0.5,
            max_k: None,
            coverage_threshold: 0.85,
        }
    }
}

/// Remediation the agent proposes when an iteration misses its thresholds.
/// Applied monotonically to the pipeline's widening state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WideningAction {
    EnableCrossEncoder,
    IncreaseWalkDepth,
    ExpandRelated,
    IncreaseTokenBudget,
}

impl WideningAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WideningAction::EnableCrossEncoder => "enable_cross_encoder",
            WideningAction::IncreaseWalkDepth => "increase_walk_depth",
            WideningAction::ExpandRelated => "expand_related",
            WideningAction::IncreaseTokenBudget => "increase_token_budget",
        }
    }
}

/// One iteration's scores and proposed actions. The agent never raises.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub iteration: usize,
    pub k: usize,
    pub hits: usize,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
    pub coverage: f32,
    pub passed: bool,
    pub actions: Vec<WideningAction>,
}

/// Scores a resolution + context against ground truth and proposes how to
/// widen the next iteration on failure.
#[derive(Debug, Clone, Default)]
pub struct EvaluationAgent {
    config: EvalConfig,
}

impl EvaluationAgent {
    pub fn new(config: EvalConfig) -> Self {
        EvaluationAgent { config }
    }

    pub fn evaluate(
        &self,
        resolution: &Resolution,
        context: &DependencyContext,
        ground_truth: &BTreeSet<String>,
        iteration: usize,
    ) -> Evaluation {
        let truth: BTreeSet<String> = ground_truth.iter().map(|p| normalize_path(p)).collect();
        let candidate_count = resolution.candidates.len();

        let k = match candidate_count {
            0 => 0,
            count => self.config.max_k.unwrap_or(count).clamp(1, count),
        };
        let hits = resolution
            .candidates
            .iter()
            .take(k)
            .filter(|c| truth.contains(&c.path))
            .count();

        let precision = if k == 0 { 0.0 } else { hits as f32 / k as f32 };
        let recall = if truth.is_empty() {
            1.0
        } else {
            hits as f32 / truth.len() as f32
        };
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        let coverage = if context.telemetry.token_budget == 0 {
            0.0
        } else {
            context.tokens_used as f32 / context.telemetry.token_budget as f32
        };

        let mut actions: Vec<WideningAction> = Vec::new();
        fn propose(action: WideningAction, actions: &mut Vec<WideningAction>) {
            if !actions.contains(&action) {
                actions.push(action);
            }
        }

        if precision < self.config.precision_threshold {
            propose(WideningAction::EnableCrossEncoder, &mut actions);
            propose(WideningAction::IncreaseWalkDepth, &mut actions);
            propose(WideningAction::ExpandRelated, &mut actions);
            if precision < self.config.precision_threshold.min(0.4) {
                propose(WideningAction::IncreaseTokenBudget, &mut actions);
            }
        }
        if recall < self.config.recall_threshold {
            propose(WideningAction::IncreaseWalkDepth, &mut actions);
            propose(WideningAction::ExpandRelated, &mut actions);
        }
        if coverage > self.config.coverage_threshold {
            propose(WideningAction::IncreaseTokenBudget, &mut actions);
        }

        let passed = precision >= self.config.precision_threshold
            && recall >= self.config.recall_threshold;

        Evaluation {
            iteration,
            k,
            hits,
            precision,
            recall,
            f1,
            coverage,
            passed,
            actions,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::Candidate;
    use crate::retrieval::retriever::ContextTelemetry;

    fn resolution(paths: &[&str]) -> Resolution {
        Resolution {
            candidates: paths
                .iter()
                .map(|p| Candidate {
                    path: (*p).to_owned(),
                    score: 1.0,
                    ..Default::default()
                })
                .collect(),
        }
    }

    fn context(tokens_used: usize, budget: usize) -> DependencyContext {
        DependencyContext {
            target_nodes: Vec::new(),
            forward: Vec::new(),
            backward: Vec::new(),
            related: Vec::new(),
            formatted: String::new(),
            tokens_used,
            tokens_saved: 0,
            telemetry: ContextTelemetry {
                token_budget: budget,
                tokens_used,
                ..Default::default()
            },
        }
    }

    fn truth(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| (*p).to_string()).collect()
    }

    #[test]
    fn test_perfect_retrieval_passes() {
        let agent = EvaluationAgent::default();
        let eval = agent.evaluate(
            &resolution(&["src/auth.ts", "src/login.ts"]),
            &context(3000, 6000),
            &truth(&["src/auth.ts", "src/login.ts"]),
            1,
        );
        assert_eq!(eval.precision, 1.0);
        assert_eq!(eval.recall, 1.0);
        assert!(eval.passed);
        assert!(eval.actions.is_empty());
        assert!((eval.f1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_metrics_stay_in_unit_interval() {
        let agent = EvaluationAgent::default();
        let eval = agent.evaluate(
            &resolution(&["a.ts", "b.ts", "c.ts"]),
            &context(5000, 6000),
            &truth(&["a.ts", "zzz.ts"]),
            1,
        );
        assert!((0.0..=1.0).contains(&eval.precision));
        assert!((0.0..=1.0).contains(&eval.recall));
    }

    #[test]
    fn test_low_precision_proposes_widening_set() {
        let agent = EvaluationAgent::new(EvalConfig {
            precision_threshold: 0.95,
            recall_threshold: 1.0,
            ..Default::default()
        });
        let eval = agent.evaluate(
            &resolution(&["a.ts", "x.ts", "y.ts", "z.ts"]),
            &context(1000, 6000),
            &truth(&["a.ts", "b.ts", "c.ts", "d.ts"]),
            1,
        );
        assert!(!eval.passed);
        assert!(eval.actions.contains(&WideningAction::EnableCrossEncoder));
        assert!(eval.actions.contains(&WideningAction::IncreaseWalkDepth));
        assert!(eval.actions.contains(&WideningAction::ExpandRelated));
        // precision 0.25 < min(0.4, 0.95)
        assert!(eval.actions.contains(&WideningAction::IncreaseTokenBudget));
    }

    #[test]
    fn test_low_recall_alone_proposes_walk_and_related() {
        let agent = EvaluationAgent::new(EvalConfig {
            precision_threshold: 0.2,
            recall_threshold: 0.9,
            max_k: Some(1),
            ..Default::default()
        });
        let eval = agent.evaluate(
            &resolution(&["a.ts"]),
            &context(1000, 6000),
            &truth(&["a.ts", "b.ts", "c.ts"]),
            1,
        );
        assert!(!eval.passed, "recall 1/3 misses the 0.9 threshold");
        assert_eq!(
            eval.actions,
            vec![WideningAction::IncreaseWalkDepth, WideningAction::ExpandRelated]
        );
    }

    #[test]
    fn test_high_coverage_requests_budget() {
        let agent = EvaluationAgent::new(EvalConfig {
            precision_threshold: 0.0,
            recall_threshold: 0.0,
            coverage_threshold: 0.5,
            ..Default::default()
        });
        let eval = agent.evaluate(
            &resolution(&["a.ts"]),
            &context(5900, 6000),
            &truth(&["a.ts"]),
            1,
        );
        assert!(eval.passed, "thresholds at zero always pass");
        assert_eq!(eval.actions, vec![WideningAction::IncreaseTokenBudget]);
    }

    #[test]
    fn test_empty_ground_truth_has_full_recall() {
        let agent = EvaluationAgent::default();
        let eval = agent.evaluate(
            &resolution(&["a.ts"]),
            &context(100, 6000),
            &BTreeSet::new(),
            1,
        );
        assert_eq!(eval.recall, 1.0);
    }

    #[test]
    fn test_empty_resolution_never_panics() {
        let agent = EvaluationAgent::default();
        let eval = agent.evaluate(
            &Resolution::empty(),
            &context(0, 6000),
            &truth(&["a.ts"]),
            1,
        );
        assert_eq!(eval.k, 0);
        assert_eq!(eval.precision, 0.0);
        assert!(!eval.passed);
    }

    #[test]
    fn test_max_k_clamps_to_candidate_count() {
        let agent = EvaluationAgent::new(EvalConfig {
            max_k: Some(50),
            ..Default::default()
        });
        let eval = agent.evaluate(
            &resolution(&["a.ts", "b.ts"]),
            &context(100, 6000),
            &truth(&["a.ts"]),
            1,
        );
        assert_eq!(eval.k, 2);
    }
}
