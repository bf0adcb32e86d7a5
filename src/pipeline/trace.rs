use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Ok,
    Error,
}

/// One pipeline stage: name, timing, outcome, and optional metadata the
/// stage chose to attach.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub node: String,
    /// Milliseconds since the epoch at dispatch.
    pub started_at: u64,
    pub duration_ms: u64,
    pub status: TraceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ordered, structured record of a pipeline run. Observability here is a
/// data concern: callers decide how (and whether) to render it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Trace {
    pub entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new() -> Self {
        Trace::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.node.as_str()).collect()
    }

    pub fn has_error(&self) -> bool {
        self.entries.iter().any(|e| e.status == TraceStatus::Error)
    }

    /// Run a stage, recording timing and outcome. The stage returns its
    /// value plus optional metadata; an error is captured into the entry
    /// and propagated.
    pub fn record<T>(
        &mut self,
        node: &str,
        stage: impl FnOnce() -> Result<(T, Option<serde_json::Value>)>,
    ) -> Result<T> {
        let started_at = epoch_millis();
        let clock = Instant::now();
        match stage() {
            Ok((value, metadata)) => {
                self.entries.push(TraceEntry {
                    node: node.to_owned(),
                    started_at,
                    duration_ms: clock.elapsed().as_millis() as u64,
                    status: TraceStatus::Ok,
                    metadata,
                    error: None,
                });
                Ok(value)
            }
            Err(error) => {
                self.entries.push(TraceEntry {
                    node: node.to_owned(),
                    started_at,
                    duration_ms: clock.elapsed().as_millis() as u64,
                    status: TraceStatus::Error,
                    metadata: None,
                    error: Some(format!("{error:#}")),
                });
                Err(error)
            }
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_entries_record_in_dispatch_order() {
        let mut trace = Trace::new();
        trace.record("graph.load", || Ok(((), None))).unwrap();
        trace
            .record("components.build", || Ok(((), Some(serde_json::json!({"n": 1})))))
            .unwrap();
        assert_eq!(trace.node_names(), vec!["graph.load", "components.build"]);
        assert!(!trace.has_error());
        assert!(trace.entries[1].metadata.is_some());
    }

    #[test]
    fn test_error_is_captured_and_propagated() {
        let mut trace = Trace::new();
        let result: Result<()> = trace.record("context.build", || Err(anyhow!("budget exhausted")));
        assert!(result.is_err());
        assert!(trace.has_error());
        let entry = &trace.entries[0];
        assert_eq!(entry.status, TraceStatus::Error);
        assert!(entry.error.as_deref().unwrap().contains("budget exhausted"));
    }

    #[test]
    fn test_trace_serialises_to_json() {
        let mut trace = Trace::new();
        trace.record("graph.load", || Ok((42usize, None))).unwrap();
        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["entries"][0]["node"], "graph.load");
        assert_eq!(json["entries"][0]["status"], "ok");
    }
}
