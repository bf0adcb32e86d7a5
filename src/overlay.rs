use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::graph::CodeGraph;
use crate::graph::edge::Edge;
use crate::graph::node::Node;

/// The three operation types an overlay records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayOpKind {
    Add,
    Remove,
    Modify,
}

/// A single pending mutation. Exactly one of the payload fields is set,
/// matching the operation type: `node`/`edge` for add and modify,
/// `node_id`/`edge_id` for remove.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayOp {
    #[serde(rename = "type")]
    pub kind: OverlayOpKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<Edge>,
    /// Free-form context; the manager records the originating path here so
    /// `clear_path` can drop remove-ops too.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Milliseconds since the epoch at recording time.
    pub timestamp: u64,
}

impl OverlayOp {
    fn stamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn path_meta(path: &str) -> Option<serde_json::Value> {
        Some(serde_json::json!({ "path": path }))
    }

    /// The path this operation touches, if recorded.
    fn touched_path(&self) -> Option<&str> {
        if let Some(node) = &self.node {
            return Some(&node.path);
        }
        self.metadata
            .as_ref()
            .and_then(|m| m.get("path"))
            .and_then(|p| p.as_str())
    }
}

/// An ordered, append-only log of pending graph mutations layered atop a
/// base-graph snapshot. Applying an overlay never mutates the base graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphOverlay {
    pub id: String,
    /// Snapshot id of the base graph this overlay was opened against.
    pub base_graph_snapshot: String,
    pub operations: Vec<OverlayOp>,
    pub modified_paths: BTreeSet<String>,
}

impl GraphOverlay {
    /// Open an overlay against a base graph snapshot.
    pub fn new(base_graph_snapshot: String) -> Self {
        let id = format!(
            "ov_{}",
            &blake3::hash(format!("{base_graph_snapshot}\u{1}{}", OverlayOp::stamp()).as_bytes())
                .to_hex()[..12]
        );
        GraphOverlay {
            id,
            base_graph_snapshot,
            operations: Vec::new(),
            modified_paths: BTreeSet::new(),
        }
    }

    /// An overlay is empty iff its operation list is empty.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn record_add_node(&mut self, node: Node) {
        self.modified_paths.insert(node.path.clone());
        self.operations.push(OverlayOp {
            kind: OverlayOpKind::Add,
            node_id: Some(node.id.clone()),
            edge_id: None,
            node: Some(node),
            edge: None,
            metadata: None,
            timestamp: OverlayOp::stamp(),
        });
    }

    /// Record a modification; semantically an upsert of the provided node.
    pub fn record_modify_node(&mut self, node: Node) {
        self.modified_paths.insert(node.path.clone());
        self.operations.push(OverlayOp {
            kind: OverlayOpKind::Modify,
            node_id: Some(node.id.clone()),
            edge_id: None,
            node: Some(node),
            edge: None,
            metadata: None,
            timestamp: OverlayOp::stamp(),
        });
    }

    pub fn record_remove_node(&mut self, node_id: &str, path: &str) {
        self.modified_paths.insert(path.to_owned());
        self.operations.push(OverlayOp {
            kind: OverlayOpKind::Remove,
            node_id: Some(node_id.to_owned()),
            edge_id: None,
            node: None,
            edge: None,
            metadata: OverlayOp::path_meta(path),
            timestamp: OverlayOp::stamp(),
        });
    }

    pub fn record_add_edge(&mut self, edge: Edge, path: &str) {
        self.modified_paths.insert(path.to_owned());
        self.operations.push(OverlayOp {
            kind: OverlayOpKind::Add,
            node_id: None,
            edge_id: Some(edge.id.clone()),
            node: None,
            edge: Some(edge),
            metadata: OverlayOp::path_meta(path),
            timestamp: OverlayOp::stamp(),
        });
    }

    pub fn record_remove_edge(&mut self, edge_id: &str, path: &str) {
        self.modified_paths.insert(path.to_owned());
        self.operations.push(OverlayOp {
            kind: OverlayOpKind::Remove,
            node_id: None,
            edge_id: Some(edge_id.to_owned()),
            node: None,
            edge: None,
            metadata: OverlayOp::path_meta(path),
            timestamp: OverlayOp::stamp(),
        });
    }

    /// Drop every pending operation touching `path`. Used when a file is
    /// re-recorded into the overlay and must replace its older deltas.
    pub fn clear_path(&mut self, path: &str) {
        self.operations
            .retain(|op| op.touched_path() != Some(path));
    }

    /// Apply the operation log to `base`, producing a new graph. The base
    /// graph is untouched; readers holding it observe nothing.
    ///
    /// `add` and `modify` both upsert their payload (a conservative reading
    /// of the overlapping semantics); `remove` deletes by id and tolerates
    /// already-absent targets.
    pub fn apply(&self, base: &CodeGraph) -> Result<CodeGraph> {
        let mut graph = base.clone();
        for op in &self.operations {
            match op.kind {
                OverlayOpKind::Add | OverlayOpKind::Modify => {
                    if let Some(node) = &op.node {
                        graph.upsert_node(node.clone());
                    }
                    if let Some(edge) = &op.edge {
                        graph.add_edge(edge.clone())?;
                    }
                }
                OverlayOpKind::Remove => {
                    if let Some(node_id) = &op.node_id {
                        graph.remove_node(node_id);
                    }
                    if let Some(edge_id) = &op.edge_id {
                        graph.remove_edge(edge_id);
                    }
                }
            }
        }
        Ok(graph)
    }
}

/// Content-derived snapshot id of a graph: the hash of its canonical JSON.
pub fn graph_snapshot_id(graph: &CodeGraph) -> String {
    let json = serde_json::to_string(graph).unwrap_or_default();
    format!("g_{}", &blake3::hash(json.as_bytes()).to_hex()[..16])
}
