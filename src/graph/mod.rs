pub mod edge;
pub mod node;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::{Result, anyhow};
use petgraph::Directed;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use edge::{Edge, EdgeKind};
use node::Node;

/// The in-memory code graph: a directed petgraph StableGraph with O(1)
/// lookup indexes by node id and by file path.
///
/// Node and edge records are immutable once upserted; mutation happens by
/// replacing whole records. Cloning yields an independent graph sharing no
/// index state with the original.
#[derive(Debug, Clone, Default)]
pub struct CodeGraph {
    graph: StableGraph<Node, Edge, Directed>,
    node_lookup: HashMap<String, NodeIndex>,
    edge_lookup: HashMap<String, EdgeIndex>,
    /// Maps project-relative paths to the ids of every node on that path.
    path_index: HashMap<String, BTreeSet<String>>,
}

impl CodeGraph {
    /// Create an empty code graph.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node_lookup.contains_key(id)
    }

    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.node_lookup.get(id).map(|&idx| &self.graph[idx])
    }

    /// Insert a node, replacing any existing node with the same id.
    pub fn add_node(&mut self, node: Node) {
        self.upsert_node(node);
    }

    /// Insert or replace a node by id.
    ///
    /// When replacing, the old path-index entry is removed before the new one
    /// is installed. Edges are never invalidated by an upsert: the record is
    /// swapped in place and endpoints keep their indices.
    pub fn upsert_node(&mut self, node: Node) {
        match self.node_lookup.get(&node.id) {
            Some(&idx) => {
                let old_path = self.graph[idx].path.clone();
                if let Some(ids) = self.path_index.get_mut(&old_path) {
                    ids.remove(&node.id);
                    if ids.is_empty() {
                        self.path_index.remove(&old_path);
                    }
                }
                self.path_index
                    .entry(node.path.clone())
                    .or_default()
                    .insert(node.id.clone());
                self.graph[idx] = node;
            }
            None => {
                self.path_index
                    .entry(node.path.clone())
                    .or_default()
                    .insert(node.id.clone());
                let id = node.id.clone();
                let idx = self.graph.add_node(node);
                self.node_lookup.insert(id, idx);
            }
        }
    }

    /// Add an edge between two existing nodes. Fails when either endpoint is
    /// absent. An edge with an already-known id replaces the prior record.
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        let from = *self
            .node_lookup
            .get(&edge.from)
            .ok_or_else(|| anyhow!("edge {} references missing source node {}", edge.id, edge.from))?;
        let to = *self
            .node_lookup
            .get(&edge.to)
            .ok_or_else(|| anyhow!("edge {} references missing target node {}", edge.id, edge.to))?;

        match self.edge_lookup.get(&edge.id) {
            Some(&eidx) => {
                self.graph[eidx] = edge;
            }
            None => {
                let id = edge.id.clone();
                let eidx = self.graph.add_edge(from, to, edge);
                self.edge_lookup.insert(id, eidx);
            }
        }
        Ok(())
    }

    /// Remove a node and every edge touching it. Returns `false` when the id
    /// is unknown.
    pub fn remove_node(&mut self, id: &str) -> bool {
        let Some(idx) = self.node_lookup.remove(id) else {
            return false;
        };

        // Drop incident edge ids before petgraph detaches them.
        let incident: Vec<String> = self
            .graph
            .edges_directed(idx, petgraph::Direction::Outgoing)
            .chain(self.graph.edges_directed(idx, petgraph::Direction::Incoming))
            .map(|e| e.weight().id.clone())
            .collect();
        for edge_id in incident {
            self.edge_lookup.remove(&edge_id);
        }

        if let Some(removed) = self.graph.remove_node(idx) {
            if let Some(ids) = self.path_index.get_mut(&removed.path) {
                ids.remove(id);
                if ids.is_empty() {
                    self.path_index.remove(&removed.path);
                }
            }
        }
        true
    }

    /// Remove an edge by id. Returns `false` when the id is unknown.
    pub fn remove_edge(&mut self, id: &str) -> bool {
        match self.edge_lookup.remove(id) {
            Some(eidx) => self.graph.remove_edge(eidx).is_some(),
            None => false,
        }
    }

    /// Remove every node recorded under `path` (and all their edges).
    pub fn remove_nodes_by_path(&mut self, path: &str) {
        let ids: Vec<String> = self
            .path_index
            .get(path)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        for id in ids {
            self.remove_node(&id);
        }
    }

    /// Nodes on a path, ordered by id for determinism.
    pub fn get_nodes_by_path(&self, path: &str) -> Vec<&Node> {
        self.path_index
            .get(path)
            .map(|ids| ids.iter().filter_map(|id| self.get_node(id)).collect())
            .unwrap_or_default()
    }

    /// All paths currently present in the graph.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.path_index.keys().map(String::as_str)
    }

    pub fn get_outgoing_edges(&self, id: &str) -> Vec<&Edge> {
        self.directed_edges(id, petgraph::Direction::Outgoing)
    }

    pub fn get_incoming_edges(&self, id: &str) -> Vec<&Edge> {
        self.directed_edges(id, petgraph::Direction::Incoming)
    }

    fn directed_edges(&self, id: &str, dir: petgraph::Direction) -> Vec<&Edge> {
        let Some(&idx) = self.node_lookup.get(id) else {
            return Vec::new();
        };
        let mut edges: Vec<&Edge> = self
            .graph
            .edges_directed(idx, dir)
            .map(|e| e.weight())
            .collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        edges
    }

    /// Outgoing neighbours of a node, optionally filtered by edge type.
    pub fn get_neighbors(&self, id: &str, kind: Option<EdgeKind>) -> Vec<&Node> {
        self.get_outgoing_edges(id)
            .into_iter()
            .filter(|e| kind.is_none_or(|k| e.kind == k))
            .filter_map(|e| self.get_node(&e.to))
            .collect()
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    pub fn all_edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph.edge_weights()
    }

    /// File nodes only.
    pub fn files(&self) -> Vec<&Node> {
        let mut files: Vec<&Node> = self.all_nodes().filter(|n| n.is_file()).collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    /// Rebuild the export index from nodes alone: `path#name → node id`.
    ///
    /// Every named symbol is indexed; when two symbols in one file share a
    /// name, an exported one wins, then the smaller id (deterministic).
    pub fn export_index(&self) -> HashMap<String, String> {
        let mut index: HashMap<String, (String, bool)> = HashMap::new();
        let mut symbols: Vec<&Node> = self.all_nodes().filter(|n| !n.is_file()).collect();
        symbols.sort_by(|a, b| a.id.cmp(&b.id));
        for sym in symbols {
            let key = node::export_key(&sym.path, &sym.name);
            match index.get(&key) {
                Some((_, true)) => {}
                Some((_, false)) if sym.meta.exported => {
                    index.insert(key, (sym.id.clone(), true));
                }
                Some(_) => {}
                None => {
                    index.insert(key, (sym.id.clone(), sym.meta.exported));
                }
            }
        }
        index.into_iter().map(|(k, (id, _))| (k, id)).collect()
    }
}

// ---------------------------------------------------------------------------
// Canonical JSON form
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct GraphJsonRef<'a> {
    nodes: Vec<&'a Node>,
    edges: Vec<&'a Edge>,
}

#[derive(Deserialize)]
struct GraphJsonOwned {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl Serialize for CodeGraph {
    /// Canonical form: `{nodes, edges}` sorted by id, so equal graphs always
    /// serialise to identical bytes regardless of insertion order.
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut nodes: Vec<&Node> = self.all_nodes().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut edges: Vec<&Edge> = self.all_edges().collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        GraphJsonRef { nodes, edges }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CodeGraph {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = GraphJsonOwned::deserialize(deserializer)?;
        let mut graph = CodeGraph::new();
        for node in raw.nodes {
            graph.upsert_node(node);
        }
        for edge in raw.edges {
            graph.add_edge(edge).map_err(D::Error::custom)?;
        }
        Ok(graph)
    }
}

impl PartialEq for CodeGraph {
    fn eq(&self, other: &Self) -> bool {
        let key = |g: &CodeGraph| -> (BTreeMap<String, Node>, BTreeMap<String, Edge>) {
            (
                g.all_nodes().map(|n| (n.id.clone(), n.clone())).collect(),
                g.all_edges().map(|e| (e.id.clone(), e.clone())).collect(),
            )
        };
        key(self) == key(other)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::node::{NodeKind, symbol_id};
    use super::*;

    fn symbol(path: &str, name: &str, start: usize, end: usize) -> Node {
        Node {
            id: symbol_id(path, NodeKind::Function, name, start, end, None),
            kind: NodeKind::Function,
            name: name.to_owned(),
            path: path.to_owned(),
            content: format!("function {name}() {{}}"),
            start_line: start,
            end_line: end,
            embedding: None,
            meta: Default::default(),
        }
    }

    #[test]
    fn test_add_edge_requires_both_endpoints() {
        let mut graph = CodeGraph::new();
        graph.add_node(Node::file("a.ts", "export {}"));
        let file_id = node::file_id("a.ts");
        let err = graph.add_edge(Edge::new(file_id.clone(), "missing", EdgeKind::Contains));
        assert!(err.is_err(), "edge to a missing node must fail");

        let sym = symbol("a.ts", "foo", 1, 2);
        let sym_id = sym.id.clone();
        graph.add_node(sym);
        graph
            .add_edge(Edge::new(file_id, sym_id, EdgeKind::Contains))
            .expect("edge between existing nodes should succeed");
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_remove_node_drops_incoming_and_outgoing_edges() {
        let mut graph = CodeGraph::new();
        let a = symbol("a.ts", "a", 1, 1);
        let b = symbol("a.ts", "b", 2, 2);
        let c = symbol("a.ts", "c", 3, 3);
        let (a_id, b_id, c_id) = (a.id.clone(), b.id.clone(), c.id.clone());
        graph.add_node(a);
        graph.add_node(b);
        graph.add_node(c);
        graph.add_edge(Edge::new(&a_id, &b_id, EdgeKind::Calls)).unwrap();
        graph.add_edge(Edge::new(&b_id, &c_id, EdgeKind::Calls)).unwrap();

        assert!(graph.remove_node(&b_id));
        assert_eq!(graph.edge_count(), 0, "both edges touched b and must go");
        assert!(graph.get_outgoing_edges(&a_id).is_empty());
        assert!(graph.get_incoming_edges(&c_id).is_empty());
    }

    #[test]
    fn test_upsert_preserves_edges() {
        let mut graph = CodeGraph::new();
        let a = symbol("a.ts", "a", 1, 1);
        let b = symbol("a.ts", "b", 2, 2);
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        graph.add_node(a.clone());
        graph.add_node(b);
        graph.add_edge(Edge::new(&a_id, &b_id, EdgeKind::Calls)).unwrap();

        let mut replacement = a;
        replacement.content = "function a() { return 1; }".into();
        graph.upsert_node(replacement);

        assert_eq!(graph.edge_count(), 1, "upsert must not invalidate edges");
        assert_eq!(
            graph.get_node(&a_id).unwrap().content,
            "function a() { return 1; }"
        );
    }

    #[test]
    fn test_path_index_tracks_removals() {
        let mut graph = CodeGraph::new();
        graph.add_node(Node::file("src/a.ts", "// a"));
        graph.add_node(symbol("src/a.ts", "foo", 1, 1));
        graph.add_node(Node::file("src/b.ts", "// b"));

        assert_eq!(graph.get_nodes_by_path("src/a.ts").len(), 2);
        graph.remove_nodes_by_path("src/a.ts");
        assert!(graph.get_nodes_by_path("src/a.ts").is_empty());
        assert_eq!(graph.node_count(), 1, "src/b.ts must survive");
    }

    #[test]
    fn test_json_roundtrip_is_exact() {
        let mut graph = CodeGraph::new();
        graph.add_node(Node::file("src/a.ts", "export function foo() {}"));
        let sym = symbol("src/a.ts", "foo", 1, 1);
        let sym_id = sym.id.clone();
        graph.add_node(sym);
        graph
            .add_edge(Edge::new(node::file_id("src/a.ts"), sym_id, EdgeKind::Contains))
            .unwrap();

        let json = serde_json::to_string(&graph).unwrap();
        let restored: CodeGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(graph, restored);
        // Canonical ordering: serialising the restored graph is byte-identical.
        assert_eq!(json, serde_json::to_string(&restored).unwrap());
    }

    #[test]
    fn test_export_index_prefers_exported_symbols() {
        let mut graph = CodeGraph::new();
        let hidden = symbol("src/a.ts", "foo", 1, 1);
        let mut public = symbol("src/a.ts", "foo", 10, 12);
        public.meta.exported = true;
        let public_id = public.id.clone();
        graph.add_node(hidden);
        graph.add_node(public);

        let index = graph.export_index();
        assert_eq!(index.get("src/a.ts#foo"), Some(&public_id));
    }

    #[test]
    fn test_clone_is_independent() {
        let mut graph = CodeGraph::new();
        graph.add_node(Node::file("a.ts", "// a"));
        let cloned = graph.clone();
        graph.remove_nodes_by_path("a.ts");
        assert_eq!(cloned.node_count(), 1, "clone must not observe later mutations");
        assert_eq!(graph.node_count(), 0);
    }
}
