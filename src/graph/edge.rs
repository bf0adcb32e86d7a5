use serde::{Deserialize, Serialize};

/// The type of a relationship between two graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// File contains symbol, or parent symbol contains nested symbol.
    Contains,
    /// Importing file/symbol depends on the imported file/symbol.
    Imports,
    /// Caller invokes callee.
    Calls,
    /// Non-call identifier reference (type annotation, value mention).
    References,
    /// Class extends class.
    Extends,
    /// Class implements interface.
    Implements,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Contains => "contains",
            EdgeKind::Imports => "imports",
            EdgeKind::Calls => "calls",
            EdgeKind::References => "references",
            EdgeKind::Extends => "extends",
            EdgeKind::Implements => "implements",
        }
    }
}

/// Attribute bag carried by an edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeMeta {
    /// Import specifier as written in source (imports edges).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specifier: Option<String>,
    /// 1-based source line of the reference site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

/// A typed, identified edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Deterministic identity derived from (from, to, type).
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    #[serde(default)]
    pub meta: EdgeMeta,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: EdgeKind) -> Self {
        let from = from.into();
        let to = to.into();
        Edge {
            id: edge_id(&from, &to, kind),
            from,
            to,
            kind,
            meta: EdgeMeta::default(),
        }
    }

    pub fn with_meta(mut self, meta: EdgeMeta) -> Self {
        self.meta = meta;
        self
    }
}

/// Deterministic edge id. Two edges with the same endpoints and type are
/// the same edge.
pub fn edge_id(from: &str, to: &str, kind: EdgeKind) -> String {
    format!(
        "e_{}",
        &blake3::hash(format!("{from}\u{1}{to}\u{1}{}", kind.as_str()).as_bytes()).to_hex()[..16]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_id_is_type_sensitive() {
        let calls = Edge::new("a", "b", EdgeKind::Calls);
        let imports = Edge::new("a", "b", EdgeKind::Imports);
        assert_ne!(calls.id, imports.id);
        assert_eq!(calls.id, Edge::new("a", "b", EdgeKind::Calls).id);
    }

    #[test]
    fn test_edge_json_roundtrip() {
        let edge = Edge::new("a", "b", EdgeKind::Imports).with_meta(EdgeMeta {
            specifier: Some("./b".into()),
            line: Some(3),
        });
        let json = serde_json::to_string(&edge).unwrap();
        let back: Edge = serde_json::from_str(&json).unwrap();
        assert_eq!(edge, back);
    }
}
