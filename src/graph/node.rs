use serde::{Deserialize, Serialize};

/// The type of a node in the code graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A source file.
    File,
    /// A function declaration (including arrow-function constants and methods).
    Function,
    /// A class declaration.
    Class,
    /// An import statement.
    Import,
}

impl NodeKind {
    /// Stable lowercase name used in id derivation and formatted output.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Function => "function",
            NodeKind::Class => "class",
            NodeKind::Import => "import",
        }
    }
}

/// Attribute bag carried by every node. All fields are optional; absent
/// fields are omitted from the graph JSON so round-trips are exact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMeta {
    /// Whether the symbol is reachable from an enclosing export statement.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exported: bool,
    /// Finer-grained symbol kind: "arrow_function", "method", "generator", ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Raw tree-sitter node kind the symbol was extracted from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ast_type: Option<String>,
    /// Name of the containing class/function, for nested symbols.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    /// Type of the containing symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_kind: Option<NodeKind>,
    /// Declaration signature line, e.g. `function authenticate(user: User): Token`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Parameter names in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
    /// Declared return type, when the language surfaces one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    /// Documentation from comments adjacent to the declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    /// Text the embedding was computed from (signature + docs + content head).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_text: Option<String>,
    /// Content digest of the enclosing file at extraction time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Retrieval category tag (target/forward/backward/related); set on the
    /// copies a DependencyContext hands out, never on graph-resident nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// A node in the code graph: a file, or a symbol extracted from one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Stable content-derived identity (see [`file_id`] / [`symbol_id`]).
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub name: String,
    /// Project-relative path with forward slashes.
    pub path: String,
    /// Source text of the node (whole file for file nodes).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    /// 1-based inclusive start line.
    pub start_line: usize,
    /// 1-based inclusive end line.
    pub end_line: usize,
    /// Dense embedding over `meta.embedding_text`; absent when embeddings
    /// are disabled or the embedder returned an empty vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub meta: NodeMeta,
}

impl Node {
    /// Construct a file node for `path` holding the full source text.
    pub fn file(path: &str, content: &str) -> Self {
        let end_line = content.lines().count().max(1);
        Node {
            id: file_id(path),
            kind: NodeKind::File,
            name: file_name(path).to_owned(),
            path: path.to_owned(),
            content: content.to_owned(),
            start_line: 1,
            end_line,
            embedding: None,
            meta: NodeMeta::default(),
        }
    }

    /// Number of source lines the node spans (at least 1).
    pub fn line_span(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }
}

/// Last path component, used as the display name of file nodes.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn digest16(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex()[..16].to_string()
}

/// Deterministic id for a file node. Re-parsing the same path yields the
/// same id regardless of content.
pub fn file_id(path: &str) -> String {
    format!("f_{}", digest16(&format!("file\u{1}{path}")))
}

/// Deterministic id for a symbol node, derived from the declaring path,
/// node type, name, line range, and finer-grained kind.
pub fn symbol_id(
    path: &str,
    kind: NodeKind,
    name: &str,
    start_line: usize,
    end_line: usize,
    meta_kind: Option<&str>,
) -> String {
    format!(
        "s_{}",
        digest16(&format!(
            "{path}\u{1}{}\u{1}{name}\u{1}{start_line}-{end_line}\u{1}{}",
            kind.as_str(),
            meta_kind.unwrap_or("")
        ))
    )
}

/// Key into the export index: `path#name`.
pub fn export_key(path: &str, name: &str) -> String {
    format!("{path}#{name}")
}

/// Placeholder id for a cross-file edge target that is not yet known at
/// snapshot time. Encodes (target file path, symbol name) so the builder's
/// resolve pass can swap it for the real node id via the export index.
pub fn placeholder_id(target_path: &str, name: &str) -> String {
    format!("p\u{1}{target_path}#{name}")
}

/// Parse a placeholder id back into (target path, symbol name).
pub fn parse_placeholder(id: &str) -> Option<(&str, &str)> {
    id.strip_prefix("p\u{1}")?.rsplit_once('#')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_is_stable() {
        assert_eq!(file_id("src/auth.ts"), file_id("src/auth.ts"));
        assert_ne!(file_id("src/auth.ts"), file_id("src/login.ts"));
    }

    #[test]
    fn test_symbol_id_depends_on_line_range() {
        let a = symbol_id("src/auth.ts", NodeKind::Function, "login", 1, 10, None);
        let b = symbol_id("src/auth.ts", NodeKind::Function, "login", 2, 11, None);
        assert_ne!(a, b, "moving a symbol must produce a new id");
    }

    #[test]
    fn test_placeholder_roundtrip() {
        let id = placeholder_id("src/auth.ts", "authenticateUser");
        let (path, name) = parse_placeholder(&id).expect("placeholder should parse");
        assert_eq!(path, "src/auth.ts");
        assert_eq!(name, "authenticateUser");
        assert!(parse_placeholder("s_deadbeef").is_none());
    }

    #[test]
    fn test_line_span_never_zero() {
        let mut node = Node::file("a.ts", "");
        node.start_line = 5;
        node.end_line = 5;
        assert_eq!(node.line_span(), 1);
    }

    #[test]
    fn test_node_json_roundtrip_preserves_meta() {
        let mut node = Node::file("src/a.ts", "export const x = 1;\n");
        node.meta.exported = true;
        node.meta.signature = Some("const x = 1".into());
        let json = serde_json::to_string(&node).unwrap();
        let back: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(node, back);
    }
}
