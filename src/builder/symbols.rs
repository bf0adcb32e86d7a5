use std::sync::OnceLock;

use tree_sitter::{Language, Node, Query, QueryCursor, StreamingIterator, Tree};

use super::languages::{LangGroup, language_for_group};
use crate::graph::node::NodeKind;

// ---------------------------------------------------------------------------
// Query strings
// ---------------------------------------------------------------------------

/// Symbol query for the TypeScript and TSX grammars (compiled per grammar —
/// a query built for one cannot run on the other's trees).
const SYMBOL_QUERY_TS: &str = r#"
    ; Top-level function declarations
    (function_declaration
      name: (identifier) @name) @function

    ; Class declarations
    (class_declaration
      name: (type_identifier) @name) @class

    ; Interface declarations
    (interface_declaration
      name: (type_identifier) @name) @interface

    ; Class methods
    (method_definition
      name: (property_identifier) @name) @method

    ; Exported arrow-function constants: export const foo = () => {}
    (export_statement
      (lexical_declaration
        (variable_declarator
          name: (identifier) @name
          value: (arrow_function))) @arrow)

    ; Top-level non-exported arrow-function constants
    (program
      (lexical_declaration
        (variable_declarator
          name: (identifier) @name
          value: (arrow_function))) @arrow)
"#;

/// Symbol query for JavaScript. No interfaces; class names are plain
/// identifiers.
const SYMBOL_QUERY_JS: &str = r#"
    (function_declaration
      name: (identifier) @name) @function

    (class_declaration
      name: (identifier) @name) @class

    (method_definition
      name: (property_identifier) @name) @method

    (export_statement
      (lexical_declaration
        (variable_declarator
          name: (identifier) @name
          value: (arrow_function))) @arrow)

    (program
      (lexical_declaration
        (variable_declarator
          name: (identifier) @name
          value: (arrow_function))) @arrow)
"#;

/// Symbol query for Python. Methods are function definitions nested in a
/// class body and are told apart by ancestor walk, not by pattern.
const SYMBOL_QUERY_PY: &str = r#"
    (function_definition
      name: (identifier) @name) @function

    (class_definition
      name: (identifier) @name) @class
"#;

// ---------------------------------------------------------------------------
// Query cache (compiled once per grammar via OnceLock)
// ---------------------------------------------------------------------------

static TS_QUERY: OnceLock<Query> = OnceLock::new();
static TSX_QUERY: OnceLock<Query> = OnceLock::new();
static JS_QUERY: OnceLock<Query> = OnceLock::new();
static PY_QUERY: OnceLock<Query> = OnceLock::new();

fn symbol_query(group: LangGroup) -> &'static Query {
    let (cell, text) = match group {
        LangGroup::TypeScript => (&TS_QUERY, SYMBOL_QUERY_TS),
        LangGroup::Tsx => (&TSX_QUERY, SYMBOL_QUERY_TS),
        LangGroup::JavaScript => (&JS_QUERY, SYMBOL_QUERY_JS),
        LangGroup::Python => (&PY_QUERY, SYMBOL_QUERY_PY),
    };
    cell.get_or_init(|| {
        let language: Language = language_for_group(group);
        Query::new(&language, text)
            .unwrap_or_else(|e| panic!("invalid {} symbol query: {e}", group.as_str()))
    })
}

// ---------------------------------------------------------------------------
// Extraction output
// ---------------------------------------------------------------------------

/// A symbol as it comes off the syntax tree, before node-id assignment.
#[derive(Debug, Clone)]
pub struct RawSymbol {
    pub name: String,
    pub kind: NodeKind,
    /// Finer-grained kind: "arrow_function", "method", "interface".
    pub meta_kind: Option<String>,
    /// tree-sitter node kind the symbol was extracted from.
    pub ast_type: String,
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub exported: bool,
    pub parent_name: Option<String>,
    pub parent_kind: Option<NodeKind>,
    pub signature: String,
    pub parameters: Vec<String>,
    pub return_type: Option<String>,
    pub documentation: Option<String>,
}

/// Extract all function, class, and interface symbols from a parsed tree.
///
/// Deduplication key is `(name, start row)` so a node matched by more than
/// one query pattern appears once.
pub fn extract_symbols(tree: &Tree, source: &[u8], group: LangGroup) -> Vec<RawSymbol> {
    let query = symbol_query(group);
    let name_idx = query
        .capture_index_for_name("name")
        .expect("symbol query must capture @name");

    let mut symbols: Vec<RawSymbol> = Vec::new();
    let mut seen: std::collections::HashSet<(String, usize)> = std::collections::HashSet::new();

    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, tree.root_node(), source);
    while let Some(m) = matches.next() {
        let mut name_node: Option<Node> = None;
        let mut symbol_node: Option<Node> = None;
        let mut tag: &str = "";

        for capture in m.captures {
            if capture.index == name_idx {
                name_node = Some(capture.node);
            } else {
                symbol_node = Some(capture.node);
                tag = query.capture_names()[capture.index as usize];
            }
        }

        let (Some(name_node), Some(symbol_node)) = (name_node, symbol_node) else {
            continue;
        };
        let name = node_text(name_node, source).to_owned();
        if name.is_empty() {
            continue;
        }
        let start_line = symbol_node.start_position().row + 1;
        if !seen.insert((name.clone(), start_line)) {
            continue;
        }

        if let Some(symbol) = build_symbol(symbol_node, &name, tag, source, group) {
            symbols.push(symbol);
        }
    }

    symbols.sort_by(|a, b| a.start_line.cmp(&b.start_line).then(a.name.cmp(&b.name)));
    symbols
}

fn build_symbol(
    node: Node,
    name: &str,
    tag: &str,
    source: &[u8],
    group: LangGroup,
) -> Option<RawSymbol> {
    let parent = find_parent(node, source);

    let (kind, mut meta_kind) = match tag {
        "function" => (NodeKind::Function, None),
        "class" => (NodeKind::Class, None),
        "interface" => (NodeKind::Class, Some("interface".to_owned())),
        "arrow" => (NodeKind::Function, Some("arrow_function".to_owned())),
        "method" => {
            // Object-literal methods have no class ancestor; skip them.
            parent.as_ref()?;
            (NodeKind::Function, Some("method".to_owned()))
        }
        _ => return None,
    };

    // Python functions nested in a class body are methods.
    if group == LangGroup::Python
        && kind == NodeKind::Function
        && parent.as_ref().is_some_and(|(_, k)| *k == NodeKind::Class)
    {
        meta_kind = Some("method".to_owned());
    }

    let exported = match group {
        LangGroup::Python => !name.starts_with('_'),
        _ => detect_export(node),
    };

    let content = node_text(node, source);
    let signature = content
        .lines()
        .next()
        .unwrap_or("")
        .trim_end_matches('{')
        .trim()
        .to_owned();

    let (parent_name, parent_kind) = match parent {
        Some((name, kind)) => (Some(name), Some(kind)),
        None => (None, None),
    };

    Some(RawSymbol {
        name: name.to_owned(),
        kind,
        meta_kind,
        ast_type: node.kind().to_owned(),
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        exported,
        parent_name,
        parent_kind,
        signature,
        parameters: if kind == NodeKind::Function {
            extract_parameters(node, source)
        } else {
            Vec::new()
        },
        return_type: extract_return_type(node, source),
        documentation: extract_documentation(node, source, group),
    })
}

// ---------------------------------------------------------------------------
// Helper utilities
// ---------------------------------------------------------------------------

fn node_text<'a>(node: Node<'a>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

/// Check whether `node` is — or is nested inside — an export statement.
fn detect_export(node: Node) -> bool {
    let mut current = Some(node);
    while let Some(n) = current {
        if n.kind() == "export_statement" {
            return true;
        }
        current = n.parent();
    }
    false
}

/// Nearest enclosing class or function declaration, excluding `node` itself.
fn find_parent(node: Node, source: &[u8]) -> Option<(String, NodeKind)> {
    let mut current = node.parent();
    while let Some(n) = current {
        let kind = match n.kind() {
            "class_declaration" | "class_definition" | "interface_declaration" => {
                Some(NodeKind::Class)
            }
            "function_declaration" | "function_definition" | "method_definition" => {
                Some(NodeKind::Function)
            }
            _ => None,
        };
        if let Some(kind) = kind {
            let name = n
                .child_by_field_name("name")
                .map(|c| node_text(c, source).to_owned())
                .unwrap_or_default();
            if !name.is_empty() {
                return Some((name, kind));
            }
        }
        current = n.parent();
    }
    None
}

/// Parameter names: one identifier per formal parameter, pattern params
/// reduced to their first identifier. Arrow-function constants find their
/// parameter list through the declarator.
fn extract_parameters(node: Node, source: &[u8]) -> Vec<String> {
    let params_node = node
        .child_by_field_name("parameters")
        .or_else(|| find_descendant_of_kind(node, &["formal_parameters", "parameters"], 3));
    let Some(params_node) = params_node else {
        return Vec::new();
    };

    let mut params = Vec::new();
    let mut cursor = params_node.walk();
    for child in params_node.named_children(&mut cursor) {
        if child.kind() == "comment" {
            continue;
        }
        if let Some(ident) = first_identifier(child, source) {
            if ident != "self" && ident != "this" {
                params.push(ident);
            }
        }
    }
    params
}

fn first_identifier(node: Node, source: &[u8]) -> Option<String> {
    if node.kind() == "identifier" {
        return Some(node_text(node, source).to_owned());
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if let Some(found) = first_identifier(child, source) {
            return Some(found);
        }
    }
    None
}

/// Breadth-first bounded descent: direct children first, then one level
/// deeper, so a class never picks up a method's parameter list.
fn find_descendant_of_kind<'a>(node: Node<'a>, kinds: &[&str], depth: usize) -> Option<Node<'a>> {
    if depth == 0 {
        return None;
    }
    let mut cursor = node.walk();
    if let Some(found) = node.named_children(&mut cursor).find(|c| kinds.contains(&c.kind())) {
        return Some(found);
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    children
        .into_iter()
        .find_map(|child| find_descendant_of_kind(child, kinds, depth - 1))
}

fn extract_return_type(node: Node, source: &[u8]) -> Option<String> {
    let annotation = node.child_by_field_name("return_type")?;
    let text = node_text(annotation, source)
        .trim_start_matches(':')
        .trim()
        .to_owned();
    (!text.is_empty()).then_some(text)
}

/// Documentation from adjacent comments: the run of comment siblings
/// immediately above the declaration, or a Python docstring.
fn extract_documentation(node: Node, source: &[u8], group: LangGroup) -> Option<String> {
    // Comments directly above the declaration (or its export wrapper).
    let anchor = match node.parent() {
        Some(p) if p.kind() == "export_statement" || p.kind() == "decorated_definition" => p,
        _ => node,
    };
    let mut lines: Vec<String> = Vec::new();
    let mut sibling = anchor.prev_named_sibling();
    while let Some(s) = sibling {
        if s.kind() != "comment" {
            break;
        }
        lines.push(clean_comment(node_text(s, source)));
        sibling = s.prev_named_sibling();
    }
    lines.reverse();

    if lines.is_empty() && group == LangGroup::Python {
        if let Some(docstring) = python_docstring(node, source) {
            lines.push(docstring);
        }
    }

    let doc = lines.join("\n").trim().to_owned();
    (!doc.is_empty()).then_some(doc)
}

fn clean_comment(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches("/**")
                .trim_start_matches("*/")
                .trim_start_matches("//")
                .trim_start_matches('*')
                .trim_start_matches('#')
                .trim()
        })
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn python_docstring(node: Node, source: &[u8]) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }
    let text = node_text(string, source)
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_owned();
    (!text.is_empty()).then_some(text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
