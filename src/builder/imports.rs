use std::sync::OnceLock;

use tree_sitter::{Language, Node, Query, QueryCursor, StreamingIterator, Tree};

use super::languages::{LangGroup, language_for_group};

/// An import statement as extracted from source, before path resolution.
#[derive(Debug, Clone)]
pub struct RawImport {
    /// Module specifier as written: `./auth`, `react`, `.utils.session`.
    pub specifier: String,
    /// Local names bound by the import (named, default, and namespace).
    pub names: Vec<String>,
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
}

// ---------------------------------------------------------------------------
// Query strings
// ---------------------------------------------------------------------------

/// ESM static imports. Shared text for TS/TSX/JS (compiled per grammar).
const IMPORT_QUERY_ESM: &str = r#"
    (import_statement
      source: (string (string_fragment) @module_path)) @import
"#;

/// CJS require calls. The `require` identifier is filtered in code —
/// query predicates are not auto-applied by the streaming matcher.
const REQUIRE_QUERY: &str = r#"
    (call_expression
      function: (identifier) @fn
      arguments: (arguments (string (string_fragment) @module_path))) @require
"#;

/// Python imports, both forms; children are walked manually.
const IMPORT_QUERY_PY: &str = r#"
    (import_statement) @py_import
    (import_from_statement) @py_from
"#;

static TS_IMPORT: OnceLock<Query> = OnceLock::new();
static TSX_IMPORT: OnceLock<Query> = OnceLock::new();
static JS_IMPORT: OnceLock<Query> = OnceLock::new();
static TS_REQUIRE: OnceLock<Query> = OnceLock::new();
static TSX_REQUIRE: OnceLock<Query> = OnceLock::new();
static JS_REQUIRE: OnceLock<Query> = OnceLock::new();
static PY_IMPORT: OnceLock<Query> = OnceLock::new();

fn cached(cell: &'static OnceLock<Query>, group: LangGroup, text: &str) -> &'static Query {
    cell.get_or_init(|| {
        let language: Language = language_for_group(group);
        Query::new(&language, text)
            .unwrap_or_else(|e| panic!("invalid {} import query: {e}", group.as_str()))
    })
}

fn import_query(group: LangGroup) -> &'static Query {
    match group {
        LangGroup::TypeScript => cached(&TS_IMPORT, group, IMPORT_QUERY_ESM),
        LangGroup::Tsx => cached(&TSX_IMPORT, group, IMPORT_QUERY_ESM),
        LangGroup::JavaScript => cached(&JS_IMPORT, group, IMPORT_QUERY_ESM),
        LangGroup::Python => cached(&PY_IMPORT, group, IMPORT_QUERY_PY),
    }
}

fn require_query(group: LangGroup) -> Option<&'static Query> {
    match group {
        LangGroup::TypeScript => Some(cached(&TS_REQUIRE, group, REQUIRE_QUERY)),
        LangGroup::Tsx => Some(cached(&TSX_REQUIRE, group, REQUIRE_QUERY)),
        LangGroup::JavaScript => Some(cached(&JS_REQUIRE, group, REQUIRE_QUERY)),
        LangGroup::Python => None,
    }
}

fn node_text<'a>(node: Node<'a>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract every import statement from a parsed tree.
pub fn extract_imports(tree: &Tree, source: &[u8], group: LangGroup) -> Vec<RawImport> {
    let mut imports: Vec<RawImport> = Vec::new();

    let query = import_query(group);
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, tree.root_node(), source);
    while let Some(m) = matches.next() {
        let mut statement: Option<Node> = None;
        let mut module_path: Option<String> = None;
        let mut tag = "";

        for capture in m.captures {
            let name = query.capture_names()[capture.index as usize];
            match name {
                "import" | "py_import" | "py_from" => {
                    statement = Some(capture.node);
                    tag = name;
                }
                "module_path" => module_path = Some(node_text(capture.node, source).to_owned()),
                _ => {}
            }
        }

        let Some(statement) = statement else { continue };
        let raw = match tag {
            "import" => RawImport {
                specifier: module_path.unwrap_or_default(),
                names: esm_names(statement, source),
                start_line: statement.start_position().row + 1,
                end_line: statement.end_position().row + 1,
                start_byte: statement.start_byte(),
                end_byte: statement.end_byte(),
            },
            "py_import" | "py_from" => match python_import(statement, source) {
                Some(raw) => raw,
                None => continue,
            },
            _ => continue,
        };
        if !raw.specifier.is_empty() {
            imports.push(raw);
        }
    }

    // CJS: const X = require('./module')
    if let Some(query) = require_query(group) {
        let fn_idx = query.capture_index_for_name("fn").expect("require query @fn");
        let path_idx = query
            .capture_index_for_name("module_path")
            .expect("require query @module_path");

        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(query, tree.root_node(), source);
        while let Some(m) = matches.next() {
            let mut is_require = false;
            let mut module_path: Option<String> = None;
            let mut call: Option<Node> = None;
            for capture in m.captures {
                if capture.index == fn_idx {
                    is_require = node_text(capture.node, source) == "require";
                } else if capture.index == path_idx {
                    module_path = Some(node_text(capture.node, source).to_owned());
                } else {
                    call = Some(capture.node);
                }
            }
            let (Some(call), Some(specifier)) = (call, module_path) else {
                continue;
            };
            if !is_require {
                continue;
            }
            imports.push(RawImport {
                specifier,
                names: require_binding(call, source).into_iter().collect(),
                start_line: call.start_position().row + 1,
                end_line: call.end_position().row + 1,
                start_byte: call.start_byte(),
                end_byte: call.end_byte(),
            });
        }
    }

    imports.sort_by_key(|i| i.start_line);
    imports
}

/// Names bound by an ESM import statement: default identifier, named
/// specifiers (aliases win — they are the local names), namespace binding.
fn esm_names(statement: Node, source: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    collect_esm_names(statement, source, &mut names);
    names
}

fn collect_esm_names(node: Node, source: &[u8], names: &mut Vec<String>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "import_clause" | "named_imports" | "namespace_import" => {
                collect_esm_names(child, source, names);
            }
            "identifier" => names.push(node_text(child, source).to_owned()),
            "import_specifier" => {
                // `import { original as alias }` binds the alias locally.
                let local = child
                    .child_by_field_name("alias")
                    .or_else(|| child.child_by_field_name("name"));
                if let Some(local) = local {
                    names.push(node_text(local, source).to_owned());
                }
            }
            _ => {}
        }
    }
}

/// The variable a `require` call is bound to, when there is one.
fn require_binding(call: Node, source: &[u8]) -> Option<String> {
    let mut current = call.parent();
    while let Some(n) = current {
        if n.kind() == "variable_declarator" {
            return n
                .child_by_field_name("name")
                .map(|c| node_text(c, source).to_owned());
        }
        if n.kind() == "statement_block" || n.kind() == "program" {
            break;
        }
        current = n.parent();
    }
    None
}

/// Python `import a.b` / `from .mod import x, y as z`.
fn python_import(statement: Node, source: &[u8]) -> Option<RawImport> {
    let mut specifier = String::new();
    let mut names = Vec::new();

    match statement.kind() {
        "import_statement" => {
            // `import a.b` — the module itself is the bound name.
            let mut cursor = statement.walk();
            for child in statement.named_children(&mut cursor) {
                if child.kind() == "dotted_name" || child.kind() == "aliased_import" {
                    if specifier.is_empty() {
                        specifier = node_text(child, source)
                            .split_whitespace()
                            .next()
                            .unwrap_or("")
                            .to_owned();
                    }
                    let bound = match child.kind() {
                        "aliased_import" => child
                            .child_by_field_name("alias")
                            .map(|a| node_text(a, source).to_owned()),
                        _ => node_text(child, source)
                            .rsplit('.')
                            .next()
                            .map(str::to_owned),
                    };
                    names.extend(bound);
                }
            }
        }
        "import_from_statement" => {
            specifier = statement
                .child_by_field_name("module_name")
                .map(|m| node_text(m, source).to_owned())
                .unwrap_or_default();
            let mut cursor = statement.walk();
            for child in statement.named_children(&mut cursor) {
                match child.kind() {
                    "dotted_name" if Some(child) != statement.child_by_field_name("module_name") => {
                        names.push(node_text(child, source).to_owned());
                    }
                    "aliased_import" => {
                        if let Some(alias) = child.child_by_field_name("alias") {
                            names.push(node_text(alias, source).to_owned());
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => return None,
    }

    (!specifier.is_empty()).then_some(RawImport {
        specifier,
        names,
        start_line: statement.start_position().row + 1,
        end_line: statement.end_position().row + 1,
        start_byte: statement.start_byte(),
        end_byte: statement.end_byte(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
