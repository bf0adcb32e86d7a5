use std::collections::HashSet;
use std::sync::OnceLock;

use tree_sitter::{Language, Node, Query, QueryCursor, StreamingIterator, Tree};

/// The relationship a reference site expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// `foo()` or `obj.method()` — resolves to the innermost callee name.
    Call,
    /// `class Foo extends Bar` (and interface extends).
    Extends,
    /// `class Foo implements IBar`.
    Implements,
    /// Type annotation mention: `const x: SomeType`.
    TypeRef,
}

/// A reference extracted from a source file: the target name, the source
/// range, and (for inheritance) the declaring symbol.
#[derive(Debug, Clone)]
pub struct RawReference {
    /// Declaring symbol for inheritance; `None` for calls and type refs,
    /// where the enclosing symbol is recovered by line containment.
    pub from_name: Option<String>,
    pub target: String,
    pub kind: RefKind,
    pub line: usize,
}

use super::languages::{LangGroup, language_for_group};

// ---------------------------------------------------------------------------
// Query strings
// ---------------------------------------------------------------------------

/// Calls for TS/TSX/JS: a direct call captures the callee identifier, a
/// method call captures the property name — the innermost identifier of the
/// callee either way.
const CALLS_QUERY_TS: &str = r#"
    (call_expression
      function: (identifier) @callee
      arguments: (arguments))

    (call_expression
      function: (member_expression
        property: (property_identifier) @callee)
      arguments: (arguments))
"#;

/// Inheritance for TS/TSX. Interface extends uses `extends_type_clause` in
/// the TypeScript grammar, not the class `extends_clause`.
const INHERITANCE_QUERY_TS: &str = r#"
    (class_declaration
      name: (type_identifier) @class_name
      (class_heritage
        (extends_clause
          value: (identifier) @extends_name)))

    (class_declaration
      name: (type_identifier) @class_name
      (class_heritage
        (implements_clause
          (type_identifier) @implements_name)))

    (interface_declaration
      name: (type_identifier) @class_name
      (extends_type_clause
        (type_identifier) @extends_name))
"#;

/// JS class_heritage holds the parent identifier directly; JS has no
/// implements or interfaces.
const INHERITANCE_QUERY_JS: &str = r#"
    (class_declaration
      name: (identifier) @class_name
      (class_heritage
        (identifier) @extends_name))
"#;

const TYPE_REF_QUERY_TS: &str = r#"
    (type_annotation
      (type_identifier) @type_ref)
"#;

const CALLS_QUERY_PY: &str = r#"
    (call
      function: (identifier) @callee)

    (call
      function: (attribute
        attribute: (identifier) @callee))
"#;

const INHERITANCE_QUERY_PY: &str = r#"
    (class_definition
      name: (identifier) @class_name
      superclasses: (argument_list
        (identifier) @extends_name))
"#;

// ---------------------------------------------------------------------------
// Query cache — one set of statics per grammar.
// ---------------------------------------------------------------------------

struct RefQueries {
    calls: &'static Query,
    inheritance: Option<&'static Query>,
    type_refs: Option<&'static Query>,
}

static TS_CALLS: OnceLock<Query> = OnceLock::new();
static TS_INHERIT: OnceLock<Query> = OnceLock::new();
static TS_TYPES: OnceLock<Query> = OnceLock::new();
static TSX_CALLS: OnceLock<Query> = OnceLock::new();
static TSX_INHERIT: OnceLock<Query> = OnceLock::new();
static TSX_TYPES: OnceLock<Query> = OnceLock::new();
static JS_CALLS: OnceLock<Query> = OnceLock::new();
static JS_INHERIT: OnceLock<Query> = OnceLock::new();
static PY_CALLS: OnceLock<Query> = OnceLock::new();
static PY_INHERIT: OnceLock<Query> = OnceLock::new();

fn compile(cell: &'static OnceLock<Query>, group: LangGroup, text: &str) -> &'static Query {
    cell.get_or_init(|| {
        let language: Language = language_for_group(group);
        Query::new(&language, text)
            .unwrap_or_else(|e| panic!("invalid {} reference query: {e}", group.as_str()))
    })
}

fn queries_for(group: LangGroup) -> RefQueries {
    match group {
        LangGroup::TypeScript => RefQueries {
            calls: compile(&TS_CALLS, group, CALLS_QUERY_TS),
            inheritance: Some(compile(&TS_INHERIT, group, INHERITANCE_QUERY_TS)),
            type_refs: Some(compile(&TS_TYPES, group, TYPE_REF_QUERY_TS)),
        },
        LangGroup::Tsx => RefQueries {
            calls: compile(&TSX_CALLS, group, CALLS_QUERY_TS),
            inheritance: Some(compile(&TSX_INHERIT, group, INHERITANCE_QUERY_TS)),
            type_refs: Some(compile(&TSX_TYPES, group, TYPE_REF_QUERY_TS)),
        },
        LangGroup::JavaScript => RefQueries {
            calls: compile(&JS_CALLS, group, CALLS_QUERY_TS),
            inheritance: Some(compile(&JS_INHERIT, group, INHERITANCE_QUERY_JS)),
            type_refs: None,
        },
        LangGroup::Python => RefQueries {
            calls: compile(&PY_CALLS, group, CALLS_QUERY_PY),
            inheritance: Some(compile(&PY_INHERIT, group, INHERITANCE_QUERY_PY)),
            type_refs: None,
        },
    }
}

fn node_text<'a>(node: Node<'a>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract calls, inheritance, and type references in one pass.
///
/// Deduplication key is `(target, line, kind)` so repeated query captures
/// of the same site collapse.
pub fn extract_references(tree: &Tree, source: &[u8], group: LangGroup) -> Vec<RawReference> {
    let queries = queries_for(group);
    let mut results: Vec<RawReference> = Vec::new();
    let mut seen: HashSet<(String, usize, RefKind)> = HashSet::new();

    let mut push = |results: &mut Vec<RawReference>, reference: RawReference| {
        if seen.insert((reference.target.clone(), reference.line, reference.kind)) {
            results.push(reference);
        }
    };

    // Calls.
    {
        let query = queries.calls;
        let callee_idx = query
            .capture_index_for_name("callee")
            .expect("calls query must capture @callee");
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(query, tree.root_node(), source);
        while let Some(m) = matches.next() {
            for capture in m.captures {
                if capture.index != callee_idx {
                    continue;
                }
                push(
                    &mut results,
                    RawReference {
                        from_name: None,
                        target: node_text(capture.node, source).to_owned(),
                        kind: RefKind::Call,
                        line: capture.node.start_position().row + 1,
                    },
                );
            }
        }
    }

    // Inheritance.
    if let Some(query) = queries.inheritance {
        let class_idx = query.capture_index_for_name("class_name");
        let extends_idx = query.capture_index_for_name("extends_name");
        let implements_idx = query.capture_index_for_name("implements_name");

        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(query, tree.root_node(), source);
        while let Some(m) = matches.next() {
            let mut class_name: Option<String> = None;
            let mut targets: Vec<(String, usize, RefKind)> = Vec::new();

            for capture in m.captures {
                let text = node_text(capture.node, source).to_owned();
                let line = capture.node.start_position().row + 1;
                if class_idx == Some(capture.index) {
                    class_name = Some(text);
                } else if extends_idx == Some(capture.index) {
                    targets.push((text, line, RefKind::Extends));
                } else if implements_idx == Some(capture.index) {
                    targets.push((text, line, RefKind::Implements));
                }
            }

            for (target, line, kind) in targets {
                push(
                    &mut results,
                    RawReference {
                        from_name: class_name.clone(),
                        target,
                        kind,
                        line,
                    },
                );
            }
        }
    }

    // Type annotation references.
    if let Some(query) = queries.type_refs {
        let type_idx = query
            .capture_index_for_name("type_ref")
            .expect("type query must capture @type_ref");
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(query, tree.root_node(), source);
        while let Some(m) = matches.next() {
            for capture in m.captures {
                if capture.index != type_idx {
                    continue;
                }
                push(
                    &mut results,
                    RawReference {
                        from_name: None,
                        target: node_text(capture.node, source).to_owned(),
                        kind: RefKind::TypeRef,
                        line: capture.node.start_position().row + 1,
                    },
                );
            }
        }
    }

    results
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
