use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tree_sitter::Parser;

use super::imports::{RawImport, extract_imports};
use super::languages::{LangGroup, group_for_extension, language_for_group};
use super::references::{RawReference, RefKind, extract_references};
use super::resolve::ImportResolver;
use super::symbols::{RawSymbol, extract_symbols};
use super::walker::relative_path;
use crate::graph::edge::{Edge, EdgeKind, EdgeMeta};
use crate::graph::node::{Node, NodeKind, NodeMeta, placeholder_id, symbol_id};

/// Everything extracted from one source file: the file node, its symbol and
/// import nodes, the edges they induce (possibly pointing at placeholder
/// ids), and a content digest.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub path: String,
    pub file_node: Node,
    pub symbols: Vec<Node>,
    pub edges: Vec<Edge>,
    pub digest: String,
}

impl FileSnapshot {
    /// All nodes of the snapshot, file node first.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        std::iter::once(&self.file_node).chain(self.symbols.iter())
    }
}

/// Parse one file and produce its snapshot. Parse failures are errors the
/// caller treats as fatal to the file only.
pub fn build_file_snapshot(
    root: &Path,
    abs_path: &Path,
    resolver: &ImportResolver,
) -> Result<FileSnapshot> {
    let rel = relative_path(root, abs_path);
    let ext = abs_path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let group =
        group_for_extension(ext).ok_or_else(|| anyhow!("unsupported file extension {ext:?}"))?;

    let source = std::fs::read(abs_path).with_context(|| format!("reading {rel}"))?;

    let mut parser = Parser::new();
    parser
        .set_language(&language_for_group(group))
        .with_context(|| format!("loading {} grammar", group.as_str()))?;
    let tree = parser
        .parse(&source, None)
        .ok_or_else(|| anyhow!("parse failure in {rel}"))?;

    let raw_symbols = extract_symbols(&tree, &source, group);
    let raw_imports = extract_imports(&tree, &source, group);
    let raw_references = extract_references(&tree, &source, group);

    Ok(assemble_snapshot(
        &rel,
        &source,
        group,
        raw_symbols,
        raw_imports,
        raw_references,
        resolver,
    ))
}

fn assemble_snapshot(
    rel: &str,
    source: &[u8],
    group: LangGroup,
    raw_symbols: Vec<RawSymbol>,
    raw_imports: Vec<RawImport>,
    raw_references: Vec<RawReference>,
    resolver: &ImportResolver,
) -> FileSnapshot {
    let text = String::from_utf8_lossy(source);
    let digest = blake3::hash(source).to_hex()[..16].to_string();

    let mut file_node = Node::file(rel, &text);
    file_node.meta.digest = Some(digest.clone());
    file_node.meta.kind = Some(group.as_str().to_owned());

    // Symbol nodes.
    let mut symbols: Vec<Node> = Vec::new();
    for raw in &raw_symbols {
        symbols.push(symbol_node(rel, &text, raw, &digest));
    }

    // Import nodes, plus the resolved target path per import.
    let mut import_targets: Vec<(usize, Option<String>)> = Vec::new();
    for raw in &raw_imports {
        let resolved = resolver.resolve(rel, &raw.specifier, group);
        let node = import_node(rel, &text, raw);
        import_targets.push((symbols.len(), resolved));
        symbols.push(node);
    }

    let mut edges: Vec<Edge> = Vec::new();

    // Containment: file contains top-level symbols, parents contain nested.
    for (i, raw) in raw_symbols.iter().enumerate() {
        let from = match &raw.parent_name {
            Some(parent) => enclosing_named(&raw_symbols, &symbols, parent, raw.start_line)
                .unwrap_or(&file_node.id),
            None => &file_node.id,
        };
        edges.push(Edge::new(from.clone(), symbols[i].id.clone(), EdgeKind::Contains));
    }

    // File contains each import node; file imports each resolved target.
    for (slot, resolved) in &import_targets {
        let import_id = symbols[*slot].id.clone();
        edges.push(Edge::new(file_node.id.clone(), import_id, EdgeKind::Contains));
        if let Some(target_rel) = resolved {
            let specifier = symbols[*slot].name.clone();
            edges.push(
                Edge::new(
                    file_node.id.clone(),
                    crate::graph::node::file_id(target_rel),
                    EdgeKind::Imports,
                )
                .with_meta(EdgeMeta {
                    specifier: Some(specifier),
                    line: Some(symbols[*slot].start_line),
                }),
            );
        }
    }

    // References: calls, inheritance, type mentions.
    for reference in &raw_references {
        let Some(edge) = reference_edge(
            reference,
            &file_node,
            &raw_symbols,
            &symbols,
            &raw_imports,
            &import_targets,
        ) else {
            continue;
        };
        edges.push(edge);
    }

    // Same (from, to, type) triples collapse to one edge.
    edges.sort_by(|a, b| a.id.cmp(&b.id));
    edges.dedup_by(|a, b| a.id == b.id);

    FileSnapshot {
        path: rel.to_owned(),
        file_node,
        symbols,
        edges,
        digest,
    }
}

fn symbol_node(rel: &str, text: &str, raw: &RawSymbol, digest: &str) -> Node {
    let content: String = text
        .get(raw.start_byte..raw.end_byte)
        .unwrap_or("")
        .to_owned();
    let embedding_text = embedding_text(raw, &content);
    Node {
        id: symbol_id(
            rel,
            raw.kind,
            &raw.name,
            raw.start_line,
            raw.end_line,
            raw.meta_kind.as_deref(),
        ),
        kind: raw.kind,
        name: raw.name.clone(),
        path: rel.to_owned(),
        content,
        start_line: raw.start_line,
        end_line: raw.end_line,
        embedding: None,
        meta: NodeMeta {
            exported: raw.exported,
            kind: raw.meta_kind.clone(),
            ast_type: Some(raw.ast_type.clone()),
            parent_name: raw.parent_name.clone(),
            parent_kind: raw.parent_kind,
            signature: Some(raw.signature.clone()),
            parameters: raw.parameters.clone(),
            return_type: raw.return_type.clone(),
            documentation: raw.documentation.clone(),
            embedding_text: Some(embedding_text),
            digest: Some(digest.to_owned()),
            category: None,
        },
    }
}

fn import_node(rel: &str, text: &str, raw: &RawImport) -> Node {
    let content = text.get(raw.start_byte..raw.end_byte).unwrap_or("").to_owned();
    Node {
        id: symbol_id(
            rel,
            NodeKind::Import,
            &raw.specifier,
            raw.start_line,
            raw.end_line,
            None,
        ),
        kind: NodeKind::Import,
        name: raw.specifier.clone(),
        path: rel.to_owned(),
        content,
        start_line: raw.start_line,
        end_line: raw.end_line,
        embedding: None,
        meta: NodeMeta::default(),
    }
}

/// Text the embedder sees: name, signature, documentation, and the head of
/// the body — enough to locate a symbol semantically without embedding
/// whole files.
fn embedding_text(raw: &RawSymbol, content: &str) -> String {
    let head: String = content.lines().take(12).collect::<Vec<_>>().join("\n");
    let mut parts = vec![raw.name.clone(), raw.signature.clone()];
    if let Some(doc) = &raw.documentation {
        parts.push(doc.clone());
    }
    parts.push(head);
    parts.join("\n")
}

/// Id of the symbol named `parent` that encloses `line`, preferring the
/// tightest span.
fn enclosing_named<'a>(
    raw_symbols: &[RawSymbol],
    symbols: &'a [Node],
    parent: &str,
    line: usize,
) -> Option<&'a String> {
    raw_symbols
        .iter()
        .enumerate()
        .filter(|(_, raw)| {
            raw.name == parent && raw.start_line <= line && raw.end_line >= line
        })
        .min_by_key(|(_, raw)| raw.end_line - raw.start_line)
        .map(|(i, _)| &symbols[i].id)
}

/// Symbol node (by index) with the tightest span containing `line`,
/// excluding import nodes.
fn enclosing_symbol<'a>(
    raw_symbols: &[RawSymbol],
    symbols: &'a [Node],
    line: usize,
) -> Option<&'a Node> {
    raw_symbols
        .iter()
        .enumerate()
        .filter(|(_, raw)| raw.start_line <= line && raw.end_line >= line)
        .min_by_key(|(_, raw)| raw.end_line - raw.start_line)
        .map(|(i, _)| &symbols[i])
}

/// Build the edge for one reference, resolving the target in order:
/// local symbol, imported placeholder, raw placeholder. Returns `None`
/// when the reference collapses onto its own source.
fn reference_edge(
    reference: &RawReference,
    file_node: &Node,
    raw_symbols: &[RawSymbol],
    symbols: &[Node],
    raw_imports: &[RawImport],
    import_targets: &[(usize, Option<String>)],
) -> Option<Edge> {
    // Source: the declaring symbol for inheritance, else the tightest
    // enclosing symbol, else the file node.
    let source_id = match &reference.from_name {
        Some(from) => enclosing_named(raw_symbols, symbols, from, reference.line)
            .cloned()
            .or_else(|| {
                raw_symbols
                    .iter()
                    .position(|raw| &raw.name == from)
                    .map(|i| symbols[i].id.clone())
            })
            .unwrap_or_else(|| file_node.id.clone()),
        None => enclosing_symbol(raw_symbols, symbols, reference.line)
            .map(|n| n.id.clone())
            .unwrap_or_else(|| file_node.id.clone()),
    };

    // Local symbol with the same name and a different id wins; then a
    // resolved import binding the name becomes a placeholder on the target
    // file's export (a name bound by an unresolvable import is external —
    // the edge is dropped); anything else becomes a raw placeholder for the
    // resolve pass to match against the export index or drop.
    let local = raw_symbols
        .iter()
        .enumerate()
        .filter(|(i, raw)| raw.name == reference.target && symbols[*i].id != source_id)
        .map(|(i, _)| symbols[i].id.clone())
        .next();

    let target_id = match local {
        Some(id) => id,
        None => {
            let binding = raw_imports
                .iter()
                .find(|raw| raw.names.iter().any(|n| n == &reference.target));
            match binding {
                Some(raw) => {
                    let resolved = import_targets
                        .iter()
                        .find(|(slot, _)| {
                            symbols[*slot].name == raw.specifier
                                && symbols[*slot].start_line == raw.start_line
                        })
                        .and_then(|(_, resolved)| resolved.as_ref());
                    match resolved {
                        Some(target_rel) => placeholder_id(target_rel, &reference.target),
                        None => return None,
                    }
                }
                None => placeholder_id("*", &reference.target),
            }
        }
    };

    if target_id == source_id {
        return None;
    }

    let kind = match reference.kind {
        RefKind::Call => EdgeKind::Calls,
        RefKind::Extends => EdgeKind::Extends,
        RefKind::Implements => EdgeKind::Implements,
        RefKind::TypeRef => EdgeKind::References,
    };

    Some(Edge::new(source_id, target_id, kind).with_meta(EdgeMeta {
        specifier: None,
        line: Some(reference.line),
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::parse_placeholder;

    fn snapshot_project(files: &[(&str, &str)], target: &str) -> FileSnapshot {
        let dir = tempfile::tempdir().unwrap();
        for (path, content) in files {
            let abs = dir.path().join(path);
            std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
            std::fs::write(abs, content).unwrap();
        }
        let resolver = ImportResolver::new(dir.path());
        build_file_snapshot(dir.path(), &dir.path().join(target), &resolver).unwrap()
    }

    #[test]
    fn test_snapshot_contains_file_symbols_and_digest() {
        let snapshot = snapshot_project(
            &[("src/auth.ts", "export function authenticateUser(u) { return u; }")],
            "src/auth.ts",
        );
        assert_eq!(snapshot.path, "src/auth.ts");
        assert_eq!(snapshot.digest.len(), 16);
        assert!(snapshot.symbols.iter().any(|s| s.name == "authenticateUser"));
        assert!(
            snapshot
                .edges
                .iter()
                .any(|e| e.kind == EdgeKind::Contains && e.from == snapshot.file_node.id)
        );
    }

    #[test]
    fn test_local_call_resolves_to_local_symbol() {
        let snapshot = snapshot_project(
            &[(
                "src/auth.ts",
                "function validate(u) { return !!u; }\nexport function login(u) { return validate(u); }",
            )],
            "src/auth.ts",
        );
        let validate = snapshot.symbols.iter().find(|s| s.name == "validate").unwrap();
        let login = snapshot.symbols.iter().find(|s| s.name == "login").unwrap();
        assert!(
            snapshot
                .edges
                .iter()
                .any(|e| e.kind == EdgeKind::Calls && e.from == login.id && e.to == validate.id),
            "login must call validate through a resolved local edge"
        );
    }

    #[test]
    fn test_imported_call_becomes_placeholder() {
        let snapshot = snapshot_project(
            &[
                ("src/auth.ts", "export function authenticateUser(u) { return u; }"),
                (
                    "src/login.ts",
                    "import { authenticateUser } from './auth';\nexport function handleLogin(f) { return authenticateUser(f); }",
                ),
            ],
            "src/login.ts",
        );

        let call_edge = snapshot
            .edges
            .iter()
            .find(|e| e.kind == EdgeKind::Calls)
            .expect("call edge must exist");
        let (path, name) = parse_placeholder(&call_edge.to).expect("target is a placeholder");
        assert_eq!(path, "src/auth.ts");
        assert_eq!(name, "authenticateUser");
    }

    #[test]
    fn test_import_edge_targets_file_id() {
        let snapshot = snapshot_project(
            &[
                ("src/auth.ts", "export function a() {}"),
                ("src/login.ts", "import { a } from './auth';"),
            ],
            "src/login.ts",
        );
        let import_edge = snapshot
            .edges
            .iter()
            .find(|e| e.kind == EdgeKind::Imports)
            .expect("imports edge must exist");
        assert_eq!(import_edge.to, crate::graph::node::file_id("src/auth.ts"));
        assert_eq!(import_edge.meta.specifier.as_deref(), Some("./auth"));
    }

    #[test]
    fn test_method_contained_by_class() {
        let snapshot = snapshot_project(
            &[(
                "src/service.ts",
                "export class AuthService {\n  login(u) { return u; }\n}",
            )],
            "src/service.ts",
        );
        let class = snapshot.symbols.iter().find(|s| s.name == "AuthService").unwrap();
        let method = snapshot.symbols.iter().find(|s| s.name == "login").unwrap();
        assert!(
            snapshot
                .edges
                .iter()
                .any(|e| e.kind == EdgeKind::Contains && e.from == class.id && e.to == method.id),
            "class must contain its method"
        );
    }

    #[test]
    fn test_unknown_extension_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "# notes").unwrap();
        let resolver = ImportResolver::new(dir.path());
        assert!(build_file_snapshot(dir.path(), &dir.path().join("notes.md"), &resolver).is_err());
    }

    #[test]
    fn test_snapshot_is_deterministic() {
        let files = [(
            "src/a.ts",
            "import { b } from './b';\nexport function a() { return b(); }",
        ), ("src/b.ts", "export function b() { return 1; }")];
        let first = snapshot_project(&files, "src/a.ts");
        let second = snapshot_project(&files, "src/a.ts");
        let ids = |s: &FileSnapshot| {
            (
                s.nodes().map(|n| n.id.clone()).collect::<Vec<_>>(),
                s.edges.iter().map(|e| e.id.clone()).collect::<Vec<_>>(),
            )
        };
        assert_eq!(ids(&first), ids(&second));
    }
}
