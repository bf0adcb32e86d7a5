use std::path::{Path, PathBuf};

use oxc_resolver::{ResolveOptions, Resolver};

use super::languages::LangGroup;
use super::walker::relative_path;

/// Resolves relative import specifiers to project-relative file paths.
///
/// Only `./` and `../` specifiers (and Python's leading-dot modules) are
/// considered — bare package names are dropped; this graph carries no
/// package dependencies. TS/JS probing goes through `oxc_resolver`, which
/// handles extension candidates and `index.<ext>` directory imports.
pub struct ImportResolver {
    root: PathBuf,
    resolver: Resolver,
}

impl ImportResolver {
    pub fn new(root: &Path) -> Self {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let resolver = Resolver::new(ResolveOptions {
            extensions: vec![
                ".ts".into(),
                ".tsx".into(),
                ".mts".into(),
                ".js".into(),
                ".jsx".into(),
                ".mjs".into(),
            ],
            extension_alias: vec![(
                ".js".into(),
                vec![".ts".into(), ".tsx".into(), ".js".into()],
            )],
            ..ResolveOptions::default()
        });
        ImportResolver { root, resolver }
    }

    /// Resolve `specifier` as written in the file at project-relative
    /// `from_rel`. Returns the project-relative target path, or `None` when
    /// the specifier is non-relative or probing finds nothing.
    pub fn resolve(&self, from_rel: &str, specifier: &str, group: LangGroup) -> Option<String> {
        match group {
            LangGroup::Python => self.resolve_python(from_rel, specifier),
            _ => self.resolve_js_like(from_rel, specifier),
        }
    }

    fn resolve_js_like(&self, from_rel: &str, specifier: &str) -> Option<String> {
        if !specifier.starts_with("./") && !specifier.starts_with("../") {
            return None;
        }
        let from_abs = self.root.join(from_rel);
        let dir = from_abs.parent()?;
        let resolved = self.resolver.resolve(dir, specifier).ok()?.into_path_buf();
        Some(relative_path(&self.root, &resolved))
    }

    /// Python relative modules: one leading dot anchors at the importing
    /// file's directory, each further dot walks up. The remaining dotted
    /// path is probed as `<p>.py` then `<p>/__init__.py`.
    fn resolve_python(&self, from_rel: &str, specifier: &str) -> Option<String> {
        let dots = specifier.chars().take_while(|&c| c == '.').count();
        if dots == 0 {
            return None;
        }
        let module = &specifier[dots..];

        let from_abs = self.root.join(from_rel);
        let mut dir = from_abs.parent()?.to_path_buf();
        for _ in 1..dots {
            dir = dir.parent()?.to_path_buf();
        }

        let mut base = dir;
        for segment in module.split('.').filter(|s| !s.is_empty()) {
            base = base.join(segment);
        }

        for candidate in [base.with_extension("py"), base.join("__init__.py")] {
            if candidate.is_file() {
                return Some(relative_path(&self.root, &candidate));
            }
        }
        None
    }
}
