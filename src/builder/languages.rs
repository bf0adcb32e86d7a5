use tree_sitter::Language;

/// Language group a file belongs to, derived from its extension. Queries
/// compiled for one grammar cannot run against another grammar's tree, so
/// every query cache is keyed by this group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LangGroup {
    TypeScript,
    Tsx,
    JavaScript,
    Python,
}

impl LangGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            LangGroup::TypeScript => "typescript",
            LangGroup::Tsx => "tsx",
            LangGroup::JavaScript => "javascript",
            LangGroup::Python => "python",
        }
    }

    /// Extension candidates probed while resolving relative imports from a
    /// file of this language.
    pub fn import_extensions(&self) -> &'static [&'static str] {
        match self {
            LangGroup::TypeScript | LangGroup::Tsx => &[".ts", ".tsx", ".js", ".jsx"],
            LangGroup::JavaScript => &[".js", ".jsx", ".ts", ".tsx"],
            LangGroup::Python => &[".py"],
        }
    }
}

/// Map a file extension to its language group, or `None` when the extension
/// is not indexed (JSON, Markdown, and everything else are excluded).
pub fn group_for_extension(ext: &str) -> Option<LangGroup> {
    match ext {
        "ts" | "mts" => Some(LangGroup::TypeScript),
        "tsx" => Some(LangGroup::Tsx),
        "js" | "jsx" | "mjs" => Some(LangGroup::JavaScript),
        "py" => Some(LangGroup::Python),
        _ => None,
    }
}

/// Return the tree-sitter [`Language`] for a group.
///
/// `.ts` and `.tsx` MUST use different grammars: the TypeScript grammar
/// cannot parse JSX, and the TSX grammar breaks angle-bracket type
/// assertions (`<T>expr`).
pub fn language_for_group(group: LangGroup) -> Language {
    match group {
        LangGroup::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        LangGroup::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        LangGroup::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        LangGroup::Python => tree_sitter_python::LANGUAGE.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_extensions_map() {
        assert_eq!(group_for_extension("ts"), Some(LangGroup::TypeScript));
        assert_eq!(group_for_extension("tsx"), Some(LangGroup::Tsx));
        assert_eq!(group_for_extension("jsx"), Some(LangGroup::JavaScript));
        assert_eq!(group_for_extension("py"), Some(LangGroup::Python));
    }

    #[test]
    fn test_excluded_extensions_are_none() {
        assert_eq!(group_for_extension("json"), None);
        assert_eq!(group_for_extension("md"), None);
        assert_eq!(group_for_extension("rs"), None);
    }

    #[test]
    fn test_each_group_has_a_grammar() {
        for group in [
            LangGroup::TypeScript,
            LangGroup::Tsx,
            LangGroup::JavaScript,
            LangGroup::Python,
        ] {
            let lang = language_for_group(group);
            assert!(lang.abi_version() > 0);
        }
    }
}
