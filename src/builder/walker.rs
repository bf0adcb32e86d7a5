use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ignore::WalkBuilder;

use super::languages::group_for_extension;

/// Directory names never descended into, on top of `.gitignore` rules:
/// vendored trees, build outputs, VCS metadata, virtualenvs, and artifact
/// directories this tool writes itself.
const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    "dist",
    "build",
    "out",
    "target",
    "coverage",
    "vendor",
    "__pycache__",
    "venv",
    "docs",
    ".benchmark-artifacts",
];

/// Walk a project directory and collect every source file whose extension
/// maps to an indexed language.
///
/// Respects `.gitignore`, skips the fixed directory list and all dot-prefixed
/// entries, and returns paths sorted so graph construction is deterministic.
pub fn walk_project(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();

    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !SKIPPED_DIRS.contains(&name.as_ref())
        })
        .build();

    for entry in walker {
        let entry = entry.with_context(|| format!("walking {}", root.display()))?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if group_for_extension(ext).is_some() {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

/// Normalise a path relative to the project root: forward slashes, no
/// leading `./`. Paths outside the root come back as-is (lossy).
pub fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_collects_only_indexed_languages() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "export {}").unwrap();
        std::fs::write(dir.path().join("b.py"), "x = 1").unwrap();
        std::fs::write(dir.path().join("readme.md"), "# hi").unwrap();
        std::fs::write(dir.path().join("data.json"), "{}").unwrap();

        let files = walk_project(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| relative_path(dir.path(), p))
            .collect();
        assert_eq!(names, vec!["a.ts", "b.py"]);
    }

    #[test]
    fn test_walk_skips_vendored_and_hidden_dirs() {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["node_modules/pkg", "dist", ".hidden"] {
            let d = dir.path().join(sub);
            std::fs::create_dir_all(&d).unwrap();
            std::fs::write(d.join("skipme.ts"), "export {}").unwrap();
        }
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/keep.ts"), "export {}").unwrap();

        let files = walk_project(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| relative_path(dir.path(), p))
            .collect();
        assert_eq!(names, vec!["src/keep.ts"]);
    }

    #[test]
    fn test_walk_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("z.ts"), "").unwrap();
        std::fs::write(dir.path().join("a.ts"), "").unwrap();
        let files = walk_project(dir.path()).unwrap();
        assert!(files.windows(2).all(|w| w[0] <= w[1]));
    }
}
