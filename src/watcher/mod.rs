pub mod event;

use std::path::Path;
use std::time::Duration;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::RecursiveMode;
use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use tokio::sync::mpsc as tokio_mpsc;
use tokio::task::JoinHandle;

use crate::builder::languages::group_for_extension;
use event::WatchEvent;

/// Handle to a running watcher. Dropping it stops the OS watcher.
pub struct WatcherHandle {
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    /// Bridge task forwarding events from the std channel to tokio.
    _bridge_task: JoinHandle<()>,
}

/// Files whose change invalidates import resolution project-wide.
const CONFIG_FILES: &[&str] = &["tsconfig.json", "package.json", "pyproject.toml"];

/// Directory components never watched: vendored trees and our own caches.
const SKIPPED_COMPONENTS: &[&str] = &["node_modules", ".code-context", ".benchmark-artifacts"];

fn build_gitignore_matcher(project_root: &Path) -> Gitignore {
    let mut builder = GitignoreBuilder::new(project_root);
    let gitignore_path = project_root.join(".gitignore");
    if gitignore_path.exists() {
        let _ = builder.add(&gitignore_path);
    }
    builder.build().unwrap_or_else(|_| Gitignore::empty())
}

/// Start a debounced watcher on `watch_root`.
///
/// Returns a handle (keep it alive) and a receiver of classified events,
/// filtered by the same gitignore rules the initial index walk used.
pub fn start_watcher(
    watch_root: &Path,
) -> anyhow::Result<(WatcherHandle, tokio_mpsc::Receiver<WatchEvent>)> {
    let (std_tx, std_rx) = std::sync::mpsc::channel::<DebounceEventResult>();

    let mut debouncer = new_debouncer(Duration::from_millis(75), move |res| {
        let _ = std_tx.send(res);
    })?;
    debouncer
        .watcher()
        .watch(watch_root, RecursiveMode::Recursive)?;

    let gitignore = build_gitignore_matcher(watch_root);
    let (tokio_tx, tokio_rx) = tokio_mpsc::channel::<WatchEvent>(256);

    let bridge_task = tokio::task::spawn_blocking(move || {
        while let Ok(result) = std_rx.recv() {
            match result {
                Ok(events) => {
                    for debounced_event in events {
                        if let Some(watch_event) = classify_event(&debounced_event.path, &gitignore)
                        {
                            if tokio_tx.blocking_send(watch_event).is_err() {
                                return; // receiver dropped, shutdown
                            }
                        }
                    }
                }
                Err(err) => {
                    eprintln!("[watcher] error: {err:?}");
                }
            }
        }
    });

    Ok((
        WatcherHandle {
            _debouncer: debouncer,
            _bridge_task: bridge_task,
        },
        tokio_rx,
    ))
}

/// Classify a filesystem event path, or `None` when it should be ignored.
fn classify_event(path: &Path, gitignore: &Gitignore) -> Option<WatchEvent> {
    if path
        .components()
        .any(|c| SKIPPED_COMPONENTS.contains(&c.as_os_str().to_str().unwrap_or("")))
    {
        return None;
    }
    if gitignore.matched(path, path.is_dir()).is_ignore() {
        return None;
    }

    if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
        if CONFIG_FILES.contains(&file_name) {
            return Some(WatchEvent::ConfigChanged);
        }
    }

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if group_for_extension(ext).is_none() {
        return None;
    }

    if path.exists() {
        // The debouncer does not distinguish create from modify; the
        // overlay record handles both as remove-old + add-new.
        Some(WatchEvent::Modified(path.to_path_buf()))
    } else {
        Some(WatchEvent::Deleted(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_skips_vendored_and_unknown() {
        let gitignore = Gitignore::empty();
        assert!(classify_event(Path::new("/p/node_modules/x/a.ts"), &gitignore).is_none());
        assert!(classify_event(Path::new("/p/readme.md"), &gitignore).is_none());
    }

    #[test]
    fn test_classify_config_files() {
        let gitignore = Gitignore::empty();
        match classify_event(Path::new("/p/tsconfig.json"), &gitignore) {
            Some(WatchEvent::ConfigChanged) => {}
            other => panic!("expected ConfigChanged, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_source_file_is_deleted() {
        let gitignore = Gitignore::empty();
        match classify_event(Path::new("/definitely/not/here.ts"), &gitignore) {
            Some(WatchEvent::Deleted(path)) => assert!(path.ends_with("here.ts")),
            other => panic!("expected Deleted, got {other:?}"),
        }
    }

    #[test]
    fn test_existing_source_file_is_modified() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("live.py");
        std::fs::write(&file, "x = 1").unwrap();
        let gitignore = Gitignore::empty();
        match classify_event(&file, &gitignore) {
            Some(WatchEvent::Modified(path)) => assert_eq!(path, file),
            other => panic!("expected Modified, got {other:?}"),
        }
    }
}
