use std::path::PathBuf;

/// Classified filesystem events the watcher emits.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A source file was created or its content changed.
    Modified(PathBuf),
    /// A source file was deleted.
    Deleted(PathBuf),
    /// A project config file changed — callers should rebuild from scratch.
    ConfigChanged,
}
