use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Current cache format version. Bump when the entry layout changes —
/// bincode discriminant layout is positional.
pub const CACHE_VERSION: u32 = 1;

/// Cache directory name (under the model cache root).
pub const CACHE_DIR: &str = ".code-context";
/// Cache file name within [`CACHE_DIR`].
pub const CACHE_FILE: &str = "embeddings.bin";

/// Envelope wrapping the serialised entries with a format version.
#[derive(Serialize, Deserialize)]
struct CacheEnvelope {
    version: u32,
    entries: HashMap<String, Vec<f32>>,
}

/// Content-hashed persistent vector cache. Keys are blake3 digests of the
/// embedded text, so identical content across files and rebuilds shares one
/// entry. Writes are buffered in memory until [`EmbeddingCache::flush`].
pub struct EmbeddingCache {
    path: Option<PathBuf>,
    entries: HashMap<String, Vec<f32>>,
    dirty: bool,
}

impl EmbeddingCache {
    /// Open the cache file under `dir`, tolerating a missing, corrupt, or
    /// version-mismatched file by starting empty.
    pub fn open(dir: &Path) -> Self {
        let path = dir.join(CACHE_DIR).join(CACHE_FILE);
        let entries = std::fs::read(&path)
            .ok()
            .and_then(|bytes| {
                bincode::serde::decode_from_slice::<CacheEnvelope, _>(
                    &bytes,
                    bincode::config::standard(),
                )
                .ok()
            })
            .filter(|(envelope, _)| envelope.version == CACHE_VERSION)
            .map(|(envelope, _)| envelope.entries)
            .unwrap_or_default();

        EmbeddingCache {
            path: Some(path),
            entries,
            dirty: false,
        }
    }

    /// Purely in-memory cache; flush is a no-op. Used in tests and when
    /// embeddings are disabled.
    pub fn in_memory() -> Self {
        EmbeddingCache {
            path: None,
            entries: HashMap::new(),
            dirty: false,
        }
    }

    /// Content key for `text`.
    pub fn key(text: &str) -> String {
        blake3::hash(text.as_bytes()).to_hex().to_string()
    }

    pub fn get(&self, key: &str) -> Option<&Vec<f32>> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: String, vector: Vec<f32>) {
        self.entries.insert(key, vector);
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persist to disk atomically (temp file in the same directory, then
    /// rename). No-op when nothing changed or the cache is memory-only.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let Some(path) = &self.path else {
            self.dirty = false;
            return Ok(());
        };
        let dir = path.parent().context("cache path has no parent directory")?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating cache directory {}", dir.display()))?;

        let envelope = CacheEnvelope {
            version: CACHE_VERSION,
            entries: self.entries.clone(),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        bincode::serde::encode_into_std_write(&envelope, &mut tmp, bincode::config::standard())?;
        tmp.as_file().flush()?;
        tmp.persist(path)
            .with_context(|| format!("replacing cache file {}", path.display()))?;
        self.dirty = false;
        Ok(())
    }

    /// Drop all entries and delete the cache file if one exists.
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.dirty = false;
        if let Some(path) = &self.path {
            if path.exists() {
                std::fs::remove_file(path)
                    .with_context(|| format!("removing cache file {}", path.display()))?;
            }
        }
        Ok(())
    }
}

/// Root directory for model and cache storage: `MODEL_CACHE_DIR`, then
/// `HOME_DIR_OVERRIDE`, then the user's home directory, then cwd.
pub fn cache_root() -> PathBuf {
    if let Ok(dir) = std::env::var("MODEL_CACHE_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Ok(dir) = std::env::var("HOME_DIR_OVERRIDE") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = EmbeddingCache::open(dir.path());
        let key = EmbeddingCache::key("function login() {}");
        cache.insert(key.clone(), vec![0.5, 0.5]);
        cache.flush().unwrap();

        let reopened = EmbeddingCache::open(dir.path());
        assert_eq!(reopened.get(&key), Some(&vec![0.5, 0.5]));
    }

    #[test]
    fn test_key_is_content_hashed() {
        assert_eq!(EmbeddingCache::key("same"), EmbeddingCache::key("same"));
        assert_ne!(EmbeddingCache::key("same"), EmbeddingCache::key("different"));
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = EmbeddingCache::open(dir.path());
        cache.insert(EmbeddingCache::key("x"), vec![1.0]);
        cache.flush().unwrap();

        cache.clear().unwrap();
        assert!(cache.is_empty());
        let reopened = EmbeddingCache::open(dir.path());
        assert!(reopened.is_empty(), "cleared cache must not resurrect");
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join(CACHE_DIR);
        std::fs::create_dir_all(&cache_dir).unwrap();
        std::fs::write(cache_dir.join(CACHE_FILE), b"not bincode").unwrap();

        let cache = EmbeddingCache::open(dir.path());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_in_memory_flush_is_noop() {
        let mut cache = EmbeddingCache::in_memory();
        cache.insert("k".into(), vec![1.0]);
        cache.flush().unwrap();
        assert_eq!(cache.len(), 1);
    }
}
