pub mod cache;
pub mod cross;

use std::sync::Arc;

use anyhow::Result;

use crate::index::bm25::tokenize;

/// Environment switch: when set (to anything but `0`/`false`), the no-op
/// embedder replaces the real one and the embedding cache is cleared.
pub const EMBEDDINGS_DISABLED_ENV: &str = "EMBEDDINGS_DISABLED";

/// Dense-vector provider. Implementations must be deterministic for equal
/// inputs within a process and produce fixed-dimension normalised vectors.
pub trait Embedder: Send + Sync {
    /// May be called multiple times; every call after the first is a no-op.
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Vector dimension, or 0 when embeddings are disabled.
    fn dimension(&self) -> usize;

    fn is_enabled(&self) -> bool {
        self.dimension() > 0
    }
}

/// Stand-in used when embeddings are disabled: every embed returns an empty
/// vector, which downstream indexes treat as "fall back to lexical".
#[derive(Debug, Default)]
pub struct NoopEmbedder;

impl Embedder for NoopEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }

    fn dimension(&self) -> usize {
        0
    }
}

/// Feature-hashing embedder: each token lands in a signed bucket of a
/// fixed-dimension vector, then the vector is L2-normalised. No model
/// download, fully deterministic, and close enough in shape to a learned
/// embedder that every downstream consumer behaves identically.
#[derive(Debug)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMENSION: usize = 256;

    pub fn new(dimension: usize) -> Self {
        HashingEmbedder {
            dimension: dimension.max(8),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        HashingEmbedder::new(Self::DEFAULT_DIMENSION)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let bucket = u64::from_le_bytes(bytes[..8].try_into().expect("32-byte hash"))
                as usize
                % self.dimension;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

/// Whether the `EMBEDDINGS_DISABLED` switch is active.
pub fn embeddings_disabled() -> bool {
    env_flag(EMBEDDINGS_DISABLED_ENV)
}

/// Build the process embedder: the hashing embedder unless embeddings are
/// disabled via environment or configuration.
pub fn build_embedder(dimension: usize, disabled: bool) -> Arc<dyn Embedder> {
    if disabled || embeddings_disabled() {
        Arc::new(NoopEmbedder)
    } else {
        Arc::new(HashingEmbedder::new(dimension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_embedder_returns_empty() {
        let embedder = NoopEmbedder;
        embedder.initialize().unwrap();
        assert!(embedder.embed("anything").unwrap().is_empty());
        assert!(!embedder.is_enabled());
    }

    #[test]
    fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("authenticate the user").unwrap();
        let b = embedder.embed("authenticate the user").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), HashingEmbedder::DEFAULT_DIMENSION);
    }

    #[test]
    fn test_hashing_embedder_output_is_normalised() {
        let embedder = HashingEmbedder::default();
        let v = embedder.embed("render login form component").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
    }

    #[test]
    fn test_similar_texts_score_higher_than_unrelated() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("authenticate user session token").unwrap();
        let close = embedder.embed("authenticate user credentials").unwrap();
        let far = embedder.embed("render button layout styling").unwrap();

        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(dot(&query, &close) > dot(&query, &far));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let embedder = HashingEmbedder::default();
        embedder.initialize().unwrap();
        embedder.initialize().unwrap();
        assert!(embedder.is_enabled());
    }
}
