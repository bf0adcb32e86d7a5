pub mod bm25;
pub mod hnsw;

pub use bm25::Bm25Index;
pub use hnsw::{HnswConfig, HnswIndex};
