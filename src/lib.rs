//! code-context: dependency-aware context retrieval for coding assistants.
//!
//! Given a natural-language change request and a codebase, select the
//! minimal bundle of code the assistant must see to answer safely — with
//! particular weight on *dependents* of the edited code, so callers are
//! not broken. The moving parts:
//!
//! - a typed code graph over files and symbols, built from tree-sitter
//!   ASTs, with a single-writer overlay tracking uncommitted edits;
//! - hybrid candidate search: HNSW vector search and BM25, fused by
//!   reciprocal rank and blended by a weighted reranker (optionally with
//!   a cross-encoder);
//! - a dependency-aware packager that walks the graph forward and
//!   backward from the targets and packs categorised context under a
//!   token budget;
//! - an evaluation pipeline that scores precision/recall against ground
//!   truth and widens the search on failure, emitting a structured trace.

pub mod bench;
pub mod builder;
pub mod config;
pub mod embed;
pub mod eval;
pub mod graph;
pub mod index;
pub mod manager;
pub mod mcp;
pub mod output;
pub mod overlay;
pub mod pipeline;
pub mod retrieval;
pub mod store;
pub mod tokens;
pub mod watcher;

pub use builder::GraphBuilder;
pub use config::CodeContextConfig;
pub use eval::{EvaluationAgent, WideningAction};
pub use graph::CodeGraph;
pub use manager::GraphManager;
pub use overlay::GraphOverlay;
pub use pipeline::{Pipeline, PipelineConfig, PipelineRequest, PipelineResult};
pub use retrieval::{DependencyAwareRetriever, Resolution, TargetResolver};
pub use store::{GraphStore, InMemoryGraphStore};
pub use tokens::TokenCounter;
