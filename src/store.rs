use std::sync::Mutex;

use anyhow::Result;

use crate::graph::CodeGraph;

/// Persistence boundary for built graphs. The manager only ever talks to
/// this trait; back-ends beyond the in-memory store live outside the crate.
pub trait GraphStore: Send + Sync {
    /// Return the stored graph, or `None` when nothing has been saved.
    fn load(&self) -> Result<Option<CodeGraph>>;
    fn save(&self, graph: &CodeGraph) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Default process-local store. Saves keep a deep copy; loads hand out a
/// fresh clone, so callers can never mutate the stored graph through a
/// returned reference.
#[derive(Default)]
pub struct InMemoryGraphStore {
    inner: Mutex<Option<CodeGraph>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphStore for InMemoryGraphStore {
    fn load(&self) -> Result<Option<CodeGraph>> {
        Ok(self.inner.lock().expect("graph store poisoned").clone())
    }

    fn save(&self, graph: &CodeGraph) -> Result<()> {
        *self.inner.lock().expect("graph store poisoned") = Some(graph.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.inner.lock().expect("graph store poisoned") = None;
        Ok(())
    }
}
