use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};

use crate::builder::{GraphBuilder, resolve_edges};
use crate::graph::CodeGraph;
use crate::overlay::{GraphOverlay, graph_snapshot_id};
use crate::store::GraphStore;

/// Observer for overlay lifecycle transitions. All methods default to
/// no-ops so implementors pick what they watch.
pub trait OverlayHooks: Send + Sync {
    fn overlay_created(&self, _overlay: &GraphOverlay) {}
    fn overlay_updated(&self, _overlay: &GraphOverlay) {}
    /// Fired on merge with the committed overlay's JSON form.
    fn overlay_committed(&self, _overlay: &serde_json::Value) {}
    fn overlay_discarded(&self, _overlay: &GraphOverlay) {}
}

/// Owns the base graph and the at-most-one live overlay on top of it.
///
/// The base graph is immutable between rebuilds; readers that grab a
/// reference from [`GraphManager::graph`] observe a consistent snapshot.
/// The manager takes no locks — callers are the single writer.
pub struct GraphManager {
    builder: GraphBuilder,
    store: Arc<dyn GraphStore>,
    base: Option<CodeGraph>,
    overlay: Option<GraphOverlay>,
    /// Memoised `overlay.apply(base)`, recomputed only on overlay mutation.
    applied: Option<CodeGraph>,
    hooks: Vec<Box<dyn OverlayHooks>>,
}

impl GraphManager {
    pub fn new(builder: GraphBuilder, store: Arc<dyn GraphStore>) -> Self {
        GraphManager {
            builder,
            store,
            base: None,
            overlay: None,
            applied: None,
            hooks: Vec::new(),
        }
    }

    pub fn add_hooks(&mut self, hooks: Box<dyn OverlayHooks>) {
        self.hooks.push(hooks);
    }

    pub fn is_initialized(&self) -> bool {
        self.base.is_some()
    }

    /// Load the base graph: from the store unless `force_rebuild`, falling
    /// back to a fresh build (which is then saved). Resets overlay state.
    pub fn initialize(&mut self, force_rebuild: bool) -> Result<()> {
        let base = if force_rebuild {
            None
        } else {
            self.store.load().context("loading graph store")?
        };

        let base = match base {
            Some(graph) => graph,
            None => {
                let graph = self.builder.build()?;
                self.store.save(&graph).context("saving built graph")?;
                graph
            }
        };

        self.base = Some(base);
        self.overlay = None;
        self.applied = None;
        Ok(())
    }

    fn base(&self) -> Result<&CodeGraph> {
        self.base
            .as_ref()
            .ok_or_else(|| anyhow!("graph manager is not initialized"))
    }

    /// The effective graph: the base when no overlay is live, otherwise the
    /// memoised overlay application.
    pub fn graph(&mut self) -> Result<&CodeGraph> {
        if self.overlay.is_none() {
            return self.base();
        }
        if self.applied.is_none() {
            let overlay = self.overlay.as_ref().expect("overlay checked above");
            let applied = overlay.apply(self.base()?)?;
            self.applied = Some(applied);
        }
        Ok(self.applied.as_ref().expect("memoised above"))
    }

    pub fn has_pending_overlay(&self) -> bool {
        self.overlay.as_ref().is_some_and(|o| !o.is_empty())
    }

    pub fn modified_paths(&self) -> BTreeSet<String> {
        self.overlay
            .as_ref()
            .map(|o| o.modified_paths.clone())
            .unwrap_or_default()
    }

    /// Fold an on-disk file change into the overlay: re-snapshot the file,
    /// drop any older deltas for its path, remove every base-graph node on
    /// the path, and add the new nodes plus the subset of edges that
    /// resolve against base-minus-path plus the snapshot.
    ///
    /// All fallible work happens before the overlay is touched, so a failed
    /// call leaves the overlay exactly as it was.
    pub fn record_file_modification(&mut self, path: &str) -> Result<()> {
        let base = self.base()?;
        let snapshot = self.builder.snapshot_file(path)?;

        // Resolve edges against a working copy: the base graph with this
        // path's nodes swapped for the snapshot's.
        let mut working = base.clone();
        working.remove_nodes_by_path(path);
        for node in snapshot.nodes() {
            working.upsert_node(node.clone());
        }
        let export_index = working.export_index();
        let resolved = resolve_edges(&working, &export_index, &snapshot.edges);

        let removals: Vec<String> = base
            .get_nodes_by_path(path)
            .iter()
            .map(|n| n.id.clone())
            .collect();

        // Infallible from here on.
        let created = self.overlay.is_none();
        if created {
            let snapshot_id = graph_snapshot_id(self.base.as_ref().expect("initialized"));
            self.overlay = Some(GraphOverlay::new(snapshot_id));
        }
        let overlay = self.overlay.as_mut().expect("overlay just ensured");

        overlay.clear_path(path);
        for node_id in removals {
            overlay.record_remove_node(&node_id, path);
        }
        for node in snapshot.nodes() {
            overlay.record_add_node(node.clone());
        }
        for edge in resolved {
            overlay.record_add_edge(edge, path);
        }

        self.applied = None;

        if created {
            let overlay = self.overlay.as_ref().expect("just created");
            for hooks in &self.hooks {
                hooks.overlay_created(overlay);
            }
        }
        let overlay = self.overlay.as_ref().expect("live overlay");
        for hooks in &self.hooks {
            hooks.overlay_updated(overlay);
        }
        Ok(())
    }

    /// Fold a file deletion into the overlay: drop pending deltas for the
    /// path and remove every base-graph node on it.
    pub fn record_file_deletion(&mut self, path: &str) -> Result<()> {
        let base = self.base()?;
        let removals: Vec<String> = base
            .get_nodes_by_path(path)
            .iter()
            .map(|n| n.id.clone())
            .collect();

        let created = self.overlay.is_none();
        if created {
            let snapshot_id = graph_snapshot_id(self.base.as_ref().expect("initialized"));
            self.overlay = Some(GraphOverlay::new(snapshot_id));
        }
        let overlay = self.overlay.as_mut().expect("overlay just ensured");
        overlay.clear_path(path);
        for node_id in removals {
            overlay.record_remove_node(&node_id, path);
        }
        self.applied = None;

        if created {
            let overlay = self.overlay.as_ref().expect("just created");
            for hooks in &self.hooks {
                hooks.overlay_created(overlay);
            }
        }
        let overlay = self.overlay.as_ref().expect("live overlay");
        for hooks in &self.hooks {
            hooks.overlay_updated(overlay);
        }
        Ok(())
    }

    /// Commit the overlay: rebuild the whole graph from source, save it,
    /// and swap it in as the new base. A full rebuild is the simplest
    /// convergence guarantee.
    pub fn merge_overlay(&mut self) -> Result<()> {
        if self.overlay.is_none() {
            return Err(anyhow!("no overlay to merge"));
        }

        let rebuilt = self.builder.build()?;
        let overlay = self.overlay.take().expect("overlay checked above");
        self.applied = None;
        self.store.save(&rebuilt).context("saving merged graph")?;
        self.base = Some(rebuilt);

        let overlay_json = serde_json::to_value(&overlay)?;
        for hooks in &self.hooks {
            hooks.overlay_committed(&overlay_json);
        }
        Ok(())
    }

    /// Throw the overlay away without touching the base graph.
    pub fn discard_overlay(&mut self) {
        if let Some(overlay) = self.overlay.take() {
            for hooks in &self.hooks {
                hooks.overlay_discarded(&overlay);
            }
        }
        self.applied = None;
    }

    /// Clear the store and all in-memory state.
    pub fn clear_store(&mut self) -> Result<()> {
        self.store.clear()?;
        self.base = None;
        self.overlay = None;
        self.applied = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
