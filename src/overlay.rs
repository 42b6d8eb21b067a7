//! Dry-run overlay: provisional edges for previewing a hypothetical
//! constraint change.
//!
//! Overlay edges are rendered alongside the committed graph but never
//! merged into the constraint index, never enter the keep-sets, and are
//! invisible to the reconciliation sweeps. The overlay is cleared
//! wholesale when a new dry-run evaluation starts; there is no
//! incremental diffing.

use parking_lot::Mutex;

use crate::store::{EdgeId, VertexId};

/// One previewed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayEdge {
    /// A hypothetical edge between two vertices that are not (yet)
    /// connected in the committed graph.
    New(VertexId, VertexId),
    /// A committed edge highlighted as part of the preview.
    Existing(EdgeId),
}

/// Shadow edge set for what-if previews.
#[derive(Debug, Default)]
pub struct TestOverlay {
    edges: Mutex<Vec<OverlayEdge>>,
}

impl TestOverlay {
    /// Creates an empty overlay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a hypothetical edge between `u` and `v`.
    pub fn add_test_edge(&self, u: VertexId, v: VertexId) {
        self.edges.lock().push(OverlayEdge::New(u, v));
    }

    /// Marks a committed edge as part of the preview.
    pub fn add_existing_test_edge(&self, e: EdgeId) {
        self.edges.lock().push(OverlayEdge::Existing(e));
    }

    /// Discards the whole preview.
    pub fn clear(&self) {
        self.edges.lock().clear();
    }

    /// Snapshot of the previewed edges, in insertion order.
    pub fn edges(&self) -> Vec<OverlayEdge> {
        self.edges.lock().clone()
    }

    /// Whether a preview is active.
    pub fn is_empty(&self) -> bool {
        self.edges.lock().is_empty()
    }
}
