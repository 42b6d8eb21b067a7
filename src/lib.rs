//! Placegraph: the placement-constraint graph engine for clustered
//! high-availability resources.
//!
//! The graph's vertices are managed resources, cluster hosts, and
//! constraint-set placeholders; its edges encode *order* ("start A before
//! B") and *colocation* ("run A on the same host as B") relationships. A
//! single edge can carry both meanings, each with its own lifecycle. The
//! graph is mutated concurrently from two sides: user-initiated edits,
//! and a background poll loop that reconciles the graph against the
//! status the cluster actually reports.
//!
//! # Components
//! - [`store::GraphStore`] — vertices, edges, adjacency; structural lock.
//! - [`index::ConstraintIndex`] — per-edge constraint records, keep-sets;
//!   semantic lock.
//! - [`path`] — ancestor/cycle queries used to vet proposed constraints.
//! - [`reconcile::ReconciliationEngine`] — mark-and-sweep against poll
//!   snapshots; presence lock.
//! - [`overlay::TestOverlay`] — dry-run preview edges, outside the
//!   committed state.
//! - [`graph::ConstraintGraph`] — the assembled engine and query surface.
//!
//! # Locking
//! Three lock domains, always acquired in the same order when more than
//! one is needed: structural → semantic → presence. Presence readers take
//! only the presence lock so status queries are never stalled behind a
//! sweep.
//!
//! # Example
//!
//! ```
//! use placegraph::prelude::*;
//! use std::sync::Arc;
//!
//! # struct R(&'static str);
//! # impl ClusterObject for R {
//! #     fn id(&self) -> &str { self.0 }
//! #     fn is_new(&self) -> bool { false }
//! #     fn is_removed(&self) -> bool { false }
//! # }
//! # impl ResourceObject for R {}
//! let graph = ConstraintGraph::new();
//! let a: Arc<dyn ResourceObject> = Arc::new(R("apache"));
//! let b: Arc<dyn ResourceObject> = Arc::new(R("ip"));
//! graph.add_resource(a.clone());
//! graph.add_resource(b.clone());
//! graph.add_order(
//!     "o1",
//!     &VertexInfo::Resource(a.clone()),
//!     &VertexInfo::Resource(b.clone()),
//!     EditOrigin::LocalEdit,
//! );
//! let va = graph.get_vertex(a.as_ref()).unwrap();
//! let vb = graph.get_vertex(b.as_ref()).unwrap();
//! assert!(graph.is_order(va, vb));
//! ```

pub mod arena;
pub mod domain;
pub mod graph;
pub mod index;
pub mod overlay;
pub mod path;
pub mod reconcile;
pub mod store;

pub use domain::{
    position_key, ClusterObject, HostObject, PlaceholderObject, ResourceObject, VertexInfo,
    VertexKind,
};
pub use graph::ConstraintGraph;
pub use index::{ConstraintIndex, ConstraintRecord, EditOrigin};
pub use overlay::{OverlayEdge, TestOverlay};
pub use path::{exists_in_the_path, is_ancestor};
pub use reconcile::{
    ColocationSpec, NullObserver, OrderSpec, PollSnapshot, PresentSet, ReconciliationEngine,
    SweepObserver,
};
pub use store::{EdgeId, GraphError, GraphStore, VertexId};

/// Prelude for convenient usage.
pub mod prelude {
    pub use crate::domain::{
        position_key, ClusterObject, HostObject, PlaceholderObject, ResourceObject, VertexInfo,
        VertexKind,
    };
    pub use crate::graph::ConstraintGraph;
    pub use crate::index::{ConstraintIndex, ConstraintRecord, EditOrigin};
    pub use crate::overlay::{OverlayEdge, TestOverlay};
    pub use crate::reconcile::{
        ColocationSpec, NullObserver, OrderSpec, PollSnapshot, PresentSet, ReconciliationEngine,
        SweepObserver,
    };
    pub use crate::store::{EdgeId, GraphError, GraphStore, VertexId};
}

#[cfg(test)]
mod tests {
    use super::domain::mock::*;
    use super::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn present(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn rsc(r: &Arc<TestResource>) -> VertexInfo {
        VertexInfo::Resource(r.clone())
    }

    /// The full poll-and-sweep scenario: constraints the cluster stops
    /// reporting are swept, while still-present resources stay.
    #[test]
    fn end_to_end_sweep_scenario() {
        let graph = ConstraintGraph::new();
        let a = TestResource::confirmed("A");
        let b = TestResource::confirmed("B");
        let c = TestResource::confirmed("C");
        for r in [&a, &b, &c] {
            graph.add_resource(r.clone());
        }

        let e = graph
            .add_order("o1", &rsc(&a), &rsc(&b), EditOrigin::ClusterPoll)
            .unwrap();
        assert_eq!(
            graph.add_colocation("c1", &rsc(&a), &rsc(&b), EditOrigin::ClusterPoll),
            Some(e)
        );
        let record = graph.index().record(e).unwrap();
        assert!(record.order && record.colocation);

        // The poll reports A and B present but never re-affirms the
        // constraints: both facets are swept and the edge disappears,
        // while the present vertices remain.
        let snapshot = PollSnapshot {
            present: present(&["A", "B"]),
            ..Default::default()
        };
        graph.apply_poll(&snapshot, &mut NullObserver);

        assert!(graph.index().record(e).is_none());
        assert_eq!(graph.store().edge_count(), 0);
        assert!(graph.get_vertex(a.as_ref()).is_some());
        assert!(graph.get_vertex(b.as_ref()).is_some());
        // C was neither present nor pending: gone.
        assert!(graph.get_vertex(c.as_ref()).is_none());
    }

    /// Order chains feed the path queries used to vet new constraints.
    #[test]
    fn cycle_vetting_over_order_chain() {
        let graph = ConstraintGraph::new();
        let a = TestResource::confirmed("A");
        let b = TestResource::confirmed("B");
        let c = TestResource::confirmed("C");
        graph.add_order("o1", &rsc(&a), &rsc(&b), EditOrigin::ClusterPoll);
        graph.add_order("o2", &rsc(&b), &rsc(&c), EditOrigin::ClusterPoll);

        let va = graph.get_vertex(a.as_ref()).unwrap();
        let vc = graph.get_vertex(c.as_ref()).unwrap();
        assert!(graph.exists_in_the_path(va, Some(vc)));
        assert!(!graph.exists_in_the_path(vc, Some(va)));
    }

    /// A poll thread and an edit thread race on the same graph; the lock
    /// hierarchy keeps the structures consistent and the pending edit
    /// survives whichever side of the sweep it lands on.
    #[test]
    fn concurrent_edit_and_poll() {
        let graph = Arc::new(ConstraintGraph::new());
        let a = TestResource::confirmed("A");
        let b = TestResource::confirmed("B");
        graph.add_resource(a.clone());
        graph.add_resource(b.clone());

        let poller = {
            let graph = Arc::clone(&graph);
            thread::spawn(move || {
                let snapshot = PollSnapshot {
                    present: present(&["A", "B"]),
                    ..Default::default()
                };
                for _ in 0..100 {
                    graph.apply_poll(&snapshot, &mut NullObserver);
                }
            })
        };
        let editor = {
            let graph = Arc::clone(&graph);
            let (a, b) = (a.clone(), b.clone());
            thread::spawn(move || {
                for i in 0..100 {
                    graph.add_order(
                        &format!("o{i}"),
                        &VertexInfo::Resource(a.clone()),
                        &VertexInfo::Resource(b.clone()),
                        EditOrigin::LocalEdit,
                    );
                }
            })
        };
        poller.join().unwrap();
        editor.join().unwrap();

        // The pending edits shield the edge from every sweep.
        let va = graph.get_vertex(a.as_ref()).unwrap();
        let vb = graph.get_vertex(b.as_ref()).unwrap();
        assert!(graph.is_order(va, vb));
        assert_eq!(graph.store().edge_count(), 1);
    }
}
