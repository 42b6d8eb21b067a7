//! Mark-and-sweep reconciliation against cluster polls.
//!
//! Each poll cycle delivers the set of resources the cluster currently
//! reports. The engine replaces the [`PresentSet`], clears the keep-sets
//! (sparing pending local edits), and then sweeps edges and vertices that
//! are neither freshly re-affirmed nor locally pending. The two-phase
//! protocol tolerates a resource "flickering" out of a single poll
//! response without destroying an in-flight edit, while guaranteeing
//! eventual removal once the cluster consistently stops reporting it.
//!
//! Phase order within one epoch is fixed: `set_present` completes before
//! the keep-sets are cleared, and keep-clearing completes before either
//! sweep runs. Edits racing with a sweep either land in the keep-set
//! before the sweep reads it (and survive) or after (and survive into the
//! next epoch through their `is_new` record flag).
//!
//! Presence has its own read/write lock so fast readers (vertex coloring,
//! labels) are never blocked behind a long sweep holding the structural
//! lock.

use std::collections::HashSet;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::VertexKind;
use crate::index::ConstraintIndex;
use crate::store::{EdgeId, GraphStore};

/// Resources confirmed by the latest poll, keyed by effective id.
///
/// Read far more often than written; guarded by its own lock, last in the
/// crate-wide order (structural → semantic → presence).
#[derive(Debug, Default)]
pub struct PresentSet {
    inner: RwLock<HashSet<String>>,
}

impl PresentSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replaces the set with this epoch's poll result.
    pub fn replace(&self, ids: HashSet<String>) {
        *self.inner.write() = ids;
    }

    /// Whether the latest poll reported `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().contains(id)
    }

    /// Number of reported resources.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no resources were reported.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Boundary to the owning service layer: the sweep reports every facet
/// and vertex it removes so external constraint records can be released.
pub trait SweepObserver {
    /// An order constraint was swept from `edge`.
    fn order_swept(&mut self, _order_id: &str, _edge: EdgeId) {}

    /// A colocation constraint was swept from `edge`.
    fn colocation_swept(&mut self, _col_id: &str, _edge: EdgeId) {}

    /// The vertex keyed by `id` was swept.
    fn vertex_swept(&mut self, _id: &str) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl SweepObserver for NullObserver {}

/// One order constraint as delivered by the poll ingestion layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// External constraint identifier.
    pub id: String,
    /// Effective id of the resource that starts first.
    pub parent: String,
    /// Effective id of the resource that starts after it.
    pub child: String,
}

/// One colocation constraint as delivered by the poll ingestion layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColocationSpec {
    /// External constraint identifier.
    pub id: String,
    /// Effective id of the placed resource.
    pub rsc: String,
    /// Effective id of the resource it is placed with.
    pub with_rsc: String,
}

/// Typed snapshot handed over by the excluded transport/parsing layer
/// once per poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSnapshot {
    /// Effective ids of all resources the cluster reports as configured.
    pub present: HashSet<String>,
    /// Order constraints reported this cycle.
    pub orders: Vec<OrderSpec>,
    /// Colocation constraints reported this cycle.
    pub colocations: Vec<ColocationSpec>,
    /// Order constraints the cluster explicitly dropped this cycle.
    pub orders_removed: Vec<OrderSpec>,
    /// Colocation constraints the cluster explicitly dropped this cycle.
    pub colocations_removed: Vec<ColocationSpec>,
}

/// Runs the per-epoch mark-and-sweep protocol.
#[derive(Debug, Default)]
pub struct ReconciliationEngine {
    present: PresentSet,
}

impl ReconciliationEngine {
    /// Creates an engine with an empty present set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current presence snapshot.
    pub fn present(&self) -> &PresentSet {
        &self.present
    }

    /// Phase 1: replaces the present set with this epoch's poll result.
    pub fn set_present(&self, ids: HashSet<String>) {
        debug!(count = ids.len(), "present set replaced");
        self.present.replace(ids);
    }

    /// Phase 2a: drops non-pending edges from the order keep-set.
    pub fn clear_keep_order_list(&self, index: &ConstraintIndex) {
        index.clear_keep_order();
    }

    /// Phase 2b: drops non-pending edges from the colocation keep-set.
    pub fn clear_keep_colocation_list(&self, index: &ConstraintIndex) {
        index.clear_keep_colocation();
    }

    /// Phase 3: sweeps constraint facets that were not re-affirmed this
    /// epoch and deletes edges left without any facet.
    ///
    /// An edge whose endpoint is a pending, not-yet-removed object is
    /// skipped entirely: the constraint belongs to an edit the cluster
    /// has not seen yet.
    pub fn kill_removed_edges(
        &self,
        store: &GraphStore,
        index: &ConstraintIndex,
        observer: &mut dyn SweepObserver,
    ) {
        let mut topo = store.lock();
        let mut swept = 0usize;
        for e in topo.edge_ids() {
            let Some((p, c)) = topo.endpoints(e) else {
                continue;
            };
            let pending_endpoint = [p, c].into_iter().any(|v| {
                topo.info(v)
                    .map(|i| i.is_new() && !i.is_removed())
                    .unwrap_or(false)
            });
            if pending_endpoint {
                continue;
            }
            if !index.in_keep_order(e) {
                for id in index.clear_order_facet(e) {
                    observer.order_swept(&id, e);
                    swept += 1;
                }
            }
            if !index.in_keep_colocation(e) {
                for id in index.clear_colocation_facet(e) {
                    observer.colocation_swept(&id, e);
                    swept += 1;
                }
            }
            index.purge_edge_if_empty(&mut topo, e);
        }
        debug!(swept, edges = topo.edge_count(), "edge sweep finished");
    }

    /// Phase 4: sweeps vertices the cluster no longer reports.
    ///
    /// Hosts are never swept; vertices with incident edges are left for a
    /// later epoch (their edges go first); pending (`is_new`) vertices
    /// survive until a poll confirms or the edit is abandoned.
    pub fn kill_removed_vertices(
        &self,
        store: &GraphStore,
        _index: &ConstraintIndex,
        observer: &mut dyn SweepObserver,
    ) {
        let mut topo = store.lock();
        let mut swept = 0usize;
        for v in topo.vertex_ids() {
            let (kind, is_new, id) = match topo.info(v) {
                Some(info) => (
                    info.kind(),
                    info.is_new(),
                    info.effective_id().to_string(),
                ),
                None => continue,
            };
            if kind == VertexKind::Host {
                continue;
            }
            if topo.has_incident_edges(v) {
                continue;
            }
            if is_new || self.present.contains(&id) {
                continue;
            }
            if topo.remove_vertex(v).is_ok() {
                observer.vertex_swept(&id);
                swept += 1;
            }
        }
        debug!(swept, vertices = topo.vertex_count(), "vertex sweep finished");
    }

    /// Runs one full reconciliation epoch in the mandated phase order.
    pub fn reconcile(
        &self,
        store: &GraphStore,
        index: &ConstraintIndex,
        present: HashSet<String>,
        observer: &mut dyn SweepObserver,
    ) {
        self.set_present(present);
        self.clear_keep_order_list(index);
        self.clear_keep_colocation_list(index);
        self.kill_removed_edges(store, index, observer);
        self.kill_removed_vertices(store, index, observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mock::*;
    use crate::domain::VertexInfo;
    use crate::index::EditOrigin;

    #[derive(Default)]
    struct Recording {
        orders: Vec<String>,
        colocations: Vec<String>,
        vertices: Vec<String>,
    }

    impl SweepObserver for Recording {
        fn order_swept(&mut self, order_id: &str, _edge: EdgeId) {
            self.orders.push(order_id.to_string());
        }
        fn colocation_swept(&mut self, col_id: &str, _edge: EdgeId) {
            self.colocations.push(col_id.to_string());
        }
        fn vertex_swept(&mut self, id: &str) {
            self.vertices.push(id.to_string());
        }
    }

    fn present(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn pending_vertex_survives_until_confirmed() {
        let store = GraphStore::new();
        let index = ConstraintIndex::new();
        let engine = ReconciliationEngine::new();
        let x = TestResource::pending("X");
        store.add_vertex(VertexInfo::Resource(x.clone()));

        // Absent from the poll but pending: survives.
        engine.reconcile(&store, &index, present(&[]), &mut NullObserver);
        assert!(store.vertex_by_id("X").is_some());

        // Once the edit is no longer pending and the cluster still does
        // not report it, it goes.
        x.set_new(false);
        let mut rec = Recording::default();
        engine.reconcile(&store, &index, present(&[]), &mut rec);
        assert!(store.vertex_by_id("X").is_none());
        assert_eq!(rec.vertices, vec!["X"]);
    }

    #[test]
    fn present_vertex_is_kept() {
        let store = GraphStore::new();
        let index = ConstraintIndex::new();
        let engine = ReconciliationEngine::new();
        store.add_vertex(VertexInfo::Resource(TestResource::confirmed("A")));

        engine.reconcile(&store, &index, present(&["A"]), &mut NullObserver);
        assert!(store.vertex_by_id("A").is_some());
    }

    #[test]
    fn hosts_are_never_swept() {
        let store = GraphStore::new();
        let index = ConstraintIndex::new();
        let engine = ReconciliationEngine::new();
        store.add_vertex(VertexInfo::Host(TestHost::new("node1")));

        engine.reconcile(&store, &index, present(&[]), &mut NullObserver);
        assert!(store.vertex_by_id("node1").is_some());
    }

    #[test]
    fn vertex_with_incident_edges_waits_for_its_edges() {
        let store = GraphStore::new();
        let index = ConstraintIndex::new();
        let engine = ReconciliationEngine::new();
        let a = VertexInfo::Resource(TestResource::confirmed("A"));
        let b = VertexInfo::Resource(TestResource::confirmed("B"));
        index
            .add_order(&store, "o", &a, &b, EditOrigin::ClusterPoll)
            .unwrap();

        // Vertex sweep alone cannot remove A or B: both carry the edge.
        engine.set_present(present(&[]));
        engine.kill_removed_vertices(&store, &index, &mut NullObserver);
        assert!(store.vertex_by_id("A").is_some());
        assert!(store.vertex_by_id("B").is_some());

        // A full epoch sweeps the unaffirmed edge first, freeing the
        // vertices for the vertex sweep of the same epoch.
        engine.reconcile(&store, &index, present(&[]), &mut NullObserver);
        assert_eq!(store.edge_count(), 0);
        assert!(store.vertex_by_id("A").is_none());
        assert!(store.vertex_by_id("B").is_none());
    }

    #[test]
    fn keep_set_shields_reaffirmed_edge_from_flicker() {
        let store = GraphStore::new();
        let index = ConstraintIndex::new();
        let engine = ReconciliationEngine::new();
        let a = VertexInfo::Resource(TestResource::confirmed("A"));
        let b = VertexInfo::Resource(TestResource::confirmed("B"));

        engine.set_present(present(&[]));
        engine.clear_keep_order_list(&index);
        engine.clear_keep_colocation_list(&index);
        // Re-affirmation lands after the clear, before the sweep.
        let e = index
            .add_order(&store, "o", &a, &b, EditOrigin::ClusterPoll)
            .unwrap();
        engine.kill_removed_edges(&store, &index, &mut NullObserver);
        engine.kill_removed_vertices(&store, &index, &mut NullObserver);

        // The edge survives the epoch even though the present set never
        // included its endpoints.
        assert!(index.record(e).is_some());
        assert_eq!(store.edge_count(), 1);
    }

    #[test]
    fn pending_endpoint_shields_edge() {
        let store = GraphStore::new();
        let index = ConstraintIndex::new();
        let engine = ReconciliationEngine::new();
        let x = TestResource::pending("X");
        let a = VertexInfo::Resource(TestResource::confirmed("A"));
        let e = index
            .add_order(
                &store,
                "o",
                &a,
                &VertexInfo::Resource(x.clone()),
                EditOrigin::LocalEdit,
            )
            .unwrap();

        // Two epochs with nothing re-affirmed: the pending endpoint keeps
        // the edge alive both times.
        engine.reconcile(&store, &index, present(&[]), &mut NullObserver);
        engine.reconcile(&store, &index, present(&[]), &mut NullObserver);
        assert!(index.record(e).is_some());

        // The cluster picks the edit up: the resource stops being
        // pending and the poll re-affirms the constraint between the
        // keep-clear and the sweep.
        x.set_new(false);
        engine.set_present(present(&["A", "X"]));
        engine.clear_keep_order_list(&index);
        engine.clear_keep_colocation_list(&index);
        index.add_order(
            &store,
            "o",
            &a,
            &VertexInfo::Resource(x.clone()),
            EditOrigin::ClusterPoll,
        );
        engine.kill_removed_edges(&store, &index, &mut NullObserver);
        engine.kill_removed_vertices(&store, &index, &mut NullObserver);
        assert!(index.record(e).is_some());
        assert!(!index.record(e).unwrap().is_new);

        // Next epoch the cluster drops the constraint and the resources:
        // edge first, then the vertices.
        let mut rec = Recording::default();
        engine.reconcile(&store, &index, present(&[]), &mut rec);
        assert!(index.record(e).is_none());
        assert_eq!(rec.orders, vec!["o"]);
        assert_eq!(store.edge_count(), 0);
        assert!(store.vertex_by_id("A").is_none());
        assert!(store.vertex_by_id("X").is_none());
    }

    #[test]
    fn removed_pending_endpoint_stops_shielding() {
        let store = GraphStore::new();
        let index = ConstraintIndex::new();
        let engine = ReconciliationEngine::new();
        let x = TestResource::pending("X");
        let a = VertexInfo::Resource(TestResource::confirmed("A"));
        let e = index
            .add_order(
                &store,
                "o",
                &a,
                &VertexInfo::Resource(x.clone()),
                EditOrigin::ClusterPoll,
            )
            .unwrap();

        // Pending endpoint: the unaffirmed edge is shielded.
        engine.reconcile(&store, &index, present(&[]), &mut NullObserver);
        assert!(index.record(e).is_some());

        // Removal is requested while the object is still pending; the
        // shield lapses and the edge is swept.
        x.set_removed(true);
        engine.reconcile(&store, &index, present(&[]), &mut NullObserver);
        assert!(index.record(e).is_none());
        assert_eq!(store.edge_count(), 0);
    }

    #[test]
    fn sweep_reports_removed_constraints() {
        let store = GraphStore::new();
        let index = ConstraintIndex::new();
        let engine = ReconciliationEngine::new();
        let a = VertexInfo::Resource(TestResource::confirmed("A"));
        let b = VertexInfo::Resource(TestResource::confirmed("B"));
        index
            .add_order(&store, "o1", &a, &b, EditOrigin::ClusterPoll)
            .unwrap();
        index
            .add_colocation(&store, "c1", &a, &b, EditOrigin::ClusterPoll)
            .unwrap();

        let mut rec = Recording::default();
        engine.reconcile(&store, &index, present(&["A", "B"]), &mut rec);
        assert_eq!(rec.orders, vec!["o1"]);
        assert_eq!(rec.colocations, vec!["c1"]);
        // Present vertices stay even though their constraints are gone.
        assert!(rec.vertices.is_empty());
        assert!(store.vertex_by_id("A").is_some());
        assert!(store.vertex_by_id("B").is_some());
        assert_eq!(store.edge_count(), 0);
    }
}
