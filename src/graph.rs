//! The assembled constraint graph.
//!
//! `ConstraintGraph` wires the structural store, the constraint index,
//! the reconciliation engine, and the dry-run overlay into one engine and
//! enforces the crate-wide lock order (structural → semantic → presence)
//! by always going through the component operations.
//!
//! Two flows mutate the graph: user-initiated edits (resource and
//! constraint add/remove, [`crate::index::EditOrigin::LocalEdit`]) and the background
//! poll loop ([`ConstraintGraph::apply_poll`]). The rendering layer reads
//! through the query surface; none of those calls block on I/O.

use std::sync::Arc;

use tracing::debug;

use crate::domain::{HostObject, PlaceholderObject, ResourceObject, VertexInfo};
use crate::index::{ConstraintIndex, EditOrigin};
use crate::overlay::TestOverlay;
use crate::path;
use crate::reconcile::{PollSnapshot, ReconciliationEngine, SweepObserver};
use crate::store::{EdgeId, GraphError, GraphStore, VertexId};

/// The cluster placement-constraint graph engine.
#[derive(Default)]
pub struct ConstraintGraph {
    store: GraphStore,
    index: ConstraintIndex,
    engine: ReconciliationEngine,
    overlay: TestOverlay,
}

impl ConstraintGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// The structural component.
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// The semantic component.
    pub fn index(&self) -> &ConstraintIndex {
        &self.index
    }

    /// The reconciliation component (presence queries live here).
    pub fn reconciler(&self) -> &ReconciliationEngine {
        &self.engine
    }

    /// The dry-run overlay.
    pub fn overlay(&self) -> &TestOverlay {
        &self.overlay
    }

    // ------------------------------------------------------------------
    // Vertex management
    // ------------------------------------------------------------------

    /// Adds (or finds) the vertex for a resource. Grouped resources
    /// collapse onto their group's vertex.
    pub fn add_resource(&self, resource: Arc<dyn ResourceObject>) -> VertexId {
        self.store.add_vertex(VertexInfo::Resource(resource))
    }

    /// Adds (or finds) the vertex for a host.
    pub fn add_host(&self, host: Arc<dyn HostObject>) -> VertexId {
        self.store.add_vertex(VertexInfo::Host(host))
    }

    /// Adds (or finds) the vertex for a constraint placeholder.
    pub fn add_placeholder(&self, placeholder: Arc<dyn PlaceholderObject>) -> VertexId {
        self.store.add_vertex(VertexInfo::Placeholder(placeholder))
    }

    /// Removes a resource's vertex. The caller must have cleared its
    /// constraints first; a vertex with incident edges is rejected.
    pub fn remove_resource(&self, resource: &dyn ResourceObject) -> Result<(), GraphError> {
        match self.get_vertex(resource) {
            Some(v) => self.store.remove_vertex(v),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Constraint edits
    // ------------------------------------------------------------------

    /// Adds an order constraint; see [`ConstraintIndex::add_order`].
    pub fn add_order(
        &self,
        order_id: &str,
        parent: &VertexInfo,
        child: &VertexInfo,
        origin: EditOrigin,
    ) -> Option<EdgeId> {
        self.index.add_order(&self.store, order_id, parent, child, origin)
    }

    /// Adds a colocation constraint; see
    /// [`ConstraintIndex::add_colocation`].
    pub fn add_colocation(
        &self,
        col_id: &str,
        rsc: &VertexInfo,
        with_rsc: &VertexInfo,
        origin: EditOrigin,
    ) -> Option<EdgeId> {
        self.index
            .add_colocation(&self.store, col_id, rsc, with_rsc, origin)
    }

    /// Removes an order constraint; see [`ConstraintIndex::remove_order`].
    pub fn remove_order(&self, order_id: &str, a: &VertexInfo, b: &VertexInfo) {
        self.index.remove_order(&self.store, order_id, a, b)
    }

    /// Removes a colocation constraint; see
    /// [`ConstraintIndex::remove_colocation`].
    pub fn remove_colocation(&self, col_id: &str, a: &VertexInfo, b: &VertexInfo) {
        self.index.remove_colocation(&self.store, col_id, a, b)
    }

    // ------------------------------------------------------------------
    // Query surface (rendering layer)
    // ------------------------------------------------------------------

    /// Vertex of a resource, after group collapsing.
    pub fn get_vertex(&self, resource: &dyn ResourceObject) -> Option<VertexId> {
        let key = resource.group_id().unwrap_or_else(|| resource.id());
        self.store.vertex_by_id(key)
    }

    /// Domain back-reference of a vertex.
    pub fn get_info(&self, v: VertexId) -> Option<VertexInfo> {
        self.store.get_info(v)
    }

    /// True iff an edge oriented `a`→`b` carries the order facet.
    pub fn is_order(&self, a: VertexId, b: VertexId) -> bool {
        self.index.is_order(&self.store, a, b)
    }

    /// True iff the edge between `a` and `b` carries the colocation
    /// facet.
    pub fn is_colocation(&self, a: VertexId, b: VertexId) -> bool {
        self.index.is_colocation(&self.store, a, b)
    }

    /// True iff `parent` already lies on a path involving `resource`;
    /// see [`path::exists_in_the_path`].
    pub fn exists_in_the_path(&self, resource: VertexId, parent: Option<VertexId>) -> bool {
        path::exists_in_the_path(&self.store, resource, parent)
    }

    /// True iff `v` is an ancestor of `p` through committed edges.
    pub fn is_ancestor(&self, v: VertexId, p: VertexId) -> bool {
        path::is_ancestor(&self.store, v, p)
    }

    /// Whether the latest poll reported the resource.
    pub fn is_present(&self, resource: &dyn ResourceObject) -> bool {
        let key = resource.group_id().unwrap_or_else(|| resource.id());
        self.engine.present().contains(key)
    }

    // ------------------------------------------------------------------
    // Poll ingestion
    // ------------------------------------------------------------------

    /// Applies one poll cycle: replaces the present set, clears the
    /// keep-sets, re-affirms the constraints the cluster reports, applies
    /// explicit removals, and finally sweeps.
    ///
    /// Constraints naming an id with no vertex in the graph are skipped;
    /// the service layer adds resources before their constraints.
    pub fn apply_poll(&self, snapshot: &PollSnapshot, observer: &mut dyn SweepObserver) {
        debug!(
            present = snapshot.present.len(),
            orders = snapshot.orders.len(),
            colocations = snapshot.colocations.len(),
            "poll epoch starts"
        );
        self.engine.set_present(snapshot.present.clone());
        self.engine.clear_keep_order_list(&self.index);
        self.engine.clear_keep_colocation_list(&self.index);

        for order in &snapshot.orders {
            let (Some(parent), Some(child)) =
                (self.info_by_id(&order.parent), self.info_by_id(&order.child))
            else {
                continue;
            };
            self.index.add_order(
                &self.store,
                &order.id,
                &parent,
                &child,
                EditOrigin::ClusterPoll,
            );
        }
        for col in &snapshot.colocations {
            let (Some(rsc), Some(with_rsc)) =
                (self.info_by_id(&col.rsc), self.info_by_id(&col.with_rsc))
            else {
                continue;
            };
            self.index.add_colocation(
                &self.store,
                &col.id,
                &rsc,
                &with_rsc,
                EditOrigin::ClusterPoll,
            );
        }

        for order in &snapshot.orders_removed {
            let (Some(a), Some(b)) =
                (self.info_by_id(&order.parent), self.info_by_id(&order.child))
            else {
                continue;
            };
            self.index.remove_order(&self.store, &order.id, &a, &b);
        }
        for col in &snapshot.colocations_removed {
            let (Some(a), Some(b)) =
                (self.info_by_id(&col.rsc), self.info_by_id(&col.with_rsc))
            else {
                continue;
            };
            self.index.remove_colocation(&self.store, &col.id, &a, &b);
        }

        self.engine
            .kill_removed_edges(&self.store, &self.index, observer);
        self.engine
            .kill_removed_vertices(&self.store, &self.index, observer);
        debug!(
            vertices = self.store.vertex_count(),
            edges = self.store.edge_count(),
            "poll epoch finished"
        );
    }

    fn info_by_id(&self, id: &str) -> Option<VertexInfo> {
        let v = self.store.vertex_by_id(id)?;
        self.store.get_info(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mock::*;
    use crate::reconcile::{NullObserver, OrderSpec};
    use std::collections::HashSet;

    fn present(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn poll_applies_reported_constraints() {
        let graph = ConstraintGraph::new();
        let a = TestResource::confirmed("A");
        let b = TestResource::confirmed("B");
        graph.add_resource(a.clone());
        graph.add_resource(b.clone());

        let snapshot = PollSnapshot {
            present: present(&["A", "B"]),
            orders: vec![OrderSpec {
                id: "o1".into(),
                parent: "A".into(),
                child: "B".into(),
            }],
            ..Default::default()
        };
        graph.apply_poll(&snapshot, &mut NullObserver);

        let va = graph.get_vertex(a.as_ref()).unwrap();
        let vb = graph.get_vertex(b.as_ref()).unwrap();
        assert!(graph.is_order(va, vb));
        assert!(graph.is_present(a.as_ref()));

        // The same snapshot again is a steady state.
        graph.apply_poll(&snapshot, &mut NullObserver);
        assert!(graph.is_order(va, vb));
        assert_eq!(graph.store().edge_count(), 1);
    }

    #[test]
    fn poll_skips_unknown_endpoints() {
        let graph = ConstraintGraph::new();
        graph.add_resource(TestResource::confirmed("A"));

        let snapshot = PollSnapshot {
            present: present(&["A"]),
            orders: vec![OrderSpec {
                id: "o1".into(),
                parent: "A".into(),
                child: "ghost".into(),
            }],
            ..Default::default()
        };
        graph.apply_poll(&snapshot, &mut NullObserver);
        assert_eq!(graph.store().edge_count(), 0);
        assert!(graph.store().vertex_by_id("ghost").is_none());
    }

    #[test]
    fn local_edit_survives_polls_until_confirmed() {
        let graph = ConstraintGraph::new();
        let a = TestResource::confirmed("A");
        let x = TestResource::pending("X");
        graph.add_resource(a.clone());
        graph.add_resource(x.clone());

        let e = graph
            .add_order(
                "o-local",
                &VertexInfo::Resource(a.clone()),
                &VertexInfo::Resource(x.clone()),
                EditOrigin::LocalEdit,
            )
            .unwrap();

        // Polls that know nothing about the edit leave it alone.
        let empty = PollSnapshot {
            present: present(&["A"]),
            ..Default::default()
        };
        graph.apply_poll(&empty, &mut NullObserver);
        graph.apply_poll(&empty, &mut NullObserver);
        assert!(graph.index().record(e).is_some());
        assert!(graph.store().vertex_by_id("X").is_some());

        // The cluster picks it up: the constraint is confirmed.
        x.set_new(false);
        let confirmed = PollSnapshot {
            present: present(&["A", "X"]),
            orders: vec![OrderSpec {
                id: "o-local".into(),
                parent: "A".into(),
                child: "X".into(),
            }],
            ..Default::default()
        };
        graph.apply_poll(&confirmed, &mut NullObserver);
        assert!(!graph.index().record(e).unwrap().is_new);
    }

    #[test]
    fn remove_resource_requires_cleared_edges() {
        let graph = ConstraintGraph::new();
        let a = TestResource::confirmed("A");
        let b = TestResource::confirmed("B");
        graph.add_resource(a.clone());
        graph.add_resource(b.clone());
        graph.add_order(
            "o",
            &VertexInfo::Resource(a.clone()),
            &VertexInfo::Resource(b.clone()),
            EditOrigin::LocalEdit,
        );

        assert!(graph.remove_resource(a.as_ref()).is_err());
        graph.remove_order(
            "o",
            &VertexInfo::Resource(a.clone()),
            &VertexInfo::Resource(b.clone()),
        );
        assert!(graph.remove_resource(a.as_ref()).is_ok());
        // Removing an absent resource is a no-op.
        assert!(graph.remove_resource(a.as_ref()).is_ok());
    }
}
