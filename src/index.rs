//! Constraint bookkeeping attached to graph edges.
//!
//! A single edge can independently carry an *order* facet (parent starts
//! and stops before child) and a *colocation* facet (the endpoints must or
//! must not share a host). `ConstraintIndex` maps edges to their
//! [`ConstraintRecord`]s, tracks the per-epoch keep-sets consulted by the
//! reconciliation sweep, and implements the reuse/reversal rules that keep
//! the graph free of duplicate edges.
//!
//! The maps live behind a read/write lock (the *semantic lock*). Whenever
//! an operation needs both the structural and the semantic lock it takes
//! the structural lock first; the whole crate follows that single order,
//! so the poll-thread sweep and a concurrent user edit cannot deadlock.
//!
//! # Invariants
//! - Every indexed edge has at least one facet set; an edge whose last
//!   facet is cleared is deleted from the store together with its record.
//! - At most one edge object represents a vertex pair, regardless of how
//!   many constraints or orientations have been applied to it.
//! - Placeholder endpoints resolve deterministically to the set member
//!   adjacent to the other endpoint before any edge is touched.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::domain::VertexInfo;
use crate::store::{EdgeId, GraphStore, Topology, VertexId};

/// Provenance of a constraint edit.
///
/// Local edits are pending until a cluster poll re-affirms them; the
/// reconciliation sweep spares pending constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOrigin {
    /// User-initiated edit, not yet visible in cluster status.
    LocalEdit,
    /// Constraint reported by (or re-affirmed from) a cluster poll.
    ClusterPoll,
}

/// Per-edge constraint state.
///
/// `order`/`colocation` are the facet flags; the id sets correlate the
/// edge with the external constraint identifiers owned by the service
/// layer. `wrong_colocation` is a conflict signal only — it never blocks
/// constraint application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintRecord {
    /// External identifiers of order constraints on this edge.
    pub order_ids: BTreeSet<String>,
    /// External identifiers of colocation constraints on this edge.
    pub colocation_ids: BTreeSet<String>,
    /// Order facet: parent must start/stop before child.
    pub order: bool,
    /// Colocation facet: endpoints are (anti-)colocated.
    pub colocation: bool,
    /// The edge's orientation disagrees with a colocation (or order)
    /// direction that was asserted earlier.
    pub wrong_colocation: bool,
    /// Contradictory order directions have been asserted on this edge.
    pub order_conflict: bool,
    /// Proposed locally, not yet confirmed by a poll.
    pub is_new: bool,
}

#[derive(Debug, Default)]
struct IndexState {
    records: HashMap<EdgeId, ConstraintRecord>,
    keep_order: HashSet<EdgeId>,
    keep_colocation: HashSet<EdgeId>,
}

/// The semantic component: edge→record maps and keep-sets behind the
/// semantic lock.
#[derive(Debug, Default)]
pub struct ConstraintIndex {
    state: RwLock<IndexState>,
}

/// Substitutes placeholder endpoints with the concrete set member adjacent
/// to the other endpoint.
///
/// A placeholder parent resolves to the member directly preceding the
/// child; a placeholder child resolves to the member directly following
/// the (already resolved) parent. Returns `None` when the set cannot
/// supply an adjacent member, in which case the whole edit is a no-op.
fn resolve_pair(
    parent: &VertexInfo,
    child: &VertexInfo,
    for_colocation: bool,
) -> Option<(VertexInfo, VertexInfo)> {
    let resolved_parent = match parent {
        VertexInfo::Placeholder(ph) => {
            VertexInfo::Resource(ph.prev_in_sequence(child.id(), for_colocation)?)
        }
        other => other.clone(),
    };
    let resolved_child = match child {
        VertexInfo::Placeholder(ph) => {
            VertexInfo::Resource(ph.next_in_sequence(resolved_parent.id(), for_colocation)?)
        }
        other => other.clone(),
    };
    Some((resolved_parent, resolved_child))
}

impl ConstraintIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or re-affirms) an order constraint `parent` before `child`.
    ///
    /// Reuses the existing edge between the pair when there is one:
    /// a reverse-oriented edge is flipped in place rather than duplicated,
    /// and `wrong_colocation` is raised when that flip contradicts a
    /// colocation-only orientation. The edge lands in the order keep-set.
    ///
    /// Returns the affected edge, or `None` when the endpoints resolve to
    /// the same vertex or a placeholder cannot be resolved.
    pub fn add_order(
        &self,
        store: &GraphStore,
        order_id: &str,
        parent: &VertexInfo,
        child: &VertexInfo,
        origin: EditOrigin,
    ) -> Option<EdgeId> {
        let (pinfo, cinfo) = resolve_pair(parent, child, false)?;
        let mut topo = store.lock();
        let p = topo.add_vertex(pinfo);
        let c = topo.add_vertex(cinfo);
        if p == c {
            // Self-constraints are meaningless, not exceptional.
            return None;
        }
        let mut st = self.state.write();
        let e = match topo.find_edge(p, c) {
            Some(e) => {
                let (committed_parent, _) = topo.endpoints(e)?;
                let rec = st.records.entry(e).or_default();
                if committed_parent == p {
                    rec.order = true;
                    if !rec.order_conflict {
                        rec.wrong_colocation = false;
                    }
                } else {
                    // Only the reverse orientation exists: flip in place.
                    if rec.colocation && !rec.order {
                        rec.wrong_colocation = true;
                        debug!(edge = %e, "order reversal conflicts with colocation direction");
                    }
                    if rec.order {
                        rec.order_conflict = true;
                        debug!(edge = %e, "contradictory order directions asserted");
                    }
                    rec.order = true;
                    topo.reverse(e);
                }
                e
            }
            None => {
                let e = topo.add_edge(p, c);
                let rec = st.records.entry(e).or_default();
                rec.order = true;
                e
            }
        };
        let rec = st.records.entry(e).or_default();
        rec.order_ids.insert(order_id.to_string());
        rec.is_new = origin == EditOrigin::LocalEdit;
        st.keep_order.insert(e);
        trace!(edge = %e, order_id, ?origin, "order constraint applied");
        Some(e)
    }

    /// Adds (or re-affirms) a colocation constraint between `rsc` and
    /// `with_rsc`.
    ///
    /// Mirrors [`ConstraintIndex::add_order`], with one asymmetry: a
    /// reverse-oriented edge that already carries an order facet keeps its
    /// orientation (order direction is binding) and only raises
    /// `wrong_colocation`; a colocation-only reverse edge is flipped. The
    /// edge lands in the colocation keep-set.
    pub fn add_colocation(
        &self,
        store: &GraphStore,
        col_id: &str,
        rsc: &VertexInfo,
        with_rsc: &VertexInfo,
        origin: EditOrigin,
    ) -> Option<EdgeId> {
        let (pinfo, cinfo) = resolve_pair(rsc, with_rsc, true)?;
        let mut topo = store.lock();
        let p = topo.add_vertex(pinfo);
        let c = topo.add_vertex(cinfo);
        if p == c {
            return None;
        }
        let mut st = self.state.write();
        let e = match topo.find_edge(p, c) {
            Some(e) => {
                let (committed_parent, _) = topo.endpoints(e)?;
                let rec = st.records.entry(e).or_default();
                if committed_parent == p {
                    rec.colocation = true;
                    if !rec.order_conflict {
                        rec.wrong_colocation = false;
                    }
                } else if rec.order {
                    // Reversing would silently flip committed order
                    // semantics; keep the orientation and flag it.
                    rec.colocation = true;
                    rec.wrong_colocation = true;
                    debug!(edge = %e, "colocation direction conflicts with order edge");
                } else {
                    rec.colocation = true;
                    topo.reverse(e);
                }
                e
            }
            None => {
                let e = topo.add_edge(p, c);
                let rec = st.records.entry(e).or_default();
                rec.colocation = true;
                e
            }
        };
        let rec = st.records.entry(e).or_default();
        rec.colocation_ids.insert(col_id.to_string());
        rec.is_new = origin == EditOrigin::LocalEdit;
        st.keep_colocation.insert(e);
        trace!(edge = %e, col_id, ?origin, "colocation constraint applied");
        Some(e)
    }

    /// Removes one order constraint from the edge between the endpoints.
    ///
    /// Clears the order facet when its last external id is gone, and
    /// deletes the edge entirely when neither facet remains. Removing an
    /// unknown constraint or an absent edge is a no-op.
    pub fn remove_order(
        &self,
        store: &GraphStore,
        order_id: &str,
        a: &VertexInfo,
        b: &VertexInfo,
    ) {
        let Some((ainfo, binfo)) = resolve_pair(a, b, false) else {
            return;
        };
        let mut topo = store.lock();
        let (Some(va), Some(vb)) = (
            topo.vertex_by_id(ainfo.effective_id()),
            topo.vertex_by_id(binfo.effective_id()),
        ) else {
            return;
        };
        let Some(e) = topo.find_edge(va, vb) else {
            return;
        };
        let mut st = self.state.write();
        if let Some(rec) = st.records.get_mut(&e) {
            rec.order_ids.remove(order_id);
            if rec.order_ids.is_empty() {
                rec.order = false;
                st.keep_order.remove(&e);
            }
        }
        Self::purge_if_empty(&mut topo, &mut st, e);
    }

    /// Removes one colocation constraint from the edge between the
    /// endpoints; see [`ConstraintIndex::remove_order`].
    pub fn remove_colocation(
        &self,
        store: &GraphStore,
        col_id: &str,
        a: &VertexInfo,
        b: &VertexInfo,
    ) {
        let Some((ainfo, binfo)) = resolve_pair(a, b, true) else {
            return;
        };
        let mut topo = store.lock();
        let (Some(va), Some(vb)) = (
            topo.vertex_by_id(ainfo.effective_id()),
            topo.vertex_by_id(binfo.effective_id()),
        ) else {
            return;
        };
        let Some(e) = topo.find_edge(va, vb) else {
            return;
        };
        let mut st = self.state.write();
        if let Some(rec) = st.records.get_mut(&e) {
            rec.colocation_ids.remove(col_id);
            if rec.colocation_ids.is_empty() {
                rec.colocation = false;
                st.keep_colocation.remove(&e);
            }
        }
        Self::purge_if_empty(&mut topo, &mut st, e);
    }

    /// Deletes the edge and its record once both facets are gone
    /// (an edge with neither facet set is not meaningful).
    fn purge_if_empty(topo: &mut Topology, st: &mut IndexState, e: EdgeId) {
        // An edge without a record carries no facet either.
        let empty = st
            .records
            .get(&e)
            .map(|rec| !rec.order && !rec.colocation)
            .unwrap_or(true);
        if empty {
            st.records.remove(&e);
            st.keep_order.remove(&e);
            st.keep_colocation.remove(&e);
            topo.remove_edge(e);
            trace!(edge = %e, "constraint edge purged");
        }
    }

    /// True iff an edge oriented `a`→`b` carries the order facet.
    ///
    /// Order is inherently directed, so the reverse orientation reports
    /// `false` even though the edge itself is found either way.
    pub fn is_order(&self, store: &GraphStore, a: VertexId, b: VertexId) -> bool {
        let topo = store.lock();
        let Some(e) = topo.find_edge(a, b) else {
            return false;
        };
        let oriented = topo.endpoints(e).map(|(p, _)| p == a).unwrap_or(false);
        oriented && self.state.read().records.get(&e).map(|r| r.order).unwrap_or(false)
    }

    /// True iff any edge between `a` and `b` carries the colocation facet
    /// (colocation is symmetric, so direction is ignored).
    pub fn is_colocation(&self, store: &GraphStore, a: VertexId, b: VertexId) -> bool {
        let topo = store.lock();
        let Some(e) = topo.find_edge(a, b) else {
            return false;
        };
        self.state
            .read()
            .records
            .get(&e)
            .map(|r| r.colocation)
            .unwrap_or(false)
    }

    /// The conflict flag of the edge between `a` and `b`, if any.
    pub fn wrong_colocation(&self, store: &GraphStore, a: VertexId, b: VertexId) -> bool {
        let topo = store.lock();
        let Some(e) = topo.find_edge(a, b) else {
            return false;
        };
        self.state
            .read()
            .records
            .get(&e)
            .map(|r| r.wrong_colocation)
            .unwrap_or(false)
    }

    /// Snapshot of an edge's record.
    pub fn record(&self, e: EdgeId) -> Option<ConstraintRecord> {
        self.state.read().records.get(&e).cloned()
    }

    /// Whether the edge was re-affirmed as an order constraint this epoch.
    pub fn in_keep_order(&self, e: EdgeId) -> bool {
        self.state.read().keep_order.contains(&e)
    }

    /// Whether the edge was re-affirmed as a colocation constraint this
    /// epoch.
    pub fn in_keep_colocation(&self, e: EdgeId) -> bool {
        self.state.read().keep_colocation.contains(&e)
    }

    /// Drops every edge whose record is not pending from the order
    /// keep-set. Pending (`is_new`) edges survive the clear so an
    /// in-flight local edit is not lost between polls.
    pub(crate) fn clear_keep_order(&self) {
        let mut st = self.state.write();
        let IndexState {
            records, keep_order, ..
        } = &mut *st;
        keep_order.retain(|e| records.get(e).map(|r| r.is_new).unwrap_or(false));
    }

    /// Colocation counterpart of [`ConstraintIndex::clear_keep_order`].
    pub(crate) fn clear_keep_colocation(&self) {
        let mut st = self.state.write();
        let IndexState {
            records,
            keep_colocation,
            ..
        } = &mut *st;
        keep_colocation.retain(|e| records.get(e).map(|r| r.is_new).unwrap_or(false));
    }

    /// Sweep support: clears the order facet of `e` outright, returning
    /// the external ids that were attached. Caller holds the structural
    /// lock.
    pub(crate) fn clear_order_facet(&self, e: EdgeId) -> Vec<String> {
        let mut st = self.state.write();
        st.keep_order.remove(&e);
        match st.records.get_mut(&e) {
            Some(rec) => {
                rec.order = false;
                std::mem::take(&mut rec.order_ids).into_iter().collect()
            }
            None => Vec::new(),
        }
    }

    /// Sweep support: clears the colocation facet of `e` outright.
    pub(crate) fn clear_colocation_facet(&self, e: EdgeId) -> Vec<String> {
        let mut st = self.state.write();
        st.keep_colocation.remove(&e);
        match st.records.get_mut(&e) {
            Some(rec) => {
                rec.colocation = false;
                std::mem::take(&mut rec.colocation_ids).into_iter().collect()
            }
            None => Vec::new(),
        }
    }

    /// Sweep support: purges `e` if both facets are gone. Caller holds the
    /// structural lock on `topo`.
    pub(crate) fn purge_edge_if_empty(&self, topo: &mut Topology, e: EdgeId) {
        let mut st = self.state.write();
        Self::purge_if_empty(topo, &mut st, e);
    }
}
