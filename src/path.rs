//! Ancestor and path queries over the constraint graph.
//!
//! Used by the edit path to reject or flag constraints that would be
//! redundant or would close a cycle. The committed graph is expected to
//! stay acyclic, but the walk must not hang if it is not: the recursion
//! threads an explicit visited set, so termination is a structural
//! guarantee rather than an assumption.
//!
//! Both queries take the structural lock for the duration of the walk and
//! release it before returning.

use std::collections::HashSet;

use crate::store::{GraphStore, Topology, VertexId};

/// True iff `v` is an ancestor of `p` (or `v == p`) through committed
/// edges.
///
/// Walks the predecessor relation recursively; `visited` guards against
/// cyclic input.
pub fn is_ancestor(store: &GraphStore, v: VertexId, p: VertexId) -> bool {
    let topo = store.lock();
    let mut visited = HashSet::new();
    is_ancestor_in(&topo, v, p, &mut visited)
}

/// Lock-free core of [`is_ancestor`]; the caller holds the structural
/// lock and supplies the visited guard.
pub(crate) fn is_ancestor_in(
    topo: &Topology,
    v: VertexId,
    p: VertexId,
    visited: &mut HashSet<VertexId>,
) -> bool {
    if v == p {
        return true;
    }
    if !visited.insert(p) {
        // Already expanded on this walk; a repeat means a cycle below p.
        return false;
    }
    topo.predecessors(p)
        .into_iter()
        .any(|pred| is_ancestor_in(topo, v, pred, visited))
}

/// True iff `parent` already lies on a path involving `resource`.
///
/// Accepts a missing `parent` defensively. Otherwise true when the two
/// are the same vertex, when `parent` is a direct successor of
/// `resource`, or when `resource` is an ancestor of `parent`.
pub fn exists_in_the_path(
    store: &GraphStore,
    resource: VertexId,
    parent: Option<VertexId>,
) -> bool {
    let Some(parent) = parent else {
        return true;
    };
    if resource == parent {
        return true;
    }
    let topo = store.lock();
    if topo.successors(resource).contains(&parent) {
        return true;
    }
    let mut visited = HashSet::new();
    is_ancestor_in(&topo, resource, parent, &mut visited)
}
