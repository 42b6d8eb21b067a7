//! Structural graph storage.
//!
//! `GraphStore` owns the vertices and edges of the constraint graph and
//! nothing else: no constraint meaning, no presence state. Vertices and
//! edges live in slot arenas and are addressed by `VertexId`/`EdgeId`;
//! adjacency is kept as per-vertex edge-id lists.
//!
//! All structural mutation is serialized by a single mutex (the
//! *structural lock*), owned by the store itself. Compound operations in
//! other modules take the lock once via [`GraphStore::lock`] and work on
//! the inner [`Topology`] so a find-then-mutate sequence cannot interleave
//! with another writer.
//!
//! # Invariants
//! - At most one vertex per effective domain-object id (group collapsing
//!   happens in [`crate::domain::VertexInfo::effective_id`]).
//! - At most one edge per unordered endpoint pair; `find_edge(u, v)` and
//!   `find_edge(v, u)` return the same id.
//! - A vertex with incident edges cannot be removed.
//! - Reversing an edge preserves its id and endpoint pair.

use std::collections::HashMap;
use std::fmt;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::arena::Arena;
use crate::domain::VertexInfo;

/// Identifier of a vertex; an index into the vertex arena.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VertexId(u32);

impl VertexId {
    /// Raw arena index.
    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Identifier of an edge; an index into the edge arena.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EdgeId(u32);

impl EdgeId {
    /// Raw arena index.
    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Structural contract violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GraphError {
    /// `remove_vertex` was called while edges are still attached. The
    /// caller must clear the edges first; this is a defect in the calling
    /// code, not a runtime condition.
    #[error("vertex {0} still has incident edges")]
    IncidentEdges(VertexId),
}

#[derive(Debug)]
struct Vertex {
    info: VertexInfo,
    /// Edges whose child is this vertex.
    incoming: Vec<EdgeId>,
    /// Edges whose parent is this vertex.
    outgoing: Vec<EdgeId>,
}

/// A directed edge. Orientation is parent→child and can be flipped in
/// place; the unordered endpoint pair is the edge's lookup identity.
#[derive(Debug, Clone, Copy)]
struct Edge {
    parent: VertexId,
    child: VertexId,
}

/// Normalized key for direction-agnostic edge lookup.
#[inline]
fn pair_key(a: VertexId, b: VertexId) -> (VertexId, VertexId) {
    if a.as_u32() <= b.as_u32() {
        (a, b)
    } else {
        (b, a)
    }
}

/// The mutable graph structure behind the structural lock.
#[derive(Default)]
pub(crate) struct Topology {
    vertices: Arena<Vertex>,
    edges: Arena<Edge>,
    /// Effective id → vertex, the group-collapsed identity map.
    by_id: HashMap<String, VertexId>,
    /// Unordered endpoint pair → edge.
    by_pair: HashMap<(VertexId, VertexId), EdgeId>,
}

impl Topology {
    /// Adds a vertex for `info`, or returns the existing one keyed by the
    /// same effective id.
    pub(crate) fn add_vertex(&mut self, info: VertexInfo) -> VertexId {
        let key = info.effective_id().to_string();
        if let Some(&v) = self.by_id.get(&key) {
            return v;
        }
        let v = VertexId(self.vertices.insert(Vertex {
            info,
            incoming: Vec::new(),
            outgoing: Vec::new(),
        }));
        trace!(vertex = %v, id = %key, "vertex added");
        self.by_id.insert(key, v);
        v
    }

    /// Removes a vertex. Rejected while incident edges exist; removing an
    /// already-absent vertex is a no-op.
    pub(crate) fn remove_vertex(&mut self, v: VertexId) -> Result<(), GraphError> {
        let vertex = match self.vertices.get(v.as_u32()) {
            Some(vx) => vx,
            None => return Ok(()),
        };
        if !vertex.incoming.is_empty() || !vertex.outgoing.is_empty() {
            // Contract violation by the caller; keep the vertex intact.
            tracing::error!(vertex = %v, "remove_vertex called with incident edges");
            return Err(GraphError::IncidentEdges(v));
        }
        let key = vertex.info.effective_id().to_string();
        self.vertices.remove(v.as_u32());
        self.by_id.remove(&key);
        trace!(vertex = %v, id = %key, "vertex removed");
        Ok(())
    }

    /// Adds an edge oriented `parent`→`child`, or returns the existing
    /// edge between the pair (whatever its orientation).
    pub(crate) fn add_edge(&mut self, parent: VertexId, child: VertexId) -> EdgeId {
        if let Some(&e) = self.by_pair.get(&pair_key(parent, child)) {
            return e;
        }
        let e = EdgeId(self.edges.insert(Edge { parent, child }));
        self.by_pair.insert(pair_key(parent, child), e);
        if let Some(p) = self.vertices.get_mut(parent.as_u32()) {
            p.outgoing.push(e);
        }
        if let Some(c) = self.vertices.get_mut(child.as_u32()) {
            c.incoming.push(e);
        }
        trace!(edge = %e, %parent, %child, "edge added");
        e
    }

    /// Removes an edge and detaches it from both endpoints' adjacency.
    /// No-op for an already-absent edge.
    pub(crate) fn remove_edge(&mut self, e: EdgeId) {
        let edge = match self.edges.remove(e.as_u32()) {
            Some(edge) => edge,
            None => return,
        };
        self.by_pair.remove(&pair_key(edge.parent, edge.child));
        if let Some(p) = self.vertices.get_mut(edge.parent.as_u32()) {
            p.outgoing.retain(|&x| x != e);
        }
        if let Some(c) = self.vertices.get_mut(edge.child.as_u32()) {
            c.incoming.retain(|&x| x != e);
        }
        trace!(edge = %e, "edge removed");
    }

    /// Direction-agnostic edge lookup.
    #[inline]
    pub(crate) fn find_edge(&self, u: VertexId, v: VertexId) -> Option<EdgeId> {
        self.by_pair.get(&pair_key(u, v)).copied()
    }

    /// Current orientation of an edge as `(parent, child)`.
    #[inline]
    pub(crate) fn endpoints(&self, e: EdgeId) -> Option<(VertexId, VertexId)> {
        self.edges.get(e.as_u32()).map(|edge| (edge.parent, edge.child))
    }

    /// Flips an edge's orientation in place. Id and endpoint pair are
    /// preserved; only the parent/child roles swap.
    pub(crate) fn reverse(&mut self, e: EdgeId) {
        let (old_parent, old_child) = match self.endpoints(e) {
            Some(pc) => pc,
            None => return,
        };
        if let Some(edge) = self.edges.get_mut(e.as_u32()) {
            edge.parent = old_child;
            edge.child = old_parent;
        }
        if let Some(p) = self.vertices.get_mut(old_parent.as_u32()) {
            p.outgoing.retain(|&x| x != e);
            p.incoming.push(e);
        }
        if let Some(c) = self.vertices.get_mut(old_child.as_u32()) {
            c.incoming.retain(|&x| x != e);
            c.outgoing.push(e);
        }
        trace!(edge = %e, "edge reversed");
    }

    /// Parents of `v`: the other endpoints of its incoming edges.
    pub(crate) fn predecessors(&self, v: VertexId) -> Vec<VertexId> {
        match self.vertices.get(v.as_u32()) {
            Some(vx) => vx
                .incoming
                .iter()
                .filter_map(|&e| self.endpoints(e).map(|(p, _)| p))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Children of `v`: the other endpoints of its outgoing edges.
    pub(crate) fn successors(&self, v: VertexId) -> Vec<VertexId> {
        match self.vertices.get(v.as_u32()) {
            Some(vx) => vx
                .outgoing
                .iter()
                .filter_map(|&e| self.endpoints(e).map(|(_, c)| c))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Whether any edge touches `v`.
    #[inline]
    pub(crate) fn has_incident_edges(&self, v: VertexId) -> bool {
        self.vertices
            .get(v.as_u32())
            .map(|vx| !vx.incoming.is_empty() || !vx.outgoing.is_empty())
            .unwrap_or(false)
    }

    /// Looks up a vertex by effective id.
    #[inline]
    pub(crate) fn vertex_by_id(&self, id: &str) -> Option<VertexId> {
        self.by_id.get(id).copied()
    }

    /// Domain back-reference of a vertex.
    #[inline]
    pub(crate) fn info(&self, v: VertexId) -> Option<&VertexInfo> {
        self.vertices.get(v.as_u32()).map(|vx| &vx.info)
    }

    /// Snapshot of all live vertex ids, in index order.
    pub(crate) fn vertex_ids(&self) -> Vec<VertexId> {
        self.vertices.indices().into_iter().map(VertexId).collect()
    }

    /// Snapshot of all live edge ids, in index order.
    pub(crate) fn edge_ids(&self) -> Vec<EdgeId> {
        self.edges.indices().into_iter().map(EdgeId).collect()
    }

    #[inline]
    pub(crate) fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub(crate) fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

/// The structural component: topology behind its own lock.
///
/// Lock order (fixed crate-wide): structural → semantic → presence. Any
/// operation needing the structural lock together with another acquires
/// this one first.
#[derive(Default)]
pub struct GraphStore {
    inner: Mutex<Topology>,
}

impl GraphStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the structural lock for a compound operation.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Topology> {
        self.inner.lock()
    }

    /// Adds (or finds) the vertex for a domain object.
    pub fn add_vertex(&self, info: VertexInfo) -> VertexId {
        self.lock().add_vertex(info)
    }

    /// Removes a vertex; see [`Topology::remove_vertex`].
    pub fn remove_vertex(&self, v: VertexId) -> Result<(), GraphError> {
        self.lock().remove_vertex(v)
    }

    /// Adds (or finds) the edge between two vertices.
    pub fn add_edge(&self, parent: VertexId, child: VertexId) -> EdgeId {
        self.lock().add_edge(parent, child)
    }

    /// Removes an edge; no-op if absent.
    pub fn remove_edge(&self, e: EdgeId) {
        self.lock().remove_edge(e)
    }

    /// Direction-agnostic edge lookup.
    pub fn find_edge(&self, u: VertexId, v: VertexId) -> Option<EdgeId> {
        self.lock().find_edge(u, v)
    }

    /// Flips an edge's orientation in place.
    pub fn reverse(&self, e: EdgeId) {
        self.lock().reverse(e)
    }

    /// Current `(parent, child)` orientation of an edge.
    pub fn endpoints(&self, e: EdgeId) -> Option<(VertexId, VertexId)> {
        self.lock().endpoints(e)
    }

    /// Parents of `v`.
    pub fn predecessors(&self, v: VertexId) -> Vec<VertexId> {
        self.lock().predecessors(v)
    }

    /// Children of `v`.
    pub fn successors(&self, v: VertexId) -> Vec<VertexId> {
        self.lock().successors(v)
    }

    /// Looks up a vertex by effective id.
    pub fn vertex_by_id(&self, id: &str) -> Option<VertexId> {
        self.lock().vertex_by_id(id)
    }

    /// Clones the domain back-reference of a vertex.
    pub fn get_info(&self, v: VertexId) -> Option<VertexInfo> {
        self.lock().info(v).cloned()
    }

    /// Number of live vertices.
    pub fn vertex_count(&self) -> usize {
        self.lock().vertex_count()
    }

    /// Number of live edges.
    pub fn edge_count(&self) -> usize {
        self.lock().edge_count()
    }
}
