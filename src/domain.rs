//! Domain-object contract consumed by the constraint graph.
//!
//! The graph never owns cluster state; it holds back-references to domain
//! objects managed by the surrounding service layer. That layer hands in
//! resources, hosts, and constraint placeholders through the narrow traits
//! defined here, and the graph reads lifecycle flags (`is_new`,
//! `is_removed`) live at sweep time rather than caching them.
//!
//! Vertex kinds are a tagged union ([`VertexInfo`]) matched explicitly at
//! query sites; there is no polymorphic dispatch over vertex kind.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Common lifecycle surface of every object the graph can reference.
///
/// `is_new` means "created by a local edit, not yet confirmed by a cluster
/// poll"; `is_removed` means "deletion requested locally". Both are read at
/// reconciliation time, so implementations must reflect the current state,
/// not a snapshot.
pub trait ClusterObject: Send + Sync {
    /// Stable identifier of the object within the cluster configuration.
    fn id(&self) -> &str;

    /// Whether the object is a locally pending addition.
    fn is_new(&self) -> bool;

    /// Whether the object is a locally pending removal.
    fn is_removed(&self) -> bool;
}

/// A managed cluster resource (service, filesystem, address, ...).
pub trait ResourceObject: ClusterObject {
    /// Identifier of the group this resource belongs to, if any.
    ///
    /// Grouped resources collapse onto their group's vertex: every lookup
    /// for a member transparently resolves to the group.
    fn group_id(&self) -> Option<&str> {
        None
    }
}

/// A cluster node capable of hosting resources.
///
/// Host vertices are never swept by reconciliation; membership changes are
/// driven explicitly by the service layer.
pub trait HostObject: ClusterObject {}

/// A placeholder standing in for an ordered or colocated resource set.
///
/// When a constraint names a placeholder as an endpoint, the graph
/// materializes the edge against the concrete member adjacent to the other
/// endpoint, obtained from these accessors.
pub trait PlaceholderObject: ClusterObject {
    /// The member directly following `other_id` in the set's sequence.
    fn next_in_sequence(&self, other_id: &str, for_colocation: bool)
        -> Option<Arc<dyn ResourceObject>>;

    /// The member directly preceding `other_id` in the set's sequence.
    fn prev_in_sequence(&self, other_id: &str, for_colocation: bool)
        -> Option<Arc<dyn ResourceObject>>;
}

/// Kind tag for a vertex, usable without touching the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexKind {
    /// A managed resource (or resource group).
    Resource,
    /// A cluster host.
    Host,
    /// A constraint-set placeholder.
    Placeholder,
}

/// Back-reference from a vertex to its domain object.
///
/// Exactly one vertex exists per domain-object identity (after group
/// collapsing); the graph enforces this by keying vertices on
/// [`VertexInfo::effective_id`].
#[derive(Clone)]
pub enum VertexInfo {
    /// A resource vertex (possibly representing a whole group).
    Resource(Arc<dyn ResourceObject>),
    /// A host vertex.
    Host(Arc<dyn HostObject>),
    /// A constraint-placeholder vertex.
    Placeholder(Arc<dyn PlaceholderObject>),
}

impl VertexInfo {
    /// Kind tag of the referenced object.
    #[inline]
    pub fn kind(&self) -> VertexKind {
        match self {
            VertexInfo::Resource(_) => VertexKind::Resource,
            VertexInfo::Host(_) => VertexKind::Host,
            VertexInfo::Placeholder(_) => VertexKind::Placeholder,
        }
    }

    /// Identifier of the referenced object itself.
    pub fn id(&self) -> &str {
        match self {
            VertexInfo::Resource(r) => r.id(),
            VertexInfo::Host(h) => h.id(),
            VertexInfo::Placeholder(p) => p.id(),
        }
    }

    /// Identifier the vertex is keyed by.
    ///
    /// For a grouped resource this is the group's id, so all members of a
    /// group resolve to one vertex; for everything else it is the object's
    /// own id.
    pub fn effective_id(&self) -> &str {
        match self {
            VertexInfo::Resource(r) => r.group_id().unwrap_or_else(|| r.id()),
            VertexInfo::Host(h) => h.id(),
            VertexInfo::Placeholder(p) => p.id(),
        }
    }

    /// Live `is_new` flag of the referenced object.
    pub fn is_new(&self) -> bool {
        match self {
            VertexInfo::Resource(r) => r.is_new(),
            VertexInfo::Host(h) => h.is_new(),
            VertexInfo::Placeholder(p) => p.is_new(),
        }
    }

    /// Live `is_removed` flag of the referenced object.
    pub fn is_removed(&self) -> bool {
        match self {
            VertexInfo::Resource(r) => r.is_removed(),
            VertexInfo::Host(h) => h.is_removed(),
            VertexInfo::Placeholder(p) => p.is_removed(),
        }
    }
}

impl fmt::Debug for VertexInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VertexInfo")
            .field("kind", &self.kind())
            .field("id", &self.id())
            .finish()
    }
}

/// Storage key under which the position-persistence collaborator files a
/// resource's 2-D coordinates.
///
/// The graph does not interpret coordinates; it only owns the key format.
#[inline]
pub fn position_key(resource: &dyn ResourceObject) -> String {
    format!("hb={}", resource.id())
}
