//! Slot arenas backing the constraint graph.
//!
//! Vertices and edges are stored in dense arenas (contiguous `Vec`s with
//! free-list reuse) and addressed by `u32` slot indices. The typed
//! identifiers `VertexId`/`EdgeId` in [`crate::store`] wrap these raw
//! indices; the arena itself is untyped so one implementation serves both.
//!
//! Index-based storage sidesteps the ownership cycles a pointer-linked
//! graph would create: adjacency is kept as index lists, and removing a
//! slot cannot leave a dangling reference, only a stale index that lookup
//! reports as vacant.
//!
//! # Determinism
//! - Iteration over live slots is by index (0..capacity).
//! - Free-list reuse is LIFO, so slot indices are stable for a given
//!   sequence of insertions and removals.

/// Slot in an arena: either live data or a link in the free list.
#[derive(Debug, Clone)]
struct Slot<T> {
    data: Option<T>,
    next_free: Option<u32>,
}

/// Contiguous storage with free-list reuse.
///
/// Raw `u32` indices returned by [`Arena::insert`] stay valid until the
/// slot is removed; a removed index may later be handed out again for new
/// data, so callers must not cache indices across removals they do not
/// control. The graph layer never does: edge removal and vertex removal
/// are the only paths that free slots, and both run under the structural
/// lock.
#[derive(Debug, Clone)]
pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    live: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            live: 0,
        }
    }

    /// Number of live entries.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Inserts a value, reusing a freed slot when one is available.
    pub(crate) fn insert(&mut self, value: T) -> u32 {
        self.live += 1;
        match self.free_head {
            Some(idx) => {
                let slot = &mut self.slots[idx as usize];
                self.free_head = slot.next_free.take();
                slot.data = Some(value);
                idx
            }
            None => {
                let idx = self.slots.len() as u32;
                self.slots.push(Slot {
                    data: Some(value),
                    next_free: None,
                });
                idx
            }
        }
    }

    /// Removes and returns the value at `idx`, if the slot is live.
    ///
    /// Removing a vacant or out-of-range index is a no-op returning `None`.
    pub(crate) fn remove(&mut self, idx: u32) -> Option<T> {
        let slot = self.slots.get_mut(idx as usize)?;
        let data = slot.data.take()?;
        slot.next_free = self.free_head;
        self.free_head = Some(idx);
        self.live -= 1;
        Some(data)
    }

    /// Returns a reference to the value at `idx`, if live.
    #[inline]
    pub(crate) fn get(&self, idx: u32) -> Option<&T> {
        self.slots.get(idx as usize).and_then(|s| s.data.as_ref())
    }

    /// Returns a mutable reference to the value at `idx`, if live.
    #[inline]
    pub(crate) fn get_mut(&mut self, idx: u32) -> Option<&mut T> {
        self.slots
            .get_mut(idx as usize)
            .and_then(|s| s.data.as_mut())
    }

    /// Iterates live entries in index order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.data.as_ref().map(|d| (i as u32, d)))
    }

    /// Collects the indices of all live entries, in index order.
    ///
    /// Used by the sweep phases, which must snapshot the id set before
    /// mutating the arena.
    pub(crate) fn indices(&self) -> Vec<u32> {
        self.iter().map(|(i, _)| i).collect()
    }
}
