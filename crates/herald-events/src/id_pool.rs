//! Recycling allocator for listener registration ids.

/// Issues small `u32` ids and recycles freed ones.
///
/// Freed ids are handed back out most-recently-freed first. Releasing the
/// most recently issued id rolls the fresh counter back instead of recording
/// the id as reusable, which keeps the live id range dense where possible.
///
/// Not thread-safe; meant to be owned by a single allocator of handles, the
/// way [`EventSource`](crate::EventSource) scopes one pool per source.
/// Releasing the same mid-range id twice is not detected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdPool {
    start: u32,
    next: u32,
    free: Vec<u32>,
}

impl IdPool {
    /// Create a pool issuing ids from zero.
    #[must_use]
    pub fn new() -> Self {
        Self::with_start(0)
    }

    /// Create a pool issuing ids from `start`.
    #[must_use]
    pub fn with_start(start: u32) -> Self {
        Self {
            start,
            next: start,
            free: Vec::new(),
        }
    }

    /// Hand out an id, reusing a freed one when available.
    ///
    /// Reused ids come back most-recently-freed first; otherwise the fresh
    /// counter is returned and advanced.
    pub fn acquire(&mut self) -> u32 {
        if let Some(id) = self.free.pop() {
            return id;
        }
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }

    /// Return `id` to the pool.
    ///
    /// Releasing the most recently issued id rolls the fresh counter back;
    /// releasing an id at or beyond the live range is ignored.
    pub fn release(&mut self, id: u32) {
        if self.next == id.wrapping_add(1) {
            self.next = id;
        } else if id < self.next {
            self.free.push(id);
        }
    }

    /// Forget all freed ids and restart issuing from the start offset.
    pub fn reset(&mut self) {
        self.next = self.start;
        self.free.clear();
    }

    /// Like [`reset`](Self::reset), but with a new start offset.
    pub fn reset_to(&mut self, start: u32) {
        self.start = start;
        self.reset();
    }
}
