//! Deferred trigger coordination.
//!
//! A [`DeferredContext`] is the shared flush point for any number of event
//! sources: sources buffer their deferred invocations locally, and one
//! [`trigger`](DeferredContext::trigger) call replays every member's buffer
//! at a moment the embedding application picks (end of frame, end of
//! transaction, and so on).

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::error::resume_caught_panic;
use crate::source::EventSource;

/// Type-erased view of a source with a deferral buffer.
///
/// The context only ever needs to flush or orphan a member; everything
/// argument-typed stays behind this trait.
pub(crate) trait DeferrableSource {
    /// Replay the member's buffer, returning the payload of the panic that
    /// aborted the flush, if any.
    fn flush_deferred(&mut self) -> Option<Box<dyn Any + Send>>;

    /// Sever the member's link without flushing; its buffer is discarded.
    fn drop_context(&mut self);
}

/// Non-owning membership handle. Identity is the source allocation, so two
/// handles to the same source compare equal regardless of how they were
/// produced.
pub(crate) type SourceHandle = Weak<RefCell<dyn DeferrableSource>>;

pub(crate) struct ContextInner {
    /// In registration order; flushed front to back.
    members: Vec<SourceHandle>,
}

impl ContextInner {
    pub(crate) fn register(&mut self, source: SourceHandle) {
        let already = self
            .members
            .iter()
            .any(|member| Weak::ptr_eq(member, &source));
        if !already {
            self.members.push(source);
        }
    }

    pub(crate) fn unregister(&mut self, source: &SourceHandle) {
        self.members.retain(|member| !Weak::ptr_eq(member, source));
    }

    fn live_count(&self) -> usize {
        self.members
            .iter()
            .filter(|member| member.strong_count() > 0)
            .count()
    }
}

/// Shared flush point for deferred event dispatch.
///
/// Cloning is cheap and yields a handle to the same membership; a source
/// follows the context, not any particular handle. The context holds its
/// members weakly: dropping a source, or dropping every handle to the
/// context, never keeps the other side alive.
#[derive(Clone)]
pub struct DeferredContext {
    inner: Rc<RefCell<ContextInner>>,
}

impl DeferredContext {
    /// Create a context with no member sources.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ContextInner {
                members: Vec::new(),
            })),
        }
    }

    /// Attach `source` to this context.
    ///
    /// Equivalent to [`EventSource::register_context`]: an attached source
    /// buffers [`defer`](EventSource::defer) calls until the next
    /// [`trigger`](Self::trigger). A source already attached here keeps its
    /// flush position; a source attached elsewhere moves here, buffer and
    /// all.
    pub fn register<Args: 'static>(&self, source: &EventSource<Args>) {
        source.register_context(self);
    }

    /// Detach `source`, if it is attached to this context.
    ///
    /// With `trigger_remaining` set, the source's buffer is flushed before
    /// it leaves; otherwise the buffer is discarded. A source attached to a
    /// different context (or to none) is left alone.
    pub fn unregister<Args: 'static>(&self, source: &EventSource<Args>, trigger_remaining: bool) {
        if source.is_registered_with(self) {
            source.unregister_context(trigger_remaining);
        }
    }

    /// Flush every member source, in registration order.
    ///
    /// Membership is snapshotted up front, so the member sequence is never
    /// mutated while it is being walked: a source attached by a listener
    /// running under this flush waits for the next `trigger`, and a member
    /// unregistered or dropped before its turn comes is skipped. Dead
    /// members are pruned.
    ///
    /// A member whose flush panics has the rest of its batch dropped; the
    /// members after it still flush. With the `propagate-panics` feature
    /// the panic is instead re-raised here, leaving later members
    /// unflushed until the next `trigger`.
    pub fn trigger(&self) {
        let snapshot: Vec<SourceHandle> = {
            let mut inner = self.inner.borrow_mut();
            inner.members.retain(|member| member.strong_count() > 0);
            inner.members.clone()
        };
        trace!(sources = snapshot.len(), "flushing deferred context");
        for member in snapshot {
            // Upgraded at its own turn: a source dropped by a listener
            // earlier in this flush stays dropped and is skipped.
            let Some(source) = member.upgrade() else {
                continue;
            };
            let aborted = source.borrow_mut().flush_deferred();
            resume_caught_panic(aborted);
        }
    }

    /// Number of live member sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().live_count()
    }

    /// Whether no live source is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Detach every member source, discarding their buffers.
    pub fn clear(&self) {
        let members = std::mem::take(&mut self.inner.borrow_mut().members);
        let mut detached = 0_usize;
        for member in members {
            if let Some(source) = member.upgrade() {
                source.borrow_mut().drop_context();
                detached = detached.saturating_add(1);
            }
        }
        debug!(detached, "deferred context cleared");
    }

    pub(crate) fn shared(&self) -> &Rc<RefCell<ContextInner>> {
        &self.inner
    }
}

impl Default for DeferredContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeferredContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("DeferredContext")
                .field("sources", &inner.live_count())
                .finish_non_exhaustive(),
            Err(_) => f.debug_struct("DeferredContext").finish_non_exhaustive(),
        }
    }
}
