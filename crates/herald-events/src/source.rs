//! Event source: listener registry and priority-ordered dispatch.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::context::{ContextInner, DeferrableSource, DeferredContext, SourceHandle};
use crate::error::{ErrorHook, ListenerError, panic_detail, resume_caught_panic};
use crate::handler::EventHandler;
use crate::id_pool::IdPool;
use crate::outcome::Outcome;

/// Conventional listener priorities.
///
/// Any `i32` is a valid priority (higher fires earlier); these tiers cover
/// the common case where listeners only need to run before or after the
/// default handlers.
pub mod priority {
    /// Runs after the normal tier.
    pub const LOW: i32 = 0;
    /// The default tier.
    pub const NORMAL: i32 = 5;
    /// Runs before the normal tier.
    pub const HIGH: i32 = 10;
}

/// Registration handle for a listener.
///
/// Unique among the currently-registered listeners of one source; freed ids
/// may be reissued by later registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(pub(crate) u32);

impl ListenerId {
    /// The raw allocator value backing this id.
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener:{}", self.0)
    }
}

struct ListenerEntry<Args> {
    id: ListenerId,
    priority: i32,
    handler: Box<dyn EventHandler<Args>>,
}

struct SourceInner<Args> {
    /// Sorted by descending priority; stable within a tier.
    listeners: Vec<ListenerEntry<Args>>,
    /// Argument tuples buffered by `defer` while a context is attached.
    pending: Vec<Args>,
    ids: IdPool,
    context: Option<Weak<RefCell<ContextInner>>>,
    on_error: Option<ErrorHook>,
}

impl<Args: 'static> SourceInner<Args> {
    fn remove_listener(&mut self, id: ListenerId) -> bool {
        let Some(position) = self.listeners.iter().position(|entry| entry.id == id) else {
            return false;
        };
        self.listeners.remove(position);
        self.ids.release(id.0);
        debug!(listener = %id, "listener removed");
        true
    }

    /// One pass over the listener sequence.
    ///
    /// Returns the payload of the panic that aborted the pass, if any. On
    /// that path the Unregister marks collected so far are discarded and
    /// the listener sequence is left untouched.
    fn dispatch(&mut self, args: &Args) -> Option<Box<dyn Any + Send>> {
        trace!(listeners = self.listeners.len(), "dispatching event");

        let mut stale: Vec<ListenerId> = Vec::new();
        let mut caught: Option<(ListenerId, Box<dyn Any + Send>)> = None;

        for entry in &mut self.listeners {
            let result = catch_unwind(AssertUnwindSafe(|| entry.handler.invoke(args)));
            match result {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Cancel) => break,
                Ok(Outcome::Unregister) => stale.push(entry.id),
                Err(payload) => {
                    caught = Some((entry.id, payload));
                    break;
                }
            }
        }

        if let Some((listener, payload)) = caught {
            self.report(listener, payload.as_ref());
            return Some(payload);
        }

        for id in stale {
            self.remove_listener(id);
        }
        None
    }

    /// Replay the pending buffer FIFO against the current listener set.
    ///
    /// Every tuple gets an independent dispatch pass. A panicking listener
    /// abandons the rest of the batch; the unprocessed tuples are dropped
    /// with it, so the buffer is empty on every exit path.
    fn flush_pending(&mut self) -> Option<Box<dyn Any + Send>> {
        if self.pending.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut self.pending);
        debug!(batch = batch.len(), "replaying deferred events");
        for args in &batch {
            let aborted = self.dispatch(args);
            if aborted.is_some() {
                return aborted;
            }
        }
        None
    }

    /// The attached context, if it is still alive.
    ///
    /// A context that was dropped out from under the source moves the
    /// source back to the unattached state: the stale link is cleared and
    /// pending tuples are discarded, since nothing can flush them any more.
    fn live_context(&mut self) -> Option<Rc<RefCell<ContextInner>>> {
        let upgraded = self.context.as_ref().map(Weak::upgrade);
        match upgraded {
            None => None,
            Some(Some(context)) => Some(context),
            Some(None) => {
                if !self.pending.is_empty() {
                    warn!(
                        discarded = self.pending.len(),
                        "deferred context dropped; discarding pending events"
                    );
                }
                self.context = None;
                self.pending.clear();
                None
            }
        }
    }

    fn report(&mut self, listener: ListenerId, payload: &(dyn Any + Send)) {
        let error = ListenerError {
            listener,
            detail: panic_detail(payload),
        };
        warn!(
            listener = %error.listener,
            detail = %error.detail,
            "listener panicked; remaining listeners of this pass skipped"
        );
        if let Some(hook) = self.on_error.as_mut() {
            hook(&error);
        }
    }
}

impl<Args: 'static> DeferrableSource for SourceInner<Args> {
    fn flush_deferred(&mut self) -> Option<Box<dyn Any + Send>> {
        self.flush_pending()
    }

    fn drop_context(&mut self) {
        self.context = None;
        self.pending.clear();
    }
}

/// A typed event source: priority-ordered listeners plus immediate and
/// deferred dispatch.
///
/// The argument signature is fixed at construction as a tuple type: `()`
/// for no arguments, `(i32,)` for one, and so on. Listeners receive each
/// tuple field by reference and return an [`Outcome`] steering the rest of
/// the pass. Cloning is cheap and yields a handle to the same listener
/// registry.
///
/// A panic inside a listener is caught at the dispatch boundary, reported
/// (structured log plus the optional [error hook](Self::set_error_hook)),
/// and aborts only the current pass; the source stays usable. With the
/// `propagate-panics` feature the caught panic is re-raised to the caller
/// after reporting.
///
/// # Reentrancy
///
/// Sources are single-threaded and non-reentrant: calling back into the
/// same source from inside one of its listeners panics. Listeners may
/// freely operate on *other* sources and on deferred contexts.
pub struct EventSource<Args> {
    inner: Rc<RefCell<SourceInner<Args>>>,
}

impl<Args: 'static> EventSource<Args> {
    /// Create a source with no listeners and no deferred context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SourceInner {
                listeners: Vec::new(),
                pending: Vec::new(),
                ids: IdPool::new(),
                context: None,
                on_error: None,
            })),
        }
    }

    /// Register a listener and return its id.
    ///
    /// The listener is inserted before the first entry with a strictly
    /// lower priority: dispatch order is descending priority, and equal
    /// priorities fire in registration order.
    #[must_use = "the id is needed to remove the listener again"]
    pub fn add_listener<H>(&self, priority: i32, handler: H) -> ListenerId
    where
        H: EventHandler<Args> + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let id = ListenerId(inner.ids.acquire());
        let position = inner
            .listeners
            .iter()
            .position(|entry| entry.priority < priority)
            .unwrap_or(inner.listeners.len());
        inner.listeners.insert(
            position,
            ListenerEntry {
                id,
                priority,
                handler: Box::new(handler),
            },
        );
        debug!(listener = %id, priority, position, "listener registered");
        id
    }

    /// Remove the listener with that id, releasing the id for reuse.
    ///
    /// Returns `false` if no such listener is registered; that is a normal
    /// outcome, not an error.
    #[must_use = "reports whether a listener was actually removed"]
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.borrow_mut().remove_listener(id)
    }

    /// Synchronously invoke the listeners, in priority order.
    ///
    /// See [`Outcome`] for how listeners steer the pass.
    // Takes the tuple by value for symmetry with `defer`, which buffers it.
    #[allow(clippy::needless_pass_by_value)]
    pub fn trigger(&self, args: Args) {
        let aborted = self.inner.borrow_mut().dispatch(&args);
        resume_caught_panic(aborted);
    }

    /// Buffer an invocation behind the attached context, or dispatch
    /// immediately when no live context is attached.
    pub fn defer(&self, args: Args) {
        let mut inner = self.inner.borrow_mut();
        if inner.live_context().is_some() {
            inner.pending.push(args);
            trace!(pending = inner.pending.len(), "event deferred");
            return;
        }
        let aborted = inner.dispatch(&args);
        drop(inner);
        resume_caught_panic(aborted);
    }

    /// Replay every buffered tuple, FIFO, against the current listener set,
    /// then leave the buffer empty.
    ///
    /// Each tuple gets the full priority/Cancel/Unregister semantics
    /// independently; Cancel during one tuple's replay does not affect the
    /// next tuple. Listeners registered after the tuples were buffered
    /// still participate.
    ///
    /// # Panics
    ///
    /// Panics if no deferred context is attached; flushing an unattached
    /// source is a programming-contract violation, not a runtime condition
    /// to recover from.
    pub fn trigger_deferred(&self) {
        let mut inner = self.inner.borrow_mut();
        assert!(
            inner.live_context().is_some(),
            "trigger_deferred called on a source with no deferred context attached"
        );
        let aborted = inner.flush_pending();
        drop(inner);
        resume_caught_panic(aborted);
    }

    /// Attach this source to `context`, detaching from any previously
    /// attached context first.
    ///
    /// Replacement does not flush: buffered tuples carry over and are
    /// flushed by the new context. Re-registering the context that is
    /// already attached is a no-op and keeps the source's flush position.
    pub fn register_context(&self, context: &DeferredContext) {
        let handle = self.as_deferrable();
        let mut inner = self.inner.borrow_mut();
        if let Some(current) = inner.live_context() {
            if Rc::ptr_eq(&current, context.shared()) {
                return;
            }
            current.borrow_mut().unregister(&handle);
        }
        inner.context = Some(Rc::downgrade(context.shared()));
        drop(inner);
        context.shared().borrow_mut().register(handle);
        debug!("source attached to deferred context");
    }

    /// Detach from the current context, if any.
    ///
    /// With `trigger_remaining` set and a non-empty buffer, the buffer is
    /// flushed first (equivalent to [`trigger_deferred`](Self::trigger_deferred)
    /// before detaching). Tuples not flushed do not survive detachment.
    pub fn unregister_context(&self, trigger_remaining: bool) {
        let handle = self.as_deferrable();
        let mut inner = self.inner.borrow_mut();
        let Some(current) = inner.live_context() else {
            return;
        };
        let aborted = if trigger_remaining && !inner.pending.is_empty() {
            inner.flush_pending()
        } else {
            None
        };
        inner.pending.clear();
        inner.context = None;
        drop(inner);
        current.borrow_mut().unregister(&handle);
        debug!("source detached from deferred context");
        resume_caught_panic(aborted);
    }

    /// Wire the hook that observes listener panics.
    ///
    /// Without a hook, failures are reported through the structured log
    /// only and otherwise swallowed.
    pub fn set_error_hook<Hook>(&self, hook: Hook)
    where
        Hook: FnMut(&ListenerError) + 'static,
    {
        self.inner.borrow_mut().on_error = Some(Box::new(hook));
    }

    /// Number of currently-registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    /// Number of buffered argument tuples awaiting a flush.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.borrow().pending.len()
    }

    /// Whether a live deferred context is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.borrow_mut().live_context().is_some()
    }

    /// Whether this source is attached to exactly `context`.
    #[must_use]
    pub fn is_registered_with(&self, context: &DeferredContext) -> bool {
        self.inner
            .borrow_mut()
            .live_context()
            .is_some_and(|current| Rc::ptr_eq(&current, context.shared()))
    }

    /// Drop every listener and recycle the id space.
    pub fn clear_listeners(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.listeners.clear();
        inner.ids.reset();
        debug!("all listeners cleared");
    }

    fn as_deferrable(&self) -> SourceHandle {
        // Method-call syntax matters here: `Rc::clone(&self.inner)` would
        // let the annotation fix the clone's type before the unsize
        // coercion can apply.
        let shared: Rc<RefCell<dyn DeferrableSource>> = self.inner.clone();
        Rc::downgrade(&shared)
    }
}

// Not derived: that would demand `Args: Clone`, and only the handle is
// cloned, never the listeners.
impl<Args> Clone for EventSource<Args> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<Args: 'static> Default for EventSource<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args> fmt::Debug for EventSource<Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("EventSource")
                .field("listener_count", &inner.listeners.len())
                .field("pending_count", &inner.pending.len())
                .field("attached", &inner.context.is_some())
                .finish_non_exhaustive(),
            Err(_) => f.debug_struct("EventSource").finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;

    fn order_log() -> Rc<RefCell<Vec<i32>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn push_listener(log: Rc<RefCell<Vec<i32>>>, tag: i32) -> impl FnMut(&i32) -> Outcome {
        move |_value: &i32| {
            log.borrow_mut().push(tag);
            Outcome::Continue
        }
    }

    // --- ordering ---

    #[test]
    fn listeners_fire_in_descending_priority_order() {
        let source: EventSource<(i32,)> = EventSource::new();
        let order = order_log();

        for tier in [0, 10, 5] {
            let _id = source.add_listener(tier, push_listener(Rc::clone(&order), tier));
        }

        source.trigger((0,));

        assert_eq!(*order.borrow(), [10, 5, 0]);
    }

    #[test]
    fn equal_priorities_fire_in_registration_order() {
        let source: EventSource<(i32,)> = EventSource::new();
        let order = order_log();

        let _first = source.add_listener(priority::NORMAL, push_listener(Rc::clone(&order), 1));
        let _second = source.add_listener(priority::NORMAL, push_listener(Rc::clone(&order), 2));
        let _third = source.add_listener(priority::NORMAL, push_listener(Rc::clone(&order), 3));

        source.trigger((0,));

        assert_eq!(*order.borrow(), [1, 2, 3]);
    }

    // --- outcomes ---

    #[test]
    fn cancel_stops_the_pass_but_keeps_earlier_unregister() {
        let source: EventSource<(i32,)> = EventSource::new();
        let order = order_log();

        let log = Rc::clone(&order);
        let _leaving = source.add_listener(priority::HIGH, move |_value: &i32| {
            log.borrow_mut().push(1);
            Outcome::Unregister
        });
        let log = Rc::clone(&order);
        let _canceller = source.add_listener(priority::NORMAL, move |_value: &i32| {
            log.borrow_mut().push(2);
            Outcome::Cancel
        });
        let _tail = source.add_listener(priority::LOW, push_listener(Rc::clone(&order), 3));

        source.trigger((0,));

        // The cancel kept listener 3 from firing, but not the removal of
        // listener 1.
        assert_eq!(*order.borrow(), [1, 2]);
        assert_eq!(source.listener_count(), 2);

        source.trigger((0,));
        assert_eq!(*order.borrow(), [1, 2, 2]);
    }

    #[test]
    fn unregister_takes_effect_after_the_pass() {
        let source: EventSource<(i32,)> = EventSource::new();
        let fired = Rc::new(Cell::new(0_usize));

        let count = Rc::clone(&fired);
        let _once = source.add_listener(priority::LOW, move |_value: &i32| {
            count.set(count.get().saturating_add(1));
            Outcome::Unregister
        });

        source.trigger((0,));
        source.trigger((0,));

        assert_eq!(fired.get(), 1);
        assert_eq!(source.listener_count(), 0);
    }

    // --- registration ---

    #[test]
    fn remove_listener_reports_whether_removal_occurred() {
        let source: EventSource<(i32,)> = EventSource::new();
        let id = source.add_listener(priority::NORMAL, |_value: &i32| Outcome::Continue);

        assert!(source.remove_listener(id));
        assert!(!source.remove_listener(id));
        assert_eq!(source.listener_count(), 0);
    }

    #[test]
    fn freed_ids_are_reused_and_live_ids_stay_unique() {
        let source: EventSource<(i32,)> = EventSource::new();

        let first = source.add_listener(priority::NORMAL, |_value: &i32| Outcome::Continue);
        let second = source.add_listener(priority::NORMAL, |_value: &i32| Outcome::Continue);
        assert_ne!(first, second);

        assert!(source.remove_listener(first));
        let third = source.add_listener(priority::NORMAL, |_value: &i32| Outcome::Continue);

        assert_eq!(third, first);
        assert_ne!(third, second);
        assert_eq!(source.listener_count(), 2);
    }

    #[test]
    fn clear_listeners_recycles_the_id_space() {
        let source: EventSource<(i32,)> = EventSource::new();
        let first = source.add_listener(priority::NORMAL, |_value: &i32| Outcome::Continue);
        let _second = source.add_listener(priority::NORMAL, |_value: &i32| Outcome::Continue);

        source.clear_listeners();

        assert_eq!(source.listener_count(), 0);
        let fresh = source.add_listener(priority::NORMAL, |_value: &i32| Outcome::Continue);
        assert_eq!(fresh, first);
    }

    #[test]
    fn clone_shares_the_registry() {
        let source: EventSource<(i32,)> = EventSource::new();
        let alias = source.clone();

        let _id = alias.add_listener(priority::NORMAL, |_value: &i32| Outcome::Continue);

        assert_eq!(source.listener_count(), 1);
    }

    // --- deferral without a context ---

    #[test]
    fn defer_without_context_dispatches_immediately() {
        let source: EventSource<(i32,)> = EventSource::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&seen);
        let _id = source.add_listener(priority::NORMAL, move |value: &i32| {
            log.borrow_mut().push(*value);
            Outcome::Continue
        });

        source.defer((15,));

        assert_eq!(*seen.borrow(), [15]);
        assert_eq!(source.pending_count(), 0);
    }

    #[test]
    #[should_panic(expected = "no deferred context")]
    fn trigger_deferred_without_context_panics() {
        let source: EventSource<(i32,)> = EventSource::new();
        source.trigger_deferred();
    }

    // --- failure containment ---

    // These run with the default policy, where a caught panic is reported
    // and swallowed. With `propagate-panics` the trigger re-raises instead;
    // the integration tests cover that build.
    #[cfg(not(feature = "propagate-panics"))]
    #[test]
    fn listener_panic_skips_the_rest_and_reports() {
        let source: EventSource<(i32,)> = EventSource::new();
        let errors = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&errors);
        source.set_error_hook(move |error| sink.borrow_mut().push(error.clone()));

        let faulty = source.add_listener(priority::HIGH, |_value: &i32| -> Outcome {
            panic!("boom");
        });
        let reached = Rc::new(Cell::new(false));
        let flag = Rc::clone(&reached);
        let _tail = source.add_listener(priority::LOW, move |_value: &i32| {
            flag.set(true);
            Outcome::Continue
        });

        source.trigger((1,));

        assert!(!reached.get());
        {
            let reported = errors.borrow();
            assert_eq!(reported.len(), 1);
            assert_eq!(reported[0].listener, faulty);
            assert_eq!(reported[0].detail, "boom");
        }
        assert_eq!(source.listener_count(), 2);

        // The source stays usable once the faulty listener is gone.
        assert!(source.remove_listener(faulty));
        source.trigger((2,));
        assert!(reached.get());
    }

    #[cfg(not(feature = "propagate-panics"))]
    #[test]
    fn panicked_pass_discards_its_unregister_marks() {
        let source: EventSource<(i32,)> = EventSource::new();

        let _leaving = source.add_listener(priority::HIGH, |_value: &i32| Outcome::Unregister);
        let _faulty = source.add_listener(priority::NORMAL, |_value: &i32| -> Outcome {
            panic!("boom");
        });

        source.trigger((0,));

        // The pass aborted before removals were applied, so the sequence
        // is exactly as it was.
        assert_eq!(source.listener_count(), 2);
    }
}
