//! Herald Events - priority-ordered listeners with deferred dispatch.
//!
//! This crate provides:
//! - Typed event sources with priority-ordered listener callbacks
//! - Listener outcomes that cancel the rest of a pass or unregister the
//!   callback that returned them
//! - Deferred triggering through a shared flush point
//! - A recycling allocator for listener registration ids
//!
//! # Architecture
//!
//! An [`EventSource`] owns an ordered registry of listeners, each a
//! callback taking the source's argument tuple by reference and returning
//! an [`Outcome`]. There are two ways to dispatch:
//!
//! 1. **Immediate**: [`trigger`](EventSource::trigger) runs the listeners
//!    on the spot, highest priority first.
//!
//! 2. **Deferred**: attach the source to a [`DeferredContext`]; from then
//!    on [`defer`](EventSource::defer) buffers the arguments, and the
//!    context's [`trigger`](DeferredContext::trigger) replays every
//!    member's buffer at a moment the application picks.
//!
//! Everything is single-threaded: sources, contexts, and listeners live on
//! one thread and none of the handles are `Send`.
//!
//! # Example
//!
//! ```rust
//! use herald_events::{DeferredContext, EventSource, Outcome, priority};
//!
//! let on_save: EventSource<(String,)> = EventSource::new();
//!
//! let _audit = on_save.add_listener(priority::HIGH, |path: &String| {
//!     println!("saving {path}");
//!     Outcome::Continue
//! });
//!
//! // Immediate dispatch:
//! on_save.trigger(("config.toml".to_string(),));
//!
//! // Deferred dispatch: buffered until the context flushes.
//! let end_of_frame = DeferredContext::new();
//! end_of_frame.register(&on_save);
//! on_save.defer(("scene.bin".to_string(),));
//! end_of_frame.trigger();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
mod handler;
mod id_pool;
mod outcome;
mod source;

pub use context::DeferredContext;
pub use error::{ErrorHook, ListenerError};
pub use handler::EventHandler;
pub use id_pool::IdPool;
pub use outcome::Outcome;
pub use source::{EventSource, ListenerId, priority};
