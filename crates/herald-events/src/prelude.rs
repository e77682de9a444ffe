//! Prelude module - commonly used types for convenient import.
//!
//! Use `use herald_events::prelude::*;` to import all essential types.
//!
//! # Example
//!
//! ```rust
//! use herald_events::prelude::*;
//!
//! let on_change: EventSource<(i32,)> = EventSource::new();
//!
//! let _watcher = on_change.add_listener(priority::NORMAL, |value: &i32| {
//!     assert_eq!(*value, 3);
//!     Outcome::Continue
//! });
//!
//! on_change.trigger((3,));
//! ```

// Event sources
pub use crate::{EventSource, ListenerId, priority};

// Listener callbacks
pub use crate::{EventHandler, Outcome};

// Deferred dispatch
pub use crate::DeferredContext;

// Failure reporting
pub use crate::{ErrorHook, ListenerError};
