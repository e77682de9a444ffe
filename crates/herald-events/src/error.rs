//! Dispatch failure reporting.

use std::any::Any;

use thiserror::Error;

use crate::source::ListenerId;

/// Callback wired by the embedding application to observe listener failures.
///
/// See [`EventSource::set_error_hook`](crate::EventSource::set_error_hook).
pub type ErrorHook = Box<dyn FnMut(&ListenerError)>;

/// A listener callback panicked during dispatch.
///
/// The panic is caught at the dispatch boundary; the remaining listeners of
/// that pass are skipped and the source itself stays usable. `Display`
/// renders the full diagnostic message, `detail` carries just the
/// stringified panic payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("error while processing an event: {listener} panicked: {detail}")]
pub struct ListenerError {
    /// The listener whose callback panicked.
    pub listener: ListenerId,
    /// Stringified panic payload, when one could be extracted.
    pub detail: String,
}

/// Best-effort text form of a panic payload.
pub(crate) fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Hand a caught panic back to the caller once reporting and cleanup are
/// done. Strict propagation is a build-time policy choice.
#[cfg(feature = "propagate-panics")]
pub(crate) fn resume_caught_panic(payload: Option<Box<dyn Any + Send>>) {
    if let Some(payload) = payload {
        std::panic::resume_unwind(payload);
    }
}

/// Without strict propagation the caught payload is dropped; the failure
/// was already reported at the dispatch boundary.
#[cfg(not(feature = "propagate-panics"))]
pub(crate) fn resume_caught_panic(payload: Option<Box<dyn Any + Send>>) {
    drop(payload);
}
