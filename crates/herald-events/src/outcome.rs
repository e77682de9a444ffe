//! Listener return values controlling dispatch continuation.

use serde::{Deserialize, Serialize};

/// Returned by a listener to steer the remainder of a dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Keep calling the remaining listeners, no state change.
    #[default]
    Continue,
    /// Stop calling the remaining listeners for this invocation.
    ///
    /// Listeners earlier in the same pass that returned [`Unregister`]
    /// are still removed once the pass completes.
    ///
    /// [`Unregister`]: Outcome::Unregister
    Cancel,
    /// Keep calling the remaining listeners, then remove this listener
    /// once the current pass completes.
    Unregister,
}

impl Outcome {
    /// Check whether this outcome stops the current pass.
    #[must_use]
    pub fn is_cancel(&self) -> bool {
        matches!(self, Self::Cancel)
    }

    /// Check whether this outcome removes the listener after the pass.
    #[must_use]
    pub fn is_unregister(&self) -> bool {
        matches!(self, Self::Unregister)
    }
}
