//! Shared view state types.

use std::fmt;

/// Readiness of a live complaint view.
///
/// `Uninitialized -> Loading -> Ready | Failed`. A failed load is retried by loading
/// again, and a ready view drops back to `Loading` while it reconciles after a lost
/// subscription.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadinessState {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    Failed,
}

impl ReadinessState {
    /// Live events are merged only in this state.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Failed => "failed",
        })
    }
}
