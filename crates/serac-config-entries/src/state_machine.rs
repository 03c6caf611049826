//! Config Entry State Machine
//!
//! Enforces valid state transitions for a location entry:
//!
//! ```text
//! NotLoaded → SetupInProgress → Loaded
//!                            ↘ SetupError → SetupInProgress (retry)
//! ```
//!
//! Removal drops the entry from the manager in whatever state it is in, so
//! there is no unload state.

use crate::entry::ConfigEntryState;
use thiserror::Error;

/// Error when an invalid state transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid state transition from {from:?} to {to:?}: {reason}")]
pub struct InvalidTransition {
    pub from: ConfigEntryState,
    pub to: ConfigEntryState,
    pub reason: &'static str,
}

impl ConfigEntryState {
    /// Attempt a transition to a new state.
    pub fn try_transition(
        self,
        to: ConfigEntryState,
    ) -> Result<ConfigEntryState, InvalidTransition> {
        use ConfigEntryState::*;

        let valid = matches!(
            (self, to),
            (NotLoaded, SetupInProgress)
                | (SetupInProgress, Loaded)
                | (SetupInProgress, SetupError)
                | (SetupError, SetupInProgress)
        );

        if valid {
            Ok(to)
        } else {
            Err(InvalidTransition {
                from: self,
                to,
                reason: Self::transition_error_reason(self, to),
            })
        }
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition_to(self, to: ConfigEntryState) -> bool {
        self.try_transition(to).is_ok()
    }

    fn transition_error_reason(from: ConfigEntryState, to: ConfigEntryState) -> &'static str {
        use ConfigEntryState::*;

        match (from, to) {
            (SetupInProgress, NotLoaded) => {
                "Setup in progress - must complete before returning to NotLoaded"
            }
            (NotLoaded, Loaded) => "Cannot jump to Loaded - must go through SetupInProgress",
            (Loaded, NotLoaded) => "Loaded entries leave the manager on removal",
            (Loaded, SetupInProgress) => "Already loaded - changes reconcile in place",
            _ => "Invalid state transition",
        }
    }
}
