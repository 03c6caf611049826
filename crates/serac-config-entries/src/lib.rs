//! Config Entries
//!
//! One entry per monitored location. Entries carry the coordinates, the entity
//! prefix, the selected massifs and the access tokens, and move through a
//! small lifecycle while their engines are set up and torn down.
//!
//! # Key Types
//!
//! - [`ConfigurationEntry`] - A single location
//! - [`ConfigEntryState`] - Lifecycle state of an entry
//! - [`ConfigEntries`] - Manager for all entries
//! - [`ConfigChange`] - What subscribers are told when an entry changes

pub mod entry;
pub mod manager;
pub mod state_machine;

pub use entry::{
    is_valid_prefix, suggest_prefix, ConfigEntryState, ConfigurationEntry, EntryOptions,
    EntryValidationError, DEFAULT_PREFIX, MAX_PREFIX_LEN,
};
pub use manager::{ConfigChange, ConfigEntries, ConfigEntriesError, ConfigEntriesResult};
pub use state_machine::InvalidTransition;
