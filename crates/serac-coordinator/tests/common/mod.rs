//! Common test utilities for the coordination layer
//!
//! Scripted data sources, a host registry that records and can fail calls,
//! and small timing helpers for paused-clock tests.

#![allow(dead_code)]

mod mock_host;
mod mock_sources;
mod time;

pub use mock_host::*;
pub use mock_sources::*;
pub use time::*;
