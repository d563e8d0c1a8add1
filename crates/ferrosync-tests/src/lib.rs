//! FerroSync Testing Suite
//!
//! This crate provides the scripted collaborators and fixtures used by the
//! FerroSync integration tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Unified test utilities
///
/// Scripted replica and observer doubles plus builders for reconciled items,
/// shared by every integration test.
pub mod test_utils;

pub use test_utils::{Event, Op, RecordingObserver, RecordingReplica};
