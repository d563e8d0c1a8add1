//! Core data model and error handling for FerroSync
//!
//! This crate provides the foundational types shared by the FerroSync
//! propagation engine and the layers around it. It includes:
//!
//! - **Data model**: Replica roots, sync paths, per-side replica states,
//!   reconciled decisions and per-item outcomes
//! - **Error handling**: The transient/fatal taxonomy and translation of
//!   low-level I/O failures
//! - **Traits**: The replica I/O provider and observer interfaces the engine
//!   drives
//!
//! # Features
//!
//! - `serde`: Enable serialization support (used to load reconciled plans)
//!
//! # Examples
//!
//! ```rust
//! use ferrosync_types::{Decision, Direction, ReconciledItem, ReplicaState, Resolution, SyncPath};
//!
//! let item = ReconciledItem::new(
//!     SyncPath::new("docs/report.txt").unwrap(),
//!     Decision::Resolved(Resolution::new(
//!         ReplicaState::Absent,
//!         ReplicaState::SymbolicLink("elsewhere".to_string()),
//!         Direction::ToLeft,
//!     )),
//! );
//! assert!(!item.outcome().is_terminal());
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod result;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::{translate_io, Error, ErrorClass, IoResultExt};
pub use result::Result;
pub use traits::*;
pub use types::*;
