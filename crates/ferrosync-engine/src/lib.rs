//! Propagation engine for FerroSync
//!
//! This crate takes a reconciled set (one decision per path whose replicas
//! differ) and makes the replicas agree, under bounded concurrency, with
//! per-item failure isolation and a human-readable transfer log.
//!
//! # Features
//!
//! - **Two phases**: updates and merges first, deletions only afterwards
//! - **Bounded concurrency**: a resizable [`ActionRegion`] caps running actions
//! - **Failure isolation**: a transient error fails one item, never the call
//! - **Transfer log**: `[BGN]`/`[END]` lines per action, optional log file
//! - **Local replicas**: [`LocalReplica`] stages transfers and renames them into place
//!
//! # Examples
//!
//! ```rust,no_run
//! use ferrosync_engine::{EngineBuilder, LocalReplica};
//! use ferrosync_types::{ReconciledItem, ReplicaRoot};
//! use std::sync::Arc;
//!
//! # async fn example(mut items: Vec<ReconciledItem>) -> ferrosync_types::Result<()> {
//! let engine = EngineBuilder::new()
//!     .with_replicas(Arc::new(LocalReplica::default()))
//!     .build()?;
//!
//! let report = engine
//!     .commit(&ReplicaRoot::local("/srv/a"), &ReplicaRoot::local("/srv/b"), &mut items)
//!     .await?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod classify;
pub mod engine;
pub mod executor;
pub mod fingerprint;
pub mod local;
pub mod log;
pub mod progress;
pub mod region;
pub mod scheduler;
pub mod unwind;

pub use classify::{classify, ActionKind, Plan, Propagation, Side};
pub use engine::{EngineBuilder, PropagationEngine, PropagationReport};
pub use executor::{ActionExecutor, ActionResult, ExecutorConfig};
pub use fingerprint::Fingerprinter;
pub use local::LocalReplica;
pub use log::TransferLog;
pub use progress::ProgressAccountant;
pub use region::{ActionRegion, RegionPermit};
pub use scheduler::{AbortHandle, Phase, STATUS_DELETIONS, STATUS_FINISHED, STATUS_UPDATES};
pub use unwind::{finalize, unwind_protect};
