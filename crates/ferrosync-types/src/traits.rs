//! Collaborator traits for FerroSync propagation
//!
//! The engine never touches a replica directly. It drives a [`ReplicaIo`]
//! provider, which may be local or talk to a remote host, and reports to a
//! [`PropagationObserver`] owned by the presentation layer.

use crate::{Fingerprint, ItemId, Props, ReplicaRoot, Result, SyncPath};
use async_trait::async_trait;

/// Receives byte counts while a transfer is running
pub trait ProgressSink: Send + Sync {
    /// Report that `delta` more bytes have been moved
    fn bytes(&self, delta: u64);
}

/// Asks whether a computed merge may be committed
#[async_trait]
pub trait MergeConfirm: Send + Sync {
    /// Return `true` to commit the merge result to both replicas
    async fn confirm(&self, title: &str, transcript: &str) -> bool;
}

/// What a merge did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merged result was written to both replicas
    Committed {
        /// Description of the merge
        transcript: String,
    },
    /// The merged result was discarded; neither replica was touched
    Declined {
        /// Description of the merge that was discarded
        transcript: String,
    },
}

/// Operations on the replicas, local or remote
///
/// Every method is expected to report recoverable failures as
/// [`Error::Transient`](crate::Error::Transient).
#[async_trait]
pub trait ReplicaIo: Send + Sync {
    /// Remove whatever is at `path` under `root`
    async fn delete(&self, root: &ReplicaRoot, path: &SyncPath) -> Result<()>;

    /// Apply `from` properties to the object at `path`, which currently has `to`
    async fn copy_properties(
        &self,
        root: &ReplicaRoot,
        path: &SyncPath,
        from: &Props,
        to: &Props,
    ) -> Result<()>;

    /// Transfer a file that exists on both sides
    async fn copy_file(
        &self,
        from_root: &ReplicaRoot,
        to_root: &ReplicaRoot,
        path: &SyncPath,
        size_hint: u64,
        progress: &dyn ProgressSink,
    ) -> Result<()>;

    /// Replace the target with a full copy of the source object of any type
    async fn copy_generic(
        &self,
        from_root: &ReplicaRoot,
        to_root: &ReplicaRoot,
        path: &SyncPath,
        progress: &dyn ProgressSink,
    ) -> Result<()>;

    /// Merge both sides, asking `confirm` before committing
    async fn merge_files(
        &self,
        left: &ReplicaRoot,
        right: &ReplicaRoot,
        path: &SyncPath,
        confirm: &dyn MergeConfirm,
    ) -> Result<MergeOutcome>;

    /// Fingerprint of the file at `path`, or `None` if unsupported
    async fn fingerprint(&self, root: &ReplicaRoot, path: &SyncPath) -> Result<Option<Fingerprint>> {
        let _ = (root, path);
        Ok(None)
    }
}

/// Callbacks consumed by the presentation layer
#[async_trait]
pub trait PropagationObserver: Send + Sync {
    /// An item moved `bytes_delta` more bytes
    fn progress(&self, item: ItemId, bytes_delta: u64) {
        let _ = (item, bytes_delta);
    }

    /// Overall completion of the call, within 0..=100
    fn percentage(&self, percent: f64) {
        let _ = percent;
    }

    /// A line was appended to the transfer log
    fn log_line(&self, line: &str) {
        let _ = line;
    }

    /// Ask the user whether a merge result may be committed
    async fn confirm_merge(&self, title: &str, transcript: &str) -> bool {
        let _ = (title, transcript);
        true
    }

    /// Short status message for display
    fn status(&self, text: &str) {
        let _ = text;
    }
}

/// Observer that ignores everything and accepts every merge
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl PropagationObserver for NoopObserver {}
