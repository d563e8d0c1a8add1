//! Two-phase scheduling of planned items
//!
//! All non-deletion items (including merges) run in the first phase and all
//! deletions in the second; the second phase starts only once every item of
//! the first has finished. Within a phase, items are admitted through the
//! [`ActionRegion`] and may run in any order.
//!
//! Items run as futures polled by the calling task; nothing is spawned, so an
//! item's outcome is written back through a plain `&mut` borrow.

use crate::classify::Plan;
use crate::executor::ActionExecutor;
use crate::region::ActionRegion;
use ferrosync_types::{Error, ItemId, Outcome, PropagationObserver, ReconciledItem, Result};
use futures::future::join_all;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Status text shown while updates run
pub const STATUS_UPDATES: &str = "Propagating updates";
/// Status text shown while deletions run
pub const STATUS_DELETIONS: &str = "Propagating deletions";
/// Status text shown once the call is over
pub const STATUS_FINISHED: &str = "Propagation finished";

/// Cooperative stop request, honoured when the next item would be admitted
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    requested: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Create a handle with no pending request
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running call to stop admitting items
    pub fn abort(&self) {
        info!("Abort requested; running items will finish");
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Check whether a stop was requested
    pub fn is_aborted(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Clear a previous request
    pub fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

/// Phase of a propagation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Everything except deletions
    Updates,
    /// Deletions only
    Deletions,
}

impl Phase {
    /// Status text for the phase
    pub fn status(self) -> &'static str {
        match self {
            Self::Updates => STATUS_UPDATES,
            Self::Deletions => STATUS_DELETIONS,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Updates => f.write_str("updates"),
            Self::Deletions => f.write_str("deletions"),
        }
    }
}

/// An item submitted for execution together with its snapshotted plan
pub struct WorkItem<'i> {
    /// Position of the item in the reconciled set
    pub id: ItemId,
    /// The item; its outcome is updated in place
    pub item: &'i mut ReconciledItem,
    /// Plan taken when the call started
    pub plan: Plan,
}

/// Per-call counters the report is built from
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Failed items that had already moved bytes
    pub partially_transferred: AtomicUsize,
}

/// Runs the two phases of one propagation call
pub struct TwoPhaseScheduler<'a> {
    region: &'a ActionRegion,
    executor: &'a ActionExecutor<'a>,
    observer: &'a dyn PropagationObserver,
    abort: &'a AbortHandle,
    halted: AtomicBool,
    stats: SchedulerStats,
}

impl<'a> TwoPhaseScheduler<'a> {
    /// Create a scheduler for one call
    pub fn new(
        region: &'a ActionRegion,
        executor: &'a ActionExecutor<'a>,
        observer: &'a dyn PropagationObserver,
        abort: &'a AbortHandle,
    ) -> Self {
        Self {
            region,
            executor,
            observer,
            abort,
            halted: AtomicBool::new(false),
            stats: SchedulerStats::default(),
        }
    }

    /// Counters collected so far
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Run every work item, updates first and deletions second
    pub async fn run(&self, work: Vec<WorkItem<'_>>) -> Result<()> {
        let (deletions, updates): (Vec<_>, Vec<_>) =
            work.into_iter().partition(|w| w.plan.is_deletion());

        self.run_phase(Phase::Updates, updates).await?;
        self.run_phase(Phase::Deletions, deletions).await
    }

    async fn run_phase(&self, phase: Phase, work: Vec<WorkItem<'_>>) -> Result<()> {
        self.observer.status(phase.status());
        debug!("Starting {} phase with {} items", phase, work.len());

        let results = join_all(work.into_iter().map(|w| self.submit(w))).await;

        // Every item of the phase has finished; report the first fatal error
        match results.into_iter().find_map(|r| r.err()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn submit(&self, work: WorkItem<'_>) -> Result<()> {
        let WorkItem { id, item, plan } = work;
        let _permit = self.region.admit().await?;

        if self.halted.load(Ordering::SeqCst) || self.abort.is_aborted() {
            debug!("Not starting {} {}", id, item.path);
            return Ok(());
        }

        if let Err(error) = item.advance(Outcome::Running) {
            self.halted.store(true, Ordering::SeqCst);
            warn!("Stopping propagation: {} cannot start: {}", item.path, error);
            return Err(error);
        }
        match self.executor.execute(id, &item.path, &plan).await {
            Ok(result) => {
                if matches!(result.outcome, Outcome::Failed { .. }) && result.bytes_moved > 0 {
                    self.stats
                        .partially_transferred
                        .fetch_add(1, Ordering::Relaxed);
                }
                item.advance(result.outcome)
            }
            Err(error) => {
                self.halted.store(true, Ordering::SeqCst);
                warn!("Stopping propagation after fatal error on {}", item.path);
                item.advance(Outcome::failed(error.to_string()))?;
                Err(error)
            }
        }
    }
}

/// Reject a set in which the same path appears twice
pub fn ensure_unique_paths(items: &[ReconciledItem]) -> Result<()> {
    let mut seen = std::collections::HashSet::with_capacity(items.len());
    for item in items {
        if !seen.insert(&item.path) {
            return Err(Error::invariant(format!(
                "path {} appears more than once in the reconciled set",
                item.path
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrosync_types::{Decision, SyncPath};

    #[test]
    fn test_abort_handle_is_shared() {
        let handle = AbortHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_aborted());

        clone.abort();
        assert!(handle.is_aborted());

        handle.reset();
        assert!(!clone.is_aborted());
    }

    #[test]
    fn test_phase_status() {
        assert_eq!(Phase::Updates.status(), "Propagating updates");
        assert_eq!(Phase::Deletions.status(), "Propagating deletions");
        assert_eq!(STATUS_FINISHED, "Propagation finished");
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let item = |p: &str| {
            ReconciledItem::new(SyncPath::new(p).unwrap(), Decision::Problem("x".to_string()))
        };

        assert!(ensure_unique_paths(&[item("a"), item("b")]).is_ok());
        let error = ensure_unique_paths(&[item("a"), item("b"), item("a/")]).unwrap_err();
        assert!(matches!(error, Error::InvariantViolation { .. }));
    }
}
