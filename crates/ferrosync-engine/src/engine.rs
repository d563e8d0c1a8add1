//! Propagation engine
//!
//! [`PropagationEngine::commit`] carries a whole reconciled set across the two
//! replicas: it snapshots every item's plan, runs non-deletions and then
//! deletions through a bounded [`ActionRegion`], and records a terminal
//! outcome on each item it touched.

use crate::classify::Plan;
use crate::executor::{ActionExecutor, ExecutorConfig};
use crate::log::TransferLog;
use crate::progress::ProgressAccountant;
use crate::region::ActionRegion;
use crate::scheduler::{ensure_unique_paths, AbortHandle, TwoPhaseScheduler, WorkItem, STATUS_FINISHED};
use ferrosync_config::{Config, PropagationConfig};
use ferrosync_types::{
    Error, ItemId, NoopObserver, Outcome, PropagationObserver, ReconciledItem, ReplicaIo,
    ReplicaRoot, Result,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// Summary of one propagation call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropagationReport {
    /// Identifier shared with the transfer log banners
    pub run_id: Uuid,
    /// Items that completed
    pub succeeded: usize,
    /// Merges the user declined to commit
    pub declined: usize,
    /// Items that failed with a recoverable error
    pub failed: usize,
    /// Failed items that had already moved some bytes
    pub partially_transferred: usize,
    /// Items not propagated (problems, conflicts)
    pub skipped: usize,
    /// Items never started because the call was aborted
    pub not_started: usize,
    /// Bytes moved by the providers
    pub bytes_transferred: u64,
    /// Wall-clock duration of the call
    pub duration: Duration,
}

impl PropagationReport {
    fn tally(run_id: Uuid, items: &[ReconciledItem]) -> Self {
        let mut report = Self {
            run_id,
            ..Self::default()
        };
        for item in items {
            match item.outcome() {
                Outcome::Succeeded => report.succeeded += 1,
                Outcome::SucceededDeclined => report.declined += 1,
                Outcome::Failed { .. } => report.failed += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::Pending | Outcome::Running => report.not_started += 1,
            }
        }
        report
    }

    /// Check whether every executed item succeeded
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.not_started == 0
    }
}

impl fmt::Display for PropagationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} declined, {} failed, {} skipped",
            self.succeeded, self.declined, self.failed, self.skipped
        )?;
        if self.partially_transferred > 0 {
            write!(f, ", {} partially transferred", self.partially_transferred)?;
        }
        if self.not_started > 0 {
            write!(f, ", {} not started", self.not_started)?;
        }
        Ok(())
    }
}

/// Commits reconciled sets to a pair of replicas
pub struct PropagationEngine {
    replicas: Arc<dyn ReplicaIo>,
    observer: Arc<dyn PropagationObserver>,
    executor_config: ExecutorConfig,
    max_transfers: AtomicU32,
    log_file: Option<PathBuf>,
    region: ActionRegion,
    abort: AbortHandle,
}

impl PropagationEngine {
    /// Create an engine from the loaded configuration
    pub fn with_config(
        config: &Config,
        replicas: Arc<dyn ReplicaIo>,
        observer: Arc<dyn PropagationObserver>,
    ) -> Self {
        let max_transfers = config.propagation.max_simultaneous_transfers.max(1);
        info!(
            "Propagation engine initialized ({} simultaneous transfers)",
            max_transfers
        );

        Self {
            replicas,
            observer,
            executor_config: ExecutorConfig::from_config(&config.propagation),
            max_transfers: AtomicU32::new(max_transfers),
            log_file: config.logging.log_file.clone(),
            region: ActionRegion::new(max_transfers as usize),
            abort: AbortHandle::new(),
        }
    }

    /// Change the action-region capacity; takes effect immediately
    pub fn set_max_simultaneous_transfers(&self, capacity: u32) -> Result<()> {
        if capacity == 0 {
            return Err(Error::config(
                "max_simultaneous_transfers must be greater than 0",
            ));
        }
        self.max_transfers.store(capacity, Ordering::SeqCst);
        self.region.resize(capacity as usize);
        Ok(())
    }

    /// Current action-region capacity
    pub fn max_simultaneous_transfers(&self) -> u32 {
        self.max_transfers.load(Ordering::SeqCst)
    }

    /// The region actions are admitted through
    pub fn region(&self) -> &ActionRegion {
        &self.region
    }

    /// Handle for stopping a running call
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Propagate every pending item of `items` between `left` and `right`
    ///
    /// Items that already carry a terminal outcome are left alone, so calling
    /// this again on the same set does nothing new. A fatal error ends the
    /// call after the items already running have finished.
    ///
    /// An abort requested before the call applies to it: nothing is admitted
    /// and every pending item is reported as not started. The request is
    /// cleared once the call returns.
    pub async fn commit(
        &self,
        left: &ReplicaRoot,
        right: &ReplicaRoot,
        items: &mut [ReconciledItem],
    ) -> Result<PropagationReport> {
        let result = self.propagate(left, right, items).await;
        self.abort.reset();
        result
    }

    async fn propagate(
        &self,
        left: &ReplicaRoot,
        right: &ReplicaRoot,
        items: &mut [ReconciledItem],
    ) -> Result<PropagationReport> {
        ensure_unique_paths(items)?;

        let started = Instant::now();
        let run_id = Uuid::new_v4();
        self.region
            .resize(self.max_simultaneous_transfers() as usize);
        self.region.reset_peak();

        let observer: &dyn PropagationObserver = self.observer.as_ref();
        let log = TransferLog::open(observer, self.log_file.as_deref(), run_id)?;
        let progress = ProgressAccountant::new();
        log.start_banner();

        let executor = ActionExecutor::new(
            self.replicas.as_ref(),
            observer,
            (left, right),
            &log,
            &progress,
            self.executor_config.clone(),
        );
        let scheduler = TwoPhaseScheduler::new(&self.region, &executor, observer, &self.abort);

        let work = match Self::snapshot(items, &log, &progress) {
            Ok(work) => work,
            Err(error) => {
                log.finish_banner(&format!("stopped by fatal error: {}", error));
                return Err(error);
            }
        };
        info!(
            "Propagating {} items ({} bytes planned) between {} and {}",
            work.len(),
            progress.bytes_planned(),
            left,
            right
        );

        let outcome = scheduler.run(work).await;
        observer.status(STATUS_FINISHED);

        let report = match outcome {
            Ok(()) => {
                let mut report = PropagationReport::tally(run_id, items);
                report.partially_transferred = scheduler
                    .stats()
                    .partially_transferred
                    .load(Ordering::Relaxed);
                report.bytes_transferred = progress.bytes_moved();
                report.duration = started.elapsed();
                report
            }
            Err(error) => {
                log.finish_banner(&format!("stopped by fatal error: {}", error));
                return Err(error);
            }
        };

        log.finish_banner(&report.to_string());
        info!("Propagation {} finished: {}", run_id, report);
        Ok(report)
    }

    /// Fix the plan of every item before anything runs
    fn snapshot<'i>(
        items: &'i mut [ReconciledItem],
        log: &TransferLog<'_>,
        progress: &ProgressAccountant,
    ) -> Result<Vec<WorkItem<'i>>> {
        let mut work = Vec::new();

        for (index, item) in items.iter_mut().enumerate() {
            if item.outcome().is_terminal() {
                debug!("{} already has outcome {:?}", item.path, item.outcome());
                continue;
            }

            let plan = Plan::for_decision(item.decision());
            match &plan {
                Plan::Problem(message) => {
                    log.line(&format!("Skipping {}: {}", item.path, message));
                    item.advance(Outcome::Skipped)?;
                }
                Plan::Conflict => {
                    log.line(&format!("Skipping {}: conflicting updates", item.path));
                    item.advance(Outcome::Skipped)?;
                }
                Plan::Merge { .. } | Plan::Propagate(_) => {
                    progress.plan(plan.predicted_bytes());
                    work.push(WorkItem {
                        id: ItemId(index),
                        item,
                        plan,
                    });
                }
            }
        }

        Ok(work)
    }
}

/// Builder for creating propagation engines
pub struct EngineBuilder {
    config: Config,
    replicas: Option<Arc<dyn ReplicaIo>>,
    observer: Option<Arc<dyn PropagationObserver>>,
}

impl EngineBuilder {
    /// Create a new engine builder
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            replicas: None,
            observer: None,
        }
    }

    /// Set configuration
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the propagation settings only
    pub fn with_propagation_config(mut self, config: PropagationConfig) -> Self {
        self.config.propagation = config;
        self
    }

    /// Set the replica provider
    pub fn with_replicas(mut self, replicas: Arc<dyn ReplicaIo>) -> Self {
        self.replicas = Some(replicas);
        self
    }

    /// Set the observer; defaults to one that ignores everything
    pub fn with_observer(mut self, observer: Arc<dyn PropagationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<PropagationEngine> {
        let replicas = self
            .replicas
            .ok_or_else(|| Error::config("a replica provider is required"))?;
        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(NoopObserver) as Arc<dyn PropagationObserver>);

        if self.config.propagation.max_simultaneous_transfers == 0 {
            return Err(Error::config(
                "max_simultaneous_transfers must be greater than 0",
            ));
        }

        Ok(PropagationEngine::with_config(&self.config, replicas, observer))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
