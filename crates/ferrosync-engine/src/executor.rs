//! Execution of a single planned item

use crate::classify::{ActionKind, Plan, Propagation, Side};
use crate::log::TransferLog;
use crate::progress::{ItemProgress, ProgressAccountant};
use crate::unwind::finalize;
use async_trait::async_trait;
use ferrosync_config::PropagationConfig;
use ferrosync_types::{
    Error, ItemId, MergeConfirm, MergeOutcome, Outcome, PropagationObserver, ReplicaIo,
    ReplicaRoot, ReplicaState, Result, SyncPath,
};
use tracing::{debug, error};

/// Options that change how individual actions run
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Ask the observer before committing a merge
    pub confirm_before_merge_commit: bool,
    /// Compare fingerprints of both sides after each file transfer
    pub verify_transfers: bool,
}

impl ExecutorConfig {
    /// Create executor config from the propagation settings
    pub fn from_config(config: &PropagationConfig) -> Self {
        Self {
            confirm_before_merge_commit: config.confirm_before_merge_commit,
            verify_transfers: config.verify_transfers,
        }
    }
}

/// What happened to one executed item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    /// Terminal outcome
    pub outcome: Outcome,
    /// Bytes the provider reported as moved
    pub bytes_moved: u64,
}

/// Runs the action for one item against the replicas
pub struct ActionExecutor<'a> {
    replicas: &'a dyn ReplicaIo,
    observer: &'a dyn PropagationObserver,
    left: &'a ReplicaRoot,
    right: &'a ReplicaRoot,
    log: &'a TransferLog<'a>,
    progress: &'a ProgressAccountant,
    config: ExecutorConfig,
}

impl<'a> ActionExecutor<'a> {
    /// Create an executor for one propagation call
    pub fn new(
        replicas: &'a dyn ReplicaIo,
        observer: &'a dyn PropagationObserver,
        (left, right): (&'a ReplicaRoot, &'a ReplicaRoot),
        log: &'a TransferLog<'a>,
        progress: &'a ProgressAccountant,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            replicas,
            observer,
            left,
            right,
            log,
            progress,
            config,
        }
    }

    fn root(&self, side: Side) -> &'a ReplicaRoot {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    /// Begin and end descriptions for the transfer log
    fn describe(&self, path: &SyncPath, plan: &Plan) -> (String, String) {
        match plan {
            Plan::Propagate(Propagation {
                kind: ActionKind::Delete,
                source,
                ..
            }) => (
                format!("Deleting {} from {}", path, self.root(source.opposite())),
                format!("Deleting {}", path),
            ),
            Plan::Propagate(propagation) => (
                format!(
                    "{} {} from {} to {}",
                    propagation.kind.verb(),
                    path,
                    self.root(propagation.source),
                    self.root(propagation.source.opposite())
                ),
                format!("{} {}", propagation.kind.verb(), path),
            ),
            Plan::Merge { .. } => (
                format!("Merging {} between {} and {}", path, self.left, self.right),
                format!("Merging {}", path),
            ),
            other => (format!("{} {}", other, path), format!("{} {}", other, path)),
        }
    }

    /// Execute `plan` for the item at `path`
    ///
    /// Transient failures become a failed outcome on the item. Any other
    /// failure is returned and ends the call.
    pub async fn execute(&self, id: ItemId, path: &SyncPath, plan: &Plan) -> Result<ActionResult> {
        let (begin, end) = self.describe(path, plan);
        let sequence = self.log.begin(&begin);
        let sink = ItemProgress::new(id, self.progress, self.observer);

        let log = self.log;
        let end = &end;
        let result = finalize(self.perform(path, plan, &sink), move || async move {
            log.end(sequence, end);
            Ok(())
        })
        .await;

        let bytes_moved = sink.moved();
        sink.finish(plan.predicted_bytes());

        match result {
            Ok(outcome) => Ok(ActionResult {
                outcome,
                bytes_moved,
            }),
            Err(e) if e.is_transient() => {
                self.log.line(&format!("Failed: {}: {}", path, e));
                Ok(ActionResult {
                    outcome: Outcome::failed(e.to_string()),
                    bytes_moved,
                })
            }
            Err(e) => {
                error!("Fatal error while propagating {}: {}", path, e);
                Err(e)
            }
        }
    }

    async fn perform(&self, path: &SyncPath, plan: &Plan, sink: &ItemProgress<'_>) -> Result<Outcome> {
        match plan {
            Plan::Problem(message) => Err(Error::invariant(format!(
                "{} was submitted despite a problem: {}",
                path, message
            ))),
            Plan::Conflict => Err(Error::invariant(format!(
                "{} was submitted despite a conflict",
                path
            ))),
            Plan::Merge { .. } => self.merge(path).await,
            Plan::Propagate(propagation) => {
                self.propagate(path, propagation, sink).await?;
                Ok(Outcome::Succeeded)
            }
        }
    }

    async fn propagate(
        &self,
        path: &SyncPath,
        propagation: &Propagation,
        sink: &ItemProgress<'_>,
    ) -> Result<()> {
        let from_root = self.root(propagation.source);
        let to_root = self.root(propagation.source.opposite());

        match propagation.kind {
            ActionKind::Delete => self.replicas.delete(to_root, path).await,
            ActionKind::PropagatePropertiesOnly => {
                let (Some(from), Some(to)) = (propagation.from.props(), propagation.to.props())
                else {
                    return Err(Error::invariant(format!(
                        "properties of {} are missing on one side",
                        path
                    )));
                };
                self.replicas.copy_properties(to_root, path, from, to).await
            }
            ActionKind::UpdateFile { size_hint } => {
                self.ensure_source_unchanged(from_root, path, &propagation.from)
                    .await?;
                self.replicas
                    .copy_file(from_root, to_root, path, size_hint, sink)
                    .await?;
                self.verify_transfer(from_root, to_root, path).await
            }
            ActionKind::Copy { .. } => {
                self.ensure_source_unchanged(from_root, path, &propagation.from)
                    .await?;
                self.replicas
                    .copy_generic(from_root, to_root, path, sink)
                    .await?;
                if matches!(propagation.from, ReplicaState::File(..)) {
                    self.verify_transfer(from_root, to_root, path).await?;
                }
                Ok(())
            }
        }
    }

    /// Fail if the source no longer matches the fingerprint it was scanned with
    async fn ensure_source_unchanged(
        &self,
        root: &ReplicaRoot,
        path: &SyncPath,
        planned: &ReplicaState,
    ) -> Result<()> {
        let ReplicaState::File(props, _) = planned else {
            return Ok(());
        };
        let Some(expected) = props.fingerprint else {
            return Ok(());
        };

        match self.replicas.fingerprint(root, path).await? {
            Some(actual) if actual != expected => Err(Error::transient(format!(
                "{} has been modified during synchronization",
                path
            ))),
            _ => Ok(()),
        }
    }

    async fn verify_transfer(
        &self,
        from_root: &ReplicaRoot,
        to_root: &ReplicaRoot,
        path: &SyncPath,
    ) -> Result<()> {
        if !self.config.verify_transfers {
            return Ok(());
        }

        let source = self.replicas.fingerprint(from_root, path).await?;
        let target = self.replicas.fingerprint(to_root, path).await?;
        match (source, target) {
            (Some(source), Some(target)) if source != target => Err(Error::transient(format!(
                "{}: transferred contents differ from source",
                path
            ))),
            _ => Ok(()),
        }
    }

    async fn merge(&self, path: &SyncPath) -> Result<Outcome> {
        let policy = MergePolicy {
            observer: self.observer,
            required: self.config.confirm_before_merge_commit,
        };

        match self
            .replicas
            .merge_files(self.left, self.right, path, &policy)
            .await?
        {
            MergeOutcome::Committed { .. } => Ok(Outcome::Succeeded),
            MergeOutcome::Declined { transcript } => {
                debug!("Merge of {} declined:\n{}", path, transcript);
                self.log.line(&format!("Merge of {} was not committed", path));
                Ok(Outcome::SucceededDeclined)
            }
        }
    }
}

/// Asks the observer only when confirmation is switched on
struct MergePolicy<'a> {
    observer: &'a dyn PropagationObserver,
    required: bool,
}

#[async_trait]
impl MergeConfirm for MergePolicy<'_> {
    async fn confirm(&self, title: &str, transcript: &str) -> bool {
        if !self.required {
            return true;
        }
        self.observer.confirm_merge(title, transcript).await
    }
}
