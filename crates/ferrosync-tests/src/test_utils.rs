//! Unified test utilities for FerroSync integration tests
//!
//! [`RecordingReplica`] stands in for a replica provider: it records a global
//! order of begin/end events, tracks how many operations overlap, and fails
//! scripted paths. [`RecordingObserver`] captures everything the engine tells
//! the presentation layer.

use async_trait::async_trait;
use ferrosync_config::Config;
use ferrosync_engine::{EngineBuilder, PropagationEngine};
use ferrosync_types::{
    ContentStatus, Decision, Direction, Error, ItemId, MergeConfirm, MergeOutcome, ProgressSink,
    PropagationObserver, Props, ReconciledItem, ReplicaIo, ReplicaRoot, ReplicaState, Resolution,
    Result, SizeInfo, SyncPath,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Provider operation recorded by [`RecordingReplica`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `delete`
    Delete,
    /// `copy_properties`
    CopyProperties,
    /// `copy_file`
    CopyFile,
    /// `copy_generic`
    CopyGeneric,
    /// `merge_files`
    Merge,
}

/// One entry of the global event order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// An operation started on a path
    Begin(Op, String),
    /// An operation returned for a path
    End(Op, String),
}

#[derive(Debug, Clone)]
enum Fault {
    Transient { message: String, after_bytes: u64 },
    Fatal { message: String },
}

/// Scripted [`ReplicaIo`] that records what the engine asked for
#[derive(Debug, Default)]
pub struct RecordingReplica {
    events: Mutex<Vec<Event>>,
    mutations: Mutex<Vec<(Op, String)>>,
    faults: Mutex<HashMap<String, Fault>>,
    delay: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingReplica {
    /// Create a replica whose operations succeed immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation take `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail any operation on `path` with a transient error
    pub fn fail_transient(self, path: &str, message: &str) -> Self {
        self.fail_transient_after(path, 0, message)
    }

    /// Move `after_bytes` bytes of `path`, then fail with a transient error
    pub fn fail_transient_after(self, path: &str, after_bytes: u64, message: &str) -> Self {
        self.script(
            path,
            Fault::Transient {
                message: message.to_string(),
                after_bytes,
            },
        )
    }

    /// Fail any operation on `path` with a fatal error
    pub fn fail_fatal(self, path: &str, message: &str) -> Self {
        self.script(
            path,
            Fault::Fatal {
                message: message.to_string(),
            },
        )
    }

    fn script(self, path: &str, fault: Fault) -> Self {
        lock(&self.faults).insert(path.to_string(), fault);
        self
    }

    /// Every begin/end event, in the order they happened
    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    /// Operations that changed a replica
    pub fn mutations(&self) -> Vec<(Op, String)> {
        lock(&self.mutations).clone()
    }

    /// Most operations that were ever running at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Operations running right now
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Index of `event` in the global order
    pub fn position(&self, event: &Event) -> Option<usize> {
        lock(&self.events).iter().position(|e| e == event)
    }

    async fn record(
        &self,
        op: Op,
        path: &SyncPath,
        bytes: u64,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<()> {
        let name = path.to_string();
        lock(&self.events).push(Event::Begin(op, name.clone()));
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if self.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.delay).await;
        }

        let fault = lock(&self.faults).get(&name).cloned();
        let result = match fault {
            Some(Fault::Transient {
                message,
                after_bytes,
            }) => {
                if let Some(progress) = progress {
                    progress.bytes(after_bytes);
                }
                Err(Error::transient(message))
            }
            Some(Fault::Fatal { message }) => Err(Error::fatal(message)),
            None => {
                if let Some(progress) = progress {
                    progress.bytes(bytes);
                }
                if op != Op::Merge {
                    lock(&self.mutations).push((op, name.clone()));
                }
                Ok(())
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        lock(&self.events).push(Event::End(op, name));
        result
    }
}

#[async_trait]
impl ReplicaIo for RecordingReplica {
    async fn delete(&self, _root: &ReplicaRoot, path: &SyncPath) -> Result<()> {
        self.record(Op::Delete, path, 0, None).await
    }

    async fn copy_properties(
        &self,
        _root: &ReplicaRoot,
        path: &SyncPath,
        _from: &Props,
        _to: &Props,
    ) -> Result<()> {
        self.record(Op::CopyProperties, path, 0, None).await
    }

    async fn copy_file(
        &self,
        _from_root: &ReplicaRoot,
        _to_root: &ReplicaRoot,
        path: &SyncPath,
        size_hint: u64,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        self.record(Op::CopyFile, path, size_hint, Some(progress))
            .await
    }

    async fn copy_generic(
        &self,
        _from_root: &ReplicaRoot,
        _to_root: &ReplicaRoot,
        path: &SyncPath,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        self.record(Op::CopyGeneric, path, 1, Some(progress)).await
    }

    async fn merge_files(
        &self,
        _left: &ReplicaRoot,
        _right: &ReplicaRoot,
        path: &SyncPath,
        confirm: &dyn MergeConfirm,
    ) -> Result<MergeOutcome> {
        self.record(Op::Merge, path, 0, None).await?;

        let transcript = format!("merged {}", path);
        if confirm.confirm(&format!("Merge result for {}", path), &transcript).await {
            lock(&self.mutations).push((Op::Merge, path.to_string()));
            Ok(MergeOutcome::Committed { transcript })
        } else {
            Ok(MergeOutcome::Declined { transcript })
        }
    }
}

/// Observer that keeps everything it is told
#[derive(Debug)]
pub struct RecordingObserver {
    lines: Mutex<Vec<String>>,
    statuses: Mutex<Vec<String>>,
    percentages: Mutex<Vec<f64>>,
    progress: AtomicU64,
    merge_requests: AtomicUsize,
    accept_merges: bool,
}

impl RecordingObserver {
    /// Observer that accepts every merge
    pub fn new() -> Self {
        Self::answering(true)
    }

    /// Observer that declines every merge
    pub fn declining() -> Self {
        Self::answering(false)
    }

    fn answering(accept_merges: bool) -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            percentages: Mutex::new(Vec::new()),
            progress: AtomicU64::new(0),
            merge_requests: AtomicUsize::new(0),
            accept_merges,
        }
    }

    /// Transfer log lines, in order
    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }

    /// Status messages, in order
    pub fn statuses(&self) -> Vec<String> {
        lock(&self.statuses).clone()
    }

    /// Completion percentages, in the order reported
    pub fn percentages(&self) -> Vec<f64> {
        lock(&self.percentages).clone()
    }

    /// Sum of every progress delta
    pub fn progress_total(&self) -> u64 {
        self.progress.load(Ordering::SeqCst)
    }

    /// How many merge confirmations were requested
    pub fn merge_requests(&self) -> usize {
        self.merge_requests.load(Ordering::SeqCst)
    }
}

impl Default for RecordingObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PropagationObserver for RecordingObserver {
    fn progress(&self, _item: ItemId, bytes_delta: u64) {
        self.progress.fetch_add(bytes_delta, Ordering::SeqCst);
    }

    fn percentage(&self, percent: f64) {
        lock(&self.percentages).push(percent);
    }

    fn log_line(&self, line: &str) {
        lock(&self.lines).push(line.to_string());
    }

    async fn confirm_merge(&self, _title: &str, _transcript: &str) -> bool {
        self.merge_requests.fetch_add(1, Ordering::SeqCst);
        self.accept_merges
    }

    fn status(&self, text: &str) {
        lock(&self.statuses).push(text.to_string());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Build an engine over the given doubles
pub fn engine(
    replica: Arc<RecordingReplica>,
    observer: Arc<RecordingObserver>,
    max_transfers: u32,
    confirm_merges: bool,
) -> Result<PropagationEngine> {
    let mut config = Config::default();
    config.propagation.max_simultaneous_transfers = max_transfers;
    config.propagation.confirm_before_merge_commit = confirm_merges;

    EngineBuilder::new()
        .with_config(config)
        .with_replicas(replica)
        .with_observer(observer)
        .build()
}

/// Pair of roots the doubles ignore
pub fn roots() -> (ReplicaRoot, ReplicaRoot) {
    (ReplicaRoot::local("/left"), ReplicaRoot::local("/right"))
}

fn updated_file(size: u64) -> ReplicaState {
    ReplicaState::File(
        Props::with_size(SizeInfo::data(size)),
        ContentStatus::ContentsUpdated(SizeInfo::data(size)),
    )
}

fn resolved(path: &str, left: ReplicaState, right: ReplicaState, direction: Direction) -> ReconciledItem {
    ReconciledItem::new(
        SyncPath::new(path).expect("valid test path"),
        Decision::Resolved(Resolution::new(left, right, direction)),
    )
}

/// New file on the left, absent on the right
pub fn copy_item(path: &str, size: u64) -> ReconciledItem {
    resolved(path, updated_file(size), ReplicaState::Absent, Direction::ToRight)
}

/// File changed on the left, present on both sides
pub fn update_item(path: &str, size: u64) -> ReconciledItem {
    resolved(
        path,
        updated_file(size),
        ReplicaState::File(Props::with_size(SizeInfo::data(size)), ContentStatus::Unchanged),
        Direction::ToRight,
    )
}

/// File removed on the left, still present on the right
pub fn delete_item(path: &str) -> ReconciledItem {
    resolved(
        path,
        ReplicaState::Absent,
        ReplicaState::File(Props::with_size(SizeInfo::data(1)), ContentStatus::Unchanged),
        Direction::ToRight,
    )
}

/// Metadata-only change on the left
pub fn props_item(path: &str) -> ReconciledItem {
    resolved(
        path,
        ReplicaState::File(Props::with_size(SizeInfo::data(1)), ContentStatus::PropsChanged),
        ReplicaState::File(Props::with_size(SizeInfo::data(1)), ContentStatus::Unchanged),
        Direction::ToRight,
    )
}

/// File changed on both sides, to be merged
pub fn merge_item(path: &str, size: u64) -> ReconciledItem {
    resolved(path, updated_file(size), updated_file(size), Direction::Merge)
}

/// File changed on both sides, left unresolved
pub fn conflict_item(path: &str) -> ReconciledItem {
    resolved(path, updated_file(1), updated_file(1), Direction::Conflict)
}

/// Path the reconciler could not handle
pub fn problem_item(path: &str, message: &str) -> ReconciledItem {
    ReconciledItem::new(
        SyncPath::new(path).expect("valid test path"),
        Decision::Problem(message.to_string()),
    )
}

/// Write `items` as a JSON plan file, the format the CLI reads
pub fn write_plan(dir: &Path, items: &[ReconciledItem]) -> std::io::Result<PathBuf> {
    let path = dir.join("plan.json");
    let json = serde_json::to_string_pretty(items).map_err(std::io::Error::other)?;
    std::fs::write(&path, json)?;
    Ok(path)
}
