//! JSON output for scripted runs

use chrono::Utc;
use ferrosync_engine::PropagationReport;
use ferrosync_types::{Outcome, ReconciledItem, ReplicaRoot};
use serde::{Deserialize, Serialize};

/// Metadata describing one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetadata {
    /// FerroSync version
    pub version: String,
    /// Operation name
    pub operation: String,
    /// RFC 3339 timestamp of the output
    pub timestamp: String,
    /// Left replica root
    pub left_root: String,
    /// Right replica root
    pub right_root: String,
    /// Identifier of the propagation run
    pub run_id: String,
}

/// Counters of a finished propagation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportJson {
    pub succeeded: usize,
    pub declined: usize,
    pub failed: usize,
    pub partially_transferred: usize,
    pub skipped: usize,
    pub not_started: usize,
    pub bytes_transferred: u64,
    pub duration_ms: u128,
}

impl From<&PropagationReport> for ReportJson {
    fn from(report: &PropagationReport) -> Self {
        Self {
            succeeded: report.succeeded,
            declined: report.declined,
            failed: report.failed,
            partially_transferred: report.partially_transferred,
            skipped: report.skipped,
            not_started: report.not_started,
            bytes_transferred: report.bytes_transferred,
            duration_ms: report.duration.as_millis(),
        }
    }
}

/// Final outcome of one path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemJson {
    pub path: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&ReconciledItem> for ItemJson {
    fn from(item: &ReconciledItem) -> Self {
        let (outcome, reason) = match item.outcome() {
            Outcome::Pending => ("not_started", None),
            Outcome::Running => ("running", None),
            Outcome::Succeeded => ("succeeded", None),
            Outcome::SucceededDeclined => ("declined", None),
            Outcome::Failed { reason, .. } => ("failed", Some(reason.clone())),
            Outcome::Skipped => ("skipped", None),
        };
        Self {
            path: item.path.to_string(),
            outcome: outcome.to_string(),
            reason,
        }
    }
}

/// Overall verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
}

/// Complete JSON document printed by `ferrosync commit --json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResultJson {
    pub metadata: OperationMetadata,
    pub report: ReportJson,
    pub items: Vec<ItemJson>,
    pub result: OperationResult,
}

impl CommitResultJson {
    /// Assemble the document from a finished commit
    pub fn new(
        left: &ReplicaRoot,
        right: &ReplicaRoot,
        report: &PropagationReport,
        items: &[ReconciledItem],
    ) -> Self {
        Self {
            metadata: OperationMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                operation: "commit".to_string(),
                timestamp: Utc::now().to_rfc3339(),
                left_root: left.to_string(),
                right_root: right.to_string(),
                run_id: report.run_id.to_string(),
            },
            report: ReportJson::from(report),
            items: items.iter().map(ItemJson::from).collect(),
            result: OperationResult {
                success: report.failed == 0,
                message: report.to_string(),
            },
        }
    }

    /// Render as pretty-printed JSON
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
