//! Mapping of reconciled decisions to concrete replica actions

use ferrosync_types::{Decision, Direction, ReplicaState};
use std::fmt;

/// Which replica an action reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Left replica
    Left,
    /// Right replica
    Right,
}

impl Side {
    /// The other replica
    pub fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

/// Concrete action for a one-directional propagation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Remove the target
    Delete,
    /// Only metadata changed; apply the source properties to the target
    PropagatePropertiesOnly,
    /// File on both sides; transfer the contents
    UpdateFile {
        /// Expected size of the transfer (data plus resource metadata)
        size_hint: u64,
    },
    /// Replace the target with a full copy of the source
    Copy {
        /// Expected size of the transfer
        size_hint: u64,
    },
}

impl ActionKind {
    /// Check whether this is a deletion
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }

    /// Bytes this action is expected to move
    pub fn predicted_bytes(&self) -> u64 {
        match self {
            Self::Delete | Self::PropagatePropertiesOnly => 0,
            Self::UpdateFile { size_hint } | Self::Copy { size_hint } => *size_hint,
        }
    }

    /// Verb used in log lines
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Delete => "Deleting",
            Self::PropagatePropertiesOnly => "Copying properties for",
            Self::UpdateFile { .. } => "Updating file",
            Self::Copy { .. } => "Copying",
        }
    }
}

/// Pick the action that makes `to` match `from`
///
/// The rules are checked in order; the first match wins.
pub fn classify(from: &ReplicaState, to: &ReplicaState) -> ActionKind {
    if matches!(from, ReplicaState::Absent) {
        return ActionKind::Delete;
    }

    if let (Some(from_status), Some(to_status)) = (from.status(), to.status()) {
        if from_status.is_content_unchanged() && to_status.is_content_unchanged() {
            return ActionKind::PropagatePropertiesOnly;
        }
    }

    if let (ReplicaState::File(..), ReplicaState::File(..)) = (from, to) {
        return ActionKind::UpdateFile {
            size_hint: from.predicted_size(),
        };
    }

    ActionKind::Copy {
        size_hint: from.predicted_size(),
    }
}

/// One-directional propagation taken from a resolved decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Propagation {
    /// Replica the action reads from
    pub source: Side,
    /// Action to perform
    pub kind: ActionKind,
    /// Source state as planned
    pub from: ReplicaState,
    /// Target state as planned
    pub to: ReplicaState,
}

/// What the engine will do with one item, fixed when the call starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Reconciler could not decide; never executed
    Problem(String),
    /// Both sides changed; never executed
    Conflict,
    /// Merge both sides
    Merge {
        /// Expected bytes read while merging
        size_hint: u64,
    },
    /// Propagate in one direction
    Propagate(Propagation),
}

impl Plan {
    /// Snapshot the plan for a decision
    pub fn for_decision(decision: &Decision) -> Self {
        let resolution = match decision {
            Decision::Problem(message) => return Self::Problem(message.clone()),
            Decision::Resolved(resolution) => resolution,
        };

        let (source, from, to) = match resolution.direction {
            Direction::Conflict => return Self::Conflict,
            Direction::Merge => {
                return Self::Merge {
                    size_hint: resolution
                        .left
                        .predicted_size()
                        .max(resolution.right.predicted_size()),
                }
            }
            Direction::ToRight => (Side::Left, &resolution.left, &resolution.right),
            Direction::ToLeft => (Side::Right, &resolution.right, &resolution.left),
        };

        Self::Propagate(Propagation {
            source,
            kind: classify(from, to),
            from: from.clone(),
            to: to.clone(),
        })
    }

    /// Check whether the plan runs in the deletion phase
    pub fn is_deletion(&self) -> bool {
        matches!(self, Self::Propagate(p) if p.kind.is_delete())
    }

    /// Bytes the plan is expected to move
    pub fn predicted_bytes(&self) -> u64 {
        match self {
            Self::Problem(_) | Self::Conflict => 0,
            Self::Merge { size_hint } => *size_hint,
            Self::Propagate(propagation) => propagation.kind.predicted_bytes(),
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Problem(message) => write!(f, "problem: {}", message),
            Self::Conflict => f.write_str("conflict"),
            Self::Merge { .. } => f.write_str("merge"),
            Self::Propagate(propagation) => f.write_str(propagation.kind.verb()),
        }
    }
}
