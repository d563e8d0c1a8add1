//! Core data types for FerroSync
//!
//! This module holds the data model shared between the reconciler that plans
//! a sync pass and the engine that commits it: replica roots and paths,
//! per-side replica states, reconciled decisions, and per-item outcomes.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::SystemTime;

use crate::{Error, Result};

/// Where a replica lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Locality {
    /// Reachable through the local filesystem
    Local,
    /// Reachable through an externally established connection
    Remote {
        /// Host name as given in the root descriptor
        host: String,
    },
}

/// One endpoint of the sync pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReplicaRoot {
    /// Locality of the replica
    pub locality: Locality,
    /// Root directory on the host owning the replica
    pub path: PathBuf,
}

impl ReplicaRoot {
    /// Create a root on the local filesystem
    pub fn local<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            locality: Locality::Local,
            path: path.into(),
        }
    }

    /// Create a root on a remote host
    pub fn remote<H: Into<String>, P: Into<PathBuf>>(host: H, path: P) -> Self {
        Self {
            locality: Locality::Remote { host: host.into() },
            path: path.into(),
        }
    }

    /// Check whether the root is on the local filesystem
    pub fn is_local(&self) -> bool {
        self.locality == Locality::Local
    }

    /// Absolute location of `path` under this root, on the owning host
    pub fn resolve(&self, path: &SyncPath) -> PathBuf {
        path.components()
            .fold(self.path.clone(), |acc, part| acc.join(part))
    }
}

impl fmt::Display for ReplicaRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locality {
            Locality::Local => write!(f, "{}", self.path.display()),
            Locality::Remote { host } => write!(f, "{}:{}", host, self.path.display()),
        }
    }
}

/// Relative, slash-separated path identifying one item within a replica
///
/// The empty path names the replica root itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "String", into = "String")
)]
pub struct SyncPath(String);

impl SyncPath {
    /// Parse a relative path, rejecting absolute paths and `..` components
    pub fn new<S: AsRef<str>>(path: S) -> Result<Self> {
        let raw = path.as_ref();
        if raw.starts_with('/') {
            return Err(Error::invariant(format!(
                "sync path must be relative: {}",
                raw
            )));
        }

        let mut parts = Vec::new();
        for part in raw.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    return Err(Error::invariant(format!(
                        "sync path must not leave the replica: {}",
                        raw
                    )))
                }
                other => parts.push(other),
            }
        }

        Ok(Self(parts.join("/")))
    }

    /// The replica root itself
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Path components, outermost first
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|part| !part.is_empty())
    }

    /// Check whether this is the replica root
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a child component
    pub fn child(&self, name: &str) -> Result<Self> {
        if self.is_root() {
            Self::new(name)
        } else {
            Self::new(format!("{}/{}", self.0, name))
        }
    }

    /// Final component, if any
    pub fn file_name(&self) -> Option<&str> {
        self.components().last()
    }

    /// Borrow as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl FromStr for SyncPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for SyncPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SyncPath> for String {
    fn from(path: SyncPath) -> Self {
        path.0
    }
}

/// Length in bytes of a [`Fingerprint`]
pub const FINGERPRINT_LEN: usize = 32;

/// Content digest used to test content identity
///
/// Equal content always produces an equal fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Wrap raw digest bytes
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Length of the digest in bytes
    pub const fn len(&self) -> usize {
        FINGERPRINT_LEN
    }

    /// A fingerprint is never empty
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Lowercase hexadecimal rendering, two digits per byte
    pub fn to_hex(&self) -> String {
        const DIGITS: &[u8; 16] = b"0123456789abcdef";
        let mut hex = String::with_capacity(FINGERPRINT_LEN * 2);
        for byte in self.0 {
            hex.push(DIGITS[(byte >> 4) as usize] as char);
            hex.push(DIGITS[(byte & 0x0f) as usize] as char);
        }
        hex
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::config(format!("invalid fingerprint: {}", s));
        if s.len() != FINGERPRINT_LEN * 2 || !s.is_ascii() {
            return Err(invalid());
        }

        let mut bytes = [0u8; FINGERPRINT_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }
}

#[cfg(feature = "serde")]
impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        hex.parse().map_err(serde::de::Error::custom)
    }
}

/// Size of a replica object: data plus resource metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SizeInfo {
    /// Length of the data stream in bytes
    pub data: u64,
    /// Length of resource metadata (e.g. resource forks) in bytes
    #[cfg_attr(feature = "serde", serde(default))]
    pub resource: u64,
}

impl SizeInfo {
    /// Create a size with no resource metadata
    pub const fn data(data: u64) -> Self {
        Self { data, resource: 0 }
    }

    /// Combined transfer size
    pub const fn total(&self) -> u64 {
        self.data.saturating_add(self.resource)
    }
}

/// Properties of a file or directory as seen by the update detector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Props {
    /// Permission bits
    #[cfg_attr(feature = "serde", serde(default))]
    pub permissions: Option<u32>,
    /// Last modification time
    #[cfg_attr(feature = "serde", serde(default))]
    pub modified: Option<SystemTime>,
    /// Size of the object (subtree size for directories)
    #[cfg_attr(feature = "serde", serde(default))]
    pub size: SizeInfo,
    /// Fingerprint recorded when the replica was scanned
    #[cfg_attr(feature = "serde", serde(default))]
    pub fingerprint: Option<Fingerprint>,
}

impl Props {
    /// Properties with just a size
    pub fn with_size(size: SizeInfo) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }
}

/// What changed on one side since the last sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ContentStatus {
    /// Nothing changed
    Unchanged,
    /// Only metadata changed
    PropsChanged,
    /// Contents changed; carries the new size
    ContentsUpdated(SizeInfo),
}

impl ContentStatus {
    /// Check whether the contents are unchanged (props may differ)
    pub fn is_content_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged | Self::PropsChanged)
    }
}

/// State of one replica at one path
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ReplicaState {
    /// Nothing at this path
    Absent,
    /// Regular file
    File(Props, ContentStatus),
    /// Directory
    Directory(Props, ContentStatus),
    /// Symbolic link with its target
    SymbolicLink(String),
}

impl ReplicaState {
    /// Change status, for objects that carry one
    pub fn status(&self) -> Option<ContentStatus> {
        match self {
            Self::File(_, status) | Self::Directory(_, status) => Some(*status),
            Self::Absent | Self::SymbolicLink(_) => None,
        }
    }

    /// Properties, for objects that carry them
    pub fn props(&self) -> Option<&Props> {
        match self {
            Self::File(props, _) | Self::Directory(props, _) => Some(props),
            Self::Absent | Self::SymbolicLink(_) => None,
        }
    }

    /// Bytes a transfer of this object is expected to move
    pub fn predicted_size(&self) -> u64 {
        match self {
            Self::File(_, ContentStatus::ContentsUpdated(size)) => size.total(),
            Self::File(props, _) | Self::Directory(props, _) => props.size.total(),
            Self::Absent | Self::SymbolicLink(_) => 0,
        }
    }
}

/// Direction a resolved item should be propagated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Direction {
    /// Left replica overwrites right
    ToRight,
    /// Right replica overwrites left
    ToLeft,
    /// Both sides changed; nothing is propagated
    Conflict,
    /// Both sides are merged
    Merge,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self {
            Self::ToRight => "---->",
            Self::ToLeft => "<----",
            Self::Conflict => "<-?->",
            Self::Merge => "<-M->",
        };
        f.write_str(arrow)
    }
}

/// Reconciler's verdict for a path whose sides differ
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Resolution {
    /// State of the left replica
    pub left: ReplicaState,
    /// State of the right replica
    pub right: ReplicaState,
    /// Direction chosen for propagation
    pub direction: Direction,
    /// Direction the reconciler proposed before any user edit
    pub default_direction: Direction,
}

impl Resolution {
    /// Create a resolution whose direction is the default
    pub fn new(left: ReplicaState, right: ReplicaState, direction: Direction) -> Self {
        Self {
            left,
            right,
            direction,
            default_direction: direction,
        }
    }

    /// Replace the direction, keeping the default
    pub fn redirect(&self, direction: Direction) -> Self {
        Self {
            direction,
            ..self.clone()
        }
    }
}

/// What should happen to a path
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Decision {
    /// Nothing can be done; the message explains why
    Problem(String),
    /// Sides differ and a direction has been chosen
    Resolved(Resolution),
}

/// Identifier of an item within one reconciled set (its position)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ItemId(pub usize);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of propagating one item
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Outcome {
    /// Not yet submitted
    #[default]
    Pending,
    /// Admitted and running
    Running,
    /// Completed
    Succeeded,
    /// Completed without mutating anything because the user declined
    SucceededDeclined,
    /// Failed with a recoverable error
    Failed {
        /// Short reason
        reason: String,
        /// Optional long-form transcript (e.g. merge output)
        transcript: Option<String>,
    },
    /// Not propagated in this call
    Skipped,
}

impl Outcome {
    /// Build a failure without transcript
    pub fn failed<S: Into<String>>(reason: S) -> Self {
        Self::Failed {
            reason: reason.into(),
            transcript: None,
        }
    }

    /// Check whether this outcome is final
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Check whether moving to `next` keeps outcomes monotone
    pub fn can_advance_to(&self, next: &Outcome) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending, next) => next.is_terminal(),
            (Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

/// One path of a reconciled set together with its propagation outcome
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReconciledItem {
    /// Path within both replicas
    pub path: SyncPath,
    decision: Decision,
    #[cfg_attr(feature = "serde", serde(default))]
    outcome: Outcome,
}

impl ReconciledItem {
    /// Create a pending item
    pub fn new(path: SyncPath, decision: Decision) -> Self {
        Self {
            path,
            decision,
            outcome: Outcome::Pending,
        }
    }

    /// Current decision
    pub fn decision(&self) -> &Decision {
        &self.decision
    }

    /// Change the direction of a resolved item
    pub fn set_direction(&mut self, direction: Direction) {
        if let Decision::Resolved(resolution) = &self.decision {
            self.decision = Decision::Resolved(resolution.redirect(direction));
        }
    }

    /// Current outcome
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// Move the outcome forward
    pub fn advance(&mut self, next: Outcome) -> Result<()> {
        if !self.outcome.can_advance_to(&next) {
            return Err(Error::invariant(format!(
                "outcome of {} cannot move from {:?} to {:?}",
                self.path, self.outcome, next
            )));
        }
        self.outcome = next;
        Ok(())
    }
}
