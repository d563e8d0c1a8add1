//! Error types and handling for FerroSync
//!
//! Propagation distinguishes two classes of failure. A *transient* error is
//! local to one reconciled item: it is recorded on that item and the run
//! carries on. Everything else is *fatal* and ends the whole propagation call.
//!
//! Low-level I/O failures are mapped into one of the two classes by
//! [`translate_io`], with the target class chosen by the caller. Failures the
//! translator does not recognise are kept intact as [`Error::Io`], which is
//! fatal, so an unexpected failure is never quietly downgraded to a per-item
//! problem.

use std::io;

/// Classification of an error for propagation purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorClass {
    /// Recoverable for the current item; the run continues
    Transient,
    /// Terminates the whole propagation call
    Fatal,
}

/// Main error type for FerroSync operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failure local to one item
    #[error("{message}")]
    Transient {
        /// Human-readable reason, recorded on the failed item
        message: String,
    },

    /// Failure that aborts the whole run
    #[error("Fatal error: {message}")]
    Fatal {
        /// Human-readable reason
        message: String,
    },

    /// An internal invariant did not hold
    #[error("Invariant violated: {message}")]
    InvariantViolation {
        /// Description of the broken invariant
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Low-level I/O failure of a shape the translator does not recognise
    #[error("{context}: {source}")]
    Io {
        /// Operation that was being performed
        context: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Get the propagation class of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transient { .. } => ErrorClass::Transient,
            Self::Fatal { .. }
            | Self::InvariantViolation { .. }
            | Self::Config { .. }
            | Self::Io { .. } => ErrorClass::Fatal,
        }
    }

    /// Check if this error only affects the current item
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Create a new transient error
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create a new fatal error
    pub fn fatal<S: Into<String>>(message: S) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Create a new invariant violation
    pub fn invariant<S: Into<String>>(message: S) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    fn of_class<S: Into<String>>(class: ErrorClass, message: S) -> Self {
        match class {
            ErrorClass::Transient => Self::transient(message),
            ErrorClass::Fatal => Self::fatal(message),
        }
    }
}

/// Short description for the I/O error kinds the translator understands
fn recognised_kind(kind: io::ErrorKind) -> Option<&'static str> {
    use io::ErrorKind as K;
    let description = match kind {
        K::NotFound => "no such file or directory",
        K::PermissionDenied => "permission denied",
        K::StorageFull => "disk full",
        K::UnexpectedEof => "truncated file",
        K::WouldBlock => "operation would block",
        K::AlreadyExists => "file exists",
        K::IsADirectory => "is a directory",
        K::NotADirectory => "not a directory",
        K::DirectoryNotEmpty => "directory not empty",
        K::InvalidInput | K::InvalidData => "impossible state",
        _ => return None,
    };
    Some(description)
}

/// Translate a low-level I/O failure into the caller's target class
///
/// Recognised failures become `target` with the message
/// `"<context>: <description>"`. Any other failure is returned as
/// [`Error::Io`] with the original error attached.
pub fn translate_io(target: ErrorClass, context: impl Into<String>, error: io::Error) -> Error {
    let context = context.into();
    match recognised_kind(error.kind()) {
        Some(description) => Error::of_class(target, format!("{}: {}", context, description)),
        None => Error::Io {
            context,
            source: error,
        },
    }
}

/// Extension trait applying [`translate_io`] to `io::Result` values
pub trait IoResultExt<T> {
    /// Translate a failure into a transient error
    fn transient(self, context: impl Into<String>) -> crate::Result<T>;

    /// Translate a failure into a fatal error
    fn fatal(self, context: impl Into<String>) -> crate::Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn transient(self, context: impl Into<String>) -> crate::Result<T> {
        self.map_err(|e| translate_io(ErrorClass::Transient, context, e))
    }

    fn fatal(self, context: impl Into<String>) -> crate::Result<T> {
        self.map_err(|e| translate_io(ErrorClass::Fatal, context, e))
    }
}
