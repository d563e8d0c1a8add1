//! Errors raised while loading or writing FerroSync settings

use ferrosync_types::Error as FerrosyncError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why settings could not be loaded or written
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A settings file could not be read or written
    #[error("cannot access {}: {source}", path.display())]
    File {
        /// The file involved
        path: PathBuf,
        /// What the filesystem reported
        #[source]
        source: io::Error,
    },

    /// A file or environment override did not parse into settings
    #[error("cannot parse settings: {0}")]
    Parse(#[from] config::ConfigError),

    /// Settings could not be rendered in the requested format
    #[error("cannot render settings as {format}: {message}")]
    Render {
        /// Target format
        format: &'static str,
        /// Serializer message
        message: String,
    },

    /// A setting holds a value the engine does not accept
    #[error("invalid setting `{key}`: {message}")]
    Invalid {
        /// Dotted key of the setting
        key: &'static str,
        /// What is wrong with it
        message: String,
    },
}

impl ConfigError {
    /// Reject the value of `key`
    pub fn invalid<S: Into<String>>(key: &'static str, message: S) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

impl From<ConfigError> for FerrosyncError {
    fn from(error: ConfigError) -> Self {
        FerrosyncError::config(error.to_string())
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
