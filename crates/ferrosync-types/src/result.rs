//! Result type alias for FerroSync operations

use crate::Error;

/// Result type alias for FerroSync operations
pub type Result<T> = std::result::Result<T, Error>;
