//! Crate-wide error type.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading configuration or input files.
///
/// Configuration errors are reported synchronously at load and abort the
/// whole batch; input-format errors abort only the file that triggered
/// them, so the CLI can continue with the remaining files.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A palette or manifest is internally inconsistent, e.g. two
    /// palette ranges overlap, or a required manifest field is missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A `.vox` file could not be parsed: bad magic, a truncated chunk,
    /// or a `SIZE` chunk with a zero dimension.
    #[error("{path}: invalid input: {reason}")]
    InputFormat {
        /// The file that failed to parse.
        path: PathBuf,
        /// Human-readable reason.
        reason: String,
    },

    /// Filesystem I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A palette or manifest JSON document failed to parse.
    #[error("{path}: {source}")]
    Json {
        /// The file that failed to parse.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// PNG encoding of an output sheet failed.
    #[error(transparent)]
    Png(#[from] png::EncodingError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RenderError>;
