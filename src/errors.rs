//! Error types for thumbnailer execution

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for thumbnailer execution
pub type Result<T> = std::result::Result<T, ThumbnailError>;

/// Errors that can occur while running an external thumbnailer
#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("Invalid thumbnailer command template: {0}")]
    TemplateSyntax(String),

    #[error("Thumbnailer command template has no input placeholder (%i or %u)")]
    MissingInputPlaceholder,

    #[error("Thumbnailer command template has no output placeholder (%o)")]
    MissingOutputPlaceholder,

    #[error("Unsupported URI, no local path for: {0}")]
    UnsupportedUriScheme(String),

    #[error("Sandbox setup failed: {0}")]
    SandboxSetup(String),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Thumbnailer '{name}' failed ({status}): {stderr}")]
    ThumbnailerFailed {
        name: String,
        status: String,
        stderr: String,
    },

    #[error("Thumbnailer produced no output at {}", .0.display())]
    EmptyOutput(PathBuf),

    #[error("Thumbnailer '{name}' timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    #[error("Failed to remove {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
