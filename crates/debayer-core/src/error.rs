//! Error types for the debayer pipeline.
//!
//! Only configuration-class problems surface as [`Error`] values; per-frame
//! and per-format failures are explicit outcome values inspected by the
//! orchestrator and never abort the run.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a run before (or instead of) any frame processing.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during setup (temp workspace, destination directories).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A required external tool is missing.
    #[error("required executable not found: {path}")]
    ToolNotFound {
        /// Configured or resolved path that does not exist.
        path: PathBuf,
    },

    /// The rawtherapee profile is missing while the profile-based engine is selected.
    #[error("rawtherapee profile not found: {path}")]
    ProfileNotFound {
        /// Configured profile path.
        path: PathBuf,
    },

    /// An output format is not in the supported set.
    #[error("unknown output format '{format}' (supported: {supported})")]
    UnknownFormat {
        /// The rejected format name.
        format: String,
        /// Comma-separated list of supported formats.
        supported: String,
    },

    /// A configured datatype name is not in the converter's allow-list.
    #[error("unknown datatype '{datatype}' for format '{format}'")]
    UnknownDatatype {
        /// The rejected datatype name.
        datatype: String,
        /// Format the datatype was configured for.
        format: String,
    },

    /// A configuration value is out of its valid range.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong.
        message: String,
    },

    /// No raw sequences were found under any of the inputs.
    #[error("no raw image sequences found under the given inputs")]
    NoSequences,

    /// A destination path could not be derived because the root directory is
    /// not a structural prefix of the source path.
    #[error("'{root}' is not a path prefix of '{path}'")]
    NotAPrefix {
        /// Root that was expected to prefix the path.
        root: PathBuf,
        /// Source path being mapped.
        path: PathBuf,
    },

    /// An external tool could not be launched at all.
    #[error("failed to launch '{tool}': {source}")]
    ToolLaunch {
        /// Program that failed to start.
        tool: String,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// A sampled image could not be decoded for exposure estimation.
    #[error("failed to decode '{path}': {message}")]
    Decode {
        /// Image that failed to decode.
        path: PathBuf,
        /// Decoder error description.
        message: String,
    },
}

impl Error {
    /// Creates an [`Error::InvalidConfig`] error.
    #[inline]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an [`Error::Decode`] error.
    #[inline]
    pub fn decode(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_a_prefix_message() {
        let err = Error::NotAPrefix {
            root: PathBuf::from("/data/shoot"),
            path: PathBuf::from("/other/img.cr2"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/data/shoot"));
        assert!(msg.contains("/other/img.cr2"));
    }
}
