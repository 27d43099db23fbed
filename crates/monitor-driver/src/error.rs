//! Error types for Monitor runtime operations

use crate::registry::RegionKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors that can occur while driving the Monitor
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Device file absent or not accessible
    #[error("Monitor device not available: {path}")]
    NoDevice {
        /// Path that was opened
        path: PathBuf,
    },

    /// A control, CMS or staging mapping could not be established
    #[error("Failed to map {what}: {reason}")]
    MapFailed {
        /// Which window was being mapped
        what: &'static str,
        /// Reason reported by the kernel
        reason: String,
    },

    /// Host or staging allocation failed
    #[error("Out of memory allocating {bytes} bytes")]
    NoMemory {
        /// Requested size
        bytes: usize,
    },

    /// Region name or region kind already registered
    #[error("Region already exists: {reason}")]
    Duplicate {
        /// What clashed
        reason: String,
    },

    /// Free or drain target does not exist
    #[error("No region found: {target}")]
    NotFound {
        /// Name or kind that was looked up
        target: String,
    },

    /// ioctl, poll or positional read failure
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Operation called in the wrong lifecycle state
    #[error("Invalid state: {reason}")]
    State {
        /// What was attempted and why it is not allowed
        reason: String,
    },

    /// Transfer length violates the 16-byte DMA rule
    #[error("Transfer of {bytes} bytes is not a multiple of 16")]
    Alignment {
        /// Requested transfer length
        bytes: usize,
    },

    /// Region disappeared between the DMA request and the copy-out
    #[error("{kind} region vanished during DMA drain")]
    RegionGone {
        /// Kind of the drained region
        kind: RegionKind,
    },

    /// Latched failure of the CMS sampler thread
    #[error("CMS sampler failed: {reason}")]
    Sampler {
        /// Reason for failure
        reason: String,
    },

    /// Register access outside the mapped window
    #[error("Register word {word} outside {limit}-word window")]
    OutOfBounds {
        /// Requested word offset
        word: usize,
        /// Window size in words
        limit: usize,
    },

    /// Invalid platform configuration
    #[error("Invalid configuration: {reason}")]
    Config {
        /// Reason for rejection
        reason: String,
    },
}

/// Flat classification of [`MonitorError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`MonitorError::NoDevice`]
    NoDevice,
    /// See [`MonitorError::MapFailed`]
    MapFailed,
    /// See [`MonitorError::NoMemory`]
    NoMemory,
    /// See [`MonitorError::Duplicate`]
    Duplicate,
    /// See [`MonitorError::NotFound`]
    NotFound,
    /// See [`MonitorError::Io`]
    Io,
    /// See [`MonitorError::State`]
    State,
    /// See [`MonitorError::Alignment`]
    Alignment,
    /// See [`MonitorError::RegionGone`]
    Gone,
    /// See [`MonitorError::Sampler`]
    Sampler,
    /// See [`MonitorError::OutOfBounds`]
    OutOfBounds,
    /// See [`MonitorError::Config`]
    Config,
}

impl MonitorError {
    /// Create a device not available error
    pub fn no_device(path: impl Into<PathBuf>) -> Self {
        Self::NoDevice { path: path.into() }
    }

    /// Create a mapping failure error
    pub fn map_failed(what: &'static str, reason: impl ToString) -> Self {
        Self::MapFailed {
            what,
            reason: reason.to_string(),
        }
    }

    /// Create a duplicate region error
    pub fn duplicate(reason: impl Into<String>) -> Self {
        Self::Duplicate {
            reason: reason.into(),
        }
    }

    /// Create a region not found error
    pub fn not_found(target: impl Into<String>) -> Self {
        Self::NotFound {
            target: target.into(),
        }
    }

    /// Create an invalid state error
    pub fn state(reason: impl Into<String>) -> Self {
        Self::State {
            reason: reason.into(),
        }
    }

    /// Create a sampler failure error
    pub fn sampler(reason: impl Into<String>) -> Self {
        Self::Sampler {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Error kind, for matching without destructuring
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NoDevice { .. } => ErrorKind::NoDevice,
            Self::MapFailed { .. } => ErrorKind::MapFailed,
            Self::NoMemory { .. } => ErrorKind::NoMemory,
            Self::Duplicate { .. } => ErrorKind::Duplicate,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Io { .. } => ErrorKind::Io,
            Self::State { .. } => ErrorKind::State,
            Self::Alignment { .. } => ErrorKind::Alignment,
            Self::RegionGone { .. } => ErrorKind::Gone,
            Self::Sampler { .. } => ErrorKind::Sampler,
            Self::OutOfBounds { .. } => ErrorKind::OutOfBounds,
            Self::Config { .. } => ErrorKind::Config,
        }
    }
}

impl From<rustix::io::Errno> for MonitorError {
    fn from(errno: rustix::io::Errno) -> Self {
        Self::Io {
            source: errno.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(MonitorError::duplicate("x").kind(), ErrorKind::Duplicate);
        assert_eq!(MonitorError::state("busy").kind(), ErrorKind::State);
        assert_eq!(
            MonitorError::Alignment { bytes: 12 }.kind(),
            ErrorKind::Alignment
        );
        let io: MonitorError = rustix::io::Errno::INVAL.into();
        assert_eq!(io.kind(), ErrorKind::Io);
    }

    #[test]
    fn messages_name_the_target() {
        let e = MonitorError::not_found("power");
        assert!(e.to_string().contains("power"));
        let e = MonitorError::Alignment { bytes: 24 };
        assert!(e.to_string().contains("24"));
    }
}
