//! Custom error types for the scanning rig.
//!
//! `ScanError` is the single error type shared by the device adapters, the scan
//! sequencer and the result compiler. Using `thiserror` keeps the taxonomy in one
//! place so callers can decide, per variant, whether a failure ends the current
//! command, the current session, or nothing at all.
//!
//! ## Error Hierarchy
//!
//! - **`NotConnected`**: a device handle is not online. Fatal to the operation that
//!   found it, not to the process.
//! - **`InvalidAxis` / `InvalidDistance`**: malformed motion input. Together these
//!   form the "invalid input" class: the command is skipped and logged.
//! - **`CorruptSample`**: an acquisition reply that is not numeric data. Absorbed by
//!   substitution inside the acquisition loop.
//! - **`NoDataFound`**: the result compiler found no records. Aborts compilation.
//! - **`DeviceNotFound` / `AmbiguousDevice`**: discovery failed at construction time.
//!   The session never starts.
//! - **`UnsupportedUnits`**: the instrument is not set up for frequency units.
//! - **`Faulted`**: the sequencer lost a device mid-scan and refuses further work
//!   until reset.
//!
//! The remaining variants wrap I/O, CSV, and configuration failures so `?` works
//! across the crate.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record file error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("{0} is not connected")]
    NotConnected(String),

    #[error("Invalid axis label '{0}'")]
    InvalidAxis(String),

    #[error("Invalid distance '{0}': not a real number")]
    InvalidDistance(String),

    #[error("Corrupt sample: {0}")]
    CorruptSample(String),

    #[error("No data found in {}", .0.display())]
    NoDataFound(PathBuf),

    #[error("No device found: {0}")]
    DeviceNotFound(String),

    #[error("Ambiguous device selection, candidates: {}", .0.join(", "))]
    AmbiguousDevice(Vec<String>),

    #[error("Unsupported units '{0}': instrument must be configured for Hz")]
    UnsupportedUnits(String),

    #[error("Scanner faulted: {0}")]
    Faulted(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl ScanError {
    /// Bad axis label or unparsable distance.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, ScanError::InvalidAxis(_) | ScanError::InvalidDistance(_))
    }

    /// Whether a long-running session may log this error and keep going.
    pub fn is_recoverable(&self) -> bool {
        self.is_invalid_input() || matches!(self, ScanError::CorruptSample(_))
    }
}

impl From<figment::Error> for ScanError {
    fn from(err: figment::Error) -> Self {
        ScanError::Config(Box::new(err))
    }
}
