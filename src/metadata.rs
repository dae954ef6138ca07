//! Session metadata written as the `info` record of every scan session.
//!
//! The record is a plain-text `key: value` dump so that a partially completed
//! session directory stays self-describing even if the process dies before the
//! first sample is written. Keys are written in insertion order.
//!
//! `SessionInfoBuilder` follows the usual builder pattern:
//!
//! ```
//! use scan_daq::metadata::SessionInfoBuilder;
//!
//! let info = SessionInfoBuilder::new("rectangular_lattice")
//!     .parameter("resolution", 11)
//!     .note("speaker at 2 kHz")
//!     .build();
//! assert!(info.render().contains("resolution: 11"));
//! ```

use crate::error::AppResult;
use std::fmt::Display;
use std::fs;
use std::path::Path;

/// Metadata describing one scan session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    /// Pattern kind, e.g. `rectangular_lattice`
    pub pattern: String,
    /// Ordered pattern parameters
    pub parameters: Vec<(String, String)>,
    /// Free-text operator note
    pub note: String,
    /// Session start, seconds since the Unix epoch
    pub started_at: i64,
    pub software_version: String,
}

impl SessionInfo {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("pattern: {}\n", self.pattern));
        out.push_str(&format!("started_at: {}\n", self.started_at));
        out.push_str(&format!("software_version: {}\n", self.software_version));
        for (key, value) in &self.parameters {
            out.push_str(&format!("{key}: {value}\n"));
        }
        // notes may span lines; keep one line per record entry
        out.push_str(&format!("note: {}\n", self.note.replace('\n', " ")));
        out
    }

    /// Write the record to `path`, replacing any existing file.
    pub fn write_to(&self, path: &Path) -> AppResult<()> {
        fs::write(path, self.render())?;
        Ok(())
    }

    /// Parse a previously rendered record back into key/value pairs.
    pub fn parse(text: &str) -> Vec<(String, String)> {
        text.lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect()
    }
}

/// A builder for [`SessionInfo`].
pub struct SessionInfoBuilder {
    inner: SessionInfo,
}

impl SessionInfoBuilder {
    pub fn new(pattern: &str) -> Self {
        Self {
            inner: SessionInfo {
                pattern: pattern.to_string(),
                parameters: Vec::new(),
                note: String::new(),
                started_at: chrono::Utc::now().timestamp(),
                software_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    pub fn parameter(mut self, key: &str, value: impl Display) -> Self {
        self.inner
            .parameters
            .push((key.to_string(), value.to_string()));
        self
    }

    pub fn note(mut self, note: &str) -> Self {
        self.inner.note = note.to_string();
        self
    }

    pub fn started_at(mut self, unix_seconds: i64) -> Self {
        self.inner.started_at = unix_seconds;
        self
    }

    pub fn build(self) -> SessionInfo {
        self.inner
    }
}
