//! VISA Hardware Adapter for USBTMC bench instruments
//!
//! Provides [`HardwareAdapter`] for the oscilloscope and signal generator, which
//! sit on the USB instrument bus and speak SCPI-style text commands.

use crate::adapters::HardwareAdapter;
use crate::error::{AppResult, ScanError};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_visa")]
use std::sync::Arc;
#[cfg(feature = "instrument_visa")]
use tokio::sync::Mutex;
#[cfg(feature = "instrument_visa")]
use tracing::debug;
#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;

/// VISA adapter for instrument communication
///
/// This adapter wraps the visa-rs crate and provides async I/O
/// using Tokio's blocking task executor for synchronous VISA operations.
///
/// Supports USB resource strings like
/// "USB0::0x0699::0x0408::C012345::INSTR".
#[cfg_attr(not(feature = "instrument_visa"), allow(dead_code))]
pub struct VisaAdapter {
    /// VISA resource string
    pub(crate) resource_string: String,

    /// Read/write timeout
    pub(crate) timeout: Duration,

    /// Line terminator for commands (typically "\n" for SCPI)
    pub(crate) line_terminator: String,

    /// The actual VISA instrument (behind Arc<Mutex> for async access)
    #[cfg(feature = "instrument_visa")]
    instrument: Option<Arc<Mutex<Instrument>>>,
}

impl VisaAdapter {
    /// Create a new VISA adapter with default settings
    pub fn new(resource_string: String) -> Self {
        Self {
            resource_string,
            timeout: Duration::from_secs(5),
            line_terminator: "\n".to_string(),
            #[cfg(feature = "instrument_visa")]
            instrument: None,
        }
    }

    /// Set read/write timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource_string
    }

    #[cfg(feature = "instrument_visa")]
    async fn transact(&self, command: &str, expect_reply: bool) -> AppResult<String> {
        use std::io::{BufRead, BufReader, Write};

        let instrument = self
            .instrument
            .as_ref()
            .ok_or_else(|| ScanError::NotConnected(self.resource_string.clone()))?
            .clone();

        let command_str = format!("{}{}", command, self.line_terminator);
        let command_for_log = command.to_string();

        // Execute blocking VISA I/O on dedicated thread
        tokio::task::spawn_blocking(move || -> AppResult<String> {
            let instr_guard = instrument.blocking_lock();
            let instr: &Instrument = &instr_guard;

            instr.write_all(command_str.as_bytes())?;
            if !expect_reply {
                debug!(command = %command_for_log.trim(), "VISA write sent");
                return Ok(String::new());
            }

            let mut reply = String::new();
            BufReader::new(instr).read_line(&mut reply)?;
            let reply = reply.trim().to_string();
            debug!(command = %command_for_log.trim(), reply_len = reply.len(), "VISA query answered");
            Ok(reply)
        })
        .await
        .map_err(|e| ScanError::Instrument(format!("VISA I/O task failed: {e}")))?
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn transact(&self, _command: &str, _expect_reply: bool) -> AppResult<String> {
        Err(ScanError::FeatureNotEnabled("instrument_visa".to_string()))
    }
}

/// List every resource the VISA resource manager can see.
#[cfg(feature = "instrument_visa")]
pub async fn list_resources() -> AppResult<Vec<String>> {
    use std::ffi::CString;

    tokio::task::spawn_blocking(|| -> AppResult<Vec<String>> {
        let rm = DefaultRM::new().map_err(|e| ScanError::Instrument(e.to_string()))?;
        let expr = CString::new("?*INSTR")
            .map_err(|e| ScanError::Instrument(e.to_string()))?
            .into();
        let mut list = rm
            .find_res_list(&expr)
            .map_err(|e| ScanError::Instrument(e.to_string()))?;
        let mut resources = Vec::new();
        while let Some(res) = list.find_next().map_err(|e| ScanError::Instrument(e.to_string()))? {
            resources.push(res.to_string());
        }
        Ok(resources)
    })
    .await
    .map_err(|e| ScanError::Instrument(format!("VISA enumeration task failed: {e}")))?
}

#[cfg(not(feature = "instrument_visa"))]
pub async fn list_resources() -> AppResult<Vec<String>> {
    Err(ScanError::FeatureNotEnabled("instrument_visa".to_string()))
}

#[async_trait]
impl HardwareAdapter for VisaAdapter {
    fn name(&self) -> &str {
        "visa"
    }

    fn is_connected(&self) -> bool {
        #[cfg(feature = "instrument_visa")]
        {
            self.instrument.is_some()
        }

        #[cfg(not(feature = "instrument_visa"))]
        {
            false
        }
    }

    async fn connect(&mut self) -> AppResult<()> {
        #[cfg(feature = "instrument_visa")]
        {
            use std::ffi::CString;

            let resource_str = self.resource_string.clone();
            let timeout = self.timeout;

            let instrument = tokio::task::spawn_blocking(move || -> AppResult<Instrument> {
                let rm = DefaultRM::new().map_err(|e| ScanError::Instrument(e.to_string()))?;
                let res = CString::new(resource_str.clone())
                    .map_err(|e| ScanError::Instrument(e.to_string()))?
                    .into();
                rm.open(&res, AccessMode::NO_LOCK, timeout).map_err(|e| {
                    ScanError::Instrument(format!(
                        "failed to open VISA resource {resource_str}: {e}"
                    ))
                })
            })
            .await
            .map_err(|e| ScanError::Instrument(format!("VISA open task failed: {e}")))??;

            self.instrument = Some(Arc::new(Mutex::new(instrument)));
            debug!(resource = %self.resource_string, "VISA resource opened");
            Ok(())
        }

        #[cfg(not(feature = "instrument_visa"))]
        {
            Err(ScanError::FeatureNotEnabled("instrument_visa".to_string()))
        }
    }

    async fn disconnect(&mut self) -> AppResult<()> {
        #[cfg(feature = "instrument_visa")]
        {
            if self.instrument.take().is_some() {
                debug!(resource = %self.resource_string, "VISA resource closed");
            }
        }
        Ok(())
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        self.transact(command, false).await.map(|_| ())
    }

    async fn query(&mut self, query: &str) -> AppResult<String> {
        self.transact(query, true).await
    }
}
