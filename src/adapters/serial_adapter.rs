use crate::adapters::HardwareAdapter;
use crate::error::{AppResult, ScanError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;

/// Serial adapter for printer firmware speaking line-oriented GCode
///
/// This adapter wraps the serialport crate and provides async I/O
/// using Tokio's blocking task executor for synchronous serial operations.
/// Every command is acknowledged by the firmware with a line starting with
/// `ack_prefix` (Marlin: `ok`); replies are collected up to and including it.
#[derive(Clone)]
#[cfg_attr(not(feature = "instrument_serial"), allow(dead_code))]
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    port_name: String,

    /// Baud rate (e.g., 115200, 250000)
    baud_rate: u32,

    /// Overall reply timeout
    timeout: Duration,

    /// Line terminator for commands
    line_terminator: String,

    /// Prefix of the acknowledgement line closing every reply
    ack_prefix: String,

    /// The actual serial port (behind Arc<Mutex> for async access)
    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
    #[cfg(not(feature = "instrument_serial"))]
    port: Option<Arc<Mutex<()>>>,
}

impl SerialAdapter {
    /// Create a new serial adapter with default settings
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyACM0")
    /// * `baud_rate` - Communication speed (e.g., 250000)
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            timeout: Duration::from_secs(1),
            line_terminator: "\n".to_string(),
            ack_prefix: "ok".to_string(),
            port: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    #[cfg(feature = "instrument_serial")]
    async fn transact(&self, command: &str) -> AppResult<String> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| ScanError::NotConnected(self.port_name.clone()))?
            .clone();

        let command_str = format!("{}{}", command, self.line_terminator);
        let command_for_log = command.to_string();
        let ack = self.ack_prefix.clone();
        let timeout = self.timeout;

        // Execute blocking serial I/O on dedicated thread
        tokio::task::spawn_blocking(move || -> AppResult<String> {
            use std::io::{Read, Write};

            let mut port_guard = port.blocking_lock();

            port_guard.write_all(command_str.as_bytes())?;
            port_guard.flush()?;
            debug!(command = %command_for_log.trim(), "Sent serial command");

            // Collect lines until the acknowledgement arrives
            let mut reply = Vec::new();
            let mut line = Vec::new();
            let mut buffer = [0u8; 1];
            let start = std::time::Instant::now();

            loop {
                if start.elapsed() > timeout {
                    return Err(ScanError::Instrument(format!(
                        "serial reply to '{}' timed out after {:?}",
                        command_for_log.trim(),
                        timeout
                    )));
                }

                match port_guard.read(&mut buffer) {
                    Ok(1) => {
                        if buffer[0] == b'\n' {
                            let text = String::from_utf8_lossy(&line).trim().to_string();
                            line.clear();
                            if text.is_empty() {
                                continue;
                            }
                            let done = text.starts_with(&ack);
                            reply.push(text);
                            if done {
                                break;
                            }
                        } else {
                            line.push(buffer[0]);
                        }
                    }
                    Ok(0) => {
                        return Err(ScanError::Instrument("unexpected EOF from serial port".into()));
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        // Port timeout is shorter than our overall timeout
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                    Ok(_) => unreachable!("Read into single-byte buffer returned >1"),
                }
            }

            let reply = reply.join("\n");
            debug!(reply = %reply, "Received serial reply");
            Ok(reply)
        })
        .await
        .map_err(|e| ScanError::Instrument(format!("serial I/O task failed: {e}")))?
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn transact(&self, _command: &str) -> AppResult<String> {
        Err(ScanError::FeatureNotEnabled("instrument_serial".to_string()))
    }
}

#[async_trait]
impl HardwareAdapter for SerialAdapter {
    fn name(&self) -> &str {
        "serial"
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn connect(&mut self) -> AppResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = serialport::new(&self.port_name, self.baud_rate)
                .timeout(Duration::from_millis(100)) // Internal read timeout
                .open()
                .map_err(|e| {
                    ScanError::Instrument(format!(
                        "failed to open serial port '{}' at {} baud: {}",
                        self.port_name, self.baud_rate, e
                    ))
                })?;

            self.port = Some(Arc::new(Mutex::new(port)));

            debug!(port = %self.port_name, baud = self.baud_rate, "Serial port opened");
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(ScanError::FeatureNotEnabled("instrument_serial".to_string()))
        }
    }

    async fn disconnect(&mut self) -> AppResult<()> {
        if self.port.take().is_some() {
            debug!(port = %self.port_name, "Serial port closed");
        }
        Ok(())
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        self.transact(command).await.map(|_| ())
    }

    async fn query(&mut self, query: &str) -> AppResult<String> {
        self.transact(query).await
    }
}
