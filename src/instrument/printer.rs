//! Printer gantry driver.
//!
//! Drives a Marlin-style 3D printer over any [`HardwareAdapter`]. Moves are
//! fire-and-forget from the firmware's point of view: the `ok` only means the
//! command was queued, so callers wait out the travel time themselves.
//!
//! A background status monitor polls `M105` (temperatures) and `M27` (SD print
//! progress). Monitor and foreground share one transport mutex, so their
//! commands never interleave on the wire. Every transport failure, from either
//! side, counts towards a circuit breaker: after `max_write_failures`
//! consecutive failures the handle goes offline and the transport is closed.

use crate::adapters::{HardwareAdapter, SerialAdapter};
use crate::config::MotionSettings;
use crate::error::{AppResult, ScanError};
use crate::gcode::GCommand;
use crate::instrument::capabilities::{Displacement, MotionStage};
use crate::instrument::discovery;
use async_trait::async_trait;
use regex::Regex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Latest telemetry reported by the firmware.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrinterStatus {
    pub extruder_temp: Option<f64>,
    pub bed_temp: Option<f64>,
    /// SD print progress in `[0, 1]`, `None` when not printing
    pub progress: Option<f64>,
    pub consecutive_failures: u32,
    pub online: bool,
}

/// Parse `T:` and `B:` readings out of an `M105` reply.
pub fn parse_temperatures(reply: &str) -> (Option<f64>, Option<f64>) {
    let read = |pattern: &str| {
        Regex::new(pattern)
            .ok()
            .and_then(|re| re.captures(reply))
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    };
    (
        read(r"T:\s*(-?\d+(?:\.\d+)?)"),
        read(r"B:\s*(-?\d+(?:\.\d+)?)"),
    )
}

/// Parse `SD printing byte N/M` out of an `M27` reply.
pub fn parse_progress(reply: &str) -> Option<f64> {
    let re = Regex::new(r"SD printing byte\s+(\d+)\s*/\s*(\d+)").ok()?;
    let caps = re.captures(reply)?;
    let done: f64 = caps.get(1)?.as_str().parse().ok()?;
    let total: f64 = caps.get(2)?.as_str().parse().ok()?;
    if total > 0.0 {
        Some(done / total)
    } else {
        None
    }
}

/// Transport plus the shared state the monitor also touches.
struct Link {
    name: String,
    adapter: Mutex<Box<dyn HardwareAdapter>>,
    online: AtomicBool,
    failures: AtomicU32,
    max_failures: u32,
    status: RwLock<PrinterStatus>,
}

impl Link {
    /// Send one line, counting failures towards the breaker.
    async fn transmit(&self, line: &str) -> AppResult<String> {
        let mut adapter = self.adapter.lock().await;
        match adapter.query(line).await {
            Ok(reply) => {
                self.failures.store(0, Ordering::SeqCst);
                debug!(printer = %self.name, command = line, "Command acknowledged");
                Ok(reply)
            }
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(printer = %self.name, command = line, failures, error = %e, "Printer write failed");
                if failures >= self.max_failures && self.online.swap(false, Ordering::SeqCst) {
                    error!(
                        printer = %self.name,
                        failures,
                        "Too many consecutive write failures, taking printer offline"
                    );
                    if let Err(e) = adapter.disconnect().await {
                        warn!(printer = %self.name, error = %e, "Disconnect after trip failed");
                    }
                }
                Err(e)
            }
        }
    }

    async fn poll_status(&self) {
        let temps = self.transmit("M105").await.map(|r| parse_temperatures(&r));
        let progress = self.transmit("M27").await.map(|r| parse_progress(&r));

        let mut status = self.status.write().await;
        if let Ok((extruder, bed)) = temps {
            status.extruder_temp = extruder.or(status.extruder_temp);
            status.bed_temp = bed.or(status.bed_temp);
        }
        if let Ok(progress) = progress {
            status.progress = progress;
        }
        status.consecutive_failures = self.failures.load(Ordering::SeqCst);
        status.online = self.online.load(Ordering::SeqCst);
    }
}

pub struct Printer {
    link: Arc<Link>,
    travel_speed: f64,
    monitor: Option<(JoinHandle<()>, oneshot::Sender<()>)>,
}

impl Printer {
    /// Discover (unless configured) and open the serial port, then handshake.
    pub async fn open(settings: &MotionSettings) -> AppResult<Self> {
        let port = discovery::select_serial_port(settings)?;
        info!(port = %port, baud = settings.baud_rate, "Connecting to printer");
        let adapter = SerialAdapter::new(port, settings.baud_rate).with_timeout(settings.read_timeout);
        Self::connect(Box::new(adapter), settings).await
    }

    /// Open `adapter`, wait for the firmware to boot, and confirm it answers.
    pub async fn connect(
        mut adapter: Box<dyn HardwareAdapter>,
        settings: &MotionSettings,
    ) -> AppResult<Self> {
        adapter.connect().await?;
        let name = adapter.name().to_string();

        // Opening the port resets most boards; they ignore input while booting.
        tokio::time::sleep(settings.connect_wait).await;

        let link = Arc::new(Link {
            name,
            adapter: Mutex::new(adapter),
            online: AtomicBool::new(false),
            failures: AtomicU32::new(0),
            max_failures: settings.max_write_failures.max(1),
            status: RwLock::new(PrinterStatus::default()),
        });

        match link.transmit("M105").await {
            Ok(reply) => {
                link.online.store(true, Ordering::SeqCst);
                let (extruder, bed) = parse_temperatures(&reply);
                let mut status = link.status.write().await;
                status.extruder_temp = extruder;
                status.bed_temp = bed;
                status.online = true;
            }
            Err(e) => {
                error!(printer = %link.name, error = %e, "Printer did not answer handshake");
                return Err(ScanError::NotConnected(format!(
                    "printer on {} (is this the right port?)",
                    link.name
                )));
            }
        }

        info!(printer = %link.name, "Printer online");
        Ok(Self {
            link,
            travel_speed: settings.travel_speed,
            monitor: None,
        })
    }

    pub fn is_online(&self) -> bool {
        self.link.online.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> PrinterStatus {
        let mut status = self.link.status.read().await.clone();
        status.online = self.is_online();
        status.consecutive_failures = self.link.failures.load(Ordering::SeqCst);
        status
    }

    fn ensure_online(&self) -> AppResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(ScanError::NotConnected("printer".to_string()))
        }
    }

    /// Serialize and send commands in order, stopping at the first failure.
    pub async fn send_commands(&self, commands: &[GCommand]) -> AppResult<()> {
        self.ensure_online()?;
        for command in commands {
            self.link.transmit(&command.to_string()).await?;
        }
        Ok(())
    }

    /// Relative move from `(label, distance)` pairs such as `("x", "10")`.
    pub async fn move_labeled(&self, pairs: &[(&str, &str)], speed: Option<f64>) -> AppResult<()> {
        let displacement = Displacement::from_labeled(pairs)?;
        self.move_relative(&displacement, speed).await
    }

    pub async fn dwell(&self, duration: Duration) -> AppResult<()> {
        self.send_commands(&[GCommand::Dwell(duration)]).await
    }

    /// Start polling telemetry every `interval`. A second call is a no-op.
    pub fn start_monitor(&mut self, interval: Duration) {
        if self.monitor.is_some() {
            return;
        }
        let link = Arc::clone(&self.link);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            info!(printer = %link.name, ?interval, "Status monitor started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !link.online.load(Ordering::SeqCst) {
                            warn!(printer = %link.name, "Printer offline, stopping status monitor");
                            break;
                        }
                        link.poll_status().await;
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }
            info!(printer = %link.name, "Status monitor stopped");
        });

        self.monitor = Some((handle, shutdown_tx));
    }

    pub async fn stop_monitor(&mut self) {
        if let Some((handle, shutdown_tx)) = self.monitor.take() {
            let _ = shutdown_tx.send(());
            let _ = handle.await;
        }
    }

    pub async fn disconnect(&mut self) -> AppResult<()> {
        self.stop_monitor().await;
        self.link.online.store(false, Ordering::SeqCst);
        self.link.adapter.lock().await.disconnect().await?;
        info!(printer = %self.link.name, "Printer disconnected");
        Ok(())
    }
}

#[async_trait]
impl MotionStage for Printer {
    async fn online(&self) -> bool {
        self.is_online()
    }

    async fn move_relative(&self, displacement: &Displacement, speed: Option<f64>) -> AppResult<()> {
        debug!(%displacement, ?speed, "Relative move");
        self.send_commands(&[
            GCommand::Relative,
            GCommand::rapid(*displacement, Some(speed.unwrap_or(self.travel_speed))),
        ])
        .await
    }

    async fn move_speed_noblock(&self, displacement: &Displacement, speed: f64) -> AppResult<()> {
        debug!(%displacement, speed, "Relative move at feed rate");
        self.send_commands(&[
            GCommand::Relative,
            GCommand::linear(*displacement, Some(speed)),
        ])
        .await
    }

    async fn move_absolute(&self, target: &Displacement, speed: Option<f64>) -> AppResult<()> {
        debug!(%target, ?speed, "Absolute move");
        self.send_commands(&[
            GCommand::Absolute,
            GCommand::rapid(*target, Some(speed.unwrap_or(self.travel_speed))),
        ])
        .await
    }

    async fn home(&self) -> AppResult<()> {
        info!("Homing all axes");
        self.send_commands(&[GCommand::Home(Vec::new())]).await
    }
}
