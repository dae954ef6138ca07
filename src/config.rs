//! Layered configuration for the scanning rig.
//!
//! Settings are resolved once at startup and are immutable afterwards; every
//! component receives the section it needs at construction time. Sources, in
//! increasing priority:
//!
//! 1. Built-in defaults ([`Settings::default`])
//! 2. A TOML file (`scan_daq.toml` unless another path is given)
//! 3. Environment variables prefixed with `SCAN_DAQ_`, nested with `__`
//!
//! ```text
//! SCAN_DAQ_MOTION__PORT=/dev/ttyACM0
//! SCAN_DAQ_ACQUISITION__SAMPLE_DELAY=250ms
//! SCAN_DAQ_APPLICATION__LOG_LEVEL=debug
//! ```

use crate::error::{AppResult, ScanError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "scan_daq.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub motion: MotionSettings,
    pub acquisition: AcquisitionSettings,
    pub scan: ScanSettings,
    pub processing: ProcessingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Fallback filter when `RUST_LOG` is unset (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Printer gantry connection and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionSettings {
    /// Explicit serial device; discovered from `port_globs` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    pub baud_rate: u32,
    pub port_globs: Vec<String>,
    /// Ports whose path contains any of these are never auto-selected
    pub excluded_port_names: Vec<String>,
    /// Handshake wait between opening the port and checking `online()`
    #[serde(with = "humantime_serde")]
    pub connect_wait: Duration,
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Fixed pause after every stop-and-sample move
    #[serde(with = "humantime_serde")]
    pub movement_delay: Duration,
    /// Additional pause per unit of travelled distance
    #[serde(with = "humantime_serde")]
    pub movement_delay_per_unit: Duration,
    /// Feed rate for repositioning segments, units per minute
    pub travel_speed: f64,
    #[serde(with = "humantime_serde")]
    pub status_poll_interval: Duration,
    /// Consecutive transport failures before the handle is forced offline
    pub max_write_failures: u32,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 250_000,
            port_globs: [
                "/dev/ttyUSB*",
                "/dev/ttyACM*",
                "/dev/tty.*",
                "/dev/cu.*",
                "/dev/rfcomm*",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            excluded_port_names: vec!["Bluetooth".to_string(), "FireFly".to_string()],
            connect_wait: Duration::from_secs(2),
            read_timeout: Duration::from_secs(1),
            movement_delay: Duration::from_millis(200),
            movement_delay_per_unit: Duration::from_millis(100),
            travel_speed: 5000.0,
            status_poll_interval: Duration::from_secs(5),
            max_write_failures: 4,
        }
    }
}

/// Which acquisition backend drives the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionBackend {
    Oscilloscope,
    Microphone,
    Mock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    pub backend: AcquisitionBackend,
    /// VISA resource string; discovered on the USB bus when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Substring the `*IDN?` reply must contain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_filter: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Settling time between captures; faster polling returns stale spectra
    #[serde(with = "humantime_serde")]
    pub sample_delay: Duration,
    /// Value written in place of every bin of a corrupt capture
    pub sentinel: f64,
    pub sample_start: usize,
    pub sample_end: usize,
    /// Microphone sample rate, Hz
    pub sample_rate: f64,
    pub frames_per_buffer: usize,
    /// Reduce microphone chunks to FFT magnitudes before storing
    pub microphone_fft: bool,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            backend: AcquisitionBackend::Oscilloscope,
            resource: None,
            identity_filter: None,
            timeout: Duration::from_secs(5),
            sample_delay: Duration::from_millis(500),
            sentinel: -1.0,
            sample_start: 0,
            sample_end: 10_000,
            sample_rate: 44_100.0,
            frames_per_buffer: 2048,
            microphone_fft: true,
        }
    }
}

/// Order in which grid axes are iterated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisOrder {
    /// X is the outer loop: every Y for a given X before advancing X
    #[default]
    XOuter,
    /// Y is the outer loop
    YOuter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    pub savepath: PathBuf,
    /// Recording time at each discrete point
    #[serde(with = "humantime_serde")]
    pub record_time: Duration,
    /// Feed rate while sampling a continuous row, units per minute
    pub scan_speed: f64,
    /// Added to every speed-derived travel time
    #[serde(with = "humantime_serde")]
    pub settling_pad: Duration,
    pub axis_order: AxisOrder,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            savepath: PathBuf::from("./data"),
            record_time: Duration::from_secs(2),
            scan_speed: 600.0,
            settling_pad: Duration::from_millis(500),
            axis_order: AxisOrder::XOuter,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_end: Option<usize>,
}

impl Settings {
    /// Load settings from an optional TOML file plus `SCAN_DAQ_` environment overrides.
    ///
    /// When `path` is `None` the default file is used if it exists.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::from_figment(
            Figment::from(Serialized::defaults(Settings::default()))
                .merge(Toml::file(path))
                .merge(Env::prefixed("SCAN_DAQ_").split("__")),
        )
    }

    /// Parse settings from a TOML string layered over the defaults.
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Settings::default())).merge(Toml::string(toml)),
        )
    }

    fn from_figment(figment: Figment) -> AppResult<Self> {
        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Render as TOML, e.g. to seed a configuration file.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| ScanError::Configuration(e.to_string()))
    }

    /// Reject values that parse but cannot drive hardware.
    pub fn validate(&self) -> AppResult<()> {
        let motion = &self.motion;
        if motion.baud_rate == 0 {
            return Err(ScanError::Configuration("motion.baud_rate must be positive".into()));
        }
        if motion.port.is_none() && motion.port_globs.is_empty() {
            return Err(ScanError::Configuration(
                "motion.port_globs is empty and no motion.port is set".into(),
            ));
        }
        if motion.max_write_failures == 0 {
            return Err(ScanError::Configuration(
                "motion.max_write_failures must be at least 1".into(),
            ));
        }
        if !(motion.travel_speed > 0.0) || !(self.scan.scan_speed > 0.0) {
            return Err(ScanError::Configuration("feed rates must be positive".into()));
        }
        let acq = &self.acquisition;
        if acq.sample_end <= acq.sample_start {
            return Err(ScanError::Configuration(format!(
                "acquisition sample window [{}, {}) is empty",
                acq.sample_start, acq.sample_end
            )));
        }
        if acq.frames_per_buffer == 0 || !(acq.sample_rate > 0.0) {
            return Err(ScanError::Configuration(
                "microphone sample_rate and frames_per_buffer must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.motion.max_write_failures, 4);
        assert_eq!(settings.acquisition.sentinel, -1.0);
    }

    #[test]
    fn toml_overrides_defaults() {
        let settings = Settings::from_toml_str(
            r#"
[motion]
port = "/dev/ttyACM0"
baud_rate = 115200
movement_delay = "50ms"

[acquisition]
backend = "mock"
sample_delay = "125ms"
"#,
        )
        .unwrap();
        assert_eq!(settings.motion.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(settings.motion.baud_rate, 115_200);
        assert_eq!(settings.motion.movement_delay, Duration::from_millis(50));
        assert_eq!(settings.acquisition.backend, AcquisitionBackend::Mock);
        assert_eq!(settings.acquisition.sample_delay, Duration::from_millis(125));
        // untouched sections keep their defaults
        assert_eq!(settings.scan, ScanSettings::default());
    }

    #[test]
    fn empty_sample_window_is_rejected() {
        let err = Settings::from_toml_str("[acquisition]\nsample_start = 10\nsample_end = 10\n")
            .unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));
    }

    #[test]
    fn default_settings_round_trip_through_toml() {
        let rendered = Settings::default().to_toml().unwrap();
        let parsed = Settings::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed, Settings::default());
    }
}
