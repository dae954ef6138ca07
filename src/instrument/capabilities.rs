//! Capability traits consumed by the scan sequencer.
//!
//! The sequencer never talks to a concrete device. It drives a
//! [`MotionStage`] and an [`Acquisition`] backend, so the printer, the
//! oscilloscope, the microphone and the simulated devices are interchangeable.

use crate::data::storage::{self, SampleRecord};
use crate::error::{AppResult, ScanError};
use async_trait::async_trait;
use ndarray::Array2;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Gantry axis. `E` is the extruder/wire feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
    E,
}

impl Axis {
    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::E => 'E',
        }
    }
}

impl FromStr for Axis {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            "z" => Ok(Axis::Z),
            "e" => Ok(Axis::E),
            _ => Err(ScanError::InvalidAxis(s.to_string())),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// A partial coordinate. Absent axes are not commanded at all.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Displacement {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub e: Option<f64>,
}

impl Displacement {
    pub fn xy(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
            e: None,
        }
    }

    pub fn along(axis: Axis, value: f64) -> Self {
        let mut d = Self::default();
        d.set(axis, value);
        d
    }

    pub fn set(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.x = Some(value),
            Axis::Y => self.y = Some(value),
            Axis::Z => self.z = Some(value),
            Axis::E => self.e = Some(value),
        }
    }

    pub fn get(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::E => self.e,
        }
    }

    /// Commanded axes in X, Y, Z, E order.
    pub fn components(&self) -> impl Iterator<Item = (Axis, f64)> + '_ {
        [Axis::X, Axis::Y, Axis::Z, Axis::E]
            .into_iter()
            .filter_map(move |axis| self.get(axis).map(|v| (axis, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.components().next().is_none()
    }

    /// Euclidean length over the spatial axes.
    pub fn distance(&self) -> f64 {
        let x = self.x.unwrap_or(0.0);
        let y = self.y.unwrap_or(0.0);
        let z = self.z.unwrap_or(0.0);
        (x * x + y * y + z * z).sqrt()
    }

    /// Parse one `("x", "10.5")` style pair.
    pub fn parse_pair(label: &str, distance: &str) -> AppResult<(Axis, f64)> {
        let axis: Axis = label.parse()?;
        let value: f64 = distance
            .trim()
            .parse()
            .map_err(|_| ScanError::InvalidDistance(distance.to_string()))?;
        if !value.is_finite() {
            return Err(ScanError::InvalidDistance(distance.to_string()));
        }
        Ok((axis, value))
    }

    /// Build a displacement from labelled pairs, failing on the first bad one.
    pub fn from_labeled(pairs: &[(&str, &str)]) -> AppResult<Self> {
        let mut d = Self::default();
        for (label, distance) in pairs {
            let (axis, value) = Self::parse_pair(label, distance)?;
            d.set(axis, value);
        }
        Ok(d)
    }

    /// Like [`Displacement::from_labeled`], but keeps the valid pairs and
    /// returns the rejected ones alongside.
    pub fn from_labeled_lenient(pairs: &[(&str, &str)]) -> (Self, Vec<ScanError>) {
        let mut d = Self::default();
        let mut rejected = Vec::new();
        for (label, distance) in pairs {
            match Self::parse_pair(label, distance) {
                Ok((axis, value)) => d.set(axis, value),
                Err(e) => rejected.push(e),
            }
        }
        (d, rejected)
    }
}

impl fmt::Display for Displacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words: Vec<String> = self
            .components()
            .map(|(axis, v)| format!("{axis}{v}"))
            .collect();
        write!(f, "{}", words.join(" "))
    }
}

/// Half-open bin index window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRange {
    pub start: usize,
    pub end: usize,
}

impl SampleRange {
    pub fn new(start: usize, end: usize) -> AppResult<Self> {
        if end <= start {
            return Err(ScanError::Configuration(format!(
                "sample window [{start}, {end}) is empty"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Capability for the motion controller carrying the probe.
#[async_trait]
pub trait MotionStage: Send + Sync {
    /// Live connectivity. Consulted before every move.
    async fn online(&self) -> bool;

    /// Relative move at the default travel speed unless `speed` is given.
    /// The caller waits out the travel time.
    async fn move_relative(&self, displacement: &Displacement, speed: Option<f64>)
        -> AppResult<()>;

    /// Relative move at `speed` (units per minute). Returns as soon as the
    /// command is accepted so acquisition can overlap the motion.
    async fn move_speed_noblock(&self, displacement: &Displacement, speed: f64) -> AppResult<()>;

    async fn move_absolute(&self, target: &Displacement, speed: Option<f64>) -> AppResult<()>;

    async fn home(&self) -> AppResult<()>;
}

/// Capability for anything that can produce sample arrays.
#[async_trait]
pub trait Acquisition: Send + Sync {
    fn name(&self) -> &str;

    async fn online(&self) -> bool;

    /// Value written to every bin of a corrupt capture.
    fn sentinel(&self) -> f64 {
        -1.0
    }

    /// Bin window a capture actually covers for a requested range.
    fn capture_window(&self, range: &SampleRange) -> SampleRange {
        *range
    }

    /// How many captures fit in `duration`, and the pause after each.
    fn capture_plan(&self, duration: Duration, delay: Duration) -> (usize, Duration) {
        (capture_count(duration, delay), delay)
    }

    /// One-time instrument setup before a burst of captures.
    async fn prepare(&self, _range: &SampleRange) -> AppResult<()> {
        Ok(())
    }

    /// A single capture. Unparsable data is reported as `CorruptSample`.
    async fn fetch_capture(&self, range: &SampleRange) -> AppResult<Vec<f64>>;

    /// Block for roughly `duration`, taking one capture per `delay`.
    ///
    /// Corrupt, wrong-length or timed-out captures become a sentinel row of
    /// the expected length, so the row count depends only on the parameters.
    /// A device that is not connected ends the recording.
    async fn record(
        &self,
        duration: Duration,
        range: &SampleRange,
        delay: Duration,
    ) -> AppResult<SampleRecord> {
        let window = self.capture_window(range);
        let expected = window.len();
        let (captures, pause) = self.capture_plan(duration, delay);

        self.prepare(range).await?;

        let mut flat = Vec::with_capacity(captures * expected);
        let mut corrupt = 0usize;
        for index in 0..captures {
            let capture = self.fetch_capture(range).await.and_then(|c| {
                if c.len() == expected {
                    Ok(c)
                } else {
                    Err(ScanError::CorruptSample(format!(
                        "expected {expected} bins, got {}",
                        c.len()
                    )))
                }
            });
            match capture {
                Ok(values) => flat.extend(values),
                Err(e @ (ScanError::CorruptSample(_) | ScanError::Instrument(_))) => {
                    corrupt += 1;
                    warn!(
                        device = self.name(),
                        capture = index,
                        error = %e,
                        "Substituting sentinel for corrupt capture"
                    );
                    flat.extend(std::iter::repeat(self.sentinel()).take(expected));
                }
                Err(e) => return Err(e),
            }
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        debug!(device = self.name(), captures, corrupt, bins = expected, "Recording finished");
        let data = Array2::from_shape_vec((captures, expected), flat)
            .map_err(|e| ScanError::Instrument(format!("capture buffer shape: {e}")))?;
        Ok(SampleRecord {
            sample_start: window.start,
            data,
        })
    }

    /// [`Acquisition::record`] straight into the record store. The record
    /// extension is appended to `path`; the final path is returned.
    async fn record_to_file(
        &self,
        duration: Duration,
        path: &Path,
        range: &SampleRange,
        delay: Duration,
    ) -> AppResult<PathBuf> {
        let record = self.record(duration, range, delay).await?;
        storage::write_record(path, &record)
    }
}

/// `max(1, floor(duration / delay))`
pub fn capture_count(duration: Duration, delay: Duration) -> usize {
    if delay.is_zero() {
        return 1;
    }
    let n = (duration.as_secs_f64() / delay.as_secs_f64()).floor();
    (n as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockAcquisition;
    use tracing_test::traced_test;

    #[test]
    fn axis_labels_are_case_insensitive() {
        assert_eq!("x".parse::<Axis>().unwrap(), Axis::X);
        assert_eq!(" Z ".parse::<Axis>().unwrap(), Axis::Z);
        assert!(matches!("w".parse::<Axis>(), Err(ScanError::InvalidAxis(_))));
    }

    #[test]
    fn labeled_pairs_parse_or_fail() {
        let d = Displacement::from_labeled(&[("x", "10"), ("Y", "-2.5")]).unwrap();
        assert_eq!(d, Displacement::xy(10.0, -2.5));

        let err = Displacement::from_labeled(&[("x", "ten")]).unwrap_err();
        assert!(matches!(err, ScanError::InvalidDistance(_)));
        assert!(err.is_invalid_input());

        let err = Displacement::from_labeled(&[("q", "1")]).unwrap_err();
        assert!(matches!(err, ScanError::InvalidAxis(_)));
    }

    #[test]
    fn lenient_parse_keeps_valid_pairs() {
        let (d, rejected) =
            Displacement::from_labeled_lenient(&[("x", "1"), ("w", "2"), ("z", "nan?")]);
        assert_eq!(d.x, Some(1.0));
        assert!(d.y.is_none() && d.z.is_none());
        assert_eq!(rejected.len(), 2);
    }

    #[test]
    fn displacement_distance_ignores_extruder() {
        let mut d = Displacement::xyz(3.0, 4.0, 0.0);
        d.set(Axis::E, 100.0);
        assert_eq!(d.distance(), 5.0);
        assert_eq!(d.to_string(), "X3 Y4 Z0 E100");
    }

    #[test]
    fn capture_count_is_floor_with_minimum_one() {
        let ms = Duration::from_millis;
        assert_eq!(capture_count(ms(2000), ms(500)), 4);
        assert_eq!(capture_count(ms(1900), ms(500)), 3);
        assert_eq!(capture_count(ms(100), ms(500)), 1);
        assert_eq!(capture_count(ms(100), Duration::ZERO), 1);
    }

    #[test]
    fn empty_sample_range_is_rejected() {
        assert!(SampleRange::new(5, 5).is_err());
        assert_eq!(SampleRange::new(2, 7).unwrap().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn corrupt_captures_become_sentinel_rows() {
        let device = MockAcquisition::new().corrupt_every(3);
        let range = SampleRange::new(180, 220).unwrap();

        let record = device
            .record(Duration::from_millis(500), &range, Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(record.data.dim(), (10, 40));
        assert_eq!(record.sample_start, 180);
        for row in [2, 5, 8] {
            assert!(record.data.row(row).iter().all(|v| *v == -1.0), "row {row}");
        }
        assert!(record.data.row(0).iter().any(|v| *v > 0.5));
        assert!(logs_contain("Substituting sentinel for corrupt capture"));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_on_one_capture_is_absorbed() {
        let device = MockAcquisition::new().time_out_at(2);
        let range = SampleRange::new(0, 16).unwrap();

        let record = device
            .record(Duration::from_millis(400), &range, Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(record.data.dim(), (4, 16));
        assert!(record.data.row(1).iter().all(|v| *v == -1.0));
        assert!(record.data.row(2).iter().all(|v| *v != -1.0));
        assert_eq!(device.fetches(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_device_ends_the_recording() {
        let device = MockAcquisition::new();
        device.set_online(false);
        let range = SampleRange::new(0, 16).unwrap();

        let err = device
            .record(Duration::from_millis(400), &range, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::NotConnected(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn record_to_file_appends_extension() {
        let dir = tempfile::tempdir().unwrap();
        let device = MockAcquisition::new();
        let range = SampleRange::new(0, 8).unwrap();

        let path = device
            .record_to_file(
                Duration::from_millis(200),
                &dir.path().join("1.5_2_0"),
                &range,
                Duration::from_millis(100),
            )
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("1.5_2_0.csv"));

        let stored = storage::read_record(&path).unwrap();
        assert_eq!(stored.data.dim(), (2, 8));
    }
}
