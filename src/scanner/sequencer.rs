//! Scan coordinate sequencer.
//!
//! Drives a [`MotionStage`] and an [`Acquisition`] backend through a scan
//! pattern. Every move is relative to the previous target, the sequencer keeps
//! the net offset from the scan origin in `position`, and a single corrective
//! move of `-position` ends every pattern.
//!
//! ```text
//! Idle -> Connecting -> Ready -> Scanning -> Returning -> Idle
//!             |                      |
//!             +------> Faulted <-----+
//! ```
//!
//! `Faulted` is sticky until [`Scanner::reset`].

use crate::config::{AxisOrder, Settings};
use crate::data::compile::RecordName;
use crate::error::{AppResult, ScanError};
use crate::instrument::capabilities::{Acquisition, Displacement, MotionStage, SampleRange};
use crate::metadata::{SessionInfo, SessionInfoBuilder};
use crate::scanner::pattern::{
    lattice_points, prism_points, raster_points, raster_segments, Coordinate, SegmentKind,
};
use crate::scanner::session::ScanSession;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Connecting,
    Ready,
    Scanning,
    Returning,
    Faulted,
}

/// Wait model for open-loop moves. The firmware never reports completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionTiming {
    pub movement_delay: Duration,
    pub movement_delay_per_unit: Duration,
    pub settling_pad: Duration,
}

impl MotionTiming {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            movement_delay: settings.motion.movement_delay,
            movement_delay_per_unit: settings.motion.movement_delay_per_unit,
            settling_pad: settings.scan.settling_pad,
        }
    }

    /// Stop-and-sample wait: fixed delay plus a per-unit share.
    pub fn discrete_wait(&self, distance: f64) -> Duration {
        self.movement_delay + self.movement_delay_per_unit.mul_f64(distance.max(0.0))
    }

    /// `distance / (speed / 60)` seconds plus the settling pad. `speed` is in
    /// units per minute.
    pub fn travel_time(&self, distance: f64, speed: f64) -> Duration {
        let seconds = if speed > 0.0 {
            distance.max(0.0) / (speed / 60.0)
        } else {
            0.0
        };
        Duration::from_secs_f64(seconds) + self.settling_pad
    }
}

/// Parameters of one scan pattern. `begin` is where the probe already is.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub begin: Coordinate,
    pub end: Coordinate,
    pub resolution: usize,
    pub resolution_z: usize,
    /// Recording time at each discrete point
    pub record_time: Duration,
    /// Feed rate while sampling a continuous row, units per minute
    pub speed: f64,
    pub range: SampleRange,
    pub sample_delay: Duration,
    pub savepath: PathBuf,
    pub note: String,
}

impl ScanRequest {
    /// A request with every other parameter taken from `settings`.
    pub fn new(
        begin: Coordinate,
        end: Coordinate,
        resolution: usize,
        settings: &Settings,
    ) -> AppResult<Self> {
        let range = SampleRange::new(
            settings.acquisition.sample_start,
            settings.acquisition.sample_end,
        )?;
        Ok(Self {
            begin,
            end,
            resolution,
            resolution_z: 1,
            record_time: settings.scan.record_time,
            speed: settings.scan.scan_speed,
            range,
            sample_delay: settings.acquisition.sample_delay,
            savepath: settings.scan.savepath.clone(),
            note: String::new(),
        })
    }

    pub fn with_resolution_z(mut self, resolution_z: usize) -> Self {
        self.resolution_z = resolution_z;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    /// Offsets covered by the pattern, relative to `begin`.
    pub fn extent(&self) -> Coordinate {
        self.end - self.begin
    }

    fn validate(&self) -> AppResult<()> {
        if self.resolution == 0 || self.resolution_z == 0 {
            return Err(ScanError::Configuration(
                "scan resolution must be at least 1".into(),
            ));
        }
        if !(self.speed > 0.0) {
            return Err(ScanError::Configuration("scan speed must be positive".into()));
        }
        Ok(())
    }

    fn session_info(&self, pattern: &str, order: AxisOrder) -> SessionInfo {
        SessionInfoBuilder::new(pattern)
            .parameter("begin", self.begin)
            .parameter("end", self.end)
            .parameter("resolution", self.resolution)
            .parameter("resolution_z", self.resolution_z)
            .parameter("record_time", format!("{:?}", self.record_time))
            .parameter("speed", self.speed)
            .parameter("sample_start", self.range.start)
            .parameter("sample_end", self.range.end)
            .parameter("sample_delay", format!("{:?}", self.sample_delay))
            .parameter("axis_order", format!("{order:?}"))
            .note(&self.note)
            .build()
    }
}

/// Outcome of one completed pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSummary {
    pub pattern: &'static str,
    pub session_dir: PathBuf,
    pub records: usize,
    /// Net offset from the origin before the return move
    pub net_displacement: Coordinate,
    pub return_move: Coordinate,
}

pub struct Scanner {
    motion: Box<dyn MotionStage>,
    acquisition: Box<dyn Acquisition>,
    timing: MotionTiming,
    axis_order: AxisOrder,
    state: ScanState,
    fault: Option<String>,
    position: Coordinate,
}

impl Scanner {
    pub fn new(
        motion: Box<dyn MotionStage>,
        acquisition: Box<dyn Acquisition>,
        settings: &Settings,
    ) -> Self {
        Self {
            motion,
            acquisition,
            timing: MotionTiming::from_settings(settings),
            axis_order: settings.scan.axis_order,
            state: ScanState::Idle,
            fault: None,
            position: Coordinate::ORIGIN,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Reason for the current fault, if any.
    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    /// Net offset from the origin of the scan in progress (or the last one,
    /// if it faulted).
    pub fn position(&self) -> Coordinate {
        self.position
    }

    pub fn acquisition(&self) -> &dyn Acquisition {
        self.acquisition.as_ref()
    }

    /// Check both devices are online.
    pub async fn connect(&mut self) -> AppResult<()> {
        if self.state == ScanState::Faulted {
            return Err(self.faulted_error());
        }
        self.state = ScanState::Connecting;
        if !self.motion.online().await {
            return Err(self.fault_with(ScanError::NotConnected("motion stage".into())));
        }
        if !self.acquisition.online().await {
            let name = self.acquisition.name().to_string();
            return Err(self.fault_with(ScanError::NotConnected(name)));
        }
        self.state = ScanState::Ready;
        info!(acquisition = self.acquisition.name(), "Scanner ready");
        Ok(())
    }

    /// Clear a fault and re-check the devices.
    pub async fn reset(&mut self) -> AppResult<()> {
        if self.state == ScanState::Faulted {
            warn!(
                fault = self.fault.as_deref().unwrap_or(""),
                offset = %self.position,
                "Resetting faulted scanner; probe position is not restored"
            );
        }
        self.state = ScanState::Idle;
        self.fault = None;
        self.connect().await
    }

    /// Stop-and-sample over an XY lattice at the current height.
    pub async fn scan_lattice(&mut self, request: &ScanRequest) -> AppResult<ScanSummary> {
        const PATTERN: &str = "rectangular_lattice";
        request.validate()?;
        let points = lattice_points(request.extent(), request.resolution, self.axis_order, 0.0);
        self.scan_points(PATTERN, request, &points).await
    }

    /// Stop-and-sample over stacked XY lattices, lowest layer first.
    pub async fn scan_prism(&mut self, request: &ScanRequest) -> AppResult<ScanSummary> {
        const PATTERN: &str = "rectangular_prism";
        request.validate()?;
        let points = prism_points(
            request.extent(),
            request.resolution,
            request.resolution_z,
            self.axis_order,
        );
        self.scan_points(PATTERN, request, &points).await
    }

    /// Continuous raster: sample while crossing each row, reposition between
    /// rows.
    pub async fn scan_raster(&mut self, request: &ScanRequest) -> AppResult<ScanSummary> {
        const PATTERN: &str = "continuous_raster";
        request.validate()?;
        let segments = raster_segments(&raster_points(request.extent(), request.resolution));
        let mut session = self.start(PATTERN, request, segments.len()).await?;

        for (index, segment) in segments.iter().enumerate() {
            let delta = segment.to - self.position;
            match segment.kind {
                SegmentKind::Sampling => {
                    let duration = self.timing.travel_time(delta.norm(), request.speed);
                    debug!(segment = index, from = %segment.from, to = %segment.to, ?duration, "Sampling row");
                    self.issue(segment.to, Some(request.speed)).await?;
                    let name = RecordName::Line {
                        xmin: segment.from.x.min(segment.to.x),
                        xmax: segment.from.x.max(segment.to.x),
                        y: segment.from.y,
                    };
                    // the acquisition call is the wait for the move
                    self.acquire(&mut session, &name, duration, request).await?;
                }
                SegmentKind::Reposition => {
                    debug!(segment = index, to = %segment.to, "Repositioning");
                    self.issue(segment.to, None).await?;
                    tokio::time::sleep(self.timing.discrete_wait(delta.norm())).await;
                }
            }
        }

        self.finish(PATTERN, session).await
    }

    async fn scan_points(
        &mut self,
        pattern: &'static str,
        request: &ScanRequest,
        points: &[Coordinate],
    ) -> AppResult<ScanSummary> {
        let mut session = self.start(pattern, request, points.len()).await?;

        for (index, &point) in points.iter().enumerate() {
            let delta = point - self.position;
            debug!(point = index, target = %point, "Moving to point");
            self.issue(point, None).await?;
            tokio::time::sleep(self.timing.discrete_wait(delta.norm())).await;

            let name = RecordName::Point {
                x: point.x,
                y: point.y,
                z: point.z,
            };
            self.acquire(&mut session, &name, request.record_time, request)
                .await?;
        }

        self.finish(pattern, session).await
    }

    async fn start(
        &mut self,
        pattern: &'static str,
        request: &ScanRequest,
        steps: usize,
    ) -> AppResult<ScanSession> {
        if self.state == ScanState::Faulted {
            return Err(self.faulted_error());
        }
        if self.state != ScanState::Ready {
            self.connect().await?;
        }
        let info = request.session_info(pattern, self.axis_order);
        let session = ScanSession::create(&request.savepath, &info)?;
        self.position = Coordinate::ORIGIN;
        self.state = ScanState::Scanning;
        info!(pattern, steps, extent = %request.extent(), "Scan started");
        Ok(session)
    }

    async fn finish(&mut self, pattern: &'static str, session: ScanSession) -> AppResult<ScanSummary> {
        self.state = ScanState::Returning;
        let net = self.position;
        let back = -net;
        info!(pattern, net = %net, "Returning to origin");
        self.issue(Coordinate::ORIGIN, None).await?;
        tokio::time::sleep(self.timing.discrete_wait(back.norm())).await;

        self.state = ScanState::Idle;
        info!(
            pattern,
            records = session.records(),
            dir = %session.dir().display(),
            "Scan complete"
        );
        Ok(ScanSummary {
            pattern,
            session_dir: session.dir().to_path_buf(),
            records: session.records(),
            net_displacement: net,
            return_move: back,
        })
    }

    /// Command the relative move from `position` to `target`. With `speed`,
    /// the non-blocking variant is used. `position` only ever holds pattern
    /// targets.
    async fn issue(&mut self, target: Coordinate, speed: Option<f64>) -> AppResult<()> {
        if !self.motion.online().await {
            return Err(self.fault_with(ScanError::NotConnected("motion stage".into())));
        }
        let delta = target - self.position;
        let displacement = Displacement::from(delta);
        let result = match speed {
            Some(speed) => self.motion.move_speed_noblock(&displacement, speed).await,
            None => self.motion.move_relative(&displacement, None).await,
        };
        if let Err(e) = result {
            return Err(self.fault_with(e));
        }
        self.position = target;
        Ok(())
    }

    async fn acquire(
        &mut self,
        session: &mut ScanSession,
        name: &RecordName,
        duration: Duration,
        request: &ScanRequest,
    ) -> AppResult<()> {
        if !self.acquisition.online().await {
            let device = self.acquisition.name().to_string();
            return Err(self.fault_with(ScanError::NotConnected(device)));
        }
        let result = session
            .capture(
                self.acquisition.as_ref(),
                name,
                duration,
                &request.range,
                request.sample_delay,
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(self.fault_with(e)),
        }
    }

    fn fault_with(&mut self, cause: ScanError) -> ScanError {
        let during = self.state;
        let reason = cause.to_string();
        error!(state = ?during, offset = %self.position, error = %reason, "Scanner faulted");
        self.state = ScanState::Faulted;
        self.fault = Some(reason);
        self.faulted_error()
    }

    fn faulted_error(&self) -> ScanError {
        ScanError::Faulted(self.fault.clone().unwrap_or_else(|| "unknown fault".into()))
    }
}
