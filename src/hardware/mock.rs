//! Mock Hardware Implementations
//!
//! Simulated devices for running scans without a rig. All mock devices use
//! async-safe operations (tokio::time, never std::thread::sleep), so tests can
//! run them under a paused clock.
//!
//! # Available Mocks
//!
//! - `MockStage` - records every commanded move and tracks the net position
//! - `MockAcquisition` - synthetic spectra with a peak, optional corruption
//!   and optional stale replies when polled faster than its settling time

use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::error::{AppResult, ScanError};
use crate::instrument::capabilities::{Acquisition, Axis, Displacement, MotionStage, SampleRange};

// =============================================================================
// MockStage - Simulated Motion Stage
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    Relative,
    /// Non-blocking move at an explicit feed rate
    Speed,
    Absolute,
    Home,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMove {
    pub kind: MoveKind,
    pub displacement: Displacement,
    pub speed: Option<f64>,
}

/// Mock gantry
///
/// Clones share state, so a test can keep one handle while the scanner owns
/// another.
///
/// # Example
///
/// ```rust,ignore
/// let stage = MockStage::new();
/// stage.move_relative(&Displacement::xy(10.0, 0.0), None).await?;
/// assert_eq!(stage.position().await, (10.0, 0.0, 0.0));
/// ```
#[derive(Clone)]
pub struct MockStage {
    moves: Arc<RwLock<Vec<RecordedMove>>>,
    position: Arc<RwLock<(f64, f64, f64)>>,
    online: Arc<AtomicBool>,
    offline_after: Option<usize>,
}

impl MockStage {
    /// Create new online mock stage at the origin
    pub fn new() -> Self {
        Self {
            moves: Arc::new(RwLock::new(Vec::new())),
            position: Arc::new(RwLock::new((0.0, 0.0, 0.0))),
            online: Arc::new(AtomicBool::new(true)),
            offline_after: None,
        }
    }

    /// Drop offline once `moves` moves have been accepted.
    pub fn with_offline_after(mut self, moves: usize) -> Self {
        self.offline_after = Some(moves);
        self
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub async fn moves(&self) -> Vec<RecordedMove> {
        self.moves.read().await.clone()
    }

    /// Displacements of every relative move, in order.
    pub async fn relative_moves(&self) -> Vec<Displacement> {
        self.moves
            .read()
            .await
            .iter()
            .filter(|m| matches!(m.kind, MoveKind::Relative | MoveKind::Speed))
            .map(|m| m.displacement)
            .collect()
    }

    pub async fn position(&self) -> (f64, f64, f64) {
        *self.position.read().await
    }

    async fn accept(&self, kind: MoveKind, displacement: &Displacement, speed: Option<f64>) -> AppResult<()> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(ScanError::NotConnected("mock stage".to_string()));
        }

        {
            let mut pos = self.position.write().await;
            match kind {
                MoveKind::Relative | MoveKind::Speed => {
                    pos.0 += displacement.get(Axis::X).unwrap_or(0.0);
                    pos.1 += displacement.get(Axis::Y).unwrap_or(0.0);
                    pos.2 += displacement.get(Axis::Z).unwrap_or(0.0);
                }
                MoveKind::Absolute => {
                    pos.0 = displacement.x.unwrap_or(pos.0);
                    pos.1 = displacement.y.unwrap_or(pos.1);
                    pos.2 = displacement.z.unwrap_or(pos.2);
                }
                MoveKind::Home => *pos = (0.0, 0.0, 0.0),
            }
        }

        let mut moves = self.moves.write().await;
        moves.push(RecordedMove {
            kind,
            displacement: *displacement,
            speed,
        });
        debug!(?kind, %displacement, count = moves.len(), "MockStage move");

        if let Some(limit) = self.offline_after {
            if moves.len() >= limit {
                self.online.store(false, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

impl Default for MockStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MotionStage for MockStage {
    async fn online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn move_relative(&self, displacement: &Displacement, speed: Option<f64>) -> AppResult<()> {
        self.accept(MoveKind::Relative, displacement, speed).await
    }

    async fn move_speed_noblock(&self, displacement: &Displacement, speed: f64) -> AppResult<()> {
        self.accept(MoveKind::Speed, displacement, Some(speed)).await
    }

    async fn move_absolute(&self, target: &Displacement, speed: Option<f64>) -> AppResult<()> {
        self.accept(MoveKind::Absolute, target, speed).await
    }

    async fn home(&self) -> AppResult<()> {
        self.accept(MoveKind::Home, &Displacement::default(), None).await
    }
}

// =============================================================================
// MockAcquisition - Simulated FFT Instrument
// =============================================================================

/// Synthetic spectrum source
///
/// Each capture is low noise plus a Gaussian peak at `peak_bin`. With
/// `corrupt_every(n)` every n-th capture fails to parse; with
/// `settle_time(d)` captures taken less than `d` after the last fresh one
/// repeat it, like a scope that has not finished recomputing. `time_out_at(n)`
/// makes the n-th capture fail at the transport.
#[derive(Clone)]
pub struct MockAcquisition {
    online: Arc<AtomicBool>,
    fetches: Arc<AtomicUsize>,
    corrupt_every: Option<usize>,
    time_out_at: Option<usize>,
    settle_time: Duration,
    peak_bin: usize,
    last_fresh: Arc<Mutex<Option<(Instant, Vec<f64>)>>>,
}

impl MockAcquisition {
    pub fn new() -> Self {
        Self {
            online: Arc::new(AtomicBool::new(true)),
            fetches: Arc::new(AtomicUsize::new(0)),
            corrupt_every: None,
            time_out_at: None,
            settle_time: Duration::ZERO,
            peak_bin: 200,
            last_fresh: Arc::new(Mutex::new(None)),
        }
    }

    pub fn corrupt_every(mut self, n: usize) -> Self {
        self.corrupt_every = (n > 0).then_some(n);
        self
    }

    pub fn time_out_at(mut self, n: usize) -> Self {
        self.time_out_at = Some(n);
        self
    }

    pub fn settle_time(mut self, settle: Duration) -> Self {
        self.settle_time = settle;
        self
    }

    pub fn peak_bin(mut self, bin: usize) -> Self {
        self.peak_bin = bin;
        self
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Captures requested so far, corrupt ones included.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn synthesize(&self, range: &SampleRange, n: usize) -> Vec<f64> {
        let mut rng = rand::thread_rng();
        let height = 1.0 + (n % 7) as f64 * 0.05;
        (range.start..range.end)
            .map(|bin| {
                let d = bin as f64 - self.peak_bin as f64;
                height * (-d * d / 50.0).exp() + rng.gen_range(0.0..0.05)
            })
            .collect()
    }
}

impl Default for MockAcquisition {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Acquisition for MockAcquisition {
    fn name(&self) -> &str {
        "mock"
    }

    async fn online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn fetch_capture(&self, range: &SampleRange) -> AppResult<Vec<f64>> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(ScanError::NotConnected("mock acquisition".to_string()));
        }
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.time_out_at == Some(n) {
            return Err(ScanError::Instrument(format!("mock capture {n} timed out")));
        }
        if let Some(every) = self.corrupt_every {
            if n % every == 0 {
                return Err(ScanError::CorruptSample(format!("mock capture {n} garbled")));
            }
        }

        let mut last = self.last_fresh.lock().await;
        if let Some((taken, spectrum)) = last.as_ref() {
            if taken.elapsed() < self.settle_time && spectrum.len() == range.len() {
                return Ok(spectrum.clone());
            }
        }
        let spectrum = self.synthesize(range, n);
        *last = Some((Instant::now(), spectrum.clone()));
        Ok(spectrum)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
