//! Raw audio acquisition.
//!
//! Reads fixed-size chunks of mono 16-bit frames from an [`AudioInput`] and
//! optionally reduces each chunk to its FFT magnitude, so a plain microphone
//! can stand in for the oscilloscope. Chunks arrive at the sound card's pace,
//! so there is no extra settling delay between captures.

use crate::config::AcquisitionSettings;
use crate::data::fft::{FftConfig, SpectrumReducer};
use crate::error::{AppResult, ScanError};
use crate::instrument::capabilities::{Acquisition, SampleRange};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// A blocking source of mono i16 frames.
pub trait AudioInput: Send {
    fn sample_rate(&self) -> f64;

    /// Block until `frames` frames are available.
    fn read_frames(&mut self, frames: usize) -> AppResult<Vec<i16>>;

    fn is_open(&self) -> bool {
        true
    }
}

/// Synthetic sine with optional noise, for bench testing without hardware.
pub struct ToneSource {
    frequency: f64,
    amplitude: f64,
    noise: f64,
    sample_rate: f64,
    position: u64,
    paced: bool,
}

impl ToneSource {
    /// `amplitude` and `noise` are fractions of full scale.
    pub fn new(frequency: f64, amplitude: f64, sample_rate: f64) -> Self {
        Self {
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            noise: 0.0,
            sample_rate,
            position: 0,
            paced: false,
        }
    }

    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise.clamp(0.0, 1.0);
        self
    }

    /// Sleep for the real duration of each chunk, like a sound card would.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }
}

impl AudioInput for ToneSource {
    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn read_frames(&mut self, frames: usize) -> AppResult<Vec<i16>> {
        if self.paced {
            std::thread::sleep(Duration::from_secs_f64(frames as f64 / self.sample_rate));
        }
        let mut rng = rand::thread_rng();
        let omega = 2.0 * std::f64::consts::PI * self.frequency / self.sample_rate;
        let out = (0..frames as u64)
            .map(|i| {
                let t = (self.position + i) as f64;
                let noise = if self.noise > 0.0 {
                    rng.gen_range(-self.noise..self.noise)
                } else {
                    0.0
                };
                let v = (self.amplitude * (omega * t).sin() + noise).clamp(-1.0, 1.0);
                (v * i16::MAX as f64) as i16
            })
            .collect();
        self.position += frames as u64;
        Ok(out)
    }
}

pub struct Microphone {
    input: Arc<Mutex<Box<dyn AudioInput>>>,
    sample_rate: f64,
    frames_per_buffer: usize,
    reducer: Option<SpectrumReducer>,
    sentinel: f64,
}

impl Microphone {
    pub fn new(input: Box<dyn AudioInput>, settings: &AcquisitionSettings) -> AppResult<Self> {
        let sample_rate = input.sample_rate();
        if !(sample_rate > 0.0) || settings.frames_per_buffer == 0 {
            return Err(ScanError::Configuration(
                "microphone needs a positive sample rate and chunk size".into(),
            ));
        }
        let reducer = if settings.microphone_fft {
            Some(SpectrumReducer::new(FftConfig {
                window_size: settings.frames_per_buffer,
                sampling_rate: sample_rate,
            })?)
        } else {
            None
        };
        info!(
            sample_rate,
            frames = settings.frames_per_buffer,
            fft = settings.microphone_fft,
            "Microphone ready"
        );
        Ok(Self {
            input: Arc::new(Mutex::new(input)),
            sample_rate,
            frames_per_buffer: settings.frames_per_buffer,
            reducer,
            sentinel: settings.sentinel,
        })
    }

    /// Microphone for a scan. Host audio capture is not built in, so only a
    /// simulated run gets one, fed by a 2 kHz [`ToneSource`].
    pub fn open(settings: &AcquisitionSettings, simulated: bool) -> AppResult<Self> {
        if !simulated {
            return Err(ScanError::FeatureNotEnabled(
                "host audio input (use --mock for the synthetic tone)".into(),
            ));
        }
        let source = ToneSource::new(2000.0, 0.5, settings.sample_rate)
            .with_noise(0.05)
            .paced(true);
        Self::new(Box::new(source), settings)
    }

    /// Hz per stored bin when FFT reduction is on.
    pub fn bin_width(&self) -> Option<f64> {
        self.reducer.as_ref().map(SpectrumReducer::bin_width)
    }

    /// Bins (or frames) in one full chunk before windowing.
    fn chunk_width(&self) -> usize {
        match &self.reducer {
            Some(reducer) => reducer.bins(),
            None => self.frames_per_buffer,
        }
    }
}

#[async_trait]
impl Acquisition for Microphone {
    fn name(&self) -> &str {
        "microphone"
    }

    async fn online(&self) -> bool {
        self.input.lock().await.is_open()
    }

    fn sentinel(&self) -> f64 {
        self.sentinel
    }

    /// FFT chunks honour the bin window; raw chunks always hold every frame.
    fn capture_window(&self, range: &SampleRange) -> SampleRange {
        let width = self.chunk_width();
        match self.reducer {
            Some(_) => {
                let start = range.start.min(width);
                SampleRange {
                    start,
                    end: range.end.clamp(start, width),
                }
            }
            None => SampleRange {
                start: 0,
                end: width,
            },
        }
    }

    /// `floor(duration * rate / frames)` chunks, at least one, back to back.
    fn capture_plan(&self, duration: Duration, _delay: Duration) -> (usize, Duration) {
        let chunks =
            (duration.as_secs_f64() * self.sample_rate / self.frames_per_buffer as f64).floor();
        ((chunks as usize).max(1), Duration::ZERO)
    }

    async fn fetch_capture(&self, range: &SampleRange) -> AppResult<Vec<f64>> {
        let input = Arc::clone(&self.input);
        let frames = self.frames_per_buffer;
        let chunk = tokio::task::spawn_blocking(move || input.blocking_lock().read_frames(frames))
            .await
            .map_err(|e| ScanError::Instrument(format!("audio read task failed: {e}")))??;

        if chunk.len() != frames {
            return Err(ScanError::CorruptSample(format!(
                "short audio chunk: {} of {frames} frames",
                chunk.len()
            )));
        }
        let samples: Vec<f64> = chunk.into_iter().map(f64::from).collect();
        match &self.reducer {
            Some(reducer) => {
                let window = self.capture_window(range);
                let magnitudes = reducer.magnitudes(&samples);
                Ok(magnitudes[window.start..window.end].to_vec())
            }
            None => Ok(samples),
        }
    }
}
