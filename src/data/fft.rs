//! Spectral reduction of raw audio chunks.
//!
//! Applies a Hann window and a forward FFT (rustfft) to a fixed-size chunk and
//! returns one linear magnitude per bin up to Nyquist.

use crate::error::{AppResult, ScanError};
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct FftConfig {
    pub window_size: usize,
    pub sampling_rate: f64,
}

/// Windowed FFT of fixed-size chunks.
///
/// ```
/// use scan_daq::data::fft::{FftConfig, SpectrumReducer};
///
/// let reducer = SpectrumReducer::new(FftConfig { window_size: 1024, sampling_rate: 1024.0 }).unwrap();
/// let tone: Vec<f64> = (0..1024)
///     .map(|i| (2.0 * std::f64::consts::PI * 50.0 * i as f64 / 1024.0).sin())
///     .collect();
/// let mags = reducer.magnitudes(&tone);
/// let peak = mags.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1)).unwrap().0;
/// assert_eq!(peak, 50);
/// ```
#[derive(Clone)]
pub struct SpectrumReducer {
    window_size: usize,
    sampling_rate: f64,
    fft: Arc<dyn Fft<f64>>,
    hann_window: Vec<f64>,
}

impl SpectrumReducer {
    pub fn new(config: FftConfig) -> AppResult<Self> {
        if config.window_size < 2 {
            return Err(ScanError::Configuration(format!(
                "FFT window must hold at least 2 samples, got {}",
                config.window_size
            )));
        }
        if !(config.sampling_rate > 0.0) {
            return Err(ScanError::Configuration(
                "FFT sampling rate must be positive".into(),
            ));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.window_size);

        let n = config.window_size;
        let hann_window = (0..n)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64).cos()))
            .collect();

        Ok(Self {
            window_size: n,
            sampling_rate: config.sampling_rate,
            fft,
            hann_window,
        })
    }

    /// Number of bins returned by [`SpectrumReducer::magnitudes`].
    pub fn bins(&self) -> usize {
        self.window_size / 2
    }

    pub fn bin_width(&self) -> f64 {
        self.sampling_rate / self.window_size as f64
    }

    /// Single-sided amplitude spectrum. Short chunks are zero-padded, long
    /// ones truncated.
    pub fn magnitudes(&self, samples: &[f64]) -> Vec<f64> {
        let mut buffer: Vec<Complex<f64>> = self
            .hann_window
            .iter()
            .enumerate()
            .map(|(i, w)| Complex::new(samples.get(i).copied().unwrap_or(0.0) * w, 0.0))
            .collect();

        self.fft.process(&mut buffer);

        let n = self.window_size as f64;
        buffer
            .iter()
            .take(self.bins())
            .enumerate()
            .map(|(i, c)| if i == 0 { c.norm() / n } else { 2.0 * c.norm() / n })
            .collect()
    }
}
