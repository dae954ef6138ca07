//! Offline reconstruction of an amplitude image from a session directory.
//!
//! Continuous sessions produce one record per row
//! (`continuous_{xmin}_{xmax}_{y}`, always recorded from `xmin` to `xmax`);
//! each capture reduces to its peak over the chosen bin window, and rows of
//! differing length are linearly resampled to the median row length so they
//! stack into one array. Discrete sessions (`{x}_{y}_{z}`) compile per layer.

use crate::data::storage::{self, SampleRecord, RECORD_EXTENSION};
use crate::error::{AppResult, ScanError};
use ndarray::{s, Array2, Axis};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CONTINUOUS_PREFIX: &str = "continuous_";

/// Coordinates recovered from a record file name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordName {
    /// Stop-and-sample point
    Point { x: f64, y: f64, z: f64 },
    /// Line swept from `xmin` to `xmax` at fixed `y`
    Line { xmin: f64, xmax: f64, y: f64 },
}

/// File stem for a record; the inverse of [`RecordName::parse`].
impl fmt::Display for RecordName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordName::Point { x, y, z } => write!(f, "{x}_{y}_{z}"),
            RecordName::Line { xmin, xmax, y } => write!(f, "{CONTINUOUS_PREFIX}{xmin}_{xmax}_{y}"),
        }
    }
}

impl RecordName {
    /// Parse a file stem (no extension).
    pub fn parse(stem: &str) -> Option<Self> {
        let (is_line, body) = match stem.strip_prefix(CONTINUOUS_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, stem),
        };
        let values: Vec<f64> = body
            .split('_')
            .map(|part| part.parse::<f64>().ok())
            .collect::<Option<_>>()?;
        let [a, b, c] = values.as_slice() else {
            return None;
        };
        Some(if is_line {
            RecordName::Line {
                xmin: *a,
                xmax: *b,
                y: *c,
            }
        } else {
            RecordName::Point {
                x: *a,
                y: *b,
                z: *c,
            }
        })
    }
}

/// Bin window applied before reduction. Indices are absolute bin numbers, as
/// stored in each record header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub sample_start: Option<usize>,
    pub sample_end: Option<usize>,
}

/// A compiled amplitude image.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanImage {
    /// rows × columns
    pub amplitudes: Array2<f64>,
    /// Span of the column axis (always X), low to high
    pub x_range: (f64, f64),
    /// Y coordinate of each row, ascending
    pub rows: Vec<f64>,
}

impl ScanImage {
    pub fn shape(&self) -> (usize, usize) {
        self.amplitudes.dim()
    }

    /// Column positions along X.
    pub fn columns(&self) -> Vec<f64> {
        linspace(self.x_range.0, self.x_range.1, self.amplitudes.ncols())
    }

    /// Header `y,<x0>,<x1>,...`, then one row per Y.
    pub fn write_csv(&self, path: &Path) -> AppResult<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["y".to_string()];
        header.extend(self.columns().iter().map(|x| x.to_string()));
        writer.write_record(&header)?;

        for (y, row) in self.rows.iter().zip(self.amplitudes.rows()) {
            let mut line = vec![y.to_string()];
            line.extend(row.iter().map(|v| v.to_string()));
            writer.write_record(&line)?;
        }
        writer.flush()?;
        info!(path = %path.display(), shape = ?self.shape(), "Image written");
        Ok(())
    }
}

/// Compile every continuous record in `dir` into an image.
pub fn compile_session(dir: &Path, options: &CompileOptions) -> AppResult<ScanImage> {
    let mut lines = Vec::new();
    for (path, name) in list_records(dir)? {
        let RecordName::Line { xmin, xmax, y } = name else {
            continue;
        };
        let record = storage::read_record(&path)?;
        let amplitudes = peak_amplitudes(&record, options)?;
        lines.push((y, xmin, xmax, amplitudes));
    }

    if lines.is_empty() {
        return Err(ScanError::NoDataFound(dir.to_path_buf()));
    }
    lines.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    info!(dir = %dir.display(), records = lines.len(), "Compiling continuous session");

    let x_range = (lines[0].1, lines[0].2);
    if lines.iter().any(|l| (l.1, l.2) != x_range) {
        warn!(?x_range, "Rows cover different X spans; using the first row's span");
    }

    let lengths: Vec<usize> = lines.iter().map(|l| l.3.len()).collect();
    let target = median_length(&lengths);
    debug!(?lengths, target, "Resampling rows to median length");

    let mut amplitudes = Array2::zeros((lines.len(), target));
    for (mut row, line) in amplitudes.axis_iter_mut(Axis(0)).zip(&lines) {
        for (cell, value) in row.iter_mut().zip(resample(&line.3, target)) {
            *cell = value;
        }
    }

    Ok(ScanImage {
        amplitudes,
        x_range,
        rows: lines.iter().map(|l| l.0).collect(),
    })
}

/// Compile the discrete records of layer `z` into an image indexed `[y][x]`.
/// Each pixel is the mean over captures of the per-capture peak; grid cells
/// with no record are NaN.
pub fn compile_grid(dir: &Path, z: f64, options: &CompileOptions) -> AppResult<ScanImage> {
    let mut pixels = Vec::new();
    for (path, name) in list_records(dir)? {
        let RecordName::Point { x, y, z: layer } = name else {
            continue;
        };
        if (layer - z).abs() > 1e-9 {
            continue;
        }
        let record = storage::read_record(&path)?;
        let peaks = peak_amplitudes(&record, options)?;
        let mean = if peaks.is_empty() {
            f64::NAN
        } else {
            peaks.iter().sum::<f64>() / peaks.len() as f64
        };
        pixels.push((x, y, mean));
    }

    if pixels.is_empty() {
        return Err(ScanError::NoDataFound(dir.to_path_buf()));
    }

    let xs = distinct_sorted(pixels.iter().map(|p| p.0));
    let ys = distinct_sorted(pixels.iter().map(|p| p.1));
    let mut amplitudes = Array2::from_elem((ys.len(), xs.len()), f64::NAN);
    for (x, y, value) in &pixels {
        let col = xs.iter().position(|v| v.to_bits() == x.to_bits());
        let row = ys.iter().position(|v| v.to_bits() == y.to_bits());
        if let (Some(r), Some(c)) = (row, col) {
            amplitudes[[r, c]] = *value;
        }
    }
    info!(dir = %dir.display(), z, shape = ?amplitudes.dim(), "Compiled grid layer");

    Ok(ScanImage {
        amplitudes,
        x_range: (xs[0], xs[xs.len() - 1]),
        rows: ys,
    })
}

/// Record files in `dir` whose names parse, sorted by path.
fn list_records(dir: &Path) -> AppResult<Vec<(PathBuf, RecordName)>> {
    if !dir.is_dir() {
        return Err(ScanError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("session directory {} does not exist", dir.display()),
        )));
    }
    let pattern = dir.join(format!("*.{RECORD_EXTENSION}"));
    let pattern = pattern.to_string_lossy();
    let paths = glob::glob(&pattern)
        .map_err(|e| ScanError::Configuration(format!("bad session path: {e}")))?;

    let mut records = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| ScanError::Io(e.into()))?;
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match RecordName::parse(stem) {
            Some(name) => records.push((path.clone(), name)),
            None => debug!(path = %path.display(), "Skipping file with unrecognised name"),
        }
    }
    records.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(records)
}

/// Per-capture maximum over the bin window.
pub fn peak_amplitudes(record: &SampleRecord, options: &CompileOptions) -> AppResult<Vec<f64>> {
    let bins = record.bins();
    let lo = options
        .sample_start
        .map_or(0, |s| s.saturating_sub(record.sample_start))
        .min(bins);
    let hi = options
        .sample_end
        .map_or(bins, |e| e.saturating_sub(record.sample_start))
        .min(bins);
    if lo >= hi {
        return Err(ScanError::Configuration(format!(
            "bin window {:?}..{:?} does not overlap record bins {}..{}",
            options.sample_start,
            options.sample_end,
            record.sample_start,
            record.sample_start + bins
        )));
    }

    Ok(record
        .data
        .slice(s![.., lo..hi])
        .map_axis(Axis(1), |row| row.fold(f64::NEG_INFINITY, |a, &b| a.max(b)))
        .to_vec())
}

/// Median of row lengths; an even count averages the two middle values
/// (truncated). Never below 1.
pub fn median_length(lengths: &[usize]) -> usize {
    if lengths.is_empty() {
        return 1;
    }
    let mut sorted = lengths.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2
    } else {
        sorted[mid]
    };
    median.max(1)
}

/// Linear interpolation of `values` onto `target` evenly spaced points over
/// the same span.
pub fn resample(values: &[f64], target: usize) -> Vec<f64> {
    match (values.len(), target) {
        (_, 0) => Vec::new(),
        (0, n) => vec![f64::NAN; n],
        (1, n) => vec![values[0]; n],
        (_, 1) => vec![values[0]],
        (len, n) => {
            let scale = (len - 1) as f64 / (n - 1) as f64;
            (0..n)
                .map(|i| {
                    let pos = i as f64 * scale;
                    let left = (pos.floor() as usize).min(len - 2);
                    let frac = pos - left as f64;
                    values[left] + (values[left + 1] - values[left]) * frac
                })
                .collect()
        }
    }
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { end } else { start + i as f64 * step })
                .collect()
        }
    }
}

fn distinct_sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let unique: BTreeMap<u64, f64> = values.map(|v| (v.to_bits(), v)).collect();
    let mut out: Vec<f64> = unique.into_values().collect();
    out.sort_by(f64::total_cmp);
    out
}
