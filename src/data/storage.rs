//! Sample Record store.
//!
//! A record is one CSV file: the header row holds the absolute bin index of
//! each column, every following row is one capture. Records are written once
//! and never touched again.

use crate::error::{AppResult, ScanError};
use ndarray::Array2;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Appended to every record path.
pub const RECORD_EXTENSION: &str = "csv";

/// Captures × bins, plus the bin index of the first column.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub sample_start: usize,
    pub data: Array2<f64>,
}

impl SampleRecord {
    pub fn captures(&self) -> usize {
        self.data.nrows()
    }

    pub fn bins(&self) -> usize {
        self.data.ncols()
    }
}

/// `path` with `.csv` appended. Record names contain dots (`0.5_1_0`), so the
/// extension is appended rather than substituted.
pub fn record_path(path: &Path) -> PathBuf {
    if path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION) {
        return path.to_path_buf();
    }
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(RECORD_EXTENSION);
    PathBuf::from(name)
}

/// Write `record` next to `path` and return the file actually written.
pub fn write_record(path: &Path, record: &SampleRecord) -> AppResult<PathBuf> {
    let path = record_path(path);
    let mut writer = csv::Writer::from_path(&path)?;

    let header: Vec<String> = (0..record.bins())
        .map(|i| (record.sample_start + i).to_string())
        .collect();
    writer.write_record(&header)?;

    for row in record.data.rows() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;

    debug!(
        path = %path.display(),
        captures = record.captures(),
        bins = record.bins(),
        "Sample record written"
    );
    Ok(path)
}

pub fn read_record(path: &Path) -> AppResult<SampleRecord> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let bins = headers.len();
    let sample_start = match headers.get(0) {
        Some(first) if !first.is_empty() => first.trim().parse::<usize>().map_err(|_| {
            ScanError::CorruptSample(format!("{}: bad header '{first}'", path.display()))
        })?,
        _ => 0,
    };

    let mut flat = Vec::new();
    let mut rows = 0usize;
    for result in reader.records() {
        let row = result?;
        for field in row.iter() {
            let value = field.trim().parse::<f64>().map_err(|_| {
                ScanError::CorruptSample(format!("{}: bad value '{field}'", path.display()))
            })?;
            flat.push(value);
        }
        rows += 1;
    }

    let data = Array2::from_shape_vec((rows, bins), flat).map_err(|e| {
        ScanError::CorruptSample(format!("{}: ragged record ({e})", path.display()))
    })?;
    Ok(SampleRecord { sample_start, data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn extension_is_appended_not_substituted() {
        assert_eq!(
            record_path(Path::new("/tmp/s/0.5_1_0")),
            PathBuf::from("/tmp/s/0.5_1_0.csv")
        );
        assert_eq!(
            record_path(Path::new("/tmp/s/continuous_0_10_2.5.csv")),
            PathBuf::from("/tmp/s/continuous_0_10_2.5.csv")
        );
    }

    #[test]
    fn record_keeps_bin_offset_and_shape() {
        let dir = tempfile::tempdir().unwrap();
        let record = SampleRecord {
            sample_start: 100,
            data: array![[1.0, 2.5, -1.0], [0.0, 3.0, 4.0]],
        };
        let written = write_record(&dir.path().join("1_2_0"), &record).unwrap();
        assert_eq!(written.file_name().unwrap(), "1_2_0.csv");

        let text = std::fs::read_to_string(&written).unwrap();
        assert!(text.starts_with("100,101,102\n"));

        let back = read_record(&written).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn non_numeric_cell_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "0,1\n1.0,abc\n").unwrap();
        assert!(matches!(read_record(&path), Err(ScanError::CorruptSample(_))));
    }
}
