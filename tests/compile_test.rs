//! Result compiler over real session directories.

use ndarray::Array2;
use scan_daq::config::Settings;
use scan_daq::data::compile::{compile_grid, compile_session, CompileOptions};
use scan_daq::data::storage::{write_record, SampleRecord};
use scan_daq::error::ScanError;
use scan_daq::hardware::{MockAcquisition, MockStage};
use scan_daq::scanner::{Coordinate, ScanRequest, Scanner};
use std::path::Path;
use std::time::Duration;

/// `captures` rows of 4 bins starting at bin 10; the peak sits in bin 12 and
/// grows with the capture index.
fn ramp_record(captures: usize) -> SampleRecord {
    let data = Array2::from_shape_fn((captures, 4), |(row, bin)| {
        if bin == 2 {
            row as f64
        } else {
            -5.0
        }
    });
    SampleRecord {
        sample_start: 10,
        data,
    }
}

fn write(dir: &Path, name: &str, record: &SampleRecord) {
    write_record(&dir.join(name), record).unwrap();
}

#[test]
fn rows_of_differing_length_resample_to_the_median() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("info"), "pattern: continuous_raster\n").unwrap();
    write(tmp.path(), "continuous_0_10_2", &ramp_record(6));
    write(tmp.path(), "continuous_0_10_1", &ramp_record(5));
    write(tmp.path(), "continuous_0_10_0", &ramp_record(4));

    let image = compile_session(tmp.path(), &CompileOptions::default()).unwrap();

    assert_eq!(image.shape(), (3, 5));
    assert_eq!(image.rows, vec![0.0, 1.0, 2.0]);
    assert_eq!(image.x_range, (0.0, 10.0));

    // rows are stacked by Y, not by file name order
    let middle: Vec<f64> = image.amplitudes.row(1).to_vec();
    assert_eq!(middle, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    // 4 captures stretched onto 5 columns keep their endpoints
    assert_eq!(image.amplitudes[[0, 0]], 0.0);
    assert_eq!(image.amplitudes[[0, 4]], 3.0);
}

#[test]
fn bin_window_excludes_the_peak() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "continuous_0_1_0", &ramp_record(3));

    let options = CompileOptions {
        sample_start: Some(10),
        sample_end: Some(12),
    };
    let image = compile_session(tmp.path(), &options).unwrap();
    assert!(image.amplitudes.iter().all(|v| *v == -5.0));
}

#[test]
fn empty_session_is_no_data_found() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("info"), "pattern: continuous_raster\n").unwrap();

    let err = compile_session(tmp.path(), &CompileOptions::default()).unwrap_err();
    assert!(matches!(err, ScanError::NoDataFound(_)));
    let err = compile_grid(tmp.path(), 0.0, &CompileOptions::default()).unwrap_err();
    assert!(matches!(err, ScanError::NoDataFound(_)));
}

#[test]
fn image_csv_has_column_header() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "continuous_0_2_0", &ramp_record(3));
    let image = compile_session(tmp.path(), &CompileOptions::default()).unwrap();

    let out = tmp.path().join("image.csv");
    image.write_csv(&out).unwrap();
    let text = std::fs::read_to_string(out).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("y,0,1,2"));
    assert_eq!(lines.next(), Some("0,0,1,2"));
}

#[tokio::test(start_paused = true)]
async fn scanned_sessions_compile() {
    let tmp = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.scan.savepath = tmp.path().to_path_buf();
    settings.scan.record_time = Duration::from_millis(100);
    settings.acquisition.sample_delay = Duration::from_millis(50);
    settings.acquisition.sample_start = 190;
    settings.acquisition.sample_end = 210;

    let mut scanner = Scanner::new(
        Box::new(MockStage::new()),
        Box::new(MockAcquisition::new()),
        &settings,
    );

    let grid = ScanRequest::new(Coordinate::ORIGIN, Coordinate::xy(2.0, 1.0), 3, &settings).unwrap();
    let summary = scanner.scan_lattice(&grid).await.unwrap();
    let image = compile_grid(&summary.session_dir, 0.0, &CompileOptions::default()).unwrap();
    // rows are Y, columns are X
    assert_eq!(image.shape(), (3, 3));
    assert_eq!(image.rows, vec![0.0, 0.5, 1.0]);
    assert!(image.amplitudes.iter().all(|v| *v > 0.9));

    let raster = ScanRequest::new(Coordinate::ORIGIN, Coordinate::xy(3.0, 2.0), 3, &settings).unwrap();
    let summary = scanner.scan_raster(&raster).await.unwrap();
    let image = compile_session(&summary.session_dir, &CompileOptions::default()).unwrap();
    // 3 units at 600/min is 0.3 s plus the 0.5 s pad, about 16 captures at 50 ms
    let (rows, columns) = image.shape();
    assert_eq!(rows, 3);
    assert!((15..=16).contains(&columns), "{columns} columns");
}
