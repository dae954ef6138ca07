//! End-to-end scan patterns against the simulated stage and acquisition device.
//!
//! All tests run on a paused clock, so the movement and settling waits cost
//! nothing.

use scan_daq::config::{AxisOrder, Settings};
use scan_daq::error::ScanError;
use scan_daq::hardware::{MockAcquisition, MockStage, MoveKind};
use scan_daq::instrument::{Axis, Displacement};
use scan_daq::scanner::{Coordinate, ScanRequest, ScanState, Scanner};
use std::path::Path;
use std::time::Duration;

fn settings(savepath: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.scan.savepath = savepath.to_path_buf();
    settings.scan.record_time = Duration::from_millis(100);
    settings.acquisition.sample_delay = Duration::from_millis(50);
    settings.acquisition.sample_start = 180;
    settings.acquisition.sample_end = 220;
    settings
}

fn scanner(stage: &MockStage, settings: &Settings) -> Scanner {
    Scanner::new(
        Box::new(stage.clone()),
        Box::new(MockAcquisition::new()),
        settings,
    )
}

fn sum(moves: &[Displacement]) -> (f64, f64, f64) {
    moves.iter().fold((0.0, 0.0, 0.0), |acc, d| {
        (
            acc.0 + d.get(Axis::X).unwrap_or(0.0),
            acc.1 + d.get(Axis::Y).unwrap_or(0.0),
            acc.2 + d.get(Axis::Z).unwrap_or(0.0),
        )
    })
}

fn record_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".csv"))
        .collect();
    names.sort();
    names
}

#[tokio::test(start_paused = true)]
async fn grid_scan_visits_121_points_and_returns() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path());
    let stage = MockStage::new();
    let mut scanner = scanner(&stage, &settings);

    let request = ScanRequest::new(Coordinate::ORIGIN, Coordinate::xy(10.0, 10.0), 11, &settings)
        .unwrap()
        .with_note("speaker at 2 kHz");
    let summary = scanner.scan_lattice(&request).await.unwrap();

    assert_eq!(summary.records, 121);
    assert_eq!(summary.net_displacement, Coordinate::xy(10.0, 10.0));
    assert_eq!(summary.return_move, Coordinate::xy(-10.0, -10.0));
    assert_eq!(scanner.state(), ScanState::Idle);

    let moves = stage.relative_moves().await;
    assert_eq!(moves.len(), 122);
    // Y is the inner axis: (0,0), (0,1), ... (0,10), (1,0)
    assert_eq!(moves[1], Displacement::xy(0.0, 1.0));
    assert_eq!(moves[11], Displacement::xy(1.0, -10.0));
    assert_eq!(*moves.last().unwrap(), Displacement::xy(-10.0, -10.0));

    // telescoping sum before the return move
    assert_eq!(sum(&moves[..121]), (10.0, 10.0, 0.0));
    assert_eq!(stage.position().await, (0.0, 0.0, 0.0));

    let files = record_files(&summary.session_dir);
    assert_eq!(files.len(), 121);
    assert!(files.contains(&"3_7_0.csv".to_string()));

    let info = std::fs::read_to_string(summary.session_dir.join("info")).unwrap();
    assert!(info.contains("pattern: rectangular_lattice"));
    assert!(info.contains("note: speaker at 2 kHz"));
}

#[tokio::test(start_paused = true)]
async fn fractional_grid_round_trips_to_origin() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path());
    let stage = MockStage::new();
    let mut scanner = scanner(&stage, &settings);

    let request = ScanRequest::new(
        Coordinate::xy(1.0, 2.0),
        Coordinate::xy(1.3, 2.7),
        4,
        &settings,
    )
    .unwrap();
    let summary = scanner.scan_lattice(&request).await.unwrap();
    assert_eq!(summary.records, 16);

    let moves = stage.relative_moves().await;
    let (x, y, z) = sum(&moves);
    assert!(x.abs() < 1e-12 && y.abs() < 1e-12 && z == 0.0);
    assert_eq!(summary.return_move, -summary.net_displacement);
}

#[tokio::test(start_paused = true)]
async fn resolution_one_is_a_single_point() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path());
    let stage = MockStage::new();
    let mut scanner = scanner(&stage, &settings);

    let request = ScanRequest::new(Coordinate::ORIGIN, Coordinate::xy(5.0, 5.0), 1, &settings)
        .unwrap();
    let summary = scanner.scan_lattice(&request).await.unwrap();

    assert_eq!(summary.records, 1);
    assert_eq!(summary.net_displacement, Coordinate::ORIGIN);
    assert_eq!(record_files(&summary.session_dir), vec!["0_0_0.csv"]);
}

#[tokio::test(start_paused = true)]
async fn zero_length_axis_degenerates_to_a_column() {
    let tmp = tempfile::tempdir().unwrap();
    let mut settings = settings(tmp.path());
    settings.scan.axis_order = AxisOrder::YOuter;
    let stage = MockStage::new();
    let mut scanner = scanner(&stage, &settings);

    let request = ScanRequest::new(Coordinate::ORIGIN, Coordinate::xy(0.0, 4.0), 3, &settings)
        .unwrap();
    let summary = scanner.scan_lattice(&request).await.unwrap();

    assert_eq!(summary.records, 3);
    assert_eq!(stage.relative_moves().await.len(), 4);
    let files = record_files(&summary.session_dir);
    assert_eq!(files, vec!["0_0_0.csv", "0_2_0.csv", "0_4_0.csv"]);
}

#[tokio::test(start_paused = true)]
async fn prism_scan_chains_layers_and_returns_all_axes() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path());
    let stage = MockStage::new();
    let mut scanner = scanner(&stage, &settings);

    let request = ScanRequest::new(Coordinate::ORIGIN, Coordinate::new(2.0, 2.0, 1.0), 3, &settings)
        .unwrap()
        .with_resolution_z(2);
    let summary = scanner.scan_prism(&request).await.unwrap();

    assert_eq!(summary.records, 18);
    assert_eq!(summary.net_displacement, Coordinate::new(2.0, 2.0, 1.0));

    let moves = stage.relative_moves().await;
    assert_eq!(moves.len(), 19);
    // first move of the second layer climbs from the last point of the first
    assert_eq!(moves[9], Displacement::xyz(-2.0, -2.0, 1.0));
    assert_eq!(sum(&moves), (0.0, 0.0, 0.0));
    assert!(summary.session_dir.join("2_2_1.csv").exists());
}

#[tokio::test(start_paused = true)]
async fn raster_alternates_sampling_and_repositioning() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path());
    let stage = MockStage::new();
    let mut scanner = scanner(&stage, &settings);

    let request = ScanRequest::new(Coordinate::ORIGIN, Coordinate::xy(6.0, 4.0), 5, &settings)
        .unwrap();
    let summary = scanner.scan_raster(&request).await.unwrap();
    assert_eq!(summary.records, 5);

    let moves = stage.moves().await;
    // 5 sampling + 4 repositioning + return
    assert_eq!(moves.len(), 10);
    for (i, m) in moves[..9].iter().enumerate() {
        let expected = if i % 2 == 0 { MoveKind::Speed } else { MoveKind::Relative };
        assert_eq!(m.kind, expected, "segment {i}");
    }
    assert!(moves
        .iter()
        .filter(|m| m.kind == MoveKind::Speed)
        .all(|m| m.speed == Some(settings.scan.scan_speed)));
    assert_eq!(stage.position().await, (0.0, 0.0, 0.0));

    // every row is swept left to right; repositioning goes back to x = 0
    let relative = stage.relative_moves().await;
    assert_eq!(relative[0], Displacement::xy(6.0, 0.0));
    assert_eq!(relative[1], Displacement::xy(-6.0, 1.0));
    assert_eq!(relative[2], Displacement::xy(6.0, 0.0));

    let files = record_files(&summary.session_dir);
    assert_eq!(
        files,
        vec![
            "continuous_0_6_0.csv",
            "continuous_0_6_1.csv",
            "continuous_0_6_2.csv",
            "continuous_0_6_3.csv",
            "continuous_0_6_4.csv",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn stage_dropping_offline_faults_the_scan() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path());
    let stage = MockStage::new().with_offline_after(5);
    let mut scanner = scanner(&stage, &settings);

    let request = ScanRequest::new(Coordinate::ORIGIN, Coordinate::xy(4.0, 4.0), 3, &settings)
        .unwrap();
    let err = scanner.scan_lattice(&request).await.unwrap_err();

    assert!(matches!(err, ScanError::Faulted(_)));
    assert_eq!(scanner.state(), ScanState::Faulted);
    // no return move is attempted on a dead link
    assert_eq!(stage.moves().await.len(), 5);
    assert_eq!(scanner.position(), Coordinate::xy(2.0, 2.0));

    // faulted scanners refuse new work until reset
    stage.set_online(true);
    assert!(matches!(
        scanner.scan_lattice(&request).await,
        Err(ScanError::Faulted(_))
    ));
    scanner.reset().await.unwrap();
    assert_eq!(scanner.state(), ScanState::Ready);
}

#[tokio::test(start_paused = true)]
async fn acquisition_offline_faults_before_recording() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path());
    let acquisition = MockAcquisition::new();
    let mut scanner = Scanner::new(
        Box::new(MockStage::new()),
        Box::new(acquisition.clone()),
        &settings,
    );
    scanner.connect().await.unwrap();
    acquisition.set_online(false);

    let request = ScanRequest::new(Coordinate::ORIGIN, Coordinate::xy(1.0, 1.0), 2, &settings)
        .unwrap();
    let err = scanner.scan_lattice(&request).await.unwrap_err();
    assert!(err.to_string().contains("mock"));
    assert_eq!(acquisition.fetches(), 0);
}

#[tokio::test(start_paused = true)]
async fn capture_timeout_does_not_abort_the_scan() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path());
    let stage = MockStage::new();
    let acquisition = MockAcquisition::new().time_out_at(8);
    let mut scanner = Scanner::new(
        Box::new(stage.clone()),
        Box::new(acquisition.clone()),
        &settings,
    );

    let request = ScanRequest::new(Coordinate::ORIGIN, Coordinate::xy(10.0, 10.0), 11, &settings)
        .unwrap();
    let summary = scanner.scan_lattice(&request).await.unwrap();

    assert_eq!(summary.records, 121);
    assert_eq!(scanner.state(), ScanState::Idle);
    assert_eq!(stage.position().await, (0.0, 0.0, 0.0));
    // two captures per point at 100 ms / 50 ms
    assert_eq!(acquisition.fetches(), 242);
}
