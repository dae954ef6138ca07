//! `scan_daq` command line.
//!
//! Thin wrapper over the library: loads settings, builds the devices, runs a
//! scan or a compilation, and prints a short summary.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use scan_daq::config::{AcquisitionBackend, Settings};
use scan_daq::data::compile::{compile_grid, compile_session, CompileOptions};
use scan_daq::gcode::{grid_path, WeldMode, WeldProgram, WeldSetup};
use scan_daq::hardware::{MockAcquisition, MockStage};
use scan_daq::instrument::benchmark;
use scan_daq::instrument::discovery;
use scan_daq::instrument::{
    Acquisition, Displacement, Microphone, MotionStage, Oscilloscope, Printer, SampleRange,
    SignalGenerator,
};
use scan_daq::scanner::{Coordinate, ScanRequest, Scanner};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "scan_daq", version, about = "Gantry-driven acoustic/FFT scanner")]
struct Cli {
    /// Configuration file (defaults to scan_daq.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use the simulated stage and acquisition device
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(clap::Args, Debug)]
struct ScanArgs {
    /// Start coordinate, where the probe already is ("x,y" or "x,y,z")
    #[arg(long, value_parser = parse_coordinate, default_value = "0,0")]
    begin: Coordinate,
    /// End coordinate
    #[arg(long, value_parser = parse_coordinate)]
    end: Coordinate,
    /// Samples per axis, endpoints included
    #[arg(short, long)]
    resolution: usize,
    /// Recording time per point
    #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
    record_time: Option<Duration>,
    /// Output folder; a timestamped session folder is created inside
    #[arg(long)]
    savepath: Option<PathBuf>,
    #[arg(long, default_value = "")]
    note: String,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Stop-and-sample over an XY lattice
    Grid(ScanArgs),
    /// Stop-and-sample over stacked XY lattices
    Prism {
        #[command(flatten)]
        scan: ScanArgs,
        #[arg(long)]
        resolution_z: usize,
    },
    /// Continuous raster, sampling while each row is crossed
    Raster {
        #[command(flatten)]
        scan: ScanArgs,
        /// Row feed rate, units per minute
        #[arg(long)]
        speed: Option<f64>,
    },
    /// Compile a continuous session into an image CSV
    Compile {
        session: PathBuf,
        #[arg(long)]
        sample_start: Option<usize>,
        #[arg(long)]
        sample_end: Option<usize>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compile one Z layer of a discrete session into an image CSV
    CompileGrid {
        session: PathBuf,
        #[arg(short, long, default_value_t = 0.0)]
        z: f64,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Relative printer move from axis=distance pairs, e.g. `x=10 y=-2.5`
    Jog {
        pairs: Vec<String>,
        #[arg(long)]
        speed: Option<f64>,
    },
    /// List candidate printer serial ports
    Ports,
    /// Search for the shortest settling delay of the acquisition device
    Benchmark {
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration, default_value = "500ms")]
        delay: Duration,
        #[arg(long, default_value_t = 10)]
        rounds: usize,
    },
    /// Write a GCode program
    Gcode {
        #[arg(value_enum)]
        job: GcodeJob,
        #[arg(short, long)]
        output: PathBuf,
        /// Grid corners for the `grid` job ("x,y")
        #[arg(long, value_parser = parse_coordinate, default_value = "0,0")]
        top_left: Coordinate,
        #[arg(long, value_parser = parse_coordinate, default_value = "10,10")]
        bottom_right: Coordinate,
        #[arg(long, default_value_t = 1.0)]
        step: f64,
        #[arg(long, default_value_t = 1000)]
        dwell_ms: u64,
    },
    /// Set the signal generator to a sine
    Siggen {
        #[arg(long)]
        frequency: f64,
        #[arg(long, default_value_t = 1.0)]
        amplitude: f64,
        #[arg(long, default_value_t = 0.0)]
        offset: f64,
        /// VISA resource; discovered when omitted
        #[arg(long)]
        resource: Option<String>,
    },
    /// Print or write the effective configuration as TOML
    Config {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum GcodeJob {
    Grid,
    Weld,
    ExtrusionTest,
}

fn parse_coordinate(s: &str) -> Result<Coordinate, String> {
    let values: Vec<f64> = s
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|_| format!("'{v}' is not a number")))
        .collect::<Result<_, _>>()?;
    match values.as_slice() {
        [x, y] => Ok(Coordinate::xy(*x, *y)),
        [x, y, z] => Ok(Coordinate::new(*x, *y, *z)),
        _ => Err(format!("expected x,y or x,y,z, got '{s}'")),
    }
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.application.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn open_motion(settings: &Settings, mock: bool) -> Result<Box<dyn MotionStage>> {
    if mock {
        return Ok(Box::new(MockStage::new()));
    }
    let mut printer = Printer::open(&settings.motion)
        .await
        .context("failed to connect to the printer")?;
    printer.start_monitor(settings.motion.status_poll_interval);
    Ok(Box::new(printer))
}

async fn open_acquisition(settings: &Settings, mock: bool) -> Result<Box<dyn Acquisition>> {
    let acq = &settings.acquisition;
    Ok(match (acq.backend, mock) {
        (AcquisitionBackend::Microphone, simulated) => {
            if simulated {
                warn!("Simulated run: microphone records a synthetic 2 kHz tone");
            }
            Box::new(Microphone::open(acq, simulated)?)
        }
        (AcquisitionBackend::Mock, _) | (_, true) => Box::new(MockAcquisition::new()),
        (AcquisitionBackend::Oscilloscope, false) => Box::new(
            Oscilloscope::open(acq)
                .await
                .context("failed to connect to the oscilloscope")?,
        ),
    })
}

fn scan_request(args: &ScanArgs, settings: &Settings) -> Result<ScanRequest> {
    let mut request = ScanRequest::new(args.begin, args.end, args.resolution, settings)?
        .with_note(args.note.clone());
    if let Some(record_time) = args.record_time {
        request.record_time = record_time;
    }
    if let Some(savepath) = &args.savepath {
        request.savepath = savepath.clone();
    }
    Ok(request)
}

async fn build_scanner(settings: &Settings, mock: bool) -> Result<Scanner> {
    let motion = open_motion(settings, mock).await?;
    let acquisition = open_acquisition(settings, mock).await?;
    Ok(Scanner::new(motion, acquisition, settings))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&settings);

    match cli.action {
        Action::Grid(args) => {
            let request = scan_request(&args, &settings)?;
            let mut scanner = build_scanner(&settings, cli.mock).await?;
            let summary = scanner.scan_lattice(&request).await?;
            println!("{} records in {}", summary.records, summary.session_dir.display());
        }
        Action::Prism { scan, resolution_z } => {
            let request = scan_request(&scan, &settings)?.with_resolution_z(resolution_z);
            let mut scanner = build_scanner(&settings, cli.mock).await?;
            let summary = scanner.scan_prism(&request).await?;
            println!("{} records in {}", summary.records, summary.session_dir.display());
        }
        Action::Raster { scan, speed } => {
            let mut request = scan_request(&scan, &settings)?;
            if let Some(speed) = speed {
                request.speed = speed;
            }
            let mut scanner = build_scanner(&settings, cli.mock).await?;
            let summary = scanner.scan_raster(&request).await?;
            println!("{} rows in {}", summary.records, summary.session_dir.display());
        }
        Action::Compile {
            session,
            sample_start,
            sample_end,
            output,
        } => {
            let options = CompileOptions {
                sample_start: sample_start.or(settings.processing.sample_start),
                sample_end: sample_end.or(settings.processing.sample_end),
            };
            let image = compile_session(&session, &options)
                .with_context(|| format!("failed to compile {}", session.display()))?;
            let output = output.unwrap_or_else(|| session.join("image.csv"));
            image.write_csv(&output)?;
            println!("{:?} image written to {}", image.shape(), output.display());
        }
        Action::CompileGrid { session, z, output } => {
            let options = CompileOptions {
                sample_start: settings.processing.sample_start,
                sample_end: settings.processing.sample_end,
            };
            let image = compile_grid(&session, z, &options)
                .with_context(|| format!("failed to compile layer z={z} of {}", session.display()))?;
            let output = output.unwrap_or_else(|| session.join(format!("grid_{z}.csv")));
            image.write_csv(&output)?;
            println!("{:?} image written to {}", image.shape(), output.display());
        }
        Action::Jog { pairs, speed } => {
            let split: Vec<(&str, &str)> = pairs
                .iter()
                .filter_map(|p| {
                    let pair = p.split_once('=');
                    if pair.is_none() {
                        warn!(pair = %p, "Expected axis=distance, skipping");
                    }
                    pair
                })
                .collect();
            let (displacement, rejected) = Displacement::from_labeled_lenient(&split);
            for error in &rejected {
                warn!(%error, "Skipping invalid move component");
            }
            if displacement.is_empty() {
                bail!("nothing to move");
            }
            let motion = open_motion(&settings, cli.mock).await?;
            motion.move_relative(&displacement, speed).await?;
            info!(%displacement, "Jog sent");
        }
        Action::Ports => {
            let ports = discovery::serial_candidates(
                &settings.motion.port_globs,
                &settings.motion.excluded_port_names,
            );
            if ports.is_empty() {
                println!("no candidate serial ports");
            }
            for port in ports {
                println!("{port}");
            }
        }
        Action::Benchmark { delay, rounds } => {
            let acquisition = open_acquisition(&settings, cli.mock).await?;
            let range = SampleRange::new(
                settings.acquisition.sample_start,
                settings.acquisition.sample_end,
            )?;
            for round in benchmark::run(acquisition.as_ref(), &range, delay, rounds).await? {
                println!(
                    "{:>10}  {:>2}/{}  {}",
                    format!("{:?}", round.delay),
                    round.distinct,
                    benchmark::CAPTURES_PER_ROUND,
                    if round.passed { "passed" } else { "bad" }
                );
            }
        }
        Action::Gcode {
            job,
            output,
            top_left,
            bottom_right,
            step,
            dwell_ms,
        } => {
            let program = match job {
                GcodeJob::Grid => grid_path(
                    (top_left.x, top_left.y),
                    (bottom_right.x, bottom_right.y),
                    top_left.z,
                    step,
                    step,
                    dwell_ms,
                    settings.motion.travel_speed,
                ),
                GcodeJob::Weld | GcodeJob::ExtrusionTest => {
                    let setup = WeldSetup {
                        mode: if matches!(job, GcodeJob::Weld) {
                            WeldMode::Weld
                        } else {
                            WeldMode::TestExtrude
                        },
                        ..WeldSetup::default()
                    };
                    WeldProgram::build(&setup)
                }
            };
            program.save(&output)?;
            println!("{} commands written to {}", program.commands().len(), output.display());
        }
        Action::Siggen {
            frequency,
            amplitude,
            offset,
            resource,
        } => {
            let mut generator =
                SignalGenerator::open(resource.as_deref(), settings.acquisition.timeout)
                    .await
                    .context("failed to open the signal generator")?;
            generator.set_frequency(frequency, amplitude, offset).await?;
            generator.disconnect().await?;
        }
        Action::Config { output } => {
            let text = settings.to_toml()?;
            match output {
                Some(path) => std::fs::write(&path, text)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => print!("{text}"),
            }
        }
    }
    Ok(())
}
