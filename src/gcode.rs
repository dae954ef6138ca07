//! Typed GCode commands and program generators.
//!
//! Commands are built as [`GCommand`] values and only turned into text by
//! their `Display` impl, at the transport or file boundary. The printer driver
//! serializes them onto the serial link; [`GCodeProgram`] collects them into a
//! file for offline jobs (grid sweeps, welding runs, extrusion tests).

use crate::error::AppResult;
use crate::instrument::capabilities::{Axis, Displacement};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub enum GCommand {
    /// `G1` linear move
    Move {
        target: Displacement,
        feed: Option<f64>,
        comment: Option<String>,
    },
    /// `G0` rapid move
    Rapid {
        target: Displacement,
        feed: Option<f64>,
    },
    /// `G4 P<ms>`
    Dwell(Duration),
    /// `G28`, optionally restricted to some axes
    Home(Vec<Axis>),
    /// `G90`
    Absolute,
    /// `G91`
    Relative,
    /// `M3` arc ignition at a point, `D` is the Z margin
    ArcStart {
        x: f64,
        y: f64,
        z: f64,
        margin: Option<f64>,
    },
    /// `; text`
    Comment(String),
}

impl GCommand {
    pub fn linear(target: Displacement, feed: Option<f64>) -> Self {
        GCommand::Move {
            target,
            feed,
            comment: None,
        }
    }

    pub fn rapid(target: Displacement, feed: Option<f64>) -> Self {
        GCommand::Rapid { target, feed }
    }
}

fn write_words(f: &mut fmt::Formatter<'_>, target: &Displacement, feed: Option<f64>) -> fmt::Result {
    for (axis, value) in target.components() {
        write!(f, " {axis}{value}")?;
    }
    if let Some(feed) = feed {
        write!(f, " F{feed}")?;
    }
    Ok(())
}

impl fmt::Display for GCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GCommand::Move {
                target,
                feed,
                comment,
            } => {
                write!(f, "G1")?;
                write_words(f, target, *feed)?;
                if let Some(comment) = comment {
                    write!(f, " ; {comment}")?;
                }
                Ok(())
            }
            GCommand::Rapid { target, feed } => {
                write!(f, "G0")?;
                write_words(f, target, *feed)
            }
            GCommand::Dwell(duration) => write!(f, "G4 P{}", duration.as_millis()),
            GCommand::Home(axes) => {
                write!(f, "G28")?;
                for axis in axes {
                    write!(f, " {axis}0")?;
                }
                Ok(())
            }
            GCommand::Absolute => write!(f, "G90"),
            GCommand::Relative => write!(f, "G91"),
            GCommand::ArcStart { x, y, z, margin } => {
                write!(f, "M3 X{x} Y{y} Z{z}")?;
                if let Some(margin) = margin {
                    write!(f, " D{margin}")?;
                }
                Ok(())
            }
            GCommand::Comment(text) => write!(f, "; {text}"),
        }
    }
}

/// An ordered list of commands with the last commanded point.
#[derive(Debug, Clone, Default)]
pub struct GCodeProgram {
    commands: Vec<GCommand>,
    last_point: Displacement,
}

impl GCodeProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: GCommand) {
        match &command {
            GCommand::Move { target, .. } | GCommand::Rapid { target, .. } => {
                for (axis, value) in target.components().filter(|(a, _)| *a != Axis::E) {
                    self.last_point.set(axis, value);
                }
            }
            GCommand::ArcStart { x, y, z, .. } => {
                self.last_point = Displacement::xyz(*x, *y, *z);
            }
            _ => {}
        }
        self.commands.push(command);
    }

    /// `G1` with optional feed and trailing comment.
    pub fn move_to(&mut self, target: Displacement, feed: Option<f64>, comment: Option<&str>) {
        self.push(GCommand::Move {
            target,
            feed,
            comment: comment.map(str::to_string),
        });
    }

    pub fn pause(&mut self, millis: u64) {
        self.push(GCommand::Dwell(Duration::from_millis(millis)));
    }

    pub fn comment(&mut self, text: impl Into<String>) {
        self.push(GCommand::Comment(text.into()));
    }

    pub fn extend(&mut self, other: GCodeProgram) {
        for command in other.commands {
            self.push(command);
        }
    }

    pub fn commands(&self) -> &[GCommand] {
        &self.commands
    }

    /// Last X/Y/Z reached by a move; axes never commanded are `None`.
    pub fn last_point(&self) -> Displacement {
        self.last_point
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        std::fs::write(path, self.to_string())?;
        info!(path = %path.display(), lines = self.commands.len(), "GCode program saved");
        Ok(())
    }
}

impl fmt::Display for GCodeProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self.commands.iter().map(ToString::to_string).collect();
        write!(f, "{}", lines.join("\n"))
    }
}

/// Stop-and-dwell sweep from `top_left` to `bottom_right` at height `z`.
///
/// Step counts are `floor(|span| / res) + 1` per axis; X is the outer loop.
pub fn grid_path(
    top_left: (f64, f64),
    bottom_right: (f64, f64),
    z: f64,
    hres: f64,
    vres: f64,
    dwell_ms: u64,
    feed: f64,
) -> GCodeProgram {
    let (x1, y1) = top_left;
    let (x2, y2) = bottom_right;
    let h_steps = steps(x2 - x1, hres);
    let v_steps = steps(y2 - y1, vres);
    info!(x1, x2, y1, y2, h_steps, v_steps, "Generating grid path");

    let mut program = GCodeProgram::new();
    for x in spaced(x1, x2, h_steps) {
        for y in spaced(y1, y2, v_steps) {
            program.move_to(Displacement::xyz(x, y, z), Some(feed), None);
            program.pause(dwell_ms);
        }
    }
    program
}

fn steps(span: f64, resolution: f64) -> usize {
    if resolution <= 0.0 {
        return 1;
    }
    (span.abs() / resolution).floor() as usize + 1
}

fn spaced(start: f64, end: f64, n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![start];
    }
    let step = (end - start) / (n - 1) as f64;
    (0..n)
        .map(|i| if i == n - 1 { end } else { start + i as f64 * step })
        .collect()
}

// =============================================================================
// Welding jobs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeldMode {
    /// Full welding job
    Weld,
    /// Extrude/retract cycles only, no arc
    TestExtrude,
}

/// Ignition point and default line length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IgnitionPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub length: f64,
}

/// Machine and process constants for a welding job. Lengths in mm, speeds in
/// mm/min, times in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct WeldSetup {
    pub mode: WeldMode,
    /// Never extrude wire
    pub dry_run: bool,
    pub max_z: f64,
    pub print_radius: f64,
    pub z0: f64,
    /// Tip to part distance while welding
    pub weld_height: f64,
    pub approach_height: f64,
    pub travel_height: f64,
    pub layer_wait: f64,
    pub cold_weld_speed: f64,
    /// Extra speed fraction reached once the part is hot
    pub weld_speed_hot: f64,
    /// Length over which the hot ramp is applied
    pub hot_length: f64,
    pub weld_speed_up: f64,
    pub travel_speed: f64,
    pub extruder_max_speed: f64,
    pub acceleration: f64,
    pub puddle_time: f64,
    pub extrusion_factor: f64,
    /// No retraction when not positive
    pub retraction_length: f64,
    pub retraction_factor: f64,
    pub retraction_play: f64,
    /// Segment length between retractions
    pub retraction_travel: f64,
    pub extrude_cycles: usize,
    pub ignition: IgnitionPoint,
}

impl Default for WeldSetup {
    fn default() -> Self {
        Self {
            mode: WeldMode::TestExtrude,
            dry_run: true,
            max_z: 320.0,
            print_radius: 300.0,
            z0: 0.0,
            weld_height: 2.2,
            approach_height: 10.0,
            travel_height: 5.0,
            layer_wait: 20.0,
            cold_weld_speed: 2000.0,
            weld_speed_hot: 0.4,
            hot_length: 40.0,
            weld_speed_up: 0.3,
            travel_speed: 5000.0,
            extruder_max_speed: 5000.0,
            acceleration: 100.0,
            puddle_time: 0.0,
            extrusion_factor: 1.0,
            retraction_length: -1.0,
            retraction_factor: 1.007,
            retraction_play: 0.6,
            retraction_travel: 5.0,
            extrude_cycles: 100,
            ignition: IgnitionPoint {
                x: -30.0,
                y: 25.0,
                z: 8.0,
                length: 20.0,
            },
        }
    }
}

/// Per-layer overrides for a welding run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeldLayer {
    pub z0: f64,
    pub extrusion_factor: f64,
    /// Y shift of the ignition point before this layer
    pub y_shift: f64,
}

/// The four-layer test line used on the bench.
pub fn default_layers() -> Vec<WeldLayer> {
    [(0.0, 5.0, 0.0), (0.0, 6.0, 10.0), (0.0, 8.0, 10.0), (0.0, 10.0, 10.0)]
        .into_iter()
        .map(|(z0, extrusion_factor, y_shift)| WeldLayer {
            z0,
            extrusion_factor,
            y_shift,
        })
        .collect()
}

/// Generates welding programs from an immutable [`WeldSetup`]. Working state
/// (extruder position, current layer, ignition point) lives here, never in
/// the setup.
pub struct WeldProgram<'a> {
    setup: &'a WeldSetup,
    program: GCodeProgram,
    extrusion: f64,
    z0: f64,
    extrusion_factor: f64,
    ignition: IgnitionPoint,
}

impl<'a> WeldProgram<'a> {
    pub fn new(setup: &'a WeldSetup) -> Self {
        Self {
            setup,
            program: GCodeProgram::new(),
            extrusion: 0.0,
            z0: setup.z0,
            extrusion_factor: setup.extrusion_factor,
            ignition: setup.ignition,
        }
    }

    /// Build the job selected by `setup.mode`.
    pub fn build(setup: &'a WeldSetup) -> GCodeProgram {
        let mut job = Self::new(setup);
        job.start_sequence();
        match setup.mode {
            WeldMode::Weld => {
                job.weld_sequence(&default_layers());
                job.stop_sequence();
            }
            WeldMode::TestExtrude => job.extrusion_test(),
        }
        job.finish()
    }

    pub fn finish(self) -> GCodeProgram {
        self.program
    }

    fn travel(&self) -> Option<f64> {
        Some(self.setup.travel_speed)
    }

    pub fn start_sequence(&mut self) {
        self.program.comment("Initialisation sequence");
        self.program.push(GCommand::Home(Vec::new()));
        self.program.push(GCommand::Absolute);
    }

    /// Ignite the arc at the current ignition point.
    pub fn initiate_arc(&mut self, margin: Option<f64>) {
        self.program.push(GCommand::ArcStart {
            x: self.ignition.x,
            y: self.ignition.y,
            z: self.ignition.z,
            margin,
        });
    }

    /// Weld one straight segment, split at `retraction_travel` intervals
    /// with the hot speed ramp applied along its length.
    pub fn print_segment(&mut self, from: (f64, f64), to: (f64, f64)) {
        self.program.comment("Segment starts");
        let setup = self.setup;
        let dx = to.0 - from.0;
        let dy = to.1 - from.1;
        let length = (dx * dx + dy * dy).sqrt();
        let steps = ((length / setup.retraction_travel).floor() as usize).max(1);
        let dxi = dx / steps as f64;
        let dyi = dy / steps as f64;
        let dl = (dxi * dxi + dyi * dyi).sqrt();

        let (retract, extrude) = if setup.dry_run {
            (0.0, 0.0)
        } else if setup.retraction_length <= 0.0 {
            (0.0, dl * self.extrusion_factor)
        } else {
            let retract = setup.retraction_length + setup.retraction_play;
            (
                retract,
                retract * setup.retraction_factor + 2.0 * dl * self.extrusion_factor,
            )
        };

        let mut travelled = 0.0;
        for _ in 0..steps {
            travelled += dl;
            let weld_speed = setup.cold_weld_speed
                + setup.cold_weld_speed
                    * setup.weld_speed_hot
                    * (travelled / setup.hot_length).min(1.0);
            let last = self.program.last_point();
            let next_x = last.x.unwrap_or(from.0) + dxi;
            let next_y = last.y.unwrap_or(from.1) + dyi;

            self.extrusion += extrude;
            if retract > 0.0 {
                let feed = self.travel();
                self.program
                    .move_to(Displacement::along(Axis::E, self.extrusion), feed, Some("Weld"));
                self.extrusion -= retract;
                self.program
                    .move_to(Displacement::along(Axis::E, self.extrusion), feed, Some("Retract"));
                self.program
                    .move_to(Displacement::xy(next_x, next_y), Some(weld_speed), Some("Move"));
            } else {
                let mut target = Displacement::xy(next_x, next_y);
                target.set(Axis::E, self.extrusion);
                self.program.move_to(target, Some(weld_speed), Some("Move"));
            }
        }
    }

    /// Raise, position, lower, puddle, then weld each consecutive pair.
    pub fn print_segments(&mut self, points: &[(f64, f64)]) {
        let Some(&first) = points.first() else {
            return;
        };
        let travel_z = self.z0 + self.setup.travel_height;
        let weld_z = self.z0 + self.setup.weld_height;
        let feed = self.travel();

        self.program.comment("Segments start");
        self.program
            .move_to(Displacement::along(Axis::Z, travel_z), feed, Some("Raise torch"));
        self.program.move_to(
            Displacement::xy(first.0, first.1),
            feed,
            Some("Position start of weld"),
        );
        self.program
            .move_to(Displacement::along(Axis::Z, weld_z), feed, Some("Lower torch"));
        self.program
            .push(GCommand::Dwell(Duration::from_secs_f64(self.setup.puddle_time.max(0.0))));
        for pair in points.windows(2) {
            self.print_segment(pair[0], pair[1]);
        }
    }

    /// One straight line per layer, re-igniting between layers.
    pub fn weld_sequence(&mut self, layers: &[WeldLayer]) {
        let x = self.ignition.x - 5.0;
        self.extrusion = 0.0;
        let mut margin = 0.0;
        self.program.comment("Welding starts");

        for layer in layers {
            self.z0 = layer.z0;
            self.extrusion_factor = layer.extrusion_factor;
            self.ignition.y += layer.y_shift;
            let y = self.ignition.y;
            let line = [(x, y), (x + 60.0, y)];

            self.initiate_arc(Some(margin));
            self.program.comment(format!(
                "Puddle = {}s Z0 = {} dY = {}",
                self.setup.puddle_time, layer.z0, layer.y_shift
            ));
            self.print_segments(&line);

            let last = self.program.last_point();
            let mut break_arc = Displacement::along(Axis::X, last.x.unwrap_or(x) + 50.0);
            break_arc.set(Axis::Z, last.z.unwrap_or(0.0) + 100.0);
            let feed = self.travel();
            self.program.move_to(break_arc, feed, Some("Break arc"));
            self.program.push(GCommand::Dwell(Duration::from_secs_f64(
                self.setup.layer_wait.max(0.0),
            )));

            self.ignition.z = 1.0;
            margin = 0.5;
        }
    }

    /// Break the arc and return home.
    pub fn stop_sequence(&mut self) {
        self.program.comment("Welding ends");
        let z = self.program.last_point().z.unwrap_or(0.0) + 50.0;
        let feed = self.travel();
        self.program
            .move_to(Displacement::xyz(0.0, 0.0, z), feed, Some("Recenter"));
        self.program.push(GCommand::Home(vec![Axis::X]));
    }

    /// Extrude/retract cycles without moving, to tune wire feed.
    pub fn extrusion_test(&mut self) {
        let setup = self.setup;
        self.extrusion = 0.0;
        let retract = setup.retraction_length + setup.retraction_play;
        let extrude = retract * setup.retraction_factor
            + 2.0 * setup.retraction_travel * self.extrusion_factor;
        let feed = self.travel();

        self.program.comment("Extrusion test starts");
        for _ in 0..setup.extrude_cycles {
            self.extrusion += extrude;
            self.program
                .move_to(Displacement::along(Axis::E, self.extrusion), feed, Some("Weld"));
            self.program.pause(20);
            self.extrusion -= retract;
            self.program
                .move_to(Displacement::along(Axis::E, self.extrusion), feed, Some("Retract"));
            self.program.pause(20);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_serialize_to_firmware_text() {
        let mut target = Displacement::xy(10.0, -2.5);
        target.set(Axis::E, 1.25);
        let cmd = GCommand::Move {
            target,
            feed: Some(5000.0),
            comment: Some("Move".into()),
        };
        assert_eq!(cmd.to_string(), "G1 X10 Y-2.5 E1.25 F5000 ; Move");
        assert_eq!(
            GCommand::rapid(Displacement::along(Axis::Z, 0.5), None).to_string(),
            "G0 Z0.5"
        );
        assert_eq!(GCommand::Dwell(Duration::from_millis(2000)).to_string(), "G4 P2000");
        assert_eq!(GCommand::Home(vec![]).to_string(), "G28");
        assert_eq!(GCommand::Home(vec![Axis::X]).to_string(), "G28 X0");
        assert_eq!(GCommand::Relative.to_string(), "G91");
        assert_eq!(
            GCommand::ArcStart {
                x: -30.0,
                y: 25.0,
                z: 8.0,
                margin: Some(0.5)
            }
            .to_string(),
            "M3 X-30 Y25 Z8 D0.5"
        );
    }

    #[test]
    fn program_tracks_last_point_but_not_extruder() {
        let mut program = GCodeProgram::new();
        program.move_to(Displacement::xy(1.0, 2.0), None, None);
        program.move_to(Displacement::along(Axis::E, 9.0), None, None);
        program.move_to(Displacement::along(Axis::Z, 3.0), None, None);
        assert_eq!(program.last_point(), Displacement::xyz(1.0, 2.0, 3.0));
        assert_eq!(program.to_string().lines().count(), 3);
    }

    #[test]
    fn grid_path_visits_every_point_with_dwell() {
        let program = grid_path((50.0, 50.0), (150.0, 150.0), 150.0, 5.0, 5.0, 2000, 5000.0);
        // 21 x 21 points, each a move plus a dwell
        assert_eq!(program.commands().len(), 21 * 21 * 2);
        assert_eq!(program.commands()[0].to_string(), "G1 X50 Y50 Z150 F5000");
        assert_eq!(program.commands()[1].to_string(), "G4 P2000");
        assert_eq!(program.commands()[2].to_string(), "G1 X50 Y55 Z150 F5000");
        assert_eq!(program.last_point(), Displacement::xyz(150.0, 150.0, 150.0));
    }

    #[test]
    fn extrusion_test_alternates_weld_and_retract() {
        let setup = WeldSetup {
            extrude_cycles: 3,
            ..WeldSetup::default()
        };
        let program = WeldProgram::build(&setup);
        let text = program.to_string();
        assert_eq!(text.matches("; Weld").count(), 3);
        assert_eq!(text.matches("; Retract").count(), 3);
        assert!(text.starts_with("; Initialisation sequence\nG28\nG90"));
    }

    #[test]
    fn weld_job_ramps_speed_and_returns_home() {
        let setup = WeldSetup {
            mode: WeldMode::Weld,
            ..WeldSetup::default()
        };
        let program = WeldProgram::build(&setup);
        let text = program.to_string();

        assert_eq!(text.matches("M3 ").count(), 4);
        assert!(text.ends_with("G28 X0"));

        let feeds: Vec<f64> = program
            .commands()
            .iter()
            .filter_map(|c| match c {
                GCommand::Move {
                    feed: Some(f),
                    comment: Some(label),
                    ..
                } if label == "Move" => Some(*f),
                _ => None,
            })
            .collect();
        // 60 mm line split into 12 steps per layer
        assert_eq!(feeds.len(), 4 * 12);
        assert!(feeds.windows(2).take(11).all(|w| w[1] >= w[0]));
        assert!(feeds.iter().all(|f| *f <= 2000.0 * 1.4 + 1e-9));
    }
}
