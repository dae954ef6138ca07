//! The scan core: pattern generation, session storage and the sequencer
//! that drives the motion stage and acquisition backend.

pub mod pattern;
pub mod sequencer;
pub mod session;

pub use pattern::{Coordinate, Segment, SegmentKind};
pub use sequencer::{MotionTiming, ScanRequest, ScanState, ScanSummary, Scanner};
pub use session::ScanSession;
