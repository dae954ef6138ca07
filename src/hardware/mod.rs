//! Simulated hardware for running scans without a rig.

pub mod mock;

pub use mock::{MockAcquisition, MockStage, MoveKind, RecordedMove};
