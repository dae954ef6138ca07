//! Core library for the scanning rig.
//!
//! A printer gantry carries an oscilloscope or microphone FFT probe over a
//! spatial grid. The library contains the device adapters, the capability
//! traits they implement, the scan sequencer, and the offline compiler that
//! turns a session directory into an amplitude image. The `scan_daq` binary
//! is a thin CLI over it.

pub mod adapters;
pub mod config;
pub mod data;
pub mod error;
pub mod gcode;
pub mod hardware;
pub mod instrument;
pub mod metadata;
pub mod scanner;
