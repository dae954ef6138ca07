//! Device drivers behind the capability traits.
//!
//! - [`printer`]: the gantry ([`MotionStage`])
//! - [`oscilloscope`], [`microphone`]: acquisition backends ([`Acquisition`])
//! - [`signal_generator`]: excitation source, not part of the scan loop
//! - [`discovery`]: serial and USB instrument lookup
//! - [`benchmark`]: settling-delay search for FFT instruments

pub mod benchmark;
pub mod capabilities;
pub mod discovery;
pub mod microphone;
pub mod oscilloscope;
pub mod printer;
pub mod signal_generator;

pub use capabilities::{Acquisition, Axis, Displacement, MotionStage, SampleRange};
pub use microphone::{AudioInput, Microphone, ToneSource};
pub use oscilloscope::{FrequencyAxis, Oscilloscope};
pub use printer::{Printer, PrinterStatus};
pub use signal_generator::SignalGenerator;
