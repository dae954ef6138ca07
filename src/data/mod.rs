//! Sample storage, spectral reduction and offline compilation.

pub mod compile;
pub mod fft;
pub mod storage;
