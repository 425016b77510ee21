//! SIR compartmental model: forward simulation and rate calibration.

pub mod calibrate;
pub mod simulate;

pub use calibrate::*;
pub use simulate::*;
