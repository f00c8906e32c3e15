//! Signal processing: electrical block analysis and water metrics.

pub mod electrical;
pub mod fft;
pub mod grade;
pub mod water;

pub use electrical::{AnalysisParams, ElectricalMeasurement, analyze};
pub use water::{FlowTotalizer, WaterMeasurement, WaterReadings};
