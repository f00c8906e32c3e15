//! Sensor acquisition: the shared bus, the electrical ADC double buffer,
//! per-sector readers and the composite water probe.

pub mod adc_buffer;
pub mod bus;
pub mod flow;
pub mod readers;
pub mod water_probe;

pub use adc_buffer::{AdcDoubleBuffer, BlockGuard};
pub use bus::SharedBus;
pub use readers::{GenericReader, PressureReader, TemperatureReader, VoltageReader, reader_for};
pub use water_probe::WaterProbe;
