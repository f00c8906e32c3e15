//! Composite water probe: pressure (I²C), flow (pulses), pH, temperature
//! and turbidity (ADC).
//!
//! A channel that fails keeps its last good value and sets its bit in
//! [`WaterReadings::status`], so one flaky probe never stalls the cycle.

use embedded_hal::i2c::I2c;
use log::warn;

use super::flow::FlowMeter;
use super::readers::{PressureReader, TemperatureReader};
use crate::app::ports::SensorReader;
use crate::config::WaterThresholds;
use crate::drivers::hw_init::{self, counts_to_volts};
use crate::dsp::water::{WaterReadings, status};
use crate::error::SensorError;

/// pH amplifier: 2.5 V at pH 7, −0.18 V per pH unit.
const PH_NEUTRAL_V: f32 = 2.5;
const PH_SLOPE_V: f32 = 0.18;
/// The 5 V turbidity output reaches the pin through a 2:3 divider.
const TURBIDITY_DIVIDER: f32 = 1.5;
/// Below this pin voltage the turbidity sensor is unplugged.
const TURBIDITY_OPEN_V: f32 = 0.05;

pub fn ph_from_volts(v: f32) -> Result<f32, SensorError> {
    let ph = 7.0 + (PH_NEUTRAL_V - v) / PH_SLOPE_V;
    if (0.0..=14.0).contains(&ph) { Ok(ph) } else { Err(SensorError::OutOfRange) }
}

/// Quadratic turbidity curve over the sensor's output voltage, in NTU.
pub fn turbidity_from_volts(pin_v: f32) -> Result<f32, SensorError> {
    if pin_v < TURBIDITY_OPEN_V {
        return Err(SensorError::NotPresent);
    }
    let v = pin_v * TURBIDITY_DIVIDER;
    Ok((-1120.4 * v * v + 5742.3 * v - 4352.9).max(0.0))
}

pub struct WaterProbe {
    pressure: PressureReader,
    temperature: TemperatureReader,
    flow: FlowMeter,
    max_flow_lpm: f32,
    last: WaterReadings,
}

impl WaterProbe {
    pub fn new(thresholds: &WaterThresholds) -> Self {
        Self {
            pressure: PressureReader::new(thresholds.pressure_range_bar),
            temperature: TemperatureReader::new(),
            flow: FlowMeter::new(),
            // A meter reporting well past its rated range is miscounting.
            max_flow_lpm: thresholds.flow_range_lpm * 1.5,
            last: WaterReadings { ph: 7.0, temperature_c: 20.0, ..WaterReadings::default() },
        }
    }

    /// Read every channel. The caller holds the bus lock.
    pub fn read<B: I2c>(&mut self, bus: &mut B, now_ms: u64) -> WaterReadings {
        let mut r = WaterReadings { status: 0, ..self.last };

        match self.pressure.read(bus) {
            Ok(reading) => r.pressure_bar = reading.value,
            Err(e) => {
                warn!("water: pressure fault ({})", e);
                r.status |= status::PRESSURE_FAULT;
            }
        }

        let flow = self.flow.read(now_ms);
        if flow <= self.max_flow_lpm {
            r.flow_lpm = flow;
        } else {
            warn!("water: implausible flow {:.1} L/min", flow);
            r.status |= status::FLOW_FAULT;
        }

        match ph_from_volts(counts_to_volts(hw_init::adc1_read(hw_init::ADC1_CH_PH))) {
            Ok(ph) => r.ph = ph,
            Err(_) => r.status |= status::PH_FAULT,
        }

        match self.temperature.read_celsius() {
            Ok(t) => r.temperature_c = t,
            Err(_) => r.status |= status::TEMPERATURE_FAULT,
        }

        match turbidity_from_volts(counts_to_volts(hw_init::adc1_read(hw_init::ADC1_CH_TURBIDITY))) {
            Ok(ntu) => r.turbidity_ntu = ntu,
            Err(_) => r.status |= status::TURBIDITY_FAULT,
        }

        self.last = r;
        r
    }

    pub fn last(&self) -> &WaterReadings {
        &self.last
    }
}
