//! Water quality metrics: grading, totalised flow and adaptive cadence.

use super::grade;
use crate::config::WaterThresholds;
use crate::safety;

/// Sensor-status bits reported alongside water measurements.
pub mod status {
    pub const PRESSURE_FAULT: u8 = 1 << 0;
    pub const FLOW_FAULT: u8 = 1 << 1;
    pub const PH_FAULT: u8 = 1 << 2;
    pub const TEMPERATURE_FAULT: u8 = 1 << 3;
    pub const TURBIDITY_FAULT: u8 = 1 << 4;
}

/// Measurement interval while any alert is active.
pub const ALERT_INTERVAL_MS: u32 = 30_000;
/// Measurement interval while the line is idle.
pub const IDLE_INTERVAL_MS: u32 = 300_000;
pub const NORMAL_INTERVAL_MS: u32 = 60_000;
/// Flow below this is treated as no flow (L/min).
pub const NO_FLOW_LPM: f32 = 0.1;

/// One probe cycle. Faulted channels carry their last good value and set
/// the matching [`status`] bit.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WaterReadings {
    pub pressure_bar: f32,
    pub flow_lpm: f32,
    pub ph: f32,
    pub temperature_c: f32,
    pub turbidity_ntu: f32,
    pub status: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WaterMeasurement {
    pub pressure_bar: f32,
    pub flow_lpm: f32,
    pub ph: f32,
    pub temperature_c: f32,
    pub turbidity_ntu: f32,
    pub leak: bool,
    pub grade: u8,
    /// Liters since the last reset.
    pub cumulative_flow_l: f32,
    pub sensor_status: u8,
    pub alert_bits: u8,
}

/// Integrates flow (L/min) over real elapsed time.
#[derive(Debug, Default)]
pub struct FlowTotalizer {
    total_l: f32,
    last_ms: Option<u64>,
}

impl FlowTotalizer {
    pub const fn new() -> Self {
        Self {
            total_l: 0.0,
            last_ms: None,
        }
    }

    /// Add the volume since the previous call and return the new total.
    /// The first call only sets the time base.
    pub fn accumulate(&mut self, flow_lpm: f32, now_ms: u64) -> f32 {
        if let Some(last) = self.last_ms {
            let dt_s = now_ms.saturating_sub(last) as f32 / 1000.0;
            self.total_l += flow_lpm.max(0.0) * dt_s / 60.0;
        }
        self.last_ms = Some(now_ms);
        self.total_l
    }

    pub fn total_l(&self) -> f32 {
        self.total_l
    }

    /// Weekly reset; keeps the time base.
    pub fn reset(&mut self) {
        self.total_l = 0.0;
    }
}

/// Next measurement interval for the water profile.
pub fn adaptive_interval_ms(alert_bits: u8, flow_lpm: f32) -> u32 {
    if alert_bits != 0 {
        ALERT_INTERVAL_MS
    } else if flow_lpm < NO_FLOW_LPM {
        IDLE_INTERVAL_MS
    } else {
        NORMAL_INTERVAL_MS
    }
}

/// Combine one probe cycle with the leak verdict into a measurement.
pub fn assess(
    readings: &WaterReadings,
    leak: bool,
    totalizer: &mut FlowTotalizer,
    now_ms: u64,
    thresholds: &WaterThresholds,
) -> WaterMeasurement {
    let cumulative_flow_l = totalizer.accumulate(readings.flow_lpm, now_ms);
    let mut m = WaterMeasurement {
        pressure_bar: readings.pressure_bar,
        flow_lpm: readings.flow_lpm,
        ph: readings.ph,
        temperature_c: readings.temperature_c,
        turbidity_ntu: readings.turbidity_ntu,
        leak,
        grade: grade::water(readings.ph, readings.turbidity_ntu, readings.temperature_c),
        cumulative_flow_l,
        sensor_status: readings.status,
        alert_bits: 0,
    };
    m.alert_bits = safety::water_alerts(&m, thresholds);
    m
}
