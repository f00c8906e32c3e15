//! Safety evaluation for the electrical and water profiles.
//!
//! The pure functions [`electrical_flags`] and [`water_alerts`] turn one
//! measurement into a bitmask. The [`SafetySupervisor`] keeps the latched
//! mask across cycles, logs each bit once on set and once on clear, and
//! decides when the emergency path fires.
//!
//! ## Alert lifecycle
//!
//! 1. A measurement raises one or more bits.
//! 2. Any bit not present in the previous mask fires an emergency at once.
//! 3. While bits stay raised, the emergency repeats every
//!    [`ALERT_REPEAT_MS`] so a lost frame is eventually recovered.
//! 4. When the mask returns to zero the supervisor is re-armed.

use log::{error, info};

use crate::config::{ElectricalThresholds, WaterThresholds};
use crate::dsp::electrical::ElectricalMeasurement;
use crate::dsp::water::{NO_FLOW_LPM, WaterMeasurement};

/// Mains is considered present above this voltage.
const MAINS_PRESENT_V: f32 = 10.0;
/// Pressure below this is low (bar).
const LOW_PRESSURE_BAR: f32 = 1.0;
/// No-flow only counts while the line is pressurised (bar).
const NO_FLOW_MIN_PRESSURE_BAR: f32 = 2.0;

/// Re-send interval for a persisting alert.
pub const ALERT_REPEAT_MS: u64 = 60_000;

/// Electrical safety bits.
pub mod flags {
    pub const OVER_VOLTAGE: u8 = 1 << 0;
    pub const UNDER_VOLTAGE: u8 = 1 << 1;
    pub const OVER_CURRENT: u8 = 1 << 2;
    pub const OVER_POWER: u8 = 1 << 3;
    pub const LOW_PF: u8 = 1 << 4;
    pub const HIGH_THD: u8 = 1 << 5;
    pub const FREQUENCY: u8 = 1 << 6;
    /// Reserved for three-phase nodes.
    pub const PHASE_IMBALANCE: u8 = 1 << 7;
}

/// Water alert bits.
pub mod water {
    pub const LOW_PRESSURE: u8 = 1 << 0;
    pub const HIGH_PRESSURE: u8 = 1 << 1;
    pub const NO_FLOW: u8 = 1 << 2;
    pub const HIGH_FLOW: u8 = 1 << 3;
    pub const LOW_PH: u8 = 1 << 4;
    pub const HIGH_PH: u8 = 1 << 5;
    pub const LEAK: u8 = 1 << 6;
    pub const SENSOR_FAULT: u8 = 1 << 7;
}

pub fn electrical_flags(m: &ElectricalMeasurement, t: &ElectricalThresholds) -> u8 {
    let mut bits = 0;
    let mut raise = |bit: u8, cond: bool| {
        if cond {
            bits |= bit;
        }
    };
    raise(flags::OVER_VOLTAGE, m.voltage_rms > t.over_voltage_v);
    raise(
        flags::UNDER_VOLTAGE,
        m.voltage_rms > MAINS_PRESENT_V && m.voltage_rms < t.under_voltage_v,
    );
    raise(flags::OVER_CURRENT, m.current_rms > t.over_current_a);
    raise(flags::OVER_POWER, m.active_power.abs() > t.over_power_w);
    raise(flags::LOW_PF, m.power_factor < t.pf_limit);
    raise(
        flags::HIGH_THD,
        m.thd_voltage_pct > t.thd_limit_pct || m.thd_current_pct > t.thd_limit_pct,
    );
    raise(
        flags::FREQUENCY,
        (m.frequency_hz - t.nominal_frequency_hz).abs() > t.frequency_tolerance_hz,
    );
    bits
}

pub fn water_alerts(m: &WaterMeasurement, t: &WaterThresholds) -> u8 {
    let mut bits = 0;
    let mut raise = |bit: u8, cond: bool| {
        if cond {
            bits |= bit;
        }
    };
    raise(water::LOW_PRESSURE, m.pressure_bar < LOW_PRESSURE_BAR);
    raise(water::HIGH_PRESSURE, m.pressure_bar > 0.9 * t.pressure_range_bar);
    raise(
        water::NO_FLOW,
        m.flow_lpm < NO_FLOW_LPM && m.pressure_bar > NO_FLOW_MIN_PRESSURE_BAR,
    );
    raise(water::HIGH_FLOW, m.flow_lpm > 0.8 * t.flow_range_lpm);
    raise(water::LOW_PH, m.ph < t.ph_min);
    raise(water::HIGH_PH, m.ph > t.ph_max);
    raise(water::LEAK, m.leak);
    raise(water::SENSOR_FAULT, m.sensor_status != 0);
    bits
}

fn electrical_name(bit: u8) -> &'static str {
    match bit {
        flags::OVER_VOLTAGE => "over-voltage",
        flags::UNDER_VOLTAGE => "under-voltage",
        flags::OVER_CURRENT => "over-current",
        flags::OVER_POWER => "over-power",
        flags::LOW_PF => "low power factor",
        flags::HIGH_THD => "high THD",
        flags::FREQUENCY => "frequency deviation",
        _ => "phase imbalance",
    }
}

fn water_name(bit: u8) -> &'static str {
    match bit {
        water::LOW_PRESSURE => "low pressure",
        water::HIGH_PRESSURE => "high pressure",
        water::NO_FLOW => "no flow",
        water::HIGH_FLOW => "high flow",
        water::LOW_PH => "low pH",
        water::HIGH_PH => "high pH",
        water::LEAK => "leak",
        _ => "sensor fault",
    }
}

/// Which bit names to use in edge logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Electrical,
    Water,
}

/// Latches the alert mask of one profile and rate-limits emergencies.
pub struct SafetySupervisor {
    profile: Profile,
    /// Latched bitmask from the last evaluation.
    active: u8,
    /// Mask carried by the last emergency.
    alerted: u8,
    last_alert_ms: Option<u64>,
}

impl SafetySupervisor {
    pub const fn new(profile: Profile) -> Self {
        Self {
            profile,
            active: 0,
            alerted: 0,
            last_alert_ms: None,
        }
    }

    /// Record a fresh mask. Returns `true` when an emergency should be sent.
    pub fn evaluate(&mut self, mask: u8, now_ms: u64) -> bool {
        for bit in (0..8).map(|i| 1u8 << i) {
            self.eval_fault(bit, mask & bit != 0);
        }

        if mask == 0 {
            self.last_alert_ms = None;
            return false;
        }
        let fresh = mask & !self.previous_alerted() != 0;
        let due = self
            .last_alert_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= ALERT_REPEAT_MS);
        if fresh || due {
            self.last_alert_ms = Some(now_ms);
            self.alerted = mask;
            true
        } else {
            false
        }
    }

    /// Current latched mask.
    pub fn active(&self) -> u8 {
        self.active
    }

    pub fn has_alerts(&self) -> bool {
        self.active != 0
    }

    fn previous_alerted(&self) -> u8 {
        if self.last_alert_ms.is_some() {
            self.alerted
        } else {
            0
        }
    }

    fn name(&self, bit: u8) -> &'static str {
        match self.profile {
            Profile::Electrical => electrical_name(bit),
            Profile::Water => water_name(bit),
        }
    }

    /// Set or clear one bit, logging only on edges.
    fn eval_fault(&mut self, bit: u8, condition: bool) {
        if condition {
            if self.active & bit == 0 {
                error!("SAFETY ALERT SET: {}", self.name(bit));
            }
            self.active |= bit;
        } else {
            if self.active & bit != 0 {
                info!("SAFETY ALERT CLEARED: {}", self.name(bit));
            }
            self.active &= !bit;
        }
    }
}
