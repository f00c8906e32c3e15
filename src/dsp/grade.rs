//! Additive quality grades, 0 (A) to 5 (F).
//!
//! Every band crossed adds one penalty point; the sum is capped at
//! [`WORST`].

use super::electrical::ElectricalMeasurement;

pub const BEST: u8 = 0;
pub const WORST: u8 = 5;

fn penalty(crossed: bool) -> u8 {
    u8::from(crossed)
}

/// Electrical grade from THD (worse of V/I), power factor and frequency
/// deviation from `nominal_hz`.
pub fn electrical(m: &ElectricalMeasurement, nominal_hz: f32) -> u8 {
    let thd = m.thd_voltage_pct.max(m.thd_current_pct);
    let df = (m.frequency_hz - nominal_hz).abs();
    let points = penalty(thd > 3.0)
        + penalty(thd > 5.0)
        + penalty(m.power_factor < 0.95)
        + penalty(m.power_factor < 0.85)
        + penalty(df > 0.5)
        + penalty(df > 1.0);
    points.min(WORST)
}

/// Water grade from pH, turbidity (NTU) and temperature (°C).
pub fn water(ph: f32, turbidity_ntu: f32, temperature_c: f32) -> u8 {
    let points = penalty(!(6.8..=8.2).contains(&ph))
        + penalty(!(6.5..=8.5).contains(&ph))
        + penalty(turbidity_ntu > 1.0)
        + penalty(turbidity_ntu > 4.0)
        + penalty(turbidity_ntu > 10.0)
        + penalty(!(5.0..=30.0).contains(&temperature_c));
    points.min(WORST)
}

/// Letter for logs and the maintenance interface.
pub fn letter(grade: u8) -> char {
    match grade {
        0 => 'A',
        1 => 'B',
        2 => 'C',
        3 => 'D',
        4 => 'E',
        _ => 'F',
    }
}
