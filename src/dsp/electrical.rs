//! Electrical block analysis: RMS, power, frequency, THD.
//!
//! Input is one block of interleaved raw ADC counts `[v0, i0, v1, i1, ...]`
//! from the timer-driven acquisition. The ADC front end is biased at mid
//! rail, so each channel's block mean is removed before anything else.

use log::warn;

use super::fft;
use super::grade;
use crate::config::{Calibration, ElectricalThresholds};
use crate::safety;

/// Full-scale mapping of the voltage channel (V per ADC count, before gain).
pub const VOLTS_PER_COUNT: f32 = 400.0 / 2048.0;
/// Full-scale mapping of the current channel (A per ADC count, before gain).
pub const AMPS_PER_COUNT: f32 = 150.0 / 2048.0;

/// Apparent power below which PF is reported as 1.0.
const MIN_APPARENT_VA: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ElectricalMeasurement {
    pub voltage_rms: f32,
    pub current_rms: f32,
    /// W
    pub active_power: f32,
    /// var, positive when current lags
    pub reactive_power: f32,
    /// VA
    pub apparent_power: f32,
    pub power_factor: f32,
    pub frequency_hz: f32,
    pub thd_voltage_pct: f32,
    pub thd_current_pct: f32,
    pub safety_flags: u8,
    /// 0 = A (best) .. 5 = F
    pub grade: u8,
}

/// Sampling and scaling parameters for [`analyze`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisParams {
    pub sample_rate_hz: f32,
    pub nominal_frequency_hz: f32,
    pub volts_per_count: f32,
    pub amps_per_count: f32,
}

impl AnalysisParams {
    pub fn from_thresholds(t: &ElectricalThresholds) -> Self {
        Self {
            sample_rate_hz: t.sample_rate_hz as f32,
            nominal_frequency_hz: t.nominal_frequency_hz,
            volts_per_count: VOLTS_PER_COUNT,
            amps_per_count: AMPS_PER_COUNT,
        }
    }
}

/// DC-free, scaled view over an interleaved block.
struct Channels<'a> {
    block: &'a [u16],
    v_mean: f32,
    i_mean: f32,
    v_scale: f32,
    i_scale: f32,
}

impl Channels<'_> {
    fn len(&self) -> usize {
        self.block.len() / 2
    }

    fn v(&self, k: usize) -> f32 {
        (f32::from(self.block[2 * k]) - self.v_mean) * self.v_scale
    }

    fn i(&self, k: usize) -> f32 {
        (f32::from(self.block[2 * k + 1]) - self.i_mean) * self.i_scale
    }
}

/// Analyse one interleaved block. Blocks with fewer than two sample pairs
/// yield an all-zero measurement at nominal frequency.
pub fn analyze(
    block: &[u16],
    params: &AnalysisParams,
    cal: &Calibration,
    thresholds: &ElectricalThresholds,
) -> ElectricalMeasurement {
    let pairs = block.len() / 2;
    if pairs < 2 {
        return ElectricalMeasurement {
            power_factor: 1.0,
            frequency_hz: params.nominal_frequency_hz,
            ..Default::default()
        };
    }

    let (mut v_sum, mut i_sum) = (0.0f32, 0.0f32);
    for pair in block.chunks_exact(2) {
        v_sum += f32::from(pair[0]);
        i_sum += f32::from(pair[1]);
    }
    let ch = Channels {
        block,
        v_mean: v_sum / pairs as f32,
        i_mean: i_sum / pairs as f32,
        v_scale: params.volts_per_count * cal.voltage_gain,
        i_scale: params.amps_per_count * cal.current_gain,
    };

    let (mut v_sq, mut i_sq, mut p_sum) = (0.0f32, 0.0f32, 0.0f32);
    for k in 0..ch.len() {
        let (v, i) = (ch.v(k), ch.i(k));
        v_sq += v * v;
        i_sq += i * i;
        p_sum += v * i;
    }
    let n = ch.len() as f32;
    let voltage_rms = ((v_sq / n).sqrt() + cal.voltage_offset).max(0.0);
    let current_rms = ((i_sq / n).sqrt() + cal.current_offset).max(0.0);
    let active_power = p_sum / n;

    let reactive_power = reactive_power(&ch, params, cal);
    let apparent_power = active_power.hypot(reactive_power);
    let power_factor = if apparent_power > MIN_APPARENT_VA {
        (active_power / apparent_power).abs().min(1.0)
    } else {
        1.0
    };

    let frequency_hz = frequency(&ch, params);
    let thd_voltage_pct = fft::thd_percent(
        ch.len(),
        |k| ch.v(k),
        params.sample_rate_hz,
        params.nominal_frequency_hz,
    );
    let thd_current_pct = fft::thd_percent(
        ch.len(),
        |k| ch.i(k),
        params.sample_rate_hz,
        params.nominal_frequency_hz,
    );

    let mut m = ElectricalMeasurement {
        voltage_rms,
        current_rms,
        active_power,
        reactive_power,
        apparent_power,
        power_factor,
        frequency_hz,
        thd_voltage_pct,
        thd_current_pct,
        safety_flags: 0,
        grade: 0,
    };
    m.grade = grade::electrical(&m, params.nominal_frequency_hz);
    m.safety_flags = safety::electrical_flags(&m, thresholds);
    m
}

/// Mean of current times voltage delayed by a quarter of the nominal
/// period (plus the calibrated CT phase correction).
fn reactive_power(ch: &Channels<'_>, params: &AnalysisParams, cal: &Calibration) -> f32 {
    let quarter = params.sample_rate_hz / (4.0 * params.nominal_frequency_hz) + cal.phase_correction;
    let delay = quarter.round().max(0.0) as usize;
    if delay == 0 || delay >= ch.len() {
        return 0.0;
    }
    let mut sum = 0.0f32;
    for k in delay..ch.len() {
        sum += ch.v(k - delay) * ch.i(k);
    }
    sum / (ch.len() - delay) as f32
}

/// Line frequency from rising zero crossings of the voltage channel, with
/// linear interpolation between the samples around each crossing.
fn frequency(ch: &Channels<'_>, params: &AnalysisParams) -> f32 {
    let mut first: Option<f32> = None;
    let mut last = 0.0f32;
    let mut crossings = 0u32;
    let mut prev = ch.v(0);
    for k in 1..ch.len() {
        let cur = ch.v(k);
        if prev < 0.0 && cur >= 0.0 {
            let at = (k - 1) as f32 + (-prev) / (cur - prev);
            first.get_or_insert(at);
            last = at;
            crossings += 1;
        }
        prev = cur;
    }

    match first {
        Some(first) if crossings >= 2 && last > first => {
            (crossings - 1) as f32 * params.sample_rate_hz / (last - first)
        }
        _ => {
            warn!("DSP: fewer than two zero crossings, reporting nominal frequency");
            params.nominal_frequency_hz
        }
    }
}

#[cfg(test)]
mod tests {
    use core::f32::consts::{PI, SQRT_2};

    use super::*;

    const FS: f32 = 2560.0;
    const PAIRS: usize = 2048;

    fn params() -> AnalysisParams {
        AnalysisParams {
            sample_rate_hz: FS,
            nominal_frequency_hz: 50.0,
            volts_per_count: VOLTS_PER_COUNT,
            amps_per_count: AMPS_PER_COUNT,
        }
    }

    fn count(value: f32, per_count: f32) -> u16 {
        (2048.0 + value / per_count).round().clamp(0.0, 4095.0) as u16
    }

    /// Interleaved block: v = Vrms·√2·sin(ωt) (+ 3rd harmonic), i lags by `phase`.
    fn block(v_rms: f32, i_rms: f32, hz: f32, phase: f32, third_pct: f32) -> Vec<u16> {
        let mut out = Vec::with_capacity(PAIRS * 2);
        for k in 0..PAIRS {
            let w = 2.0 * PI * hz * k as f32 / FS;
            let v = v_rms * SQRT_2 * (w.sin() + third_pct / 100.0 * (3.0 * w).sin());
            let i = i_rms * SQRT_2 * (w - phase).sin();
            out.push(count(v, VOLTS_PER_COUNT));
            out.push(count(i, AMPS_PER_COUNT));
        }
        out
    }

    fn run(b: &[u16]) -> ElectricalMeasurement {
        analyze(b, &params(), &Calibration::uncalibrated(), &ElectricalThresholds::factory())
    }

    #[test]
    fn resistive_load() {
        let m = run(&block(230.0, 10.0, 50.0, 0.0, 0.0));
        assert!((m.voltage_rms - 230.0).abs() < 1.0, "V = {}", m.voltage_rms);
        assert!((m.current_rms - 10.0).abs() < 0.1, "I = {}", m.current_rms);
        assert!((m.active_power - 2300.0).abs() < 30.0, "P = {}", m.active_power);
        assert!(m.power_factor > 0.99);
        assert!((m.frequency_hz - 50.0).abs() < 0.05, "f = {}", m.frequency_hz);
        assert!(m.thd_voltage_pct < 0.5);
        assert_eq!(m.safety_flags, 0);
        assert_eq!(m.grade, 0);
    }

    #[test]
    fn lagging_load_reactive_power() {
        let m = run(&block(230.0, 10.0, 50.0, PI / 3.0, 0.0));
        assert!((m.power_factor - 0.5).abs() < 0.02, "PF = {}", m.power_factor);
        assert!((m.reactive_power - 1992.0).abs() < 60.0, "Q = {}", m.reactive_power);
        assert!((m.apparent_power - 2300.0).abs() < 40.0);
        assert_ne!(m.safety_flags & safety::flags::LOW_PF, 0);
    }

    #[test]
    fn off_nominal_frequency() {
        let m = run(&block(230.0, 5.0, 51.5, 0.0, 0.0));
        assert!((m.frequency_hz - 51.5).abs() < 0.05, "f = {}", m.frequency_hz);
        assert_eq!(m.safety_flags & safety::flags::FREQUENCY, 0);
        assert_eq!(m.grade, 2);
    }

    #[test]
    fn distorted_voltage() {
        let m = run(&block(230.0, 5.0, 50.0, 0.0, 6.0));
        assert!((m.thd_voltage_pct - 6.0).abs() < 0.4, "THD = {}", m.thd_voltage_pct);
        assert_ne!(m.safety_flags & safety::flags::HIGH_THD, 0);
        assert_eq!(m.grade, 2);
    }

    #[test]
    fn flat_block_is_quiet() {
        let m = run(&[2048u16; PAIRS * 2]);
        assert_eq!(m.voltage_rms, 0.0);
        assert_eq!(m.power_factor, 1.0);
        assert_eq!(m.frequency_hz, 50.0);
        assert_eq!(m.thd_voltage_pct, 0.0);
        // No mains: under-voltage is not evaluated.
        assert_eq!(m.safety_flags, 0);
    }

    #[test]
    fn calibration_gain_and_offset_apply() {
        let cal = Calibration {
            voltage_gain: 1.1,
            voltage_offset: -3.0,
            ..Calibration::uncalibrated()
        };
        let m = analyze(&block(200.0, 1.0, 50.0, 0.0, 0.0), &params(), &cal, &ElectricalThresholds::factory());
        assert!((m.voltage_rms - 217.0).abs() < 1.5, "V = {}", m.voltage_rms);
    }

    #[test]
    fn tiny_block_falls_back() {
        let m = run(&[2048, 2048]);
        assert_eq!(m.frequency_hz, 50.0);
        assert_eq!(m.power_factor, 1.0);
    }
}
