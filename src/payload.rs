//! Fixed-width uplink payloads.
//!
//! All multi-byte fields are big-endian. Layouts:
//!
//! ```text
//! Universal    (12 B, port 1):  sector | node | type | batt | value f32 | ts u32
//! Compact      (11 B, port 1):  sector | node | type | batt | value×100 i16 | ts u32 | seq
//! Electrical   (24 B, port 10): sector | node | 0x10 | flags | V×10 u16 | I×100 u16 | P u16
//!                               | PF×100 | (f-45)×10 | THDv×10 | THDi×10 | grade | ts u32
//!                               | Q i16 | batt | CRC-8
//! Water        (18 B, port 20): sector | node | 0x20 | leak | p×100 u16 | flow×10 u16
//!                               | (pH-5)×10 | T+20 | turb×2 | grade | cumulative L u32 | batt | status
//! Elec. alert  (8 B, port 99):  0xFF | sector | flags | 0xAA | ts u32
//! Water alert (10 B, port 98):  0xFF | sector | alerts | p×10 | trend×10 i8 | node | ts u32
//! ```
//!
//! Encoders saturate out-of-range values at the field limits.

use crc::{CRC_8_NRSC_5, Crc};

use crate::dsp::electrical::ElectricalMeasurement;
use crate::dsp::water::WaterMeasurement;
use crate::error::CodecError;

pub const UNIVERSAL_LEN: usize = 12;
pub const COMPACT_LEN: usize = 11;
pub const ELECTRICAL_LEN: usize = 24;
pub const WATER_LEN: usize = 18;
pub const ELECTRICAL_ALERT_LEN: usize = 8;
pub const WATER_ALERT_LEN: usize = 10;

pub const TYPE_ELECTRICAL: u8 = 0x10;
pub const TYPE_WATER: u8 = 0x20;
pub const EMERGENCY_MARKER: u8 = 0xFF;
const ELECTRICAL_ALERT_SIGNATURE: u8 = 0xAA;

/// Sensor type codes carried in the universal and compact layouts.
pub mod sensor_type {
    pub const VOLTAGE: u8 = 0x01;
    pub const CURRENT: u8 = 0x02;
    pub const PRESSURE: u8 = 0x03;
    pub const FLOW: u8 = 0x04;
    pub const TEMPERATURE: u8 = 0x05;
    pub const PH: u8 = 0x0A;
    pub const GENERIC: u8 = 0xFF;
}

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_NRSC_5);

/// CRC-8 (poly 0x31, init 0xFF) used by the electrical trailer.
pub fn crc8(bytes: &[u8]) -> u8 {
    CRC8.checksum(bytes)
}

// ── Fixed-point helpers ───────────────────────────────────────

fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, f32::from(u8::MAX)) as u8
}

fn to_u16(value: f32) -> u16 {
    value.round().clamp(0.0, f32::from(u16::MAX)) as u16
}

fn to_i16(value: f32) -> i16 {
    value.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

fn to_i8(value: f32) -> i8 {
    value.round().clamp(f32::from(i8::MIN), f32::from(i8::MAX)) as i8
}

fn be_u16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn check_len(frame: &[u8], expected: usize) -> Result<(), CodecError> {
    if frame.len() == expected {
        Ok(())
    } else {
        Err(CodecError::WrongLength {
            expected,
            got: frame.len(),
        })
    }
}

// ── Universal / compact ───────────────────────────────────────

/// A single scalar reading, as sent by the universal and compact layouts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarFrame {
    pub sector_id: u8,
    pub node_id: u8,
    pub sensor_type: u8,
    pub battery: u8,
    pub value: f32,
    pub timestamp: u32,
    /// Only carried by the compact layout (low 8 bits).
    pub sequence: u8,
}

pub fn encode_universal(f: &ScalarFrame) -> [u8; UNIVERSAL_LEN] {
    let mut out = [0u8; UNIVERSAL_LEN];
    out[0] = f.sector_id;
    out[1] = f.node_id;
    out[2] = f.sensor_type;
    out[3] = f.battery;
    out[4..8].copy_from_slice(&f.value.to_be_bytes());
    out[8..12].copy_from_slice(&f.timestamp.to_be_bytes());
    out
}

pub fn decode_universal(frame: &[u8]) -> Result<ScalarFrame, CodecError> {
    check_len(frame, UNIVERSAL_LEN)?;
    Ok(ScalarFrame {
        sector_id: frame[0],
        node_id: frame[1],
        sensor_type: frame[2],
        battery: frame[3],
        value: f32::from_bits(be_u32(&frame[4..8])),
        timestamp: be_u32(&frame[8..12]),
        sequence: 0,
    })
}

/// Compact layout: the value is fixed-point ×100 in an `i16`, so it covers
/// ±327.67 with 0.01 resolution.
pub fn encode_compact(f: &ScalarFrame) -> [u8; COMPACT_LEN] {
    let mut out = [0u8; COMPACT_LEN];
    out[0] = f.sector_id;
    out[1] = f.node_id;
    out[2] = f.sensor_type;
    out[3] = f.battery;
    out[4..6].copy_from_slice(&to_i16(f.value * 100.0).to_be_bytes());
    out[6..10].copy_from_slice(&f.timestamp.to_be_bytes());
    out[10] = f.sequence;
    out
}

pub fn decode_compact(frame: &[u8]) -> Result<ScalarFrame, CodecError> {
    check_len(frame, COMPACT_LEN)?;
    Ok(ScalarFrame {
        sector_id: frame[0],
        node_id: frame[1],
        sensor_type: frame[2],
        battery: frame[3],
        value: f32::from(i16::from_be_bytes([frame[4], frame[5]])) / 100.0,
        timestamp: be_u32(&frame[6..10]),
        sequence: frame[10],
    })
}

// ── Electrical ────────────────────────────────────────────────

/// Wire view of an electrical report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElectricalFrame {
    pub sector_id: u8,
    pub node_id: u8,
    pub safety_flags: u8,
    pub voltage_v: f32,
    pub current_a: f32,
    pub active_power_w: f32,
    pub power_factor: f32,
    pub frequency_hz: f32,
    pub thd_v_pct: f32,
    pub thd_i_pct: f32,
    pub grade: u8,
    pub timestamp: u32,
    pub reactive_power_var: f32,
    pub battery: u8,
}

impl ElectricalFrame {
    pub fn from_measurement(m: &ElectricalMeasurement, sector_id: u8, node_id: u8, battery: u8, timestamp: u32) -> Self {
        Self {
            sector_id,
            node_id,
            safety_flags: m.safety_flags,
            voltage_v: m.voltage_rms,
            current_a: m.current_rms,
            active_power_w: m.active_power,
            power_factor: m.power_factor,
            frequency_hz: m.frequency_hz,
            thd_v_pct: m.thd_voltage_pct,
            thd_i_pct: m.thd_current_pct,
            grade: m.grade,
            timestamp,
            reactive_power_var: m.reactive_power,
            battery,
        }
    }
}

pub fn encode_electrical(f: &ElectricalFrame) -> [u8; ELECTRICAL_LEN] {
    let mut out = [0u8; ELECTRICAL_LEN];
    out[0] = f.sector_id;
    out[1] = f.node_id;
    out[2] = TYPE_ELECTRICAL;
    out[3] = f.safety_flags;
    out[4..6].copy_from_slice(&to_u16(f.voltage_v * 10.0).to_be_bytes());
    out[6..8].copy_from_slice(&to_u16(f.current_a * 100.0).to_be_bytes());
    out[8..10].copy_from_slice(&to_u16(f.active_power_w).to_be_bytes());
    out[10] = to_u8(f.power_factor * 100.0);
    out[11] = to_u8((f.frequency_hz - 45.0) * 10.0);
    out[12] = to_u8(f.thd_v_pct * 10.0);
    out[13] = to_u8(f.thd_i_pct * 10.0);
    out[14] = f.grade;
    out[15..19].copy_from_slice(&f.timestamp.to_be_bytes());
    out[19..21].copy_from_slice(&to_i16(f.reactive_power_var).to_be_bytes());
    out[21] = f.battery;
    out[22] = 0;
    out[23] = crc8(&out[..ELECTRICAL_LEN - 1]);
    out
}

pub fn decode_electrical(frame: &[u8]) -> Result<ElectricalFrame, CodecError> {
    check_len(frame, ELECTRICAL_LEN)?;
    if frame[2] != TYPE_ELECTRICAL {
        return Err(CodecError::WrongTypeTag(frame[2]));
    }
    if crc8(&frame[..ELECTRICAL_LEN - 1]) != frame[ELECTRICAL_LEN - 1] {
        return Err(CodecError::CrcMismatch);
    }
    Ok(ElectricalFrame {
        sector_id: frame[0],
        node_id: frame[1],
        safety_flags: frame[3],
        voltage_v: f32::from(be_u16(&frame[4..6])) / 10.0,
        current_a: f32::from(be_u16(&frame[6..8])) / 100.0,
        active_power_w: f32::from(be_u16(&frame[8..10])),
        power_factor: f32::from(frame[10]) / 100.0,
        frequency_hz: 45.0 + f32::from(frame[11]) / 10.0,
        thd_v_pct: f32::from(frame[12]) / 10.0,
        thd_i_pct: f32::from(frame[13]) / 10.0,
        grade: frame[14],
        timestamp: be_u32(&frame[15..19]),
        reactive_power_var: f32::from(i16::from_be_bytes([frame[19], frame[20]])),
        battery: frame[21],
    })
}

// ── Water ─────────────────────────────────────────────────────

/// Wire view of a water report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaterFrame {
    pub sector_id: u8,
    pub node_id: u8,
    pub leak: bool,
    pub pressure_bar: f32,
    pub flow_lpm: f32,
    pub ph: f32,
    pub temperature_c: f32,
    pub turbidity_ntu: f32,
    pub grade: u8,
    /// Whole liters.
    pub cumulative_flow_l: u32,
    pub battery: u8,
    pub sensor_status: u8,
}

impl WaterFrame {
    pub fn from_measurement(m: &WaterMeasurement, sector_id: u8, node_id: u8, battery: u8) -> Self {
        Self {
            sector_id,
            node_id,
            leak: m.leak,
            pressure_bar: m.pressure_bar,
            flow_lpm: m.flow_lpm,
            ph: m.ph,
            temperature_c: m.temperature_c,
            turbidity_ntu: m.turbidity_ntu,
            grade: m.grade,
            cumulative_flow_l: m.cumulative_flow_l.max(0.0) as u32,
            battery,
            sensor_status: m.sensor_status,
        }
    }
}

pub fn encode_water(f: &WaterFrame) -> [u8; WATER_LEN] {
    let mut out = [0u8; WATER_LEN];
    out[0] = f.sector_id;
    out[1] = f.node_id;
    out[2] = TYPE_WATER;
    out[3] = u8::from(f.leak);
    out[4..6].copy_from_slice(&to_u16(f.pressure_bar * 100.0).to_be_bytes());
    out[6..8].copy_from_slice(&to_u16(f.flow_lpm * 10.0).to_be_bytes());
    out[8] = to_u8((f.ph - 5.0) * 10.0);
    out[9] = to_u8(f.temperature_c + 20.0);
    out[10] = to_u8(f.turbidity_ntu * 2.0);
    out[11] = f.grade;
    out[12..16].copy_from_slice(&f.cumulative_flow_l.to_be_bytes());
    out[16] = f.battery;
    out[17] = f.sensor_status;
    out
}

pub fn decode_water(frame: &[u8]) -> Result<WaterFrame, CodecError> {
    check_len(frame, WATER_LEN)?;
    if frame[2] != TYPE_WATER {
        return Err(CodecError::WrongTypeTag(frame[2]));
    }
    Ok(WaterFrame {
        sector_id: frame[0],
        node_id: frame[1],
        leak: frame[3] != 0,
        pressure_bar: f32::from(be_u16(&frame[4..6])) / 100.0,
        flow_lpm: f32::from(be_u16(&frame[6..8])) / 10.0,
        ph: 5.0 + f32::from(frame[8]) / 10.0,
        temperature_c: f32::from(frame[9]) - 20.0,
        turbidity_ntu: f32::from(frame[10]) / 2.0,
        grade: frame[11],
        cumulative_flow_l: be_u32(&frame[12..16]),
        battery: frame[16],
        sensor_status: frame[17],
    })
}

// ── Emergency alerts ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectricalAlert {
    pub sector_id: u8,
    pub safety_flags: u8,
    pub timestamp: u32,
}

pub fn encode_electrical_alert(a: &ElectricalAlert) -> [u8; ELECTRICAL_ALERT_LEN] {
    let mut out = [0u8; ELECTRICAL_ALERT_LEN];
    out[0] = EMERGENCY_MARKER;
    out[1] = a.sector_id;
    out[2] = a.safety_flags;
    out[3] = ELECTRICAL_ALERT_SIGNATURE;
    out[4..8].copy_from_slice(&a.timestamp.to_be_bytes());
    out
}

pub fn decode_electrical_alert(frame: &[u8]) -> Result<ElectricalAlert, CodecError> {
    check_len(frame, ELECTRICAL_ALERT_LEN)?;
    if frame[0] != EMERGENCY_MARKER {
        return Err(CodecError::WrongTypeTag(frame[0]));
    }
    Ok(ElectricalAlert {
        sector_id: frame[1],
        safety_flags: frame[2],
        timestamp: be_u32(&frame[4..8]),
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaterAlert {
    pub sector_id: u8,
    pub alert_bits: u8,
    pub pressure_bar: f32,
    /// Pressure trend in bar per check interval (negative while falling).
    pub trend_bar: f32,
    pub node_id: u8,
    pub timestamp: u32,
}

pub fn encode_water_alert(a: &WaterAlert) -> [u8; WATER_ALERT_LEN] {
    let mut out = [0u8; WATER_ALERT_LEN];
    out[0] = EMERGENCY_MARKER;
    out[1] = a.sector_id;
    out[2] = a.alert_bits;
    out[3] = to_u8(a.pressure_bar * 10.0);
    out[4] = to_i8(a.trend_bar * 10.0) as u8;
    out[5] = a.node_id;
    out[6..10].copy_from_slice(&a.timestamp.to_be_bytes());
    out
}

pub fn decode_water_alert(frame: &[u8]) -> Result<WaterAlert, CodecError> {
    check_len(frame, WATER_ALERT_LEN)?;
    if frame[0] != EMERGENCY_MARKER {
        return Err(CodecError::WrongTypeTag(frame[0]));
    }
    Ok(WaterAlert {
        sector_id: frame[1],
        alert_bits: frame[2],
        pressure_bar: f32::from(frame[3]) / 10.0,
        trend_bar: f32::from(frame[4] as i8) / 10.0,
        node_id: frame[5],
        timestamp: be_u32(&frame[6..10]),
    })
}
