//! LoRa modulation parameters and regional defaults.
//!
//! Only the single AU915 sub-band channel used by the gateway is modelled;
//! multi-region channel plans and ADR negotiation are not.

use serde::{Deserialize, Serialize};

/// LoRa channel bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bandwidth {
    Khz125,
    Khz250,
    Khz500,
}

/// LoRa forward-error-correction coding rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodingRate {
    Cr4_5,
    Cr4_6,
    Cr4_7,
    Cr4_8,
}

/// Complete transceiver setting applied through [`RadioPort::configure`].
///
/// [`RadioPort::configure`]: crate::app::ports::RadioPort::configure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioParams {
    pub frequency_hz: u32,
    pub spreading_factor: u8,
    pub bandwidth: Bandwidth,
    pub coding_rate: CodingRate,
    pub tx_power_dbm: i8,
    pub sync_word: u16,
    pub preamble_len: u16,
}

/// Highest spreading factor (longest range, slowest rate).
pub const MAX_SPREADING_FACTOR: u8 = 12;

/// Transmit power used when favouring link margin over throughput after a
/// failed join round.
pub const DEGRADED_TX_POWER_DBM: i8 = 10;

impl RadioParams {
    /// AU915 defaults: 915.0 MHz, SF9, BW125, CR 4/5, 14 dBm, public sync
    /// word, 8-symbol preamble.
    pub const fn au915() -> Self {
        Self {
            frequency_hz: 915_000_000,
            spreading_factor: 9,
            bandwidth: Bandwidth::Khz125,
            coding_rate: CodingRate::Cr4_5,
            tx_power_dbm: 14,
            sync_word: 0x3444,
            preamble_len: 8,
        }
    }

    /// Same channel, with spreading factor and power taken from config.
    pub fn with_link(self, spreading_factor: u8, tx_power_dbm: i8) -> Self {
        Self {
            spreading_factor,
            tx_power_dbm,
            ..self
        }
    }

    /// Maximum-range variant.
    pub fn degraded(self) -> Self {
        self.with_link(MAX_SPREADING_FACTOR, DEGRADED_TX_POWER_DBM)
    }

    /// Approximate time on air in milliseconds for a PHY payload of
    /// `len` bytes (explicit header, CRC on, low-data-rate optimisation at
    /// SF11/12 on 125 kHz).
    pub fn time_on_air_ms(&self, len: usize) -> u32 {
        let bw_hz = match self.bandwidth {
            Bandwidth::Khz125 => 125_000.0,
            Bandwidth::Khz250 => 250_000.0,
            Bandwidth::Khz500 => 500_000.0,
        };
        let cr = match self.coding_rate {
            CodingRate::Cr4_5 => 1.0,
            CodingRate::Cr4_6 => 2.0,
            CodingRate::Cr4_7 => 3.0,
            CodingRate::Cr4_8 => 4.0,
        };
        let sf = f32::from(self.spreading_factor);
        let t_sym_ms = (2f32).powi(i32::from(self.spreading_factor)) / bw_hz * 1000.0;
        let de = if self.spreading_factor >= 11 && self.bandwidth == Bandwidth::Khz125 {
            1.0
        } else {
            0.0
        };
        let num = 8.0 * len as f32 - 4.0 * sf + 28.0 + 16.0;
        let payload_symbols = 8.0 + ((num / (4.0 * (sf - 2.0 * de))).ceil() * (cr + 4.0)).max(0.0);
        let preamble_ms = (f32::from(self.preamble_len) + 4.25) * t_sym_ms;
        (preamble_ms + payload_symbols * t_sym_ms).ceil() as u32
    }
}

impl Default for RadioParams {
    fn default() -> Self {
        Self::au915()
    }
}
