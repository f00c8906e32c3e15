//! Hardware adapter: bridges on-board peripherals to domain port traits.
//!
//! [`BatteryGauge`] reads the battery divider on ADC1 and exposes it
//! through [`BatteryPort`]. On non-espidf targets the ADC read comes from
//! `hw_init::sim_set_adc`, so the power controller runs unchanged in tests.

use log::debug;

use crate::app::ports::BatteryPort;
use crate::drivers::hw_init::{self, ADC1_CH_BATTERY, counts_to_volts};
use crate::pins::BATTERY_DIVIDER;
use crate::power::battery_percent_from_mv;

/// Reads averaged per poll to smooth ADC noise.
const BATTERY_SAMPLES: u32 = 8;

/// Battery level from the cell voltage divider.
pub struct BatteryGauge {
    channel: u32,
    divider: f32,
}

impl BatteryGauge {
    pub fn new() -> Self {
        Self {
            channel: ADC1_CH_BATTERY,
            divider: BATTERY_DIVIDER,
        }
    }

    /// Cell voltage in millivolts.
    pub fn millivolts(&self) -> u32 {
        let sum: u32 = (0..BATTERY_SAMPLES)
            .map(|_| u32::from(hw_init::adc1_read(self.channel)))
            .sum();
        let raw = (sum / BATTERY_SAMPLES) as u16;
        (counts_to_volts(raw) * self.divider * 1000.0) as u32
    }
}

impl Default for BatteryGauge {
    fn default() -> Self {
        Self::new()
    }
}

impl BatteryPort for BatteryGauge {
    fn battery_percent(&mut self) -> u8 {
        let mv = self.millivolts();
        let pct = battery_percent_from_mv(mv);
        debug!("battery: {} mV -> {}%", mv, pct);
        pct
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn divider_reading_maps_to_percent() {
        // 1.875 V at the pin is 3.75 V at the cell, halfway up the range.
        let raw = (1.875 / hw_init::ADC_VREF * hw_init::ADC_MAX) as u16;
        hw_init::sim_set_adc(ADC1_CH_BATTERY, raw);
        let mut gauge = BatteryGauge::new();
        let mv = gauge.millivolts();
        assert!((3_740..=3_760).contains(&mv), "{mv}");
        assert_eq!(gauge.battery_percent(), 50);

        hw_init::sim_set_adc(ADC1_CH_BATTERY, 4095);
        assert_eq!(gauge.battery_percent(), 100);
    }
}
