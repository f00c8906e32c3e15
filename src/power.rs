//! Battery-driven power tiers.
//!
//! ```text
//!   battery %   0 ──── 19 │ 20 ──── 49 │ 50 ──── 100
//!   tier        Critical  │    Low     │   Normal
//! ```
//!
//! [`tier_for`] is a pure function; [`PowerController`] polls the battery,
//! and publishes a new configuration snapshot only when the tier changes.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::events::NodeEvent;
use crate::app::ports::{BatteryPort, ConfigError, EventSink};
use crate::config::ConfigStore;

/// How often the battery is polled.
pub const POLL_INTERVAL_MS: u32 = 600_000;

/// Battery voltage mapped to 0 % and 100 %.
pub const EMPTY_MV: u32 = 3_300;
pub const FULL_MV: u32 = 4_200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerTier {
    Critical,
    Low,
    Normal,
}

/// Radio and cadence settings applied for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSettings {
    pub sampling_interval_ms: u32,
    pub spreading_factor: u8,
    pub tx_power_dbm: i8,
}

impl PowerTier {
    pub const fn settings(self) -> TierSettings {
        match self {
            Self::Critical => TierSettings {
                sampling_interval_ms: 3_600_000,
                spreading_factor: 12,
                tx_power_dbm: 10,
            },
            Self::Low => TierSettings {
                sampling_interval_ms: 1_800_000,
                spreading_factor: 11,
                tx_power_dbm: 12,
            },
            Self::Normal => TierSettings {
                sampling_interval_ms: 300_000,
                spreading_factor: 10,
                tx_power_dbm: 14,
            },
        }
    }
}

/// Tier for a battery percentage. 20 and 50 belong to the upper band.
pub const fn tier_for(battery_percent: u8) -> PowerTier {
    match battery_percent {
        0..=19 => PowerTier::Critical,
        20..=49 => PowerTier::Low,
        _ => PowerTier::Normal,
    }
}

/// Linear 3.3 V → 0 %, 4.2 V → 100 %, clamped.
pub fn battery_percent_from_mv(millivolts: u32) -> u8 {
    let span = FULL_MV - EMPTY_MV;
    let above = millivolts.clamp(EMPTY_MV, FULL_MV) - EMPTY_MV;
    ((above * 100 + span / 2) / span) as u8
}

/// Applies tier changes to the shared configuration.
pub struct PowerController {
    current: Option<PowerTier>,
    last_battery: u8,
}

impl PowerController {
    pub const fn new() -> Self {
        Self {
            current: None,
            last_battery: 100,
        }
    }

    pub fn tier(&self) -> Option<PowerTier> {
        self.current
    }

    pub fn last_battery(&self) -> u8 {
        self.last_battery
    }

    /// Read the battery and publish a new snapshot if the tier changed.
    /// Returns the new tier on a change.
    pub fn poll(
        &mut self,
        battery: &mut impl BatteryPort,
        store: &ConfigStore,
        sink: &mut impl EventSink,
    ) -> Result<Option<PowerTier>, ConfigError> {
        let level = battery.battery_percent();
        self.last_battery = level;
        let tier = tier_for(level);
        if self.current == Some(tier) {
            return Ok(None);
        }

        let s = tier.settings();
        store.update(|cfg| {
            cfg.sampling_interval_ms = s.sampling_interval_ms;
            cfg.spreading_factor = s.spreading_factor;
            cfg.tx_power_dbm = s.tx_power_dbm;
            cfg.low_power = tier != PowerTier::Normal;
        })?;

        match tier {
            PowerTier::Critical => warn!("POWER: battery {}% -> {:?}", level, tier),
            _ => info!("POWER: battery {}% -> {:?}", level, tier),
        }
        self.current = Some(tier);
        sink.emit(&NodeEvent::PowerTier { tier, battery: level });
        Ok(Some(tier))
    }
}

impl Default for PowerController {
    fn default() -> Self {
        Self::new()
    }
}
