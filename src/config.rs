//! Node configuration and the snapshot store that distributes it.
//!
//! [`DeviceConfig`] is a plain `Copy` value. The live copy is owned by a
//! [`ConfigStore`]; readers take whole snapshots and writers publish whole
//! replacements, so no task can observe a half-applied update.
//!
//! Values can be overridden from NVS at boot (see [`ConfigStore::load`]).

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{ConfigError, StorageError, StoragePort};

const CONFIG_NAMESPACE: &str = "cfg";
const CONFIG_KEY: &str = "device";
const CALIBRATION_KEY: &str = "calib";

// ---------------------------------------------------------------------------
// Sector
// ---------------------------------------------------------------------------

/// Deployment sector. Selects the sensor reader and payload profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Sector {
    Energy = 1,
    Water = 2,
    Airport = 3,
    Generic = 0xFF,
}

impl Sector {
    /// Map a raw sector id. Unknown ids fall back to [`Sector::Generic`].
    pub const fn from_id(id: u8) -> Self {
        match id {
            1 => Self::Energy,
            2 => Self::Water,
            3 => Self::Airport,
            _ => Self::Generic,
        }
    }

    pub const fn id(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// Sector thresholds
// ---------------------------------------------------------------------------

/// Electrical profile limits. Voltages in V RMS, current in A RMS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElectricalThresholds {
    pub nominal_voltage_v: f32,
    pub nominal_frequency_hz: f32,
    pub over_voltage_v: f32,
    pub under_voltage_v: f32,
    pub over_current_a: f32,
    pub over_power_w: f32,
    /// Power factor below this raises the low-PF flag.
    pub pf_limit: f32,
    /// THD (percent) above this raises the high-THD flag.
    pub thd_limit_pct: f32,
    /// Allowed deviation from nominal frequency before flagging.
    pub frequency_tolerance_hz: f32,
    /// ADC sample rate of the interleaved V/I acquisition.
    pub sample_rate_hz: u32,
}

impl ElectricalThresholds {
    pub const fn factory() -> Self {
        Self {
            nominal_voltage_v: 230.0,
            nominal_frequency_hz: 50.0,
            over_voltage_v: 250.0 * 1.1,
            under_voltage_v: 250.0 * 0.85,
            over_current_a: 100.0 * 0.9,
            over_power_w: 22_000.0,
            pf_limit: 0.85,
            thd_limit_pct: 5.0,
            frequency_tolerance_hz: 2.0,
            sample_rate_hz: 2_000,
        }
    }
}

/// Water profile limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaterThresholds {
    /// Full-scale range of the pressure transducer (bar).
    pub pressure_range_bar: f32,
    /// Full-scale range of the flow meter (L/min).
    pub flow_range_lpm: f32,
    pub ph_min: f32,
    pub ph_max: f32,
    pub measurement_interval_ms: u32,
    pub leak_check_interval_ms: u32,
    /// Pressure drop per check interval that counts as a leak (bar, positive).
    pub leak_threshold_bar: f32,
    /// Pressure above this shortens the next acquisition interval.
    pub elevated_pressure_bar: f32,
}

impl WaterThresholds {
    pub const fn factory() -> Self {
        Self {
            pressure_range_bar: 10.0,
            flow_range_lpm: 100.0,
            ph_min: 6.5,
            ph_max: 8.5,
            measurement_interval_ms: 60_000,
            leak_check_interval_ms: 10_000,
            leak_threshold_bar: 0.5,
            elevated_pressure_bar: 10.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Device configuration
// ---------------------------------------------------------------------------

/// Shared node configuration.
///
/// Mutated by the power controller and by the maintenance interface, read
/// by acquisition and by the uplink task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub sector_id: u8,
    pub node_id: u8,
    /// Acquisition/uplink cadence (milliseconds).
    pub sampling_interval_ms: u32,
    /// LoRa spreading factor (7–12).
    pub spreading_factor: u8,
    /// Transmit power (dBm).
    pub tx_power_dbm: i8,
    /// Sleep the radio between transmissions.
    pub low_power: bool,
    pub electrical: ElectricalThresholds,
    pub water: WaterThresholds,
}

impl DeviceConfig {
    /// Factory defaults, usable in `const` context.
    pub const fn factory() -> Self {
        Self {
            sector_id: Sector::Water as u8,
            node_id: 1,
            sampling_interval_ms: 30_000,
            spreading_factor: 9,
            tx_power_dbm: 14,
            low_power: false,
            electrical: ElectricalThresholds::factory(),
            water: WaterThresholds::factory(),
        }
    }

    /// Factory defaults for a given sector.
    pub fn for_sector(sector: Sector) -> Self {
        Self {
            sector_id: sector.id(),
            ..Self::factory()
        }
    }

    pub fn sector(&self) -> Sector {
        Sector::from_id(self.sector_id)
    }

    /// Range-check every field a remote writer could corrupt.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(7..=12).contains(&self.spreading_factor) {
            return Err(ConfigError::ValidationFailed("spreading factor outside 7..=12"));
        }
        if !(2..=22).contains(&self.tx_power_dbm) {
            return Err(ConfigError::ValidationFailed("tx power outside 2..=22 dBm"));
        }
        if self.sampling_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("sampling interval is zero"));
        }
        let e = &self.electrical;
        if e.under_voltage_v >= e.over_voltage_v {
            return Err(ConfigError::ValidationFailed("under-voltage above over-voltage"));
        }
        if !(0.0..=1.0).contains(&e.pf_limit) {
            return Err(ConfigError::ValidationFailed("PF limit outside 0..=1"));
        }
        if e.sample_rate_hz == 0 || e.nominal_frequency_hz <= 0.0 {
            return Err(ConfigError::ValidationFailed("electrical timing is zero"));
        }
        let w = &self.water;
        if w.ph_min >= w.ph_max {
            return Err(ConfigError::ValidationFailed("pH band inverted"));
        }
        if w.measurement_interval_ms == 0 || w.leak_check_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("water interval is zero"));
        }
        if w.leak_threshold_bar <= 0.0 {
            return Err(ConfigError::ValidationFailed("leak threshold must be positive"));
        }
        Ok(())
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::factory()
    }
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

/// Marker that tags a calibration record as written by the calibration tool.
pub const CALIBRATION_MAGIC: u32 = 0xCA11_B8A7;

/// Gain/offset corrections for the analog front end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub voltage_gain: f32,
    pub voltage_offset: f32,
    pub current_gain: f32,
    pub current_offset: f32,
    /// Extra V/I phase shift of the current transformer, in samples.
    pub phase_correction: f32,
    pub magic: u32,
}

impl Calibration {
    /// Uncalibrated fallback: unity gain, zero offset.
    pub const fn uncalibrated() -> Self {
        Self {
            voltage_gain: 1.0,
            voltage_offset: 0.0,
            current_gain: 1.0,
            current_offset: 0.0,
            phase_correction: 0.0,
            magic: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == CALIBRATION_MAGIC
            && self.voltage_gain.is_finite()
            && self.current_gain.is_finite()
            && self.voltage_gain > 0.0
            && self.current_gain > 0.0
    }

    /// Load the stored record, or the uncalibrated fallback when absent
    /// or invalid.
    pub fn load(storage: &dyn StoragePort) -> Self {
        let mut buf = [0u8; 64];
        match storage.read(CONFIG_NAMESPACE, CALIBRATION_KEY, &mut buf) {
            Ok(len) => match postcard::from_bytes::<Self>(&buf[..len]) {
                Ok(cal) if cal.is_valid() => {
                    info!("Calibration loaded (Vgain={:.4}, Igain={:.4})", cal.voltage_gain, cal.current_gain);
                    cal
                }
                _ => {
                    warn!("Calibration record invalid, using uncalibrated defaults");
                    Self::uncalibrated()
                }
            },
            Err(_) => {
                info!("No calibration stored, using uncalibrated defaults");
                Self::uncalibrated()
            }
        }
    }

    pub fn save(&self, storage: &mut dyn StoragePort) -> Result<(), StorageError> {
        let mut buf = [0u8; 64];
        let bytes = postcard::to_slice(self, &mut buf).map_err(|_| StorageError::IoError)?;
        storage.write(CONFIG_NAMESPACE, CALIBRATION_KEY, bytes)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::uncalibrated()
    }
}

// ---------------------------------------------------------------------------
// Snapshot store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Versioned {
    version: u32,
    config: DeviceConfig,
}

/// Owner of the live configuration.
///
/// The whole struct is swapped under a critical section, so a
/// [`snapshot`](Self::snapshot) is always one consistent published value.
pub struct ConfigStore {
    inner: Mutex<CriticalSectionRawMutex, Cell<Versioned>>,
}

impl ConfigStore {
    pub const fn new(initial: DeviceConfig) -> Self {
        Self {
            inner: Mutex::new(Cell::new(Versioned {
                version: 0,
                config: initial,
            })),
        }
    }

    /// Copy of the current configuration.
    pub fn snapshot(&self) -> DeviceConfig {
        self.inner.lock(|c| c.get().config)
    }

    /// Current configuration together with its publish counter.
    pub fn versioned(&self) -> (u32, DeviceConfig) {
        self.inner.lock(|c| {
            let v = c.get();
            (v.version, v.config)
        })
    }

    pub fn version(&self) -> u32 {
        self.inner.lock(|c| c.get().version)
    }

    /// Validate and publish a full replacement. Returns the new version.
    pub fn publish(&self, config: DeviceConfig) -> Result<u32, ConfigError> {
        config.validate()?;
        Ok(self.inner.lock(|c| {
            let version = c.get().version.wrapping_add(1);
            c.set(Versioned { version, config });
            version
        }))
    }

    /// Read-modify-write under one lock, so concurrent writers never lose
    /// each other's fields. The edit is discarded if validation fails.
    pub fn update(&self, edit: impl FnOnce(&mut DeviceConfig)) -> Result<u32, ConfigError> {
        self.inner.lock(|c| {
            let current = c.get();
            let mut next = current.config;
            edit(&mut next);
            next.validate()?;
            let version = current.version.wrapping_add(1);
            c.set(Versioned {
                version,
                config: next,
            });
            Ok(version)
        })
    }

    /// Load the persisted configuration into the store. Falls back to the
    /// current value when nothing valid is stored.
    pub fn load(&self, storage: &dyn StoragePort) -> DeviceConfig {
        let mut buf = [0u8; 192];
        let stored = storage
            .read(CONFIG_NAMESPACE, CONFIG_KEY, &mut buf)
            .ok()
            .and_then(|len| postcard::from_bytes::<DeviceConfig>(&buf[..len]).ok());

        match stored {
            Some(cfg) => match self.publish(cfg) {
                Ok(_) => info!("Config loaded from storage"),
                Err(e) => warn!("Stored config rejected ({}), keeping defaults", e),
            },
            None => info!("No stored config, using defaults"),
        }
        self.snapshot()
    }

    /// Persist the current snapshot.
    pub fn persist(&self, storage: &mut dyn StoragePort) -> Result<(), StorageError> {
        let cfg = self.snapshot();
        let mut buf = [0u8; 192];
        let bytes = postcard::to_slice(&cfg, &mut buf).map_err(|_| StorageError::IoError)?;
        storage.write(CONFIG_NAMESPACE, CONFIG_KEY, bytes)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(DeviceConfig::factory())
    }
}
