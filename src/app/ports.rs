//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ domain (session, pipeline, controllers)
//! ```
//!
//! Driven adapters (radio, clock, sensors, storage, indicator, event sinks)
//! implement these traits. The domain consumes them via generics, so the
//! session manager and the processing pipeline never touch hardware and run
//! unchanged against the mocks in `tests/integration/mock_hw.rs`.

use crate::app::events::NodeEvent;
use crate::error::{RadioError, SensorError};
use crate::lorawan::radio::RadioParams;

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic time plus a scheduler-aware wait.
pub trait ClockPort {
    /// Milliseconds since boot.
    fn now_ms(&self) -> u64;

    /// Suspend the calling task for `ms` milliseconds. Implementations must
    /// yield to the scheduler, never spin.
    fn delay_ms(&mut self, ms: u32);
}

// ───────────────────────────────────────────────────────────────
// Radio port
// ───────────────────────────────────────────────────────────────

/// Half-duplex LoRa transceiver.
///
/// `transmit` returns once the transceiver reports TX done (or fails);
/// the session manager never calls it while holding the sensor bus.
pub trait RadioPort {
    /// Apply modulation and power settings.
    fn configure(&mut self, params: &RadioParams) -> Result<(), RadioError>;

    /// Transmit one frame and wait for TX done.
    fn transmit(&mut self, frame: &[u8]) -> Result<(), RadioError>;

    /// Listen for one frame for at most `timeout_ms`. `Ok(None)` on timeout.
    fn receive(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<Option<usize>, RadioError>;

    /// Enter the transceiver's lowest-power state.
    fn sleep(&mut self);

    /// Leave sleep; the previous configuration is retained.
    fn wake(&mut self);

    /// RSSI of the last received frame (dBm).
    fn last_rssi(&self) -> i16;

    /// SNR of the last received frame (dB).
    fn last_snr(&self) -> i8;
}

// ───────────────────────────────────────────────────────────────
// Sensor reader (one implementation per sector)
// ───────────────────────────────────────────────────────────────

/// A single scalar reading tagged with its sensor type code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub sensor_type: u8,
    pub value: f32,
}

/// Per-sector read capability, selected once at configuration time.
///
/// `B` is the shared bus the reader talks over. Readers that sample an ADC
/// channel ignore it.
pub trait SensorReader<B> {
    /// Sensor type code reported in uplink payloads.
    fn sensor_type(&self) -> u8;

    /// Take one reading. The caller already holds the bus lock.
    fn read(&mut self, bus: &mut B) -> Result<Reading, SensorError>;
}

// ───────────────────────────────────────────────────────────────
// Battery + indicator ports
// ───────────────────────────────────────────────────────────────

/// Battery gauge.
pub trait BatteryPort {
    /// State of charge, 0–100 %.
    fn battery_percent(&mut self) -> u8;
}

/// Status LED.
pub trait IndicatorPort {
    fn set_led(&mut self, r: u8, g: u8, b: u8);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`NodeEvent`]s through this port. Adapters
/// decide where they go (serial log, test recorder, etc.).
pub trait EventSink {
    fn emit(&mut self, event: &NodeEvent);
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for configuration, calibration and crash
/// logs.
///
/// Write operations MUST be atomic; no partial writes on power loss.
/// The ESP-IDF NVS API guarantees this natively; in-memory simulation
/// achieves it trivially.
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate (decouples scheduler from the task runtime)
// ───────────────────────────────────────────────────────────────

/// Callback trait that the maintenance scheduler invokes when an entry fires.
pub trait SchedulerDelegate {
    /// * `label`: the label of the schedule that fired.
    /// * `kind`: whether it was a periodic or one-shot fire.
    fn on_schedule_fired(&mut self, label: &str, kind: ScheduleFiredKind);
}

/// Discriminant passed to [`SchedulerDelegate::on_schedule_fired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleFiredKind {
    Periodic,
    /// Fires once, then auto-disables.
    OneShot,
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from configuration validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl From<ConfigError> for crate::error::Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::ValidationFailed(msg) => Self::Config(msg),
        }
    }
}
