//! Inter-task queues and shared runtime state.
//!
//! ```text
//!  acquisition ──SensorSample──▶ SAMPLE_QUEUE (10) ──┐
//!  processing  ──Alert────────▶ ALERT_CHANNEL (5) ──┼──▶ uplink task ──▶ radio
//!  leak task   ──Alert────────▶ LEAK_CHANNEL  (3) ──┘
//!  sample timer ─pairs────────▶ ADC_BLOCKS ──▶ processing
//! ```
//!
//! Producers never block: telemetry goes through [`lossy_enqueue`], which
//! resets a full queue. Alerts use their own channels so a telemetry burst
//! can never delay them.

use core::sync::atomic::{AtomicBool, AtomicI8, AtomicI16, AtomicU8, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use heapless::Vec;

use crate::app::ports::Reading;
use crate::config::Sector;
use crate::dsp::electrical::ElectricalMeasurement;
use crate::dsp::water::WaterMeasurement;
use crate::sensors::adc_buffer::AdcDoubleBuffer;

pub const SAMPLE_DEPTH: usize = 10;
pub const ALERT_DEPTH: usize = 5;
pub const LEAK_DEPTH: usize = 3;

/// Longest encoded alert (the water layout).
pub const MAX_ALERT_LEN: usize = 10;

// ── Messages ──────────────────────────────────────────────────

/// Sector-specific content of a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleBody {
    Scalar(Reading),
    Electrical(ElectricalMeasurement),
    Water(WaterMeasurement),
}

/// One acquisition cycle, consumed exactly once by the uplink task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    /// Per-node sequence number, wrapping.
    pub seq: u32,
    pub timestamp_ms: u64,
    pub sector: Sector,
    pub body: SampleBody,
    pub battery: u8,
    pub rssi: i16,
    pub snr: i8,
}

/// An encoded emergency frame and the port it must go out on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub port: u8,
    pub mask: u8,
    pub payload: Vec<u8, MAX_ALERT_LEN>,
}

impl Alert {
    /// `None` if `bytes` is longer than any alert layout.
    pub fn new(port: u8, mask: u8, bytes: &[u8]) -> Option<Self> {
        let payload = Vec::from_slice(bytes).ok()?;
        Some(Self { port, mask, payload })
    }
}

// ── Channels ──────────────────────────────────────────────────

pub static SAMPLE_QUEUE: Channel<CriticalSectionRawMutex, SensorSample, SAMPLE_DEPTH> = Channel::new();
pub static ALERT_CHANNEL: Channel<CriticalSectionRawMutex, Alert, ALERT_DEPTH> = Channel::new();
pub static LEAK_CHANNEL: Channel<CriticalSectionRawMutex, Alert, LEAK_DEPTH> = Channel::new();

/// Electrical sample blocks, filled by the sampling timer.
pub static ADC_BLOCKS: AdcDoubleBuffer = AdcDoubleBuffer::new();

/// Set by the leak task while an episode is latched; read by the water
/// processing task.
pub static LEAK_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Requested by the maintenance scheduler or a downlink; consumed by the
/// water processing task which owns the totalizer.
pub static TOTALIZER_RESET: AtomicBool = AtomicBool::new(false);

pub static METRICS: RuntimeMetrics = RuntimeMetrics::new();

pub static NODE_STATUS: NodeStatus = NodeStatus::new();

/// Enqueue without blocking. A full queue is emptied first and the number
/// of discarded items is returned.
pub fn lossy_enqueue<T, const N: usize>(queue: &Channel<CriticalSectionRawMutex, T, N>, item: T) -> usize {
    let item = match queue.try_send(item) {
        Ok(()) => return 0,
        Err(TrySendError::Full(item)) => item,
    };
    let mut dropped = 0;
    while queue.try_receive().is_ok() {
        dropped += 1;
    }
    // Another producer may have refilled the slot in between.
    if queue.try_send(item).is_err() {
        dropped += 1;
    }
    dropped
}

// ── Node status ───────────────────────────────────────────────

/// Values one task learns and others stamp into samples or show on the LED.
pub struct NodeStatus {
    battery: AtomicU8,
    rssi: AtomicI16,
    snr: AtomicI8,
    /// One-shot widening of the next acquisition interval; 0 = none.
    interval_override_ms: AtomicU32,
    join_fault: AtomicBool,
    alarm_pending: AtomicBool,
}

impl NodeStatus {
    pub const fn new() -> Self {
        Self {
            battery: AtomicU8::new(100),
            rssi: AtomicI16::new(-100),
            snr: AtomicI8::new(-20),
            interval_override_ms: AtomicU32::new(0),
            join_fault: AtomicBool::new(false),
            alarm_pending: AtomicBool::new(false),
        }
    }

    pub fn battery(&self) -> u8 {
        self.battery.load(Ordering::Relaxed)
    }

    pub fn set_battery(&self, percent: u8) {
        self.battery.store(percent, Ordering::Relaxed);
    }

    pub fn link(&self) -> (i16, i8) {
        (self.rssi.load(Ordering::Relaxed), self.snr.load(Ordering::Relaxed))
    }

    pub fn set_link(&self, rssi: i16, snr: i8) {
        self.rssi.store(rssi, Ordering::Relaxed);
        self.snr.store(snr, Ordering::Relaxed);
    }

    /// Widen the next interval. A wider pending value is kept.
    pub fn widen_next_interval(&self, ms: u32) {
        self.interval_override_ms.fetch_max(ms, Ordering::AcqRel);
    }

    /// Consume the pending override, if any.
    pub fn take_interval_override(&self) -> Option<u32> {
        match self.interval_override_ms.swap(0, Ordering::AcqRel) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn join_fault(&self) -> bool {
        self.join_fault.load(Ordering::Relaxed)
    }

    pub fn set_join_fault(&self, active: bool) {
        self.join_fault.store(active, Ordering::Relaxed);
    }

    /// Ask the indicator to play the leak alarm.
    pub fn request_alarm(&self) {
        self.alarm_pending.store(true, Ordering::Release);
    }

    pub fn take_alarm_request(&self) -> bool {
        self.alarm_pending.swap(false, Ordering::AcqRel)
    }
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::new()
    }
}

// ── Metrics ───────────────────────────────────────────────────

/// Lifetime counters, readable from any task.
pub struct RuntimeMetrics {
    samples: AtomicU32,
    queue_resets: AtomicU32,
    bus_skips: AtomicU32,
    send_failures: AtomicU32,
    emergencies: AtomicU32,
}

/// Copy of [`RuntimeMetrics`] at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub samples: u32,
    pub queue_resets: u32,
    pub bus_skips: u32,
    pub send_failures: u32,
    pub emergencies: u32,
    pub adc_overruns: u32,
}

impl RuntimeMetrics {
    pub const fn new() -> Self {
        Self {
            samples: AtomicU32::new(0),
            queue_resets: AtomicU32::new(0),
            bus_skips: AtomicU32::new(0),
            send_failures: AtomicU32::new(0),
            emergencies: AtomicU32::new(0),
        }
    }

    pub fn sample_produced(&self) -> u32 {
        self.samples.fetch_add(1, Ordering::Relaxed)
    }

    pub fn queue_reset(&self) {
        self.queue_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bus_skipped(&self) {
        self.bus_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn emergency_sent(&self) {
        self.emergencies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples: self.samples.load(Ordering::Relaxed),
            queue_resets: self.queue_resets.load(Ordering::Relaxed),
            bus_skips: self.bus_skips.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            emergencies: self.emergencies.load(Ordering::Relaxed),
            adc_overruns: ADC_BLOCKS.overruns(),
        }
    }
}

impl Default for RuntimeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
