//! Crash logging and runtime diagnostics.
//!
//! Stores up to 4 crash entries in an NVS ring buffer under the "diag"
//! namespace. Each entry captures uptime, the kind of fatal event, a reason
//! string and the runtime counters at the time of the crash. The panic and
//! allocation-failure hooks write the entry, show the fatal LED pattern and
//! restart the chip.

use serde::{Deserialize, Serialize};

use crate::app::ports::{StorageError, StoragePort};
use crate::runtime::channels::{METRICS, MetricsSnapshot};

const CRASH_RING_SLOTS: usize = 4;
pub const CRASH_NAMESPACE: &str = "diag";
const CRASH_INDEX_KEY: &str = "crash_idx";
/// Largest encoded entry.
pub const MAX_ENTRY_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrashKind {
    Panic,
    AllocFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashEntry {
    pub uptime_secs: u64,
    pub kind: CrashKind,
    pub reason: heapless::String<64>,
    pub metrics: MetricsSnapshot,
}

impl CrashEntry {
    pub fn new(uptime_secs: u64, kind: CrashKind, reason: &str, metrics: MetricsSnapshot) -> Self {
        let mut r = heapless::String::new();
        // Truncate on a char boundary.
        for c in reason.chars() {
            if r.push(c).is_err() {
                break;
            }
        }
        Self {
            uptime_secs,
            kind,
            reason: r,
            metrics,
        }
    }

    pub fn encode<'a>(&self, buf: &'a mut [u8]) -> Option<&'a mut [u8]> {
        postcard::to_slice(self, buf).ok()
    }

    /// Decode a stored blob. Corrupt blobs yield `None`.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        postcard::from_bytes(bytes).ok()
    }
}

/// NVS-backed ring buffer for crash entries.
#[derive(Default)]
pub struct CrashLog {
    write_index: usize,
}

impl CrashLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the write index from NVS, or default to 0.
    pub fn init(&mut self, nvs: &dyn StoragePort) {
        let mut buf = [0u8; 4];
        if let Ok(4) = nvs.read(CRASH_NAMESPACE, CRASH_INDEX_KEY, &mut buf) {
            self.write_index = u32::from_le_bytes(buf) as usize % CRASH_RING_SLOTS;
        }
    }

    /// Write a crash entry to the next ring slot and advance the index.
    pub fn write_entry(&mut self, nvs: &mut dyn StoragePort, entry: &CrashEntry) {
        let slot_key = Self::slot_key(self.write_index);
        let mut buf = [0u8; MAX_ENTRY_LEN];
        if let Some(bytes) = entry.encode(&mut buf) {
            if let Err(e) = nvs.write(CRASH_NAMESPACE, &slot_key, bytes) {
                log::error!("CrashLog: write failed: {}", e);
            }
        }

        self.write_index = (self.write_index + 1) % CRASH_RING_SLOTS;
        let idx_bytes = (self.write_index as u32).to_le_bytes();
        if let Err(e) = nvs.write(CRASH_NAMESPACE, CRASH_INDEX_KEY, &idx_bytes) {
            log::warn!("CrashLog: index not saved: {}", e);
        }
    }

    /// Read all stored crash entries (up to 4).
    pub fn read_all(&self, nvs: &dyn StoragePort) -> heapless::Vec<CrashEntry, CRASH_RING_SLOTS> {
        let mut entries = heapless::Vec::new();
        for i in 0..CRASH_RING_SLOTS {
            let mut buf = [0u8; MAX_ENTRY_LEN];
            if let Ok(len) = nvs.read(CRASH_NAMESPACE, &Self::slot_key(i), &mut buf) {
                if let Some(entry) = CrashEntry::decode(&buf[..len]) {
                    if entries.push(entry).is_err() {
                        break;
                    }
                }
            }
        }
        entries
    }

    /// Erase all crash entries and reset the index.
    pub fn clear(&mut self, nvs: &mut dyn StoragePort) {
        for i in 0..CRASH_RING_SLOTS {
            Self::erase(nvs, &Self::slot_key(i));
        }
        Self::erase(nvs, CRASH_INDEX_KEY);
        self.write_index = 0;
    }

    pub fn count(&self, nvs: &dyn StoragePort) -> usize {
        (0..CRASH_RING_SLOTS)
            .filter(|i| nvs.exists(CRASH_NAMESPACE, &Self::slot_key(*i)))
            .count()
    }

    fn erase(nvs: &mut dyn StoragePort, key: &str) {
        match nvs.delete(CRASH_NAMESPACE, key) {
            Ok(()) | Err(StorageError::NotFound) => {}
            Err(e) => log::warn!("CrashLog: could not erase {}: {}", key, e),
        }
    }

    fn slot_key(index: usize) -> heapless::String<16> {
        let mut s = heapless::String::new();
        let _ = core::fmt::Write::write_fmt(&mut s, format_args!("e{}", index));
        s
    }
}

/// Health snapshot logged by the daily health check.
#[derive(Debug, Clone, Copy)]
pub struct HealthReport {
    pub uptime_secs: u64,
    pub heap_free: u32,
    pub heap_min_free: u32,
    pub crash_count: u32,
    pub metrics: MetricsSnapshot,
}

impl HealthReport {
    #[cfg(target_os = "espidf")]
    pub fn collect(uptime_secs: u64, crash_count: u32) -> Self {
        use esp_idf_svc::sys::*;
        // SAFETY: read-only heap statistics.
        let heap_free = unsafe { esp_get_free_heap_size() };
        let heap_min_free = unsafe { esp_get_minimum_free_heap_size() };
        Self {
            uptime_secs,
            heap_free,
            heap_min_free,
            crash_count,
            metrics: METRICS.snapshot(),
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn collect(uptime_secs: u64, crash_count: u32) -> Self {
        // Synthetic heap that shrinks slowly, as fragmentation would.
        let heap_free = 262_144u32.saturating_sub((uptime_secs / 60) as u32 * 256);
        Self {
            uptime_secs,
            heap_free,
            heap_min_free: heap_free / 10 * 9,
            crash_count,
            metrics: METRICS.snapshot(),
        }
    }

    pub fn log(&self) {
        let m = &self.metrics;
        log::info!(
            "HEALTH | up {} s, heap {} B (min {} B), crashes {}",
            self.uptime_secs,
            self.heap_free,
            self.heap_min_free,
            self.crash_count
        );
        log::info!(
            "HEALTH | samples {}, queue resets {}, bus skips {}, send failures {}, emergencies {}, ADC overruns {}",
            m.samples,
            m.queue_resets,
            m.bus_skips,
            m.send_failures,
            m.emergencies,
            m.adc_overruns
        );
    }
}

// ───────────────────────────────────────────────────────────────
// Fatal path: persist, show the fatal pattern, restart
// ───────────────────────────────────────────────────────────────

fn record_fatal(kind: CrashKind, reason: &str) {
    use crate::app::ports::IndicatorPort;
    use crate::drivers::led_patterns::COLOUR_FATAL;

    log::error!("FATAL ({:?}): {}", kind, reason);
    let (r, g, b) = COLOUR_FATAL;
    crate::drivers::status_led::StatusLed::new().set_led(r, g, b);

    #[cfg(target_os = "espidf")]
    {
        // SAFETY: esp_timer_get_time is a plain counter read.
        let uptime = (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000_000;
        let entry = CrashEntry::new(uptime, kind, reason, METRICS.snapshot());
        // NVS was initialised in main(); if not, the write fails and we
        // still restart.
        match crate::adapters::nvs::NvsAdapter::new() {
            Ok(mut nvs) => {
                let mut crash_log = CrashLog::new();
                crash_log.init(&nvs);
                crash_log.write_entry(&mut nvs, &entry);
            }
            Err(_) => log::error!("FATAL: NVS unavailable, crash entry not persisted"),
        }
    }
}

#[cfg(target_os = "espidf")]
fn restart() -> ! {
    // SAFETY: esp_restart never returns.
    unsafe { esp_idf_svc::sys::esp_restart() }
}

/// Install the panic hook. Call once during init, after NVS is ready.
pub fn install_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        let reason = if let Some(msg) = info.payload().downcast_ref::<&str>() {
            *msg
        } else if let Some(msg) = info.payload().downcast_ref::<String>() {
            msg.as_str()
        } else {
            "unknown panic"
        };
        record_fatal(CrashKind::Panic, reason);

        #[cfg(target_os = "espidf")]
        restart();
    }));
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn alloc_failed_cb(size: usize, caps: u32, _function_name: *const core::ffi::c_char) {
    let mut reason = heapless::String::<64>::new();
    let _ = core::fmt::Write::write_fmt(&mut reason, format_args!("alloc of {} B failed (caps 0x{:X})", size, caps));
    record_fatal(CrashKind::AllocFailure, &reason);
    restart();
}

/// Register the heap allocation-failure hook.
#[cfg(target_os = "espidf")]
pub fn install_alloc_failure_handler() {
    // SAFETY: registers a static callback with the heap component.
    let ret = unsafe { esp_idf_svc::sys::heap_caps_register_failed_alloc_callback(Some(alloc_failed_cb)) };
    if ret != esp_idf_svc::sys::ESP_OK {
        log::warn!("alloc failure hook not registered ({})", ret);
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn install_alloc_failure_handler() {}
