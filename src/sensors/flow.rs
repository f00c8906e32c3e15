//! Hall-effect water flow meter (YF-S201 class, 450 pulses per litre).
//!
//! The GPIO ISR increments an atomic counter on each rising edge; the water
//! probe samples and resets it once per cycle to compute L/min.

use core::sync::atomic::{AtomicU32, Ordering};

/// Datasheet: f (Hz) = 7.5 × Q (L/min) → 450 pulses per litre.
pub const PULSES_PER_LITRE: f32 = 450.0;

/// `static` because ESP-IDF ISR callbacks cannot capture.
static FLOW_PULSE_COUNT: AtomicU32 = AtomicU32::new(0);

/// Called from the GPIO ISR on each rising edge.
pub fn flow_isr_handler() {
    FLOW_PULSE_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Inject pulses on the host.
#[cfg(not(target_os = "espidf"))]
pub fn sim_add_pulses(count: u32) {
    FLOW_PULSE_COUNT.fetch_add(count, Ordering::Relaxed);
}

/// Pulse-window flow meter.
pub struct FlowMeter {
    last_ms: Option<u64>,
}

impl FlowMeter {
    pub const fn new() -> Self {
        Self { last_ms: None }
    }

    /// Swap the counter to zero and return the flow over the window since
    /// the previous call, in L/min. The first call only opens a window.
    pub fn read(&mut self, now_ms: u64) -> f32 {
        let count = FLOW_PULSE_COUNT.swap(0, Ordering::Relaxed);
        let Some(last) = self.last_ms.replace(now_ms) else {
            return 0.0;
        };
        flow_lpm(count, now_ms.saturating_sub(last))
    }
}

impl Default for FlowMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Pulses counted over `elapsed_ms` converted to L/min.
pub fn flow_lpm(pulses: u32, elapsed_ms: u64) -> f32 {
    if elapsed_ms == 0 {
        return 0.0;
    }
    let minutes = elapsed_ms as f32 / 60_000.0;
    pulses as f32 / PULSES_PER_LITRE / minutes
}
