//! Task Watchdog Timer (TWDT) driver.
//!
//! Every long-running task subscribes itself and must call `feed()` at least
//! once per [`TIMEOUT_MS`]. Tasks whose cycle is longer than that wait in
//! slices and feed between them (see `runtime::tasks`).

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// Watchdog timeout. Covers one full join round.
pub const TIMEOUT_MS: u32 = 60_000;
/// Longest uninterrupted wait a subscribed task may take.
pub const FEED_SLICE_MS: u32 = 10_000;

pub struct Watchdog {
    #[cfg(target_os = "espidf")]
    subscribed: bool,
}

impl Watchdog {
    /// Configure the TWDT. Call once from `main` before tasks subscribe.
    #[cfg(target_os = "espidf")]
    pub fn configure() {
        // SAFETY: plain FFI call with a fully initialised config.
        let ret = unsafe {
            esp_task_wdt_reconfigure(&esp_task_wdt_config_t {
                timeout_ms: TIMEOUT_MS,
                idle_core_mask: 0,
                trigger_panic: true,
            })
        };
        if ret != ESP_OK {
            log::warn!("TWDT reconfigure returned {} (may already be configured)", ret);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn configure() {}

    /// Subscribe the calling task.
    pub fn subscribe(task: &str) -> Self {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: a null handle subscribes the calling FreeRTOS task.
            let ret = unsafe { esp_task_wdt_add(core::ptr::null_mut()) };
            let subscribed = ret == ESP_OK;
            if subscribed {
                log::info!("Watchdog: '{}' subscribed ({} ms)", task, TIMEOUT_MS);
            } else {
                log::warn!("Watchdog: '{}' failed to subscribe ({})", task, ret);
            }
            Self { subscribed }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            log::debug!("Watchdog(sim): '{}' no-op", task);
            Self {}
        }
    }

    /// Feed the watchdog for the calling task.
    pub fn feed(&self) {
        #[cfg(target_os = "espidf")]
        if self.subscribed {
            // SAFETY: resets the calling task's TWDT entry.
            unsafe {
                esp_task_wdt_reset();
            }
        }
    }
}
