//! Electrical sampling timer using ESP-IDF's esp_timer API.
//!
//! A 2 kHz periodic timer reads the voltage and current channels and pushes
//! the pair into [`ADC_BLOCKS`]. The callback runs in the ESP timer task
//! context and never blocks: a full block is swapped, never waited on.

use crate::drivers::hw_init::{self, ADC1_CH_CURRENT, ADC1_CH_VOLTAGE};
use crate::runtime::channels::ADC_BLOCKS;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
use log::info;

#[cfg(target_os = "espidf")]
static mut SAMPLE_TIMER: esp_timer_handle_t = core::ptr::null_mut();

/// SAFETY: SAMPLE_TIMER is written once in `start_sampling()` before any
/// callback fires.
#[cfg(target_os = "espidf")]
unsafe fn sample_timer() -> esp_timer_handle_t {
    unsafe { SAMPLE_TIMER }
}

/// One sampling tick: read both channels and append the pair.
pub fn sample_tick() {
    let v = hw_init::adc1_read(ADC1_CH_VOLTAGE);
    let i = hw_init::adc1_read(ADC1_CH_CURRENT);
    ADC_BLOCKS.push_pair(v, i);
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn sample_tick_cb(_arg: *mut core::ffi::c_void) {
    sample_tick();
}

/// Start the electrical sampling timer at `period_us`.
#[cfg(target_os = "espidf")]
pub fn start_sampling(period_us: u64) {
    // SAFETY: SAMPLE_TIMER is written here once at boot before the callback
    // can fire; the callback only touches the lock-free double buffer.
    unsafe {
        let args = esp_timer_create_args_t {
            callback: Some(sample_tick_cb),
            arg: core::ptr::null_mut(),
            dispatch_method: esp_timer_dispatch_t_ESP_TIMER_TASK,
            name: b"adc\0".as_ptr() as *const _,
            skip_unhandled_events: true,
        };
        let ret = esp_timer_create(&args, &raw mut SAMPLE_TIMER);
        if ret != ESP_OK {
            log::error!("hw_timer: sampling timer create failed (rc={})", ret);
            return;
        }
        let ret = esp_timer_start_periodic(sample_timer(), period_us);
        if ret != ESP_OK {
            log::error!("hw_timer: sampling timer start failed (rc={})", ret);
            return;
        }
        info!("hw_timer: electrical sampling every {} us", period_us);
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn start_sampling(_period_us: u64) {
    log::info!("hw_timer(sim): sampling driven by sample_tick()");
}

/// Stop the sampling timer.
#[cfg(target_os = "espidf")]
pub fn stop_sampling() {
    // SAFETY: null-checked handle created by start_sampling().
    unsafe {
        let t = sample_timer();
        if !t.is_null() {
            esp_timer_stop(t);
        }
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn stop_sampling() {}
