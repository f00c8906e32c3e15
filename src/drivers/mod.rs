//! Radio and indicator drivers, hardware initialisation, and task helpers.

pub mod hw_init;
pub mod hw_timer;
pub mod led_patterns;
pub mod status_led;
pub mod sx126x;
pub mod task_pin;
pub mod watchdog;
