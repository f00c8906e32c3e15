//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements   | Connects to                     |
//! |------------|--------------|---------------------------------|
//! | `hardware` | BatteryPort  | ESP32 ADC (battery divider)     |
//! | `log_sink` | EventSink    | Serial log output               |
//! | `nvs`      | StoragePort  | NVS / in-memory store           |
//! | `time`     | ClockPort    | ESP32 system timer              |

pub mod hardware;
pub mod log_sink;
pub mod nvs;
pub mod time;
