//! NexusNode firmware library.
//!
//! Exposes the pure-logic modules for integration testing and fuzzing.
//! All ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module; on the host the same code runs against simulated
//! peripherals.

#![deny(unused_must_use)]

pub mod config;
pub mod diagnostics;
pub mod dsp;
pub mod error;
pub mod leak;
pub mod lorawan;
pub mod payload;
pub mod power;
pub mod runtime;
pub mod safety;
pub mod scheduler;

pub mod app;
pub mod pins;

pub mod adapters;
pub mod drivers;
pub mod sensors;

pub use error::{Error, Result};
