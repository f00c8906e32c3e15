//! Application core: port traits, domain events, the uplink service and
//! maintenance commands.
//!
//! Nothing here touches hardware. Radios, clocks, storage and sensors come
//! in through the traits in [`ports`], so every rule can be exercised on
//! the host with mocks.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
