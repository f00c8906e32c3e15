//! Integration test driver for `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises one subsystem against
//! the mock adapters in `mock_hw`. Everything runs on the host; no radio,
//! bus or flash is required.

mod leak_flow_tests;
mod mock_hw;
mod power_tests;
mod uplink_service_tests;
