//! Fuzz target: uplink payload decoders and maintenance commands
//!
//! Feeds arbitrary bytes to every fixed-layout decoder and checks that
//! accepted frames re-encode to the same length.
//!
//! cargo fuzz run fuzz_payload_decoders

#![no_main]

use libfuzzer_sys::fuzz_target;
use nexusnode::app::commands::MaintenanceCommand;
use nexusnode::payload;

fuzz_target!(|data: &[u8]| {
    if let Ok(f) = payload::decode_universal(data) {
        assert_eq!(payload::encode_universal(&f).len(), data.len());
    }
    if let Ok(f) = payload::decode_compact(data) {
        // The fixed-point value survives a second pass unchanged.
        assert_eq!(payload::encode_compact(&f), data);
    }
    if let Ok(f) = payload::decode_electrical(data) {
        assert_eq!(payload::encode_electrical(&f).len(), payload::ELECTRICAL_LEN);
    }
    if let Ok(f) = payload::decode_water(data) {
        assert_eq!(payload::encode_water(&f).len(), payload::WATER_LEN);
    }
    let _ = payload::decode_electrical_alert(data);
    let _ = payload::decode_water_alert(data);
    let _ = MaintenanceCommand::decode(data);
});
