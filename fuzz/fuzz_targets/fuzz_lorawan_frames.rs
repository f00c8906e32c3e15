//! Fuzz target: join-accept and downlink parsing
//!
//! Arbitrary radio bytes must be rejected with a typed error, never a
//! panic, and anything accepted must carry our DevAddr.
//!
//! cargo fuzz run fuzz_lorawan_frames

#![no_main]

use libfuzzer_sys::fuzz_target;
use nexusnode::lorawan::crypto::{derive_session_keys, Direction};
use nexusnode::lorawan::frame::{parse_data_frame, parse_join_accept, MAX_PAYLOAD};
use nexusnode::lorawan::Credentials;

const DEV_ADDR: u32 = 0x2601_1F2E;

fuzz_target!(|data: &[u8]| {
    let creds = Credentials::factory();
    let _ = parse_join_accept(data, &creds.app_key);

    let keys = derive_session_keys(&creds.app_key, [1, 2, 3], [0, 0, 0x13], 1);
    let base = data.first().map_or(0, |b| u32::from(*b) << 16);
    if let Ok(dl) = parse_data_frame(data, &keys, Direction::Down, DEV_ADDR, base) {
        assert_eq!(dl.dev_addr, DEV_ADDR);
        assert!(dl.payload.len() <= MAX_PAYLOAD);
        assert!(dl.fcnt >= base);
    }
});
