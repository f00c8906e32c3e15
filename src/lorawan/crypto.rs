//! Session key derivation, payload cipher and frame integrity code.
//!
//! - Payload: AES-128 in counter mode. The counter block follows the
//!   LoRaWAN `A_i` layout, so every (direction, DevAddr, FCnt) tuple gets an
//!   independent keystream.
//! - MIC: HMAC-SHA256 keyed with the network session key, truncated to
//!   4 bytes.
//! - Keys: HMAC-SHA256 over the join nonces with a per-key label,
//!   truncated to 128 bits.

use aes::Aes128;
use ctr::Ctr128BE;
use ctr::cipher::{KeyIvInit, StreamCipher};

type Aes128Ctr = Ctr128BE<Aes128>;

pub type Key = [u8; 16];
pub type Mic = [u8; 4];

/// Transfer direction, mixed into cipher counters and MICs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    Up = 0,
    Down = 1,
}

const LABEL_NWK_SKEY: u8 = 0x01;
const LABEL_APP_SKEY: u8 = 0x02;
const LABEL_JOIN_MIC: u8 = 0x4A;
const LABEL_FRAME_MIC: u8 = 0x49;

/// Keys of an established session. Zeroed on drop of the session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub nwk_skey: Key,
    pub app_skey: Key,
}

impl SessionKeys {
    pub const fn zeroed() -> Self {
        Self {
            nwk_skey: [0; 16],
            app_skey: [0; 16],
        }
    }

    /// Overwrite both keys with zeros.
    pub fn wipe(&mut self) {
        self.nwk_skey.fill(0);
        self.app_skey.fill(0);
    }
}

impl core::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SessionKeys { .. }")
    }
}

/// Derive session keys from the root key and the join exchange values.
pub fn derive_session_keys(app_key: &Key, app_nonce: [u8; 3], net_id: [u8; 3], dev_nonce: u16) -> SessionKeys {
    let derive = |label: u8| -> Key {
        let mut h = hmac_sha256::HMAC::new(app_key);
        h.update([label]);
        h.update(app_nonce);
        h.update(net_id);
        h.update(dev_nonce.to_le_bytes());
        let tag = h.finalize();
        let mut key = [0u8; 16];
        key.copy_from_slice(&tag[..16]);
        key
    };
    SessionKeys {
        nwk_skey: derive(LABEL_NWK_SKEY),
        app_skey: derive(LABEL_APP_SKEY),
    }
}

/// MIC over a join request/accept, keyed with the root key.
pub fn join_mic(app_key: &Key, msg: &[u8]) -> Mic {
    let mut h = hmac_sha256::HMAC::new(app_key);
    h.update([LABEL_JOIN_MIC]);
    h.update(msg);
    truncate(h.finalize())
}

/// MIC over a data frame (everything before the MIC field).
pub fn frame_mic(nwk_skey: &Key, dir: Direction, dev_addr: u32, fcnt: u32, msg: &[u8]) -> Mic {
    let mut h = hmac_sha256::HMAC::new(nwk_skey);
    h.update([LABEL_FRAME_MIC, dir as u8]);
    h.update(dev_addr.to_le_bytes());
    h.update(fcnt.to_le_bytes());
    h.update(msg);
    truncate(h.finalize())
}

/// Constant-time MIC comparison.
pub fn mic_matches(expected: &Mic, received: &[u8]) -> bool {
    if received.len() != expected.len() {
        return false;
    }
    let diff = expected
        .iter()
        .zip(received)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    diff == 0
}

/// Encrypt or decrypt an application payload in place.
pub fn apply_payload_cipher(app_skey: &Key, dir: Direction, dev_addr: u32, fcnt: u32, data: &mut [u8]) {
    let mut block = [0u8; 16];
    block[0] = 0x01;
    block[5] = dir as u8;
    block[6..10].copy_from_slice(&dev_addr.to_le_bytes());
    block[10..14].copy_from_slice(&fcnt.to_le_bytes());
    block[15] = 0x01;

    let mut cipher = Aes128Ctr::new(app_skey.into(), &block.into());
    cipher.apply_keystream(data);
}

fn truncate(tag: [u8; 32]) -> Mic {
    [tag[0], tag[1], tag[2], tag[3]]
}
