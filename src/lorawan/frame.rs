//! Over-the-air frame layouts.
//!
//! ```text
//! Join request  (23 B): MHDR | AppEUI(8, LSB first) | DevEUI(8, LSB first) | DevNonce(2 LE) | MIC(4)
//! Join accept   (17 B): MHDR | AppNonce(3) | NetID(3) | DevAddr(4 LE) | DLSettings | RxDelay | MIC(4)
//! Data frame (13+N B): MHDR | DevAddr(4 LE) | FCtrl | FCnt(2 LE) | FPort | FRMPayload(N) | MIC(4)
//! Alert beacon        : 0xE0 | DevEUI(8, LSB first) | FPort | payload        (no session needed)
//! ```

use heapless::Vec;

use super::crypto::{self, Direction, Key, SessionKeys};
use crate::error::SessionError;

pub const MHDR_JOIN_REQUEST: u8 = 0x00;
pub const MHDR_JOIN_ACCEPT: u8 = 0x20;
pub const MHDR_UNCONFIRMED_UP: u8 = 0x40;
pub const MHDR_UNCONFIRMED_DOWN: u8 = 0x60;
pub const MHDR_PROPRIETARY: u8 = 0xE0;

pub const JOIN_REQUEST_LEN: usize = 23;
pub const JOIN_ACCEPT_LEN: usize = 17;
/// Header, FPort and MIC bytes around the application payload.
pub const FRAME_OVERHEAD: usize = 13;
/// Largest application payload accepted by [`data_frame`].
pub const MAX_PAYLOAD: usize = 242;
pub const MAX_FRAME: usize = MAX_PAYLOAD + FRAME_OVERHEAD;

pub type Frame = Vec<u8, MAX_FRAME>;

// ── Join ──────────────────────────────────────────────────────

/// Build a join request. EUIs are given MSB first, as printed on labels.
pub fn join_request(app_eui: &[u8; 8], dev_eui: &[u8; 8], dev_nonce: u16, app_key: &Key) -> [u8; JOIN_REQUEST_LEN] {
    let mut out = [0u8; JOIN_REQUEST_LEN];
    out[0] = MHDR_JOIN_REQUEST;
    for (dst, src) in out[1..9].iter_mut().zip(app_eui.iter().rev()) {
        *dst = *src;
    }
    for (dst, src) in out[9..17].iter_mut().zip(dev_eui.iter().rev()) {
        *dst = *src;
    }
    out[17..19].copy_from_slice(&dev_nonce.to_le_bytes());
    let mic = crypto::join_mic(app_key, &out[..19]);
    out[19..].copy_from_slice(&mic);
    out
}

/// Fields carried by a join accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinAccept {
    pub app_nonce: [u8; 3],
    pub net_id: [u8; 3],
    pub dev_addr: u32,
    pub dl_settings: u8,
    pub rx_delay: u8,
}

/// Serialise a join accept (network side; used by the simulated network).
pub fn join_accept(accept: &JoinAccept, app_key: &Key) -> [u8; JOIN_ACCEPT_LEN] {
    let mut out = [0u8; JOIN_ACCEPT_LEN];
    out[0] = MHDR_JOIN_ACCEPT;
    out[1..4].copy_from_slice(&accept.app_nonce);
    out[4..7].copy_from_slice(&accept.net_id);
    out[7..11].copy_from_slice(&accept.dev_addr.to_le_bytes());
    out[11] = accept.dl_settings;
    out[12] = accept.rx_delay;
    let mic = crypto::join_mic(app_key, &out[..13]);
    out[13..].copy_from_slice(&mic);
    out
}

/// Parse and authenticate a join accept.
pub fn parse_join_accept(frame: &[u8], app_key: &Key) -> Result<JoinAccept, SessionError> {
    if frame.len() < JOIN_ACCEPT_LEN || frame[0] != MHDR_JOIN_ACCEPT {
        return Err(SessionError::InvalidFrame);
    }
    let expected = crypto::join_mic(app_key, &frame[..13]);
    if !crypto::mic_matches(&expected, &frame[13..17]) {
        return Err(SessionError::MicMismatch);
    }
    Ok(JoinAccept {
        app_nonce: [frame[1], frame[2], frame[3]],
        net_id: [frame[4], frame[5], frame[6]],
        dev_addr: u32::from_le_bytes([frame[7], frame[8], frame[9], frame[10]]),
        dl_settings: frame[11],
        rx_delay: frame[12],
    })
}

// ── Data frames ───────────────────────────────────────────────

/// Build an encrypted, MIC-protected data frame.
pub fn data_frame(
    keys: &SessionKeys,
    dir: Direction,
    dev_addr: u32,
    fcnt: u32,
    port: u8,
    payload: &[u8],
) -> Result<Frame, SessionError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(SessionError::PayloadTooLarge);
    }
    let mhdr = match dir {
        Direction::Up => MHDR_UNCONFIRMED_UP,
        Direction::Down => MHDR_UNCONFIRMED_DOWN,
    };

    let [a0, a1, a2, a3] = dev_addr.to_le_bytes();
    let [f0, f1] = (fcnt as u16).to_le_bytes();
    // FCtrl 0x00: no ADR, no ACK, no FOpts.
    let header = [mhdr, a0, a1, a2, a3, 0x00, f0, f1, port];

    let mut frame = Frame::new();
    put(&mut frame, &header)?;
    let start = frame.len();
    put(&mut frame, payload)?;
    crypto::apply_payload_cipher(&keys.app_skey, dir, dev_addr, fcnt, &mut frame[start..]);

    let mic = crypto::frame_mic(&keys.nwk_skey, dir, dev_addr, fcnt, &frame);
    put(&mut frame, &mic)?;
    Ok(frame)
}

/// A verified, decrypted data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub dev_addr: u32,
    /// Full 32-bit counter reconstructed from the 16 bits on air.
    pub fcnt: u32,
    pub port: u8,
    pub payload: Vec<u8, MAX_PAYLOAD>,
}

/// Verify and decrypt a data frame addressed to `dev_addr`.
///
/// `fcnt_base` is the last counter known for this direction; the upper
/// 16 bits are recovered from it.
pub fn parse_data_frame(
    frame: &[u8],
    keys: &SessionKeys,
    dir: Direction,
    dev_addr: u32,
    fcnt_base: u32,
) -> Result<DataFrame, SessionError> {
    let mhdr = match dir {
        Direction::Up => MHDR_UNCONFIRMED_UP,
        Direction::Down => MHDR_UNCONFIRMED_DOWN,
    };
    if frame.len() < FRAME_OVERHEAD || frame[0] != mhdr {
        return Err(SessionError::InvalidFrame);
    }
    let addr = u32::from_le_bytes([frame[1], frame[2], frame[3], frame[4]]);
    if addr != dev_addr {
        return Err(SessionError::InvalidFrame);
    }
    if frame[5] & 0x0F != 0 {
        // FOpts are not supported.
        return Err(SessionError::InvalidFrame);
    }
    let fcnt = reconstruct_fcnt(fcnt_base, u16::from_le_bytes([frame[6], frame[7]]));
    let port = frame[8];

    let mic_at = frame.len() - 4;
    let expected = crypto::frame_mic(&keys.nwk_skey, dir, dev_addr, fcnt, &frame[..mic_at]);
    if !crypto::mic_matches(&expected, &frame[mic_at..]) {
        return Err(SessionError::MicMismatch);
    }

    let mut payload = Vec::new();
    payload
        .extend_from_slice(&frame[9..mic_at])
        .map_err(|_| SessionError::PayloadTooLarge)?;
    crypto::apply_payload_cipher(&keys.app_skey, dir, dev_addr, fcnt, &mut payload);

    Ok(DataFrame {
        dev_addr: addr,
        fcnt,
        port,
        payload,
    })
}

/// Unauthenticated alert beacon for use before a session exists.
pub fn alert_beacon(dev_eui: &[u8; 8], port: u8, payload: &[u8]) -> Result<Frame, SessionError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(SessionError::PayloadTooLarge);
    }
    let mut eui = *dev_eui;
    eui.reverse();

    let mut frame = Frame::new();
    put(&mut frame, &[MHDR_PROPRIETARY])?;
    put(&mut frame, &eui)?;
    put(&mut frame, &[port])?;
    put(&mut frame, payload)?;
    Ok(frame)
}

fn put(frame: &mut Frame, bytes: &[u8]) -> Result<(), SessionError> {
    frame
        .extend_from_slice(bytes)
        .map_err(|_| SessionError::PayloadTooLarge)
}

fn reconstruct_fcnt(base: u32, low: u16) -> u32 {
    let candidate = (base & 0xFFFF_0000) | u32::from(low);
    if candidate < base {
        candidate.wrapping_add(0x1_0000)
    } else {
        candidate
    }
}
