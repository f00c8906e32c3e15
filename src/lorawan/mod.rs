//! LoRaWAN Class A client: OTAA join, uplinks, alert bypass, downlinks.
//!
//! ```text
//!   uplink task ──▶ SessionManager ──▶ frame (layout + MIC) ──▶ RadioPort
//!                        │                 │
//!                        │                 └── crypto (AES-CTR, HMAC-SHA256)
//!                        └── duty-cycle gate, retry, degrade
//! ```

pub mod crypto;
pub mod frame;
pub mod radio;
pub mod session;

pub use radio::{Bandwidth, CodingRate, RadioParams};
pub use session::{Credentials, JoinProgress, SendOutcome, SessionManager, SessionPolicy, SessionState};

/// Application ports used on the uplink.
pub mod ports {
    /// Universal and LoRaWAN-only telemetry.
    pub const TELEMETRY: u8 = 1;
    pub const ELECTRICAL: u8 = 10;
    pub const WATER: u8 = 20;
    pub const EMERGENCY_WATER: u8 = 98;
    pub const EMERGENCY_ELECTRICAL: u8 = 99;
    /// Downlink maintenance commands.
    pub const MAINTENANCE: u8 = 200;

    /// Alerts skip the duty-cycle gate and the sample queue.
    pub const fn is_emergency(port: u8) -> bool {
        matches!(port, EMERGENCY_WATER | EMERGENCY_ELECTRICAL)
    }
}
