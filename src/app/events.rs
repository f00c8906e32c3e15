//! Outbound node events.
//!
//! Task loops and controllers emit these through the
//! [`EventSink`](super::ports::EventSink) port. Adapters on the other side
//! decide what to do with them: log to serial, count them, or record them
//! in tests.

use crate::config::Sector;
use crate::power::PowerTier;

/// Structured events emitted by the node core.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// Boot finished; tasks are about to start.
    Started { sector: Sector, node_id: u8 },

    /// A LoRaWAN session was established.
    Joined { dev_addr: u32 },

    /// A join round failed; the radio has been degraded.
    JoinRoundFailed { round: u32 },

    /// A telemetry uplink went on air.
    UplinkSent { port: u8, fcnt: u32 },

    /// All send attempts failed; the next interval was widened.
    UplinkDeferred { port: u8, next_interval_ms: u32 },

    /// An emergency frame was sent (or attempted).
    EmergencySent { port: u8, mask: u8, delivered: bool },

    /// A leak episode started.
    LeakDetected { pressure_bar: f32, trend_bar: f32 },

    /// The battery tier changed and a new configuration was published.
    PowerTier { tier: PowerTier, battery: u8 },

    /// The sample queue was full and has been reset.
    QueueReset { dropped: usize },

    /// The sensor bus was busy; this acquisition cycle was skipped.
    BusSkipped,

    /// A maintenance downlink changed the configuration.
    ConfigChanged { version: u32 },
}
