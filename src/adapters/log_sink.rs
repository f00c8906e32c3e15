//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by rendering each [`NodeEvent`] as one line on
//! the ESP-IDF logger (UART / USB-CDC in production).

use log::{info, warn};

use crate::app::events::NodeEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`NodeEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &NodeEvent) {
        match event {
            NodeEvent::Started { sector, node_id } => {
                info!("START | sector={:?} node={}", sector, node_id);
            }
            NodeEvent::Joined { dev_addr } => info!("JOIN  | DevAddr={:08X}", dev_addr),
            NodeEvent::JoinRoundFailed { round } => {
                warn!("JOIN  | round {} failed, radio degraded", round);
            }
            NodeEvent::UplinkSent { port, fcnt } => info!("UP    | port={} fcnt={}", port, fcnt),
            NodeEvent::UplinkDeferred { port, next_interval_ms } => {
                warn!("UP    | port={} deferred, next interval {} s", port, next_interval_ms / 1000);
            }
            NodeEvent::EmergencySent { port, mask, delivered } => {
                warn!("ALERT | port={} mask=0b{:08b} delivered={}", port, mask, delivered);
            }
            NodeEvent::LeakDetected { pressure_bar, trend_bar } => {
                warn!("LEAK  | p={:.2} bar trend={:+.2} bar/window", pressure_bar, trend_bar);
            }
            NodeEvent::PowerTier { tier, battery } => info!("POWER | tier={:?} battery={}%", tier, battery),
            NodeEvent::QueueReset { dropped } => warn!("QUEUE | full, dropped {} samples", dropped),
            NodeEvent::BusSkipped => warn!("BUS   | busy, cycle skipped"),
            NodeEvent::ConfigChanged { version } => info!("CFG   | now version {}", version),
        }
    }
}
