//! Uplink service: the application side of the radio.
//!
//! [`UplinkService`] owns the [`SessionManager`] and turns samples and
//! alerts into frames. It is driven by the uplink task only, so it holds
//! no locks of its own; everything it learns that other tasks need (the
//! widened interval after failures, the join-fault indicator) is returned
//! to the caller.
//!
//! ```text
//!  SensorSample ──▶ ┌──────────────────────┐ ──▶ RadioPort
//!  Alert ─────────▶ │    UplinkService     │
//!  ConfigStore ───▶ │  encode · join · DL  │ ──▶ EventSink
//!                   └──────────────────────┘
//! ```

use log::{debug, info, warn};

use crate::config::{ConfigStore, DeviceConfig};
use crate::error::{CodecError, Error, SessionError};
use crate::lorawan::{ports, JoinProgress, RadioParams, SendOutcome, SessionManager};
use crate::payload::{self, ElectricalFrame, ScalarFrame, WaterFrame};
use crate::runtime::channels::{Alert, SampleBody, SensorSample};

use super::commands::{CommandEffect, MaintenanceCommand};
use super::events::NodeEvent;
use super::ports::{ClockPort, EventSink, RadioPort};

/// Sampling interval while the network cannot be joined.
pub const JOIN_FAILED_INTERVAL_MS: u32 = 900_000;
/// Sampling interval after every send attempt failed.
pub const SEND_FAILED_INTERVAL_MS: u32 = 1_800_000;
/// From this spreading factor on, scalar readings use the 11-byte layout.
pub const COMPACT_FROM_SF: u8 = 11;

/// What happened to one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkOutcome {
    Sent { fcnt: u32 },
    /// The attempt failed; hand the same sample back after `wait_ms`.
    Retrying { wait_ms: u32 },
    /// Radio failures exhausted the retries; a backoff interval is pending.
    Deferred,
    /// The duty-cycle window had not elapsed; the sample was dropped.
    Throttled { remaining_ms: u64 },
    NotJoined,
}

pub struct UplinkService<R: RadioPort, C: ClockPort> {
    session: SessionManager<R, C>,
    config_version: Option<u32>,
    low_power: bool,
    join_fault: bool,
    join_rounds: u32,
    backoff_ms: Option<u32>,
    join_wait_ms: Option<u32>,
}

impl<R: RadioPort, C: ClockPort> UplinkService<R, C> {
    pub fn new(session: SessionManager<R, C>) -> Self {
        Self {
            session,
            config_version: None,
            low_power: false,
            join_fault: false,
            join_rounds: 0,
            backoff_ms: None,
            join_wait_ms: None,
        }
    }

    // ── Session ───────────────────────────────────────────────

    /// Make one join attempt unless a session already exists. Returns
    /// whether the node is joined afterwards. When it is not,
    /// [`take_backoff_ms`](Self::take_backoff_ms) (round failed) or
    /// [`take_join_wait_ms`](Self::take_join_wait_ms) (round in progress)
    /// says how long to wait.
    pub fn ensure_joined(&mut self, sink: &mut impl EventSink) -> bool {
        if self.session.is_joined() {
            return true;
        }
        self.session.wakeup();
        match self.session.join_attempt() {
            JoinProgress::Joined(dev_addr) => {
                self.join_rounds = 0;
                self.join_wait_ms = None;
                // A failed round may have degraded the radio; apply the
                // configured link again on the next sync.
                self.config_version = None;
                if self.join_fault {
                    info!("Uplink: join fault cleared");
                }
                self.join_fault = false;
                sink.emit(&NodeEvent::Joined { dev_addr });
                true
            }
            JoinProgress::Retry { wait_ms } => {
                self.join_wait_ms = Some(wait_ms);
                false
            }
            JoinProgress::RoundFailed => {
                self.join_rounds = self.join_rounds.saturating_add(1);
                if !self.join_fault {
                    warn!("Uplink: join fault raised (round {})", self.join_rounds);
                }
                self.join_fault = true;
                self.join_wait_ms = None;
                self.backoff_ms = Some(JOIN_FAILED_INTERVAL_MS);
                sink.emit(&NodeEvent::JoinRoundFailed {
                    round: self.join_rounds,
                });
                false
            }
        }
    }

    /// Apply radio settings from a configuration version not seen yet.
    pub fn sync_config(&mut self, store: &ConfigStore) -> Result<(), Error> {
        let (version, cfg) = store.versioned();
        if self.config_version == Some(version) {
            return Ok(());
        }
        self.session.apply_link(cfg.spreading_factor, cfg.tx_power_dbm)?;
        if cfg.low_power != self.low_power {
            info!("Uplink: low-power {}", if cfg.low_power { "on" } else { "off" });
        }
        self.low_power = cfg.low_power;
        self.config_version = Some(version);
        Ok(())
    }

    // ── Telemetry ─────────────────────────────────────────────

    /// Encode and send one sample under the duty-cycle gate.
    pub fn handle_sample(
        &mut self,
        sample: &SensorSample,
        cfg: &DeviceConfig,
        sink: &mut impl EventSink,
    ) -> Result<UplinkOutcome, Error> {
        if !self.session.is_joined() {
            return Ok(UplinkOutcome::NotJoined);
        }
        self.session.wakeup();

        let (bytes, port) = encode_sample(sample, cfg, self.session.params())?;
        let outcome = match self.session.send(&bytes, port) {
            Ok(SendOutcome::Sent { fcnt }) => {
                sink.emit(&NodeEvent::UplinkSent { port, fcnt });
                UplinkOutcome::Sent { fcnt }
            }
            Ok(SendOutcome::Retry { wait_ms }) => UplinkOutcome::Retrying { wait_ms },
            Ok(SendOutcome::Deferred { .. } | SendOutcome::Beacon) => {
                self.backoff_ms = Some(SEND_FAILED_INTERVAL_MS);
                sink.emit(&NodeEvent::UplinkDeferred {
                    port,
                    next_interval_ms: SEND_FAILED_INTERVAL_MS,
                });
                UplinkOutcome::Deferred
            }
            Err(SessionError::DutyCycle { remaining_ms }) => {
                debug!("Uplink: sample {} dropped, duty cycle ({} ms left)", sample.seq, remaining_ms);
                UplinkOutcome::Throttled { remaining_ms }
            }
            Err(SessionError::NotJoined) => UplinkOutcome::NotJoined,
            Err(e) => return Err(e.into()),
        };
        Ok(outcome)
    }

    /// Send an alert now. Returns whether it went on air.
    pub fn handle_alert(&mut self, alert: &Alert, sink: &mut impl EventSink) -> Result<bool, Error> {
        let outcome = self.session.send_emergency(&alert.payload, alert.port)?;
        let delivered = matches!(outcome, SendOutcome::Sent { .. } | SendOutcome::Beacon);
        sink.emit(&NodeEvent::EmergencySent {
            port: alert.port,
            mask: alert.mask,
            delivered,
        });
        Ok(delivered)
    }

    // ── Downlink ──────────────────────────────────────────────

    /// Handle at most one pending downlink.
    pub fn poll_downlink(&mut self, store: &ConfigStore, sink: &mut impl EventSink) -> Option<CommandEffect> {
        let dl = match self.session.process() {
            Ok(Some(dl)) => dl,
            Ok(None) => return None,
            Err(e) => {
                warn!("Uplink: downlink rejected: {}", e);
                return None;
            }
        };
        if dl.port != ports::MAINTENANCE {
            debug!("Uplink: ignoring downlink on port {}", dl.port);
            return None;
        }
        let cmd = match MaintenanceCommand::decode(&dl.payload) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!("Uplink: bad maintenance command: {}", e);
                return None;
            }
        };
        match cmd.apply(store) {
            Ok(effect) => {
                match effect {
                    CommandEffect::ConfigChanged { version } => {
                        sink.emit(&NodeEvent::ConfigChanged { version });
                    }
                    CommandEffect::Rejoin => self.session.reset(),
                    CommandEffect::ResetTotalizer => {}
                }
                Some(effect)
            }
            Err(e) => {
                warn!("Uplink: {:?} rejected: {}", cmd, e);
                None
            }
        }
    }

    // ── Power ─────────────────────────────────────────────────

    /// Called between cycles. In low-power mode the radio sleeps.
    pub fn idle(&mut self) {
        if self.low_power {
            self.session.sleep();
        }
    }

    // ── Queries ───────────────────────────────────────────────

    /// One-shot interval override produced by a failed join or send.
    pub fn take_backoff_ms(&mut self) -> Option<u32> {
        self.backoff_ms.take()
    }

    /// Wait before the next attempt of a join round in progress.
    pub fn take_join_wait_ms(&mut self) -> Option<u32> {
        self.join_wait_ms.take()
    }

    pub fn join_fault(&self) -> bool {
        self.join_fault
    }

    pub fn session(&self) -> &SessionManager<R, C> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionManager<R, C> {
        &mut self.session
    }
}

/// Pick the layout and port for a sample.
pub fn encode_sample(
    sample: &SensorSample,
    cfg: &DeviceConfig,
    params: &RadioParams,
) -> Result<(heapless::Vec<u8, { payload::ELECTRICAL_LEN }>, u8), CodecError> {
    let timestamp = (sample.timestamp_ms / 1000) as u32;
    let battery = sample.battery;
    let (port, written) = match &sample.body {
        SampleBody::Scalar(reading) => {
            let frame = ScalarFrame {
                sector_id: cfg.sector_id,
                node_id: cfg.node_id,
                sensor_type: reading.sensor_type,
                battery,
                value: reading.value,
                timestamp,
                sequence: sample.seq as u8,
            };
            let bytes = if params.spreading_factor >= COMPACT_FROM_SF {
                heapless::Vec::from_slice(&payload::encode_compact(&frame))
            } else {
                heapless::Vec::from_slice(&payload::encode_universal(&frame))
            };
            (ports::TELEMETRY, bytes)
        }
        SampleBody::Electrical(m) => {
            let frame = ElectricalFrame::from_measurement(m, cfg.sector_id, cfg.node_id, battery, timestamp);
            (ports::ELECTRICAL, heapless::Vec::from_slice(&payload::encode_electrical(&frame)))
        }
        SampleBody::Water(m) => {
            let frame = WaterFrame::from_measurement(m, cfg.sector_id, cfg.node_id, battery);
            (ports::WATER, heapless::Vec::from_slice(&payload::encode_water(&frame)))
        }
    };
    let bytes = written.map_err(|_| CodecError::BufferTooSmall)?;
    Ok((bytes, port))
}
