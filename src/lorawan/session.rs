//! LoRaWAN session manager.
//!
//! ```text
//!        join_attempt() ok
//!   Idle ──────────────▶ Joined ◀──────────── Sending
//!    ▲  ╲                 │  ▲                  ▲
//!    │   ╲ join_attempt() │  │ wakeup()         │ send()
//!    │    ▼               ▼  │                  │
//!    │  Joining         Sleep                   │
//!    │    │ round failed                        │
//!    └────┘   (radio degraded, retried forever) │
//! ```
//!
//! Join and send retries are driven by the caller: each call makes one
//! attempt and reports how long to wait before the next, so the uplink
//! task can put alerts on air in between.
//!
//! The manager owns the radio. It is driven by the uplink task only, so it
//! needs no internal locking; alerts reach it through their own channel.

use log::{debug, error, info, warn};

use super::crypto::{self, Direction, Key, SessionKeys};
use super::frame::{self, DataFrame, JoinAccept, MAX_FRAME, MAX_PAYLOAD};
use super::radio::RadioParams;
use crate::app::ports::{ClockPort, RadioPort, StorageError, StoragePort};
use crate::error::SessionError;

/// Device identity and root key.
#[derive(Clone)]
pub struct Credentials {
    /// MSB first, as printed on the device label.
    pub dev_eui: [u8; 8],
    /// MSB first.
    pub app_eui: [u8; 8],
    pub app_key: Key,
}

impl Credentials {
    /// Provisioning defaults used until NVS credentials are written.
    pub const fn factory() -> Self {
        Self {
            dev_eui: [0x70, 0xB3, 0xD5, 0x7E, 0xD0, 0x06, 0x12, 0x34],
            app_eui: [0x70, 0xB3, 0xD5, 0x7E, 0xD0, 0x06, 0x00, 0x01],
            app_key: [
                0x2B, 0x7E, 0x15, 0x16, 0x28, 0xAE, 0xD2, 0xA6, 0xAB, 0xF7, 0x15, 0x88, 0x09, 0xCF, 0x4F,
                0x3C,
            ],
        }
    }
}

/// NVS namespace holding provisioned credentials.
pub const CREDENTIALS_NAMESPACE: &str = "lora";
const CREDENTIALS_KEY: &str = "otaa";
/// DevEUI, AppEUI, AppKey back to back.
const CREDENTIALS_LEN: usize = 32;

impl Credentials {
    /// Provisioned credentials, or the factory set if none are stored.
    pub fn load(storage: &dyn StoragePort) -> Self {
        let mut buf = [0u8; CREDENTIALS_LEN];
        match storage.read(CREDENTIALS_NAMESPACE, CREDENTIALS_KEY, &mut buf) {
            Ok(CREDENTIALS_LEN) => {
                let mut creds = Self::factory();
                creds.dev_eui.copy_from_slice(&buf[..8]);
                creds.app_eui.copy_from_slice(&buf[8..16]);
                creds.app_key.copy_from_slice(&buf[16..]);
                info!("LoRaWAN: provisioned credentials loaded");
                creds
            }
            Ok(n) => {
                warn!("LoRaWAN: credential blob is {} bytes, using factory set", n);
                Self::factory()
            }
            Err(_) => {
                info!("LoRaWAN: no provisioned credentials, using factory set");
                Self::factory()
            }
        }
    }

    pub fn store(&self, storage: &mut dyn StoragePort) -> Result<(), StorageError> {
        let mut buf = [0u8; CREDENTIALS_LEN];
        buf[..8].copy_from_slice(&self.dev_eui);
        buf[8..16].copy_from_slice(&self.app_eui);
        buf[16..].copy_from_slice(&self.app_key);
        storage.write(CREDENTIALS_NAMESPACE, CREDENTIALS_KEY, &buf)
    }
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("dev_eui", &self.dev_eui)
            .field("app_eui", &self.app_eui)
            .finish_non_exhaustive()
    }
}

/// Timing and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// How long to listen for a join accept after each request.
    pub join_timeout_ms: u32,
    /// Join requests per round before the radio is degraded.
    pub join_attempts: u8,
    /// Wait between the join attempts of one round.
    pub join_backoff_ms: u32,
    pub send_attempts: u8,
    pub send_retry_delay_ms: u32,
    /// Minimum spacing of normal uplinks (duty-cycle budget).
    pub min_tx_interval_ms: u32,
    /// Receive window opened after each uplink; 0 disables downlinks.
    pub rx_window_ms: u32,
}

impl SessionPolicy {
    pub const fn factory() -> Self {
        Self {
            join_timeout_ms: 5_000,
            join_attempts: 3,
            join_backoff_ms: 10_000,
            send_attempts: 3,
            send_retry_delay_ms: 5_000,
            min_tx_interval_ms: 99_000,
            rx_window_ms: 1_000,
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::factory()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Joining,
    Joined,
    Sending,
    Sleep,
}

/// Result of a send that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Frame went on air with this uplink counter.
    Sent { fcnt: u32 },
    /// Every attempt failed; the caller should widen its next interval.
    Deferred { attempts: u8 },
    /// Alert sent as an unauthenticated beacon (no session yet).
    Beacon,
    /// This attempt failed; call `send` again with the same payload after
    /// `wait_ms`.
    Retry { wait_ms: u32 },
}

/// Result of one join attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinProgress {
    Joined(u32),
    /// No accept yet; make the next attempt of this round after `wait_ms`.
    Retry { wait_ms: u32 },
    /// The last attempt of the round failed and the radio is degraded.
    RoundFailed,
}

struct Session {
    dev_addr: u32,
    keys: SessionKeys,
    fcnt_up: u32,
    fcnt_down: Option<u32>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.keys.wipe();
    }
}

/// Default link metrics before anything has been received.
const RSSI_UNKNOWN: i16 = -100;
const SNR_UNKNOWN: i8 = -20;

/// Join/send/sleep state machine over a [`RadioPort`].
pub struct SessionManager<R: RadioPort, C: ClockPort> {
    radio: R,
    clock: C,
    creds: Credentials,
    policy: SessionPolicy,
    params: RadioParams,
    state: SessionState,
    session: Option<Session>,
    dev_nonce: u16,
    last_tx_ms: Option<u64>,
    failed_join_rounds: u32,
    /// Attempts made in the current join round.
    round_attempts: u8,
    /// Consecutive failed attempts of the current uplink.
    send_failures: u8,
    degraded: bool,
    rssi: i16,
    snr: i8,
    pending_downlink: Option<DataFrame>,
}

impl<R: RadioPort, C: ClockPort> SessionManager<R, C> {
    pub fn new(radio: R, clock: C, creds: Credentials, policy: SessionPolicy, params: RadioParams) -> Self {
        Self {
            radio,
            clock,
            creds,
            policy,
            params,
            state: SessionState::Idle,
            session: None,
            dev_nonce: 0,
            last_tx_ms: None,
            failed_join_rounds: 0,
            round_attempts: 0,
            send_failures: 0,
            degraded: false,
            rssi: RSSI_UNKNOWN,
            snr: SNR_UNKNOWN,
            pending_downlink: None,
        }
    }

    /// Push the current radio parameters to the transceiver.
    pub fn init(&mut self) -> Result<(), crate::error::Error> {
        self.radio.configure(&self.params)?;
        info!(
            "LoRaWAN: radio ready ({} Hz, SF{}, {} dBm)",
            self.params.frequency_hz, self.params.spreading_factor, self.params.tx_power_dbm
        );
        Ok(())
    }

    // ── Join ──────────────────────────────────────────────────

    /// Send one join request and listen `join_timeout_ms` for the accept.
    ///
    /// A round is `join_attempts` calls. When its last attempt fails the
    /// radio is switched to maximum range and the manager returns to
    /// `Idle`; the caller decides when to start the next round.
    pub fn join_attempt(&mut self) -> JoinProgress {
        self.session = None;
        self.set_state(SessionState::Joining);
        let attempts = self.policy.join_attempts.max(1);
        self.round_attempts = self.round_attempts.saturating_add(1);
        let attempt = self.round_attempts;

        self.dev_nonce = self.dev_nonce.wrapping_add(1);
        let request = frame::join_request(&self.creds.app_eui, &self.creds.dev_eui, self.dev_nonce, &self.creds.app_key);
        match self.radio.transmit(&request) {
            Ok(()) => {
                if let Some(accept) = self.await_join_accept() {
                    self.round_attempts = 0;
                    self.establish(&accept);
                    return JoinProgress::Joined(accept.dev_addr);
                }
                warn!("LoRaWAN: no join accept (attempt {}/{})", attempt, attempts);
            }
            Err(e) => warn!("LoRaWAN: join request TX failed: {} (attempt {})", e, attempt),
        }

        if attempt < attempts {
            return JoinProgress::Retry {
                wait_ms: self.policy.join_backoff_ms,
            };
        }

        self.round_attempts = 0;
        self.failed_join_rounds = self.failed_join_rounds.saturating_add(1);
        error!("LoRaWAN: join round {} failed", self.failed_join_rounds);
        if !self.degraded {
            self.degraded = true;
            self.params = self.params.degraded();
            if let Err(e) = self.radio.configure(&self.params) {
                warn!("LoRaWAN: could not apply degraded radio settings: {}", e);
            } else {
                warn!(
                    "LoRaWAN: degraded to SF{} / {} dBm for link margin",
                    self.params.spreading_factor, self.params.tx_power_dbm
                );
            }
        }
        self.set_state(SessionState::Idle);
        JoinProgress::RoundFailed
    }

    fn await_join_accept(&mut self) -> Option<JoinAccept> {
        let deadline = self.clock.now_ms() + u64::from(self.policy.join_timeout_ms);
        let mut buf = [0u8; MAX_FRAME];
        loop {
            let now = self.clock.now_ms();
            if now >= deadline {
                return None;
            }
            let remaining = (deadline - now) as u32;
            match self.radio.receive(&mut buf, remaining) {
                Ok(Some(len)) => match frame::parse_join_accept(&buf[..len], &self.creds.app_key) {
                    Ok(accept) => {
                        self.record_link_quality();
                        return Some(accept);
                    }
                    Err(e) => debug!("LoRaWAN: ignoring frame while joining: {}", e),
                },
                Ok(None) => return None,
                Err(e) => {
                    warn!("LoRaWAN: receive failed while joining: {}", e);
                    return None;
                }
            }
        }
    }

    fn establish(&mut self, accept: &JoinAccept) {
        let keys = crypto::derive_session_keys(&self.creds.app_key, accept.app_nonce, accept.net_id, self.dev_nonce);
        self.session = Some(Session {
            dev_addr: accept.dev_addr,
            keys,
            fcnt_up: 0,
            fcnt_down: None,
        });
        self.failed_join_rounds = 0;
        self.last_tx_ms = None;
        info!("LoRaWAN: joined, DevAddr={:08X}", accept.dev_addr);
        self.set_state(SessionState::Joined);
    }

    // ── Send ──────────────────────────────────────────────────

    /// Send a normal uplink. Requires `Joined` and an elapsed duty-cycle
    /// window. A radio failure returns [`SendOutcome::Retry`] until
    /// `send_attempts` attempts have failed, then [`SendOutcome::Deferred`];
    /// neither is an error.
    pub fn send(&mut self, payload: &[u8], port: u8) -> Result<SendOutcome, SessionError> {
        if self.session.is_none() {
            return Err(SessionError::NotJoined);
        }
        if self.state != SessionState::Joined {
            return Err(SessionError::InvalidState);
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(SessionError::PayloadTooLarge);
        }
        let remaining_ms = self.duty_cycle_remaining_ms();
        if remaining_ms > 0 {
            self.send_failures = 0;
            return Err(SessionError::DutyCycle { remaining_ms });
        }

        self.set_state(SessionState::Sending);
        let result = self.transmit_data(payload, port);
        self.set_state(SessionState::Joined);
        let attempts = self.policy.send_attempts.max(1);
        match result {
            Ok(fcnt) => {
                self.send_failures = 0;
                self.listen_rx_window();
                Ok(SendOutcome::Sent { fcnt })
            }
            Err(e) => {
                self.send_failures = self.send_failures.saturating_add(1);
                warn!("LoRaWAN: uplink TX failed: {:?} (attempt {}/{})", e, self.send_failures, attempts);
                if self.send_failures < attempts {
                    Ok(SendOutcome::Retry {
                        wait_ms: self.policy.send_retry_delay_ms,
                    })
                } else {
                    self.send_failures = 0;
                    Ok(SendOutcome::Deferred { attempts })
                }
            }
        }
    }

    /// Send an alert immediately: no duty-cycle gate, no retry delay.
    /// Without a session the alert goes out as an unauthenticated beacon.
    pub fn send_emergency(&mut self, payload: &[u8], port: u8) -> Result<SendOutcome, SessionError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(SessionError::PayloadTooLarge);
        }
        let was_asleep = self.state == SessionState::Sleep;
        if was_asleep {
            self.radio.wake();
        }

        let outcome = if self.session.is_some() {
            let attempts = self.policy.send_attempts.max(1);
            let mut sent = None;
            for _ in 0..attempts {
                match self.transmit_data(payload, port) {
                    Ok(fcnt) => {
                        sent = Some(fcnt);
                        break;
                    }
                    Err(e) => warn!("LoRaWAN: emergency TX failed: {:?}", e),
                }
            }
            match sent {
                Some(fcnt) => SendOutcome::Sent { fcnt },
                None => SendOutcome::Deferred { attempts },
            }
        } else {
            let beacon = frame::alert_beacon(&self.creds.dev_eui, port, payload)?;
            match self.radio.transmit(&beacon) {
                Ok(()) => {
                    self.last_tx_ms = Some(self.clock.now_ms());
                    SendOutcome::Beacon
                }
                Err(e) => {
                    warn!("LoRaWAN: emergency beacon TX failed: {}", e);
                    SendOutcome::Deferred { attempts: 1 }
                }
            }
        };

        if was_asleep {
            self.radio.sleep();
        }
        info!("LoRaWAN: emergency on port {} -> {:?}", port, outcome);
        Ok(outcome)
    }

    /// Build and transmit one data frame. The counter advances on every
    /// attempt so a value is never put on air twice.
    fn transmit_data(&mut self, payload: &[u8], port: u8) -> Result<u32, crate::error::Error> {
        let Some(session) = self.session.as_mut() else {
            return Err(SessionError::NotJoined.into());
        };
        let fcnt = session.fcnt_up;
        session.fcnt_up = session.fcnt_up.wrapping_add(1);
        let frame = frame::data_frame(&session.keys, Direction::Up, session.dev_addr, fcnt, port, payload)?;

        debug!(
            "LoRaWAN: TX port={} fcnt={} len={} (~{} ms on air)",
            port,
            fcnt,
            frame.len(),
            self.params.time_on_air_ms(frame.len())
        );
        self.radio.transmit(&frame)?;
        self.last_tx_ms = Some(self.clock.now_ms());
        Ok(fcnt)
    }

    /// Milliseconds until a normal uplink is allowed again.
    pub fn duty_cycle_remaining_ms(&self) -> u64 {
        match self.last_tx_ms {
            Some(last) => {
                let elapsed = self.clock.now_ms().saturating_sub(last);
                u64::from(self.policy.min_tx_interval_ms).saturating_sub(elapsed)
            }
            None => 0,
        }
    }

    // ── Downlink ──────────────────────────────────────────────

    fn listen_rx_window(&mut self) {
        if self.policy.rx_window_ms == 0 {
            return;
        }
        match self.receive_downlink(self.policy.rx_window_ms) {
            Ok(Some(dl)) => self.pending_downlink = Some(dl),
            Ok(None) => {}
            Err(e) => debug!("LoRaWAN: downlink dropped: {}", e),
        }
    }

    /// Return a downlink received in the last RX window, or poll the radio
    /// once without waiting.
    pub fn process(&mut self) -> Result<Option<DataFrame>, SessionError> {
        if let Some(dl) = self.pending_downlink.take() {
            return Ok(Some(dl));
        }
        if self.session.is_none() || self.state != SessionState::Joined {
            return Ok(None);
        }
        self.receive_downlink(0)
    }

    fn receive_downlink(&mut self, timeout_ms: u32) -> Result<Option<DataFrame>, SessionError> {
        let mut buf = [0u8; MAX_FRAME];
        let len = match self.radio.receive(&mut buf, timeout_ms) {
            Ok(Some(len)) => len,
            Ok(None) => return Ok(None),
            Err(e) => {
                debug!("LoRaWAN: RX error: {}", e);
                return Ok(None);
            }
        };
        let Some(session) = self.session.as_mut() else {
            return Err(SessionError::NotJoined);
        };
        let base = session.fcnt_down.unwrap_or(0);
        let dl = frame::parse_data_frame(&buf[..len], &session.keys, Direction::Down, session.dev_addr, base)?;
        if session.fcnt_down.is_some_and(|last| dl.fcnt <= last) {
            warn!("LoRaWAN: replayed downlink fcnt={}", dl.fcnt);
            return Err(SessionError::Replay);
        }
        session.fcnt_down = Some(dl.fcnt);
        self.record_link_quality();
        info!("LoRaWAN: downlink port={} len={} fcnt={}", dl.port, dl.payload.len(), dl.fcnt);
        Ok(Some(dl))
    }

    fn record_link_quality(&mut self) {
        self.rssi = self.radio.last_rssi();
        self.snr = self.radio.last_snr();
    }

    // ── Power / lifecycle ─────────────────────────────────────

    /// Put the radio to sleep between cycles.
    pub fn sleep(&mut self) {
        if matches!(self.state, SessionState::Joined | SessionState::Idle) {
            self.radio.sleep();
            self.set_state(SessionState::Sleep);
        }
    }

    /// Wake the radio. Returns to `Joined` if a session exists.
    pub fn wakeup(&mut self) {
        if self.state != SessionState::Sleep {
            return;
        }
        self.radio.wake();
        let next = if self.session.is_some() {
            SessionState::Joined
        } else {
            SessionState::Idle
        };
        self.set_state(next);
    }

    /// Drop the session and its keys.
    pub fn reset(&mut self) {
        if self.session.take().is_some() {
            info!("LoRaWAN: session reset");
        }
        self.last_tx_ms = None;
        self.pending_downlink = None;
        self.round_attempts = 0;
        self.send_failures = 0;
        self.set_state(SessionState::Idle);
    }

    /// Apply new spreading factor / power from configuration. A degraded
    /// radio is restored once a session exists.
    pub fn apply_link(&mut self, spreading_factor: u8, tx_power_dbm: i8) -> Result<(), crate::error::Error> {
        if self.degraded && self.session.is_none() {
            return Ok(());
        }
        let next = self.params.with_link(spreading_factor, tx_power_dbm);
        if next == self.params {
            self.degraded = false;
            return Ok(());
        }
        self.radio.configure(&next)?;
        self.params = next;
        self.degraded = false;
        info!("LoRaWAN: link set to SF{} / {} dBm", spreading_factor, tx_power_dbm);
        Ok(())
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            debug!("LoRaWAN: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_joined(&self) -> bool {
        self.session.is_some()
    }

    pub fn dev_addr(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.dev_addr)
    }

    /// Next uplink counter value.
    pub fn fcnt_up(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.fcnt_up)
    }

    pub fn rssi(&self) -> i16 {
        self.rssi
    }

    pub fn snr(&self) -> i8 {
        self.snr
    }

    pub fn params(&self) -> &RadioParams {
        &self.params
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn failed_join_rounds(&self) -> u32 {
        self.failed_join_rounds
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// Session keys, for the network-side decoder in tests and simulation.
    pub fn session_keys(&self) -> Option<&SessionKeys> {
        self.session.as_ref().map(|s| &s.keys)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::vec::Vec as StdVec;

    use super::*;
    use crate::error::RadioError;
    use crate::lorawan::frame::{join_accept, MHDR_PROPRIETARY};

    #[derive(Default)]
    struct FakeClock {
        now: u64,
    }

    impl ClockPort for FakeClock {
        fn now_ms(&self) -> u64 {
            self.now
        }
        fn delay_ms(&mut self, ms: u32) {
            self.now += u64::from(ms);
        }
    }

    #[derive(Default)]
    struct FakeRadio {
        sent: StdVec<StdVec<u8>>,
        rx: VecDeque<StdVec<u8>>,
        fail_tx: u32,
        configured: Option<RadioParams>,
        asleep: bool,
    }

    impl RadioPort for FakeRadio {
        fn configure(&mut self, params: &RadioParams) -> Result<(), RadioError> {
            self.configured = Some(*params);
            Ok(())
        }
        fn transmit(&mut self, frame: &[u8]) -> Result<(), RadioError> {
            if self.fail_tx > 0 {
                self.fail_tx -= 1;
                return Err(RadioError::TxFailed);
            }
            self.sent.push(frame.to_vec());
            Ok(())
        }
        fn receive(&mut self, buf: &mut [u8], _timeout_ms: u32) -> Result<Option<usize>, RadioError> {
            Ok(self.rx.pop_front().map(|f| {
                buf[..f.len()].copy_from_slice(&f);
                f.len()
            }))
        }
        fn sleep(&mut self) {
            self.asleep = true;
        }
        fn wake(&mut self) {
            self.asleep = false;
        }
        fn last_rssi(&self) -> i16 {
            -87
        }
        fn last_snr(&self) -> i8 {
            7
        }
    }

    const DEV_ADDR: u32 = 0x2601_1F2E;

    fn manager() -> SessionManager<FakeRadio, FakeClock> {
        SessionManager::new(
            FakeRadio::default(),
            FakeClock::default(),
            Credentials::factory(),
            SessionPolicy::factory(),
            RadioParams::au915(),
        )
    }

    fn queue_accept(m: &mut SessionManager<FakeRadio, FakeClock>) {
        let accept = JoinAccept {
            app_nonce: [0x01, 0x02, 0x03],
            net_id: [0x00, 0x00, 0x13],
            dev_addr: DEV_ADDR,
            dl_settings: 0,
            rx_delay: 1,
        };
        let raw = join_accept(&accept, &Credentials::factory().app_key);
        m.radio_mut().rx.push_back(raw.to_vec());
    }

    fn joined() -> SessionManager<FakeRadio, FakeClock> {
        let mut m = manager();
        queue_accept(&mut m);
        assert_eq!(m.join_attempt(), JoinProgress::Joined(DEV_ADDR));
        m
    }

    fn fail_round(m: &mut SessionManager<FakeRadio, FakeClock>) {
        while m.join_attempt() != JoinProgress::RoundFailed {}
    }

    #[test]
    fn join_establishes_session() {
        let m = joined();
        assert_eq!(m.state(), SessionState::Joined);
        assert_eq!(m.dev_addr(), Some(DEV_ADDR));
        assert_eq!(m.fcnt_up(), Some(0));
        assert_eq!(m.radio().sent.len(), 1);
        assert_eq!(m.rssi(), -87);
        assert_eq!(m.snr(), 7);
    }

    #[test]
    fn link_metrics_default_before_any_rx() {
        let m = manager();
        assert_eq!(m.rssi(), -100);
        assert_eq!(m.snr(), -20);
    }

    #[test]
    fn failed_join_round_degrades_radio() {
        let mut m = manager();
        for _ in 0..2 {
            assert_eq!(m.join_attempt(), JoinProgress::Retry { wait_ms: 10_000 });
            assert_eq!(m.state(), SessionState::Joining);
            assert!(!m.is_degraded());
        }
        assert_eq!(m.join_attempt(), JoinProgress::RoundFailed);
        assert_eq!(m.radio().sent.len(), 3);
        // The manager never waits itself.
        assert_eq!(m.clock().now_ms(), 0);
        assert_eq!(m.state(), SessionState::Idle);
        assert!(m.is_degraded());
        let cfg = m.radio().configured.expect("degraded params applied");
        assert_eq!(cfg.spreading_factor, 12);
        assert_eq!(cfg.tx_power_dbm, 10);
    }

    #[test]
    fn failed_rounds_counted_until_join() {
        let mut m = manager();
        fail_round(&mut m);
        fail_round(&mut m);
        assert_eq!(m.failed_join_rounds(), 2);
        assert_eq!(m.radio().sent.len(), 6);

        queue_accept(&mut m);
        assert_eq!(m.join_attempt(), JoinProgress::Joined(DEV_ADDR));
        assert_eq!(m.failed_join_rounds(), 0);
    }

    #[test]
    fn alert_between_join_attempts_goes_out_as_beacon() {
        let mut m = manager();
        assert!(matches!(m.join_attempt(), JoinProgress::Retry { .. }));
        assert_eq!(m.send_emergency(&[0xFF, 0x03], 99), Ok(SendOutcome::Beacon));
        assert_eq!(m.radio().sent.last().map(|f| f[0]), Some(MHDR_PROPRIETARY));

        // The round carries on where it left off.
        assert!(matches!(m.join_attempt(), JoinProgress::Retry { .. }));
        queue_accept(&mut m);
        assert_eq!(m.join_attempt(), JoinProgress::Joined(DEV_ADDR));
        assert_eq!(m.failed_join_rounds(), 0);
    }

    #[test]
    fn configured_link_clears_degrade_even_when_equal() {
        let mut m = manager();
        fail_round(&mut m);
        queue_accept(&mut m);
        assert_eq!(m.join_attempt(), JoinProgress::Joined(DEV_ADDR));
        m.apply_link(12, 10).unwrap();
        assert!(!m.is_degraded());
    }

    #[test]
    fn send_requires_session() {
        let mut m = manager();
        assert_eq!(m.send(&[1, 2, 3], 1), Err(SessionError::NotJoined));
    }

    #[test]
    fn send_rejects_oversized_payload() {
        let mut m = joined();
        let big = [0u8; MAX_PAYLOAD + 1];
        assert_eq!(m.send(&big, 1), Err(SessionError::PayloadTooLarge));
    }

    #[test]
    fn duty_cycle_gates_normal_uplinks() {
        let mut m = joined();
        assert_eq!(m.send(&[1], 1), Ok(SendOutcome::Sent { fcnt: 0 }));
        m.clock_mut().now += 1_000;
        assert_eq!(m.send(&[2], 1), Err(SessionError::DutyCycle { remaining_ms: 98_000 }));
        m.clock_mut().now += 98_000;
        assert_eq!(m.send(&[3], 1), Ok(SendOutcome::Sent { fcnt: 1 }));
    }

    #[test]
    fn send_retries_then_succeeds_without_reusing_counter() {
        let mut m = joined();
        m.radio_mut().fail_tx = 2;
        assert_eq!(m.send(&[9], 1), Ok(SendOutcome::Retry { wait_ms: 5_000 }));
        assert_eq!(m.send(&[9], 1), Ok(SendOutcome::Retry { wait_ms: 5_000 }));
        assert_eq!(m.send(&[9], 1), Ok(SendOutcome::Sent { fcnt: 2 }));
        assert_eq!(m.fcnt_up(), Some(3));
    }

    #[test]
    fn send_defers_after_exhausting_retries() {
        let mut m = joined();
        m.radio_mut().fail_tx = 4;
        assert!(matches!(m.send(&[9], 1), Ok(SendOutcome::Retry { .. })));
        assert!(matches!(m.send(&[9], 1), Ok(SendOutcome::Retry { .. })));
        assert_eq!(m.send(&[9], 1), Ok(SendOutcome::Deferred { attempts: 3 }));
        assert_eq!(m.state(), SessionState::Joined);
        // Nothing went on air, so the duty-cycle window is still open.
        assert_eq!(m.duty_cycle_remaining_ms(), 0);
        // The next uplink starts a fresh count.
        assert!(matches!(m.send(&[9], 1), Ok(SendOutcome::Retry { .. })));
    }

    #[test]
    fn alert_during_send_retry_closes_the_window() {
        let mut m = joined();
        m.radio_mut().fail_tx = 1;
        assert!(matches!(m.send(&[9], 1), Ok(SendOutcome::Retry { .. })));
        assert_eq!(m.send_emergency(&[0xFF], 99), Ok(SendOutcome::Sent { fcnt: 1 }));
        assert_eq!(m.send(&[9], 1), Err(SessionError::DutyCycle { remaining_ms: 99_000 }));

        // The abandoned uplink does not count against the next one.
        m.clock_mut().now += 99_000;
        m.radio_mut().fail_tx = 2;
        assert!(matches!(m.send(&[9], 1), Ok(SendOutcome::Retry { .. })));
        assert!(matches!(m.send(&[9], 1), Ok(SendOutcome::Retry { .. })));
        assert_eq!(m.send(&[9], 1), Ok(SendOutcome::Sent { fcnt: 4 }));
    }

    #[test]
    fn emergency_bypasses_duty_cycle() {
        let mut m = joined();
        assert_eq!(m.send(&[1], 10), Ok(SendOutcome::Sent { fcnt: 0 }));
        assert_eq!(m.send_emergency(&[0xFF, 0x01], 99), Ok(SendOutcome::Sent { fcnt: 1 }));
        assert_eq!(m.fcnt_up(), Some(2));
    }

    #[test]
    fn emergency_without_session_goes_out_as_beacon() {
        let mut m = manager();
        assert_eq!(m.send_emergency(&[0xFF, 0x02], 98), Ok(SendOutcome::Beacon));
        let sent = &m.radio().sent[0];
        assert_eq!(sent[0], MHDR_PROPRIETARY);
        assert_eq!(sent[9], 98);
        assert_eq!(&sent[10..], &[0xFF, 0x02]);
    }

    #[test]
    fn emergency_while_asleep_returns_to_sleep() {
        let mut m = joined();
        m.sleep();
        assert_eq!(m.send_emergency(&[0xFF], 99), Ok(SendOutcome::Sent { fcnt: 0 }));
        assert!(m.radio().asleep);
        assert_eq!(m.state(), SessionState::Sleep);
    }

    #[test]
    fn downlink_delivered_once_and_replay_rejected() {
        let mut m = joined();
        let keys = m.session_keys().cloned().expect("joined");
        let dl = frame::data_frame(&keys, Direction::Down, DEV_ADDR, 0, 200, &[0x01, 0, 0, 0, 60]).unwrap();
        m.radio_mut().rx.push_back(dl.to_vec());

        assert_eq!(m.send(&[1], 1), Ok(SendOutcome::Sent { fcnt: 0 }));
        let got = m.process().unwrap().expect("downlink in RX window");
        assert_eq!(got.port, 200);
        assert_eq!(got.payload.as_slice(), &[0x01, 0, 0, 0, 60]);
        assert_eq!(m.process(), Ok(None));

        m.radio_mut().rx.push_back(dl.to_vec());
        assert_eq!(m.process(), Err(SessionError::Replay));
    }

    #[test]
    fn sleep_and_wakeup_restore_prior_state() {
        let mut m = joined();
        m.sleep();
        assert_eq!(m.state(), SessionState::Sleep);
        assert_eq!(m.send(&[1], 1), Err(SessionError::InvalidState));
        m.wakeup();
        assert_eq!(m.state(), SessionState::Joined);

        let mut idle = manager();
        idle.sleep();
        idle.wakeup();
        assert_eq!(idle.state(), SessionState::Idle);
    }

    #[test]
    fn reset_drops_session() {
        let mut m = joined();
        m.reset();
        assert_eq!(m.state(), SessionState::Idle);
        assert!(!m.is_joined());
        assert_eq!(m.send(&[1], 1), Err(SessionError::NotJoined));
    }

    #[test]
    fn credentials_round_trip_through_storage() {
        let mut nvs = crate::adapters::nvs::NvsAdapter::new().unwrap();
        let fallback = Credentials::load(&nvs);
        assert_eq!(fallback.dev_eui, Credentials::factory().dev_eui);

        let mut creds = Credentials::factory();
        creds.dev_eui = [1, 2, 3, 4, 5, 6, 7, 8];
        creds.app_key = [0xAA; 16];
        creds.store(&mut nvs).unwrap();

        let loaded = Credentials::load(&nvs);
        assert_eq!(loaded.dev_eui, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(loaded.app_eui, Credentials::factory().app_eui);
        assert_eq!(loaded.app_key, [0xAA; 16]);
    }
}
