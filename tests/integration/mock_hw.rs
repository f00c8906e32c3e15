//! Mock adapters for integration tests.
//!
//! Every port records what the domain asked of it so tests can assert on
//! the full history without touching the SX1262, the I²C bus or NVS.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};

use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use nexusnode::app::events::NodeEvent;
use nexusnode::app::ports::{
    BatteryPort, ClockPort, EventSink, IndicatorPort, RadioPort, StorageError, StoragePort,
};
use nexusnode::error::RadioError;
use nexusnode::lorawan::frame::{JoinAccept, join_accept};
use nexusnode::lorawan::{Credentials, RadioParams, SessionManager, SessionPolicy};
use nexusnode::sensors::readers::PRESSURE_I2C_ADDR;

pub const DEV_ADDR: u32 = 0x2601_1F2E;

// ── MockRadio ─────────────────────────────────────────────────

#[derive(Default)]
pub struct MockRadio {
    /// Every frame put on air, in order.
    pub sent: Vec<Vec<u8>>,
    /// Frames handed out by `receive`, front first.
    pub rx: VecDeque<Vec<u8>>,
    /// Number of upcoming transmissions that fail.
    pub fail_tx: u32,
    pub configured: Vec<RadioParams>,
    pub asleep: bool,
}

impl MockRadio {
    pub fn queue_rx(&mut self, frame: &[u8]) {
        self.rx.push_back(frame.to_vec());
    }

    pub fn last_sent(&self) -> Option<&[u8]> {
        self.sent.last().map(Vec::as_slice)
    }
}

impl RadioPort for MockRadio {
    fn configure(&mut self, params: &RadioParams) -> Result<(), RadioError> {
        self.configured.push(*params);
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
        -92
    }

    fn last_snr(&self) -> i8 {
        6
    }
}

// ── MockClock ─────────────────────────────────────────────────

/// Time only moves when the domain waits or the test advances it.
#[derive(Default, Clone)]
pub struct MockClock {
    pub now: u64,
}

impl MockClock {
    pub fn advance(&mut self, ms: u64) {
        self.now += ms;
    }
}

impl ClockPort for MockClock {
    fn now_ms(&self) -> u64 {
        self.now
    }

    fn delay_ms(&mut self, ms: u32) {
        self.now += u64::from(ms);
    }
}

// ── Session helpers ───────────────────────────────────────────

pub fn session() -> SessionManager<MockRadio, MockClock> {
    SessionManager::new(
        MockRadio::default(),
        MockClock::default(),
        Credentials::factory(),
        SessionPolicy::factory(),
        RadioParams::au915(),
    )
}

/// A join accept for [`DEV_ADDR`] encrypted with the factory key.
pub fn accept_frame() -> Vec<u8> {
    let accept = JoinAccept {
        app_nonce: [0x0A, 0x0B, 0x0C],
        net_id: [0x00, 0x00, 0x13],
        dev_addr: DEV_ADDR,
        dl_settings: 0,
        rx_delay: 1,
    };
    join_accept(&accept, &Credentials::factory().app_key).to_vec()
}

// ── MockStorage ───────────────────────────────────────────────

#[derive(Default)]
pub struct MockStorage {
    store: HashMap<String, Vec<u8>>,
    pub writes: usize,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }
}

impl StoragePort for MockStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        match self.store.get(&Self::key(namespace, key)) {
            Some(v) => {
                let n = v.len().min(buf.len());
                buf[..n].copy_from_slice(&v[..n]);
                Ok(n)
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.writes += 1;
        self.store.insert(Self::key(namespace, key), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.store.remove(&Self::key(namespace, key));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store.contains_key(&Self::key(namespace, key))
    }
}

// ── MockBattery / MockIndicator ───────────────────────────────

pub struct MockBattery {
    pub percent: u8,
}

impl BatteryPort for MockBattery {
    fn battery_percent(&mut self) -> u8 {
        self.percent
    }
}

#[derive(Default)]
pub struct MockIndicator {
    pub colors: Vec<(u8, u8, u8)>,
}

impl IndicatorPort for MockIndicator {
    fn set_led(&mut self, r: u8, g: u8, b: u8) {
        self.colors.push((r, g, b));
    }
}

// ── Pressure transducer on a mock I²C bus ─────────────────────

/// Answers reads at the pressure transducer's address with queued bridge
/// words; the last word repeats once the queue drains.
pub struct MockI2c {
    words: VecDeque<u16>,
    last: u16,
    pub present: bool,
    pub reads: usize,
}

impl MockI2c {
    pub fn new() -> Self {
        Self {
            words: VecDeque::new(),
            last: 0,
            present: true,
            reads: 0,
        }
    }

    /// Queue a reading of `bar` on a transducer with `range_bar` full scale.
    pub fn push_bar(&mut self, bar: f32, range_bar: f32) {
        self.words.push_back(bridge_word(bar, range_bar));
    }
}

/// 14-bit bridge output for `bar`, 10 %–90 % transfer band.
pub fn bridge_word(bar: f32, range_bar: f32) -> u16 {
    let counts = 1638.0 + bar / range_bar * (14745.0 - 1638.0);
    counts.round() as u16 & 0x3FFF
}

impl ErrorType for MockI2c {
    type Error = ErrorKind;
}

impl I2c for MockI2c {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        if !self.present || address != PRESSURE_I2C_ADDR {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        for op in operations.iter_mut() {
            if let Operation::Read(buf) = op {
                let word = self.words.pop_front().unwrap_or(self.last);
                self.last = word;
                self.reads += 1;
                let bytes = word.to_be_bytes();
                let n = buf.len().min(2);
                buf[..n].copy_from_slice(&bytes[..n]);
            }
        }
        Ok(())
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<NodeEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&NodeEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &NodeEvent) {
        self.events.push(event.clone());
    }
}
