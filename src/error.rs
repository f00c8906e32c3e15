//! Unified error types for the node firmware.
//!
//! A single `Error` enum that every subsystem converts into, so task loops
//! handle failures uniformly. All variants are `Copy` so they travel through
//! queues and event sinks without allocation.

use core::fmt;

use crate::app::ports::StorageError;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A sensor could not be read or returned implausible data.
    Sensor(SensorError),
    /// The shared sensor bus failed or could not be acquired.
    Bus(BusError),
    /// The radio transceiver reported a failure.
    Radio(RadioError),
    /// The LoRaWAN session rejected an operation.
    Session(SessionError),
    /// A payload could not be encoded or decoded.
    Codec(CodecError),
    /// Persistent storage failed.
    Storage(StorageError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Bus(e) => write!(f, "bus: {e}"),
            Self::Radio(e) => write!(f, "radio: {e}"),
            Self::Session(e) => write!(f, "session: {e}"),
            Self::Codec(e) => write!(f, "codec: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// ADC read returned an error or timed out.
    AdcReadFailed,
    /// Reading is outside the physically plausible range.
    OutOfRange,
    /// The device did not answer on the bus.
    NotPresent,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdcReadFailed => write!(f, "ADC read failed"),
            Self::OutOfRange => write!(f, "reading out of range"),
            Self::NotPresent => write!(f, "sensor not present"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Bus errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The bus mutex was not released within the allowed wait.
    Timeout,
    /// The addressed device did not acknowledge.
    Nack,
    /// Any other transfer failure.
    Transfer,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "lock timeout"),
            Self::Nack => write!(f, "no acknowledge"),
            Self::Transfer => write!(f, "transfer failed"),
        }
    }
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

// ---------------------------------------------------------------------------
// Radio errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// The transceiver did not report TX done in time.
    TxTimeout,
    /// The transceiver rejected the transmission.
    TxFailed,
    /// The transceiver is busy with another operation.
    Busy,
    /// The requested modulation parameters are not supported.
    InvalidParams,
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TxTimeout => write!(f, "TX timeout"),
            Self::TxFailed => write!(f, "TX failed"),
            Self::Busy => write!(f, "busy"),
            Self::InvalidParams => write!(f, "invalid parameters"),
        }
    }
}

impl From<RadioError> for Error {
    fn from(e: RadioError) -> Self {
        Self::Radio(e)
    }
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// The operation needs an established session.
    NotJoined,
    /// The manager is not in a state that accepts the operation.
    InvalidState,
    /// The minimum inter-transmission interval has not elapsed.
    DutyCycle { remaining_ms: u64 },
    /// Application payload exceeds the maximum frame size.
    PayloadTooLarge,
    /// A received frame was malformed.
    InvalidFrame,
    /// A received frame failed integrity verification.
    MicMismatch,
    /// A downlink reused or rewound the frame counter.
    Replay,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotJoined => write!(f, "not joined"),
            Self::InvalidState => write!(f, "invalid state"),
            Self::DutyCycle { remaining_ms } => {
                write!(f, "duty cycle ({remaining_ms} ms remaining)")
            }
            Self::PayloadTooLarge => write!(f, "payload too large"),
            Self::InvalidFrame => write!(f, "invalid frame"),
            Self::MicMismatch => write!(f, "MIC mismatch"),
            Self::Replay => write!(f, "replayed frame counter"),
        }
    }
}

impl From<SessionError> for Error {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The frame is not the fixed width of its profile.
    WrongLength { expected: usize, got: usize },
    /// The type tag byte does not match the decoder.
    WrongTypeTag(u8),
    /// The CRC trailer does not match the frame contents.
    CrcMismatch,
    /// The output buffer is too small.
    BufferTooSmall,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongLength { expected, got } => {
                write!(f, "expected {expected} bytes, got {got}")
            }
            Self::WrongTypeTag(tag) => write!(f, "unexpected type tag 0x{tag:02X}"),
            Self::CrcMismatch => write!(f, "CRC mismatch"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
        }
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
