//! Maintenance commands received as downlinks on port 200.
//!
//! ```text
//!   opcode  argument            effect
//!   0x01    u32 BE seconds      sampling interval
//!   0x02    u8                  spreading factor
//!   0x03    i8                  tx power (dBm)
//!   0x04    u8 (0 / non-zero)   low-power flag
//!   0x05    -                   drop the session and rejoin
//!   0x06    -                   reset the cumulative flow counter
//! ```

use log::info;

use crate::app::ports::ConfigError;
use crate::config::ConfigStore;
use crate::error::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceCommand {
    SetInterval { seconds: u32 },
    SetSpreadingFactor(u8),
    SetTxPower(i8),
    SetLowPower(bool),
    Rejoin,
    ResetTotalizer,
}

/// What the uplink task must do after a command was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandEffect {
    /// A new configuration version was published.
    ConfigChanged { version: u32 },
    Rejoin,
    ResetTotalizer,
}

impl MaintenanceCommand {
    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        let Some((&opcode, arg)) = frame.split_first() else {
            return Err(CodecError::WrongLength { expected: 1, got: 0 });
        };
        let expect = |len: usize| {
            if arg.len() == len {
                Ok(())
            } else {
                Err(CodecError::WrongLength {
                    expected: len + 1,
                    got: frame.len(),
                })
            }
        };
        match opcode {
            0x01 => {
                expect(4)?;
                Ok(Self::SetInterval {
                    seconds: u32::from_be_bytes([arg[0], arg[1], arg[2], arg[3]]),
                })
            }
            0x02 => {
                expect(1)?;
                Ok(Self::SetSpreadingFactor(arg[0]))
            }
            0x03 => {
                expect(1)?;
                Ok(Self::SetTxPower(arg[0] as i8))
            }
            0x04 => {
                expect(1)?;
                Ok(Self::SetLowPower(arg[0] != 0))
            }
            0x05 => {
                expect(0)?;
                Ok(Self::Rejoin)
            }
            0x06 => {
                expect(0)?;
                Ok(Self::ResetTotalizer)
            }
            other => Err(CodecError::WrongTypeTag(other)),
        }
    }

    /// Apply the command to the live configuration. Values that fail
    /// validation leave the configuration untouched.
    pub fn apply(self, store: &ConfigStore) -> Result<CommandEffect, ConfigError> {
        let version = match self {
            Self::SetInterval { seconds } => {
                store.update(|cfg| cfg.sampling_interval_ms = seconds.saturating_mul(1000))?
            }
            Self::SetSpreadingFactor(sf) => store.update(|cfg| cfg.spreading_factor = sf)?,
            Self::SetTxPower(dbm) => store.update(|cfg| cfg.tx_power_dbm = dbm)?,
            Self::SetLowPower(on) => store.update(|cfg| cfg.low_power = on)?,
            Self::Rejoin => return Ok(CommandEffect::Rejoin),
            Self::ResetTotalizer => return Ok(CommandEffect::ResetTotalizer),
        };
        info!("Maintenance: {:?} applied (config v{})", self, version);
        Ok(CommandEffect::ConfigChanged { version })
    }
}
