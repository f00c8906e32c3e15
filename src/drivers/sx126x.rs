//! SX1262 LoRa transceiver over `embedded-hal` 1.0 traits.
//!
//! Command-level only: each [`RadioPort`] call is a short sequence of SPI
//! opcodes, with BUSY polled before every command and IRQ status polled
//! (not DIO1-interrupted) while waiting for TX done / RX done.
//!
//! | Opcode | Command |
//! |--------|---------|
//! | 0x80 | SetStandby |
//! | 0x84 | SetSleep |
//! | 0x8A | SetPacketType |
//! | 0x86 | SetRfFrequency |
//! | 0x8B | SetModulationParams |
//! | 0x8C | SetPacketParams |
//! | 0x95 | SetPaConfig |
//! | 0x8E | SetTxParams |
//! | 0x08 | SetDioIrqParams |
//! | 0x12 / 0x02 | GetIrqStatus / ClearIrqStatus |
//! | 0x83 / 0x82 | SetTx / SetRx |
//! | 0x0E / 0x1E | WriteBuffer / ReadBuffer |
//! | 0x13 / 0x14 | GetRxBufferStatus / GetPacketStatus |

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::{Operation, SpiDevice};
use log::{debug, info, warn};

use crate::app::ports::RadioPort;
use crate::error::RadioError;
use crate::lorawan::radio::{Bandwidth, CodingRate, RadioParams};

const SET_STANDBY: u8 = 0x80;
const SET_SLEEP: u8 = 0x84;
const SET_PACKET_TYPE: u8 = 0x8A;
const SET_RF_FREQUENCY: u8 = 0x86;
const SET_MODULATION_PARAMS: u8 = 0x8B;
const SET_PACKET_PARAMS: u8 = 0x8C;
const SET_PA_CONFIG: u8 = 0x95;
const SET_TX_PARAMS: u8 = 0x8E;
const SET_BUFFER_BASE: u8 = 0x8F;
const SET_DIO_IRQ_PARAMS: u8 = 0x08;
const GET_IRQ_STATUS: u8 = 0x12;
const CLEAR_IRQ_STATUS: u8 = 0x02;
const SET_TX: u8 = 0x83;
const SET_RX: u8 = 0x82;
const WRITE_BUFFER: u8 = 0x0E;
const READ_BUFFER: u8 = 0x1E;
const WRITE_REGISTER: u8 = 0x0D;
const GET_RX_BUFFER_STATUS: u8 = 0x13;
const GET_PACKET_STATUS: u8 = 0x14;

const REG_LORA_SYNC_WORD: u16 = 0x0740;

pub const IRQ_TX_DONE: u16 = 1 << 0;
pub const IRQ_RX_DONE: u16 = 1 << 1;
pub const IRQ_CRC_ERR: u16 = 1 << 6;
pub const IRQ_TIMEOUT: u16 = 1 << 9;
const IRQ_MASK: u16 = IRQ_TX_DONE | IRQ_RX_DONE | IRQ_CRC_ERR | IRQ_TIMEOUT;

const BUSY_TIMEOUT_MS: u32 = 100;
/// Extra time granted past the computed time on air.
const TX_GUARD_MS: u32 = 500;
/// The RX timer counts in steps of 15.625 µs.
const RX_TIMER_STEP_NS: u64 = 15_625;

pub struct Sx126x<SPI, BUSY, RST, D> {
    spi: SPI,
    busy: BUSY,
    reset: RST,
    delay: D,
    params: RadioParams,
    last_rssi: i16,
    last_snr: i8,
}

impl<SPI, BUSY, RST, D> Sx126x<SPI, BUSY, RST, D>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    RST: OutputPin,
    D: DelayNs,
{
    pub fn new(spi: SPI, busy: BUSY, reset: RST, delay: D) -> Self {
        Self {
            spi,
            busy,
            reset,
            delay,
            params: RadioParams::au915(),
            last_rssi: -100,
            last_snr: -20,
        }
    }

    /// Hardware reset, then LoRa packet mode with `params`.
    pub fn init(&mut self, params: &RadioParams) -> Result<(), RadioError> {
        self.reset.set_low().map_err(|_| RadioError::TxFailed)?;
        self.delay.delay_ms(1);
        self.reset.set_high().map_err(|_| RadioError::TxFailed)?;
        self.delay.delay_ms(10);

        self.command(SET_STANDBY, &[0x00])?;
        self.command(SET_PACKET_TYPE, &[0x01])?;
        // SX1262 high-power PA, +22 dBm table.
        self.command(SET_PA_CONFIG, &[0x04, 0x07, 0x00, 0x01])?;
        self.command(SET_BUFFER_BASE, &[0x00, 0x00])?;
        let [mh, ml] = IRQ_MASK.to_be_bytes();
        self.command(SET_DIO_IRQ_PARAMS, &[mh, ml, mh, ml, 0, 0, 0, 0])?;
        self.configure(params)?;
        info!(
            "SX1262: ready, {} Hz SF{} {} dBm",
            params.frequency_hz, params.spreading_factor, params.tx_power_dbm
        );
        Ok(())
    }

    fn wait_busy(&mut self) -> Result<(), RadioError> {
        for _ in 0..BUSY_TIMEOUT_MS {
            if !self.busy.is_high().map_err(|_| RadioError::Busy)? {
                return Ok(());
            }
            self.delay.delay_ms(1);
        }
        Err(RadioError::Busy)
    }

    fn command(&mut self, opcode: u8, args: &[u8]) -> Result<(), RadioError> {
        self.wait_busy()?;
        self.spi
            .transaction(&mut [Operation::Write(&[opcode]), Operation::Write(args)])
            .map_err(|_| RadioError::TxFailed)
    }

    /// Issue a read command. `out[0]` receives the status byte.
    fn query(&mut self, opcode: u8, out: &mut [u8]) -> Result<(), RadioError> {
        self.wait_busy()?;
        self.spi
            .transaction(&mut [Operation::Write(&[opcode]), Operation::Read(out)])
            .map_err(|_| RadioError::TxFailed)
    }

    fn irq_status(&mut self) -> Result<u16, RadioError> {
        let mut out = [0u8; 3];
        self.query(GET_IRQ_STATUS, &mut out)?;
        Ok(u16::from_be_bytes([out[1], out[2]]))
    }

    fn clear_irq(&mut self) -> Result<(), RadioError> {
        self.command(CLEAR_IRQ_STATUS, &[0xFF, 0xFF])
    }

    fn packet_params(&mut self, len: u8, invert_iq: bool) -> Result<(), RadioError> {
        let [ph, pl] = self.params.preamble_len.to_be_bytes();
        // Explicit header, CRC on.
        self.command(SET_PACKET_PARAMS, &[ph, pl, 0x00, len, 0x01, u8::from(invert_iq)])
    }

    /// Poll IRQ status until one of `mask` is set or `timeout_ms` passes.
    fn wait_irq(&mut self, mask: u16, timeout_ms: u32) -> Result<Option<u16>, RadioError> {
        for _ in 0..=timeout_ms {
            let irq = self.irq_status()?;
            if irq & mask != 0 {
                return Ok(Some(irq));
            }
            self.delay.delay_ms(1);
        }
        Ok(None)
    }
}

/// Frequency register value: f × 2^25 / 32 MHz.
pub fn frequency_register(frequency_hz: u32) -> u32 {
    ((u64::from(frequency_hz) << 25) / 32_000_000) as u32
}

fn bandwidth_code(bw: Bandwidth) -> u8 {
    match bw {
        Bandwidth::Khz125 => 0x04,
        Bandwidth::Khz250 => 0x05,
        Bandwidth::Khz500 => 0x06,
    }
}

fn coding_rate_code(cr: CodingRate) -> u8 {
    match cr {
        CodingRate::Cr4_5 => 0x01,
        CodingRate::Cr4_6 => 0x02,
        CodingRate::Cr4_7 => 0x03,
        CodingRate::Cr4_8 => 0x04,
    }
}

impl<SPI, BUSY, RST, D> RadioPort for Sx126x<SPI, BUSY, RST, D>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    RST: OutputPin,
    D: DelayNs,
{
    fn configure(&mut self, params: &RadioParams) -> Result<(), RadioError> {
        if !(5..=12).contains(&params.spreading_factor) || !(-9..=22).contains(&params.tx_power_dbm) {
            return Err(RadioError::InvalidParams);
        }
        self.params = *params;
        self.command(SET_STANDBY, &[0x00])?;
        self.command(SET_RF_FREQUENCY, &frequency_register(params.frequency_hz).to_be_bytes())?;
        let ldro = u8::from(params.spreading_factor >= 11 && params.bandwidth == Bandwidth::Khz125);
        self.command(
            SET_MODULATION_PARAMS,
            &[
                params.spreading_factor,
                bandwidth_code(params.bandwidth),
                coding_rate_code(params.coding_rate),
                ldro,
            ],
        )?;
        // Ramp 200 µs.
        self.command(SET_TX_PARAMS, &[params.tx_power_dbm as u8, 0x04])?;
        let [ah, al] = REG_LORA_SYNC_WORD.to_be_bytes();
        let [sh, sl] = params.sync_word.to_be_bytes();
        self.command(WRITE_REGISTER, &[ah, al, sh, sl])?;
        debug!("SX1262: configured {:?}", params);
        Ok(())
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        let len = u8::try_from(frame.len()).map_err(|_| RadioError::InvalidParams)?;
        self.command(SET_STANDBY, &[0x00])?;
        self.packet_params(len, false)?;
        self.wait_busy()?;
        self.spi
            .transaction(&mut [Operation::Write(&[WRITE_BUFFER, 0x00]), Operation::Write(frame)])
            .map_err(|_| RadioError::TxFailed)?;
        self.clear_irq()?;
        // No radio-side timeout; the poll below bounds the wait.
        self.command(SET_TX, &[0x00, 0x00, 0x00])?;

        let budget = self.params.time_on_air_ms(frame.len()) + TX_GUARD_MS;
        match self.wait_irq(IRQ_TX_DONE | IRQ_TIMEOUT, budget)? {
            Some(irq) if irq & IRQ_TX_DONE != 0 => {
                self.clear_irq()?;
                Ok(())
            }
            _ => {
                warn!("SX1262: TX done not seen within {} ms", budget);
                self.command(SET_STANDBY, &[0x00])?;
                Err(RadioError::TxTimeout)
            }
        }
    }

    fn receive(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<Option<usize>, RadioError> {
        self.command(SET_STANDBY, &[0x00])?;
        self.packet_params(0xFF, true)?;
        self.clear_irq()?;
        let steps = (u64::from(timeout_ms) * 1_000_000 / RX_TIMER_STEP_NS).min(0xFF_FFFE) as u32;
        let [_, t2, t1, t0] = steps.to_be_bytes();
        self.command(SET_RX, &[t2, t1, t0])?;

        let Some(irq) = self.wait_irq(IRQ_RX_DONE | IRQ_TIMEOUT, timeout_ms + 100)? else {
            self.command(SET_STANDBY, &[0x00])?;
            return Ok(None);
        };
        self.clear_irq()?;
        if irq & IRQ_RX_DONE == 0 {
            return Ok(None);
        }
        if irq & IRQ_CRC_ERR != 0 {
            debug!("SX1262: dropped frame with CRC error");
            return Ok(None);
        }

        let mut status = [0u8; 3];
        self.query(GET_RX_BUFFER_STATUS, &mut status)?;
        let len = usize::from(status[1]).min(buf.len());
        let start = status[2];
        self.wait_busy()?;
        self.spi
            .transaction(&mut [
                Operation::Write(&[READ_BUFFER, start, 0x00]),
                Operation::Read(&mut buf[..len]),
            ])
            .map_err(|_| RadioError::TxFailed)?;

        let mut pkt = [0u8; 4];
        self.query(GET_PACKET_STATUS, &mut pkt)?;
        self.last_rssi = -(i16::from(pkt[1]) / 2);
        self.last_snr = (pkt[2] as i8) / 4;
        Ok(Some(len))
    }

    fn sleep(&mut self) {
        // Warm start keeps the configuration.
        if let Err(e) = self.command(SET_SLEEP, &[0x04]) {
            warn!("SX1262: sleep failed: {}", e);
        }
    }

    fn wake(&mut self) {
        // Any NSS falling edge wakes the chip; BUSY drops once it is ready.
        if let Err(e) = self.command(SET_STANDBY, &[0x00]) {
            warn!("SX1262: wake failed: {}", e);
        }
    }

    fn last_rssi(&self) -> i16 {
        self.last_rssi
    }

    fn last_snr(&self) -> i8 {
        self.last_snr
    }
}
