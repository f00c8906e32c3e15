//! Per-sector [`SensorReader`] implementations.
//!
//! The reader is picked once from the configured sector by [`reader_for`];
//! the acquisition task then calls it every cycle without matching on the
//! sector again. Analog readers sample ADC1 through `hw_init::adc1_read`
//! and ignore the bus they are handed. The pressure transducer is the only
//! reader that actually talks over the shared I²C bus.

use embedded_hal::i2c::{Error as _, ErrorKind, I2c};

use crate::app::ports::{Reading, SensorReader};
use crate::config::{Calibration, DeviceConfig, Sector};
use crate::drivers::hw_init::{self, ADC_VREF, counts_to_volts};
use crate::dsp::electrical::VOLTS_PER_COUNT;
use crate::error::SensorError;
use crate::payload::sensor_type;

// ── Voltage (energy sector) ───────────────────────────────────

/// Mid-rail bias of the voltage transformer input.
pub const ADC_MIDSCALE: f32 = 2048.0;
/// Samples per scalar RMS reading.
pub const RMS_SAMPLES: usize = 256;

/// Scalar mains RMS from a burst of one-shot ADC reads.
pub struct VoltageReader {
    channel: u32,
    cal: Calibration,
}

impl VoltageReader {
    pub fn new(cal: Calibration) -> Self {
        Self { channel: hw_init::ADC1_CH_VOLTAGE, cal }
    }
}

impl<B> SensorReader<B> for VoltageReader {
    fn sensor_type(&self) -> u8 {
        sensor_type::VOLTAGE
    }

    fn read(&mut self, _bus: &mut B) -> Result<Reading, SensorError> {
        let mut sum_sq = 0.0f32;
        for _ in 0..RMS_SAMPLES {
            let v = hw_init::adc1_read(self.channel) as f32 - ADC_MIDSCALE;
            sum_sq += v * v;
        }
        let counts_rms = (sum_sq / RMS_SAMPLES as f32).sqrt();
        let volts = counts_rms * VOLTS_PER_COUNT * self.cal.voltage_gain + self.cal.voltage_offset;
        Ok(Reading { sensor_type: sensor_type::VOLTAGE, value: volts.max(0.0) })
    }
}

// ── Pressure (water sector) ───────────────────────────────────

/// Default I²C address of the ABP-class pressure transducer.
pub const PRESSURE_I2C_ADDR: u8 = 0x28;
const COUNTS_MIN: f32 = 1638.0;
const COUNTS_MAX: f32 = 14745.0;

/// Digital pressure transducer with a 10 %–90 % transfer function.
///
/// The two-byte response carries status in bits 15–14 (0 = valid,
/// 2 = stale, 3 = diagnostic fault) and a 14-bit bridge count.
pub struct PressureReader {
    address: u8,
    range_bar: f32,
}

impl PressureReader {
    pub fn new(range_bar: f32) -> Self {
        Self { address: PRESSURE_I2C_ADDR, range_bar }
    }

    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// Decode a raw response into bar.
    pub fn decode(&self, raw: [u8; 2]) -> Result<f32, SensorError> {
        let word = u16::from_be_bytes(raw);
        if word >> 14 == 3 {
            return Err(SensorError::OutOfRange);
        }
        let counts = (word & 0x3FFF) as f32;
        let bar = (counts - COUNTS_MIN) * self.range_bar / (COUNTS_MAX - COUNTS_MIN);
        // Allow a little headroom past the transfer band before calling it a fault.
        if bar < -0.05 * self.range_bar || bar > 1.05 * self.range_bar {
            return Err(SensorError::OutOfRange);
        }
        Ok(bar.max(0.0))
    }
}

impl<B: I2c> SensorReader<B> for PressureReader {
    fn sensor_type(&self) -> u8 {
        sensor_type::PRESSURE
    }

    fn read(&mut self, bus: &mut B) -> Result<Reading, SensorError> {
        let mut raw = [0u8; 2];
        bus.read(self.address, &mut raw).map_err(|e| match e.kind() {
            ErrorKind::NoAcknowledge(_) => SensorError::NotPresent,
            _ => SensorError::AdcReadFailed,
        })?;
        let value = self.decode(raw)?;
        Ok(Reading { sensor_type: sensor_type::PRESSURE, value })
    }
}

// ── Temperature (airport sector, water probe) ─────────────────

const R25: f32 = 10_000.0;
const BETA: f32 = 3950.0;
const T25_K: f32 = 298.15;
const R_DIVIDER: f32 = 10_000.0;

/// NTC thermistor (10 kΩ @ 25 °C, B = 3950) in a divider with 10 kΩ.
pub struct TemperatureReader {
    channel: u32,
}

impl TemperatureReader {
    pub fn new() -> Self {
        Self { channel: hw_init::ADC1_CH_TEMP }
    }

    pub fn read_celsius(&self) -> Result<f32, SensorError> {
        ntc_celsius(hw_init::adc1_read(self.channel))
    }
}

impl Default for TemperatureReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Beta-equation conversion. A rail-stuck divider means an open or
/// shorted thermistor.
pub fn ntc_celsius(raw: u16) -> Result<f32, SensorError> {
    let voltage = counts_to_volts(raw);
    if voltage <= 0.01 || voltage >= ADC_VREF - 0.01 {
        return Err(SensorError::OutOfRange);
    }
    let r_ntc = R_DIVIDER * voltage / (ADC_VREF - voltage);
    let inv_t = (1.0 / T25_K) + (1.0 / BETA) * (r_ntc / R25).ln();
    if inv_t <= 0.0 {
        return Err(SensorError::OutOfRange);
    }
    Ok((1.0 / inv_t) - 273.15)
}

impl<B> SensorReader<B> for TemperatureReader {
    fn sensor_type(&self) -> u8 {
        sensor_type::TEMPERATURE
    }

    fn read(&mut self, _bus: &mut B) -> Result<Reading, SensorError> {
        let value = self.read_celsius()?;
        Ok(Reading { sensor_type: sensor_type::TEMPERATURE, value })
    }
}

// ── Generic analog ────────────────────────────────────────────

/// Spare analog input reported as pin voltage.
pub struct GenericReader {
    channel: u32,
}

impl GenericReader {
    pub fn new() -> Self {
        Self { channel: hw_init::ADC1_CH_GENERIC }
    }
}

impl Default for GenericReader {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> SensorReader<B> for GenericReader {
    fn sensor_type(&self) -> u8 {
        sensor_type::GENERIC
    }

    fn read(&mut self, _bus: &mut B) -> Result<Reading, SensorError> {
        let value = counts_to_volts(hw_init::adc1_read(self.channel));
        Ok(Reading { sensor_type: sensor_type::GENERIC, value })
    }
}

// ── Selection ─────────────────────────────────────────────────

/// Pick the reader for the configured sector.
pub fn reader_for<B: I2c + 'static>(
    cfg: &DeviceConfig,
    cal: Calibration,
) -> Box<dyn SensorReader<B> + Send> {
    match cfg.sector() {
        Sector::Energy => Box::new(VoltageReader::new(cal)),
        Sector::Water => Box::new(PressureReader::new(cfg.water.pressure_range_bar)),
        Sector::Airport => Box::new(TemperatureReader::new()),
        Sector::Generic => Box::new(GenericReader::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{NoAcknowledgeSource, Operation};

    #[derive(Debug)]
    struct BusFault(ErrorKind);

    impl embedded_hal::i2c::Error for BusFault {
        fn kind(&self) -> ErrorKind {
            self.0
        }
    }

    /// Answers every read with a fixed response, or fails.
    struct FixedI2c(Option<[u8; 2]>);

    impl embedded_hal::i2c::ErrorType for FixedI2c {
        type Error = BusFault;
    }

    impl I2c for FixedI2c {
        fn transaction(
            &mut self,
            _address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            let Some(resp) = self.0 else {
                return Err(BusFault(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)));
            };
            for op in operations {
                if let Operation::Read(buf) = op {
                    buf.copy_from_slice(&resp[..buf.len()]);
                }
            }
            Ok(())
        }
    }

    fn counts(word: u16) -> Option<[u8; 2]> {
        Some(word.to_be_bytes())
    }

    #[test]
    fn pressure_transfer_function() {
        let mut r = PressureReader::new(10.0);
        let mut bus = FixedI2c(counts(1638));
        assert!(r.read(&mut bus).unwrap().value.abs() < 1e-4);

        let mut bus = FixedI2c(counts(14745));
        let full = r.read(&mut bus).unwrap();
        assert_eq!(full.sensor_type, sensor_type::PRESSURE);
        assert!((full.value - 10.0).abs() < 1e-3);

        let mid = (1638 + 14745) / 2;
        let mut bus = FixedI2c(counts(mid as u16));
        assert!((r.read(&mut bus).unwrap().value - 5.0).abs() < 1e-3);
    }

    #[test]
    fn pressure_faults() {
        let mut r = PressureReader::new(10.0);
        let mut bus = FixedI2c(counts(0xC000 | 5000));
        assert_eq!(r.read(&mut bus), Err(SensorError::OutOfRange));

        let mut bus = FixedI2c(counts(0x3FFF));
        assert_eq!(r.read(&mut bus), Err(SensorError::OutOfRange));

        let mut bus = FixedI2c(None);
        assert_eq!(r.read(&mut bus), Err(SensorError::NotPresent));
    }

    #[test]
    fn ntc_conversion() {
        // Mid-scale divider means R_ntc == R_divider, i.e. 25 °C.
        let t = ntc_celsius(2048).unwrap();
        assert!((t - 25.0).abs() < 0.2, "{t}");
        // Higher pin voltage = higher NTC resistance = colder.
        assert!(ntc_celsius(3000).unwrap() < t);
        assert_eq!(ntc_celsius(0), Err(SensorError::OutOfRange));
        assert_eq!(ntc_celsius(4095), Err(SensorError::OutOfRange));
    }

    #[cfg(not(target_os = "espidf"))]
    #[test]
    fn voltage_reader_scales_with_calibration() {
        hw_init::sim_set_adc(hw_init::ADC1_CH_VOLTAGE, 2048 + 1024);
        let mut r = VoltageReader::new(Calibration::uncalibrated());
        let reading = SensorReader::<()>::read(&mut r, &mut ()).unwrap();
        assert!((reading.value - 200.0).abs() < 0.01);

        let mut cal = Calibration::uncalibrated();
        cal.voltage_gain = 1.1;
        cal.voltage_offset = 2.0;
        let mut r = VoltageReader::new(cal);
        let reading = SensorReader::<()>::read(&mut r, &mut ()).unwrap();
        assert!((reading.value - 222.0).abs() < 0.01);
    }

    #[test]
    fn sector_selects_reader() {
        let cal = Calibration::uncalibrated();
        let types: Vec<u8> = [Sector::Energy, Sector::Water, Sector::Airport, Sector::Generic]
            .into_iter()
            .map(|s| reader_for::<FixedI2c>(&DeviceConfig::for_sector(s), cal).sensor_type())
            .collect();
        assert_eq!(
            types,
            [
                sensor_type::VOLTAGE,
                sensor_type::PRESSURE,
                sensor_type::TEMPERATURE,
                sensor_type::GENERIC
            ]
        );
    }
}
