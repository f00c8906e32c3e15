//! GPIO / peripheral pin assignments for the NexusNode sensor board.
//!
//! Single source of truth. Every driver references this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// Analog front end (ADC1)
// ---------------------------------------------------------------------------

/// Mains voltage transformer output, biased to mid-rail. ADC1 channel 0.
pub const VOLTAGE_ADC_GPIO: i32 = 1;
/// Current transformer burden output, biased to mid-rail. ADC1 channel 1.
pub const CURRENT_ADC_GPIO: i32 = 2;
/// Battery divider (1:2). ADC1 channel 2.
pub const BATTERY_ADC_GPIO: i32 = 3;
/// NTC thermistor, 10 kΩ @ 25 °C in a divider. ADC1 channel 3.
pub const TEMP_ADC_GPIO: i32 = 4;
/// pH probe amplifier output. ADC1 channel 4.
pub const PH_ADC_GPIO: i32 = 5;
/// Turbidity sensor output. ADC1 channel 5.
pub const TURBIDITY_ADC_GPIO: i32 = 6;
/// Spare analog input used by the generic sector. ADC1 channel 6.
pub const GENERIC_ADC_GPIO: i32 = 7;

/// Battery divider ratio (V_batt / V_pin).
pub const BATTERY_DIVIDER: f32 = 2.0;

// ---------------------------------------------------------------------------
// Digital / pulse inputs
// ---------------------------------------------------------------------------

/// Hall-effect flow meter pulse output, interrupt-driven.
pub const FLOW_PULSE_GPIO: i32 = 8;

// ---------------------------------------------------------------------------
// Shared I²C sensor bus (pressure transducer, expansion)
// ---------------------------------------------------------------------------

pub const I2C_SDA_GPIO: i32 = 14;
pub const I2C_SCL_GPIO: i32 = 15;
pub const I2C_FREQ_HZ: u32 = 100_000;

// ---------------------------------------------------------------------------
// LoRa transceiver (SX1262 on SPI2)
// ---------------------------------------------------------------------------

pub const LORA_SCK_GPIO: i32 = 9;
pub const LORA_MOSI_GPIO: i32 = 10;
pub const LORA_MISO_GPIO: i32 = 11;
pub const LORA_NSS_GPIO: i32 = 12;
pub const LORA_RST_GPIO: i32 = 13;
pub const LORA_BUSY_GPIO: i32 = 16;
pub const LORA_DIO1_GPIO: i32 = 17;

// ---------------------------------------------------------------------------
// Status LED (discrete RGB on LEDC)
// ---------------------------------------------------------------------------

pub const LED_R_GPIO: i32 = 38;
pub const LED_G_GPIO: i32 = 39;
pub const LED_B_GPIO: i32 = 40;
/// LEDC frequency for the status LED.
pub const LED_PWM_FREQ_HZ: u32 = 1_000;

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

/// Period of the electrical sampling timer (2 kHz).
pub const ADC_SAMPLE_PERIOD_US: u64 = 500;
