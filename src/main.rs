//! NexusNode firmware: main entry point.
//!
//! Hexagonal architecture with one FreeRTOS thread per task.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  Sx126x (RadioPort)   NvsAdapter (StoragePort)                 │
//! │  I2C bus (SharedBus)  BatteryGauge (BatteryPort)               │
//! │  Esp32Time (ClockPort) StatusLed (IndicatorPort)               │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  UplinkService · SessionManager · DSP · Leak · Safety  │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  runtime::tasks (leak 5 · uplink 4 · processing 3 · acq 2 · 1) │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use anyhow::Result;
use esp_idf_hal::delay::Delay;
use esp_idf_hal::gpio::PinDriver;
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::spi::{SpiDeviceDriver, SpiDriverConfig, config::Config as SpiConfig};
use esp_idf_hal::units::Hertz;
use log::{error, info, warn};

use nexusnode::adapters::hardware::BatteryGauge;
use nexusnode::adapters::nvs::NvsAdapter;
use nexusnode::adapters::time::Esp32TimeAdapter;
use nexusnode::app::service::UplinkService;
use nexusnode::config::{Calibration, ConfigStore, DeviceConfig, Sector};
use nexusnode::diagnostics;
use nexusnode::drivers::status_led::StatusLed;
use nexusnode::drivers::sx126x::Sx126x;
use nexusnode::drivers::watchdog::Watchdog;
use nexusnode::drivers::{hw_init, hw_timer};
use nexusnode::lorawan::{Credentials, RadioParams, SessionManager, SessionPolicy};
use nexusnode::pins;
use nexusnode::runtime::{self, NodeTasks, Shared};
use nexusnode::sensors::SharedBus;

/// Live configuration, shared by every task.
static CONFIG: ConfigStore = ConfigStore::new(DeviceConfig::factory());

const LORA_SPI_HZ: u32 = 8_000_000;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  NexusNode v{}                    ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    diagnostics::install_panic_handler();
    diagnostics::install_alloc_failure_handler();

    // ── 2. Peripherals ────────────────────────────────────────
    if let Err(e) = hw_init::init_peripherals() {
        // Without the ADC nothing can be measured; the watchdog resets us.
        error!("HAL init failed: {}, halting", e);
        #[allow(clippy::empty_loop)]
        loop {}
    }
    if let Err(e) = hw_init::init_isr_service() {
        error!("ISR service init failed: {}; flow readings will be zero", e);
    }
    Watchdog::configure();

    // ── 3. Persistent state ───────────────────────────────────
    let nvs = NvsAdapter::new().map_err(|e| anyhow::anyhow!("NVS init failed: {}", e))?;
    let cfg = CONFIG.load(&nvs);
    let calibration = Calibration::load(&nvs);
    let creds = Credentials::load(&nvs);
    info!(
        "Node {} in sector {:?}, SF{} / {} dBm, every {} s",
        cfg.node_id,
        cfg.sector(),
        cfg.spreading_factor,
        cfg.tx_power_dbm,
        cfg.sampling_interval_ms / 1000
    );

    // ── 4. Buses ──────────────────────────────────────────────
    let p = Peripherals::take()?;
    let i2c = I2cDriver::new(
        p.i2c0,
        p.pins.gpio14,
        p.pins.gpio15,
        &I2cConfig::new().baudrate(Hertz(pins::I2C_FREQ_HZ)),
    )?;
    let bus: &'static SharedBus<I2cDriver<'static>> = Box::leak(Box::new(SharedBus::new(i2c)));

    let spi = SpiDeviceDriver::new_single(
        p.spi2,
        p.pins.gpio9,
        p.pins.gpio10,
        Some(p.pins.gpio11),
        Some(p.pins.gpio12),
        &SpiDriverConfig::new(),
        &SpiConfig::new().baudrate(Hertz(LORA_SPI_HZ)),
    )?;
    let busy = PinDriver::input(p.pins.gpio16)?;
    let reset = PinDriver::output(p.pins.gpio13)?;

    // ── 5. Radio + session ────────────────────────────────────
    let params = RadioParams::au915().with_link(cfg.spreading_factor, cfg.tx_power_dbm);
    let mut radio = Sx126x::new(spi, busy, reset, Delay::new_default());
    if let Err(e) = radio.init(&params) {
        warn!("SX126x init failed ({}), will retry on first join", e);
    }
    let mut session = SessionManager::new(
        radio,
        Esp32TimeAdapter::new(),
        creds,
        SessionPolicy::factory(),
        params,
    );
    if let Err(e) = session.init() {
        warn!("LoRaWAN: radio configuration failed: {}", e);
    }

    // ── 6. Sampling ───────────────────────────────────────────
    if cfg.sector() == Sector::Energy {
        hw_timer::start_sampling(pins::ADC_SAMPLE_PERIOD_US);
    }

    // ── 7. Tasks ──────────────────────────────────────────────
    runtime::spawn(NodeTasks {
        shared: Shared { config: &CONFIG, bus },
        calibration,
        uplink: UplinkService::new(session),
        clock: Esp32TimeAdapter::new(),
        storage: nvs,
        battery: BatteryGauge::new(),
        led: StatusLed::new(),
    })?;

    info!("System ready.");
    loop {
        std::thread::park();
    }
}
