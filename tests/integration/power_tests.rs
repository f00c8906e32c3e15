//! Battery tiers driving the shared configuration, and what survives a
//! reboot through storage.

use nexusnode::app::events::NodeEvent;
use nexusnode::config::{CALIBRATION_MAGIC, Calibration, ConfigStore, DeviceConfig, Sector};
use nexusnode::lorawan::Credentials;
use nexusnode::power::{PowerController, PowerTier, battery_percent_from_mv};

use crate::mock_hw::{MockBattery, MockStorage, RecordingSink};

fn poll(ctl: &mut PowerController, percent: u8, store: &ConfigStore, sink: &mut RecordingSink) -> Option<PowerTier> {
    ctl.poll(&mut MockBattery { percent }, store, sink).unwrap()
}

#[test]
fn tier_changes_publish_radio_and_cadence() {
    let store = ConfigStore::new(DeviceConfig::for_sector(Sector::Airport));
    let mut sink = RecordingSink::new();
    let mut ctl = PowerController::new();

    assert_eq!(poll(&mut ctl, 80, &store, &mut sink), Some(PowerTier::Normal));
    let cfg = store.snapshot();
    assert_eq!(cfg.sampling_interval_ms, 300_000);
    assert_eq!(cfg.spreading_factor, 10);
    assert!(!cfg.low_power);

    assert_eq!(poll(&mut ctl, 35, &store, &mut sink), Some(PowerTier::Low));
    let cfg = store.snapshot();
    assert_eq!(cfg.sampling_interval_ms, 1_800_000);
    assert_eq!(cfg.spreading_factor, 11);
    assert!(cfg.low_power);

    assert_eq!(poll(&mut ctl, 10, &store, &mut sink), Some(PowerTier::Critical));
    let cfg = store.snapshot();
    assert_eq!(cfg.sampling_interval_ms, 3_600_000);
    assert_eq!(cfg.spreading_factor, 12);
    assert_eq!(cfg.tx_power_dbm, 10);

    assert_eq!(
        sink.events.last(),
        Some(&NodeEvent::PowerTier {
            tier: PowerTier::Critical,
            battery: 10,
        })
    );
    assert_eq!(store.version(), 3);
    // Sector and identity are never touched.
    assert_eq!(cfg.sector(), Sector::Airport);
}

#[test]
fn same_tier_publishes_nothing() {
    let store = ConfigStore::default();
    let mut sink = RecordingSink::new();
    let mut ctl = PowerController::new();

    poll(&mut ctl, 90, &store, &mut sink);
    let version = store.version();
    assert_eq!(poll(&mut ctl, 55, &store, &mut sink), None);
    assert_eq!(store.version(), version);
    assert_eq!(sink.events.len(), 1);
    assert_eq!(ctl.last_battery(), 55);
}

#[test]
fn band_edges_belong_to_the_upper_tier() {
    let store = ConfigStore::default();
    let mut sink = RecordingSink::new();
    let mut ctl = PowerController::new();

    assert_eq!(poll(&mut ctl, 50, &store, &mut sink), Some(PowerTier::Normal));
    assert_eq!(poll(&mut ctl, 49, &store, &mut sink), Some(PowerTier::Low));
    assert_eq!(poll(&mut ctl, 20, &store, &mut sink), None);
    assert_eq!(poll(&mut ctl, 19, &store, &mut sink), Some(PowerTier::Critical));
}

#[test]
fn battery_voltage_maps_linearly_and_clamps() {
    assert_eq!(battery_percent_from_mv(3_300), 0);
    assert_eq!(battery_percent_from_mv(4_200), 100);
    assert_eq!(battery_percent_from_mv(3_750), 50);
    assert_eq!(battery_percent_from_mv(2_900), 0);
    assert_eq!(battery_percent_from_mv(4_500), 100);
}

// ── Persistence ───────────────────────────────────────────────

#[test]
fn tiered_config_survives_reboot() {
    let mut nvs = MockStorage::new();
    let store = ConfigStore::new(DeviceConfig::for_sector(Sector::Energy));
    let mut ctl = PowerController::new();
    poll(&mut ctl, 30, &store, &mut RecordingSink::new());
    store.persist(&mut nvs).unwrap();

    let rebooted = ConfigStore::new(DeviceConfig::factory());
    let cfg = rebooted.load(&nvs);
    assert_eq!(cfg, store.snapshot());
    assert_eq!(cfg.sector(), Sector::Energy);
}

#[test]
fn empty_storage_keeps_defaults() {
    let nvs = MockStorage::new();
    let store = ConfigStore::new(DeviceConfig::for_sector(Sector::Water));
    assert_eq!(store.load(&nvs), DeviceConfig::for_sector(Sector::Water));
    assert_eq!(store.version(), 0);
}

#[test]
fn calibration_requires_magic() {
    let mut nvs = MockStorage::new();
    let cal = Calibration {
        voltage_gain: 1.02,
        current_gain: 0.97,
        magic: CALIBRATION_MAGIC,
        ..Calibration::uncalibrated()
    };
    cal.save(&mut nvs).unwrap();
    assert_eq!(Calibration::load(&nvs), cal);

    let bogus = Calibration { magic: 0, ..cal };
    bogus.save(&mut nvs).unwrap();
    assert_eq!(Calibration::load(&nvs), Calibration::uncalibrated());
}

#[test]
fn provisioned_credentials_replace_factory_set() {
    let mut nvs = MockStorage::new();
    assert_eq!(Credentials::load(&nvs).dev_eui, Credentials::factory().dev_eui);

    let mut creds = Credentials::factory();
    creds.dev_eui = [1, 2, 3, 4, 5, 6, 7, 8];
    creds.app_key = [0x5A; 16];
    creds.store(&mut nvs).unwrap();

    let loaded = Credentials::load(&nvs);
    assert_eq!(loaded.dev_eui, creds.dev_eui);
    assert_eq!(loaded.app_key, creds.app_key);
    assert_eq!(nvs.writes, 1);
}
