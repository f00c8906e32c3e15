//! Pressure transducer → leak monitor → emergency uplink, end to end.

use nexusnode::app::events::NodeEvent;
use nexusnode::app::service::UplinkService;
use nexusnode::config::{DeviceConfig, Sector};
use nexusnode::error::SensorError;
use nexusnode::leak::LEAK_CHECK_INTERVAL_MS;
use nexusnode::lorawan::frame::MHDR_PROPRIETARY;
use nexusnode::lorawan::ports;
use nexusnode::payload::decode_water_alert;
use nexusnode::runtime::cycles::LeakMonitor;
use nexusnode::safety;

use crate::mock_hw::{MockI2c, RecordingSink, session};

const STEP_MS: u64 = 10_000;

struct Rig {
    cfg: DeviceConfig,
    monitor: LeakMonitor,
    bus: MockI2c,
    sink: RecordingSink,
    now: u64,
}

impl Rig {
    fn new() -> Self {
        let cfg = DeviceConfig::for_sector(Sector::Water);
        Self {
            monitor: LeakMonitor::new(&cfg.water),
            cfg,
            bus: MockI2c::new(),
            sink: RecordingSink::new(),
            now: 0,
        }
    }

    /// One leak-task iteration at `bar`.
    fn check(&mut self, bar: f32) -> Option<nexusnode::runtime::Alert> {
        self.bus.push_bar(bar, self.cfg.water.pressure_range_bar);
        let p = self.monitor.read_pressure(&mut self.bus).expect("transducer present");
        let alert = self.monitor.evaluate(p, self.now, &self.cfg, &mut self.sink);
        self.now += STEP_MS;
        alert
    }
}

fn leaks(sink: &RecordingSink) -> usize {
    sink.count(|e| matches!(e, NodeEvent::LeakDetected { .. }))
}

#[test]
fn falling_pressure_raises_one_alert_per_episode() {
    let mut rig = Rig::new();
    assert!(rig.check(4.0).is_none());
    assert!(rig.check(3.6).is_none());

    let alert = rig.check(2.8).expect("drop of 0.6 bar/window is a leak");
    assert_eq!(alert.port, ports::EMERGENCY_WATER);
    assert_eq!(alert.mask, safety::water::LEAK);
    let decoded = decode_water_alert(&alert.payload).unwrap();
    assert_eq!(decoded.alert_bits, safety::water::LEAK);
    assert!((decoded.pressure_bar - 2.8).abs() < 0.05, "{}", decoded.pressure_bar);
    assert!(decoded.trend_bar < -0.5);
    assert!(rig.monitor.is_active());
    assert_eq!(rig.monitor.check_interval_ms(), LEAK_CHECK_INTERVAL_MS);

    // Still falling: same episode, no new alert.
    assert!(rig.check(1.5).is_none());
    assert_eq!(leaks(&rig.sink), 1);
}

#[test]
fn episode_ends_after_stable_pressure_and_can_recur() {
    let mut rig = Rig::new();
    for bar in [4.0, 3.6, 2.8] {
        rig.check(bar);
    }
    assert!(rig.monitor.is_active());

    // One reading still sees the earlier drop, then three calm trends.
    for _ in 0..4 {
        assert!(rig.check(2.8).is_none());
    }
    assert!(!rig.monitor.is_active());
    assert_eq!(rig.monitor.check_interval_ms(), rig.cfg.water.leak_check_interval_ms);

    assert!(rig.check(2.8).is_none());
    assert!(rig.check(1.6).is_some());
    assert_eq!(leaks(&rig.sink), 2);
}

#[test]
fn slow_drift_is_not_a_leak() {
    let mut rig = Rig::new();
    let mut bar = 4.0;
    for _ in 0..8 {
        assert!(rig.check(bar).is_none());
        bar -= 0.2;
    }
    assert_eq!(leaks(&rig.sink), 0);
}

#[test]
fn missing_transducer_is_reported_as_not_present() {
    let mut rig = Rig::new();
    rig.bus.present = false;
    assert_eq!(rig.monitor.read_pressure(&mut rig.bus), Err(SensorError::NotPresent));
}

#[test]
fn leak_alert_leaves_node_even_without_network() {
    let mut rig = Rig::new();
    let alert = [4.0, 3.6, 2.8].into_iter().find_map(|bar| rig.check(bar)).unwrap();

    let mut uplink = UplinkService::new(session());
    let mut sink = RecordingSink::new();
    assert!(!uplink.ensure_joined(&mut sink));
    assert!(uplink.handle_alert(&alert, &mut sink).unwrap());

    let beacon = uplink.session().radio().last_sent().unwrap();
    assert_eq!(beacon[0], MHDR_PROPRIETARY);
    assert!(beacon.windows(alert.payload.len()).any(|w| w == alert.payload.as_slice()));
}
