//! UplinkService against the mock radio: join, telemetry under the
//! duty-cycle gate, alert bypass and maintenance downlinks.

use nexusnode::app::commands::CommandEffect;
use nexusnode::app::events::NodeEvent;
use nexusnode::app::ports::Reading;
use nexusnode::app::service::{
    JOIN_FAILED_INTERVAL_MS, SEND_FAILED_INTERVAL_MS, UplinkOutcome, UplinkService,
};
use nexusnode::config::{ConfigStore, DeviceConfig, Sector};
use nexusnode::lorawan::crypto::Direction;
use nexusnode::lorawan::frame::{self, FRAME_OVERHEAD, MHDR_PROPRIETARY};
use nexusnode::lorawan::{SessionState, ports};
use nexusnode::payload::{self, sensor_type};
use nexusnode::runtime::{Alert, SampleBody, SensorSample};
use nexusnode::safety;

use crate::mock_hw::{DEV_ADDR, MockClock, MockRadio, RecordingSink, accept_frame, session};

type Service = UplinkService<MockRadio, MockClock>;

/// Byte offset of FPort in an uplink data frame.
const FPORT_AT: usize = 8;

fn store() -> ConfigStore {
    ConfigStore::new(DeviceConfig::for_sector(Sector::Generic))
}

fn scalar(seq: u32) -> SensorSample {
    SensorSample {
        seq,
        timestamp_ms: 120_000,
        sector: Sector::Generic,
        body: SampleBody::Scalar(Reading {
            sensor_type: sensor_type::GENERIC,
            value: 2.75,
        }),
        battery: 88,
        rssi: -100,
        snr: -20,
    }
}

fn joined(store: &ConfigStore, sink: &mut RecordingSink) -> Service {
    let mut svc = UplinkService::new(session());
    svc.session_mut().radio_mut().queue_rx(&accept_frame());
    assert!(svc.ensure_joined(sink));
    svc.sync_config(store).unwrap();
    svc
}

/// Run ensure_joined through one whole failed round.
fn fail_join_round(svc: &mut Service, sink: &mut RecordingSink) {
    for _ in 0..svc.session().policy().join_attempts {
        assert!(!svc.ensure_joined(sink));
    }
}

fn downlink(svc: &Service, fcnt: u32, port: u8, body: &[u8]) -> Vec<u8> {
    let keys = svc.session().session_keys().expect("joined");
    frame::data_frame(keys, Direction::Down, DEV_ADDR, fcnt, port, body)
        .unwrap()
        .to_vec()
}

// ── Join ──────────────────────────────────────────────────────

#[test]
fn join_emits_event_and_clears_fault() {
    let mut sink = RecordingSink::new();
    let mut svc = UplinkService::new(session());

    // Mid-round: only a short wait, no fault yet.
    assert!(!svc.ensure_joined(&mut sink));
    assert!(!svc.join_fault());
    assert_eq!(svc.take_backoff_ms(), None);
    assert_eq!(svc.take_join_wait_ms(), Some(svc.session().policy().join_backoff_ms));
    assert!(sink.events.is_empty());

    assert!(!svc.ensure_joined(&mut sink));
    assert!(!svc.ensure_joined(&mut sink));
    assert!(svc.join_fault());
    assert_eq!(svc.take_backoff_ms(), Some(JOIN_FAILED_INTERVAL_MS));
    assert_eq!(svc.take_backoff_ms(), None);
    assert_eq!(svc.take_join_wait_ms(), None);
    assert_eq!(sink.events, [NodeEvent::JoinRoundFailed { round: 1 }]);

    svc.session_mut().radio_mut().queue_rx(&accept_frame());
    assert!(svc.ensure_joined(&mut sink));
    assert!(!svc.join_fault());
    assert_eq!(sink.events.last(), Some(&NodeEvent::Joined { dev_addr: DEV_ADDR }));

    // Already joined: no further radio traffic.
    let sent = svc.session().radio().sent.len();
    assert!(svc.ensure_joined(&mut sink));
    assert_eq!(svc.session().radio().sent.len(), sent);
}

#[test]
fn degraded_radio_restored_by_config_after_join() {
    let store = store();
    let mut sink = RecordingSink::new();
    let mut svc = UplinkService::new(session());

    fail_join_round(&mut svc, &mut sink);
    assert_eq!(svc.session().params().spreading_factor, 12);

    // Config cannot undo the degrade while there is no session.
    svc.sync_config(&store).unwrap();
    assert_eq!(svc.session().params().spreading_factor, 12);

    svc.session_mut().radio_mut().queue_rx(&accept_frame());
    assert!(svc.ensure_joined(&mut sink));
    store.update(|c| c.spreading_factor = 10).unwrap();
    svc.sync_config(&store).unwrap();
    assert_eq!(svc.session().params().spreading_factor, 10);
    assert!(!svc.session().is_degraded());
}

#[test]
fn rejoin_after_failed_round_restores_configured_link() {
    let store = store();
    let cfg = store.snapshot();
    let mut sink = RecordingSink::new();
    let mut svc = joined(&store, &mut sink);
    assert_eq!(svc.session().params().spreading_factor, cfg.spreading_factor);

    svc.session_mut().reset();
    fail_join_round(&mut svc, &mut sink);
    assert!(svc.session().is_degraded());

    svc.session_mut().radio_mut().queue_rx(&accept_frame());
    assert!(svc.ensure_joined(&mut sink));
    // No configuration change since the first join.
    svc.sync_config(&store).unwrap();
    assert_eq!(svc.session().params().spreading_factor, cfg.spreading_factor);
    assert_eq!(svc.session().params().tx_power_dbm, cfg.tx_power_dbm);
    assert!(!svc.session().is_degraded());
}

#[test]
fn alert_goes_out_between_join_attempts() {
    let mut sink = RecordingSink::new();
    let mut svc = UplinkService::new(session());

    assert!(!svc.ensure_joined(&mut sink));
    assert!(svc.take_join_wait_ms().is_some());
    assert!(svc.handle_alert(&leak_alert(), &mut sink).unwrap());
    assert_eq!(svc.session().radio().last_sent().map(|f| f[0]), Some(MHDR_PROPRIETARY));

    svc.session_mut().radio_mut().queue_rx(&accept_frame());
    assert!(svc.ensure_joined(&mut sink));
    assert!(!svc.join_fault());
}

// ── Telemetry ─────────────────────────────────────────────────

#[test]
fn sample_goes_out_once_per_duty_cycle_window() {
    let store = store();
    let cfg = store.snapshot();
    let mut sink = RecordingSink::new();
    let mut svc = joined(&store, &mut sink);

    assert_eq!(svc.handle_sample(&scalar(0), &cfg, &mut sink).unwrap(), UplinkOutcome::Sent { fcnt: 0 });
    let frame = svc.session().radio().last_sent().unwrap().to_vec();
    assert_eq!(frame.len(), FRAME_OVERHEAD + payload::UNIVERSAL_LEN);
    assert_eq!(frame[FPORT_AT], ports::TELEMETRY);

    let min_tx = u64::from(svc.session().policy().min_tx_interval_ms);
    assert_eq!(
        svc.handle_sample(&scalar(1), &cfg, &mut sink).unwrap(),
        UplinkOutcome::Throttled { remaining_ms: min_tx }
    );

    svc.session_mut().clock_mut().advance(min_tx);
    assert_eq!(svc.handle_sample(&scalar(2), &cfg, &mut sink).unwrap(), UplinkOutcome::Sent { fcnt: 1 });
    assert_eq!(sink.count(|e| matches!(e, NodeEvent::UplinkSent { .. })), 2);
}

#[test]
fn sample_before_join_is_reported_not_sent() {
    let store = store();
    let mut sink = RecordingSink::new();
    let mut svc = UplinkService::new(session());
    let r = svc.handle_sample(&scalar(0), &store.snapshot(), &mut sink).unwrap();
    assert_eq!(r, UplinkOutcome::NotJoined);
    assert!(svc.session().radio().sent.is_empty());
}

#[test]
fn failed_send_hands_sample_back_for_retry() {
    let store = store();
    let cfg = store.snapshot();
    let mut sink = RecordingSink::new();
    let mut svc = joined(&store, &mut sink);
    svc.session_mut().radio_mut().fail_tx = 1;

    let wait_ms = svc.session().policy().send_retry_delay_ms;
    assert_eq!(svc.handle_sample(&scalar(0), &cfg, &mut sink).unwrap(), UplinkOutcome::Retrying { wait_ms });
    assert_eq!(svc.take_backoff_ms(), None);
    assert_eq!(svc.handle_sample(&scalar(0), &cfg, &mut sink).unwrap(), UplinkOutcome::Sent { fcnt: 1 });
}

#[test]
fn exhausted_retries_widen_interval_and_never_reuse_counter() {
    let store = store();
    let cfg = store.snapshot();
    let mut sink = RecordingSink::new();
    let mut svc = joined(&store, &mut sink);
    let attempts = svc.session().policy().send_attempts;
    svc.session_mut().radio_mut().fail_tx = u32::from(attempts);

    for _ in 1..attempts {
        assert!(matches!(
            svc.handle_sample(&scalar(0), &cfg, &mut sink).unwrap(),
            UplinkOutcome::Retrying { .. }
        ));
    }
    assert_eq!(svc.handle_sample(&scalar(0), &cfg, &mut sink).unwrap(), UplinkOutcome::Deferred);
    assert_eq!(svc.take_backoff_ms(), Some(SEND_FAILED_INTERVAL_MS));
    assert!(sink.events.contains(&NodeEvent::UplinkDeferred {
        port: ports::TELEMETRY,
        next_interval_ms: SEND_FAILED_INTERVAL_MS,
    }));

    // Nothing went on air, so the gate is open; the counter moved on.
    assert_eq!(
        svc.handle_sample(&scalar(1), &cfg, &mut sink).unwrap(),
        UplinkOutcome::Sent { fcnt: u32::from(attempts) }
    );
}

#[test]
fn low_spreading_factor_uses_full_layout_high_uses_compact() {
    let store = store();
    let mut sink = RecordingSink::new();
    let mut svc = joined(&store, &mut sink);

    store.update(|c| c.spreading_factor = 12).unwrap();
    svc.sync_config(&store).unwrap();
    let cfg = store.snapshot();
    svc.handle_sample(&scalar(0), &cfg, &mut sink).unwrap();
    let frame = svc.session().radio().last_sent().unwrap();
    assert_eq!(frame.len(), FRAME_OVERHEAD + payload::COMPACT_LEN);
}

// ── Alerts ────────────────────────────────────────────────────

fn leak_alert() -> Alert {
    let bytes = payload::encode_water_alert(&payload::WaterAlert {
        sector_id: Sector::Water.id(),
        alert_bits: safety::water::LEAK,
        pressure_bar: 2.1,
        trend_bar: -0.8,
        node_id: 4,
        timestamp: 600,
    });
    Alert::new(ports::EMERGENCY_WATER, safety::water::LEAK, &bytes).unwrap()
}

#[test]
fn alert_ignores_duty_cycle_window() {
    let store = store();
    let cfg = store.snapshot();
    let mut sink = RecordingSink::new();
    let mut svc = joined(&store, &mut sink);

    svc.handle_sample(&scalar(0), &cfg, &mut sink).unwrap();
    assert!(svc.session().duty_cycle_remaining_ms() > 0);

    assert!(svc.handle_alert(&leak_alert(), &mut sink).unwrap());
    let frame = svc.session().radio().last_sent().unwrap();
    assert_eq!(frame[FPORT_AT], ports::EMERGENCY_WATER);
    assert_eq!(
        sink.events.last(),
        Some(&NodeEvent::EmergencySent {
            port: ports::EMERGENCY_WATER,
            mask: safety::water::LEAK,
            delivered: true,
        })
    );
}

#[test]
fn alert_without_session_goes_out_as_beacon() {
    let mut sink = RecordingSink::new();
    let mut svc = UplinkService::new(session());
    assert!(svc.handle_alert(&leak_alert(), &mut sink).unwrap());
    let frame = svc.session().radio().last_sent().unwrap();
    assert_eq!(frame[0], MHDR_PROPRIETARY);
}

#[test]
fn alert_wakes_sleeping_radio_and_puts_it_back() {
    let store = store();
    let mut sink = RecordingSink::new();
    let mut svc = joined(&store, &mut sink);
    store.update(|c| c.low_power = true).unwrap();
    svc.sync_config(&store).unwrap();

    svc.idle();
    assert_eq!(svc.session().state(), SessionState::Sleep);
    assert!(svc.handle_alert(&leak_alert(), &mut sink).unwrap());
    assert!(svc.session().radio().asleep);
    assert_eq!(svc.session().state(), SessionState::Sleep);
}

// ── Downlink ──────────────────────────────────────────────────

#[test]
fn maintenance_downlink_changes_link_settings() {
    let store = store();
    let mut sink = RecordingSink::new();
    let mut svc = joined(&store, &mut sink);

    let dl = downlink(&svc, 0, ports::MAINTENANCE, &[0x02, 11]);
    svc.session_mut().radio_mut().queue_rx(&dl);

    let effect = svc.poll_downlink(&store, &mut sink);
    assert_eq!(effect, Some(CommandEffect::ConfigChanged { version: 1 }));
    assert_eq!(store.snapshot().spreading_factor, 11);
    assert!(sink.events.contains(&NodeEvent::ConfigChanged { version: 1 }));

    svc.sync_config(&store).unwrap();
    assert_eq!(svc.session().params().spreading_factor, 11);
    assert_eq!(svc.session().radio().configured.last().map(|p| p.spreading_factor), Some(11));
}

#[test]
fn replayed_downlink_is_ignored() {
    let store = store();
    let mut sink = RecordingSink::new();
    let mut svc = joined(&store, &mut sink);

    let dl = downlink(&svc, 3, ports::MAINTENANCE, &[0x04, 1]);
    svc.session_mut().radio_mut().queue_rx(&dl);
    svc.session_mut().radio_mut().queue_rx(&dl);

    assert!(svc.poll_downlink(&store, &mut sink).is_some());
    assert!(svc.poll_downlink(&store, &mut sink).is_none());
    assert_eq!(store.version(), 1);
}

#[test]
fn invalid_command_value_leaves_config_untouched() {
    let store = store();
    let mut sink = RecordingSink::new();
    let mut svc = joined(&store, &mut sink);

    let dl = downlink(&svc, 0, ports::MAINTENANCE, &[0x02, 3]);
    svc.session_mut().radio_mut().queue_rx(&dl);
    assert_eq!(svc.poll_downlink(&store, &mut sink), None);
    assert_eq!(store.version(), 0);
    assert_eq!(store.snapshot().spreading_factor, DeviceConfig::factory().spreading_factor);
}

#[test]
fn rejoin_command_drops_session() {
    let store = store();
    let mut sink = RecordingSink::new();
    let mut svc = joined(&store, &mut sink);

    let dl = downlink(&svc, 0, ports::MAINTENANCE, &[0x05]);
    svc.session_mut().radio_mut().queue_rx(&dl);
    assert_eq!(svc.poll_downlink(&store, &mut sink), Some(CommandEffect::Rejoin));
    assert!(!svc.session().is_joined());
}

#[test]
fn downlink_on_other_port_is_not_a_command() {
    let store = store();
    let mut sink = RecordingSink::new();
    let mut svc = joined(&store, &mut sink);

    let dl = downlink(&svc, 0, 42, &[0x06]);
    svc.session_mut().radio_mut().queue_rx(&dl);
    assert_eq!(svc.poll_downlink(&store, &mut sink), None);
}
