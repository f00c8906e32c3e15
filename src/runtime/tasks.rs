//! Task loops and their threads.
//!
//! Every task is a FreeRTOS thread pinned to the application core with an
//! explicit priority; inside the thread an async loop waits on embassy
//! timers and channels. The housekeeping thread multiplexes three low-rate
//! loops on one `edge_executor::LocalExecutor`.
//!
//! ```text
//!  prio 5  leak ────────────── LEAK_CHANNEL ──┐
//!  prio 4  uplink ◀─────────────────────────────┼── ALERT_CHANNEL ◀── prio 3 electrical / water
//!  prio 2  acquisition ──────── SAMPLE_QUEUE ──┘
//!  prio 1  housekeeping: power · maintenance · heartbeat LED
//! ```
//!
//! Long waits are sliced so each subscribed task feeds the watchdog at
//! least every [`FEED_SLICE_MS`].

use core::sync::atomic::Ordering;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Timer, with_timeout};
use embedded_hal::i2c::I2c;
use futures_lite::future;
use log::{debug, info, warn};

use crate::adapters::hardware::BatteryGauge;
use crate::adapters::log_sink::LogEventSink;
use crate::app::commands::CommandEffect;
use crate::app::events::NodeEvent;
use crate::app::ports::{
    ClockPort, EventSink, IndicatorPort, RadioPort, ScheduleFiredKind, SchedulerDelegate, SensorReader, StoragePort,
};
use crate::app::service::{UplinkOutcome, UplinkService};
use crate::config::{Calibration, ConfigStore, Sector};
use crate::diagnostics::{CrashLog, HealthReport};
use crate::drivers::led_patterns::{LedPatternEngine, TICK_MS};
use crate::drivers::status_led::StatusLed;
use crate::drivers::task_pin::{Core, spawn_on_core};
use crate::drivers::watchdog::{FEED_SLICE_MS, Watchdog};
use crate::leak::{ALARM_BLINKS, ALARM_PERIOD_MS};
use crate::power::{POLL_INTERVAL_MS, PowerController};
use crate::scheduler::{Scheduler, labels};
use crate::sensors::SharedBus;
use crate::sensors::bus::MEASUREMENT_LOCK_TIMEOUT;
use crate::sensors::reader_for;

use super::channels::{
    ADC_BLOCKS, ALERT_CHANNEL, Alert, LEAK_ACTIVE, LEAK_CHANNEL, METRICS, NODE_STATUS, SAMPLE_QUEUE, SampleBody,
    SensorSample, TOTALIZER_RESET,
};
use super::cycles::{self, ElectricalCycle, LeakMonitor, WaterCycle};

// ── Priorities and stacks ─────────────────────────────────────

pub const PRIO_LEAK: u8 = 5;
pub const PRIO_UPLINK: u8 = 4;
pub const PRIO_PROCESSING: u8 = 3;
pub const PRIO_ACQUISITION: u8 = 2;
pub const PRIO_HOUSEKEEPING: u8 = 1;

const STACK_LEAK_KB: usize = 6;
const STACK_UPLINK_KB: usize = 12;
/// FFT scratch lives on this stack.
const STACK_ELECTRICAL_KB: usize = 24;
const STACK_WATER_KB: usize = 8;
const STACK_ACQUISITION_KB: usize = 8;
const STACK_HOUSEKEEPING_KB: usize = 10;

/// How often the electrical task looks for a completed ADC block.
const BLOCK_POLL_MS: u64 = 100;
/// Scheduler resolution.
const MAINTENANCE_TICK_MS: u32 = 60_000;

/// Handles every task needs, all `'static`.
pub struct Shared<B: 'static> {
    pub config: &'static ConfigStore,
    pub bus: &'static SharedBus<B>,
}

impl<B> Clone for Shared<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for Shared<B> {}

// ── Helpers ───────────────────────────────────────────────────

/// Sleep `ms`, feeding the watchdog between slices.
async fn wait_fed(wdt: &Watchdog, ms: u32) {
    let mut left = ms;
    while left > 0 {
        let slice = left.min(FEED_SLICE_MS);
        Timer::after_millis(u64::from(slice)).await;
        wdt.feed();
        left -= slice;
    }
}

/// Interval for the next cycle, widened by any pending backpressure.
fn next_interval(base_ms: u32) -> u32 {
    NODE_STATUS.take_interval_override().map_or(base_ms, |ms| ms.max(base_ms))
}

fn raise<const N: usize>(channel: &Channel<CriticalSectionRawMutex, Alert, N>, alert: Alert) {
    let (port, mask) = (alert.port, alert.mask);
    if channel.try_send(alert).is_err() {
        warn!("ALERT: channel full, port {} mask 0x{:02X} dropped", port, mask);
    }
}

fn bus_skipped(sink: &mut impl EventSink) {
    METRICS.bus_skipped();
    sink.emit(&NodeEvent::BusSkipped);
}

// ═══════════════════════════════════════════════════════════════
//  Sensing tasks
// ═══════════════════════════════════════════════════════════════

/// Airport and generic sectors: one scalar reading per interval.
async fn acquisition_task<B, K>(shared: Shared<B>, mut reader: Box<dyn SensorReader<B> + Send>, clock: K)
where
    K: ClockPort,
{
    let wdt = Watchdog::subscribe("acquisition");
    let mut sink = LogEventSink::new();
    loop {
        wdt.feed();
        let cfg = shared.config.snapshot();
        let now = clock.now_ms();
        let read = shared
            .bus
            .with_bus(MEASUREMENT_LOCK_TIMEOUT, |bus| cycles::read_scalar(reader.as_mut(), bus))
            .await;
        match read {
            Ok(Ok(body)) => {
                cycles::publish_sample(&SAMPLE_QUEUE, body, cfg.sector(), now, &mut sink);
            }
            Ok(Err(e)) => warn!("acquisition: sensor 0x{:02X} failed: {}", reader.sensor_type(), e),
            Err(_) => bus_skipped(&mut sink),
        }
        wait_fed(&wdt, next_interval(cfg.sampling_interval_ms)).await;
    }
}

/// Energy sector: analyse each ADC block, alert per block, report per
/// sampling interval.
async fn electrical_task<K: ClockPort>(config: &'static ConfigStore, cal: Calibration, clock: K) {
    let wdt = Watchdog::subscribe("electrical");
    let mut sink = LogEventSink::new();
    let mut cycle = ElectricalCycle::new(cal);
    loop {
        wdt.feed();
        if let Some(block) = ADC_BLOCKS.take() {
            let cfg = config.snapshot();
            let now = clock.now_ms();
            let out = cycle.run(&block, &cfg, now);
            drop(block);

            if let Some(alert) = out.alert {
                raise(&ALERT_CHANNEL, alert);
            }
            if let Some(ms) = NODE_STATUS.take_interval_override() {
                cycle.postpone(now, ms);
            }
            if cycle.report_due(now, cfg.sampling_interval_ms) {
                cycles::publish_sample(
                    &SAMPLE_QUEUE,
                    SampleBody::Electrical(out.measurement),
                    Sector::Energy,
                    now,
                    &mut sink,
                );
            }
        }
        Timer::after_millis(BLOCK_POLL_MS).await;
    }
}

/// Water sector: full probe cycle at the adaptive interval.
async fn water_task<B: I2c, K: ClockPort>(shared: Shared<B>, clock: K) {
    let wdt = Watchdog::subscribe("water");
    let mut sink = LogEventSink::new();
    let mut cycle = WaterCycle::new(&shared.config.snapshot().water);
    loop {
        wdt.feed();
        if TOTALIZER_RESET.swap(false, Ordering::AcqRel) {
            cycle.reset_totalizer();
        }
        let cfg = shared.config.snapshot();
        let now = clock.now_ms();
        let read = shared
            .bus
            .with_bus(MEASUREMENT_LOCK_TIMEOUT, |bus| cycle.read(bus, now))
            .await;
        let interval = match read {
            Ok(readings) => {
                let out = cycle.assess(&readings, LEAK_ACTIVE.load(Ordering::Acquire), &cfg, now);
                if let Some(alert) = out.alert {
                    raise(&ALERT_CHANNEL, alert);
                }
                cycles::publish_sample(&SAMPLE_QUEUE, SampleBody::Water(out.measurement), Sector::Water, now, &mut sink);
                out.next_interval_ms
            }
            Err(_) => {
                bus_skipped(&mut sink);
                cfg.water.measurement_interval_ms
            }
        };
        wait_fed(&wdt, next_interval(interval)).await;
    }
}

/// Highest priority: pressure trend only, at the leak check interval.
async fn leak_task<B: I2c, K: ClockPort>(shared: Shared<B>, clock: K) {
    let wdt = Watchdog::subscribe("leak");
    let mut sink = LogEventSink::new();
    let mut monitor = LeakMonitor::new(&shared.config.snapshot().water);
    loop {
        wdt.feed();
        let cfg = shared.config.snapshot();
        let now = clock.now_ms();
        match shared
            .bus
            .with_bus(MEASUREMENT_LOCK_TIMEOUT, |bus| monitor.read_pressure(bus))
            .await
        {
            Ok(Ok(pressure)) => {
                if let Some(alert) = monitor.evaluate(pressure, now, &cfg, &mut sink) {
                    NODE_STATUS.request_alarm();
                    raise(&LEAK_CHANNEL, alert);
                }
                LEAK_ACTIVE.store(monitor.is_active(), Ordering::Release);
            }
            Ok(Err(e)) => debug!("leak: pressure read failed: {}", e),
            Err(_) => bus_skipped(&mut sink),
        }
        wait_fed(&wdt, monitor.check_interval_ms()).await;
    }
}

// ═══════════════════════════════════════════════════════════════
//  Uplink
// ═══════════════════════════════════════════════════════════════

enum Outbound {
    Alert(Alert),
    Sample(SensorSample),
}

/// Next alert, leak first.
async fn next_alert() -> Alert {
    future::or(LEAK_CHANNEL.receive(), ALERT_CHANNEL.receive()).await
}

/// Next message; alerts are always taken before samples.
async fn next_outbound() -> Outbound {
    future::or(async { Outbound::Alert(next_alert().await) }, async {
        Outbound::Sample(SAMPLE_QUEUE.receive().await)
    })
    .await
}

fn send_alert<R: RadioPort, C: ClockPort>(svc: &mut UplinkService<R, C>, alert: &Alert, sink: &mut impl EventSink) {
    match svc.handle_alert(alert, sink) {
        Ok(true) => METRICS.emergency_sent(),
        Ok(false) => METRICS.send_failed(),
        Err(e) => {
            METRICS.send_failed();
            warn!("uplink: alert on port {} failed: {}", alert.port, e);
        }
    }
}

/// Wait `ms`, putting any alert that arrives on air straight away.
async fn serve_alerts_for<R: RadioPort, C: ClockPort>(
    svc: &mut UplinkService<R, C>,
    wdt: &Watchdog,
    sink: &mut impl EventSink,
    ms: u32,
) {
    let deadline = Instant::now() + Duration::from_millis(u64::from(ms));
    loop {
        wdt.feed();
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let slice = (deadline - now).min(Duration::from_millis(u64::from(FEED_SLICE_MS)));
        if let Ok(alert) = with_timeout(slice, next_alert()).await {
            send_alert(svc, &alert, sink);
        }
    }
}

/// Send one sample, serving alerts during the waits between attempts.
async fn send_sample<R: RadioPort, C: ClockPort>(
    svc: &mut UplinkService<R, C>,
    sample: &SensorSample,
    config: &ConfigStore,
    wdt: &Watchdog,
    sink: &mut impl EventSink,
) {
    loop {
        match svc.handle_sample(sample, &config.snapshot(), sink) {
            Ok(UplinkOutcome::Retrying { wait_ms }) => serve_alerts_for(svc, wdt, sink, wait_ms).await,
            Ok(UplinkOutcome::Deferred) => {
                METRICS.send_failed();
                return;
            }
            Ok(_) => return,
            Err(e) => {
                METRICS.send_failed();
                warn!("uplink: sample {} failed: {}", sample.seq, e);
                return;
            }
        }
    }
}

async fn uplink_task<R: RadioPort, C: ClockPort>(mut svc: UplinkService<R, C>, config: &'static ConfigStore) {
    let wdt = Watchdog::subscribe("uplink");
    let mut sink = LogEventSink::new();
    let slice = Duration::from_millis(u64::from(FEED_SLICE_MS));
    loop {
        wdt.feed();
        let joined = svc.ensure_joined(&mut sink);
        NODE_STATUS.set_join_fault(svc.join_fault());
        if !joined {
            let pause = match svc.take_backoff_ms() {
                Some(ms) => {
                    NODE_STATUS.widen_next_interval(ms);
                    ms
                }
                None => svc.take_join_wait_ms().unwrap_or(FEED_SLICE_MS),
            };
            serve_alerts_for(&mut svc, &wdt, &mut sink, pause).await;
            continue;
        }
        wdt.feed();

        if let Err(e) = svc.sync_config(config) {
            warn!("uplink: radio settings not applied: {}", e);
        }

        match with_timeout(slice, next_outbound()).await {
            Ok(Outbound::Alert(alert)) => send_alert(&mut svc, &alert, &mut sink),
            Ok(Outbound::Sample(sample)) => send_sample(&mut svc, &sample, config, &wdt, &mut sink).await,
            Err(_) => {}
        }

        match svc.poll_downlink(config, &mut sink) {
            Some(CommandEffect::ResetTotalizer) => TOTALIZER_RESET.store(true, Ordering::Release),
            Some(CommandEffect::Rejoin) => info!("uplink: rejoin requested"),
            Some(CommandEffect::ConfigChanged { .. }) | None => {}
        }

        if let Some(ms) = svc.take_backoff_ms() {
            NODE_STATUS.widen_next_interval(ms);
        }
        NODE_STATUS.set_link(svc.session().rssi(), svc.session().snr());
        svc.idle();
    }
}

// ═══════════════════════════════════════════════════════════════
//  Housekeeping
// ═══════════════════════════════════════════════════════════════

/// Bridges scheduler fires to storage, flags and logs.
struct MaintenanceDelegate<'a, S: StoragePort> {
    config: &'static ConfigStore,
    storage: &'a mut S,
    crash_log: CrashLog,
    persisted_version: u32,
    uptime_secs: u64,
}

impl<S: StoragePort> SchedulerDelegate for MaintenanceDelegate<'_, S> {
    fn on_schedule_fired(&mut self, label: &str, _kind: ScheduleFiredKind) {
        match label {
            labels::MAINTENANCE => {
                let version = self.config.version();
                if version != self.persisted_version {
                    match self.config.persist(&mut *self.storage) {
                        Ok(()) => {
                            info!("maintenance: config v{} persisted", version);
                            self.persisted_version = version;
                        }
                        Err(e) => warn!("maintenance: config not persisted: {}", e),
                    }
                }
            }
            labels::HEALTH_CHECK => {
                let crashes = self.crash_log.count(&*self.storage) as u32;
                HealthReport::collect(self.uptime_secs, crashes).log();
            }
            labels::CALIBRATION => info!("maintenance: weekly calibration check due"),
            labels::FLOW_RESET => TOTALIZER_RESET.store(true, Ordering::Release),
            other => debug!("maintenance: unhandled schedule '{}'", other),
        }
    }
}

async fn power_loop(config: &'static ConfigStore, mut battery: BatteryGauge) {
    let mut controller = PowerController::new();
    let mut sink = LogEventSink::new();
    loop {
        if let Err(e) = controller.poll(&mut battery, config, &mut sink) {
            warn!("power: tier not applied: {}", e);
        }
        NODE_STATUS.set_battery(controller.last_battery());
        Timer::after_millis(u64::from(POLL_INTERVAL_MS)).await;
    }
}

async fn maintenance_loop<S: StoragePort, K: ClockPort>(config: &'static ConfigStore, mut storage: S, clock: K) {
    let mut scheduler = Scheduler::maintenance();
    let mut crash_log = CrashLog::new();
    crash_log.init(&storage);
    let mut delegate = MaintenanceDelegate {
        config,
        storage: &mut storage,
        crash_log,
        persisted_version: config.version(),
        uptime_secs: 0,
    };
    loop {
        Timer::after_millis(u64::from(MAINTENANCE_TICK_MS)).await;
        delegate.uptime_secs = clock.now_ms() / 1000;
        scheduler.tick(u64::from(MAINTENANCE_TICK_MS), &mut delegate);
    }
}

/// Drives the status LED and feeds the watchdog for the whole thread.
async fn heartbeat_loop(mut led: StatusLed, wdt: Watchdog) {
    let mut engine = LedPatternEngine::new();
    engine.set_heartbeat(true);
    loop {
        engine.set_join_fault(NODE_STATUS.join_fault());
        if NODE_STATUS.take_alarm_request() {
            engine.start_alarm(u32::from(ALARM_BLINKS), ALARM_PERIOD_MS);
        }
        let (r, g, b) = engine.tick(TICK_MS);
        led.set_led(r, g, b);
        wdt.feed();
        Timer::after_millis(u64::from(TICK_MS)).await;
    }
}

fn run_housekeeping<S, K>(config: &'static ConfigStore, battery: BatteryGauge, storage: S, led: StatusLed, clock: K)
where
    S: StoragePort,
    K: ClockPort,
{
    let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();
    let wdt = Watchdog::subscribe("housekeeping");

    executor.spawn(power_loop(config, battery)).detach();
    executor.spawn(maintenance_loop(config, storage, clock)).detach();
    executor.spawn(heartbeat_loop(led, wdt)).detach();

    info!("housekeeping started (power, maintenance, heartbeat)");
    future::block_on(executor.run(core::future::pending::<()>()));
}

// ═══════════════════════════════════════════════════════════════
//  Spawn
// ═══════════════════════════════════════════════════════════════

/// Everything the node runs, handed over once by `main`.
pub struct NodeTasks<B: 'static, R: RadioPort, C: ClockPort, K, S> {
    pub shared: Shared<B>,
    pub calibration: Calibration,
    pub uplink: UplinkService<R, C>,
    pub clock: K,
    pub storage: S,
    pub battery: BatteryGauge,
    pub led: StatusLed,
}

/// Start the task set for the configured sector.
///
/// Energy runs the block processor, water runs the probe and leak tasks,
/// airport and generic run the scalar acquisition task.
pub fn spawn<B, R, C, K, S>(tasks: NodeTasks<B, R, C, K, S>) -> std::io::Result<()>
where
    B: I2c + Send + 'static,
    R: RadioPort + Send + 'static,
    C: ClockPort + Send + 'static,
    K: ClockPort + Clone + Send + 'static,
    S: StoragePort + Send + 'static,
{
    let NodeTasks {
        shared,
        calibration,
        uplink,
        clock,
        storage,
        battery,
        led,
    } = tasks;
    let cfg = shared.config.snapshot();
    let mut sink = LogEventSink::new();
    sink.emit(&NodeEvent::Started {
        sector: cfg.sector(),
        node_id: cfg.node_id,
    });

    let config = shared.config;
    let k = clock.clone();
    spawn_on_core(Core::App, PRIO_UPLINK, STACK_UPLINK_KB, "uplink\0", move || {
        future::block_on(uplink_task(uplink, config));
    })?;

    match cfg.sector() {
        Sector::Energy => {
            spawn_on_core(Core::App, PRIO_PROCESSING, STACK_ELECTRICAL_KB, "electrical\0", move || {
                future::block_on(electrical_task(config, calibration, k));
            })?;
        }
        Sector::Water => {
            let k2 = k.clone();
            spawn_on_core(Core::App, PRIO_LEAK, STACK_LEAK_KB, "leak\0", move || {
                future::block_on(leak_task(shared, k2));
            })?;
            spawn_on_core(Core::App, PRIO_PROCESSING, STACK_WATER_KB, "water\0", move || {
                future::block_on(water_task(shared, k));
            })?;
        }
        Sector::Airport | Sector::Generic => {
            let reader = reader_for::<B>(&cfg, calibration);
            spawn_on_core(Core::App, PRIO_ACQUISITION, STACK_ACQUISITION_KB, "acquisition\0", move || {
                future::block_on(acquisition_task(shared, reader, k));
            })?;
        }
    }

    spawn_on_core(
        Core::App,
        PRIO_HOUSEKEEPING,
        STACK_HOUSEKEEPING_KB,
        "housekeeping\0",
        move || run_housekeeping(config, battery, storage, led, clock),
    )?;
    Ok(())
}
