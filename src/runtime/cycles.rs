//! One iteration of each sensing task, free of timers and threads.
//!
//! The task loops in [`super::tasks`] only wait, lock the bus and move
//! messages; what a cycle computes and whether it raises an alert lives
//! here so it can be driven directly in tests.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embedded_hal::i2c::I2c;
use log::debug;

use crate::app::events::NodeEvent;
use crate::app::ports::{EventSink, SensorReader};
use crate::config::{Calibration, DeviceConfig, Sector, WaterThresholds};
use crate::dsp::electrical::{self, AnalysisParams, ElectricalMeasurement};
use crate::dsp::water::{self, FlowTotalizer, WaterMeasurement, WaterReadings};
use crate::error::SensorError;
use crate::leak::{LEAK_MEASUREMENT_INTERVAL_MS, LeakDetector};
use crate::lorawan::ports;
use crate::payload::{self, ElectricalAlert, WaterAlert};
use crate::safety::{self, Profile, SafetySupervisor};
use crate::sensors::{PressureReader, WaterProbe};

use super::channels::{Alert, METRICS, NODE_STATUS, SampleBody, SensorSample, lossy_enqueue};

/// Next-interval cap while pressure is elevated.
pub const ELEVATED_PRESSURE_INTERVAL_MS: u32 = 60_000;

fn timestamp_secs(now_ms: u64) -> u32 {
    (now_ms / 1000) as u32
}

// ── Sample publication ────────────────────────────────────────

/// Stamp `body` with sequence, battery and link metadata and enqueue it
/// without blocking. Returns the number of samples discarded to make room.
pub fn publish_sample<const N: usize>(
    queue: &Channel<CriticalSectionRawMutex, SensorSample, N>,
    body: SampleBody,
    sector: Sector,
    now_ms: u64,
    sink: &mut impl EventSink,
) -> usize {
    let (rssi, snr) = NODE_STATUS.link();
    let sample = SensorSample {
        seq: METRICS.sample_produced(),
        timestamp_ms: now_ms,
        sector,
        body,
        battery: NODE_STATUS.battery(),
        rssi,
        snr,
    };
    let dropped = lossy_enqueue(queue, sample);
    if dropped > 0 {
        METRICS.queue_reset();
        sink.emit(&NodeEvent::QueueReset { dropped });
    }
    dropped
}

// ── Scalar sectors ────────────────────────────────────────────

/// Read one value through the sector's reader. The caller holds the bus.
pub fn read_scalar<B>(reader: &mut dyn SensorReader<B>, bus: &mut B) -> Result<SampleBody, SensorError> {
    reader.read(bus).map(SampleBody::Scalar)
}

// ── Electrical ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ElectricalOutcome {
    pub measurement: ElectricalMeasurement,
    pub alert: Option<Alert>,
}

/// Per-block analysis plus the telemetry cadence for the energy sector.
pub struct ElectricalCycle {
    cal: Calibration,
    supervisor: SafetySupervisor,
    next_report_ms: Option<u64>,
}

impl ElectricalCycle {
    pub fn new(cal: Calibration) -> Self {
        Self {
            cal,
            supervisor: SafetySupervisor::new(Profile::Electrical),
            next_report_ms: None,
        }
    }

    /// Analyse one interleaved block and decide on an emergency.
    pub fn run(&mut self, block: &[u16], cfg: &DeviceConfig, now_ms: u64) -> ElectricalOutcome {
        let params = AnalysisParams::from_thresholds(&cfg.electrical);
        let measurement = electrical::analyze(block, &params, &self.cal, &cfg.electrical);

        let alert = if self.supervisor.evaluate(measurement.safety_flags, now_ms) {
            let bytes = payload::encode_electrical_alert(&ElectricalAlert {
                sector_id: cfg.sector_id,
                safety_flags: measurement.safety_flags,
                timestamp: timestamp_secs(now_ms),
            });
            Alert::new(ports::EMERGENCY_ELECTRICAL, measurement.safety_flags, &bytes)
        } else {
            None
        };

        ElectricalOutcome { measurement, alert }
    }

    /// Whether a telemetry sample is due. The first block always reports.
    pub fn report_due(&mut self, now_ms: u64, interval_ms: u32) -> bool {
        match self.next_report_ms {
            Some(due) if now_ms < due => false,
            _ => {
                self.next_report_ms = Some(now_ms + u64::from(interval_ms));
                true
            }
        }
    }

    /// Push the next report out to at least `now_ms + ms`.
    pub fn postpone(&mut self, now_ms: u64, ms: u32) {
        let until = now_ms + u64::from(ms);
        self.next_report_ms = Some(self.next_report_ms.map_or(until, |due| due.max(until)));
    }
}

// ── Water ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct WaterOutcome {
    pub measurement: WaterMeasurement,
    pub alert: Option<Alert>,
    pub next_interval_ms: u32,
}

/// Probe, totalizer and alert latch of the water sector.
pub struct WaterCycle {
    probe: WaterProbe,
    totalizer: FlowTotalizer,
    supervisor: SafetySupervisor,
}

impl WaterCycle {
    pub fn new(thresholds: &WaterThresholds) -> Self {
        Self {
            probe: WaterProbe::new(thresholds),
            totalizer: FlowTotalizer::new(),
            supervisor: SafetySupervisor::new(Profile::Water),
        }
    }

    /// Read every channel. The caller holds the bus.
    pub fn read<B: I2c>(&mut self, bus: &mut B, now_ms: u64) -> WaterReadings {
        self.probe.read(bus, now_ms)
    }

    /// Turn readings into a measurement, an optional alert and the next
    /// acquisition interval.
    ///
    /// The leak bit is reported in the measurement but never raises an
    /// alert here: the leak task owns that emergency.
    pub fn assess(
        &mut self,
        readings: &WaterReadings,
        leak_active: bool,
        cfg: &DeviceConfig,
        now_ms: u64,
    ) -> WaterOutcome {
        let measurement = water::assess(readings, leak_active, &mut self.totalizer, now_ms, &cfg.water);
        let mask = measurement.alert_bits & !safety::water::LEAK;

        let alert = if self.supervisor.evaluate(mask, now_ms) {
            let bytes = payload::encode_water_alert(&WaterAlert {
                sector_id: cfg.sector_id,
                alert_bits: mask,
                pressure_bar: measurement.pressure_bar,
                trend_bar: 0.0,
                node_id: cfg.node_id,
                timestamp: timestamp_secs(now_ms),
            });
            Alert::new(ports::EMERGENCY_WATER, mask, &bytes)
        } else {
            None
        };

        let mut next = water::adaptive_interval_ms(measurement.alert_bits, measurement.flow_lpm);
        if measurement.pressure_bar > cfg.water.elevated_pressure_bar {
            next = next.min(ELEVATED_PRESSURE_INTERVAL_MS);
        }
        if leak_active {
            next = next.min(LEAK_MEASUREMENT_INTERVAL_MS);
        }
        if cfg.low_power && measurement.alert_bits == 0 {
            next = next.max(cfg.sampling_interval_ms);
        }

        WaterOutcome {
            measurement,
            alert,
            next_interval_ms: next,
        }
    }

    pub fn reset_totalizer(&mut self) {
        debug!("water: totalizer reset at {:.1} L", self.totalizer.total_l());
        self.totalizer.reset();
    }

    pub fn total_l(&self) -> f32 {
        self.totalizer.total_l()
    }
}

// ── Leak ──────────────────────────────────────────────────────

/// Pressure transducer plus trend detector, run by the leak task.
pub struct LeakMonitor {
    reader: PressureReader,
    detector: LeakDetector,
}

impl LeakMonitor {
    pub fn new(thresholds: &WaterThresholds) -> Self {
        Self {
            reader: PressureReader::new(thresholds.pressure_range_bar),
            detector: LeakDetector::new(thresholds.leak_threshold_bar, thresholds.leak_check_interval_ms),
        }
    }

    /// The caller holds the bus.
    pub fn read_pressure<B: I2c>(&mut self, bus: &mut B) -> Result<f32, SensorError> {
        self.reader.read(bus).map(|r| r.value)
    }

    /// Feed one reading. Returns the emergency for a new episode.
    pub fn evaluate(
        &mut self,
        pressure_bar: f32,
        now_ms: u64,
        cfg: &DeviceConfig,
        sink: &mut impl EventSink,
    ) -> Option<Alert> {
        let verdict = self.detector.push(now_ms, pressure_bar);
        if !verdict.new_episode {
            return None;
        }
        let trend_bar = verdict.trend_bar.unwrap_or(0.0);
        sink.emit(&NodeEvent::LeakDetected { pressure_bar, trend_bar });

        let bytes = payload::encode_water_alert(&WaterAlert {
            sector_id: Sector::Water.id(),
            alert_bits: safety::water::LEAK,
            pressure_bar,
            trend_bar,
            node_id: cfg.node_id,
            timestamp: timestamp_secs(now_ms),
        });
        Alert::new(ports::EMERGENCY_WATER, safety::water::LEAK, &bytes)
    }

    pub fn check_interval_ms(&self) -> u32 {
        self.detector.check_interval_ms()
    }

    pub fn is_active(&self) -> bool {
        self.detector.is_active()
    }
}
