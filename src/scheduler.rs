//! Maintenance scheduler.
//!
//! Runs alongside the sensing tasks and fires slow housekeeping jobs. The
//! scheduler only keeps time; when an entry fires it notifies a
//! [`SchedulerDelegate`], and the housekeeping task decides what to do.
//!
//! ```text
//!  ┌───────────────────────────────────────────────────────────┐
//!  │  hourly tick   daily health   weekly cal.   168 h flow    │
//!  │       │             │              │             │        │
//!  │       ▼             ▼              ▼             ▼        │
//!  │  ┌─────────────────────────────────────────────────────┐  │
//!  │  │              SchedulerDelegate                      │  │
//!  │  │   (housekeeping task: metrics, flags, reminders)    │  │
//!  │  └─────────────────────────────────────────────────────┘  │
//!  └───────────────────────────────────────────────────────────┘
//! ```

use crate::app::ports::{ScheduleFiredKind, SchedulerDelegate};
use log::info;

pub const HOUR_MS: u64 = 3_600_000;

/// Labels of the standard maintenance entries.
pub mod labels {
    pub const MAINTENANCE: &str = "maintenance";
    pub const HEALTH_CHECK: &str = "health-check";
    pub const CALIBRATION: &str = "calibration-reminder";
    pub const FLOW_RESET: &str = "flow-reset";
}

// ═══════════════════════════════════════════════════════════════
//  Schedule types
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct Schedule {
    pub label: &'static str,
    pub kind: ScheduleKind,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    /// Fire every `interval_ms`.
    Periodic { interval_ms: u64 },
    /// Fire once after `delay_ms`, then auto-disable.
    OneShot { delay_ms: u64 },
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// Maximum number of concurrent schedules (stack-allocated).
const MAX_SCHEDULES: usize = 6;

pub struct Scheduler {
    schedules: [Option<ScheduleEntry>; MAX_SCHEDULES],
    enabled: bool,
}

#[derive(Debug, Clone)]
struct ScheduleEntry {
    schedule: Schedule,
    elapsed_ms: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            schedules: [const { None }; MAX_SCHEDULES],
            enabled: true,
        }
    }

    /// The node's standard maintenance plan.
    pub fn maintenance() -> Self {
        let mut sched = Self::new();
        let plan = [
            (labels::MAINTENANCE, HOUR_MS),
            (labels::HEALTH_CHECK, 24 * HOUR_MS),
            (labels::CALIBRATION, 7 * 24 * HOUR_MS),
            (labels::FLOW_RESET, 168 * HOUR_MS),
        ];
        for (label, interval_ms) in plan {
            sched.add(Schedule {
                label,
                kind: ScheduleKind::Periodic { interval_ms },
                enabled: true,
            });
        }
        sched
    }

    /// Add a schedule. Returns the slot index, or `None` if full.
    pub fn add(&mut self, schedule: Schedule) -> Option<usize> {
        let (i, slot) = self.schedules.iter_mut().enumerate().find(|(_, s)| s.is_none())?;
        info!("Scheduler: added '{}' at slot {}", schedule.label, i);
        *slot = Some(ScheduleEntry {
            schedule,
            elapsed_ms: 0,
        });
        Some(i)
    }

    pub fn remove(&mut self, slot: usize) {
        if let Some(entry) = self.schedules.get_mut(slot).and_then(Option::take) {
            info!("Scheduler: removed '{}' from slot {}", entry.schedule.label, slot);
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Advance every entry by `elapsed_ms` and notify `delegate` of fires.
    pub fn tick(&mut self, elapsed_ms: u64, delegate: &mut dyn SchedulerDelegate) {
        if !self.enabled {
            return;
        }

        for entry in self.schedules.iter_mut().flatten() {
            if !entry.schedule.enabled {
                continue;
            }
            entry.elapsed_ms = entry.elapsed_ms.saturating_add(elapsed_ms);

            match entry.schedule.kind {
                ScheduleKind::Periodic { interval_ms } => {
                    if entry.elapsed_ms >= interval_ms {
                        info!("Scheduler: '{}' fired", entry.schedule.label);
                        delegate.on_schedule_fired(entry.schedule.label, ScheduleFiredKind::Periodic);
                        entry.elapsed_ms = 0;
                    }
                }
                ScheduleKind::OneShot { delay_ms } => {
                    if entry.elapsed_ms >= delay_ms {
                        info!("Scheduler: '{}' one-shot fired", entry.schedule.label);
                        delegate.on_schedule_fired(entry.schedule.label, ScheduleFiredKind::OneShot);
                        entry.schedule.enabled = false;
                    }
                }
            }
        }
    }

    /// Number of enabled schedules.
    pub fn active_count(&self) -> usize {
        self.schedules
            .iter()
            .flatten()
            .filter(|e| e.schedule.enabled)
            .count()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingDelegate {
        fires: Vec<(String, ScheduleFiredKind)>,
    }

    impl RecordingDelegate {
        fn new() -> Self {
            Self { fires: Vec::new() }
        }

        fn count(&self, label: &str) -> usize {
            self.fires.iter().filter(|(l, _)| l == label).count()
        }
    }

    impl SchedulerDelegate for RecordingDelegate {
        fn on_schedule_fired(&mut self, label: &str, kind: ScheduleFiredKind) {
            self.fires.push((label.to_string(), kind));
        }
    }

    #[test]
    fn periodic_fires_at_interval() {
        let mut sched = Scheduler::new();
        let mut delegate = RecordingDelegate::new();
        sched.add(Schedule {
            label: "test-periodic",
            kind: ScheduleKind::Periodic { interval_ms: 10_000 },
            enabled: true,
        });

        for _ in 0..9 {
            sched.tick(1_000, &mut delegate);
        }
        assert!(delegate.fires.is_empty());

        sched.tick(1_000, &mut delegate);
        assert_eq!(delegate.fires.len(), 1);
        assert_eq!(delegate.fires[0].1, ScheduleFiredKind::Periodic);
    }

    #[test]
    fn oneshot_fires_once() {
        let mut sched = Scheduler::new();
        let mut delegate = RecordingDelegate::new();
        sched.add(Schedule {
            label: "test-oneshot",
            kind: ScheduleKind::OneShot { delay_ms: 5_000 },
            enabled: true,
        });

        sched.tick(4_000, &mut delegate);
        assert!(delegate.fires.is_empty());
        sched.tick(1_000, &mut delegate);
        assert_eq!(delegate.fires.len(), 1);
        assert_eq!(delegate.fires[0].1, ScheduleFiredKind::OneShot);

        for _ in 0..10 {
            sched.tick(10_000, &mut delegate);
        }
        assert_eq!(delegate.fires.len(), 1);
        assert_eq!(sched.active_count(), 0);
    }

    #[test]
    fn maintenance_plan_over_one_week() {
        let mut sched = Scheduler::maintenance();
        let mut delegate = RecordingDelegate::new();
        assert_eq!(sched.active_count(), 4);

        for _ in 0..168 {
            sched.tick(HOUR_MS, &mut delegate);
        }
        assert_eq!(delegate.count(labels::MAINTENANCE), 168);
        assert_eq!(delegate.count(labels::HEALTH_CHECK), 7);
        assert_eq!(delegate.count(labels::CALIBRATION), 1);
        assert_eq!(delegate.count(labels::FLOW_RESET), 1);
    }

    #[test]
    fn disabled_scheduler_does_nothing() {
        let mut sched = Scheduler::maintenance();
        let mut delegate = RecordingDelegate::new();
        sched.set_enabled(false);
        sched.tick(200 * HOUR_MS, &mut delegate);
        assert!(delegate.fires.is_empty());
    }

    #[test]
    fn removed_slot_is_reused() {
        let mut sched = Scheduler::new();
        let s = Schedule {
            label: "a",
            kind: ScheduleKind::OneShot { delay_ms: 1 },
            enabled: true,
        };
        assert_eq!(sched.add(s.clone()), Some(0));
        assert_eq!(sched.add(s.clone()), Some(1));
        sched.remove(0);
        assert_eq!(sched.add(s), Some(0));
    }
}
