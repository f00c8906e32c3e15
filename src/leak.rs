//! Pressure-trend leak detector.
//!
//! Keeps the last [`HISTORY_LEN`] timestamped pressure readings in a ring.
//! The trend compares the newest reading with the one two samples earlier
//! and is normalised to bar per base check interval using the real
//! timestamps, so a shortened check interval does not inflate it.
//!
//! A leak latches: it is reported once per episode and clears only after
//! [`RECOVERY_SAMPLES`] consecutive non-negative trends.

use log::{info, warn};

pub const HISTORY_LEN: usize = 10;
/// Trend is taken over this many samples (newest and two back).
const TREND_SPAN: usize = 2;
/// Consecutive non-falling trends that end an episode.
pub const RECOVERY_SAMPLES: u8 = 3;

/// Check interval while a leak is active.
pub const LEAK_CHECK_INTERVAL_MS: u32 = 5_000;
/// Measurement interval while a leak is active.
pub const LEAK_MEASUREMENT_INTERVAL_MS: u32 = 30_000;
/// Alarm pattern: blink count and on/off period.
pub const ALARM_BLINKS: u8 = 20;
pub const ALARM_PERIOD_MS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeakVerdict {
    /// `None` until three readings exist.
    pub trend_bar: Option<f32>,
    /// Latched leak state after this reading.
    pub leak: bool,
    /// First reading of a new episode; the caller sends the emergency.
    pub new_episode: bool,
}

pub struct LeakDetector {
    ring: [(u64, f32); HISTORY_LEN],
    head: usize,
    len: usize,
    threshold_bar: f32,
    base_interval_ms: u32,
    active: bool,
    calm: u8,
}

impl LeakDetector {
    /// `threshold_bar` is the drop per `base_interval_ms` that counts as a leak.
    pub fn new(threshold_bar: f32, base_interval_ms: u32) -> Self {
        Self {
            ring: [(0, 0.0); HISTORY_LEN],
            head: 0,
            len: 0,
            threshold_bar: threshold_bar.abs(),
            base_interval_ms: base_interval_ms.max(1),
            active: false,
            calm: 0,
        }
    }

    /// Reading `back` samples before the newest.
    fn nth_back(&self, back: usize) -> Option<(u64, f32)> {
        if back >= self.len {
            return None;
        }
        let idx = (self.head + HISTORY_LEN - 1 - back) % HISTORY_LEN;
        Some(self.ring[idx])
    }

    fn trend(&self) -> Option<f32> {
        let (t_new, p_new) = self.nth_back(0)?;
        let (t_old, p_old) = self.nth_back(TREND_SPAN)?;
        let elapsed = t_new.saturating_sub(t_old);
        if elapsed == 0 {
            return None;
        }
        let windows = elapsed as f32 / self.base_interval_ms as f32;
        Some((p_new - p_old) / windows)
    }

    /// Add one reading and evaluate.
    pub fn push(&mut self, now_ms: u64, pressure_bar: f32) -> LeakVerdict {
        self.ring[self.head] = (now_ms, pressure_bar);
        self.head = (self.head + 1) % HISTORY_LEN;
        self.len = (self.len + 1).min(HISTORY_LEN);

        let trend = self.trend();
        let mut new_episode = false;
        match trend {
            Some(t) if t < -self.threshold_bar => {
                self.calm = 0;
                if !self.active {
                    self.active = true;
                    new_episode = true;
                    warn!("LEAK: pressure falling {:.2} bar/window at {:.2} bar", t, pressure_bar);
                }
            }
            Some(t) if self.active && t >= 0.0 => {
                self.calm += 1;
                if self.calm >= RECOVERY_SAMPLES {
                    self.active = false;
                    self.calm = 0;
                    info!("LEAK: pressure recovered at {:.2} bar", pressure_bar);
                }
            }
            Some(_) if self.active => self.calm = 0,
            _ => {}
        }

        LeakVerdict {
            trend_bar: trend,
            leak: self.active,
            new_episode,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Interval until the next pressure check.
    pub fn check_interval_ms(&self) -> u32 {
        if self.active {
            LEAK_CHECK_INTERVAL_MS.min(self.base_interval_ms)
        } else {
            self.base_interval_ms
        }
    }

    /// Measurement interval, shortened while a leak is active.
    pub fn measurement_interval_ms(&self, normal_ms: u32) -> u32 {
        if self.active {
            LEAK_MEASUREMENT_INTERVAL_MS.min(normal_ms)
        } else {
            normal_ms
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(d: &mut LeakDetector, seq: &[f32], step_ms: u64) -> Vec<LeakVerdict> {
        seq.iter()
            .enumerate()
            .map(|(i, &p)| d.push(i as u64 * step_ms, p))
            .collect()
    }

    #[test]
    fn falling_pressure_trips_on_sixth_sample() {
        let mut d = LeakDetector::new(0.5, 10_000);
        let v = feed(&mut d, &[5.0, 5.0, 5.0, 4.9, 4.3, 3.5], 10_000);
        assert!(v[..5].iter().all(|x| !x.leak));
        assert!(v[5].leak && v[5].new_episode);
        let t = v[5].trend_bar.unwrap();
        assert!((t - -0.7).abs() < 1e-4, "trend {t}");
        assert!((v[4].trend_bar.unwrap() - -0.35).abs() < 1e-4);
    }

    #[test]
    fn constant_pressure_never_trips() {
        let mut d = LeakDetector::new(0.5, 10_000);
        let v = feed(&mut d, &[4.0; 25], 10_000);
        assert!(v.iter().all(|x| !x.leak));
        assert_eq!(v[0].trend_bar, None);
        assert_eq!(v[2].trend_bar, Some(0.0));
    }

    #[test]
    fn episode_reported_once_and_recovers() {
        let mut d = LeakDetector::new(0.5, 10_000);
        let v = feed(&mut d, &[5.0, 4.0, 3.0, 2.0, 1.0, 1.0, 1.0, 1.0, 1.0], 10_000);
        assert_eq!(v.iter().filter(|x| x.new_episode).count(), 1);
        assert!(v[4].leak);
        assert_eq!(d.check_interval_ms(), 10_000, "recovered after three calm trends");
        assert!(!v[8].leak);
    }

    #[test]
    fn intervals_shorten_during_leak() {
        let mut d = LeakDetector::new(0.5, 10_000);
        feed(&mut d, &[5.0, 4.0, 3.0], 10_000);
        assert!(d.is_active());
        assert_eq!(d.check_interval_ms(), 5_000);
        assert_eq!(d.measurement_interval_ms(60_000), 30_000);
    }

    #[test]
    fn trend_uses_real_elapsed_time() {
        // Same drop over half the time is twice as steep.
        let mut d = LeakDetector::new(0.5, 10_000);
        d.push(0, 5.0);
        d.push(5_000, 4.85);
        let v = d.push(10_000, 4.7);
        assert!((v.trend_bar.unwrap() - -0.3).abs() < 1e-4);
        assert!(!v.leak);
    }

    #[test]
    fn trend_reads_across_ring_wrap() {
        let mut d = LeakDetector::new(0.5, 10_000);
        let mut now = 0;
        for _ in 0..14 {
            d.push(now, 5.0);
            now += 10_000;
        }
        let v = d.push(now, 4.2);
        assert!((v.trend_bar.unwrap() - -0.4).abs() < 1e-4);
        assert!(!v.leak);
        let v = d.push(now + 10_000, 3.8);
        assert!((v.trend_bar.unwrap() - -0.6).abs() < 1e-4);
        assert!(v.new_episode);
    }
}
