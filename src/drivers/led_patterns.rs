//! LED pattern engine with priority-based pattern selection.
//!
//! The LED task calls `tick()` every [`TICK_MS`] and writes the returned
//! colour to the status LED.
//!
//! ## Priority hierarchy (highest first)
//!
//! 1. **Fatal**: solid red, latched until reset
//! 2. **Alarm**: N red blinks of a given period, then expires
//! 3. **Join fault**: slow amber blink while the node has no session
//! 4. **Heartbeat**: short green flash every 5 s

/// Colour as (R, G, B) tuple, each 0–255.
pub type Rgb = (u8, u8, u8);

/// Recommended tick period for the LED task.
pub const TICK_MS: u32 = 25;

pub const COLOUR_FATAL: Rgb = (255, 0, 0);
pub const COLOUR_ALARM: Rgb = (255, 0, 0);
pub const COLOUR_JOIN_FAULT: Rgb = (255, 160, 0);
pub const COLOUR_HEARTBEAT: Rgb = (0, 255, 40);

const OFF: Rgb = (0, 0, 0);
const JOIN_FAULT_PERIOD_MS: u32 = 2_000;
const HEARTBEAT_PERIOD_MS: u32 = 5_000;
const HEARTBEAT_ON_MS: u32 = 100;

/// Which layer currently drives the LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Fatal,
    Alarm,
    JoinFault,
    Heartbeat,
    Off,
}

#[derive(Debug, Clone, Copy)]
struct Alarm {
    period_ms: u32,
    /// Time left in the whole sequence.
    remaining_ms: u32,
}

/// LED pattern engine. Stack-allocated, no heap.
pub struct LedPatternEngine {
    phase_ms: u32,
    active: Layer,
    fatal: bool,
    alarm: Option<Alarm>,
    join_fault: bool,
    heartbeat: bool,
}

impl LedPatternEngine {
    pub const fn new() -> Self {
        Self {
            phase_ms: 0,
            active: Layer::Off,
            fatal: false,
            alarm: None,
            join_fault: false,
            heartbeat: false,
        }
    }

    /// Latch the fatal pattern. Only a restart clears it.
    pub fn set_fatal(&mut self) {
        self.fatal = true;
    }

    /// Blink `blinks` times with `period_ms` on and `period_ms` off.
    /// A new alarm replaces one still running.
    pub fn start_alarm(&mut self, blinks: u32, period_ms: u32) {
        if blinks == 0 || period_ms == 0 {
            return;
        }
        self.alarm = Some(Alarm {
            period_ms,
            remaining_ms: blinks.saturating_mul(period_ms).saturating_mul(2),
        });
        // Restart the sequence even if an alarm was already showing.
        self.active = Layer::Off;
    }

    pub fn set_join_fault(&mut self, active: bool) {
        self.join_fault = active;
    }

    pub fn set_heartbeat(&mut self, active: bool) {
        self.heartbeat = active;
    }

    pub fn layer(&self) -> Layer {
        self.active
    }

    /// Advance the pattern phase and return the current RGB output.
    pub fn tick(&mut self, delta_ms: u32) -> Rgb {
        self.phase_ms = self.phase_ms.wrapping_add(delta_ms);
        if let Some(alarm) = &mut self.alarm {
            if self.active == Layer::Alarm {
                alarm.remaining_ms = alarm.remaining_ms.saturating_sub(delta_ms);
            }
            if alarm.remaining_ms == 0 {
                self.alarm = None;
            }
        }

        let selected = self.select();
        if selected != self.active {
            self.phase_ms = 0;
            self.active = selected;
        }

        match self.active {
            Layer::Fatal => COLOUR_FATAL,
            Layer::Alarm => match self.alarm {
                Some(a) if (self.phase_ms / a.period_ms) % 2 == 0 => COLOUR_ALARM,
                _ => OFF,
            },
            Layer::JoinFault => {
                blink(self.phase_ms, JOIN_FAULT_PERIOD_MS, JOIN_FAULT_PERIOD_MS / 2, COLOUR_JOIN_FAULT)
            }
            Layer::Heartbeat => blink(self.phase_ms, HEARTBEAT_PERIOD_MS, HEARTBEAT_ON_MS, COLOUR_HEARTBEAT),
            Layer::Off => OFF,
        }
    }

    fn select(&self) -> Layer {
        if self.fatal {
            Layer::Fatal
        } else if self.alarm.is_some() {
            Layer::Alarm
        } else if self.join_fault {
            Layer::JoinFault
        } else if self.heartbeat {
            Layer::Heartbeat
        } else {
            Layer::Off
        }
    }
}

impl Default for LedPatternEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn blink(phase_ms: u32, period_ms: u32, on_ms: u32, colour: Rgb) -> Rgb {
    if phase_ms % period_ms < on_ms { colour } else { OFF }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_engine_is_dark() {
        let mut engine = LedPatternEngine::new();
        assert_eq!(engine.tick(TICK_MS), OFF);
        assert_eq!(engine.layer(), Layer::Off);
    }

    #[test]
    fn heartbeat_flashes_briefly() {
        let mut engine = LedPatternEngine::new();
        engine.set_heartbeat(true);
        assert_eq!(engine.tick(0), COLOUR_HEARTBEAT);
        assert_eq!(engine.tick(200), OFF);
        assert_eq!(engine.tick(HEARTBEAT_PERIOD_MS - 200), COLOUR_HEARTBEAT);
    }

    #[test]
    fn alarm_blinks_then_expires() {
        let mut engine = LedPatternEngine::new();
        engine.set_heartbeat(true);
        engine.start_alarm(20, 50);

        let mut samples = vec![engine.tick(0)];
        while engine.layer() == Layer::Alarm {
            samples.push(engine.tick(TICK_MS));
            assert!(samples.len() < 1_000, "alarm never expired");
        }
        assert_eq!(samples.last(), Some(&COLOUR_HEARTBEAT));

        let alarm = &samples[..samples.len() - 1];
        assert_eq!(alarm.len(), 80, "20 blinks of 50 ms on + 50 ms off");
        let rising = (0..alarm.len())
            .filter(|&k| alarm[k] == COLOUR_ALARM && (k == 0 || alarm[k - 1] != COLOUR_ALARM))
            .count();
        assert_eq!(rising, 20);
    }

    #[test]
    fn fatal_overrides_everything() {
        let mut engine = LedPatternEngine::new();
        engine.set_join_fault(true);
        engine.start_alarm(5, 50);
        engine.set_fatal();
        for _ in 0..100 {
            assert_eq!(engine.tick(TICK_MS), COLOUR_FATAL);
        }
        assert_eq!(engine.layer(), Layer::Fatal);
    }

    #[test]
    fn join_fault_below_alarm() {
        let mut engine = LedPatternEngine::new();
        engine.set_join_fault(true);
        assert_eq!(engine.tick(0), COLOUR_JOIN_FAULT);
        engine.start_alarm(1, 50);
        assert_eq!(engine.tick(0), COLOUR_ALARM);
        engine.tick(50);
        engine.tick(50);
        engine.tick(0);
        assert_eq!(engine.layer(), Layer::JoinFault);
    }
}
