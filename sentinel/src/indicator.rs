//! Indicator LED driver.
//!
//! Three output channels each carry a commanded [`Pattern`]. Patterns are
//! rendered cooperatively: the sample loop calls [`IndicatorDriver::refresh`]
//! once per tick and the driver writes a line only when its level changes, so
//! no blink threads are needed and indicators lag state by at most one tick.

use std::time::{Duration, Instant};

use hardware::DigitalOutput;
use tracing::{debug, warn};

use crate::config::TimingConfig;
use crate::detector::MotionState;

/// Output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Red: motion currently sensed
    Armed,
    /// Yellow: episode accumulating toward the threshold
    Active,
    /// Green: alert delivered
    Alert,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Armed, Channel::Active, Channel::Alert];

    fn index(self) -> usize {
        match self {
            Channel::Armed => 0,
            Channel::Active => 1,
            Channel::Alert => 2,
        }
    }
}

/// Commanded output pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Off,
    /// Steady on
    Detecting,
    /// Square wave at the blink period, starting on
    ConfirmedBlink,
    /// A fixed burst of short pulses, then off
    AlertFlash,
}

/// Blink and flash timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternTiming {
    pub blink_period: Duration,
    pub flash_count: u32,
    pub flash_interval: Duration,
}

impl From<&TimingConfig> for PatternTiming {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            blink_period: timing.blink_period(),
            flash_count: timing.flash_count,
            flash_interval: timing.flash_interval(),
        }
    }
}

impl PatternTiming {
    /// Level of `pattern` after it has been commanded for `elapsed`.
    pub fn level(&self, pattern: Pattern, elapsed: Duration) -> bool {
        match pattern {
            Pattern::Off => false,
            Pattern::Detecting => true,
            Pattern::ConfirmedBlink => {
                let half = (self.blink_period.as_nanos() / 2).max(1);
                (elapsed.as_nanos() / half) % 2 == 0
            }
            Pattern::AlertFlash => {
                let step = self.flash_interval.as_nanos().max(1);
                let k = elapsed.as_nanos() / step;
                k < 2 * self.flash_count as u128 && k % 2 == 0
            }
        }
    }
}

/// The three patterns implied by a detector state.
///
/// `motion` is the raw sample of the current tick; `alert_delivered` is true
/// when the attempt that opened the current cooldown reached the recipient.
pub fn patterns_for(state: MotionState, motion: bool, alert_delivered: bool) -> [Pattern; 3] {
    let armed = if motion {
        Pattern::Detecting
    } else {
        Pattern::Off
    };
    let active = match state {
        MotionState::Detecting => Pattern::ConfirmedBlink,
        // Capture and dispatch block the loop, so no blink could be rendered
        MotionState::Confirmed => Pattern::Detecting,
        MotionState::Idle | MotionState::CoolingDown => Pattern::Off,
    };
    let alert = if state == MotionState::CoolingDown && alert_delivered {
        Pattern::AlertFlash
    } else {
        Pattern::Off
    };
    [armed, active, alert]
}

struct ChannelState<O> {
    output: O,
    pattern: Pattern,
    since: Instant,
    /// Last level written; `None` until the first write.
    level: Option<bool>,
}

pub struct IndicatorDriver<O: DigitalOutput> {
    channels: [ChannelState<O>; 3],
    timing: PatternTiming,
}

impl<O: DigitalOutput> IndicatorDriver<O> {
    /// Take ownership of the armed, active and alert lines, all `Off`.
    pub fn new(armed: O, active: O, alert: O, timing: PatternTiming, now: Instant) -> Self {
        let channel = |output| ChannelState {
            output,
            pattern: Pattern::Off,
            since: now,
            level: None,
        };
        Self {
            channels: [channel(armed), channel(active), channel(alert)],
            timing,
        }
    }

    pub fn pattern(&self, channel: Channel) -> Pattern {
        self.channels[channel.index()].pattern
    }

    /// Command `pattern` on `channel`. Re-commanding the current pattern is a
    /// no-op and does not restart its phase.
    pub fn set(&mut self, channel: Channel, pattern: Pattern, now: Instant) {
        let state = &mut self.channels[channel.index()];
        if state.pattern == pattern {
            return;
        }
        debug!("{channel:?} indicator: {:?} -> {pattern:?}", state.pattern);
        state.pattern = pattern;
        state.since = now;
    }

    /// Command all three channels from a detector state.
    pub fn apply(&mut self, patterns: [Pattern; 3], now: Instant) {
        for (channel, pattern) in Channel::ALL.into_iter().zip(patterns) {
            self.set(channel, pattern, now);
        }
    }

    /// Drive each line to the level its pattern calls for at `now`.
    pub fn refresh(&mut self, now: Instant) {
        for (channel, state) in Channel::ALL.into_iter().zip(self.channels.iter_mut()) {
            let elapsed = now.saturating_duration_since(state.since);
            let level = self.timing.level(state.pattern, elapsed);
            if state.level == Some(level) {
                continue;
            }
            match state.output.set(level) {
                Ok(()) => state.level = Some(level),
                Err(e) => warn!("Failed to drive {channel:?} indicator: {e}"),
            }
        }
    }

    /// Turn every line off regardless of cached levels.
    pub fn all_off(&mut self, now: Instant) {
        for (channel, state) in Channel::ALL.into_iter().zip(self.channels.iter_mut()) {
            state.pattern = Pattern::Off;
            state.since = now;
            match state.output.set(false) {
                Ok(()) => state.level = Some(false),
                Err(e) => warn!("Failed to turn off {channel:?} indicator: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hardware::mock::RecordingOutput;

    fn timing() -> PatternTiming {
        PatternTiming {
            blink_period: Duration::from_millis(1_000),
            flash_count: 3,
            flash_interval: Duration::from_millis(100),
        }
    }

    fn driver(now: Instant) -> (IndicatorDriver<RecordingOutput>, [RecordingOutput; 3]) {
        let probes = [
            RecordingOutput::new(),
            RecordingOutput::new(),
            RecordingOutput::new(),
        ];
        let driver = IndicatorDriver::new(
            probes[0].clone(),
            probes[1].clone(),
            probes[2].clone(),
            timing(),
            now,
        );
        (driver, probes)
    }

    #[test]
    fn test_blink_levels() {
        let t = timing();
        let ms = Duration::from_millis;
        assert!(t.level(Pattern::ConfirmedBlink, ms(0)));
        assert!(t.level(Pattern::ConfirmedBlink, ms(499)));
        assert!(!t.level(Pattern::ConfirmedBlink, ms(500)));
        assert!(t.level(Pattern::ConfirmedBlink, ms(1_000)));
    }

    #[test]
    fn test_flash_burst_then_off() {
        let t = timing();
        let on: Vec<bool> = (0..8)
            .map(|k| t.level(Pattern::AlertFlash, Duration::from_millis(k * 100)))
            .collect();
        assert_eq!(on, vec![true, false, true, false, true, false, false, false]);
        assert!(!t.level(Pattern::AlertFlash, Duration::from_secs(10)));
    }

    #[test]
    fn test_refresh_writes_only_on_change() {
        let now = Instant::now();
        let (mut driver, probes) = driver(now);

        driver.refresh(now);
        driver.refresh(now + Duration::from_millis(50));
        assert_eq!(probes[0].history(), vec![false]);

        driver.set(Channel::Armed, Pattern::Detecting, now);
        driver.refresh(now + Duration::from_millis(100));
        driver.refresh(now + Duration::from_millis(150));
        assert_eq!(probes[0].history(), vec![false, true]);
    }

    #[test]
    fn test_set_same_pattern_is_idempotent() {
        let now = Instant::now();
        let (mut driver, probes) = driver(now);

        driver.set(Channel::Active, Pattern::ConfirmedBlink, now);
        driver.refresh(now);
        // Re-commanding mid-cycle must not restart the phase
        driver.set(
            Channel::Active,
            Pattern::ConfirmedBlink,
            now + Duration::from_millis(600),
        );
        driver.refresh(now + Duration::from_millis(600));
        assert_eq!(probes[1].history(), vec![true, false]);
    }

    #[test]
    fn test_patterns_for_states() {
        use Pattern::*;
        assert_eq!(patterns_for(MotionState::Idle, false, false), [Off, Off, Off]);
        assert_eq!(
            patterns_for(MotionState::Detecting, true, false),
            [Detecting, ConfirmedBlink, Off]
        );
        assert_eq!(
            patterns_for(MotionState::Confirmed, true, false),
            [Detecting, Detecting, Off]
        );
        assert_eq!(
            patterns_for(MotionState::CoolingDown, true, true),
            [Detecting, Off, AlertFlash]
        );
        assert_eq!(
            patterns_for(MotionState::CoolingDown, false, false),
            [Off, Off, Off]
        );
    }

    #[test]
    fn test_all_off_forces_low() {
        let now = Instant::now();
        let (mut driver, probes) = driver(now);
        driver.apply([Pattern::Detecting; 3], now);
        driver.refresh(now);
        driver.all_off(now);

        for probe in &probes {
            assert_eq!(probe.level(), Some(false));
        }
        assert_eq!(driver.pattern(Channel::Alert), Pattern::Off);
    }
}
