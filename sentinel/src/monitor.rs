//! Detection loop orchestrator.
//!
//! [`MotionMonitor`] owns the sensor, the indicator driver and the episode
//! state machine, and runs the capture → alert → ledger side effects when the
//! machine confirms an episode. Only delivered photos are recorded. Every
//! external call is wrapped so a failure degrades to "no alert this cycle" and
//! the loop keeps running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hardware::{DigitalInput, DigitalOutput};
use tracing::{debug, error, info, warn};

use crate::alert::{AlertDispatcher, DispatchError};
use crate::capture::PhotoCapture;
use crate::config::TimingConfig;
use crate::detector::{Decision, EpisodeCounters, EpisodeRules, MotionDetector, MotionState};
use crate::indicator::{patterns_for, IndicatorDriver};
use crate::ledger::PhotoLedger;

/// Source of monotonic instants for the loop.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock-independent system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Loop health and outcome totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub ticks: u64,
    /// Ticks that ran past their slot
    pub overruns: u64,
    pub worst_tick: Duration,
    pub sensor_errors: u64,
    pub episodes: EpisodeCounters,
    pub captures: u64,
    pub capture_failures: u64,
    pub alerts_sent: u64,
    pub dispatch_failures: u64,
    pub ledger_failures: u64,
}

pub struct MotionMonitor<S, O, P, A, C = MonotonicClock>
where
    S: DigitalInput,
    O: DigitalOutput,
    P: PhotoCapture,
    A: AlertDispatcher,
    C: Clock,
{
    sensor: S,
    detector: MotionDetector,
    indicators: IndicatorDriver<O>,
    capture: P,
    dispatcher: A,
    ledger: Arc<PhotoLedger>,
    clock: C,
    poll_interval: Duration,
    /// The attempt that opened the current cooldown reached the recipient
    alert_delivered: bool,
    last_motion: bool,
    stats: MonitorStats,
}

impl<S, O, P, A, C> MotionMonitor<S, O, P, A, C>
where
    S: DigitalInput,
    O: DigitalOutput,
    P: PhotoCapture,
    A: AlertDispatcher,
    C: Clock,
{
    pub fn new(
        sensor: S,
        indicators: IndicatorDriver<O>,
        capture: P,
        dispatcher: A,
        ledger: Arc<PhotoLedger>,
        timing: &TimingConfig,
        clock: C,
    ) -> Self {
        Self {
            sensor,
            detector: MotionDetector::new(EpisodeRules::from(timing)),
            indicators,
            capture,
            dispatcher,
            ledger,
            clock,
            poll_interval: timing.poll_interval(),
            alert_delivered: false,
            last_motion: false,
            stats: MonitorStats::default(),
        }
    }

    pub fn state(&self) -> MotionState {
        self.detector.state()
    }

    pub fn indicators(&self) -> &IndicatorDriver<O> {
        &self.indicators
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            episodes: self.detector.counters(),
            ..self.stats
        }
    }

    fn read_sensor(&mut self) -> bool {
        match self.sensor.read() {
            Ok(motion) => motion,
            Err(e) => {
                self.stats.sensor_errors += 1;
                warn!("Sensor read failed, treating as no motion: {e}");
                false
            }
        }
    }

    fn update_indicators(&mut self, motion: bool, now: Instant) {
        let patterns = patterns_for(self.detector.state(), motion, self.alert_delivered);
        self.indicators.apply(patterns, now);
        self.indicators.refresh(now);
    }

    /// One sample tick.
    pub fn tick(&mut self) -> Decision {
        let now = self.clock.now();
        let motion = self.read_sensor();
        if motion != self.last_motion {
            info!(
                "[MOTION] {}",
                if motion { "Detected" } else { "Not detected" }
            );
            self.last_motion = motion;
        }

        let decision = self.detector.observe(now, motion);
        if self.detector.state() != MotionState::CoolingDown {
            self.alert_delivered = false;
        }
        self.update_indicators(motion, now);

        if let Decision::Trigger { episode } = decision {
            self.handle_trigger(episode);
            self.update_indicators(motion, self.clock.now());
        }

        self.stats.ticks += 1;
        decision
    }

    /// Capture, alert and record for a confirmed episode, then open the
    /// cooldown window whatever the outcome.
    fn handle_trigger(&mut self, episode: u64) {
        match self.capture.capture() {
            Ok(photo) => {
                let photo = photo.for_episode(episode);
                self.stats.captures += 1;

                match self.dispatcher.send(&photo) {
                    Ok(()) => {
                        self.stats.alerts_sent += 1;
                        self.alert_delivered = true;
                        if let Err(e) = self.ledger.append(&photo) {
                            self.stats.ledger_failures += 1;
                            error!("Failed to record {} in ledger: {e}", photo.file_name());
                        }
                    }
                    Err(DispatchError::Config(reason)) => {
                        self.stats.dispatch_failures += 1;
                        error!("Alert not sent, check email settings: {reason}");
                    }
                    Err(e) => {
                        self.stats.dispatch_failures += 1;
                        warn!("Alert for episode {episode} failed: {e}");
                    }
                }
            }
            Err(e) => {
                self.stats.capture_failures += 1;
                warn!("Capture for episode {episode} failed: {e}");
            }
        }

        self.detector.finish_alert(self.clock.now());
    }

    /// Tick at the poll interval until `stop` is set.
    ///
    /// Each tick is scheduled against a fixed deadline; a tick that runs past
    /// its slot counts as an overrun and the schedule restarts from now rather
    /// than bursting to catch up.
    pub fn run(&mut self, stop: &AtomicBool) {
        info!(
            "Monitoring at {}ms intervals",
            self.poll_interval.as_millis()
        );
        let mut deadline = self.clock.now();

        while !stop.load(Ordering::Relaxed) {
            let started = self.clock.now();
            self.tick();
            let finished = self.clock.now();

            let took = finished.saturating_duration_since(started);
            if took > self.stats.worst_tick {
                self.stats.worst_tick = took;
            }

            deadline += self.poll_interval;
            if finished > deadline {
                self.stats.overruns += 1;
                debug!(
                    "Tick overran its slot by {:?}",
                    finished.saturating_duration_since(deadline)
                );
                deadline = finished;
            } else {
                self.clock.sleep(deadline.saturating_duration_since(finished));
            }
        }
    }

    /// Drive every indicator low and report totals.
    pub fn shutdown(&mut self) -> MonitorStats {
        self.indicators.all_off(self.clock.now());
        let stats = self.stats();
        info!(
            "Monitor stopped: {} ticks ({} overruns, worst {:?}), {} episodes, {} captures ({} failed), {} alerts sent ({} failed), {} suppressed",
            stats.ticks,
            stats.overruns,
            stats.worst_tick,
            stats.episodes.started,
            stats.captures,
            stats.capture_failures,
            stats.alerts_sent,
            stats.dispatch_failures,
            stats.episodes.suppressed
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureService, CapturedPhoto};
    use crate::indicator::{Channel, Pattern, PatternTiming};
    use hardware::mock::{MockStillCamera, RecordingOutput, ScriptedInput};
    use hardware::PinError;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Manually advanced clock; `sleep` advances it.
    #[derive(Clone)]
    struct ManualClock {
        now: Arc<Mutex<Instant>>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Arc::new(Mutex::new(Instant::now())),
            }
        }

        fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }

        fn sleep(&self, duration: Duration) {
            self.advance(duration);
        }
    }

    /// Sensor whose level the test sets directly.
    #[derive(Clone)]
    struct SharedSensor {
        motion: Arc<Mutex<Result<bool, String>>>,
    }

    impl Default for SharedSensor {
        fn default() -> Self {
            Self {
                motion: Arc::new(Mutex::new(Ok(false))),
            }
        }
    }

    impl SharedSensor {
        fn set(&self, motion: bool) {
            *self.motion.lock().unwrap() = Ok(motion);
        }

        fn fail(&self, message: &str) {
            *self.motion.lock().unwrap() = Err(message.to_string());
        }
    }

    impl DigitalInput for SharedSensor {
        fn read(&mut self) -> Result<bool, PinError> {
            match &*self.motion.lock().unwrap() {
                Ok(motion) => Ok(*motion),
                Err(message) => Err(PinError::Io(std::io::Error::other(message.clone()))),
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingDispatcher {
        sent: Arc<Mutex<Vec<PathBuf>>>,
        fail_transport: bool,
    }

    impl RecordingDispatcher {
        fn sent(&self) -> Vec<PathBuf> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl AlertDispatcher for RecordingDispatcher {
        fn send(&self, photo: &CapturedPhoto) -> Result<(), DispatchError> {
            self.sent.lock().unwrap().push(photo.path.clone());
            if self.fail_transport {
                return Err(DispatchError::Transport("connection refused".into()));
            }
            Ok(())
        }
    }

    type TestMonitor = MotionMonitor<
        SharedSensor,
        RecordingOutput,
        CaptureService<MockStillCamera>,
        RecordingDispatcher,
        ManualClock,
    >;

    struct Rig {
        monitor: TestMonitor,
        sensor: SharedSensor,
        clock: ManualClock,
        dispatcher: RecordingDispatcher,
        ledger: Arc<PhotoLedger>,
        leds: [RecordingOutput; 3],
        _root: tempfile::TempDir,
    }

    fn timing() -> TimingConfig {
        TimingConfig {
            poll_interval_ms: 100,
            reportable_threshold_ms: 2_000,
            debounce_gap_ms: 300,
            cooldown_ms: 60_000,
            ..TimingConfig::default()
        }
    }

    fn rig_with(camera: MockStillCamera, dispatcher: RecordingDispatcher) -> Rig {
        let root = tempfile::tempdir().unwrap();
        let images = root.path().join("images");
        let ledger =
            Arc::new(PhotoLedger::open(&images, root.path().join("logs/photo_logs.txt")).unwrap());
        let clock = ManualClock::new();
        let sensor = SharedSensor::default();
        sensor.set(false);
        let leds = [
            RecordingOutput::new(),
            RecordingOutput::new(),
            RecordingOutput::new(),
        ];
        let timing = timing();
        let indicators = IndicatorDriver::new(
            leds[0].clone(),
            leds[1].clone(),
            leds[2].clone(),
            PatternTiming::from(&timing),
            clock.now(),
        );
        let monitor = MotionMonitor::new(
            sensor.clone(),
            indicators,
            CaptureService::new(camera, &images, "photo"),
            dispatcher.clone(),
            Arc::clone(&ledger),
            &timing,
            clock.clone(),
        );
        Rig {
            monitor,
            sensor,
            clock,
            dispatcher,
            ledger,
            leds,
            _root: root,
        }
    }

    fn rig() -> Rig {
        rig_with(MockStillCamera::new(16, 16), RecordingDispatcher::default())
    }

    impl Rig {
        /// Tick every 100ms for `ms` with the sensor at `motion`.
        fn hold(&mut self, motion: bool, ms: u64) {
            self.sensor.set(motion);
            for _ in 0..ms / 100 {
                self.monitor.tick();
                self.clock.advance(Duration::from_millis(100));
            }
        }
    }

    #[test]
    fn test_brief_motion_captures_nothing() {
        let mut rig = rig();
        rig.hold(true, 500);
        rig.hold(false, 1_000);

        assert_eq!(rig.monitor.state(), MotionState::Idle);
        assert!(rig.dispatcher.sent().is_empty());
        assert_eq!(rig.ledger.count(), 0);
        assert_eq!(rig.monitor.stats().episodes.discarded, 1);
    }

    #[test]
    fn test_sustained_motion_alerts_once() {
        let mut rig = rig();
        rig.hold(true, 3_000);

        assert_eq!(rig.monitor.state(), MotionState::CoolingDown);
        assert_eq!(rig.dispatcher.sent().len(), 1);
        assert_eq!(rig.ledger.count(), 1);
        let stats = rig.monitor.stats();
        assert_eq!((stats.captures, stats.alerts_sent), (1, 1));
        assert_eq!(
            rig.monitor.indicators().pattern(Channel::Alert),
            Pattern::AlertFlash
        );
        // The green flash started
        assert!(rig.leds[2].history().contains(&true));
    }

    #[test]
    fn test_second_episode_inside_cooldown_is_suppressed() {
        let mut rig = rig();
        rig.hold(true, 3_000);
        rig.hold(false, 7_000);
        // Second qualifying episode starting at t=10s
        rig.hold(true, 3_000);

        assert_eq!(rig.monitor.state(), MotionState::CoolingDown);
        assert_eq!(rig.dispatcher.sent().len(), 1);
        assert_eq!(rig.ledger.count(), 1);
        assert_eq!(rig.monitor.stats().episodes.suppressed, 1);
    }

    #[test]
    fn test_alert_again_after_cooldown() {
        let mut rig = rig();
        rig.hold(true, 3_000);
        rig.hold(false, 61_000);
        assert_eq!(rig.monitor.state(), MotionState::Idle);

        rig.hold(true, 3_000);
        assert_eq!(rig.dispatcher.sent().len(), 2);
        assert_eq!(rig.ledger.count(), 2);
    }

    #[test]
    fn test_capture_failure_still_cools_down() {
        let mut rig = rig_with(
            MockStillCamera::failing("sensor unplugged"),
            RecordingDispatcher::default(),
        );
        rig.hold(true, 3_000);

        assert_eq!(rig.monitor.state(), MotionState::CoolingDown);
        assert!(rig.dispatcher.sent().is_empty());
        assert_eq!(rig.ledger.count(), 0);
        assert_eq!(rig.monitor.stats().capture_failures, 1);
        assert_eq!(
            rig.monitor.indicators().pattern(Channel::Alert),
            Pattern::Off
        );
    }

    #[test]
    fn test_dispatch_failure_skips_ledger_and_flash() {
        let mut rig = rig_with(
            MockStillCamera::new(16, 16),
            RecordingDispatcher {
                fail_transport: true,
                ..RecordingDispatcher::default()
            },
        );
        rig.hold(true, 3_000);

        assert_eq!(rig.monitor.state(), MotionState::CoolingDown);
        assert_eq!(rig.dispatcher.sent().len(), 1);
        assert_eq!(rig.ledger.count(), 0);
        assert_eq!(rig.monitor.stats().dispatch_failures, 1);
        assert!(!rig.leds[2].history().contains(&true));
    }

    #[test]
    fn test_undelivered_photo_not_counted_after_restart() {
        let mut rig = rig_with(
            MockStillCamera::new(16, 16),
            RecordingDispatcher {
                fail_transport: true,
                ..RecordingDispatcher::default()
            },
        );
        rig.hold(true, 3_000);
        assert_eq!(rig.ledger.count(), 0);

        // The photo is on disk but was never delivered
        let photos = std::fs::read_dir(rig.ledger.photos_dir()).unwrap().count();
        assert_eq!(photos, 1);

        let reopened =
            PhotoLedger::open(rig.ledger.photos_dir(), rig.ledger.log_path()).unwrap();
        assert_eq!(reopened.count(), 0);
    }

    #[test]
    fn test_sensor_error_reads_as_no_motion() {
        let mut rig = rig();
        rig.hold(true, 1_000);
        rig.sensor.fail("line read failed");
        for _ in 0..5 {
            rig.monitor.tick();
            rig.clock.advance(Duration::from_millis(100));
        }

        assert_eq!(rig.monitor.state(), MotionState::Idle);
        assert_eq!(rig.monitor.stats().sensor_errors, 5);
        assert_eq!(rig.leds[0].level(), Some(false));
    }

    #[test]
    fn test_indicators_follow_detection() {
        let mut rig = rig();
        rig.hold(true, 500);

        assert_eq!(
            rig.monitor.indicators().pattern(Channel::Armed),
            Pattern::Detecting
        );
        assert_eq!(
            rig.monitor.indicators().pattern(Channel::Active),
            Pattern::ConfirmedBlink
        );
        assert_eq!(rig.leds[0].level(), Some(true));
    }

    #[test]
    fn test_run_stops_and_shutdown_turns_leds_off() {
        let root = tempfile::tempdir().unwrap();
        let ledger = Arc::new(PhotoLedger::open(root.path(), root.path().join("log.txt")).unwrap());
        let clock = ManualClock::new();
        let stop = Arc::new(AtomicBool::new(false));
        let leds = [
            RecordingOutput::new(),
            RecordingOutput::new(),
            RecordingOutput::new(),
        ];

        /// Reports motion and raises the stop flag after `remaining` reads.
        struct StopAfter {
            inner: ScriptedInput,
            remaining: u32,
            stop: Arc<AtomicBool>,
        }

        impl DigitalInput for StopAfter {
            fn read(&mut self) -> Result<bool, PinError> {
                self.remaining = self.remaining.saturating_sub(1);
                if self.remaining == 0 {
                    self.stop.store(true, Ordering::Relaxed);
                }
                self.inner.read()
            }
        }

        let sensor = StopAfter {
            inner: ScriptedInput::new([true]),
            remaining: 10,
            stop: Arc::clone(&stop),
        };
        let timing = timing();
        let indicators = IndicatorDriver::new(
            leds[0].clone(),
            leds[1].clone(),
            leds[2].clone(),
            PatternTiming::from(&timing),
            clock.now(),
        );
        let mut monitor = MotionMonitor::new(
            sensor,
            indicators,
            CaptureService::new(MockStillCamera::new(8, 8), root.path(), "photo"),
            RecordingDispatcher::default(),
            ledger,
            &timing,
            clock.clone(),
        );

        let started = clock.now();
        monitor.run(&stop);
        let stats = monitor.shutdown();

        assert_eq!(stats.ticks, 10);
        assert_eq!(stats.overruns, 0);
        // Ten 100ms slots elapsed on the manual clock
        assert_eq!(clock.now() - started, Duration::from_millis(1_000));
        for led in &leds {
            assert_eq!(led.level(), Some(false));
        }
    }
}
