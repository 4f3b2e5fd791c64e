//! Motion episode state machine.
//!
//! Raw PIR samples are folded into *detection episodes*: maximal runs of motion
//! in which no silence lasts longer than the debounce gap. An episode whose
//! observed motion spans at least the reportable threshold triggers exactly one
//! capture/alert, after which a cooldown window suppresses further triggers.
//!
//! ```text
//!  IDLE ──motion──▶ DETECTING ──duration ≥ threshold──▶ CONFIRMED
//!   ▲                  │                                   │ finish_alert
//!   │   silence > gap  │                                   ▼
//!   └──────────────────┘     ┌──────────────────────── COOLING_DOWN
//!   ▲                        │ cooldown elapsed,              │
//!   └── cooldown elapsed, ───┘ motion present ──▶ DETECTING ◀─┘
//!       motion absent
//! ```
//!
//! The machine is pure: callers supply the sample and the instant it was taken,
//! and the machine never reads a clock or performs I/O. The orchestrator runs
//! the capture/alert side effects when [`MotionDetector::observe`] returns
//! [`Decision::Trigger`] and reports completion with
//! [`MotionDetector::finish_alert`].
//!
//! Boundary rules: the reportable threshold is inclusive (`>=`), the debounce
//! gap is exclusive (`>`), so borderline motion stays one episode.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::TimingConfig;

/// Top-level detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    /// No episode in progress.
    Idle,
    /// Episode in progress, below the reportable threshold.
    Detecting,
    /// Episode qualified; capture/alert in flight.
    Confirmed,
    /// Alert attempted; new episodes are indicated but cannot trigger.
    CoolingDown,
}

/// Where an episode stands relative to the alert path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeStatus {
    /// Below the reportable threshold so far.
    Accumulating,
    /// Reached the threshold and issued the capture/alert.
    Triggered,
    /// Reached the threshold inside a cooldown window; not eligible.
    Suppressed,
}

/// A run of motion samples tolerant of sub-gap interruptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionEpisode {
    pub id: u64,
    pub started_at: Instant,
    pub last_motion_at: Instant,
    pub status: EpisodeStatus,
}

impl DetectionEpisode {
    fn new(id: u64, now: Instant) -> Self {
        Self {
            id,
            started_at: now,
            last_motion_at: now,
            status: EpisodeStatus::Accumulating,
        }
    }

    /// Span of observed motion: first sample to most recent motion sample.
    pub fn duration(&self) -> Duration {
        self.last_motion_at.saturating_duration_since(self.started_at)
    }

    fn silence_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_motion_at)
    }
}

/// Timing rules the machine enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeRules {
    pub reportable_threshold: Duration,
    pub debounce_gap: Duration,
    pub cooldown: Duration,
}

impl From<&TimingConfig> for EpisodeRules {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            reportable_threshold: timing.reportable_threshold(),
            debounce_gap: timing.debounce_gap(),
            cooldown: timing.cooldown(),
        }
    }
}

/// What the orchestrator must do after a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    /// Run capture + alert for this episode, then call `finish_alert`.
    Trigger { episode: u64 },
}

/// Running totals of episode outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpisodeCounters {
    pub started: u64,
    /// Ended below the threshold (noise)
    pub discarded: u64,
    pub triggered: u64,
    pub suppressed: u64,
}

pub struct MotionDetector {
    rules: EpisodeRules,
    state: MotionState,
    episode: Option<DetectionEpisode>,
    /// Anchor of the current cooldown window (end of the last alert attempt).
    cooldown_anchor: Option<Instant>,
    next_episode_id: u64,
    counters: EpisodeCounters,
}

impl MotionDetector {
    pub fn new(rules: EpisodeRules) -> Self {
        Self {
            rules,
            state: MotionState::Idle,
            episode: None,
            cooldown_anchor: None,
            next_episode_id: 1,
            counters: EpisodeCounters::default(),
        }
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    /// The episode currently tracked, if any (including suppressed ones seen
    /// during cooldown).
    pub fn episode(&self) -> Option<&DetectionEpisode> {
        self.episode.as_ref()
    }

    pub fn counters(&self) -> EpisodeCounters {
        self.counters
    }

    /// True while `now` falls inside the cooldown window.
    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_anchor
            .is_some_and(|anchor| now.saturating_duration_since(anchor) < self.rules.cooldown)
    }

    /// Advance the machine with one sample taken at `now`.
    pub fn observe(&mut self, now: Instant, motion: bool) -> Decision {
        match self.state {
            MotionState::Idle => {
                if motion {
                    self.begin_episode(now);
                    self.state = MotionState::Detecting;
                    return self.check_threshold(now);
                }
                Decision::Continue
            }
            MotionState::Detecting => self.observe_detecting(now, motion),
            MotionState::Confirmed => {
                // Only reachable if the orchestrator samples before finishing the
                // alert; keep the episode current and wait.
                if motion {
                    if let Some(episode) = self.episode.as_mut() {
                        episode.last_motion_at = now;
                    }
                }
                Decision::Continue
            }
            MotionState::CoolingDown => self.observe_cooling_down(now, motion),
        }
    }

    /// Record the end of the capture/alert attempt started by the last
    /// [`Decision::Trigger`]. Successful or not, the attempt opens a cooldown
    /// window anchored at `now`.
    pub fn finish_alert(&mut self, now: Instant) {
        if self.state != MotionState::Confirmed {
            warn!("finish_alert called in state {:?}; ignoring", self.state);
            return;
        }
        self.cooldown_anchor = Some(now);
        self.state = MotionState::CoolingDown;
        info!(
            "Cooldown started ({:.1}s)",
            self.rules.cooldown.as_secs_f64()
        );
    }

    fn observe_detecting(&mut self, now: Instant, motion: bool) -> Decision {
        let gap = self.rules.debounce_gap;
        let Some(episode) = self.episode.as_mut() else {
            // Detecting always carries an episode; restart from idle if not.
            self.state = MotionState::Idle;
            return self.observe(now, motion);
        };

        if motion {
            episode.last_motion_at = now;
            return self.check_threshold(now);
        }

        if episode.silence_at(now) > gap {
            info!(
                "Episode {} ended after {:.2}s (below threshold), back to idle",
                episode.id,
                episode.duration().as_secs_f64()
            );
            self.counters.discarded += 1;
            self.episode = None;
            self.state = MotionState::Idle;
        }
        Decision::Continue
    }

    fn observe_cooling_down(&mut self, now: Instant, motion: bool) -> Decision {
        self.track_suppressed(now, motion);

        if self.in_cooldown(now) {
            return Decision::Continue;
        }

        info!("Cooldown ended");
        if !motion {
            self.episode = None;
            self.state = MotionState::Idle;
            return Decision::Continue;
        }

        // Motion is still present: re-arm with a fresh episode.
        self.begin_episode(now);
        self.state = MotionState::Detecting;
        self.check_threshold(now)
    }

    /// Keep indicating motion during cooldown without letting it qualify.
    fn track_suppressed(&mut self, now: Instant, motion: bool) {
        let gap = self.rules.debounce_gap;
        let threshold = self.rules.reportable_threshold;

        if motion {
            let continuing = self
                .episode
                .as_ref()
                .is_some_and(|episode| episode.silence_at(now) <= gap);
            if !continuing {
                self.begin_episode(now);
            }
        } else if self
            .episode
            .as_ref()
            .is_some_and(|episode| episode.silence_at(now) > gap)
        {
            self.episode = None;
            return;
        }

        if let Some(episode) = self.episode.as_mut() {
            if motion {
                episode.last_motion_at = now;
            }
            if episode.status == EpisodeStatus::Accumulating && episode.duration() >= threshold {
                episode.status = EpisodeStatus::Suppressed;
                self.counters.suppressed += 1;
                info!(
                    "Episode {} qualified during cooldown; alert suppressed",
                    episode.id
                );
            }
        }
    }

    fn begin_episode(&mut self, now: Instant) {
        let id = self.next_episode_id;
        self.next_episode_id += 1;
        self.counters.started += 1;
        self.episode = Some(DetectionEpisode::new(id, now));
        debug!("Episode {id} started");
    }

    /// The single trigger point.
    fn check_threshold(&mut self, now: Instant) -> Decision {
        let in_cooldown = self.in_cooldown(now);
        let Some(episode) = self.episode.as_mut() else {
            return Decision::Continue;
        };
        if episode.duration() < self.rules.reportable_threshold {
            return Decision::Continue;
        }

        if in_cooldown {
            episode.status = EpisodeStatus::Suppressed;
            self.counters.suppressed += 1;
            self.state = MotionState::CoolingDown;
            info!(
                "Episode {} qualified inside cooldown window; no capture",
                episode.id
            );
            return Decision::Continue;
        }

        episode.status = EpisodeStatus::Triggered;
        self.counters.triggered += 1;
        self.state = MotionState::Confirmed;
        info!(
            "Episode {} reached {:.2}s: motion confirmed",
            episode.id,
            episode.duration().as_secs_f64()
        );
        Decision::Trigger {
            episode: episode.id,
        }
    }
}
