use std::cmp::Ordering as CmpOrdering;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Knobs for end-of-speech detection on the 0..1 input level.
#[derive(Debug, Clone, PartialEq)]
pub struct SilenceConfig {
    /// Level at or above which a frame counts as speech.
    pub threshold: f32,
    /// Quiet time after the last speech before the timeout fires.
    pub window: Duration,
    /// Quiet time before the detector arms.
    pub debounce: Duration,
    /// Frames in the majority-vote smoothing window (1 disables smoothing).
    pub smoothing_frames: usize,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            threshold: 0.05,
            window: Duration::from_millis(1500),
            debounce: Duration::from_millis(250),
            smoothing_frames: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LevelLabel {
    Speech,
    Quiet,
}

/// Sliding-window majority vote over level frames.
///
/// Keeps a single loud click from resetting the silence timer and a single
/// dropout from starting it.
#[derive(Debug)]
struct LevelSmoother {
    window: VecDeque<LevelLabel>,
    window_size: usize,
}

impl LevelSmoother {
    fn new(window_size: usize) -> Self {
        Self {
            window: VecDeque::new(),
            window_size: window_size.max(1),
        }
    }

    fn smooth(&mut self, label: LevelLabel) -> LevelLabel {
        if self.window_size <= 1 {
            return label;
        }
        self.window.push_back(label);
        if self.window.len() > self.window_size {
            self.window.pop_front();
        }
        let speech = self
            .window
            .iter()
            .filter(|item| **item == LevelLabel::Speech)
            .count();
        let quiet = self.window.len() - speech;
        match speech.cmp(&quiet) {
            CmpOrdering::Greater => LevelLabel::Speech,
            CmpOrdering::Less => LevelLabel::Quiet,
            CmpOrdering::Equal => label,
        }
    }

    fn reset(&mut self) {
        self.window.clear();
    }
}

/// Fires once per capture session after speech has been heard and then
/// stayed below threshold for the configured window.
///
/// Two phases: a debounce after the first quiet frame, after which the
/// detector arms and waits out the remainder of the window. Speech at any
/// point clears both.
#[derive(Debug)]
pub struct SilenceDetector {
    config: SilenceConfig,
    smoother: LevelSmoother,
    heard_speech: bool,
    quiet_since: Option<Instant>,
    armed: bool,
    fired: bool,
}

impl SilenceDetector {
    pub fn new(config: SilenceConfig) -> Self {
        let smoother = LevelSmoother::new(config.smoothing_frames);
        Self {
            config,
            smoother,
            heard_speech: false,
            quiet_since: None,
            armed: false,
            fired: false,
        }
    }

    pub fn reset(&mut self) {
        self.smoother.reset();
        self.heard_speech = false;
        self.quiet_since = None;
        self.armed = false;
        self.fired = false;
    }

    pub fn observe(&mut self, level: f32, now: Instant) {
        if self.fired {
            return;
        }
        let raw = if level >= self.config.threshold {
            LevelLabel::Speech
        } else {
            LevelLabel::Quiet
        };
        match self.smoother.smooth(raw) {
            LevelLabel::Speech => {
                self.heard_speech = true;
                self.quiet_since = None;
                self.armed = false;
            }
            LevelLabel::Quiet => {
                if self.heard_speech && self.quiet_since.is_none() {
                    self.quiet_since = Some(now);
                }
            }
        }
    }

    /// Next instant at which [`poll`](Self::poll) has work to do.
    pub fn deadline(&self) -> Option<Instant> {
        if self.fired {
            return None;
        }
        let quiet_since = self.quiet_since?;
        if self.armed {
            Some(quiet_since + self.config.window)
        } else {
            Some(quiet_since + self.config.debounce.min(self.config.window))
        }
    }

    /// Advance the timers. Returns true exactly once when the window elapses.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.fired {
            return false;
        }
        let Some(quiet_since) = self.quiet_since else {
            return false;
        };
        if !self.armed && now >= quiet_since + self.config.debounce {
            self.armed = true;
        }
        if self.armed && now >= quiet_since + self.config.window {
            self.fired = true;
            return true;
        }
        false
    }

    /// Suppress the timeout for the rest of this session.
    pub fn disarm(&mut self) {
        self.fired = true;
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> SilenceDetector {
        SilenceDetector::new(SilenceConfig {
            smoothing_frames: 1,
            ..SilenceConfig::default()
        })
    }

    #[test]
    fn never_fires_without_speech() {
        let mut detector = detector();
        let start = Instant::now();
        for step in 0..40 {
            let now = start + Duration::from_millis(step * 100);
            detector.observe(0.0, now);
            assert!(!detector.poll(now));
        }
        assert!(detector.deadline().is_none());
    }

    #[test]
    fn fires_at_window_and_not_earlier() {
        let mut detector = detector();
        let start = Instant::now();
        detector.observe(0.5, start);
        detector.observe(0.01, start);

        assert_eq!(
            detector.deadline(),
            Some(start + Duration::from_millis(250))
        );
        assert!(!detector.poll(start + Duration::from_millis(250)));
        assert!(detector.is_armed());
        assert_eq!(
            detector.deadline(),
            Some(start + Duration::from_millis(1500))
        );
        assert!(!detector.poll(start + Duration::from_millis(1400)));
        assert!(detector.poll(start + Duration::from_millis(1500)));
        assert!(!detector.poll(start + Duration::from_millis(3000)));
        assert!(detector.has_fired());
    }

    #[test]
    fn speech_during_window_restarts_timer() {
        let mut detector = detector();
        let start = Instant::now();
        detector.observe(0.5, start);
        detector.observe(0.0, start + Duration::from_millis(100));
        assert!(!detector.poll(start + Duration::from_millis(1000)));
        detector.observe(0.6, start + Duration::from_millis(1000));
        assert!(!detector.is_armed());
        detector.observe(0.0, start + Duration::from_millis(1100));
        assert!(!detector.poll(start + Duration::from_millis(2000)));
        assert!(detector.poll(start + Duration::from_millis(2600)));
    }

    #[test]
    fn smoothing_ignores_single_spike() {
        let mut detector = SilenceDetector::new(SilenceConfig::default());
        let start = Instant::now();
        for _ in 0..3 {
            detector.observe(0.5, start);
        }
        detector.observe(0.0, start);
        detector.observe(0.0, start);
        let quiet_deadline = detector.deadline();
        assert!(quiet_deadline.is_some());
        detector.observe(0.9, start + Duration::from_millis(50));
        assert_eq!(detector.deadline(), quiet_deadline);
    }
}
