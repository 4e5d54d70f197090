//! Signal state trackers
//!
//! Every face signal is a small state machine. Level signals (gaze, head pose,
//! expressions) go through a `DwellTracker`: a change of state is only accepted
//! once the new condition has held for both a minimum number of frames and a
//! minimum span of capture time. Occurrence signals (blinks, head direction
//! changes) go through a `RateTracker` over a sliding time window.
//!
//! Trackers only report transitions. A tracker sitting in a state reports
//! nothing, however many frames arrive.

use serde_json::{json, Value};
use std::collections::VecDeque;

use crate::config::{Dwell, FaceConfig};
use crate::face::types::{FaceTrackingData, ResolvedThresholds};

/// Tracked signals, in registration order.
///
/// Changes detected on the same frame are reported in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Presence,
    FaceCount,
    HeadTurn,
    Gaze,
    EyeClosure,
    BlinkRate,
    Squint,
    HeadTilt,
    HeadMovement,
    Talking,
    Confusion,
    LipReading,
}

impl Signal {
    pub const COUNT: usize = 12;

    pub const ALL: [Signal; Signal::COUNT] = [
        Signal::Presence,
        Signal::FaceCount,
        Signal::HeadTurn,
        Signal::Gaze,
        Signal::EyeClosure,
        Signal::BlinkRate,
        Signal::Squint,
        Signal::HeadTilt,
        Signal::HeadMovement,
        Signal::Talking,
        Signal::Confusion,
        Signal::LipReading,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether the signal is evaluated from face geometry (needs a detected face)
    pub fn needs_face(self) -> bool {
        !matches!(self, Signal::Presence | Signal::FaceCount)
    }
}

/// Direction of a tracker state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Entered the flagged state
    Entered,
    /// Returned to the normal state
    Exited,
    /// A rate tracker dropped back under its threshold; nothing is emitted
    Rearmed,
}

/// A state change detected on one frame
#[derive(Debug, Clone, PartialEq)]
pub struct SignalChange {
    pub signal: Signal,
    pub transition: Transition,
    pub details: Option<String>,
    pub data: Option<Value>,
}

/// Two-state tracker with hysteresis
#[derive(Debug, Clone)]
pub struct DwellTracker {
    dwell: Dwell,
    flagged: bool,
    /// Capture time of the first frame disagreeing with the current state
    candidate_since: Option<i64>,
    candidate_frames: u32,
}

impl DwellTracker {
    pub fn new(dwell: Dwell) -> Self {
        Self {
            dwell,
            flagged: false,
            candidate_since: None,
            candidate_frames: 0,
        }
    }

    pub fn is_flagged(&self) -> bool {
        self.flagged
    }

    /// Drop a pending transition without changing the current state.
    ///
    /// Used when the condition cannot be observed, so a dwell never spans
    /// frames on which it was not seen.
    pub fn interrupt(&mut self) {
        self.candidate_since = None;
        self.candidate_frames = 0;
    }

    /// Feed the condition observed on a frame captured at `now_ms`
    pub fn update(&mut self, condition: bool, now_ms: i64) -> Option<Transition> {
        if condition == self.flagged {
            self.candidate_since = None;
            self.candidate_frames = 0;
            return None;
        }

        let since = *self.candidate_since.get_or_insert(now_ms);
        self.candidate_frames = self.candidate_frames.saturating_add(1);

        let (min_ms, min_frames) = if self.flagged {
            (self.dwell.exit_ms, self.dwell.exit_frames)
        } else {
            (self.dwell.enter_ms, self.dwell.enter_frames)
        };

        if self.candidate_frames < min_frames || now_ms.saturating_sub(since) < min_ms {
            return None;
        }

        self.flagged = condition;
        self.candidate_since = None;
        self.candidate_frames = 0;
        Some(if condition {
            Transition::Entered
        } else {
            Transition::Exited
        })
    }
}

/// Sliding-window occurrence counter that fires once per excursion over threshold
#[derive(Debug, Clone)]
pub struct RateTracker {
    window_ms: i64,
    threshold: f64,
    occurrences: VecDeque<i64>,
    armed: bool,
}

impl RateTracker {
    pub fn new(window_ms: i64, threshold: f64) -> Self {
        Self {
            window_ms,
            threshold,
            occurrences: VecDeque::new(),
            armed: true,
        }
    }

    /// Occurrences inside the window as of the last update
    pub fn count(&self) -> usize {
        self.occurrences.len()
    }

    pub fn update(&mut self, occurred: bool, now_ms: i64) -> Option<Transition> {
        if occurred {
            self.occurrences.push_back(now_ms);
        }
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while self.occurrences.front().is_some_and(|&t| t <= cutoff) {
            self.occurrences.pop_front();
        }

        let over = self.occurrences.len() as f64 > self.threshold;
        match (over, self.armed) {
            (true, true) => {
                self.armed = false;
                Some(Transition::Entered)
            }
            (false, false) => {
                self.armed = true;
                Some(Transition::Rearmed)
            }
            _ => None,
        }
    }
}

/// Coarse head direction used to count head movements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadDirection {
    Center,
    Left,
    Right,
    Up,
    Down,
}

impl HeadDirection {
    fn classify(yaw: f64, pitch: f64, deadzone: f64) -> Self {
        if yaw.abs() <= deadzone && pitch.abs() <= deadzone {
            HeadDirection::Center
        } else if yaw.abs() >= pitch.abs() {
            if yaw < 0.0 {
                HeadDirection::Left
            } else {
                HeadDirection::Right
            }
        } else if pitch < 0.0 {
            HeadDirection::Down
        } else {
            HeadDirection::Up
        }
    }
}

/// All trackers of one session
#[derive(Debug, Clone)]
pub struct TrackerBank {
    thresholds: ResolvedThresholds,
    eyes_closed_openness: f64,
    head_direction_deadzone: f64,
    presence: DwellTracker,
    face_count: DwellTracker,
    head_turn: DwellTracker,
    gaze: DwellTracker,
    eye_closure: DwellTracker,
    blink_rate: RateTracker,
    squint: DwellTracker,
    head_tilt: DwellTracker,
    head_movement: RateTracker,
    talking: DwellTracker,
    confusion: DwellTracker,
    lip_reading: DwellTracker,
    was_blinking: bool,
    last_direction: Option<HeadDirection>,
}

impl TrackerBank {
    pub fn new(config: &FaceConfig, thresholds: ResolvedThresholds) -> Self {
        let dwell = &config.dwell;
        let eyes_closed_ms = (thresholds.eyes_closed_extended_secs * 1000.0).round() as i64;
        // Thresholds are per minute; the window may be configured to another width
        let blinks_per_window =
            thresholds.excessive_blink_per_minute * config.blink_window_ms as f64 / 60_000.0;

        Self {
            thresholds,
            eyes_closed_openness: config.eyes_closed_openness,
            head_direction_deadzone: config.head_direction_deadzone_deg,
            presence: DwellTracker::new(dwell.presence),
            face_count: DwellTracker::new(Dwell::INSTANT),
            head_turn: DwellTracker::new(dwell.head_turn),
            gaze: DwellTracker::new(dwell.gaze),
            eye_closure: DwellTracker::new(Dwell::millis(eyes_closed_ms, dwell.eyes_opened_ms)),
            blink_rate: RateTracker::new(config.blink_window_ms, blinks_per_window),
            squint: DwellTracker::new(dwell.squint),
            head_tilt: DwellTracker::new(dwell.head_tilt),
            head_movement: RateTracker::new(
                config.head_movement_window_ms,
                thresholds.head_movement_per_window,
            ),
            talking: DwellTracker::new(dwell.talking),
            confusion: DwellTracker::new(dwell.confusion),
            lip_reading: DwellTracker::new(dwell.lip_reading),
            was_blinking: false,
            last_direction: None,
        }
    }

    pub fn thresholds(&self) -> &ResolvedThresholds {
        &self.thresholds
    }

    /// Whether a dwell signal is currently in its flagged state
    pub fn is_flagged(&self, signal: Signal) -> bool {
        match signal {
            Signal::Presence => self.presence.is_flagged(),
            Signal::FaceCount => self.face_count.is_flagged(),
            Signal::HeadTurn => self.head_turn.is_flagged(),
            Signal::Gaze => self.gaze.is_flagged(),
            Signal::EyeClosure => self.eye_closure.is_flagged(),
            Signal::Squint => self.squint.is_flagged(),
            Signal::HeadTilt => self.head_tilt.is_flagged(),
            Signal::Talking => self.talking.is_flagged(),
            Signal::Confusion => self.confusion.is_flagged(),
            Signal::LipReading => self.lip_reading.is_flagged(),
            Signal::BlinkRate | Signal::HeadMovement => false,
        }
    }

    /// Run every tracker over a validated frame, in registration order
    pub fn update(&mut self, frame: &FaceTrackingData) -> Vec<SignalChange> {
        let now = frame.timestamp;
        let face_visible = frame.face_detected && frame.face_count > 0;
        let mut changes = Vec::new();

        if !face_visible {
            self.interrupt_geometry();
        }

        for signal in Signal::ALL {
            if signal.needs_face() && !face_visible {
                continue;
            }
            if let Some(transition) = self.step(signal, frame, now) {
                let (details, data) = describe(signal, frame, self);
                changes.push(SignalChange {
                    signal,
                    transition,
                    details,
                    data,
                });
            }
        }

        changes
    }

    /// Face-geometry trackers keep their state while the face is gone, but
    /// any dwell in progress has to start over once it is back
    fn interrupt_geometry(&mut self) {
        for tracker in [
            &mut self.head_turn,
            &mut self.gaze,
            &mut self.eye_closure,
            &mut self.squint,
            &mut self.head_tilt,
            &mut self.talking,
            &mut self.confusion,
            &mut self.lip_reading,
        ] {
            tracker.interrupt();
        }
    }

    fn step(&mut self, signal: Signal, frame: &FaceTrackingData, now: i64) -> Option<Transition> {
        let t = &self.thresholds;
        let eyes = &frame.eyes;
        let expression = &frame.expression;
        let pose = &frame.head_pose;

        match signal {
            Signal::Presence => {
                let absent = !frame.face_detected || frame.face_count == 0;
                self.presence.update(absent, now)
            }
            Signal::FaceCount => self.face_count.update(frame.face_count > 1, now),
            Signal::HeadTurn => {
                let turned = pose.yaw.abs() > t.head_turn_yaw_degrees
                    || pose.pitch.abs() > t.head_turn_pitch_degrees;
                self.head_turn.update(turned, now)
            }
            Signal::Gaze => self.gaze.update(eyes.gaze_direction.is_away(), now),
            Signal::EyeClosure => {
                let closed = eyes.left_eye_openness < self.eyes_closed_openness
                    && eyes.right_eye_openness < self.eyes_closed_openness;
                self.eye_closure.update(closed, now)
            }
            Signal::BlinkRate => {
                let blink_started = eyes.is_blinking && !self.was_blinking;
                self.was_blinking = eyes.is_blinking;
                self.blink_rate.update(blink_started, now)
            }
            Signal::Squint => {
                let squinting = eyes
                    .average_squint()
                    .is_some_and(|s| s >= t.squint_threshold);
                self.squint.update(squinting, now)
            }
            Signal::HeadTilt => self.head_tilt.update(pose.roll.abs() >= t.head_tilt_degrees, now),
            Signal::HeadMovement => {
                let direction =
                    HeadDirection::classify(pose.yaw, pose.pitch, self.head_direction_deadzone);
                let moved = self.last_direction.is_some_and(|last| last != direction);
                self.last_direction = Some(direction);
                self.head_movement.update(moved, now)
            }
            Signal::Talking => self
                .talking
                .update(expression.mouth_open >= t.talking_mouth_open, now),
            Signal::Confusion => {
                let confused = expression.brow_raise >= t.confusion_brow_inner_up
                    && expression
                        .brow_down
                        .is_some_and(|d| d >= t.confusion_brow_down);
                self.confusion.update(confused, now)
            }
            Signal::LipReading => {
                let mouthing = expression
                    .lip_movement
                    .is_some_and(|m| m >= t.lip_reading_lip_movement)
                    && expression.mouth_open < t.lip_reading_jaw_open_max;
                self.lip_reading.update(mouthing, now)
            }
        }
    }
}

/// Details and signal values attached to a change
fn describe(
    signal: Signal,
    frame: &FaceTrackingData,
    bank: &TrackerBank,
) -> (Option<String>, Option<Value>) {
    let eyes = &frame.eyes;
    let expression = &frame.expression;
    let pose = &frame.head_pose;

    match signal {
        Signal::Presence => (None, Some(json!({ "faceCount": frame.face_count }))),
        Signal::FaceCount => (
            Some(format!("{} faces in frame", frame.face_count)),
            Some(json!({ "faceCount": frame.face_count })),
        ),
        Signal::HeadTurn | Signal::HeadTilt => (
            Some(format!(
                "yaw {:.1}°, pitch {:.1}°, roll {:.1}°",
                pose.yaw, pose.pitch, pose.roll
            )),
            Some(json!({ "yaw": pose.yaw, "pitch": pose.pitch, "roll": pose.roll })),
        ),
        Signal::Gaze => (None, Some(json!({ "gazeDirection": eyes.gaze_direction }))),
        Signal::EyeClosure => (
            None,
            Some(json!({
                "leftEyeOpenness": eyes.left_eye_openness,
                "rightEyeOpenness": eyes.right_eye_openness,
            })),
        ),
        Signal::BlinkRate => (
            Some(format!("{} blinks in the current window", bank.blink_rate.count())),
            Some(json!({ "blinks": bank.blink_rate.count() })),
        ),
        Signal::Squint => (None, Some(json!({ "squint": eyes.average_squint() }))),
        Signal::HeadMovement => (
            Some(format!(
                "{} head movements in the current window",
                bank.head_movement.count()
            )),
            Some(json!({ "movements": bank.head_movement.count() })),
        ),
        Signal::Talking => (None, Some(json!({ "mouthOpen": expression.mouth_open }))),
        Signal::Confusion => (
            None,
            Some(json!({
                "browInnerUp": expression.brow_raise,
                "browDown": expression.brow_down,
            })),
        ),
        Signal::LipReading => (
            None,
            Some(json!({
                "lipMovement": expression.lip_movement,
                "jawOpen": expression.mouth_open,
            })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_order_matches_index() {
        for (i, signal) in Signal::ALL.iter().enumerate() {
            assert_eq!(signal.index(), i);
        }
    }

    #[test]
    fn test_single_frame_crossing_needs_one_frame_dwell() {
        let mut strict = DwellTracker::new(Dwell::frames(2, 1));
        assert_eq!(strict.update(true, 0), None);
        assert_eq!(strict.update(false, 33), None);
        assert!(!strict.is_flagged());

        let mut loose = DwellTracker::new(Dwell::frames(1, 1));
        assert_eq!(loose.update(true, 0), Some(Transition::Entered));
        assert_eq!(loose.update(false, 33), Some(Transition::Exited));
    }

    #[test]
    fn test_time_dwell_requires_continuous_condition() {
        let mut tracker = DwellTracker::new(Dwell::millis(1_000, 500));
        assert_eq!(tracker.update(true, 0), None);
        assert_eq!(tracker.update(true, 600), None);
        // Interruption restarts the clock
        assert_eq!(tracker.update(false, 700), None);
        assert_eq!(tracker.update(true, 800), None);
        assert_eq!(tracker.update(true, 1_700), None);
        assert_eq!(tracker.update(true, 1_800), Some(Transition::Entered));

        assert_eq!(tracker.update(false, 2_000), None);
        assert_eq!(tracker.update(false, 2_500), Some(Transition::Exited));
    }

    #[test]
    fn test_interrupt_restarts_pending_dwell() {
        let mut tracker = DwellTracker::new(Dwell::millis(1_000, 500));
        assert_eq!(tracker.update(true, 0), None);
        tracker.interrupt();
        assert_eq!(tracker.update(true, 4_950), None);
        assert!(!tracker.is_flagged());
        assert_eq!(tracker.update(true, 5_950), Some(Transition::Entered));

        // The flagged state itself survives an interruption
        tracker.interrupt();
        assert!(tracker.is_flagged());
    }

    #[test]
    fn test_dropped_frames_still_satisfy_time_dwell() {
        let mut tracker = DwellTracker::new(Dwell::millis(1_000, 500));
        assert_eq!(tracker.update(true, 0), None);
        assert_eq!(tracker.update(true, 2_500), Some(Transition::Entered));
    }

    #[test]
    fn test_rate_tracker_fires_once_and_rearms() {
        let mut tracker = RateTracker::new(1_000, 2.0);
        assert_eq!(tracker.update(true, 0), None);
        assert_eq!(tracker.update(true, 100), None);
        assert_eq!(tracker.update(true, 200), Some(Transition::Entered));
        assert_eq!(tracker.update(true, 300), None);
        assert_eq!(tracker.count(), 4);

        // Window slides past the early occurrences
        assert_eq!(tracker.update(false, 1_250), Some(Transition::Rearmed));
        assert_eq!(tracker.count(), 1);
        assert_eq!(tracker.update(true, 1_300), None);
        assert_eq!(tracker.update(true, 1_350), None);
        assert_eq!(tracker.update(true, 1_400), Some(Transition::Entered));
    }

    #[test]
    fn test_head_direction_classification() {
        assert_eq!(HeadDirection::classify(5.0, -3.0, 15.0), HeadDirection::Center);
        assert_eq!(HeadDirection::classify(-30.0, 10.0, 15.0), HeadDirection::Left);
        assert_eq!(HeadDirection::classify(30.0, 10.0, 15.0), HeadDirection::Right);
        assert_eq!(HeadDirection::classify(5.0, 20.0, 15.0), HeadDirection::Up);
        assert_eq!(HeadDirection::classify(5.0, -20.0, 15.0), HeadDirection::Down);
    }
}
