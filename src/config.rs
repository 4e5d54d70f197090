//! Engine configuration
//!
//! All sections are optional in the TOML file and default independently. Values
//! that make no sense (zero-width windows, negative dwell) are replaced by the
//! documented defaults when the config is sanitized; configuration problems are
//! never fatal to a session.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::MonitorError;
use crate::face::types::TrackingThresholds;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub typing: TypingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub face: FaceConfig,
}

impl EngineConfig {
    /// Parse a TOML document; missing sections take their defaults
    pub fn from_toml_str(toml_str: &str) -> Result<Self, MonitorError> {
        let config: EngineConfig = toml::from_str(toml_str)?;
        Ok(config.sanitized())
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, MonitorError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Render the configuration back to TOML
    pub fn to_toml_string(&self) -> Result<String, MonitorError> {
        toml::to_string_pretty(self).map_err(|e| MonitorError::Config(e.to_string()))
    }

    /// Replace unusable values with defaults
    pub fn sanitized(self) -> Self {
        Self {
            typing: self.typing.sanitized(),
            risk: self.risk.sanitized(),
            face: self.face.sanitized(),
        }
    }
}

/// Keystroke aggregation, speed window and burst segmentation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingConfig {
    /// Index of the first batch a client sends
    pub first_batch_index: u64,
    /// Buffered out-of-order batches tolerated before a gap is skipped
    pub max_pending_batches: usize,
    /// Keystroke-time span a gap may stay open before it is skipped
    pub max_gap_wait_ms: i64,
    /// Width of each speed window bucket
    pub speed_window_ms: i64,
    /// Interval above which a gap counts as a long pause
    pub long_pause_ms: i64,
    /// Interval below which consecutive keystrokes belong to the same burst
    pub burst_interval_ms: i64,
    /// Smallest run of keystrokes reported as a burst
    pub min_burst_keystrokes: usize,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            first_batch_index: 0,
            max_pending_batches: 8,
            max_gap_wait_ms: 5_000,
            speed_window_ms: 5_000,
            long_pause_ms: 2_000,
            burst_interval_ms: 500,
            min_burst_keystrokes: 3,
        }
    }
}

impl TypingConfig {
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            first_batch_index: self.first_batch_index,
            max_pending_batches: positive_or(
                "max_pending_batches",
                self.max_pending_batches,
                defaults.max_pending_batches,
            ),
            max_gap_wait_ms: non_negative_ms_or(
                "max_gap_wait_ms",
                self.max_gap_wait_ms,
                defaults.max_gap_wait_ms,
            ),
            speed_window_ms: positive_ms_or(
                "speed_window_ms",
                self.speed_window_ms,
                defaults.speed_window_ms,
            ),
            long_pause_ms: positive_ms_or("long_pause_ms", self.long_pause_ms, defaults.long_pause_ms),
            burst_interval_ms: positive_ms_or(
                "burst_interval_ms",
                self.burst_interval_ms,
                defaults.burst_interval_ms,
            ),
            min_burst_keystrokes: positive_or(
                "min_burst_keystrokes",
                self.min_burst_keystrokes,
                defaults.min_burst_keystrokes,
            ),
        }
    }
}

/// Trigger thresholds and point values of the typing risk checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub min_keystrokes: u64,
    pub low_keystroke_points: u32,

    pub no_corrections_min_chars: u64,
    pub no_corrections_points: u32,

    pub consistent_timing_min_intervals: u64,
    pub consistent_timing_max_std_ms: f64,
    pub consistent_timing_points: u32,

    pub max_bursts_after_pause: u64,
    pub bursts_after_pause_points: u32,

    pub superhuman_wpm: f64,
    pub superhuman_points: u32,

    pub very_low_wpm: f64,
    pub very_low_speed_min_chars: u64,
    pub very_low_speed_points: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_keystrokes: 20,
            low_keystroke_points: 10,
            no_corrections_min_chars: 50,
            no_corrections_points: 10,
            consistent_timing_min_intervals: 10,
            consistent_timing_max_std_ms: 15.0,
            consistent_timing_points: 25,
            max_bursts_after_pause: 1,
            bursts_after_pause_points: 20,
            superhuman_wpm: 150.0,
            superhuman_points: 35,
            very_low_wpm: 10.0,
            very_low_speed_min_chars: 20,
            very_low_speed_points: 10,
        }
    }
}

impl RiskConfig {
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            consistent_timing_max_std_ms: finite_non_negative_or(
                "consistent_timing_max_std_ms",
                self.consistent_timing_max_std_ms,
                defaults.consistent_timing_max_std_ms,
            ),
            superhuman_wpm: finite_non_negative_or(
                "superhuman_wpm",
                self.superhuman_wpm,
                defaults.superhuman_wpm,
            ),
            very_low_wpm: finite_non_negative_or(
                "very_low_wpm",
                self.very_low_wpm,
                defaults.very_low_wpm,
            ),
            ..self
        }
    }
}

/// Minimum continuous time (and frame count) before a tracker changes state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dwell {
    pub enter_ms: i64,
    pub exit_ms: i64,
    pub enter_frames: u32,
    pub exit_frames: u32,
}

impl Default for Dwell {
    fn default() -> Self {
        Self::millis(1_000, 500)
    }
}

impl Dwell {
    /// Transition on the first frame in either direction
    pub const INSTANT: Dwell = Dwell {
        enter_ms: 0,
        exit_ms: 0,
        enter_frames: 1,
        exit_frames: 1,
    };

    pub const fn millis(enter_ms: i64, exit_ms: i64) -> Self {
        Self {
            enter_ms,
            exit_ms,
            enter_frames: 1,
            exit_frames: 1,
        }
    }

    pub const fn frames(enter_frames: u32, exit_frames: u32) -> Self {
        Self {
            enter_ms: 0,
            exit_ms: 0,
            enter_frames,
            exit_frames,
        }
    }

    fn sanitized(self, name: &str, defaults: Dwell) -> Self {
        Self {
            enter_ms: non_negative_ms_or(name, self.enter_ms, defaults.enter_ms),
            exit_ms: non_negative_ms_or(name, self.exit_ms, defaults.exit_ms),
            enter_frames: self.enter_frames.max(1),
            exit_frames: self.exit_frames.max(1),
        }
    }
}

/// Dwell windows of the hysteresis trackers.
///
/// Eye closure takes its entry dwell from `eyes_closed_extended_secs` in the
/// thresholds; only its exit side is configured here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DwellConfig {
    pub presence: Dwell,
    pub gaze: Dwell,
    pub head_turn: Dwell,
    pub eyes_opened_ms: i64,
    pub squint: Dwell,
    pub head_tilt: Dwell,
    pub talking: Dwell,
    pub confusion: Dwell,
    pub lip_reading: Dwell,
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            presence: Dwell::millis(500, 500),
            gaze: Dwell::millis(1_000, 500),
            head_turn: Dwell::millis(1_000, 500),
            eyes_opened_ms: 0,
            squint: Dwell::millis(1_000, 500),
            head_tilt: Dwell::millis(1_000, 500),
            talking: Dwell::millis(200, 600),
            confusion: Dwell::millis(1_000, 500),
            lip_reading: Dwell::millis(1_000, 500),
        }
    }
}

impl DwellConfig {
    /// Every tracker transitions on the first qualifying frame
    pub fn instant() -> Self {
        Self {
            presence: Dwell::INSTANT,
            gaze: Dwell::INSTANT,
            head_turn: Dwell::INSTANT,
            eyes_opened_ms: 0,
            squint: Dwell::INSTANT,
            head_tilt: Dwell::INSTANT,
            talking: Dwell::INSTANT,
            confusion: Dwell::INSTANT,
            lip_reading: Dwell::INSTANT,
        }
    }

    fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            presence: self.presence.sanitized("dwell.presence", defaults.presence),
            gaze: self.gaze.sanitized("dwell.gaze", defaults.gaze),
            head_turn: self.head_turn.sanitized("dwell.head_turn", defaults.head_turn),
            eyes_opened_ms: non_negative_ms_or(
                "dwell.eyes_opened_ms",
                self.eyes_opened_ms,
                defaults.eyes_opened_ms,
            ),
            squint: self.squint.sanitized("dwell.squint", defaults.squint),
            head_tilt: self.head_tilt.sanitized("dwell.head_tilt", defaults.head_tilt),
            talking: self.talking.sanitized("dwell.talking", defaults.talking),
            confusion: self.confusion.sanitized("dwell.confusion", defaults.confusion),
            lip_reading: self.lip_reading.sanitized("dwell.lip_reading", defaults.lip_reading),
        }
    }
}

/// Face tracking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    pub thresholds: TrackingThresholds,
    pub dwell: DwellConfig,
    /// Sliding window for the blink-rate tracker
    pub blink_window_ms: i64,
    /// Sliding window for the head-movement tracker
    pub head_movement_window_ms: i64,
    /// Yaw/pitch inside this range counts as facing the screen for movement counting
    pub head_direction_deadzone_deg: f64,
    /// Per-eye openness below this counts as closed
    pub eyes_closed_openness: f64,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            thresholds: TrackingThresholds::default(),
            dwell: DwellConfig::default(),
            blink_window_ms: 60_000,
            head_movement_window_ms: 10_000,
            head_direction_deadzone_deg: 15.0,
            eyes_closed_openness: 20.0,
        }
    }
}

impl FaceConfig {
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            thresholds: self.thresholds,
            dwell: self.dwell.sanitized(),
            blink_window_ms: positive_ms_or(
                "blink_window_ms",
                self.blink_window_ms,
                defaults.blink_window_ms,
            ),
            head_movement_window_ms: positive_ms_or(
                "head_movement_window_ms",
                self.head_movement_window_ms,
                defaults.head_movement_window_ms,
            ),
            head_direction_deadzone_deg: finite_non_negative_or(
                "head_direction_deadzone_deg",
                self.head_direction_deadzone_deg,
                defaults.head_direction_deadzone_deg,
            ),
            eyes_closed_openness: finite_non_negative_or(
                "eyes_closed_openness",
                self.eyes_closed_openness,
                defaults.eyes_closed_openness,
            ),
        }
    }
}

fn positive_or(name: &str, value: usize, default: usize) -> usize {
    if value == 0 {
        debug!(field = name, default, "zero config value replaced by default");
        return default;
    }
    value
}

fn positive_ms_or(name: &str, value: i64, default: i64) -> i64 {
    if value <= 0 {
        debug!(field = name, value, default, "non-positive duration replaced by default");
        return default;
    }
    value
}

fn non_negative_ms_or(name: &str, value: i64, default: i64) -> i64 {
    if value < 0 {
        debug!(field = name, value, default, "negative duration replaced by default");
        return default;
    }
    value
}

fn finite_non_negative_or(name: &str, value: f64, default: f64) -> f64 {
    if !value.is_finite() || value < 0.0 {
        debug!(field = name, value, default, "invalid numeric config replaced by default");
        return default;
    }
    value
}
