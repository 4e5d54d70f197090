//! Face tracking data types
//!
//! One `FaceTrackingData` sample arrives per processed video frame. Percentages
//! are blendshape-derived activations in the 0-100 range; angles are degrees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Gaze direction reported by the face tracker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GazeDirection {
    #[default]
    Center,
    Left,
    Right,
    Up,
    Down,
    Unknown,
}

impl GazeDirection {
    /// Whether the gaze is off the screen
    pub fn is_away(self) -> bool {
        matches!(
            self,
            GazeDirection::Left | GazeDirection::Right | GazeDirection::Up | GazeDirection::Down
        )
    }
}

/// Dominant facial expression
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    #[default]
    Neutral,
    Happy,
    Sad,
    Surprised,
    Angry,
    Confused,
    Focused,
}

/// Coarse attention classification of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionLevel {
    Focused,
    Partial,
    Distracted,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyeMetrics {
    pub left_eye_openness: f64,
    pub right_eye_openness: f64,
    #[serde(default)]
    pub is_blinking: bool,
    #[serde(default)]
    pub gaze_direction: GazeDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_eye_squint: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_eye_squint: Option<f64>,
}

impl EyeMetrics {
    pub fn average_openness(&self) -> f64 {
        (self.left_eye_openness + self.right_eye_openness) / 2.0
    }

    /// Mean squint of the eyes that report one
    pub fn average_squint(&self) -> Option<f64> {
        match (self.left_eye_squint, self.right_eye_squint) {
            (Some(l), Some(r)) => Some((l + r) / 2.0),
            (Some(v), None) | (None, Some(v)) => Some(v),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionMetrics {
    #[serde(default)]
    pub dominant: Expression,
    pub smile: f64,
    pub frown: f64,
    pub surprise: f64,
    /// Inner brow raise
    pub brow_raise: f64,
    /// Jaw opening
    pub mouth_open: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brow_down: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lip_movement: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

/// One face tracking sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceTrackingData {
    /// Capture time in milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(alias = "faceDetected")]
    pub face_detected: bool,
    #[serde(alias = "faceCount")]
    pub face_count: i64,
    pub eyes: EyeMetrics,
    pub expression: ExpressionMetrics,
    #[serde(alias = "headPose")]
    pub head_pose: HeadPose,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attention: Option<AttentionLevel>,
}

impl FaceTrackingData {
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

/// Face tracking cutoffs as supplied by configuration; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingThresholds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eyes_closed_extended_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excessive_blink_per_minute: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squint_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_tilt_degrees: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_movement_per_window: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confusion_brow_inner_up: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confusion_brow_down: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lip_reading_lip_movement: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lip_reading_jaw_open_max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_turn_yaw_degrees: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_turn_pitch_degrees: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub talking_mouth_open: Option<f64>,
}

impl TrackingThresholds {
    /// Fill every missing or invalid field with its documented default
    pub fn resolve(&self) -> ResolvedThresholds {
        let d = ResolvedThresholds::default();
        ResolvedThresholds {
            eyes_closed_extended_secs: pick(
                "eyes_closed_extended_secs",
                self.eyes_closed_extended_secs,
                d.eyes_closed_extended_secs,
            ),
            excessive_blink_per_minute: pick(
                "excessive_blink_per_minute",
                self.excessive_blink_per_minute,
                d.excessive_blink_per_minute,
            ),
            squint_threshold: pick("squint_threshold", self.squint_threshold, d.squint_threshold),
            head_tilt_degrees: pick("head_tilt_degrees", self.head_tilt_degrees, d.head_tilt_degrees),
            head_movement_per_window: pick(
                "head_movement_per_window",
                self.head_movement_per_window,
                d.head_movement_per_window,
            ),
            confusion_brow_inner_up: pick(
                "confusion_brow_inner_up",
                self.confusion_brow_inner_up,
                d.confusion_brow_inner_up,
            ),
            confusion_brow_down: pick(
                "confusion_brow_down",
                self.confusion_brow_down,
                d.confusion_brow_down,
            ),
            lip_reading_lip_movement: pick(
                "lip_reading_lip_movement",
                self.lip_reading_lip_movement,
                d.lip_reading_lip_movement,
            ),
            lip_reading_jaw_open_max: pick(
                "lip_reading_jaw_open_max",
                self.lip_reading_jaw_open_max,
                d.lip_reading_jaw_open_max,
            ),
            head_turn_yaw_degrees: pick(
                "head_turn_yaw_degrees",
                self.head_turn_yaw_degrees,
                d.head_turn_yaw_degrees,
            ),
            head_turn_pitch_degrees: pick(
                "head_turn_pitch_degrees",
                self.head_turn_pitch_degrees,
                d.head_turn_pitch_degrees,
            ),
            talking_mouth_open: pick(
                "talking_mouth_open",
                self.talking_mouth_open,
                d.talking_mouth_open,
            ),
        }
    }
}

fn pick(name: &str, value: Option<f64>, default: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() && v >= 0.0 => v,
        Some(v) => {
            debug!(field = name, value = v, default, "invalid threshold replaced by default");
            default
        }
        None => default,
    }
}

/// Fully populated thresholds, fixed for the lifetime of a session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedThresholds {
    pub eyes_closed_extended_secs: f64,
    pub excessive_blink_per_minute: f64,
    pub squint_threshold: f64,
    pub head_tilt_degrees: f64,
    pub head_movement_per_window: f64,
    pub confusion_brow_inner_up: f64,
    pub confusion_brow_down: f64,
    pub lip_reading_lip_movement: f64,
    pub lip_reading_jaw_open_max: f64,
    pub head_turn_yaw_degrees: f64,
    pub head_turn_pitch_degrees: f64,
    pub talking_mouth_open: f64,
}

impl Default for ResolvedThresholds {
    fn default() -> Self {
        Self {
            eyes_closed_extended_secs: 3.0,
            excessive_blink_per_minute: 20.0,
            squint_threshold: 50.0,
            head_tilt_degrees: 25.0,
            head_movement_per_window: 5.0,
            confusion_brow_inner_up: 40.0,
            confusion_brow_down: 30.0,
            lip_reading_lip_movement: 20.0,
            lip_reading_jaw_open_max: 15.0,
            head_turn_yaw_degrees: 40.0,
            head_turn_pitch_degrees: 35.0,
            talking_mouth_open: 30.0,
        }
    }
}
