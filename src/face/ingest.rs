//! Face frame ingestion
//!
//! Frames may arrive at any rate and with dropped frames in between; they are
//! never rejected for timing. A frame is only discarded when it is structurally
//! unusable, in which case every tracker keeps its previous state.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::face::types::{AttentionLevel, FaceTrackingData, ResolvedThresholds};

/// Result of validating one frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// The frame is usable; carries its capture time
    Accepted(DateTime<Utc>),
    /// The frame was dropped before reaching the trackers
    Discarded(String),
}

impl FrameOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FrameOutcome::Accepted(_))
    }
}

/// Face frame ingestor
pub struct FrameIngestor;

impl FrameIngestor {
    /// Validate a frame's structure, logging the reason when it is discarded
    pub fn validate(session_id: &str, frame: &FaceTrackingData) -> FrameOutcome {
        match Self::check(frame) {
            Ok(captured_at) => FrameOutcome::Accepted(captured_at),
            Err(reason) => {
                warn!(
                    session_id,
                    timestamp = frame.timestamp,
                    reason = %reason,
                    "face frame discarded"
                );
                FrameOutcome::Discarded(reason)
            }
        }
    }

    fn check(frame: &FaceTrackingData) -> Result<DateTime<Utc>, String> {
        let captured_at = frame
            .captured_at()
            .ok_or_else(|| format!("timestamp {} is out of range", frame.timestamp))?;

        if frame.face_count < 0 {
            return Err(format!("negative face count {}", frame.face_count));
        }

        let eyes = &frame.eyes;
        let expression = &frame.expression;
        let percentages = [
            ("left_eye_openness", Some(eyes.left_eye_openness)),
            ("right_eye_openness", Some(eyes.right_eye_openness)),
            ("left_eye_squint", eyes.left_eye_squint),
            ("right_eye_squint", eyes.right_eye_squint),
            ("smile", Some(expression.smile)),
            ("frown", Some(expression.frown)),
            ("surprise", Some(expression.surprise)),
            ("brow_raise", Some(expression.brow_raise)),
            ("mouth_open", Some(expression.mouth_open)),
            ("brow_down", expression.brow_down),
            ("lip_movement", expression.lip_movement),
        ];
        for (name, value) in percentages {
            let Some(value) = value else { continue };
            if !value.is_finite() {
                return Err(format!("{name} is not a finite number"));
            }
            if !(0.0..=100.0).contains(&value) {
                return Err(format!("{name} {value} is outside 0-100"));
            }
        }

        let pose = &frame.head_pose;
        for (name, value) in [("pitch", pose.pitch), ("yaw", pose.yaw), ("roll", pose.roll)] {
            if !value.is_finite() {
                return Err(format!("head {name} is not a finite number"));
            }
        }

        Ok(captured_at)
    }

    /// Attention level of a frame; a level supplied by the tracker wins
    pub fn attention(frame: &FaceTrackingData, thresholds: &ResolvedThresholds) -> AttentionLevel {
        if let Some(level) = frame.attention {
            return level;
        }
        if !frame.face_detected || frame.face_count == 0 {
            return AttentionLevel::Absent;
        }

        let pose = &frame.head_pose;
        let turned_away = pose.yaw.abs() > thresholds.head_turn_yaw_degrees
            || pose.pitch.abs() > thresholds.head_turn_pitch_degrees;
        if turned_away {
            return AttentionLevel::Distracted;
        }

        let tilted = pose.roll.abs() >= thresholds.head_tilt_degrees;
        if frame.eyes.gaze_direction.is_away() || tilted {
            return AttentionLevel::Partial;
        }

        AttentionLevel::Focused
    }
}
