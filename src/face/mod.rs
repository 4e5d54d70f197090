//! Face tracking module
//!
//! Turns a stream of per-frame face tracking samples into edge-triggered
//! proctoring events.
//!
//! Pipeline: Frame → Ingestor → Signal Trackers → Event Emitter → events

pub mod emitter;
pub mod ingest;
pub mod pipeline;
pub mod trackers;
pub mod types;

pub use emitter::{EventSeverity, FaceEventType, FaceTrackingEventPayload};
pub use ingest::FrameOutcome;
pub use pipeline::{AttentionHistogram, FaceAnalyzer, FaceTrackingSummary};
pub use types::{
    AttentionLevel, Expression, ExpressionMetrics, EyeMetrics, FaceTrackingData, GazeDirection,
    HeadPose, ResolvedThresholds, TrackingThresholds,
};
