//! Face tracking pipeline
//!
//! Frame → Ingestor → Trackers → Emitter → events.
//! Thresholds are resolved once when the analyzer is created.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::config::EngineConfig;
use crate::face::emitter::{EventEmitter, FaceEventType, FaceTrackingEventPayload};
use crate::face::ingest::{FrameIngestor, FrameOutcome};
use crate::face::trackers::{Signal, TrackerBank};
use crate::face::types::{AttentionLevel, FaceTrackingData, ResolvedThresholds};

/// Per-session face tracking totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceTrackingSummary {
    pub frames_processed: u64,
    pub frames_discarded: u64,
    /// Emitted events by type
    pub event_counts: BTreeMap<FaceEventType, u64>,
    /// Accepted frames by attention level
    pub attention: AttentionHistogram,
    pub last_frame_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionHistogram {
    pub focused: u64,
    pub partial: u64,
    pub distracted: u64,
    pub absent: u64,
}

impl AttentionHistogram {
    fn record(&mut self, level: AttentionLevel) {
        match level {
            AttentionLevel::Focused => self.focused += 1,
            AttentionLevel::Partial => self.partial += 1,
            AttentionLevel::Distracted => self.distracted += 1,
            AttentionLevel::Absent => self.absent += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.focused + self.partial + self.distracted + self.absent
    }
}

/// Stateful face tracking analyzer for one session
#[derive(Debug, Clone)]
pub struct FaceAnalyzer {
    session_id: String,
    trackers: TrackerBank,
    emitter: EventEmitter,
    summary: FaceTrackingSummary,
}

impl FaceAnalyzer {
    pub fn new(session_id: &str, config: &EngineConfig) -> Self {
        let thresholds = config.face.thresholds.resolve();
        Self {
            session_id: session_id.to_string(),
            trackers: TrackerBank::new(&config.face, thresholds),
            emitter: EventEmitter::new(session_id),
            summary: FaceTrackingSummary::default(),
        }
    }

    /// Process one frame and return the events it triggered.
    ///
    /// A structurally invalid frame yields no events and changes no tracker.
    pub fn ingest(&mut self, frame: &FaceTrackingData) -> Vec<FaceTrackingEventPayload> {
        let captured_at = match FrameIngestor::validate(&self.session_id, frame) {
            FrameOutcome::Accepted(captured_at) => captured_at,
            FrameOutcome::Discarded(_) => {
                self.summary.frames_discarded += 1;
                return Vec::new();
            }
        };

        self.summary.frames_processed += 1;
        self.summary
            .attention
            .record(FrameIngestor::attention(frame, self.trackers.thresholds()));
        self.summary.last_frame_at = Some(
            self.summary
                .last_frame_at
                .map_or(captured_at, |last| last.max(captured_at)),
        );

        let changes = self.trackers.update(frame);
        let events = self.emitter.emit(changes, captured_at);
        for event in &events {
            *self.summary.event_counts.entry(event.event_type).or_insert(0) += 1;
        }
        events
    }

    /// Parse and process one frame payload.
    ///
    /// A payload that does not parse as a frame is discarded and counted like
    /// any other invalid frame.
    pub fn ingest_json(&mut self, json: &str) -> Vec<FaceTrackingEventPayload> {
        match serde_json::from_str::<FaceTrackingData>(json) {
            Ok(frame) => self.ingest(&frame),
            Err(e) => {
                warn!(
                    session_id = %self.session_id,
                    reason = %e,
                    "face frame discarded"
                );
                self.summary.frames_discarded += 1;
                Vec::new()
            }
        }
    }

    pub fn summary(&self) -> &FaceTrackingSummary {
        &self.summary
    }

    pub fn thresholds(&self) -> &ResolvedThresholds {
        self.trackers.thresholds()
    }

    pub fn is_flagged(&self, signal: Signal) -> bool {
        self.trackers.is_flagged(signal)
    }

    /// Time since the newest accepted frame; `None` before the first frame
    pub fn time_since_last_update(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.summary.last_frame_at.map(|last| now - last)
    }
}
