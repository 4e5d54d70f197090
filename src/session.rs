//! Per-session analyzer
//!
//! Owns all typing and face state of one session. Not thread-safe by itself;
//! the registry gives every session a single owning task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::MonitorError;
use crate::face::{FaceAnalyzer, FaceTrackingData, FaceTrackingEventPayload, FaceTrackingSummary};
use crate::keystroke::{KeystrokeBatch, KeystrokeBatchResponse, TypingAnalysis, TypingAnalyzer};
use crate::{ENGINE_VERSION, PRODUCER_NAME};

/// Parse a keystroke batch payload
pub fn parse_batch(json: &str) -> Result<KeystrokeBatch, MonitorError> {
    serde_json::from_str(json).map_err(|e| MonitorError::InvalidBatch(e.to_string()))
}

/// Parse a face tracking frame
pub fn parse_frame(json: &str) -> Result<FaceTrackingData, MonitorError> {
    serde_json::from_str(json).map_err(|e| MonitorError::InvalidFrame(e.to_string()))
}

/// Final report of a closed session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub producer: String,
    pub engine_version: String,
    pub typing: TypingAnalysis,
    pub face: FaceTrackingSummary,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Synchronous analyzer for one session
#[derive(Debug, Clone)]
pub struct SessionAnalyzer {
    session_id: String,
    typing: TypingAnalyzer,
    face: FaceAnalyzer,
}

impl SessionAnalyzer {
    pub fn new(session_id: &str, config: &EngineConfig) -> Self {
        Self {
            session_id: session_id.to_string(),
            typing: TypingAnalyzer::new(session_id, config),
            face: FaceAnalyzer::new(session_id, config),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn ingest_batch(
        &mut self,
        batch: KeystrokeBatch,
    ) -> Result<KeystrokeBatchResponse, MonitorError> {
        self.typing.ingest(batch)
    }

    pub fn ingest_frame(&mut self, frame: &FaceTrackingData) -> Vec<FaceTrackingEventPayload> {
        self.face.ingest(frame)
    }

    /// Feed a raw frame payload; one that does not parse is discarded
    pub fn ingest_frame_json(&mut self, json: &str) -> Vec<FaceTrackingEventPayload> {
        self.face.ingest_json(json)
    }

    /// Snapshot of the typing analysis so far
    pub fn typing_analysis(&self) -> TypingAnalysis {
        self.typing.analyze()
    }

    pub fn face_summary(&self) -> &FaceTrackingSummary {
        self.face.summary()
    }

    pub fn face(&self) -> &FaceAnalyzer {
        &self.face
    }

    /// Flush everything buffered and produce the final report
    pub fn finish(mut self) -> SessionReport {
        let typing = self.typing.finalize();
        let closed_at = [typing.analyzed_at, self.face.summary().last_frame_at]
            .into_iter()
            .flatten()
            .max();

        SessionReport {
            session_id: self.session_id,
            producer: PRODUCER_NAME.to_string(),
            engine_version: ENGINE_VERSION.to_string(),
            typing,
            face: self.face.summary().clone(),
            closed_at,
        }
    }
}
