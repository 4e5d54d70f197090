//! Session registry
//!
//! Every open session is owned by its own tokio task holding a
//! `SessionAnalyzer`. Callers never touch analyzer state directly: they send
//! commands over the session's bounded queue and wait for the reply, so all
//! ingestion for a session is applied one at a time in arrival order while
//! different sessions run in parallel.
//!
//! Face events are forwarded to a single outbound channel, tagged with the
//! session they came from.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::MonitorError;
use crate::face::{FaceTrackingData, FaceTrackingEventPayload, FaceTrackingSummary};
use crate::keystroke::{KeystrokeBatch, KeystrokeBatchResponse, TypingAnalysis};
use crate::session::{SessionAnalyzer, SessionReport};

/// Commands buffered per session before senders wait
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A face event tagged with its session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: String,
    pub event: FaceTrackingEventPayload,
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Batch(KeystrokeBatch, Reply<Result<KeystrokeBatchResponse, MonitorError>>),
    Frame(Box<FaceTrackingData>, Reply<usize>),
    RawFrame(String, Reply<usize>),
    TypingAnalysis(Reply<TypingAnalysis>),
    FaceSummary(Reply<FaceTrackingSummary>),
    Close(Reply<SessionReport>),
}

/// Routes requests to per-session workers
pub struct SessionRegistry {
    config: Arc<EngineConfig>,
    sessions: DashMap<String, mpsc::Sender<Command>>,
    events: UnboundedSender<SessionEvent>,
    queue_capacity: usize,
}

impl SessionRegistry {
    /// Create a registry and the receiving end of its event stream.
    ///
    /// The event channel is unbounded so a slow reader never stalls ingestion.
    /// Events queue in memory until read: a caller that keeps the receiver
    /// must drain it, or drop it to have events discarded at the send.
    pub fn new(config: EngineConfig) -> (Self, UnboundedReceiver<SessionEvent>) {
        Self::with_queue_capacity(config, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(
        config: EngineConfig,
        queue_capacity: usize,
    ) -> (Self, UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let registry = Self {
            config: Arc::new(config),
            sessions: DashMap::new(),
            events,
            queue_capacity: queue_capacity.max(1),
        };
        (registry, events_rx)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a worker for a new session
    pub async fn open_session(&self, session_id: &str) -> Result<(), MonitorError> {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(MonitorError::SessionExists(session_id.to_string())),
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::channel(self.queue_capacity);
                let analyzer = SessionAnalyzer::new(session_id, &self.config);
                tokio::spawn(run_session(analyzer, rx, self.events.clone()));
                slot.insert(tx);
                info!(session_id, "session opened");
                Ok(())
            }
        }
    }

    pub async fn ingest_batch(
        &self,
        session_id: &str,
        batch: KeystrokeBatch,
    ) -> Result<KeystrokeBatchResponse, MonitorError> {
        self.request(session_id, |reply| Command::Batch(batch, reply))
            .await?
    }

    /// Feed a frame; returns how many events it produced
    pub async fn ingest_frame(
        &self,
        session_id: &str,
        frame: FaceTrackingData,
    ) -> Result<usize, MonitorError> {
        self.request(session_id, |reply| Command::Frame(Box::new(frame), reply))
            .await
    }

    /// Feed an unparsed frame payload. One that does not parse is discarded
    /// and counted by the session, never reported as an error.
    pub async fn ingest_frame_json(
        &self,
        session_id: &str,
        json: String,
    ) -> Result<usize, MonitorError> {
        self.request(session_id, |reply| Command::RawFrame(json, reply))
            .await
    }

    pub async fn typing_analysis(&self, session_id: &str) -> Result<TypingAnalysis, MonitorError> {
        self.request(session_id, Command::TypingAnalysis).await
    }

    pub async fn face_summary(
        &self,
        session_id: &str,
    ) -> Result<FaceTrackingSummary, MonitorError> {
        self.request(session_id, Command::FaceSummary).await
    }

    /// Stop a session's worker and return its final report
    pub async fn close_session(&self, session_id: &str) -> Result<SessionReport, MonitorError> {
        let (_, sender) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| MonitorError::UnknownSession(session_id.to_string()))?;

        let (reply, response) = oneshot::channel();
        sender
            .send(Command::Close(reply))
            .await
            .map_err(|_| MonitorError::SessionClosed(session_id.to_string()))?;
        let report = response
            .await
            .map_err(|_| MonitorError::SessionClosed(session_id.to_string()))?;

        info!(
            session_id,
            risk_score = report.typing.risk_score,
            frames = report.face.frames_processed,
            "session closed"
        );
        Ok(report)
    }

    /// Ids of open sessions, sorted
    pub fn active_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    async fn request<T>(
        &self,
        session_id: &str,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, MonitorError> {
        // Clone the sender so no map guard is held across the await
        let sender = self
            .sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MonitorError::UnknownSession(session_id.to_string()))?;

        let (reply, response) = oneshot::channel();
        sender
            .send(command(reply))
            .await
            .map_err(|_| MonitorError::SessionClosed(session_id.to_string()))?;
        response
            .await
            .map_err(|_| MonitorError::SessionClosed(session_id.to_string()))
    }
}

async fn run_session(
    mut analyzer: SessionAnalyzer,
    mut commands: mpsc::Receiver<Command>,
    events: UnboundedSender<SessionEvent>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Batch(batch, reply) => {
                let _ = reply.send(analyzer.ingest_batch(batch));
            }
            Command::Frame(frame, reply) => {
                let emitted = analyzer.ingest_frame(&frame);
                let _ = reply.send(forward(analyzer.session_id(), emitted, &events));
            }
            Command::RawFrame(json, reply) => {
                let emitted = analyzer.ingest_frame_json(&json);
                let _ = reply.send(forward(analyzer.session_id(), emitted, &events));
            }
            Command::TypingAnalysis(reply) => {
                let _ = reply.send(analyzer.typing_analysis());
            }
            Command::FaceSummary(reply) => {
                let _ = reply.send(analyzer.face_summary().clone());
            }
            Command::Close(reply) => {
                let _ = reply.send(analyzer.finish());
                return;
            }
        }
    }
    // Registry dropped without closing; state is discarded
    debug!(session_id = analyzer.session_id(), "session worker stopped");
}

fn forward(
    session_id: &str,
    emitted: Vec<FaceTrackingEventPayload>,
    events: &UnboundedSender<SessionEvent>,
) -> usize {
    let count = emitted.len();
    for event in emitted {
        // Nobody listening is not an error for the session
        let _ = events.send(SessionEvent {
            session_id: session_id.to_string(),
            event,
        });
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::{EyeMetrics, ExpressionMetrics, FaceEventType, GazeDirection, HeadPose};
    use crate::keystroke::Keystroke;

    fn frame(timestamp: i64, face_count: i64) -> FaceTrackingData {
        FaceTrackingData {
            timestamp,
            face_detected: face_count > 0,
            face_count,
            eyes: EyeMetrics {
                left_eye_openness: 80.0,
                right_eye_openness: 80.0,
                is_blinking: false,
                gaze_direction: GazeDirection::Center,
                left_eye_squint: None,
                right_eye_squint: None,
            },
            expression: ExpressionMetrics {
                dominant: Default::default(),
                smile: 0.0,
                frown: 0.0,
                surprise: 0.0,
                brow_raise: 0.0,
                mouth_open: 0.0,
                brow_down: None,
                lip_movement: None,
            },
            head_pose: HeadPose::default(),
            attention: None,
        }
    }

    fn batch(session_id: &str, index: u64, start: i64) -> KeystrokeBatch {
        let keystrokes: Vec<Keystroke> = (0..4)
            .map(|i| Keystroke::new("k", "KeyK", start + i * 150))
            .collect();
        KeystrokeBatch {
            session_id: session_id.to_string(),
            batch_index: index,
            keystrokes,
            start_time: start,
            end_time: start + 450,
        }
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (registry, mut events) = SessionRegistry::new(EngineConfig::default());
        registry.open_session("chat-1").await.unwrap();
        assert_eq!(registry.active_sessions(), vec!["chat-1".to_string()]);

        let response = registry
            .ingest_batch("chat-1", batch("chat-1", 0, 1_000))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.keystroke_count, 4);

        let emitted = registry.ingest_frame("chat-1", frame(2_000, 2)).await.unwrap();
        assert_eq!(emitted, 1);
        let event = events.recv().await.unwrap();
        assert_eq!(event.session_id, "chat-1");
        assert_eq!(event.event.event_type, FaceEventType::MultipleFacesDetected);

        let analysis = registry.typing_analysis("chat-1").await.unwrap();
        assert_eq!(analysis.total_keystrokes, 4);
        let summary = registry.face_summary("chat-1").await.unwrap();
        assert_eq!(summary.frames_processed, 1);

        let report = registry.close_session("chat-1").await.unwrap();
        assert_eq!(report.session_id, "chat-1");
        assert_eq!(report.typing.total_keystrokes, 4);
        assert!(registry.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_closed_sessions_are_errors() {
        let (registry, _events) = SessionRegistry::new(EngineConfig::default());
        assert!(matches!(
            registry.typing_analysis("missing").await,
            Err(MonitorError::UnknownSession(_))
        ));

        registry.open_session("chat-2").await.unwrap();
        registry.close_session("chat-2").await.unwrap();
        assert!(matches!(
            registry.ingest_frame("chat-2", frame(0, 1)).await,
            Err(MonitorError::UnknownSession(_))
        ));
        assert!(matches!(
            registry.close_session("chat-2").await,
            Err(MonitorError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_frame_payload_is_counted_not_raised() {
        let (registry, mut events) = SessionRegistry::new(EngineConfig::default());
        registry.open_session("chat-6").await.unwrap();

        let emitted = registry
            .ingest_frame_json("chat-6", r#"{"timestamp": 0, "face_count": 2}"#.to_string())
            .await
            .unwrap();
        assert_eq!(emitted, 0);

        let valid = serde_json::to_string(&frame(33, 2)).unwrap();
        assert_eq!(registry.ingest_frame_json("chat-6", valid).await.unwrap(), 1);
        assert_eq!(
            events.recv().await.unwrap().event.event_type,
            FaceEventType::MultipleFacesDetected
        );

        let summary = registry.face_summary("chat-6").await.unwrap();
        assert_eq!(summary.frames_discarded, 1);
        assert_eq!(summary.frames_processed, 1);
    }

    #[tokio::test]
    async fn test_duplicate_open_is_rejected() {
        let (registry, _events) = SessionRegistry::new(EngineConfig::default());
        registry.open_session("chat-3").await.unwrap();
        assert!(matches!(
            registry.open_session("chat-3").await,
            Err(MonitorError::SessionExists(_))
        ));
    }

    #[tokio::test]
    async fn test_foreign_batch_reports_mismatch() {
        let (registry, _events) = SessionRegistry::new(EngineConfig::default());
        registry.open_session("chat-4").await.unwrap();
        let result = registry
            .ingest_batch("chat-4", batch("someone-else", 0, 0))
            .await;
        assert!(matches!(result, Err(MonitorError::SessionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_events_keep_arrival_order() {
        let (registry, mut events) = SessionRegistry::with_queue_capacity(EngineConfig::default(), 2);
        registry.open_session("chat-5").await.unwrap();

        // Alternate one and two faces; every frame flips the face-count tracker
        for i in 0..10 {
            let count = if i % 2 == 0 { 2 } else { 1 };
            registry
                .ingest_frame("chat-5", frame(i * 33, count))
                .await
                .unwrap();
        }

        let mut received = Vec::new();
        for _ in 0..10 {
            received.push(events.recv().await.unwrap().event.event_type);
        }
        for (i, event_type) in received.iter().enumerate() {
            let expected = if i % 2 == 0 {
                FaceEventType::MultipleFacesDetected
            } else {
                FaceEventType::SingleFaceRestored
            };
            assert_eq!(*event_type, expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sessions_are_independent() {
        let (registry, _events) = SessionRegistry::new(EngineConfig::default());
        let registry = Arc::new(registry);
        registry.open_session("a").await.unwrap();
        registry.open_session("b").await.unwrap();

        let mut handles = Vec::new();
        for (id, batches) in [("a", 3u64), ("b", 5u64)] {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                for index in 0..batches {
                    registry
                        .ingest_batch(id, batch(id, index, index as i64 * 1_000))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.typing_analysis("a").await.unwrap().total_keystrokes, 12);
        assert_eq!(registry.typing_analysis("b").await.unwrap().total_keystrokes, 20);
    }
}
