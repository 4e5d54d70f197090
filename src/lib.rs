//! Behavior Integrity - integrity monitoring for instrumented chat sessions
//!
//! The engine watches the camera and keyboard streams of a live chat session
//! and turns them into explainable signals:
//!
//! - **Keystroke dynamics**: batched keystroke timing → interval statistics,
//!   speed, corrections, bursts → risk score with named suspicious patterns
//! - **Face tracking**: per-frame face samples → hysteresis trackers →
//!   edge-triggered proctoring events
//!
//! A `SessionAnalyzer` owns all state of one session; the `SessionRegistry`
//! runs one analyzer per session on its own tokio task.

pub mod config;
pub mod error;
pub mod face;
pub mod keystroke;
pub mod registry;
pub mod session;

pub use config::{Dwell, DwellConfig, EngineConfig, FaceConfig, RiskConfig, TypingConfig};
pub use error::MonitorError;
pub use registry::{SessionEvent, SessionRegistry};
pub use session::{parse_batch, parse_frame, SessionAnalyzer, SessionReport};

// Keystroke exports
pub use keystroke::{analyze_batches, RiskLevel, TypingAnalysis, TypingAnalyzer};

// Face tracking exports
pub use face::{FaceAnalyzer, FaceEventType, FaceTrackingData, FaceTrackingEventPayload};

/// Engine version embedded in session reports
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for session reports
pub const PRODUCER_NAME: &str = "behavior-integrity";
