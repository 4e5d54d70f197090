//! Keystroke analysis module
//!
//! Turns irregular batches of keystroke timing data into typing statistics and
//! an explainable risk score.
//!
//! Pipeline: Batches → Aggregator → Metrics + Bursts → Risk Scorer → TypingAnalysis

pub mod aggregator;
pub mod burst;
pub mod metrics;
pub mod pipeline;
pub mod risk;
pub mod types;

pub use pipeline::{analyze_batches, TypingAnalyzer};
pub use risk::{RiskLevel, RiskScorer};
pub use types::{
    BatchGap, BurstMetrics, CorrectionMetrics, FieldType, InterKeyIntervalStats, Keystroke,
    KeystrokeBatch, KeystrokeBatchResponse, Modifiers, PatternCode, PatternSeverity,
    SpeedMetrics, SpeedWindow, SuspiciousPattern, TypingAnalysis,
};
