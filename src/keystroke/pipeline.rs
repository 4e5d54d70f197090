//! Typing pipeline orchestration
//!
//! Batches → Aggregator → Metrics + Bursts → Risk Scorer → TypingAnalysis.
//! Ingestion only extends the keystroke log; analysis is computed on demand.

use chrono::DateTime;

use crate::config::EngineConfig;
use crate::error::MonitorError;
use crate::keystroke::aggregator::KeystrokeAggregator;
use crate::keystroke::burst::BurstDetector;
use crate::keystroke::metrics::TypingMetricsCalculator;
use crate::keystroke::risk::RiskScorer;
use crate::keystroke::types::{KeystrokeBatch, KeystrokeBatchResponse, TypingAnalysis};

/// Analyse a complete set of batches in one shot (stateless).
///
/// Batches may be given in any order; whatever is still missing at the end is
/// recorded as a gap.
pub fn analyze_batches(
    session_id: &str,
    batches: Vec<KeystrokeBatch>,
    config: &EngineConfig,
) -> Result<TypingAnalysis, MonitorError> {
    let mut analyzer = TypingAnalyzer::new(session_id, config);
    for batch in batches {
        analyzer.ingest(batch)?;
    }
    Ok(analyzer.finalize())
}

/// Stateful typing analyzer for one session
#[derive(Debug, Clone)]
pub struct TypingAnalyzer {
    aggregator: KeystrokeAggregator,
    burst_detector: BurstDetector,
    scorer: RiskScorer,
    speed_window_ms: i64,
}

impl TypingAnalyzer {
    pub fn new(session_id: &str, config: &EngineConfig) -> Self {
        Self {
            aggregator: KeystrokeAggregator::new(session_id, &config.typing),
            burst_detector: BurstDetector::new(&config.typing),
            scorer: RiskScorer::new(config.risk.clone()),
            speed_window_ms: config.typing.speed_window_ms,
        }
    }

    /// Add a batch to the session's keystroke log
    pub fn ingest(&mut self, batch: KeystrokeBatch) -> Result<KeystrokeBatchResponse, MonitorError> {
        self.aggregator.ingest(batch)
    }

    /// Analyse the folded keystroke log. Pure and idempotent.
    pub fn analyze(&self) -> TypingAnalysis {
        let keystrokes = self.aggregator.keystrokes();

        let metrics = TypingMetricsCalculator::compute(keystrokes, self.speed_window_ms);
        let bursts = self.burst_detector.analyze(keystrokes);

        let analyzed_at = keystrokes
            .last()
            .and_then(|k| DateTime::from_timestamp_millis(k.timestamp));
        let assessment = self.scorer.evaluate(&metrics, &bursts, analyzed_at);

        TypingAnalysis {
            session_id: self.aggregator.session_id().to_string(),
            analyzed_at,
            total_keystrokes: metrics.total_keystrokes,
            total_characters: metrics.total_characters,
            total_batches: self.aggregator.batch_count(),
            session_duration_ms: metrics.session_duration_ms,
            inter_key_intervals: metrics.intervals,
            speed: metrics.speed,
            corrections: metrics.corrections,
            bursts,
            speed_windows: metrics.speed_windows,
            risk_score: assessment.score,
            risk_level: assessment.level,
            suspicious_patterns: assessment.patterns,
            batch_gaps: self.aggregator.gaps().to_vec(),
            rejected_batches: self.aggregator.rejected_batches(),
        }
    }

    /// Flush buffered batches (marking gaps) and analyse the final log
    pub fn finalize(&mut self) -> TypingAnalysis {
        self.aggregator.finalize();
        self.analyze()
    }

    pub fn keystroke_count(&self) -> usize {
        self.aggregator.keystrokes().len()
    }

    pub fn pending_batches(&self) -> usize {
        self.aggregator.pending_count()
    }
}
