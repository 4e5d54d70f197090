//! Typing risk scoring
//!
//! Evaluates a fixed set of named checks against the typing metrics. Each
//! triggered check contributes its configured points; the score is the sum,
//! capped at 100, and every contribution is kept so the score is explainable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::RiskConfig;
use crate::keystroke::metrics::TypingMetrics;
use crate::keystroke::types::{BurstMetrics, PatternCode, PatternSeverity, SuspiciousPattern};

/// Upper bound of the risk score
pub const MAX_RISK_SCORE: u32 = 100;

/// Highest score still classified as low risk
const LOW_RISK_MAX: u32 = 25;

/// Highest score still classified as medium risk
const MEDIUM_RISK_MAX: u32 = 50;

/// Coarse risk bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// The only mapping from score to level
    pub fn from_score(score: u32) -> Self {
        if score <= LOW_RISK_MAX {
            RiskLevel::Low
        } else if score <= MEDIUM_RISK_MAX {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

impl PatternCode {
    pub fn severity(self) -> PatternSeverity {
        match self {
            PatternCode::LowKeystrokeCount => PatternSeverity::Low,
            PatternCode::NoCorrections => PatternSeverity::Low,
            PatternCode::TooConsistentTiming => PatternSeverity::Medium,
            PatternCode::BurstsAfterPause => PatternSeverity::Medium,
            PatternCode::SuperhumanSpeed => PatternSeverity::High,
            PatternCode::VeryLowSpeed => PatternSeverity::Low,
        }
    }
}

/// Score, level and the findings behind them
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub score: u32,
    pub level: RiskLevel,
    pub patterns: Vec<SuspiciousPattern>,
}

/// What a check reports when it triggers
struct Finding {
    points: u32,
    description: String,
    data: serde_json::Value,
}

type Check = fn(&RiskConfig, &TypingMetrics, &BurstMetrics) -> Option<Finding>;

/// Checks in evaluation order
const CHECKS: &[(PatternCode, Check)] = &[
    (PatternCode::LowKeystrokeCount, check_low_keystroke_count),
    (PatternCode::NoCorrections, check_no_corrections),
    (PatternCode::TooConsistentTiming, check_too_consistent_timing),
    (PatternCode::BurstsAfterPause, check_bursts_after_pause),
    (PatternCode::SuperhumanSpeed, check_superhuman_speed),
    (PatternCode::VeryLowSpeed, check_very_low_speed),
];

/// Risk scorer
#[derive(Debug, Clone)]
pub struct RiskScorer {
    config: RiskConfig,
}

impl Default for RiskScorer {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

impl RiskScorer {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Run every check; an empty log triggers nothing
    pub fn evaluate(
        &self,
        metrics: &TypingMetrics,
        bursts: &BurstMetrics,
        detected_at: Option<DateTime<Utc>>,
    ) -> RiskAssessment {
        let patterns: Vec<SuspiciousPattern> = if metrics.total_keystrokes == 0 {
            Vec::new()
        } else {
            CHECKS
                .iter()
                .filter_map(|(code, check)| {
                    check(&self.config, metrics, bursts).map(|finding| SuspiciousPattern {
                        code: *code,
                        description: finding.description,
                        severity: code.severity(),
                        points: finding.points,
                        detected_at,
                        data: Some(finding.data),
                    })
                })
                .collect()
        };

        let score = total_score(&patterns);
        RiskAssessment {
            score,
            level: RiskLevel::from_score(score),
            patterns,
        }
    }
}

/// Sum of pattern contributions, capped at [`MAX_RISK_SCORE`]
pub fn total_score(patterns: &[SuspiciousPattern]) -> u32 {
    patterns
        .iter()
        .fold(0u32, |acc, p| acc.saturating_add(p.points))
        .min(MAX_RISK_SCORE)
}

fn check_low_keystroke_count(
    config: &RiskConfig,
    metrics: &TypingMetrics,
    _bursts: &BurstMetrics,
) -> Option<Finding> {
    let total = metrics.total_keystrokes;
    (total > 0 && total < config.min_keystrokes).then(|| Finding {
        points: config.low_keystroke_points,
        description: format!(
            "Only {} keystrokes recorded, fewer than the {} needed for reliable analysis",
            total, config.min_keystrokes
        ),
        data: json!({ "total_keystrokes": total, "minimum": config.min_keystrokes }),
    })
}

fn check_no_corrections(
    config: &RiskConfig,
    metrics: &TypingMetrics,
    _bursts: &BurstMetrics,
) -> Option<Finding> {
    let chars = metrics.total_characters;
    (metrics.corrections.total_corrections == 0 && chars >= config.no_corrections_min_chars).then(
        || Finding {
            points: config.no_corrections_points,
            description: format!("No corrections over {} typed characters", chars),
            data: json!({ "total_characters": chars }),
        },
    )
}

fn check_too_consistent_timing(
    config: &RiskConfig,
    metrics: &TypingMetrics,
    _bursts: &BurstMetrics,
) -> Option<Finding> {
    let iv = &metrics.intervals;
    (iv.count >= config.consistent_timing_min_intervals
        && iv.std_dev < config.consistent_timing_max_std_ms)
        .then(|| Finding {
            points: config.consistent_timing_points,
            description: format!(
                "Inter-key timing deviation of {:.1} ms is far below human variability",
                iv.std_dev
            ),
            data: json!({ "std_dev_ms": iv.std_dev, "mean_ms": iv.mean, "intervals": iv.count }),
        })
}

fn check_bursts_after_pause(
    config: &RiskConfig,
    _metrics: &TypingMetrics,
    bursts: &BurstMetrics,
) -> Option<Finding> {
    (bursts.bursts_after_long_pause > config.max_bursts_after_pause).then(|| Finding {
        points: config.bursts_after_pause_points,
        description: format!(
            "{} typing bursts started right after pauses longer than {} ms",
            bursts.bursts_after_long_pause, bursts.pause_threshold_ms
        ),
        data: json!({
            "bursts_after_long_pause": bursts.bursts_after_long_pause,
            "pause_threshold_ms": bursts.pause_threshold_ms,
        }),
    })
}

fn check_superhuman_speed(
    config: &RiskConfig,
    metrics: &TypingMetrics,
    _bursts: &BurstMetrics,
) -> Option<Finding> {
    let peak = metrics.speed.peak_wpm;
    (peak > config.superhuman_wpm).then(|| Finding {
        points: config.superhuman_points,
        description: format!(
            "Peak speed of {:.0} WPM exceeds the human ceiling of {:.0} WPM",
            peak, config.superhuman_wpm
        ),
        data: json!({ "peak_wpm": peak, "ceiling_wpm": config.superhuman_wpm }),
    })
}

fn check_very_low_speed(
    config: &RiskConfig,
    metrics: &TypingMetrics,
    _bursts: &BurstMetrics,
) -> Option<Finding> {
    let avg = metrics.speed.average_wpm;
    (metrics.total_characters >= config.very_low_speed_min_chars && avg < config.very_low_wpm)
        .then(|| Finding {
            points: config.very_low_speed_points,
            description: format!(
                "Average speed of {:.1} WPM is implausibly low for {} characters",
                avg, metrics.total_characters
            ),
            data: json!({ "average_wpm": avg, "total_characters": metrics.total_characters }),
        })
}
