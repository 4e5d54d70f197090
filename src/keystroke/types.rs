//! Keystroke data types
//!
//! This module defines the keystroke records received from the chat client and
//! the derived typing analysis produced by the typing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::keystroke::risk::RiskLevel;

/// Placeholder stored in place of the key value for password-field keystrokes
pub const REDACTED_KEY: &str = "\u{2022}";

/// Physical key codes that produce a character without being a letter or digit
const PRINTABLE_PUNCTUATION_CODES: &[&str] = &[
    "Space",
    "Minus",
    "Equal",
    "BracketLeft",
    "BracketRight",
    "Backslash",
    "Semicolon",
    "Quote",
    "Comma",
    "Period",
    "Slash",
    "Backquote",
    "IntlBackslash",
    "NumpadDecimal",
    "NumpadAdd",
    "NumpadSubtract",
    "NumpadMultiply",
    "NumpadDivide",
];

/// Modifier keys held while a key was pressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default, alias = "shiftKey")]
    pub shift: bool,
    #[serde(default, alias = "ctrlKey")]
    pub ctrl: bool,
    #[serde(default, alias = "altKey")]
    pub alt: bool,
    #[serde(default, alias = "metaKey")]
    pub meta: bool,
}

/// Kind of input field that received the keystroke
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Text,
    Textarea,
    Password,
    Email,
    Search,
    Other,
}

/// A single recorded keystroke
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keystroke {
    /// Logical key value (`"a"`, `"Backspace"`, ...). Redacted for password fields.
    pub key: String,
    /// Physical key code (`"KeyA"`, `"Backspace"`, ...)
    pub code: String,
    /// Key-down time in milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default)]
    pub modifiers: Modifiers,
    #[serde(default, alias = "fieldType")]
    pub field_type: FieldType,
    #[serde(default, alias = "isPassword")]
    pub is_password: bool,
}

impl Keystroke {
    /// Create a plain text-field keystroke
    pub fn new(key: impl Into<String>, code: impl Into<String>, timestamp: i64) -> Self {
        Self {
            key: key.into(),
            code: code.into(),
            timestamp,
            modifiers: Modifiers::default(),
            field_type: FieldType::Text,
            is_password: false,
        }
    }

    /// Whether the key value must not be retained
    pub fn is_masked(&self) -> bool {
        self.is_password || self.field_type == FieldType::Password
    }

    /// Drop the key value of masked keystrokes, keeping type, timing and code
    pub fn redacted(mut self) -> Self {
        if self.is_masked() {
            self.key = REDACTED_KEY.to_string();
        }
        self
    }

    pub fn is_backspace(&self) -> bool {
        self.code == "Backspace" || self.key == "Backspace"
    }

    pub fn is_delete(&self) -> bool {
        self.code == "Delete" || self.key == "Delete"
    }

    /// Whether the keystroke produced a visible character.
    ///
    /// Masked keystrokes are classified from the physical code only.
    pub fn is_printable(&self) -> bool {
        if self.modifiers.ctrl || self.modifiers.meta {
            return false;
        }
        if self.is_masked() {
            return is_printable_code(&self.code);
        }
        self.key.chars().count() == 1
    }
}

fn is_printable_code(code: &str) -> bool {
    if let Some(rest) = code.strip_prefix("Key") {
        return rest.len() == 1;
    }
    if let Some(rest) = code.strip_prefix("Digit") {
        return rest.len() == 1;
    }
    if let Some(rest) = code.strip_prefix("Numpad") {
        if rest.len() == 1 && rest.chars().all(|c| c.is_ascii_digit()) {
            return true;
        }
    }
    PRINTABLE_PUNCTUATION_CODES.contains(&code)
}

/// A batch of keystrokes as submitted by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeystrokeBatch {
    #[serde(alias = "sessionId")]
    pub session_id: String,
    /// Monotonically increasing per session, starting at the configured first index
    #[serde(alias = "batchIndex")]
    pub batch_index: u64,
    pub keystrokes: Vec<Keystroke>,
    #[serde(alias = "startTime")]
    pub start_time: i64,
    #[serde(alias = "endTime")]
    pub end_time: i64,
}

impl KeystrokeBatch {
    /// Whether keystroke timestamps never go backwards inside the batch
    pub fn is_monotonic(&self) -> bool {
        self.keystrokes
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    }
}

/// Acknowledgement returned for every submitted batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystrokeBatchResponse {
    pub success: bool,
    pub batch_index: u64,
    pub keystroke_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl KeystrokeBatchResponse {
    pub fn accepted(batch_index: u64, keystroke_count: usize) -> Self {
        Self {
            success: true,
            batch_index,
            keystroke_count,
            error: None,
        }
    }

    pub fn rejected(batch_index: u64, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            batch_index,
            keystroke_count: 0,
            error: Some(reason.into()),
        }
    }
}

/// Range of batch indices that never arrived and were skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchGap {
    pub first_missing: u64,
    pub last_missing: u64,
}

/// Statistics over consecutive keystroke deltas (milliseconds)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterKeyIntervalStats {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub variance: f64,
}

/// Whole-session and peak typing speed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeedMetrics {
    pub average_wpm: f64,
    pub peak_wpm: f64,
    pub average_cpm: f64,
    pub peak_cpm: f64,
}

/// Backspace/Delete usage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectionMetrics {
    pub backspace_count: u64,
    pub delete_count: u64,
    pub total_corrections: u64,
    /// Corrections divided by total keystrokes, in [0, 1]
    pub correction_ratio: f64,
}

/// Burst segmentation summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BurstMetrics {
    pub burst_count: u64,
    pub average_burst_size: f64,
    pub max_burst_size: u64,
    pub bursts_after_long_pause: u64,
    pub long_pause_count: u64,
    pub pause_threshold_ms: i64,
}

/// One fixed-width time bucket of typing activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedWindow {
    pub start_ms: i64,
    pub end_ms: i64,
    pub keystrokes: u64,
    pub characters: u64,
    pub wpm: f64,
    pub cpm: f64,
}

/// Severity of a typing pattern finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSeverity {
    Low,
    Medium,
    High,
}

/// Named typing checks evaluated by the risk scorer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternCode {
    LowKeystrokeCount,
    NoCorrections,
    TooConsistentTiming,
    BurstsAfterPause,
    SuperhumanSpeed,
    VeryLowSpeed,
}

/// A triggered check and its contribution to the risk score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousPattern {
    pub code: PatternCode,
    pub description: String,
    pub severity: PatternSeverity,
    pub points: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Full typing analysis for a session, recomputable from the keystroke log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingAnalysis {
    pub session_id: String,
    /// Time of the last analysed keystroke
    pub analyzed_at: Option<DateTime<Utc>>,
    pub total_keystrokes: u64,
    pub total_characters: u64,
    pub total_batches: u64,
    pub session_duration_ms: i64,
    pub inter_key_intervals: InterKeyIntervalStats,
    pub speed: SpeedMetrics,
    pub corrections: CorrectionMetrics,
    pub bursts: BurstMetrics,
    pub speed_windows: Vec<SpeedWindow>,
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub suspicious_patterns: Vec<SuspiciousPattern>,
    #[serde(default)]
    pub batch_gaps: Vec<BatchGap>,
    #[serde(default)]
    pub rejected_batches: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_deserializes_camel_case() {
        let json = r#"{
            "sessionId": "s-1",
            "batchIndex": 3,
            "startTime": 1000,
            "endTime": 1200,
            "keystrokes": [
                { "key": "h", "code": "KeyH", "timestamp": 1000 },
                { "key": "i", "code": "KeyI", "timestamp": 1100, "fieldType": "textarea" }
            ]
        }"#;

        let batch: KeystrokeBatch = serde_json::from_str(json).unwrap();
        assert_eq!(batch.session_id, "s-1");
        assert_eq!(batch.batch_index, 3);
        assert_eq!(batch.keystrokes.len(), 2);
        assert_eq!(batch.keystrokes[1].field_type, FieldType::Textarea);
        assert!(batch.is_monotonic());
    }

    #[test]
    fn test_password_keystroke_redaction() {
        let mut ks = Keystroke::new("s", "KeyS", 10);
        ks.field_type = FieldType::Password;
        let ks = ks.redacted();

        assert_eq!(ks.key, REDACTED_KEY);
        assert_eq!(ks.code, "KeyS");
        assert_eq!(ks.timestamp, 10);
        assert!(ks.is_printable());
    }

    #[test]
    fn test_printable_classification() {
        assert!(Keystroke::new("a", "KeyA", 0).is_printable());
        assert!(Keystroke::new(" ", "Space", 0).is_printable());
        assert!(!Keystroke::new("Shift", "ShiftLeft", 0).is_printable());
        assert!(!Keystroke::new("Backspace", "Backspace", 0).is_printable());

        let mut copy = Keystroke::new("c", "KeyC", 0);
        copy.modifiers.ctrl = true;
        assert!(!copy.is_printable());

        let mut masked = Keystroke::new(REDACTED_KEY, "Enter", 0);
        masked.is_password = true;
        assert!(!masked.is_printable());
    }

    #[test]
    fn test_non_monotonic_batch_detected() {
        let batch = KeystrokeBatch {
            session_id: "s".to_string(),
            batch_index: 0,
            keystrokes: vec![Keystroke::new("a", "KeyA", 200), Keystroke::new("b", "KeyB", 100)],
            start_time: 100,
            end_time: 200,
        };
        assert!(!batch.is_monotonic());
    }

    #[test]
    fn test_pattern_code_serialization() {
        let json = serde_json::to_string(&PatternCode::TooConsistentTiming).unwrap();
        assert_eq!(json, "\"TOO_CONSISTENT_TIMING\"");
    }
}
