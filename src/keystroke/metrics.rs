//! Typing metrics derivation
//!
//! Computes interval statistics, speed and correction metrics from an ordered
//! keystroke log. Everything here is a pure function of the log and the
//! configured window width, so recomputation is bit-identical.

use std::collections::BTreeMap;

use crate::keystroke::types::{
    CorrectionMetrics, InterKeyIntervalStats, Keystroke, SpeedMetrics, SpeedWindow,
};

/// Characters per standard word
const CHARS_PER_WORD: f64 = 5.0;

const MS_PER_MINUTE: f64 = 60_000.0;

/// Running mean/variance accumulator (Welford)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance; zero for fewer than two samples
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        self.m2 / self.count as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

/// Metrics derived from a keystroke log, before burst detection and scoring
#[derive(Debug, Clone, PartialEq)]
pub struct TypingMetrics {
    pub total_keystrokes: u64,
    pub total_characters: u64,
    pub session_duration_ms: i64,
    pub intervals: InterKeyIntervalStats,
    pub speed: SpeedMetrics,
    pub corrections: CorrectionMetrics,
    pub speed_windows: Vec<SpeedWindow>,
}

/// Typing metrics calculator
pub struct TypingMetricsCalculator;

impl TypingMetricsCalculator {
    /// Compute metrics over `keystrokes`, bucketing speed into `window_ms` windows
    pub fn compute(keystrokes: &[Keystroke], window_ms: i64) -> TypingMetrics {
        let total_keystrokes = keystrokes.len() as u64;
        let total_characters = keystrokes.iter().filter(|k| k.is_printable()).count() as u64;
        let session_duration_ms = session_duration_ms(keystrokes);

        let intervals = compute_interval_stats(&inter_key_intervals(keystrokes));
        let speed_windows = compute_speed_windows(keystrokes, window_ms);
        let speed = compute_speed(total_characters, session_duration_ms, &speed_windows);
        let corrections = compute_corrections(keystrokes);

        TypingMetrics {
            total_keystrokes,
            total_characters,
            session_duration_ms,
            intervals,
            speed,
            corrections,
            speed_windows,
        }
    }
}

/// Deltas between consecutive keystrokes in milliseconds.
///
/// Masked keystrokes contribute timing like any other. Deltas that go
/// backwards across batch boundaries are clamped to zero.
pub fn inter_key_intervals(keystrokes: &[Keystroke]) -> Vec<f64> {
    keystrokes
        .windows(2)
        .map(|pair| pair[1].timestamp.saturating_sub(pair[0].timestamp).max(0) as f64)
        .collect()
}

fn session_duration_ms(keystrokes: &[Keystroke]) -> i64 {
    match (keystrokes.first(), keystrokes.last()) {
        (Some(first), Some(last)) => last.timestamp.saturating_sub(first.timestamp).max(0),
        _ => 0,
    }
}

fn compute_interval_stats(intervals: &[f64]) -> InterKeyIntervalStats {
    if intervals.is_empty() {
        return InterKeyIntervalStats::default();
    }

    let mut stats = RunningStats::default();
    for &interval in intervals {
        stats.push(interval);
    }

    InterKeyIntervalStats {
        count: stats.count(),
        min: stats.min(),
        max: stats.max(),
        mean: stats.mean(),
        median: median(intervals),
        std_dev: stats.std_dev(),
        variance: stats.variance(),
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Bucket keystrokes into fixed-width windows aligned to the first keystroke.
///
/// Only windows that contain keystrokes are returned. Rates are computed over
/// the full window width so a partially filled last window is not inflated.
fn compute_speed_windows(keystrokes: &[Keystroke], window_ms: i64) -> Vec<SpeedWindow> {
    let Some(first) = keystrokes.first() else {
        return Vec::new();
    };
    let window_ms = window_ms.max(1);
    let origin = first.timestamp;

    let mut buckets: BTreeMap<i64, (u64, u64)> = BTreeMap::new();
    for keystroke in keystrokes {
        let offset = keystroke.timestamp.saturating_sub(origin).max(0);
        let entry = buckets.entry(offset / window_ms).or_insert((0, 0));
        entry.0 += 1;
        if keystroke.is_printable() {
            entry.1 += 1;
        }
    }

    let window_minutes = window_ms as f64 / MS_PER_MINUTE;
    buckets
        .into_iter()
        .map(|(bucket, (keystrokes, characters))| {
            let start_ms = origin + bucket * window_ms;
            let cpm = characters as f64 / window_minutes;
            SpeedWindow {
                start_ms,
                end_ms: start_ms + window_ms,
                keystrokes,
                characters,
                wpm: cpm / CHARS_PER_WORD,
                cpm,
            }
        })
        .collect()
}

fn compute_speed(
    total_characters: u64,
    session_duration_ms: i64,
    windows: &[SpeedWindow],
) -> SpeedMetrics {
    let minutes = session_duration_ms as f64 / MS_PER_MINUTE;
    let (average_cpm, average_wpm) = if minutes > 0.0 {
        let cpm = total_characters as f64 / minutes;
        (cpm, cpm / CHARS_PER_WORD)
    } else {
        (0.0, 0.0)
    };

    let peak_cpm = windows.iter().map(|w| w.cpm).fold(0.0, f64::max);
    let peak_wpm = windows.iter().map(|w| w.wpm).fold(0.0, f64::max);

    SpeedMetrics {
        average_wpm,
        peak_wpm,
        average_cpm,
        peak_cpm,
    }
}

fn compute_corrections(keystrokes: &[Keystroke]) -> CorrectionMetrics {
    let backspace_count = keystrokes.iter().filter(|k| k.is_backspace()).count() as u64;
    let delete_count = keystrokes.iter().filter(|k| k.is_delete()).count() as u64;
    let total_corrections = backspace_count + delete_count;

    let correction_ratio = if keystrokes.is_empty() {
        0.0
    } else {
        (total_corrections as f64 / keystrokes.len() as f64).clamp(0.0, 1.0)
    };

    CorrectionMetrics {
        backspace_count,
        delete_count,
        total_corrections,
        correction_ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn evenly_spaced(count: usize, spacing_ms: i64) -> Vec<Keystroke> {
        (0..count)
            .map(|i| Keystroke::new("a", "KeyA", 1_000 + i as i64 * spacing_ms))
            .collect()
    }

    #[test]
    fn test_empty_log_is_all_zero() {
        let metrics = TypingMetricsCalculator::compute(&[], 5_000);
        assert_eq!(metrics.total_keystrokes, 0);
        assert_eq!(metrics.session_duration_ms, 0);
        assert_eq!(metrics.intervals, InterKeyIntervalStats::default());
        assert_eq!(metrics.speed, SpeedMetrics::default());
        assert_eq!(metrics.corrections.correction_ratio, 0.0);
        assert!(metrics.speed_windows.is_empty());
    }

    #[test]
    fn test_constant_intervals_closed_form() {
        let metrics = TypingMetricsCalculator::compute(&evenly_spaced(10, 100), 5_000);
        let iv = &metrics.intervals;
        assert_eq!(iv.count, 9);
        assert_eq!(iv.mean, 100.0);
        assert_eq!(iv.median, 100.0);
        assert_eq!(iv.min, 100.0);
        assert_eq!(iv.max, 100.0);
        assert_eq!(iv.std_dev, 0.0);
        assert_eq!(iv.variance, 0.0);
    }

    #[test]
    fn test_welford_matches_two_pass() {
        let values = [120.0, 80.0, 200.0, 95.0, 150.0, 60.0];
        let mut stats = RunningStats::default();
        for v in values {
            stats.push(v);
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;

        assert!((stats.mean() - mean).abs() < 1e-9);
        assert!((stats.variance() - variance).abs() < 1e-9);
        assert_eq!(stats.min(), 60.0);
        assert_eq!(stats.max(), 200.0);
    }

    #[test]
    fn test_median_even_count() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[5.0, 1.0, 3.0]), 3.0);
    }

    #[test]
    fn test_speed_over_one_minute() {
        // 301 keystrokes, 200 ms apart = 60 s; 301 chars -> 301 cpm
        let metrics = TypingMetricsCalculator::compute(&evenly_spaced(301, 200), 5_000);
        assert_eq!(metrics.session_duration_ms, 60_000);
        assert!((metrics.speed.average_cpm - 301.0).abs() < 1e-9);
        assert!((metrics.speed.average_wpm - 60.2).abs() < 1e-9);

        // Each full 5 s window holds 25 keystrokes -> 300 cpm / 60 wpm
        assert_eq!(metrics.speed_windows[0].keystrokes, 25);
        assert!((metrics.speed.peak_cpm - 300.0).abs() < 1e-9);
        assert!((metrics.speed.peak_wpm - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_peak_surfaces_short_burst() {
        let mut keystrokes = evenly_spaced(5, 1_000);
        let burst_start = keystrokes.last().unwrap().timestamp + 10_000;
        keystrokes.extend((0..50).map(|i| Keystroke::new("x", "KeyX", burst_start + i * 20)));

        let metrics = TypingMetricsCalculator::compute(&keystrokes, 5_000);
        assert!(metrics.speed.peak_wpm > metrics.speed.average_wpm * 2.0);
    }

    #[test]
    fn test_empty_windows_are_not_materialized() {
        let keystrokes = vec![
            Keystroke::new("a", "KeyA", 0),
            Keystroke::new("b", "KeyB", 3_600_000),
        ];
        let metrics = TypingMetricsCalculator::compute(&keystrokes, 5_000);
        assert_eq!(metrics.speed_windows.len(), 2);
        assert_eq!(metrics.speed_windows[1].start_ms, 3_600_000);
    }

    #[test]
    fn test_corrections() {
        let keystrokes = vec![
            Keystroke::new("a", "KeyA", 0),
            Keystroke::new("Backspace", "Backspace", 100),
            Keystroke::new("b", "KeyB", 200),
            Keystroke::new("Delete", "Delete", 300),
        ];
        let metrics = TypingMetricsCalculator::compute(&keystrokes, 5_000);
        assert_eq!(metrics.corrections.backspace_count, 1);
        assert_eq!(metrics.corrections.delete_count, 1);
        assert_eq!(metrics.corrections.total_corrections, 2);
        assert_eq!(metrics.corrections.correction_ratio, 0.5);
        assert_eq!(metrics.total_characters, 2);
    }

    #[test]
    fn test_backwards_delta_clamped() {
        let keystrokes = vec![
            Keystroke::new("a", "KeyA", 1_000),
            Keystroke::new("b", "KeyB", 900),
        ];
        assert_eq!(inter_key_intervals(&keystrokes), vec![0.0]);
    }
}
