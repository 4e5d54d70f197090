//! Burst detection
//!
//! Splits a keystroke log into bursts: maximal runs whose interior gaps are all
//! shorter than the burst interval. A burst whose preceding gap exceeded the
//! long-pause threshold is the pattern of someone reading elsewhere and then
//! typing out a prepared reply.

use crate::config::TypingConfig;
use crate::keystroke::metrics::inter_key_intervals;
use crate::keystroke::types::{BurstMetrics, Keystroke};

/// A detected run of rapid keystrokes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Burst {
    /// Index of the first keystroke of the burst in the log
    pub start_index: usize,
    pub size: usize,
    pub start_ms: i64,
    pub end_ms: i64,
    /// Gap before the first keystroke, absent for a burst opening the log
    pub preceding_gap_ms: Option<i64>,
    pub after_long_pause: bool,
}

/// Burst detector
#[derive(Debug, Clone, Copy)]
pub struct BurstDetector {
    long_pause_ms: i64,
    burst_interval_ms: i64,
    min_burst_keystrokes: usize,
}

impl BurstDetector {
    pub fn new(config: &TypingConfig) -> Self {
        Self {
            long_pause_ms: config.long_pause_ms,
            burst_interval_ms: config.burst_interval_ms,
            min_burst_keystrokes: config.min_burst_keystrokes.max(1),
        }
    }

    /// Segment the log into bursts
    pub fn detect(&self, keystrokes: &[Keystroke]) -> Vec<Burst> {
        let mut bursts = Vec::new();
        if keystrokes.is_empty() {
            return bursts;
        }

        let gaps = inter_key_intervals(keystrokes);
        let mut run_start = 0usize;
        let mut run_gap: Option<i64> = None;

        for (i, gap) in gaps.iter().enumerate() {
            let gap = *gap as i64;
            if gap < self.burst_interval_ms {
                continue;
            }
            // Keystroke i + 1 opens a new run
            self.close_run(keystrokes, run_start, i + 1, run_gap, &mut bursts);
            run_start = i + 1;
            run_gap = Some(gap);
        }
        self.close_run(keystrokes, run_start, keystrokes.len(), run_gap, &mut bursts);

        bursts
    }

    /// Summarize bursts and long pauses of the log
    pub fn analyze(&self, keystrokes: &[Keystroke]) -> BurstMetrics {
        let bursts = self.detect(keystrokes);
        let long_pause_count = inter_key_intervals(keystrokes)
            .iter()
            .filter(|&&gap| gap as i64 > self.long_pause_ms)
            .count() as u64;

        let burst_count = bursts.len() as u64;
        let total_size: usize = bursts.iter().map(|b| b.size).sum();
        let average_burst_size = if bursts.is_empty() {
            0.0
        } else {
            total_size as f64 / bursts.len() as f64
        };

        BurstMetrics {
            burst_count,
            average_burst_size,
            max_burst_size: bursts.iter().map(|b| b.size).max().unwrap_or(0) as u64,
            bursts_after_long_pause: bursts.iter().filter(|b| b.after_long_pause).count() as u64,
            long_pause_count,
            pause_threshold_ms: self.long_pause_ms,
        }
    }

    fn close_run(
        &self,
        keystrokes: &[Keystroke],
        start: usize,
        end: usize,
        preceding_gap_ms: Option<i64>,
        bursts: &mut Vec<Burst>,
    ) {
        let size = end - start;
        if size < self.min_burst_keystrokes {
            return;
        }
        bursts.push(Burst {
            start_index: start,
            size,
            start_ms: keystrokes[start].timestamp,
            end_ms: keystrokes[end - 1].timestamp,
            preceding_gap_ms,
            after_long_pause: preceding_gap_ms.is_some_and(|gap| gap > self.long_pause_ms),
        });
    }
}
