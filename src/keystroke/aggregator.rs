//! Keystroke batch aggregation
//!
//! Batches can arrive out of order. They are buffered by batch index and folded
//! into the session's keystroke log only once every earlier index has been
//! folded. A gap that stays open too long is skipped and recorded instead of
//! blocking the log forever. The wait is counted from the end of the first
//! batch buffered behind the gap, so a single long batch never makes its
//! predecessor overdue on arrival.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::TypingConfig;
use crate::error::MonitorError;
use crate::keystroke::types::{BatchGap, Keystroke, KeystrokeBatch, KeystrokeBatchResponse};

/// Ordered, redacted keystroke log of one session
#[derive(Debug, Clone)]
pub struct KeystrokeAggregator {
    session_id: String,
    max_pending_batches: usize,
    max_gap_wait_ms: i64,
    next_index: u64,
    pending: BTreeMap<u64, KeystrokeBatch>,
    log: Vec<Keystroke>,
    folded_batches: u64,
    gaps: Vec<BatchGap>,
    rejected_batches: u64,
}

impl KeystrokeAggregator {
    pub fn new(session_id: impl Into<String>, config: &TypingConfig) -> Self {
        Self {
            session_id: session_id.into(),
            max_pending_batches: config.max_pending_batches.max(1),
            max_gap_wait_ms: config.max_gap_wait_ms,
            next_index: config.first_batch_index,
            pending: BTreeMap::new(),
            log: Vec::new(),
            folded_batches: 0,
            gaps: Vec::new(),
            rejected_batches: 0,
        }
    }

    /// Accept a batch for this session.
    ///
    /// Returns `Err` only when the batch belongs to another session. Duplicate,
    /// already-skipped and internally unordered batches are rejected in the
    /// response and leave the log untouched.
    pub fn ingest(&mut self, batch: KeystrokeBatch) -> Result<KeystrokeBatchResponse, MonitorError> {
        if batch.session_id != self.session_id {
            return Err(MonitorError::SessionMismatch {
                expected: self.session_id.clone(),
                actual: batch.session_id,
            });
        }

        let index = batch.batch_index;

        // The last index has no successor to advance the fold cursor to
        if index == u64::MAX {
            return Ok(self.reject(index, "batch index out of range"));
        }

        if index < self.next_index {
            let reason = if self.in_skipped_gap(index) {
                "batch arrived after its gap was skipped"
            } else {
                "duplicate batch index"
            };
            return Ok(self.reject(index, reason));
        }

        if self.pending.contains_key(&index) {
            return Ok(self.reject(index, "duplicate batch index"));
        }

        if !batch.is_monotonic() {
            return Ok(self.reject(index, "keystroke timestamps are not monotonic"));
        }

        let keystroke_count = batch.keystrokes.len();
        self.pending.insert(index, batch);
        self.fold_ready();
        self.skip_stale_gaps();

        Ok(KeystrokeBatchResponse::accepted(index, keystroke_count))
    }

    /// Fold everything still buffered, recording any gaps in front of it
    pub fn finalize(&mut self) {
        while let Some(&first_pending) = self.pending.keys().next() {
            self.skip_to(first_pending);
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Folded keystrokes in batch order
    pub fn keystrokes(&self) -> &[Keystroke] {
        &self.log
    }

    pub fn batch_count(&self) -> u64 {
        self.folded_batches
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn gaps(&self) -> &[BatchGap] {
        &self.gaps
    }

    pub fn rejected_batches(&self) -> u64 {
        self.rejected_batches
    }

    fn reject(&mut self, index: u64, reason: &str) -> KeystrokeBatchResponse {
        warn!(
            session_id = %self.session_id,
            batch_index = index,
            reason,
            "keystroke batch discarded"
        );
        self.rejected_batches += 1;
        KeystrokeBatchResponse::rejected(index, reason)
    }

    fn fold_ready(&mut self) {
        while let Some(batch) = self.pending.remove(&self.next_index) {
            self.fold(batch);
            self.next_index += 1;
        }
    }

    fn fold(&mut self, batch: KeystrokeBatch) {
        self.log
            .extend(batch.keystrokes.into_iter().map(Keystroke::redacted));
        self.folded_batches += 1;
    }

    fn skip_stale_gaps(&mut self) {
        while let Some((&first_pending, first_batch)) = self.pending.iter().next() {
            let opened_at = first_batch.end_time;
            let newest_end = self
                .pending
                .values()
                .map(|b| b.end_time)
                .max()
                .unwrap_or(opened_at);

            let overflowing = self.pending.len() >= self.max_pending_batches;
            let overdue = newest_end.saturating_sub(opened_at) > self.max_gap_wait_ms;
            if !(overflowing || overdue) {
                break;
            }
            self.skip_to(first_pending);
        }
    }

    fn skip_to(&mut self, first_pending: u64) {
        if first_pending > self.next_index {
            let gap = BatchGap {
                first_missing: self.next_index,
                last_missing: first_pending - 1,
            };
            debug!(
                session_id = %self.session_id,
                first_missing = gap.first_missing,
                last_missing = gap.last_missing,
                "skipping missing keystroke batches"
            );
            self.gaps.push(gap);
            self.next_index = first_pending;
        }
        self.fold_ready();
    }

    fn in_skipped_gap(&self, index: u64) -> bool {
        self.gaps
            .iter()
            .any(|g| index >= g.first_missing && index <= g.last_missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystroke::types::{FieldType, REDACTED_KEY};

    fn batch(index: u64, start: i64, count: usize) -> KeystrokeBatch {
        let keystrokes = (0..count)
            .map(|i| Keystroke::new("a", "KeyA", start + i as i64 * 100))
            .collect();
        KeystrokeBatch {
            session_id: "sess".to_string(),
            batch_index: index,
            keystrokes,
            start_time: start,
            end_time: start + count as i64 * 100,
        }
    }

    fn aggregator() -> KeystrokeAggregator {
        KeystrokeAggregator::new("sess", &TypingConfig::default())
    }

    #[test]
    fn test_in_order_batches_fold_immediately() {
        let mut agg = aggregator();
        let resp = agg.ingest(batch(0, 0, 3)).unwrap();
        assert!(resp.success);
        assert_eq!(resp.keystroke_count, 3);

        agg.ingest(batch(1, 300, 2)).unwrap();
        assert_eq!(agg.keystrokes().len(), 5);
        assert_eq!(agg.batch_count(), 2);
        assert_eq!(agg.pending_count(), 0);
    }

    #[test]
    fn test_out_of_order_batches_are_reordered() {
        let mut agg = aggregator();
        agg.ingest(batch(1, 1_000, 2)).unwrap();
        assert_eq!(agg.keystrokes().len(), 0);
        assert_eq!(agg.pending_count(), 1);

        agg.ingest(batch(0, 0, 2)).unwrap();
        let stamps: Vec<i64> = agg.keystrokes().iter().map(|k| k.timestamp).collect();
        assert_eq!(stamps, vec![0, 100, 1_000, 1_100]);
        assert!(agg.gaps().is_empty());
    }

    #[test]
    fn test_session_mismatch_is_an_error() {
        let mut agg = aggregator();
        let mut other = batch(0, 0, 1);
        other.session_id = "other".to_string();

        let result = agg.ingest(other);
        assert!(matches!(result, Err(MonitorError::SessionMismatch { .. })));
    }

    #[test]
    fn test_non_monotonic_batch_is_skipped() {
        let mut agg = aggregator();
        let mut bad = batch(0, 0, 3);
        bad.keystrokes[2].timestamp = 50;

        let resp = agg.ingest(bad).unwrap();
        assert!(!resp.success);
        assert_eq!(agg.keystrokes().len(), 0);
        assert_eq!(agg.rejected_batches(), 1);

        // The index is still open for a well-formed resubmission
        assert!(agg.ingest(batch(0, 0, 3)).unwrap().success);
        assert_eq!(agg.keystrokes().len(), 3);
    }

    #[test]
    fn test_duplicate_batch_is_rejected() {
        let mut agg = aggregator();
        agg.ingest(batch(0, 0, 2)).unwrap();
        let resp = agg.ingest(batch(0, 0, 2)).unwrap();
        assert!(!resp.success);
        assert_eq!(agg.keystrokes().len(), 2);

        agg.ingest(batch(2, 5_000, 1)).unwrap();
        assert!(!agg.ingest(batch(2, 5_000, 1)).unwrap().success);
    }

    #[test]
    fn test_stale_gap_is_skipped_and_recorded() {
        let mut agg = aggregator();
        agg.ingest(batch(0, 0, 2)).unwrap();
        agg.ingest(batch(2, 1_000, 2)).unwrap();
        assert_eq!(agg.pending_count(), 1);

        // Batch 3 ends more than max_gap_wait_ms after batch 2, the first one
        // buffered behind the gap
        agg.ingest(batch(3, 6_000, 2)).unwrap();
        assert_eq!(agg.pending_count(), 2);
        agg.ingest(batch(4, 6_300, 2)).unwrap();
        assert_eq!(agg.pending_count(), 0);
        assert_eq!(
            agg.gaps(),
            &[BatchGap {
                first_missing: 1,
                last_missing: 1
            }]
        );
        assert_eq!(agg.keystrokes().len(), 8);

        let late = agg.ingest(batch(1, 500, 2)).unwrap();
        assert!(!late.success);
        assert_eq!(
            late.error.as_deref(),
            Some("batch arrived after its gap was skipped")
        );
    }

    #[test]
    fn test_long_batches_swapped_in_transit_are_reordered() {
        let mut agg = aggregator();
        // Each batch spans more than max_gap_wait_ms on its own
        assert!(agg.ingest(batch(1, 6_100, 60)).unwrap().success);
        assert_eq!(agg.pending_count(), 1);
        assert!(agg.ingest(batch(0, 0, 60)).unwrap().success);
        assert_eq!(agg.keystrokes().len(), 120);
        assert!(agg.gaps().is_empty());

        // Same swap after something has been folded
        assert!(agg.ingest(batch(3, 18_300, 60)).unwrap().success);
        assert!(agg.ingest(batch(2, 12_200, 60)).unwrap().success);
        assert_eq!(agg.keystrokes().len(), 240);
        assert!(agg.gaps().is_empty());
        assert_eq!(agg.rejected_batches(), 0);
    }

    #[test]
    fn test_last_batch_index_is_rejected() {
        let mut agg = aggregator();
        let resp = agg.ingest(batch(u64::MAX, 0, 60)).unwrap();
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("batch index out of range"));
        assert_eq!(agg.pending_count(), 0);

        let mut near_end = KeystrokeAggregator::new(
            "sess",
            &TypingConfig {
                first_batch_index: u64::MAX - 1,
                ..TypingConfig::default()
            },
        );
        assert!(near_end.ingest(batch(u64::MAX - 1, 0, 2)).unwrap().success);
        assert_eq!(near_end.keystrokes().len(), 2);
    }

    #[test]
    fn test_pending_overflow_skips_gap() {
        let config = TypingConfig {
            max_pending_batches: 2,
            max_gap_wait_ms: i64::MAX,
            ..TypingConfig::default()
        };
        let mut agg = KeystrokeAggregator::new("sess", &config);
        agg.ingest(batch(1, 0, 1)).unwrap();
        assert_eq!(agg.pending_count(), 1);
        agg.ingest(batch(2, 100, 1)).unwrap();

        assert_eq!(agg.pending_count(), 0);
        assert_eq!(agg.gaps().len(), 1);
        assert_eq!(agg.gaps()[0].first_missing, 0);
        assert_eq!(agg.batch_count(), 2);
    }

    #[test]
    fn test_finalize_flushes_pending() {
        let mut agg = aggregator();
        agg.ingest(batch(0, 0, 1)).unwrap();
        agg.ingest(batch(3, 200, 1)).unwrap();
        agg.ingest(batch(5, 400, 1)).unwrap();
        assert_eq!(agg.pending_count(), 2);

        agg.finalize();
        assert_eq!(agg.pending_count(), 0);
        assert_eq!(agg.gaps().len(), 2);
        assert_eq!(agg.keystrokes().len(), 3);
    }

    #[test]
    fn test_password_keystrokes_are_redacted_on_fold() {
        let mut agg = aggregator();
        let mut b = batch(0, 0, 2);
        b.keystrokes[1].field_type = FieldType::Password;
        agg.ingest(b).unwrap();

        assert_eq!(agg.keystrokes()[0].key, "a");
        assert_eq!(agg.keystrokes()[1].key, REDACTED_KEY);
        assert_eq!(agg.keystrokes()[1].timestamp, 100);
    }
}
