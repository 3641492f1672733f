use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::service::{ReviewCode, ReviewOutcome, ServiceError};
use crate::stats::{CallDisposition, StatsRecorder};

/// The four benchmark counters. Incremented atomically by workers, read
/// without locking by the reporters. Their sum equals the number of calls
/// completed while measuring.
#[derive(Debug, Default)]
pub struct ReviewTotals {
    accepted: AtomicU64,
    rejected_invalid_book: AtomicU64,
    rejected_over_limit: AtomicU64,
    failed: AtomicU64,
}

impl ReviewTotals {
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected_invalid_book(&self) -> u64 {
        self.rejected_invalid_book.load(Ordering::Relaxed)
    }

    pub fn rejected_over_limit(&self) -> u64 {
        self.rejected_over_limit.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TotalsSnapshot {
        TotalsSnapshot {
            accepted: self.accepted(),
            rejected_invalid_book: self.rejected_invalid_book(),
            rejected_over_limit: self.rejected_over_limit(),
            failed: self.failed(),
        }
    }
}

/// Plain-value copy of [`ReviewTotals`] for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotalsSnapshot {
    pub accepted: u64,
    pub rejected_invalid_book: u64,
    pub rejected_over_limit: u64,
    pub failed: u64,
}

impl TotalsSnapshot {
    pub fn total(&self) -> u64 {
        self.accepted + self.rejected_invalid_book + self.rejected_over_limit + self.failed
    }
}

/// Routes each completed call to exactly one counter and feeds the shared
/// statistics recorder.
pub struct CallClassifier {
    totals: Arc<ReviewTotals>,
    recorder: Arc<StatsRecorder>,
}

impl CallClassifier {
    pub fn new(totals: Arc<ReviewTotals>, recorder: Arc<StatsRecorder>) -> Self {
        Self { totals, recorder }
    }

    pub fn apply(&self, result: &Result<ReviewOutcome, ServiceError>, roundtrip: Duration) {
        match result {
            Ok(outcome) => {
                let disposition = match outcome.code {
                    ReviewCode::Accepted => {
                        self.totals.accepted.fetch_add(1, Ordering::Relaxed);
                        CallDisposition::Accepted
                    }
                    ReviewCode::InvalidBook => {
                        self.totals
                            .rejected_invalid_book
                            .fetch_add(1, Ordering::Relaxed);
                        CallDisposition::Rejected
                    }
                    ReviewCode::OverLimit => {
                        self.totals
                            .rejected_over_limit
                            .fetch_add(1, Ordering::Relaxed);
                        CallDisposition::Rejected
                    }
                };
                self.recorder
                    .record_call(disposition, roundtrip, outcome.internal);
            }
            Err(_) => {
                self.totals.failed.fetch_add(1, Ordering::Relaxed);
                self.recorder
                    .record_call(CallDisposition::Failed, roundtrip, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> (Arc<ReviewTotals>, Arc<StatsRecorder>, CallClassifier) {
        let totals = Arc::new(ReviewTotals::default());
        let recorder = Arc::new(StatsRecorder::new().unwrap());
        let classifier = CallClassifier::new(totals.clone(), recorder.clone());
        (totals, recorder, classifier)
    }

    fn ok(code: ReviewCode) -> Result<ReviewOutcome, ServiceError> {
        Ok(ReviewOutcome {
            code,
            internal: None,
        })
    }

    #[test]
    fn test_each_outcome_increments_exactly_one_counter() {
        let (totals, recorder, classifier) = classifier();
        let rt = Duration::from_millis(1);

        classifier.apply(&ok(ReviewCode::Accepted), rt);
        classifier.apply(&ok(ReviewCode::InvalidBook), rt);
        classifier.apply(&ok(ReviewCode::OverLimit), rt);
        classifier.apply(&Err(ServiceError::Transport("boom".to_string())), rt);

        let snap = totals.snapshot();
        assert_eq!(snap.accepted, 1);
        assert_eq!(snap.rejected_invalid_book, 1);
        assert_eq!(snap.rejected_over_limit, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.total(), 4);
        assert_eq!(recorder.invocations(), 4);
    }

    #[test]
    fn test_counter_sum_matches_invocations() {
        let (totals, recorder, classifier) = classifier();
        let rt = Duration::from_millis(1);

        for i in 0..100u32 {
            let result = match i % 4 {
                0 => ok(ReviewCode::Accepted),
                1 => ok(ReviewCode::InvalidBook),
                2 => ok(ReviewCode::OverLimit),
                _ => Err(ServiceError::Protocol("garbled".to_string())),
            };
            classifier.apply(&result, rt);
        }

        assert_eq!(totals.snapshot().total(), 100);
        assert_eq!(recorder.invocations(), 100);
        assert_eq!(recorder.rejections(), 50);
        assert_eq!(recorder.failures(), 25);
    }
}
