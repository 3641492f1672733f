use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

use crate::classify::CallClassifier;
use crate::connect::SessionPool;
use crate::generator::ReviewSource;
use crate::phase::{PhaseFlag, RunPhase};

/// One execution unit of the benchmark. Loops generate -> submit ->
/// classify until the phase flag tells it to stop; a failing call never
/// terminates the worker, only the stop signal does.
pub struct Worker {
    source: Box<dyn ReviewSource>,
    sessions: Arc<SessionPool>,
    phase: Arc<PhaseFlag>,
    classifier: Arc<CallClassifier>,
    max_reviews: u32,
}

impl Worker {
    pub fn new(
        source: Box<dyn ReviewSource>,
        sessions: Arc<SessionPool>,
        phase: Arc<PhaseFlag>,
        classifier: Arc<CallClassifier>,
        max_reviews: u32,
    ) -> Self {
        Self {
            source,
            sessions,
            phase,
            classifier,
            max_reviews,
        }
    }

    pub async fn run(mut self) {
        // Warmup traffic brings the service to steady state; outcomes are
        // discarded and never touch the counters.
        while self.phase.current() == RunPhase::Warmup {
            let review = self.source.next_review();
            let session = self.sessions.next_session();
            let _ = session.submit_review(&review, self.max_reviews).await;
        }

        while self.phase.current() == RunPhase::Measuring {
            let review = self.source.next_review();
            let session = self.sessions.next_session();
            let started = Instant::now();
            let result = session.submit_review(&review, self.max_reviews).await;
            self.classifier.apply(&result, started.elapsed());
        }
    }
}

/// The running worker tasks. Joining blocks until every worker has
/// observed the stop signal and finished its in-flight call.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(workers: Vec<Worker>) -> Self {
        let handles = workers
            .into_iter()
            .map(|worker| tokio::spawn(worker.run()))
            .collect();
        Self { handles }
    }

    pub async fn join(self) -> anyhow::Result<()> {
        for handle in self.handles {
            handle.await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ReviewTotals;
    use crate::generator::Review;
    use crate::service::{MockBehavior, MockService, ReviewService};
    use crate::stats::StatsRecorder;
    use std::time::Duration;

    struct FixedSource {
        book_id: u32,
    }

    impl ReviewSource for FixedSource {
        fn next_review(&mut self) -> Review {
            Review {
                book_id: self.book_id,
                email: "A@B.C".to_string(),
                review: "FINE".to_string(),
            }
        }
    }

    fn harness(
        behavior: MockBehavior,
    ) -> (Arc<ReviewTotals>, Arc<PhaseFlag>, Worker) {
        let service = Arc::new(MockService::new(behavior, Duration::from_millis(1)));
        let pool = Arc::new(SessionPool::new(vec![
            service as Arc<dyn ReviewService>,
        ]));
        let totals = Arc::new(ReviewTotals::default());
        let recorder = Arc::new(StatsRecorder::new().unwrap());
        let classifier = Arc::new(CallClassifier::new(totals.clone(), recorder));
        let phase = Arc::new(PhaseFlag::new());
        let worker = Worker::new(
            Box::new(FixedSource { book_id: 1 }),
            pool,
            phase.clone(),
            classifier,
            25,
        );
        (totals, phase, worker)
    }

    #[tokio::test(start_paused = true)]
    async fn test_warmup_calls_are_not_counted() {
        let (totals, phase, worker) = harness(MockBehavior::AlwaysAccept);
        let handle = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(totals.snapshot().total(), 0);

        phase.advance(RunPhase::Stopped);
        handle.await.unwrap();
        assert_eq!(totals.snapshot().total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_measured_calls_are_classified() {
        let (totals, phase, worker) = harness(MockBehavior::AlwaysAccept);
        phase.advance(RunPhase::Measuring);
        let handle = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        phase.advance(RunPhase::Stopped);
        handle.await.unwrap();

        let snap = totals.snapshot();
        assert!(snap.accepted > 0);
        assert_eq!(snap.total(), snap.accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_kill_the_worker() {
        let (totals, phase, worker) = harness(MockBehavior::FailTransport);
        phase.advance(RunPhase::Measuring);
        let handle = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        phase.advance(RunPhase::Stopped);
        handle.await.unwrap();

        let snap = totals.snapshot();
        assert!(snap.failed > 1, "worker should keep looping after failures");
        assert_eq!(snap.total(), snap.failed);
    }
}
