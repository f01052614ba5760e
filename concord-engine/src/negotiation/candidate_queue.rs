use crate::error::ConnectionError;
use concord_core::IceCandidate;
use std::collections::VecDeque;
use std::future::Future;

/// FIFO buffer of remote candidates that arrived before a remote description.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    pending: VecDeque<IceCandidate>,
}

/// Result of one [`CandidateQueue::drain`].
#[derive(Debug, Default)]
pub struct DrainReport {
    pub applied: usize,
    pub failed: Vec<(IceCandidate, ConnectionError)>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, candidate: IceCandidate) {
        self.pending.push_back(candidate);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Discard everything still queued. Returns how many candidates were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Apply every queued candidate in arrival order.
    ///
    /// A failing candidate is recorded in the report and the drain moves on.
    /// The queue is empty afterwards; draining an empty queue does nothing.
    pub async fn drain<F, Fut>(&mut self, mut apply: F) -> DrainReport
    where
        F: FnMut(IceCandidate) -> Fut,
        Fut: Future<Output = Result<(), ConnectionError>>,
    {
        let mut report = DrainReport::default();

        for candidate in std::mem::take(&mut self.pending) {
            match apply(candidate.clone()).await {
                Ok(()) => report.applied += 1,
                Err(e) => report.failed.push((candidate, e)),
            }
        }

        report
    }
}
