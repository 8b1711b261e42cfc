//! Out-of-band channel for fatal failures.
//!
//! Operations that hit an internal consistency violation return the error to
//! their caller and also publish it here, so a host can surface it even when
//! the caller swallows the result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::EncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultReport {
    pub sequence: u64,
    /// Entry point that failed, e.g. `"commit_solution_update"`.
    pub operation: &'static str,
    pub error: EncError,
}

pub type FaultReceiver = broadcast::Receiver<FaultReport>;

#[derive(Debug, Clone)]
pub struct FaultReporter {
    tx: broadcast::Sender<FaultReport>,
    next_sequence: Arc<AtomicU64>,
}

impl FaultReporter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            next_sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn subscribe(&self) -> FaultReceiver {
        self.tx.subscribe()
    }

    pub fn report(&self, operation: &'static str, error: &EncError) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            target: "nova.enc.fault",
            operation,
            sequence,
            error = %error,
            "edit-and-continue operation failed"
        );
        let _ = self.tx.send(FaultReport {
            sequence,
            operation,
            error: error.clone(),
        });
    }

    /// Reports `result` when it carries a fatal error; passes it through.
    pub fn observe<T>(&self, operation: &'static str, result: Result<T, EncError>) -> Result<T, EncError> {
        if let Err(err) = &result {
            if err.is_fatal() {
                self.report(operation, err);
            }
        }
        result
    }
}

impl Default for FaultReporter {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConsistencyError;

    #[test]
    fn only_fatal_errors_are_published() {
        let faults = FaultReporter::new(4);
        let mut rx = faults.subscribe();

        let _ = faults.observe::<()>("discard", Err(EncError::Cancelled));
        let _ = faults.observe::<()>("discard", Err(ConsistencyError::NoPendingUpdate.into()));

        let report = rx.try_recv().expect("fatal error published");
        assert_eq!(report.operation, "discard");
        assert_eq!(report.error, EncError::Consistency(ConsistencyError::NoPendingUpdate));
        assert!(rx.try_recv().is_err());
    }
}
