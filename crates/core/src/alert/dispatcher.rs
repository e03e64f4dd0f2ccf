//! Asynchronous hand-off from the ledger to the alert engine.
//!
//! The ledger submits jobs after commit and never waits on detection.
//! A single worker drains the queue in submission order, so frequency
//! dedup sees every alert it raised earlier.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::engine::FraudAlertEngine;
use crate::balance::{Balance, LedgerEntry, OperationKind};

/// Work for the alert worker.
#[derive(Debug, Clone)]
pub enum AlertJob {
    /// A mutation committed.
    EntryCommitted {
        /// The committed audit entry.
        entry: LedgerEntry,
        /// Row after the mutation.
        balance: Balance,
    },
    /// A mutation was rolled back because its post-image broke an invariant.
    InvariantBreach {
        /// The rejected post-image.
        balance: Balance,
        /// Operation that produced it.
        kind: OperationKind,
    },
}

/// Sending half, held by the ledger.
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    tx: mpsc::Sender<AlertJob>,
    dropped: Arc<AtomicU64>,
}

/// Receiving half; drives the engine until every dispatcher is dropped.
#[derive(Debug)]
pub struct AlertWorker {
    rx: mpsc::Receiver<AlertJob>,
}

impl AlertDispatcher {
    /// Creates a bounded queue of at least one slot.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, AlertWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            AlertWorker { rx },
        )
    }

    /// Creates a queue and spawns its worker on the current runtime.
    #[must_use]
    pub fn spawn(engine: Arc<FraudAlertEngine>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (dispatcher, worker) = Self::channel(capacity);
        (dispatcher, worker.spawn(engine))
    }

    /// Queues a job without waiting.
    ///
    /// A full or closed queue drops the job; the ledger operation has
    /// already committed and must not be held back by detection.
    pub fn submit(&self, job: AlertJob) {
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(job = job.label(), "Alert queue full, dropping job");
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(job = job.label(), "Alert worker stopped, dropping job");
            }
        }
    }

    /// Jobs dropped so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AlertJob {
    fn label(&self) -> &'static str {
        match self {
            Self::EntryCommitted { .. } => "entry_committed",
            Self::InvariantBreach { .. } => "invariant_breach",
        }
    }
}

impl AlertWorker {
    /// Spawns the worker loop.
    #[must_use]
    pub fn spawn(self, engine: Arc<FraudAlertEngine>) -> JoinHandle<()> {
        tokio::spawn(self.run(engine))
    }

    /// Processes jobs until every dispatcher is dropped.
    pub async fn run(mut self, engine: Arc<FraudAlertEngine>) {
        while let Some(job) = self.rx.recv().await {
            let result = match &job {
                AlertJob::EntryCommitted { entry, balance } => {
                    engine.on_entry_committed(entry, balance).await
                }
                AlertJob::InvariantBreach { balance, kind } => {
                    warn!(user_id = %balance.user_id, kind = %kind, "Recording invariant breach");
                    engine.on_invariant_breach(balance).await
                }
            };
            match result {
                Ok(raised) => debug!(job = job.label(), raised = raised.len(), "Alert job done"),
                Err(e) => error!(job = job.label(), error = %e, "Alert job failed"),
            }
        }
        debug!("Alert worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::{OperationRequest, OperatorInfo};
    use tally_shared::types::UserId;

    fn job() -> AlertJob {
        let user = UserId::new();
        let balance = Balance::zero(user);
        let request = OperationRequest::new(user, rust_decimal::Decimal::ONE);
        AlertJob::EntryCommitted {
            entry: LedgerEntry::record(
                OperationKind::Recharge,
                rust_decimal::Decimal::ONE,
                &balance,
                &balance,
                &request,
                OperatorInfo::default_for(OperationKind::Recharge, user),
            ),
            balance,
        }
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let (dispatcher, _worker) = AlertDispatcher::channel(1);
        dispatcher.submit(job());
        dispatcher.submit(job());
        dispatcher.submit(job());
        assert_eq!(dispatcher.dropped(), 2);
    }

    #[test]
    fn test_closed_queue_drops() {
        let (dispatcher, worker) = AlertDispatcher::channel(4);
        drop(worker);
        dispatcher.submit(job());
        assert_eq!(dispatcher.dropped(), 1);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let (dispatcher, _worker) = AlertDispatcher::channel(0);
        dispatcher.submit(job());
        assert_eq!(dispatcher.dropped(), 0);
    }
}
