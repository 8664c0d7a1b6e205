use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use heron::{TransactionAborted, TransactionExecutor, TxWork};
use parking_lot::Mutex;

/// Transaction executor that runs work inline, counts transactions, and can
/// be scripted to reject upcoming transactions before their work runs —
/// modeling storage being unavailable at transaction open.
///
/// Inline execution keeps tests deterministic; it does not catch panics, so
/// panic scenarios should use the engine's default spawned executor.
#[derive(Clone, Default)]
pub struct CountingTransactionExecutor {
    started: Arc<AtomicUsize>,
    committed: Arc<AtomicUsize>,
    reject_next: Arc<Mutex<u32>>,
}

impl CountingTransactionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` transactions without running their work.
    pub fn reject_next(&self, count: u32) {
        *self.reject_next.lock() = count;
    }

    /// Transactions opened so far, rejected ones included.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Transactions whose work ran and returned `Ok`.
    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionExecutor for CountingTransactionExecutor {
    async fn in_new_transaction(&self, work: TxWork) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);

        {
            let mut reject = self.reject_next.lock();
            if *reject > 0 {
                *reject -= 1;
                return Err(anyhow::Error::new(TransactionAborted {
                    reason: "storage unavailable".to_string(),
                }));
            }
        }

        let result = work.await;
        if result.is_ok() {
            self.committed.fetch_add(1, Ordering::SeqCst);
        }
        result
    }
}
