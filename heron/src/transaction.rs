use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use thiserror::Error;

/// One unit of work to run in a fresh transaction.
pub type TxWork = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// The transaction aborted outside the work's own error path: the work
/// panicked, or the executor's plumbing failed around it.
#[derive(Debug, Error)]
#[error("transaction aborted: {reason}")]
pub struct TransactionAborted {
    pub reason: String,
}

/// Contract with the surrounding transactional execution fabric.
///
/// Runs one unit of work in a new transaction, isolated from any transaction
/// the caller may hold, so the work's side effects commit or roll back
/// independently. The returned result covers the whole transaction: the work
/// itself and its close/flush.
#[async_trait]
pub trait TransactionExecutor: Send + Sync {
    async fn in_new_transaction(&self, work: TxWork) -> anyhow::Result<()>;
}

/// Default executor: each unit of work runs to completion on its own spawned
/// task. A panicking unit of work surfaces as [`TransactionAborted`] rather
/// than unwinding into the coordinator.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpawnedTransactionExecutor;

#[async_trait]
impl TransactionExecutor for SpawnedTransactionExecutor {
    async fn in_new_transaction(&self, work: TxWork) -> anyhow::Result<()> {
        match tokio::spawn(work).await {
            Ok(result) => result,
            Err(join_error) => {
                let reason = if join_error.is_panic() {
                    match join_error.into_panic().downcast::<String>() {
                        Ok(message) => format!("work panicked: {message}"),
                        Err(payload) => match payload.downcast::<&'static str>() {
                            Ok(message) => format!("work panicked: {message}"),
                            Err(_) => "work panicked".to_string(),
                        },
                    }
                } else {
                    "work was cancelled".to_string()
                };
                Err(anyhow::Error::new(TransactionAborted { reason }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ok_work_commits() {
        let executor = SpawnedTransactionExecutor;
        let result = executor.in_new_transaction(Box::pin(async { Ok(()) })).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_err_work_passes_through() {
        let executor = SpawnedTransactionExecutor;
        let result = executor
            .in_new_transaction(Box::pin(async { anyhow::bail!("handler fault") }))
            .await;
        let err = result.unwrap_err();
        assert!(err.downcast_ref::<TransactionAborted>().is_none());
        assert_eq!(err.to_string(), "handler fault");
    }

    #[tokio::test]
    async fn test_panicking_work_becomes_aborted() {
        let executor = SpawnedTransactionExecutor;
        let result = executor
            .in_new_transaction(Box::pin(async { panic!("kaboom") }))
            .await;
        let err = result.unwrap_err();
        let aborted = err
            .downcast_ref::<TransactionAborted>()
            .expect("panic should abort the transaction");
        assert!(aborted.reason.contains("kaboom"));
    }
}
