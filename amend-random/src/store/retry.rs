//! Bounded retry of connection refusals.
//!
//! Only establishing work is retried: autocommit statements, `begin` and
//! reads. Statements inside an open transaction are not, since the server
//! has already lost the transaction when the connection goes away.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Statement, Store, StoreError, StoreErrorKind, TableSnapshot, Transaction};

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            backoff: Duration::from_millis(500),
        }
    }
}

/// A store that retries connection refusals of the wrapped store.
pub struct Retrying {
    inner: Arc<dyn Store>,
    policy: RetryPolicy,
}

impl Retrying {
    #[must_use]
    pub fn new(inner: Arc<dyn Store>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, StoreError>> + Send,
        T: Send,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e)
                    if e.kind() == StoreErrorKind::ConnectionRefused
                        && attempt < self.policy.max_attempts =>
                {
                    tracing::warn!(
                        attempt,
                        "{what}: {e}; retrying in {:?}",
                        self.policy.backoff
                    );
                    tokio::time::sleep(self.policy.backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl Store for Retrying {
    async fn execute(&self, statement: &Statement) -> Result<(), StoreError> {
        let inner = &self.inner;
        self.with_retry("execute", move || inner.execute(statement))
            .await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let inner = &self.inner;
        self.with_retry("begin", move || inner.begin()).await
    }

    async fn fetch_rows(&self, table: &str) -> Result<TableSnapshot, StoreError> {
        let inner = &self.inner;
        self.with_retry("fetch rows", move || inner.fetch_rows(table))
            .await
    }

    async fn check_table(&self, table: &str) -> Result<(), StoreError> {
        let inner = &self.inner;
        self.with_retry("check table", move || inner.check_table(table))
            .await
    }

    async fn has_marker(&self, table: &str, marker: i64) -> Result<bool, StoreError> {
        let inner = &self.inner;
        self.with_retry("read checkpoint", move || inner.has_marker(table, marker))
            .await
    }
}
