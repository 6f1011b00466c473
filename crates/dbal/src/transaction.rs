//! Retryable transactions on the write handle.
//!
//! The runner holds the pool's write handle for the whole run. Each attempt
//! begins a transaction, hands the unit of work a [`Model`] whose every
//! statement (reads included) goes through that handle, and commits on
//! `Ok`. On `Err`, or when the commit fails, the attempt is rolled back and
//! the whole unit of work runs again from scratch, up to
//! [`RetryPolicy::max_retries`] more times.
//!
//! # Example
//!
//! ```ignore
//! let id = accounts
//!     .transaction(2, |accounts| async move {
//!         accounts
//!             .query()
//!             .data_raw("balance", "`balance` - 100")
//!             .where_eq("id", 1)
//!             .update()
//!             .await?;
//!         accounts.create([("owner", "bob"), ("balance", "100")]).await
//!     })
//!     .await?;
//! ```

use crate::connection::{Connection, Connector, ExecOutcome};
use crate::error::{DbError, DbResult};
use crate::executor::Executor;
use crate::model::Model;
use crate::pool::{ConnectionPool, Handle};
use crate::row::Row;
use crate::statement::BoundStatement;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Exponential delay between attempts: `base * 2^n`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// How often a failed unit of work is re-run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Delay between attempts; `None` retries immediately.
    pub backoff: Option<Backoff>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: None,
        }
    }

    /// Run once, never retry.
    pub fn no_retry() -> Self {
        Self::new(0)
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// The executor behind a transactional [`Model`].
///
/// Every statement runs on the write handle held by the runner. Once the
/// attempt finishes the transaction is inactive and further statements fail.
pub struct Transaction<Conn> {
    handle: Mutex<Option<Handle<Conn>>>,
}

impl<Conn: Connection> Transaction<Conn> {
    fn new(handle: Handle<Conn>) -> Self {
        Self {
            handle: Mutex::new(Some(handle)),
        }
    }

    async fn finish(&self) -> Option<Handle<Conn>> {
        self.handle.lock().await.take()
    }

    /// Returns `true` until the attempt that owns it commits or rolls back.
    pub async fn is_active(&self) -> bool {
        self.handle.lock().await.is_some()
    }
}

fn inactive() -> DbError {
    DbError::execution("transaction is no longer active")
}

impl<Conn: Connection> Executor for Transaction<Conn> {
    async fn fetch(&self, stmt: &BoundStatement) -> DbResult<Vec<Row>> {
        let mut guard = self.handle.lock().await;
        guard.as_mut().ok_or_else(inactive)?.fetch_all(stmt).await
    }

    async fn execute(&self, stmt: &BoundStatement) -> DbResult<ExecOutcome> {
        let mut guard = self.handle.lock().await;
        guard.as_mut().ok_or_else(inactive)?.execute(stmt).await
    }
}

/// Runs a unit of work inside begin/commit/rollback with retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionRunner {
    policy: RetryPolicy,
}

impl TransactionRunner {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `work` against `model`'s pool until it commits or attempts run out.
    ///
    /// Failing to reach the primary before the first attempt is returned as
    /// is. Exhausting every attempt returns [`DbError::TransactionAborted`]
    /// wrapping the last failure.
    pub async fn run<C, T, F, Fut>(
        &self,
        model: &Model<ConnectionPool<C>>,
        mut work: F,
    ) -> DbResult<T>
    where
        C: Connector,
        F: FnMut(Model<Transaction<C::Conn>>) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let pool = model.executor();
        let mut handle = pool.acquire_write().await?;
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let (returned, result) = attempt_once(pool, handle, model, &mut work).await?;
            handle = returned;

            let err = match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(target: "dbal.tx", attempt, "transaction committed after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if attempt >= max_attempts {
                tracing::error!(
                    target: "dbal.tx",
                    attempts = attempt,
                    error = %err,
                    "transaction aborted, retries exhausted"
                );
                return Err(DbError::TransactionAborted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.policy.backoff.map(|b| b.delay(attempt - 1));
            tracing::warn!(
                target: "dbal.tx",
                attempt,
                max_attempts,
                error = %err,
                delay = ?delay,
                "transaction attempt failed, retrying"
            );
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// One begin / work / commit-or-rollback cycle.
///
/// The outer `Err` means the handle itself was lost and the run cannot go on.
async fn attempt_once<C, T, F, Fut>(
    pool: &ConnectionPool<C>,
    mut handle: Handle<C::Conn>,
    model: &Model<ConnectionPool<C>>,
    work: &mut F,
) -> DbResult<(Handle<C::Conn>, DbResult<T>)>
where
    C: Connector,
    F: FnMut(Model<Transaction<C::Conn>>) -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    if let Err(err) = pool.reconnect_write(&mut handle).await {
        return Ok((handle, Err(err)));
    }
    if let Err(err) = handle.begin().await {
        return Ok((handle, Err(err)));
    }
    tracing::debug!(target: "dbal.tx", endpoint = %handle.endpoint(), "begin");

    let tx = Arc::new(Transaction::new(handle));
    let result = work(model.with_executor(Arc::clone(&tx))).await;
    let mut handle = tx
        .finish()
        .await
        .ok_or_else(|| DbError::connection("transaction handle was lost"))?;

    let err = match result {
        Ok(value) => match handle.commit().await {
            Ok(()) => {
                tracing::debug!(target: "dbal.tx", "commit");
                return Ok((handle, Ok(value)));
            }
            Err(err) => err,
        },
        Err(err) => err,
    };

    if !handle.is_connected() {
        tracing::debug!(target: "dbal.tx", error = %err, "connection lost, nothing to roll back");
        return Ok((handle, Err(err)));
    }
    match handle.rollback().await {
        Ok(()) => tracing::debug!(target: "dbal.tx", error = %err, "rollback"),
        Err(rollback_err) => {
            tracing::warn!(
                target: "dbal.tx",
                error = %err,
                rollback_error = %rollback_err,
                "rollback failed, discarding connection"
            );
            handle.reset();
        }
    }
    Ok((handle, Err(err)))
}

impl<C: Connector> Model<ConnectionPool<C>> {
    /// Run `work` in a transaction, retrying it up to `max_retries` more
    /// times on failure.
    pub async fn transaction<T, F, Fut>(&self, max_retries: u32, work: F) -> DbResult<T>
    where
        F: FnMut(Model<Transaction<C::Conn>>) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        self.transaction_with(RetryPolicy::new(max_retries), work)
            .await
    }

    /// Run `work` in a transaction under an explicit retry policy.
    pub async fn transaction_with<T, F, Fut>(&self, policy: RetryPolicy, work: F) -> DbResult<T>
    where
        F: FnMut(Model<Transaction<C::Conn>>) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        TransactionRunner::new(policy).run(self, work).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(50));
        assert_eq!(backoff.delay(0), Duration::from_millis(10));
        assert_eq!(backoff.delay(1), Duration::from_millis(20));
        assert_eq!(backoff.delay(2), Duration::from_millis(40));
        assert_eq!(backoff.delay(3), Duration::from_millis(50));
        assert_eq!(backoff.delay(40), Duration::from_millis(50));
    }

    #[test]
    fn policy_counts_the_first_attempt() {
        assert_eq!(RetryPolicy::new(2).max_attempts(), 3);
        assert_eq!(RetryPolicy::no_retry().max_attempts(), 1);
        assert_eq!(RetryPolicy::new(u32::MAX).max_attempts(), u32::MAX);
    }
}
