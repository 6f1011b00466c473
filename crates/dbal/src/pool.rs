//! Request-scoped routing over one write endpoint and weighted read replicas.
//!
//! Handles are opened lazily and cached for the pool's lifetime: one write
//! handle, and one read handle per distinct read endpoint. Every read picks a
//! replica independently (weight / Σweights), so two selects in the same
//! request may land on different replicas.
//!
//! # Example
//!
//! ```ignore
//! use dbal::{ConnectionPool, Endpoint, PoolOptions, Role};
//!
//! let pool = ConnectionPool::configure(
//!     connector,
//!     vec![
//!         Endpoint::new("10.0.0.1", "app", "shop").role(Role::Write),
//!         Endpoint::new("10.0.0.2", "app", "shop").weight(1),
//!         Endpoint::new("10.0.0.3", "app", "shop").weight(2),
//!     ],
//!     PoolOptions::default(),
//! )?;
//! let rows = pool.query(&stmt).await?;
//! ```

use crate::config::{Endpoint, EndpointId, PoolOptions, Role};
use crate::connection::{Connection, Connector, ExecOutcome};
use crate::error::{DbError, DbResult};
use crate::executor::Executor;
use crate::monitor::SqlLogger;
use crate::row::Row;
use crate::statement::BoundStatement;
use parking_lot::Mutex;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot<Conn> = Arc<AsyncMutex<Option<Conn>>>;

/// Weighted random choice of an index.
///
/// Index `i` is picked with probability `weights[i] / Σweights`.
pub struct WeightedSelector {
    weights: Vec<u32>,
    index: Option<WeightedIndex<u32>>,
    rng: Mutex<StdRng>,
}

impl WeightedSelector {
    pub fn new(weights: Vec<u32>) -> DbResult<Self> {
        Self::with_rng(weights, StdRng::from_entropy())
    }

    /// Deterministic selector for tests and simulations.
    pub fn with_seed(weights: Vec<u32>, seed: u64) -> DbResult<Self> {
        Self::with_rng(weights, StdRng::seed_from_u64(seed))
    }

    fn with_rng(weights: Vec<u32>, rng: StdRng) -> DbResult<Self> {
        if weights.contains(&0) {
            return Err(DbError::configuration("selection weights must be positive"));
        }
        let index = if weights.is_empty() {
            None
        } else {
            Some(
                WeightedIndex::new(&weights)
                    .map_err(|e| DbError::configuration(format!("invalid weights: {e}")))?,
            )
        };
        Ok(Self {
            weights,
            index,
            rng: Mutex::new(rng),
        })
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Pick an index; `None` when there are no candidates.
    pub fn pick(&self) -> Option<usize> {
        let index = self.index.as_ref()?;
        Some(index.sample(&mut *self.rng.lock()))
    }

    /// Pick among the candidates not listed in `excluded`.
    pub fn pick_excluding(&self, excluded: &[usize]) -> Option<usize> {
        if excluded.is_empty() {
            return self.pick();
        }
        let weights = self
            .weights
            .iter()
            .enumerate()
            .map(|(i, &w)| if excluded.contains(&i) { 0 } else { w });
        let index = WeightedIndex::new(weights).ok()?;
        Some(index.sample(&mut *self.rng.lock()))
    }
}

impl fmt::Debug for WeightedSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightedSelector")
            .field("weights", &self.weights)
            .finish()
    }
}

/// Exclusive use of one cached connection.
///
/// Holding a handle locks its slot; dropping it returns the connection to
/// the pool's cache.
pub struct Handle<Conn> {
    guard: OwnedMutexGuard<Option<Conn>>,
    endpoint: String,
    role: Role,
    logger: SqlLogger,
}

impl<Conn: Connection> Handle<Conn> {
    /// `user@host:port/database` of the endpoint behind this handle.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns `true` while the cached connection is present.
    pub fn is_connected(&self) -> bool {
        self.guard.is_some()
    }

    /// Drop the cached connection; the next acquire reconnects.
    pub fn reset(&mut self) {
        if self.guard.take().is_some() {
            tracing::debug!(target: "dbal.pool", endpoint = %self.endpoint, "connection discarded");
        }
    }

    fn conn(&mut self) -> DbResult<&mut Conn> {
        self.guard
            .as_mut()
            .ok_or_else(|| DbError::connection(format!("{} is disconnected", self.endpoint)))
    }

    /// A connection-class failure drops the cached connection.
    fn settle<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        if let Err(err) = &result {
            if err.is_connection() {
                tracing::warn!(
                    target: "dbal.pool",
                    endpoint = %self.endpoint,
                    error = %err,
                    "connection lost, reconnecting on next use"
                );
                self.reset();
            }
        }
        result
    }

    pub async fn fetch_all(&mut self, stmt: &BoundStatement) -> DbResult<Vec<Row>> {
        let start = Instant::now();
        let result = self.conn()?.fetch_all(stmt).await;
        self.logger
            .record(stmt, self.role, &self.endpoint, start.elapsed(), &result);
        self.settle(result)
    }

    pub async fn execute(&mut self, stmt: &BoundStatement) -> DbResult<ExecOutcome> {
        let start = Instant::now();
        let result = self.conn()?.execute(stmt).await;
        self.logger
            .record(stmt, self.role, &self.endpoint, start.elapsed(), &result);
        self.settle(result)
    }

    pub async fn begin(&mut self) -> DbResult<()> {
        let result = self.conn()?.begin().await;
        self.settle(result)
    }

    pub async fn commit(&mut self) -> DbResult<()> {
        let result = self.conn()?.commit().await;
        self.settle(result)
    }

    pub async fn rollback(&mut self) -> DbResult<()> {
        let result = self.conn()?.rollback().await;
        self.settle(result)
    }
}

impl<Conn> fmt::Debug for Handle<Conn> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("endpoint", &self.endpoint)
            .field("role", &self.role)
            .field("connected", &self.guard.is_some())
            .finish()
    }
}

struct ReadTarget {
    endpoint: Endpoint,
    slot: usize,
}

/// One write endpoint, weighted read endpoints, lazily opened handles.
pub struct ConnectionPool<C: Connector> {
    connector: Arc<C>,
    write: Endpoint,
    write_slot: Slot<C::Conn>,
    reads: Vec<ReadTarget>,
    read_slots: Vec<Slot<C::Conn>>,
    selector: WeightedSelector,
    options: PoolOptions,
    logger: SqlLogger,
}

impl<C: Connector> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("write", &self.write.label())
            .field(
                "reads",
                &self
                    .reads
                    .iter()
                    .map(|r| (r.endpoint.label(), r.endpoint.weight))
                    .collect::<Vec<_>>(),
            )
            .field("options", &self.options)
            .finish()
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Partition `endpoints` by role. The first write endpoint becomes the
    /// primary; nothing is connected yet.
    pub fn configure(
        connector: Arc<C>,
        endpoints: Vec<Endpoint>,
        options: PoolOptions,
    ) -> DbResult<Self> {
        if let Some(e) = endpoints.iter().find(|e| e.weight == 0) {
            return Err(DbError::configuration(format!(
                "endpoint {} has zero weight",
                e.label()
            )));
        }

        let (writes, reads): (Vec<Endpoint>, Vec<Endpoint>) =
            endpoints.into_iter().partition(|e| e.role == Role::Write);
        let mut writes = writes.into_iter();
        let write = writes
            .next()
            .ok_or_else(|| DbError::configuration("no write endpoint configured"))?;
        let ignored = writes.count();
        if ignored > 0 {
            tracing::debug!(
                target: "dbal.pool",
                primary = %write.label(),
                ignored,
                "additional write endpoints are not used"
            );
        }

        let mut slot_of: HashMap<EndpointId, usize> = HashMap::new();
        let mut read_slots = Vec::new();
        let reads: Vec<ReadTarget> = reads
            .into_iter()
            .map(|endpoint| {
                let slot = *slot_of.entry(endpoint.id()).or_insert_with(|| {
                    read_slots.push(Arc::new(AsyncMutex::new(None)));
                    read_slots.len() - 1
                });
                ReadTarget { endpoint, slot }
            })
            .collect();

        let selector = WeightedSelector::new(reads.iter().map(|r| r.endpoint.weight).collect())?;
        let logger = SqlLogger::from_options(&options);

        Ok(Self {
            connector,
            write,
            write_slot: Arc::new(AsyncMutex::new(None)),
            reads,
            read_slots,
            selector,
            options,
            logger,
        })
    }

    /// Replace the read selector's randomness with a seeded generator.
    pub fn with_seed(mut self, seed: u64) -> DbResult<Self> {
        let weights = self.reads.iter().map(|r| r.endpoint.weight).collect();
        self.selector = WeightedSelector::with_seed(weights, seed)?;
        Ok(self)
    }

    pub fn write_endpoint(&self) -> &Endpoint {
        &self.write
    }

    pub fn read_endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.reads.iter().map(|r| &r.endpoint)
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    pub fn connector(&self) -> &Arc<C> {
        &self.connector
    }

    fn handle(&self, guard: OwnedMutexGuard<Option<C::Conn>>, endpoint: &Endpoint) -> Handle<C::Conn> {
        Handle {
            guard,
            endpoint: endpoint.label(),
            role: endpoint.role,
            logger: self.logger.clone(),
        }
    }

    /// The cached write handle, connecting on first use.
    ///
    /// An unreachable primary is fatal: there is no write failover.
    pub async fn acquire_write(&self) -> DbResult<Handle<C::Conn>> {
        let guard = self.write_slot.clone().lock_owned().await;
        let mut handle = self.handle(guard, &self.write);
        self.reconnect_write(&mut handle).await?;
        Ok(handle)
    }

    /// Reopen the write connection behind `handle` if it was reset.
    pub(crate) async fn reconnect_write(&self, handle: &mut Handle<C::Conn>) -> DbResult<()> {
        if handle.guard.is_none() {
            tracing::debug!(target: "dbal.pool", endpoint = %handle.endpoint, "connecting write endpoint");
            *handle.guard = Some(self.connector.connect(&self.write).await?);
        }
        Ok(())
    }

    /// A read handle chosen by weight, connecting on first use.
    ///
    /// With `read_failover`, an endpoint that fails to connect is excluded
    /// and another candidate drawn; the last connect error is returned once
    /// every candidate failed. Without read endpoints, reads use the write
    /// handle, or a separate uncached primary connection while the write
    /// handle is held (for instance by a running transaction).
    pub async fn acquire_read(&self) -> DbResult<Handle<C::Conn>> {
        if self.reads.is_empty() {
            return self.acquire_primary_for_read().await;
        }

        let mut excluded: Vec<usize> = Vec::new();
        let mut last_error = None;
        while let Some(idx) = self.selector.pick_excluding(&excluded) {
            let target = &self.reads[idx];
            let mut guard = self.read_slots[target.slot].clone().lock_owned().await;
            if guard.is_none() {
                tracing::debug!(target: "dbal.pool", endpoint = %target.endpoint.label(), "connecting read endpoint");
                match self.connector.connect(&target.endpoint).await {
                    Ok(conn) => *guard = Some(conn),
                    Err(err) if self.options.read_failover => {
                        tracing::warn!(
                            target: "dbal.pool",
                            endpoint = %target.endpoint.label(),
                            error = %err,
                            "read endpoint unreachable, trying another replica"
                        );
                        excluded.extend(
                            self.reads
                                .iter()
                                .enumerate()
                                .filter(|(_, r)| r.slot == target.slot)
                                .map(|(i, _)| i),
                        );
                        last_error = Some(err);
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }
            return Ok(self.handle(guard, &target.endpoint));
        }

        Err(last_error.unwrap_or_else(|| DbError::connection("no read endpoint available")))
    }

    async fn acquire_primary_for_read(&self) -> DbResult<Handle<C::Conn>> {
        match self.write_slot.clone().try_lock_owned() {
            Ok(guard) => {
                tracing::trace!(target: "dbal.pool", "no read endpoints, reading from primary");
                let mut handle = self.handle(guard, &self.write);
                self.reconnect_write(&mut handle).await?;
                Ok(handle)
            }
            Err(_) => {
                tracing::debug!(
                    target: "dbal.pool",
                    endpoint = %self.write.label(),
                    "write handle busy, reading over a separate connection"
                );
                let conn = self.connector.connect(&self.write).await?;
                let slot: Slot<C::Conn> = Arc::new(AsyncMutex::new(Some(conn)));
                Ok(self.handle(slot.lock_owned().await, &self.write))
            }
        }
    }

    /// Run a select on a freshly chosen read handle.
    pub async fn query(&self, stmt: &BoundStatement) -> DbResult<Vec<Row>> {
        self.acquire_read().await?.fetch_all(stmt).await
    }

    /// Run a statement with side effects on the write handle.
    pub async fn execute(&self, stmt: &BoundStatement) -> DbResult<ExecOutcome> {
        self.acquire_write().await?.execute(stmt).await
    }
}

impl<C: Connector> Executor for ConnectionPool<C> {
    async fn fetch(&self, stmt: &BoundStatement) -> DbResult<Vec<Row>> {
        self.acquire_read().await?.fetch_all(stmt).await
    }

    async fn execute(&self, stmt: &BoundStatement) -> DbResult<ExecOutcome> {
        self.acquire_write().await?.execute(stmt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_selection_follows_weights() {
        let selector = WeightedSelector::with_seed(vec![1, 2], 7).unwrap();
        let trials = 100_000;
        let mut counts = [0usize; 2];
        for _ in 0..trials {
            counts[selector.pick().unwrap()] += 1;
        }
        let share = counts[1] as f64 / trials as f64;
        // Expected 2/3; five standard deviations is about 0.0075.
        assert!((share - 2.0 / 3.0).abs() < 0.0075, "share was {share}");
    }

    #[test]
    fn excluded_candidates_are_never_picked() {
        let selector = WeightedSelector::with_seed(vec![5, 1, 5], 1).unwrap();
        for _ in 0..1000 {
            assert_eq!(selector.pick_excluding(&[0, 2]), Some(1));
        }
        assert_eq!(selector.pick_excluding(&[0, 1, 2]), None);
    }

    #[test]
    fn empty_and_zero_weights() {
        let empty = WeightedSelector::new(vec![]).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.pick(), None);
        assert!(WeightedSelector::new(vec![1, 0]).is_err());
    }
}
