//! Driver seam: how the pool opens and talks to a database handle.

use crate::config::Endpoint;
use crate::error::DbResult;
use crate::row::Row;
use crate::statement::BoundStatement;
use std::future::Future;

/// Result of a statement with side effects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    /// Generated key of an `insert`, when the driver reports one.
    pub last_insert_id: Option<u64>,
}

/// One open database handle.
pub trait Connection: Send + 'static {
    /// Run a statement and return all rows.
    fn fetch_all(
        &mut self,
        stmt: &BoundStatement,
    ) -> impl Future<Output = DbResult<Vec<Row>>> + Send;

    /// Run a statement with side effects.
    fn execute(
        &mut self,
        stmt: &BoundStatement,
    ) -> impl Future<Output = DbResult<ExecOutcome>> + Send;

    fn begin(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send;
}

/// Opens [`Connection`]s to configured endpoints.
///
/// Implemented by the `mysql` feature for `sqlx`, and by test doubles.
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    fn connect(&self, endpoint: &Endpoint) -> impl Future<Output = DbResult<Self::Conn>> + Send;
}
