//! Where a [`Model`](crate::Model) sends its statements.

use crate::connection::ExecOutcome;
use crate::error::DbResult;
use crate::row::Row;
use crate::statement::BoundStatement;
use std::future::Future;

/// A statement target: the routing [`ConnectionPool`](crate::ConnectionPool)
/// or an open [`Transaction`](crate::Transaction).
///
/// Models are generic over this trait, so the same builder code runs inside
/// and outside a transaction.
pub trait Executor: Send + Sync {
    /// Run a read statement and return all rows.
    fn fetch(&self, stmt: &BoundStatement) -> impl Future<Output = DbResult<Vec<Row>>> + Send;

    /// Run a statement with side effects.
    fn execute(&self, stmt: &BoundStatement)
    -> impl Future<Output = DbResult<ExecOutcome>> + Send;
}
