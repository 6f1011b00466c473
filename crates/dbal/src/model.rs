//! Table-bound entry point for building and running statements.

use crate::connection::ExecOutcome;
use crate::error::{DbError, DbResult};
use crate::executor::Executor;
use crate::ident::format_field;
use crate::qb::{Op, QueryBuilder, TokenSequence};
use crate::row::Row;
use crate::statement::{Bindings, BoundStatement};
use crate::value::Arg;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// One table/primary-key pair bound to an [`Executor`].
///
/// Cloning is cheap; clones share the executor, the token sequence and the
/// last-SQL slot.
pub struct Model<E> {
    table: Arc<str>,
    primary_key: Arc<str>,
    executor: Arc<E>,
    tokens: TokenSequence,
    last_sql: Arc<Mutex<String>>,
}

impl<E> Clone for Model<E> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            primary_key: Arc::clone(&self.primary_key),
            executor: Arc::clone(&self.executor),
            tokens: self.tokens.clone(),
            last_sql: Arc::clone(&self.last_sql),
        }
    }
}

impl<E> fmt::Debug for Model<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("last_sql", &*self.last_sql.lock())
            .finish()
    }
}

impl<E> Model<E> {
    /// Bind `table` (primary key `id`) to `executor`, drawing tokens from the
    /// process-wide sequence.
    pub fn new(executor: Arc<E>, table: &str) -> Self {
        Self {
            table: Arc::from(table),
            primary_key: Arc::from("id"),
            executor,
            tokens: TokenSequence::global(),
            last_sql: Arc::new(Mutex::new(String::new())),
        }
    }

    pub fn with_primary_key(mut self, primary_key: &str) -> Self {
        self.primary_key = Arc::from(primary_key);
        self
    }

    /// Draw placeholder tokens from a shared sequence.
    pub fn with_tokens(mut self, tokens: TokenSequence) -> Self {
        self.tokens = tokens;
        self
    }

    /// The same table, tokens and last-SQL slot on another executor.
    pub(crate) fn with_executor<X>(&self, executor: Arc<X>) -> Model<X> {
        Model {
            table: Arc::clone(&self.table),
            primary_key: Arc::clone(&self.primary_key),
            executor,
            tokens: self.tokens.clone(),
            last_sql: Arc::clone(&self.last_sql),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn executor(&self) -> &Arc<E> {
        &self.executor
    }

    pub fn tokens(&self) -> &TokenSequence {
        &self.tokens
    }

    /// The most recently *compiled* statement with literals substituted.
    ///
    /// Any terminal builder call overwrites it, including the `*_to_sql`
    /// variants, so it can differ from the last statement executed.
    pub fn last_sql(&self) -> String {
        self.last_sql.lock().clone()
    }

    pub(crate) fn remember_sql(&self, sql: String) {
        *self.last_sql.lock() = sql;
    }

    /// A fresh builder on this table.
    pub fn query(&self) -> QueryBuilder<E> {
        QueryBuilder::new(self.clone())
    }

    pub fn select<I, S>(&self, fields: I) -> QueryBuilder<E>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.query().select(fields)
    }

    pub fn where_eq(&self, field: &str, value: impl Into<Arg>) -> QueryBuilder<E> {
        self.query().where_eq(field, value)
    }

    pub fn where_op(&self, field: &str, op: Op, value: impl Into<Arg>) -> QueryBuilder<E> {
        self.query().where_op(field, op, value)
    }

    pub fn where_in<I, V>(&self, field: &str, values: I) -> QueryBuilder<E>
    where
        I: IntoIterator<Item = V>,
        V: Into<Arg>,
    {
        self.query().where_in(field, values)
    }

    pub fn data<I, K, V>(&self, pairs: I) -> QueryBuilder<E>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Arg>,
    {
        self.query().data(pairs)
    }
}

impl<E: Executor> Model<E> {
    /// Every row of the table.
    pub async fn all(&self) -> DbResult<Vec<Row>> {
        self.query().get_all().await
    }

    /// The row whose primary key equals `key`.
    pub async fn find(&self, key: impl Into<Arg>) -> DbResult<Option<Row>> {
        self.query()
            .where_eq(&self.primary_key, key)
            .get_row()
            .await
    }

    /// Like [`Model::find`], but a missing row is [`DbError::NotFound`].
    pub async fn find_or_fail(&self, key: impl Into<Arg>) -> DbResult<Row> {
        let key = key.into();
        let shown = match &key {
            Arg::Value(v) => v.to_literal(),
            Arg::Param(p) => p.clone(),
        };
        self.find(key).await?.ok_or_else(|| {
            DbError::not_found(format!("{} where {} = {shown}", self.table, self.primary_key))
        })
    }

    /// Insert one row; returns the generated key (0 when none).
    pub async fn create<I, K, V>(&self, pairs: I) -> DbResult<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Arg>,
    {
        self.query().data(pairs).insert().await
    }

    /// Update the row whose primary key equals `key`; returns affected rows.
    pub async fn save<I, K, V>(&self, key: impl Into<Arg>, pairs: I) -> DbResult<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Arg>,
    {
        self.query()
            .data(pairs)
            .where_eq(&self.primary_key, key)
            .update()
            .await
    }

    /// Delete the row whose primary key equals `key`; returns affected rows.
    pub async fn destroy(&self, key: impl Into<Arg>) -> DbResult<u64> {
        self.query()
            .where_eq(&self.primary_key, key)
            .delete()
            .await
    }

    /// `field = field + step` on the row with primary key `key`.
    pub async fn increment(&self, key: impl Into<Arg>, field: &str, step: u64) -> DbResult<u64> {
        self.adjust(key, field, '+', step).await
    }

    /// `field = field - step` on the row with primary key `key`.
    pub async fn decrement(&self, key: impl Into<Arg>, field: &str, step: u64) -> DbResult<u64> {
        self.adjust(key, field, '-', step).await
    }

    async fn adjust(
        &self,
        key: impl Into<Arg>,
        field: &str,
        sign: char,
        step: u64,
    ) -> DbResult<u64> {
        let column = format_field(field)?;
        self.query()
            .data_raw(field, &format!("{column} {sign} {step}"))
            .where_eq(&self.primary_key, key)
            .update()
            .await
    }

    /// Run hand-written SQL and return its rows.
    pub async fn fetch_raw(&self, sql: &str, bindings: &Bindings) -> DbResult<Vec<Row>> {
        let stmt = BoundStatement::raw(sql, bindings)?;
        self.executor.fetch(&stmt).await
    }

    /// Run hand-written SQL with side effects.
    pub async fn execute_raw(&self, sql: &str, bindings: &Bindings) -> DbResult<ExecOutcome> {
        let stmt = BoundStatement::raw(sql, bindings)?;
        self.executor.execute(&stmt).await
    }
}
