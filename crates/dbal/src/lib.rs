//! # dbal
//!
//! A database access layer for MySQL-compatible servers.
//!
//! ## Features
//!
//! - **Read/write split**: one write primary, weighted read replicas chosen
//!   per statement
//! - **Fluent builder**: clauses in any call order, compiled in SQL grammar
//!   order; literals always travel as bound parameters
//! - **Diagnostic SQL**: `*_to_sql()` and [`Model::last_sql`] show the
//!   statement with literals substituted
//! - **Retryable transactions**: a unit of work re-run from scratch under an
//!   explicit [`RetryPolicy`]
//! - **Structured logging**: every statement is traced on target `dbal.sql`
//!
//! ## Example
//!
//! ```ignore
//! use dbal::{Database, DatabaseConfig, Op, mysql::MySqlConnector};
//!
//! let db = Database::new(DatabaseConfig::load("db.toml")?, MySqlConnector)?;
//! let session = db.session();
//! let orders = session.model("order")?;
//!
//! let rows = orders
//!     .select(["user_id", "sum(order.amount) as total"])
//!     .where_op("amount", Op::Gt, 100)
//!     .where_in("status", [1, 2])
//!     .group(["user_id"])
//!     .having("count(id) > 1")
//!     .get_all()
//!     .await?;
//!
//! let sql = orders.data([("user_id", 7), ("amount", 250)]).insert_to_sql()?;
//! assert_eq!(sql, orders.last_sql());
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod ident;
pub mod model;
pub mod monitor;
pub mod pool;
pub mod qb;
pub mod row;
pub mod session;
pub mod statement;
pub mod transaction;
pub mod value;

#[cfg(feature = "mysql")]
pub mod mysql;

pub use config::{DatabaseConfig, Endpoint, EndpointId, PoolOptions, ProfileConfig, Role};
pub use connection::{Connection, Connector, ExecOutcome};
pub use error::{DbError, DbResult};
pub use executor::Executor;
pub use model::Model;
pub use monitor::SqlLogger;
pub use pool::{ConnectionPool, Handle, WeightedSelector};
pub use qb::{
    CompiledQuery, Cond, Direction, JoinType, Lock, Op, ParameterBinder, QueryBuilder, SqlType,
    TokenSequence, UnionType,
};
pub use row::{FromRow, Row};
pub use session::{Database, Session, Table};
pub use statement::{Bindings, BoundStatement, render_sql};
pub use transaction::{Backoff, RetryPolicy, Transaction, TransactionRunner};
pub use value::{Arg, FromValue, Value, param};
