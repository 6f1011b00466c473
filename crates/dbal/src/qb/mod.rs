//! Fluent SQL builder bound to a [`Model`](crate::Model).
//!
//! Mutators accumulate clause fragments in any order; a terminal operation
//! fixes the statement kind and compiles the fragments in grammatical order:
//!
//! ```text
//! <leading clause> join where group having order limit lock [UNION (...)]
//! ```
//!
//! Literal operands are replaced by generated `:<n>` tokens; caller
//! placeholders (`:name`, `?`) pass through and are bound at execute time.
//!
//! # Usage
//!
//! ```ignore
//! let rows = users
//!     .select(["id", "name", "count(id) as n"])
//!     .where_op("id", Op::Gt, 101)
//!     .where_in("status", [1, 2])
//!     .or_where(|q| q.where_column("created_at", Op::Gt, "updated_at"))
//!     .group(["name"])
//!     .order_desc("id")
//!     .limit(10)
//!     .get_all()
//!     .await?;
//!
//! let id = users
//!     .data([("email", param(":email"))])
//!     .bind(":email", "a@example.com")
//!     .insert()
//!     .await?;
//! ```

mod builder;
mod compile;
mod cond;
pub mod param;
mod terminal;

pub use builder::QueryBuilder;
pub use compile::CompiledQuery;
pub use cond::Cond;
pub use param::{ParameterBinder, TokenSequence};

use crate::error::DbError;
use std::fmt;
use std::str::FromStr;

/// The statement kind a builder compiles to. Fixed once per builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Select,
    Insert,
    Update,
    Replace,
    Delete,
    /// Hand-written SQL of any other kind (never produced by a builder).
    Other,
}

impl SqlType {
    /// Detect the statement kind from its leading keyword.
    pub fn from_sql(sql: &str) -> Self {
        let trimmed = sql.trim_start().trim_start_matches('(').trim_start();
        let keyword = trimmed
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        match keyword.as_str() {
            "select" => SqlType::Select,
            "insert" => SqlType::Insert,
            "update" => SqlType::Update,
            "replace" => SqlType::Replace,
            "delete" => SqlType::Delete,
            _ => SqlType::Other,
        }
    }

    /// Returns `true` for statements served by a read replica.
    pub fn is_read(self) -> bool {
        matches!(self, SqlType::Select)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SqlType::Select => "select",
            SqlType::Insert => "insert",
            SqlType::Update => "update",
            SqlType::Replace => "replace",
            SqlType::Delete => "delete",
            SqlType::Other => "other",
        })
    }
}

/// Comparison operator for WHERE conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
    NotLike,
    BitAnd,
    BitOr,
}

impl Op {
    pub fn as_sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Gt => ">",
            Op::Lt => "<",
            Op::Gte => ">=",
            Op::Lte => "<=",
            Op::Like => "like",
            Op::NotLike => "not like",
            Op::BitAnd => "&",
            Op::BitOr => "|",
        }
    }
}

impl FromStr for Op {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase();
        match normalized.as_str() {
            "=" => Ok(Op::Eq),
            "!=" | "<>" => Ok(Op::Ne),
            ">" => Ok(Op::Gt),
            "<" => Ok(Op::Lt),
            ">=" => Ok(Op::Gte),
            "<=" => Ok(Op::Lte),
            "like" => Ok(Op::Like),
            "not like" => Ok(Op::NotLike),
            "&" => Ok(Op::BitAnd),
            "|" => Ok(Op::BitOr),
            _ => Err(DbError::compilation(format!("Unsupported operator: {s:?}"))),
        }
    }
}

/// JOIN flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
}

impl JoinType {
    pub fn as_sql(self) -> &'static str {
        match self {
            JoinType::Inner => "inner join",
            JoinType::Left => "left join",
            JoinType::Right => "right join",
        }
    }
}

/// ORDER BY direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

/// Row locking mode appended after LIMIT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lock {
    /// `for update`
    ForUpdate,
    /// `lock in share mode`
    Shared,
}

impl Lock {
    pub fn as_sql(self) -> &'static str {
        match self {
            Lock::ForUpdate => "for update",
            Lock::Shared => "lock in share mode",
        }
    }
}

/// UNION flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnionType {
    #[default]
    Distinct,
    All,
}

impl UnionType {
    pub fn as_sql(self) -> &'static str {
        match self {
            UnionType::Distinct => "UNION",
            UnionType::All => "UNION ALL",
        }
    }
}
