//! `tracing` output for executed statements.
//!
//! Every statement emits one event on target `dbal.sql` with its kind, the
//! serving role and endpoint, the parameter count, elapsed time and the SQL
//! text (truncated). Failures log at ERROR, slow statements at WARN, the rest
//! at DEBUG.

use crate::config::{PoolOptions, Role};
use crate::error::DbResult;
use crate::statement::BoundStatement;
use std::time::Duration;

/// Per-pool SQL logging settings.
#[derive(Debug, Clone)]
pub struct SqlLogger {
    /// Statements slower than this log at WARN.
    pub slow_query_threshold: Option<Duration>,
    /// Truncate logged SQL (in bytes). `None` means no truncation.
    pub max_sql_length: Option<usize>,
}

impl Default for SqlLogger {
    fn default() -> Self {
        Self::from_options(&PoolOptions::default())
    }
}

impl SqlLogger {
    pub fn from_options(options: &PoolOptions) -> Self {
        Self {
            slow_query_threshold: options.slow_query_ms.map(Duration::from_millis),
            max_sql_length: options.log_sql_max_len,
        }
    }

    /// Emit the event for one finished statement.
    pub fn record<T>(
        &self,
        stmt: &BoundStatement,
        role: Role,
        endpoint: &str,
        elapsed: Duration,
        result: &DbResult<T>,
    ) {
        let sql = self.truncate(&stmt.sql);
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let param_count = stmt.params.len();

        match result {
            Err(err) => tracing::error!(
                target: "dbal.sql",
                kind = %stmt.kind,
                %role,
                endpoint,
                param_count,
                elapsed_ms,
                error = %err,
                sql = %sql,
                "statement failed"
            ),
            Ok(_) if self.slow_query_threshold.is_some_and(|t| elapsed > t) => tracing::warn!(
                target: "dbal.sql",
                kind = %stmt.kind,
                %role,
                endpoint,
                param_count,
                elapsed_ms,
                sql = %sql,
                "slow statement"
            ),
            Ok(_) => tracing::debug!(
                target: "dbal.sql",
                kind = %stmt.kind,
                %role,
                endpoint,
                param_count,
                elapsed_ms,
                sql = %sql,
                "statement"
            ),
        }
    }

    fn truncate(&self, sql: &str) -> String {
        match self.max_sql_length {
            Some(max) if sql.len() > max => format!("{}...", truncate_sql_bytes(sql, max)),
            _ => sql.to_string(),
        }
    }
}

pub(crate) fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qb::SqlType;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_sql_bytes("select 1", 100), "select 1");
        assert_eq!(truncate_sql_bytes("héllo", 2), "h");
        assert_eq!(truncate_sql_bytes("héllo", 3), "hé");
    }

    #[test]
    fn long_sql_is_shortened_with_ellipsis() {
        let logger = SqlLogger {
            slow_query_threshold: None,
            max_sql_length: Some(6),
        };
        assert_eq!(logger.truncate("select * from t"), "select...");

        let unlimited = SqlLogger {
            max_sql_length: None,
            ..logger
        };
        assert_eq!(unlimited.truncate("select * from t"), "select * from t");
    }

    #[test]
    fn record_accepts_every_outcome() {
        let logger = SqlLogger {
            slow_query_threshold: Some(Duration::from_millis(1)),
            max_sql_length: Some(200),
        };
        let stmt = BoundStatement {
            sql: "select 1".into(),
            params: vec![],
            kind: SqlType::Select,
        };
        logger.record(&stmt, Role::Read, "r@h:3306/d", Duration::ZERO, &Ok(()));
        logger.record(&stmt, Role::Read, "r@h:3306/d", Duration::from_secs(1), &Ok(()));
        let failed: DbResult<()> = Err(crate::DbError::execution("boom"));
        logger.record(&stmt, Role::Write, "w@h:3306/d", Duration::ZERO, &failed);
    }
}
