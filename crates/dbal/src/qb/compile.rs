//! Fragment assembly in fixed grammatical order.

use super::builder::QueryBuilder;
use super::param::ParameterBinder;
use super::SqlType;
use crate::error::{DbError, DbResult};
use crate::ident::format_field;
use crate::statement::{Bindings, BoundStatement, render_sql};

/// Output of [`QueryBuilder::compile`]: SQL text with `:<n>` tokens and
/// caller placeholders, plus everything needed to bind them.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    /// `None` for a degenerate (fragment-only) compile.
    pub sql_type: Option<SqlType>,
    pub bindings: ParameterBinder,
    pub caller: Bindings,
}

impl CompiledQuery {
    /// Diagnostic SQL with every resolvable placeholder replaced by its
    /// quoted literal. Never executed.
    pub fn to_sql(&self) -> String {
        render_sql(&self.sql, &self.bindings, &self.caller)
    }

    /// Rewrite to driver placeholders and collect values in order.
    pub fn bind(&self) -> DbResult<BoundStatement> {
        let kind = self
            .sql_type
            .ok_or_else(|| DbError::compilation("Cannot execute a fragment-only compile"))?;
        BoundStatement::prepare(&self.sql, kind, &self.bindings, &self.caller)
    }
}

impl<E> QueryBuilder<E> {
    /// Fix the statement kind and compile.
    pub(crate) fn compile_as(mut self, kind: SqlType) -> DbResult<CompiledQuery> {
        match self.sql_type {
            Some(existing) if existing != kind => {
                return Err(DbError::compilation(format!(
                    "Statement kind already fixed as {existing}, cannot compile as {kind}"
                )));
            }
            _ => self.sql_type = Some(kind),
        }
        self.compile()
    }

    /// Compile the accumulated fragments.
    ///
    /// Without a statement kind (the builder handed to `or_where`) only the
    /// ordered fragments are emitted and the WHERE text has no keyword.
    pub fn compile(mut self) -> DbResult<CompiledQuery> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }

        let mut sql = match self.sql_type {
            None => String::new(),
            Some(SqlType::Select) => {
                let from = match self.from.take() {
                    Some(from) => from,
                    None => format_field(self.model.table())?,
                };
                format!(
                    "select {} from {from}",
                    self.select.as_deref().unwrap_or("*")
                )
            }
            Some(kind @ (SqlType::Insert | SqlType::Update | SqlType::Replace)) => {
                let table = format_field(self.model.table())?;
                let data = self.data.as_deref().ok_or_else(|| {
                    DbError::compilation(format!("{kind} on {table} requires data()"))
                })?;
                match kind {
                    SqlType::Insert => format!("insert into {table} set {data}"),
                    SqlType::Replace => format!("replace into {table} set {data}"),
                    _ => format!("update {table} set {data}"),
                }
            }
            Some(SqlType::Delete) => format!("delete from {}", format_field(self.model.table())?),
            Some(SqlType::Other) => {
                return Err(DbError::compilation("Builders cannot compile free-form statements"));
            }
        };

        if let Some(join) = &self.join {
            sql.push(' ');
            sql.push_str(join);
        }
        if let Some(filter) = &self.filter {
            if self.sql_type.is_some() {
                sql.push_str(" where ");
            } else {
                sql.push(' ');
            }
            sql.push_str(filter);
        }
        if let Some(group) = &self.group {
            sql.push_str(" group by ");
            sql.push_str(group);
        }
        if let Some(having) = &self.having {
            sql.push_str(" having ");
            sql.push_str(having);
        }
        if let Some(order) = &self.order {
            sql.push_str(" order by ");
            sql.push_str(order);
        }
        if let Some(limit) = &self.limit {
            sql.push_str(" limit ");
            sql.push_str(limit);
        }
        if let Some(lock) = self.lock {
            sql.push(' ');
            sql.push_str(lock.as_sql());
        }

        if self.sql_type.is_none() {
            sql = sql.trim_start().to_string();
        }

        if !self.unions.is_empty() {
            sql = format!("({sql})");
            for (kind, fragment) in &self.unions {
                sql.push_str(&format!(" {} ({fragment})", kind.as_sql()));
            }
        }

        Ok(CompiledQuery {
            sql,
            sql_type: self.sql_type,
            bindings: self.binder,
            caller: self.caller,
        })
    }
}
