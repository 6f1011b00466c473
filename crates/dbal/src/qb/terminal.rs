//! Terminal operations: compile, record the diagnostic SQL, execute.

use super::builder::QueryBuilder;
use super::compile::CompiledQuery;
use super::SqlType;
use crate::connection::ExecOutcome;
use crate::error::DbResult;
use crate::executor::Executor;
use crate::model::Model;
use crate::row::{FromRow, Row};

impl<E> QueryBuilder<E> {
    /// Compile as `kind` and overwrite the model's last SQL.
    fn finish(self, kind: SqlType) -> DbResult<(Model<E>, CompiledQuery)> {
        let model = self.model.clone();
        let compiled = self.compile_as(kind)?;
        model.remember_sql(compiled.to_sql());
        Ok((model, compiled))
    }

    /// `get_row` reads one row unless a limit or union says otherwise.
    fn limit_one(mut self) -> Self {
        if self.limit.is_none() && self.unions.is_empty() {
            self.limit = Some("1".to_string());
        }
        self
    }

    fn to_sql(self, kind: SqlType) -> DbResult<String> {
        let (_, compiled) = self.finish(kind)?;
        Ok(compiled.to_sql())
    }

    pub fn get_all_to_sql(self) -> DbResult<String> {
        self.to_sql(SqlType::Select)
    }

    pub fn get_row_to_sql(self) -> DbResult<String> {
        self.limit_one().to_sql(SqlType::Select)
    }

    pub fn insert_to_sql(self) -> DbResult<String> {
        self.to_sql(SqlType::Insert)
    }

    pub fn replace_to_sql(self) -> DbResult<String> {
        self.to_sql(SqlType::Replace)
    }

    pub fn update_to_sql(self) -> DbResult<String> {
        self.to_sql(SqlType::Update)
    }

    pub fn delete_to_sql(self) -> DbResult<String> {
        self.to_sql(SqlType::Delete)
    }
}

impl<E: Executor> QueryBuilder<E> {
    /// All matching rows.
    pub async fn get_all(self) -> DbResult<Vec<Row>> {
        let (model, compiled) = self.finish(SqlType::Select)?;
        let stmt = compiled.bind()?;
        model.executor().fetch(&stmt).await
    }

    /// The first matching row, if any.
    pub async fn get_row(self) -> DbResult<Option<Row>> {
        let rows = self.limit_one().get_all().await?;
        Ok(rows.into_iter().next())
    }

    pub async fn get_all_as<T: FromRow>(self) -> DbResult<Vec<T>> {
        self.get_all()
            .await?
            .iter()
            .map(T::from_row)
            .collect()
    }

    pub async fn get_row_as<T: FromRow>(self) -> DbResult<Option<T>> {
        match self.get_row().await? {
            Some(row) => T::from_row(&row).map(Some),
            None => Ok(None),
        }
    }

    /// `select count(*)` over the current conditions.
    ///
    /// A grouped or unioned select is counted as a derived table, giving the
    /// number of rows it would return.
    pub async fn count(mut self) -> DbResult<u64> {
        if self.group.is_none() && self.unions.is_empty() {
            self.select = Some("count(*) as `aggregate`".to_string());
            return match self.get_row().await? {
                Some(row) => row.try_get("aggregate"),
                None => Ok(0),
            };
        }

        let model = self.model.clone();
        let inner = self.compile_as(SqlType::Select)?;
        let outer = CompiledQuery {
            sql: format!(
                "select count(*) as `aggregate` from ({}) as `counted`",
                inner.sql
            ),
            ..inner
        };
        model.remember_sql(outer.to_sql());
        let rows = model.executor().fetch(&outer.bind()?).await?;
        match rows.first() {
            Some(row) => row.try_get("aggregate"),
            None => Ok(0),
        }
    }

    /// Run the insert; returns the generated key, or 0 when there is none.
    pub async fn insert(self) -> DbResult<u64> {
        let outcome = self.execute(SqlType::Insert).await?;
        Ok(outcome.last_insert_id.unwrap_or(0))
    }

    /// Run a `replace into`; returns affected rows.
    pub async fn replace(self) -> DbResult<u64> {
        Ok(self.execute(SqlType::Replace).await?.rows_affected)
    }

    /// Returns affected rows.
    pub async fn update(self) -> DbResult<u64> {
        Ok(self.execute(SqlType::Update).await?.rows_affected)
    }

    /// Returns affected rows.
    pub async fn delete(self) -> DbResult<u64> {
        Ok(self.execute(SqlType::Delete).await?.rows_affected)
    }

    async fn execute(self, kind: SqlType) -> DbResult<ExecOutcome> {
        let (model, compiled) = self.finish(kind)?;
        let stmt = compiled.bind()?;
        model.executor().execute(&stmt).await
    }
}
