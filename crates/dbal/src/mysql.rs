//! MySQL driver over `sqlx`.
//!
//! Enabled with the `mysql` feature. Each [`Handle`](crate::pool::Handle)
//! wraps one `sqlx::MySqlConnection`; statements are sent with driver-level
//! `?` binding.

use crate::config::Endpoint;
use crate::connection::{Connection, Connector, ExecOutcome};
use crate::error::{DbError, DbResult};
use crate::row::Row;
use crate::statement::BoundStatement;
use crate::value::Value;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, ConnectOptions, MySql, Row as _, TypeInfo};
use std::sync::Arc;

/// Opens `sqlx` MySQL connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlConnector;

impl Connector for MySqlConnector {
    type Conn = MySqlConn;

    async fn connect(&self, endpoint: &Endpoint) -> DbResult<MySqlConn> {
        let options = MySqlConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .username(&endpoint.user)
            .password(&endpoint.password)
            .database(&endpoint.database)
            .charset(&endpoint.charset.to_ascii_lowercase());

        let conn = options
            .connect()
            .await
            .map_err(|e| DbError::connection(format!("{}: {e}", endpoint.label())))?;
        Ok(MySqlConn { conn })
    }
}

/// One open MySQL connection.
#[derive(Debug)]
pub struct MySqlConn {
    conn: sqlx::MySqlConnection,
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::UInt(u) => query.bind(*u),
        Value::Float(x) => query.bind(*x),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Bytes(b) => query.bind(b.as_slice()),
        Value::Date(d) => query.bind(*d),
        Value::DateTime(dt) => query.bind(*dt),
    }
}

fn build_query(stmt: &BoundStatement) -> Query<'_, MySql, MySqlArguments> {
    stmt.params
        .iter()
        .fold(sqlx::query(&stmt.sql), bind_value)
}

fn decode_column(row: &MySqlRow, idx: usize) -> DbResult<Value> {
    let type_name = row.columns()[idx].type_info().name().to_ascii_uppercase();

    fn get<'r, T>(row: &'r MySqlRow, idx: usize) -> DbResult<Option<T>>
    where
        T: sqlx::Decode<'r, MySql>,
    {
        Ok(row.try_get_unchecked::<Option<T>, _>(idx)?)
    }

    let value = match type_name.as_str() {
        "NULL" => Value::Null,
        "BOOLEAN" => get::<bool>(row, idx)?.into(),
        t if t.ends_with("UNSIGNED") => get::<u64>(row, idx)?.into(),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            get::<i64>(row, idx)?.into()
        }
        "FLOAT" | "DOUBLE" => get::<f64>(row, idx)?.into(),
        "DATE" => get::<NaiveDate>(row, idx)?.into(),
        "DATETIME" | "TIMESTAMP" => get::<NaiveDateTime>(row, idx)?.into(),
        t if t.contains("BLOB") || t.contains("BINARY") || t == "BIT" => {
            get::<Vec<u8>>(row, idx)?.into()
        }
        _ => match get::<String>(row, idx) {
            Ok(text) => text.into(),
            Err(_) => get::<Vec<u8>>(row, idx)?.into(),
        },
    };
    Ok(value)
}

fn decode_rows(rows: Vec<MySqlRow>) -> DbResult<Vec<Row>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let columns: Arc<[String]> = first
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    rows.iter()
        .map(|row| {
            let values = (0..columns.len())
                .map(|idx| decode_column(row, idx))
                .collect::<DbResult<Vec<_>>>()?;
            Row::new(Arc::clone(&columns), values)
        })
        .collect()
}

impl Connection for MySqlConn {
    async fn fetch_all(&mut self, stmt: &BoundStatement) -> DbResult<Vec<Row>> {
        let rows = build_query(stmt).fetch_all(&mut self.conn).await?;
        decode_rows(rows)
    }

    async fn execute(&mut self, stmt: &BoundStatement) -> DbResult<ExecOutcome> {
        let done = build_query(stmt).execute(&mut self.conn).await?;
        Ok(ExecOutcome {
            rows_affected: done.rows_affected(),
            last_insert_id: Some(done.last_insert_id()).filter(|id| *id != 0),
        })
    }

    async fn begin(&mut self) -> DbResult<()> {
        sqlx::raw_sql("START TRANSACTION")
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        sqlx::raw_sql("COMMIT").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        sqlx::raw_sql("ROLLBACK").execute(&mut self.conn).await?;
        Ok(())
    }
}
