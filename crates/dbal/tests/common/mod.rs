//! Scripted in-memory driver shared by the integration tests.

#![allow(dead_code)]

use dbal::{
    BoundStatement, Connection, ConnectionPool, Connector, DbError, DbResult, Endpoint, ExecOutcome,
    PoolOptions, Role, Row, Value,
};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// What the driver saw, keyed by endpoint host.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect(String),
    Fetch {
        host: String,
        sql: String,
        params: Vec<Value>,
    },
    Execute {
        host: String,
        sql: String,
        params: Vec<Value>,
    },
    Begin(String),
    Commit(String),
    Rollback(String),
}

impl Event {
    pub fn host(&self) -> &str {
        match self {
            Event::Connect(h) | Event::Begin(h) | Event::Commit(h) | Event::Rollback(h) => h,
            Event::Fetch { host, .. } | Event::Execute { host, .. } => host,
        }
    }
}

/// Shared state behind every connection a [`MockConnector`] opens.
pub struct Script {
    events: Mutex<Vec<Event>>,
    unreachable: Mutex<HashSet<String>>,
    statement_failures: Mutex<VecDeque<DbError>>,
    commit_failures: Mutex<VecDeque<DbError>>,
    rows: Mutex<Vec<Row>>,
    next_insert_id: AtomicU64,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            unreachable: Mutex::new(HashSet::new()),
            statement_failures: Mutex::new(VecDeque::new()),
            commit_failures: Mutex::new(VecDeque::new()),
            rows: Mutex::new(Vec::new()),
            next_insert_id: AtomicU64::new(42),
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn connects_to(&self, host: &str) -> usize {
        self.count(|e| matches!(e, Event::Connect(h) if h == host))
    }

    /// Statements (fetch or execute) served by `host`.
    pub fn statements_on(&self, host: &str) -> usize {
        self.count(|e| matches!(e, Event::Fetch { .. } | Event::Execute { .. }) && e.host() == host)
    }

    /// The last statement the driver received, as `(sql, params)`.
    pub fn last_statement(&self) -> Option<(String, Vec<Value>)> {
        self.events.lock().iter().rev().find_map(|e| match e {
            Event::Fetch { sql, params, .. } | Event::Execute { sql, params, .. } => {
                Some((sql.clone(), params.clone()))
            }
            _ => None,
        })
    }

    pub fn make_unreachable(&self, host: &str) {
        self.unreachable.lock().insert(host.to_string());
    }

    /// The next statement (fetch or execute) fails with `err`.
    pub fn fail_next_statement(&self, err: DbError) {
        self.statement_failures.lock().push_back(err);
    }

    pub fn fail_next_commit(&self, err: DbError) {
        self.commit_failures.lock().push_back(err);
    }

    /// Rows returned by every fetch.
    pub fn set_rows(&self, rows: Vec<Row>) {
        *self.rows.lock() = rows;
    }

    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }
}

/// Build a row from `(column, value)` pairs.
pub fn row(pairs: &[(&str, Value)]) -> Row {
    let columns: Arc<[String]> = pairs.iter().map(|(c, _)| c.to_string()).collect();
    let values = pairs.iter().map(|(_, v)| v.clone()).collect();
    Row::new(columns, values).unwrap()
}

#[derive(Clone)]
pub struct MockConnector {
    pub script: Arc<Script>,
}

impl Connector for MockConnector {
    type Conn = MockConn;

    async fn connect(&self, endpoint: &Endpoint) -> DbResult<MockConn> {
        if self.script.unreachable.lock().contains(&endpoint.host) {
            return Err(DbError::connection(format!("{} refused", endpoint.host)));
        }
        self.script.record(Event::Connect(endpoint.host.clone()));
        Ok(MockConn {
            host: endpoint.host.clone(),
            script: Arc::clone(&self.script),
        })
    }
}

pub struct MockConn {
    host: String,
    script: Arc<Script>,
}

impl MockConn {
    fn injected_failure(&self) -> DbResult<()> {
        match self.script.statement_failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Connection for MockConn {
    async fn fetch_all(&mut self, stmt: &BoundStatement) -> DbResult<Vec<Row>> {
        self.injected_failure()?;
        self.script.record(Event::Fetch {
            host: self.host.clone(),
            sql: stmt.sql.clone(),
            params: stmt.params.clone(),
        });
        Ok(self.script.rows.lock().clone())
    }

    async fn execute(&mut self, stmt: &BoundStatement) -> DbResult<ExecOutcome> {
        self.injected_failure()?;
        self.script.record(Event::Execute {
            host: self.host.clone(),
            sql: stmt.sql.clone(),
            params: stmt.params.clone(),
        });
        let last_insert_id = stmt
            .sql
            .starts_with("insert")
            .then(|| self.script.next_insert_id.fetch_add(1, Ordering::Relaxed));
        Ok(ExecOutcome {
            rows_affected: 1,
            last_insert_id,
        })
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.script.record(Event::Begin(self.host.clone()));
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        if let Some(err) = self.script.commit_failures.lock().pop_front() {
            return Err(err);
        }
        self.script.record(Event::Commit(self.host.clone()));
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.script.record(Event::Rollback(self.host.clone()));
        Ok(())
    }
}

pub fn primary() -> Endpoint {
    Endpoint::new("primary", "app", "shop").role(Role::Write)
}

pub fn replica(host: &str, weight: u32) -> Endpoint {
    Endpoint::new(host, "reader", "shop").weight(weight)
}

/// A pool over `endpoints` with a fixed selection seed.
pub fn pool(
    script: &Arc<Script>,
    endpoints: Vec<Endpoint>,
    options: PoolOptions,
) -> Arc<ConnectionPool<MockConnector>> {
    let connector = Arc::new(MockConnector {
        script: Arc::clone(script),
    });
    let pool = ConnectionPool::configure(connector, endpoints, options)
        .unwrap()
        .with_seed(7)
        .unwrap();
    Arc::new(pool)
}

/// Primary plus `replica-a` (weight 1) and `replica-b` (weight 2).
pub fn split_pool(script: &Arc<Script>) -> Arc<ConnectionPool<MockConnector>> {
    pool(
        script,
        vec![primary(), replica("replica-a", 1), replica("replica-b", 2)],
        PoolOptions::default(),
    )
}
