//! Explicit registry: configuration in, table-bound Models out.
//!
//! A [`Database`] is built once per process from validated configuration.
//! Each request opens a [`Session`], which lazily builds one
//! [`ConnectionPool`] per profile it touches and shares it across every
//! Model it hands out.
//!
//! ```ignore
//! struct User;
//!
//! impl Table for User {
//!     const TABLE: &'static str = "user";
//! }
//!
//! let db = Database::new(DatabaseConfig::load("db.toml")?, MySqlConnector)?;
//! let session = db.session();
//! let users = session.model_for::<User>()?;
//! let row = users.find(1).await?;
//! ```

use crate::config::DatabaseConfig;
use crate::connection::Connector;
use crate::error::DbResult;
use crate::model::Model;
use crate::pool::ConnectionPool;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// A table a Model can be resolved for.
pub trait Table {
    const TABLE: &'static str;
    const PRIMARY_KEY: &'static str = "id";
    /// Profile serving this table; `None` uses the configured default.
    const PROFILE: Option<&'static str> = None;
}

/// Process-wide configuration and driver.
pub struct Database<C: Connector> {
    config: Arc<DatabaseConfig>,
    connector: Arc<C>,
}

impl<C: Connector> Clone for Database<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            connector: Arc::clone(&self.connector),
        }
    }
}

impl<C: Connector> fmt::Debug for Database<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("default", &self.config.default)
            .field("profiles", &self.config.profiles.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<C: Connector> Database<C> {
    pub fn new(config: DatabaseConfig, connector: C) -> DbResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            connector: Arc::new(connector),
        })
    }

    /// Load a TOML profile file, then build.
    pub fn from_file(path: impl AsRef<Path>, connector: C) -> DbResult<Self> {
        Self::new(DatabaseConfig::load(path)?, connector)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Open a request scope. Nothing connects until a statement runs.
    pub fn session(&self) -> Session<C> {
        Session {
            config: Arc::clone(&self.config),
            connector: Arc::clone(&self.connector),
            pools: Mutex::new(HashMap::new()),
        }
    }
}

/// Request-scoped pools and Models.
pub struct Session<C: Connector> {
    config: Arc<DatabaseConfig>,
    connector: Arc<C>,
    pools: Mutex<HashMap<String, Arc<ConnectionPool<C>>>>,
}

impl<C: Connector> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("pools", &self.pools.lock().keys().cloned().collect::<Vec<_>>())
            .finish()
    }
}

impl<C: Connector> Session<C> {
    /// The pool for `profile`, built on first use.
    pub fn pool(&self, profile: &str) -> DbResult<Arc<ConnectionPool<C>>> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(profile) {
            return Ok(Arc::clone(pool));
        }
        let config = self.config.profile(profile)?;
        let pool = Arc::new(ConnectionPool::configure(
            Arc::clone(&self.connector),
            config.endpoints(),
            config.options.clone(),
        )?);
        tracing::debug!(target: "dbal.pool", profile, "pool configured");
        pools.insert(profile.to_string(), Arc::clone(&pool));
        Ok(pool)
    }

    /// A Model for `table` on the default profile.
    pub fn model(&self, table: &str) -> DbResult<Model<ConnectionPool<C>>> {
        self.model_on(&self.config.default, table)
    }

    /// A Model for `table` on a named profile.
    pub fn model_on(&self, profile: &str, table: &str) -> DbResult<Model<ConnectionPool<C>>> {
        let pool = self.pool(profile)?;
        Ok(Model::new(pool, table))
    }

    /// A Model resolved from a [`Table`] declaration.
    pub fn model_for<T: Table>(&self) -> DbResult<Model<ConnectionPool<C>>> {
        let profile = T::PROFILE.unwrap_or(self.config.default.as_str());
        Ok(self
            .model_on(profile, T::TABLE)?
            .with_primary_key(T::PRIMARY_KEY))
    }
}
