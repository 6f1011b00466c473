//! Endpoint profiles loaded from TOML.
//!
//! ```toml
//! default = "_test"
//!
//! [profiles._test.options]
//! read_failover = true
//! slow_query_ms = 200
//!
//! [[profiles._test.write]]
//! weight = 10
//! type = "mysql"
//! host = "127.0.0.1"
//! port = 3306
//! user = "root"
//! pwd = "${DB_PASSWORD}"
//! char = "UTF8"
//! db = "test"
//!
//! [[profiles._test.read]]
//! weight = 1
//! host = "10.0.0.2"
//! user = "reader"
//! db = "test"
//! ```

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Whether an endpoint serves writes or reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Write,
    #[default]
    Read,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Write => "write",
            Role::Read => "read",
        })
    }
}

/// One configured database host.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(rename = "type", default = "default_driver")]
    pub driver: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(rename = "pwd", alias = "password", default)]
    pub password: String,
    #[serde(rename = "char", alias = "charset", default = "default_charset")]
    pub charset: String,
    #[serde(rename = "db", alias = "database")]
    pub database: String,
    /// Assigned from the list the endpoint is declared in.
    #[serde(skip)]
    pub role: Role,
}

fn default_weight() -> u32 {
    1
}

fn default_driver() -> String {
    "mysql".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_charset() -> String {
    "utf8mb4".to_string()
}

/// Identity of an endpoint for handle caching: `(host, port, user, database)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
}

impl Endpoint {
    pub fn new(host: &str, user: &str, database: &str) -> Self {
        Self {
            weight: default_weight(),
            driver: default_driver(),
            host: host.to_string(),
            port: default_port(),
            user: user.to_string(),
            password: String::new(),
            charset: default_charset(),
            database: database.to_string(),
            role: Role::Read,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    pub fn charset(mut self, charset: &str) -> Self {
        self.charset = charset.to_string();
        self
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn id(&self) -> EndpointId {
        EndpointId {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            database: self.database.clone(),
        }
    }

    /// `user@host:port/database`, used in logs.
    pub fn label(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }

    fn expand_env(&mut self) -> DbResult<()> {
        for field in [
            &mut self.driver,
            &mut self.host,
            &mut self.user,
            &mut self.password,
            &mut self.charset,
            &mut self.database,
        ] {
            *field = expand_env_vars(field.as_str())?;
        }
        Ok(())
    }

    fn validate(&self, profile: &str) -> DbResult<()> {
        let at = format!("profile {profile:?}, {} endpoint {}", self.role, self.label());
        if self.weight == 0 {
            return Err(DbError::configuration(format!("weight must be positive ({at})")));
        }
        if !self.driver.eq_ignore_ascii_case("mysql") {
            return Err(DbError::configuration(format!(
                "unsupported endpoint type {:?} ({at})",
                self.driver
            )));
        }
        for (name, value) in [
            ("host", &self.host),
            ("user", &self.user),
            ("db", &self.database),
        ] {
            if value.trim().is_empty() {
                return Err(DbError::configuration(format!("{name} must not be empty ({at})")));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("weight", &self.weight)
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("charset", &self.charset)
            .field("database", &self.database)
            .field("role", &self.role)
            .finish()
    }
}

/// Pool behaviour for one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// On a failed read connect, try another weighted candidate.
    pub read_failover: bool,
    /// Statements slower than this are logged at WARN.
    pub slow_query_ms: Option<u64>,
    /// Truncate logged SQL to this many bytes.
    pub log_sql_max_len: Option<usize>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            read_failover: true,
            slow_query_ms: None,
            log_sql_max_len: Some(200),
        }
    }
}

/// Write and read endpoints of one named profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub write: Vec<Endpoint>,
    #[serde(default)]
    pub read: Vec<Endpoint>,
    #[serde(default)]
    pub options: PoolOptions,
}

impl ProfileConfig {
    /// Every endpoint with its role assigned, writes first.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let writes = self.write.iter().map(|e| e.clone().role(Role::Write));
        let reads = self.read.iter().map(|e| e.clone().role(Role::Read));
        writes.chain(reads).collect()
    }
}

fn default_profile() -> String {
    "default".to_string()
}

/// All profiles plus the name of the default one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_profile")]
    pub default: String,
    pub profiles: BTreeMap<String, ProfileConfig>,
}

impl DatabaseConfig {
    /// Read, expand and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DbError::configuration(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw).map_err(|e| match e {
            DbError::Configuration(msg) => {
                DbError::configuration(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Parse, expand `${VAR}` references and validate.
    pub fn from_toml_str(raw: &str) -> DbResult<Self> {
        let mut config: DatabaseConfig = toml::from_str(raw)
            .map_err(|e| DbError::configuration(format!("failed to parse config: {e}")))?;
        config.expand_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> DbResult<&ProfileConfig> {
        self.profiles
            .get(name)
            .ok_or_else(|| DbError::configuration(format!("unknown profile: {name:?}")))
    }

    pub fn default_profile(&self) -> DbResult<&ProfileConfig> {
        self.profile(&self.default)
    }

    fn expand_env(&mut self) -> DbResult<()> {
        self.default = expand_env_vars(&self.default)?;
        for profile in self.profiles.values_mut() {
            for endpoint in profile.write.iter_mut().chain(profile.read.iter_mut()) {
                endpoint.expand_env()?;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.profiles.is_empty() {
            return Err(DbError::configuration("at least one profile is required"));
        }
        if !self.profiles.contains_key(&self.default) {
            return Err(DbError::configuration(format!(
                "default profile {:?} is not defined",
                self.default
            )));
        }
        for (name, profile) in &self.profiles {
            if profile.write.is_empty() {
                return Err(DbError::configuration(format!(
                    "profile {name:?} needs at least one write endpoint"
                )));
            }
            for endpoint in profile.endpoints() {
                endpoint.validate(name)?;
            }
        }
        Ok(())
    }
}

fn expand_env_vars(input: &str) -> DbResult<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();

            let mut key = String::new();
            let mut closed = false;
            for ch in chars.by_ref() {
                if ch == '}' {
                    closed = true;
                    break;
                }
                key.push(ch);
            }

            if !closed {
                return Err(DbError::configuration(format!(
                    "unterminated env var reference: ${{{key}}}"
                )));
            }
            if key.is_empty() {
                return Err(DbError::configuration("invalid env var reference: ${}"));
            }

            let value = std::env::var(&key).map_err(|_| {
                DbError::configuration(format!("missing env var for config expansion: {key}"))
            })?;
            out.push_str(&value);
            continue;
        }

        out.push(c);
    }

    Ok(out)
}
