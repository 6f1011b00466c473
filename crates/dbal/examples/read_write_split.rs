//! Read/write split against a MySQL primary and replicas.
//!
//! Run with: cargo run --example read_write_split -p dbal --features mysql
//!
//! Set DBAL_CONFIG in a .env file or the environment (defaults to `dbal.toml`):
//!
//! ```toml
//! default = "main"
//!
//! [[profiles.main.write]]
//! host = "127.0.0.1"
//! user = "root"
//! pwd = "${MYSQL_PASSWORD}"
//! db = "dbal_example"
//!
//! [[profiles.main.read]]
//! weight = 2
//! host = "127.0.0.1"
//! user = "root"
//! pwd = "${MYSQL_PASSWORD}"
//! db = "dbal_example"
//! ```
//!
//! Statements are logged on the `dbal.sql` target; try `RUST_LOG=dbal=debug`.

use dbal::mysql::MySqlConnector;
use dbal::{Bindings, Database, DbResult, FromRow, Op, Row, Table, param};
use std::env;
use tracing_subscriber::EnvFilter;

struct Account;

impl Table for Account {
    const TABLE: &'static str = "accounts";
}

#[derive(Debug)]
#[allow(dead_code)]
struct AccountRow {
    id: i64,
    owner: String,
    balance: i64,
}

impl FromRow for AccountRow {
    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            owner: row.try_get("owner")?,
            balance: row.try_get("balance")?,
        })
    }
}

#[tokio::main]
async fn main() -> DbResult<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "dbal=debug".into()))
        .init();

    let path = env::var("DBAL_CONFIG").unwrap_or_else(|_| "dbal.toml".to_string());
    let db = Database::from_file(&path, MySqlConnector)?;
    let session = db.session();
    let accounts = session.model_for::<Account>()?;

    accounts
        .execute_raw(
            "CREATE TABLE IF NOT EXISTS accounts (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                owner VARCHAR(64) NOT NULL,
                balance BIGINT NOT NULL DEFAULT 0
            )",
            &Bindings::new(),
        )
        .await?;

    // Writes go to the primary.
    let alice = accounts.create([("owner", "alice")]).await?;
    let bob = accounts
        .data([("owner", param(":owner"))])
        .bind("owner", "bob")
        .insert()
        .await?;
    accounts.increment(alice, "balance", 500).await?;
    println!("inserted accounts {alice} and {bob}");
    println!("last sql: {}", accounts.last_sql());

    // Move money atomically; the whole unit is retried twice on failure.
    accounts
        .transaction(2, |accounts| async move {
            accounts.decrement(alice, "balance", 100).await?;
            accounts.increment(bob, "balance", 100).await?;
            Ok(())
        })
        .await?;

    // Reads pick a replica by weight. Replication lag may hide the transfer.
    let rich: Vec<AccountRow> = accounts
        .where_op("balance", Op::Gt, 0)
        .order_desc("balance")
        .limit(10)
        .get_all_as()
        .await?;
    println!("accounts with a balance: {rich:#?}");

    println!("total accounts: {}", accounts.query().count().await?);

    let sql = accounts
        .where_in("id", [alice, bob])
        .delete_to_sql()?;
    println!("would run: {sql}");

    Ok(())
}
