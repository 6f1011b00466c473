//! Model verbs end to end against the scripted driver.

mod common;

use common::{MockConnector, Script, row, split_pool};
use dbal::{
    Bindings, Database, DatabaseConfig, DbError, DbResult, FromRow, Model, Op, Row, Table, Value,
    param,
};
use std::sync::Arc;

#[derive(Debug, PartialEq)]
struct User {
    id: i64,
    name: String,
}

impl FromRow for User {
    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    }
}

fn alice() -> Row {
    row(&[("id", Value::Int(7)), ("name", Value::from("alice"))])
}

#[tokio::test]
async fn find_binds_the_primary_key() {
    let script = Script::new();
    script.set_rows(vec![alice()]);
    let users = Model::new(split_pool(&script), "user");

    let found = users.find(7).await.unwrap().unwrap();
    assert_eq!(found.try_get::<String>("name").unwrap(), "alice");

    let (sql, params) = script.last_statement().unwrap();
    assert_eq!(sql, "select * from `user` where `id` = ? limit 1");
    assert_eq!(params, vec![Value::Int(7)]);
    assert_eq!(users.last_sql(), "select * from `user` where `id` = '7' limit 1");
}

#[tokio::test]
async fn find_on_an_empty_result_is_none() {
    let script = Script::new();
    let users = Model::new(split_pool(&script), "user");
    assert!(users.find(1).await.unwrap().is_none());
}

#[tokio::test]
async fn find_or_fail_reports_a_missing_row() {
    let script = Script::new();
    let users = Model::new(split_pool(&script), "user");

    let err = users.find_or_fail(9).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "Not found: user where id = '9'");

    script.set_rows(vec![alice()]);
    let found = users.find_or_fail(7).await.unwrap();
    assert_eq!(found.try_get::<i64>("id").unwrap(), 7);
}

#[tokio::test]
async fn create_returns_the_generated_key() {
    let script = Script::new();
    let users = Model::new(split_pool(&script), "user");

    let id = users.create([("name", "bob")]).await.unwrap();
    assert_eq!(id, 42);
    assert_eq!(users.last_sql(), "insert into `user` set `name` = 'bob'");

    let (sql, params) = script.last_statement().unwrap();
    assert_eq!(sql, "insert into `user` set `name` = ?");
    assert_eq!(params, vec![Value::from("bob")]);
}

#[tokio::test]
async fn save_and_destroy_report_affected_rows() {
    let script = Script::new();
    let users = Model::new(split_pool(&script), "user").with_primary_key("uid");

    assert_eq!(users.save(3, [("name", "carol")]).await.unwrap(), 1);
    let (sql, params) = script.last_statement().unwrap();
    assert_eq!(sql, "update `user` set `name` = ? where `uid` = ?");
    assert_eq!(params, vec![Value::from("carol"), Value::Int(3)]);

    assert_eq!(users.destroy(3).await.unwrap(), 1);
    let (sql, _) = script.last_statement().unwrap();
    assert_eq!(sql, "delete from `user` where `uid` = ?");
}

#[tokio::test]
async fn increment_and_decrement_update_in_place() {
    let script = Script::new();
    let posts = Model::new(split_pool(&script), "post");

    posts.increment(5, "views", 2).await.unwrap();
    let (sql, params) = script.last_statement().unwrap();
    assert_eq!(sql, "update `post` set `views` = `views` + 2 where `id` = ?");
    assert_eq!(params, vec![Value::Int(5)]);

    posts.decrement(5, "stock", 1).await.unwrap();
    assert_eq!(
        posts.last_sql(),
        "update `post` set `stock` = `stock` - 1 where `id` = '5'"
    );

    assert!(posts.increment(5, "bad name", 1).await.unwrap_err().is_compilation());
}

#[tokio::test]
async fn count_reads_the_aggregate_column() {
    let script = Script::new();
    script.set_rows(vec![row(&[("aggregate", Value::Int(3))])]);
    let users = Model::new(split_pool(&script), "user");

    let n = users.where_eq("status", 1).count().await.unwrap();
    assert_eq!(n, 3);
    let (sql, _) = script.last_statement().unwrap();
    assert_eq!(
        sql,
        "select count(*) as `aggregate` from `user` where `status` = ? limit 1"
    );
}

#[tokio::test]
async fn grouped_counts_wrap_the_select() {
    let script = Script::new();
    script.set_rows(vec![row(&[("aggregate", Value::Int(4))])]);
    let users = Model::new(split_pool(&script), "user");

    let groups = users
        .select(["status"])
        .where_op("age", Op::Gt, 18)
        .group(["status"])
        .count()
        .await
        .unwrap();
    assert_eq!(groups, 4);

    let (sql, params) = script.last_statement().unwrap();
    assert_eq!(
        sql,
        "select count(*) as `aggregate` from \
         (select `status` from `user` where `age` > ? group by `status`) as `counted`"
    );
    assert_eq!(params, vec![Value::Int(18)]);
    assert_eq!(
        users.last_sql(),
        "select count(*) as `aggregate` from \
         (select `status` from `user` where `age` > '18' group by `status`) as `counted`"
    );
}

#[tokio::test]
async fn rows_map_into_types() {
    let script = Script::new();
    script.set_rows(vec![
        alice(),
        row(&[("id", Value::Int(8)), ("name", Value::from("bob"))]),
    ]);
    let users = Model::new(split_pool(&script), "user");

    let all: Vec<User> = users
        .where_op("id", Op::Gte, 7)
        .order("id")
        .get_all_as()
        .await
        .unwrap();
    assert_eq!(
        all,
        vec![
            User { id: 7, name: "alice".into() },
            User { id: 8, name: "bob".into() },
        ]
    );

    let first: Option<User> = users.query().get_row_as().await.unwrap();
    assert_eq!(first.unwrap().id, 7);
}

#[tokio::test]
async fn caller_placeholders_are_bound_at_execute_time() {
    let script = Script::new();
    let users = Model::new(split_pool(&script), "user");

    users
        .where_eq("email", param(":email"))
        .where_op("age", Op::Gt, param("?"))
        .where_eq("status", 1)
        .bind("email", "a@example.com")
        .bind_positional(18)
        .get_all()
        .await
        .unwrap();

    let (sql, params) = script.last_statement().unwrap();
    assert_eq!(
        sql,
        "select * from `user` where `email` = ? AND `age` > ? AND `status` = ?"
    );
    assert_eq!(
        params,
        vec![Value::from("a@example.com"), Value::Int(18), Value::Int(1)]
    );
}

#[tokio::test]
async fn missing_caller_values_fail_before_reaching_the_driver() {
    let script = Script::new();
    let users = Model::new(split_pool(&script), "user");

    let err = users
        .where_eq("email", param(":email"))
        .get_all()
        .await
        .unwrap_err();
    assert!(err.is_binding_mismatch());
    assert!(script.events().is_empty());
}

#[tokio::test]
async fn raw_statements_route_by_method() {
    let script = Script::new();
    let users = Model::new(split_pool(&script), "user");

    users
        .fetch_raw(
            "select * from user where email = :email",
            &Bindings::new().bind("email", "x@example.com"),
        )
        .await
        .unwrap();
    let (sql, params) = script.last_statement().unwrap();
    assert_eq!(sql, "select * from user where email = ?");
    assert_eq!(params, vec![Value::from("x@example.com")]);

    let outcome = users
        .execute_raw("update user set n = n + ?", &Bindings::new().push(1))
        .await
        .unwrap();
    assert_eq!(outcome.rows_affected, 1);
    assert_eq!(script.statements_on("primary"), 1);
}

#[tokio::test]
async fn execution_errors_outside_a_transaction_are_not_retried() {
    let script = Script::new();
    script.fail_next_statement(DbError::execution("duplicate entry"));
    let users = Model::new(split_pool(&script), "user");

    let err = users.create([("name", "dup")]).await.unwrap_err();
    assert!(matches!(err, DbError::Execution(_)));
    assert_eq!(script.statements_on("primary"), 0);
}

// ==================== session ====================

const CONFIG: &str = r#"
default = "main"

[[profiles.main.write]]
host = "primary"
user = "app"
db = "shop"

[[profiles.main.read]]
weight = 1
host = "replica-a"
user = "reader"
db = "shop"

[[profiles.archive.write]]
host = "archive"
user = "app"
db = "archive"
"#;

struct Account;

impl Table for Account {
    const TABLE: &'static str = "account";
    const PRIMARY_KEY: &'static str = "account_id";
}

struct Invoice;

impl Table for Invoice {
    const TABLE: &'static str = "invoice";
    const PROFILE: Option<&'static str> = Some("archive");
}

fn database(script: &Arc<Script>) -> Database<MockConnector> {
    let config = DatabaseConfig::from_toml_str(CONFIG).unwrap();
    Database::new(
        config,
        MockConnector {
            script: Arc::clone(script),
        },
    )
    .unwrap()
}

#[tokio::test]
async fn session_models_share_pool_and_tokens() {
    let script = Script::new();
    let session = database(&script).session();

    let users = session.model("user").unwrap();
    let orders = session.model("order").unwrap();
    assert!(Arc::ptr_eq(users.executor(), orders.executor()));
    assert!(users.tokens().same_sequence(orders.tokens()));

    users.create([("name", "eve")]).await.unwrap();
    orders.create([("amount", 5)]).await.unwrap();
    assert_eq!(script.connects_to("primary"), 1);
}

#[tokio::test]
async fn table_declarations_resolve_key_and_profile() {
    let script = Script::new();
    let session = database(&script).session();

    let accounts = session.model_for::<Account>().unwrap();
    assert_eq!(accounts.primary_key(), "account_id");
    accounts.destroy(1).await.unwrap();
    assert_eq!(
        accounts.last_sql(),
        "delete from `account` where `account_id` = '1'"
    );

    let invoices = session.model_for::<Invoice>().unwrap();
    invoices.create([("total", 10)]).await.unwrap();
    assert_eq!(script.statements_on("archive"), 1);
}

#[tokio::test]
async fn separate_sessions_open_their_own_connections() {
    let script = Script::new();
    let db = database(&script);

    for _ in 0..2 {
        let session = db.session();
        session.model("user").unwrap().create([("name", "x")]).await.unwrap();
    }
    assert_eq!(script.connects_to("primary"), 2);
}

#[test]
fn unknown_profiles_are_configuration_errors() {
    let script = Script::new();
    let session = database(&script).session();
    let err = session.model_on("missing", "user").unwrap_err();
    assert!(matches!(err, DbError::Configuration(_)));
}
