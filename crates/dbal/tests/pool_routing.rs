//! Read/write routing, handle caching and read failover.

mod common;

use common::{Event, Script, pool, primary, replica, split_pool};
use dbal::{Bindings, BoundStatement, DbError, Model, PoolOptions};

fn select() -> BoundStatement {
    BoundStatement::raw("select 1", &Bindings::new()).unwrap()
}

#[tokio::test]
async fn writes_use_the_primary_and_selects_use_replicas() {
    let script = Script::new();
    let orders = Model::new(split_pool(&script), "order");

    orders.create([("amount", 10)]).await.unwrap();
    orders.all().await.unwrap();

    let events = script.events();
    let execute = events
        .iter()
        .find(|e| matches!(e, Event::Execute { .. }))
        .unwrap();
    assert_eq!(execute.host(), "primary");
    let fetch = events
        .iter()
        .find(|e| matches!(e, Event::Fetch { .. }))
        .unwrap();
    assert!(fetch.host().starts_with("replica-"));
}

#[tokio::test]
async fn handles_are_opened_lazily_and_cached() {
    let script = Script::new();
    let pool = split_pool(&script);
    assert!(script.events().is_empty());

    for _ in 0..50 {
        pool.query(&select()).await.unwrap();
    }
    for _ in 0..5 {
        pool.execute(&BoundStatement::raw("delete from t", &Bindings::new()).unwrap())
            .await
            .unwrap();
    }

    assert_eq!(script.connects_to("primary"), 1);
    assert_eq!(script.connects_to("replica-a"), 1);
    assert_eq!(script.connects_to("replica-b"), 1);
    assert_eq!(script.statements_on("primary"), 5);
    assert_eq!(
        script.statements_on("replica-a") + script.statements_on("replica-b"),
        50
    );
}

#[tokio::test]
async fn reads_follow_replica_weights() {
    let script = Script::new();
    let pool = split_pool(&script);

    let trials = 3000;
    for _ in 0..trials {
        pool.query(&select()).await.unwrap();
    }

    let share = script.statements_on("replica-b") as f64 / trials as f64;
    assert!((share - 2.0 / 3.0).abs() < 0.05, "share was {share}");
}

#[tokio::test]
async fn unreachable_replica_fails_over_to_another() {
    let script = Script::new();
    script.make_unreachable("replica-a");
    let pool = split_pool(&script);

    for _ in 0..30 {
        pool.query(&select()).await.unwrap();
    }

    assert_eq!(script.statements_on("replica-a"), 0);
    assert_eq!(script.statements_on("replica-b"), 30);
}

#[tokio::test]
async fn every_replica_down_reports_a_connection_error() {
    let script = Script::new();
    script.make_unreachable("replica-a");
    script.make_unreachable("replica-b");
    let pool = split_pool(&script);

    let err = pool.query(&select()).await.unwrap_err();
    assert!(err.is_connection());
    assert_eq!(script.statements_on("primary"), 0);
}

#[tokio::test]
async fn failover_can_be_disabled() {
    let script = Script::new();
    script.make_unreachable("replica-a");
    let options = PoolOptions {
        read_failover: false,
        ..PoolOptions::default()
    };
    let pool = pool(&script, vec![primary(), replica("replica-a", 1)], options);

    assert!(pool.query(&select()).await.unwrap_err().is_connection());
}

#[tokio::test]
async fn without_replicas_reads_use_the_primary() {
    let script = Script::new();
    let pool = pool(&script, vec![primary()], PoolOptions::default());

    pool.query(&select()).await.unwrap();
    pool.query(&select()).await.unwrap();

    assert_eq!(script.connects_to("primary"), 1);
    assert_eq!(script.statements_on("primary"), 2);
}

#[tokio::test]
async fn a_dead_write_connection_is_reopened() {
    let script = Script::new();
    script.fail_next_statement(DbError::connection("server has gone away"));
    let orders = Model::new(split_pool(&script), "order");

    assert!(orders.create([("amount", 1)]).await.unwrap_err().is_connection());
    assert_eq!(orders.create([("amount", 2)]).await.unwrap(), 42);

    assert_eq!(script.connects_to("primary"), 2);
    assert_eq!(script.statements_on("primary"), 1);
}

#[tokio::test]
async fn a_dead_read_connection_is_reopened() {
    let script = Script::new();
    let pool = pool(&script, vec![primary(), replica("replica-a", 1)], PoolOptions::default());

    pool.query(&select()).await.unwrap();
    script.fail_next_statement(DbError::connection("lost connection during query"));
    assert!(pool.query(&select()).await.unwrap_err().is_connection());
    pool.query(&select()).await.unwrap();

    assert_eq!(script.connects_to("replica-a"), 2);
    assert_eq!(script.statements_on("replica-a"), 2);
}

#[tokio::test]
async fn execution_errors_keep_the_connection() {
    let script = Script::new();
    script.fail_next_statement(DbError::execution("duplicate entry"));
    let orders = Model::new(split_pool(&script), "order");

    assert!(orders.create([("amount", 1)]).await.is_err());
    orders.create([("amount", 1)]).await.unwrap();
    assert_eq!(script.connects_to("primary"), 1);
}

#[tokio::test]
async fn unreachable_primary_is_fatal() {
    let script = Script::new();
    script.make_unreachable("primary");
    let orders = Model::new(split_pool(&script), "order");

    let err = orders.create([("amount", 1)]).await.unwrap_err();
    assert!(err.is_connection());
    // Reads are unaffected.
    orders.all().await.unwrap();
}

#[tokio::test]
async fn duplicate_read_endpoints_share_one_handle() {
    let script = Script::new();
    let pool = pool(
        &script,
        vec![primary(), replica("replica-a", 1), replica("replica-a", 3)],
        PoolOptions::default(),
    );

    for _ in 0..20 {
        pool.query(&select()).await.unwrap();
    }
    assert_eq!(script.connects_to("replica-a"), 1);
}

#[test]
fn configuration_is_checked_up_front() {
    let script = Script::new();
    let connector = std::sync::Arc::new(common::MockConnector {
        script: std::sync::Arc::clone(&script),
    });

    let err = dbal::ConnectionPool::configure(
        connector.clone(),
        vec![replica("replica-a", 1)],
        PoolOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, dbal::DbError::Configuration(_)));

    let err = dbal::ConnectionPool::configure(
        connector,
        vec![primary(), replica("replica-a", 0)],
        PoolOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, dbal::DbError::Configuration(_)));
}
