/// Gatekeeping seen from a real client: keys, blocklist, rate limit.

use std::time::Duration;

use llink_client::ClientError;
use llink_core::DatabaseHandle;
use llink_test_utils::TestServer;
use serde_json::json;

fn client_error(err: &llink_core::Error) -> &ClientError {
    err.remote_cause::<ClientError>()
        .unwrap_or_else(|| panic!("not a client error: {err:?}"))
}

#[tokio::test]
async fn test_wrong_key_executes_nothing() {
    let server = TestServer::start().await;
    let intruder = server.remote_with_key("not-the-key");

    let err = intruder
        .execute("DELETE FROM products", vec![])
        .await
        .unwrap_err();
    assert!(matches!(client_error(&err), ClientError::InvalidApiKey));
    assert!(!client_error(&err).is_unreachable());

    assert_eq!(server.product_count().await, 3);
    assert_eq!(server.state().log.counts().total, 0);
    assert_eq!(server.state().connections.total(), 0);

    // Liveness needs no key, credentials check does
    intruder.ping().await.unwrap();
    assert!(matches!(
        intruder.check_credentials().await,
        Err(ClientError::InvalidApiKey)
    ));
    server.remote().check_credentials().await.unwrap();

    server.shutdown().await;
}

#[tokio::test]
async fn test_blocked_statements_rejected() {
    let server = TestServer::start().await;
    let remote = server.remote();

    for sql in [
        "DROP TABLE products",
        "alter table products add column x",
        "PRAGMA journal_mode = DELETE",
        "create index idx on products(name)",
        "ATTACH DATABASE '/tmp/x.db' AS x",
    ] {
        let err = remote.execute(sql, vec![]).await.unwrap_err();
        match client_error(&err) {
            ClientError::Server { status, message } => {
                assert_eq!(*status, 400);
                assert_eq!(message, "Query not allowed");
            }
            other => panic!("{sql}: unexpected error {other:?}"),
        }
    }

    assert_eq!(server.product_count().await, 3);
    server.shutdown().await;
}

#[tokio::test]
async fn test_rate_limited_client_sees_distinct_error() {
    let server = TestServer::start_with(|c| c.with_rate_limit(5, Duration::from_secs(60))).await;
    let remote = server.remote();

    for _ in 0..5 {
        remote.query_all("SELECT 1 AS one", vec![]).await.unwrap();
    }
    let err = remote.query_all("SELECT 1 AS one", vec![]).await.unwrap_err();
    assert!(matches!(client_error(&err), ClientError::RateLimited));
    assert!(err.is_retryable());

    server.shutdown().await;
}

#[tokio::test]
async fn test_monitoring_reflects_activity() {
    let server = TestServer::start().await;
    let remote = server.remote();

    remote.query_all("SELECT * FROM products", vec![]).await.unwrap();
    remote
        .execute("INSERT INTO products (name) VALUES (?)", vec![json!("tea")])
        .await
        .unwrap_err();

    let snapshot = remote.monitoring().await.unwrap();
    assert_eq!(snapshot["connections"][0]["ip"], "127.0.0.1");
    assert_eq!(snapshot["connections"][0]["queryCount"], 2);
    assert_eq!(snapshot["stats"]["totalQueries"], 2);
    assert_eq!(snapshot["stats"]["failedQueries"], 1);

    let recent = snapshot["recentQueries"].as_array().unwrap();
    assert_eq!(recent[0]["method"], "run");
    assert_eq!(recent[0]["success"], false);
    assert_eq!(recent[1]["sql"], "SELECT * FROM products");

    server.shutdown().await;
}

#[tokio::test]
async fn test_stopped_server_is_unreachable() {
    let server = TestServer::start().await;
    let remote = server.remote();
    server.shutdown().await;

    let err = remote.query_all("SELECT 1", vec![]).await.unwrap_err();
    assert!(client_error(&err).is_unreachable(), "expected unreachable, got {err:?}");
}
