/// The local and remote handles must be interchangeable: same statements,
/// same result shapes.

use llink_core::{DatabaseHandle, QueryMethod};
use llink_test_utils::TestServer;
use serde_json::json;

#[tokio::test]
async fn test_query_all_rows_identical() {
    let server = TestServer::start().await;
    let remote = server.remote();

    let sql = "SELECT id, name, price, stock, image FROM products ORDER BY id";
    let local_rows = server.local.query_all(sql, vec![]).await.unwrap();
    let remote_rows = remote.query_all(sql, vec![]).await.unwrap();

    assert_eq!(local_rows, remote_rows);
    assert_eq!(remote_rows.len(), 3);
    assert_eq!(remote_rows[0]["image"], json!("3q2+7w=="));
    assert_eq!(remote_rows[1]["stock"], json!(null));

    // Column order survives the round trip
    let columns: Vec<&String> = remote_rows[0].keys().collect();
    assert_eq!(columns, ["id", "name", "price", "stock", "image"]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_query_one_present_and_absent() {
    let server = TestServer::start().await;
    let remote = server.remote();
    let sql = "SELECT name, price FROM products WHERE name = ?";

    for name in ["rice", "nothing"] {
        let local = server.local.query_one(sql, vec![json!(name)]).await.unwrap();
        let over_network = remote.query_one(sql, vec![json!(name)]).await.unwrap();
        assert_eq!(local, over_network);
    }

    let row = remote.query_one(sql, vec![json!("rice")]).await.unwrap().unwrap();
    assert_eq!(row["price"], json!(40.0));
    assert!(remote.query_one(sql, vec![json!("nothing")]).await.unwrap().is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn test_execute_results_match() {
    let server = TestServer::start().await;
    let remote = server.remote();

    let inserted = remote
        .execute(
            "INSERT INTO products (name, price) VALUES (?, ?)",
            vec![json!("sugar"), json!(3.25)],
        )
        .await
        .unwrap();
    assert_eq!(inserted.last_insert_id, 4);
    assert_eq!(inserted.changes, 1);

    let local = server
        .local
        .execute(
            "INSERT INTO products (name, price) VALUES (?, ?)",
            vec![json!("flour"), json!(1.5)],
        )
        .await
        .unwrap();
    assert_eq!(local.last_insert_id, 5);

    let updated = remote
        .execute("UPDATE products SET stock = 0 WHERE price < ?", vec![json!(3.0)])
        .await
        .unwrap();
    assert_eq!(updated.changes, 3);

    server.shutdown().await;
}

#[tokio::test]
async fn test_run_method_dispatch_matches() {
    let server = TestServer::start().await;
    let remote = server.remote();

    let sql = "SELECT COUNT(*) AS n FROM products WHERE price > ?";
    let local = server
        .local
        .run_method(QueryMethod::Get, sql, vec![json!(2)])
        .await
        .unwrap();
    let over_network = remote
        .run_method(QueryMethod::Get, sql, vec![json!(2)])
        .await
        .unwrap();

    assert_eq!(local.to_json(), over_network.to_json());
    assert_eq!(over_network.to_json(), json!({ "row": { "n": 2 } }));

    server.shutdown().await;
}

#[tokio::test]
async fn test_engine_errors_surface_on_both_handles() {
    let server = TestServer::start().await;
    let remote = server.remote();

    let sql = "SELECT * FROM missing_table";
    assert!(server.local.query_all(sql, vec![]).await.is_err());

    let err = remote.query_all(sql, vec![]).await.unwrap_err();
    match err.remote_cause::<llink_client::ClientError>() {
        Some(llink_client::ClientError::Server { status, message }) => {
            assert_eq!(*status, 500);
            // The engine's own text stays on the server
            assert_eq!(message, "Database query failed");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    server.shutdown().await;
}
