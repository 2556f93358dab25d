//! Integration tests for the AGE client.
//!
//! These tests require a running PostgreSQL instance with the Apache AGE
//! extension installed. Run with:
//! `cargo test --features integration --test age_integration`

#![cfg(feature = "integration")]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use serial_test::serial;
use tokio_util::sync::CancellationToken;

use agekit::{
    AgeClient, ClientConfig, ErrorKind, GraphData, GraphSchema, LoadOptions, Params, PoolConfig,
    ProgressEvent, RetryConfig, StatementOptions,
};

fn test_config() -> ClientConfig {
    ClientConfig {
        host: std::env::var("AGEKIT_TEST_HOST").unwrap_or_else(|_| "localhost".into()),
        port: 5432,
        database: std::env::var("AGEKIT_TEST_DB").unwrap_or_else(|_| "agekit_dev".into()),
        user: std::env::var("AGEKIT_TEST_USER").unwrap_or_else(|_| "postgres".into()),
        password: Some(std::env::var("AGEKIT_TEST_PASSWORD").unwrap_or_else(|_| "postgres".into())),
        ssl: false,
        schema: "public".into(),
        search_path: None,
        temp_schema: "age_client".into(),
        pool: PoolConfig::default(),
        retry: RetryConfig::default(),
        statement_timeout_millis: None,
        transaction_timeout_millis: None,
    }
}

async fn connect() -> AgeClient {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();

    AgeClient::connect(test_config())
        .await
        .expect("failed to connect to test database")
}

async fn fresh_graph(client: &AgeClient, name: &str) {
    client
        .drop_graph(name, true)
        .await
        .expect("failed to drop graph");
    client
        .create_graph(name)
        .await
        .expect("failed to create graph");
}

fn person_schema() -> GraphSchema {
    GraphSchema::from_json(json!({
        "version": "1.0.0",
        "vertices": {
            "Person": {
                "properties": {
                    "id": {"type": "integer"},
                    "name": {"type": "string"},
                    "age": {"type": "integer"}
                },
                "required": ["name"]
            }
        },
        "edges": {
            "KNOWS": {
                "fromVertex": "Person",
                "toVertex": "Person",
                "properties": {"since": {"type": "date"}}
            }
        }
    }))
    .expect("schema should parse")
}

async fn count_label(client: &AgeClient, graph: &str, label: &str) -> i64 {
    let result = client
        .execute_cypher(
            graph,
            &format!("MATCH (n:{}) RETURN count(n) AS total", label),
            &Params::new(),
            &StatementOptions::default(),
        )
        .await
        .expect("count query failed");
    result.rows[0].get("total").expect("no total column")
}

#[tokio::test]
#[serial]
async fn test_create_and_drop_graph() {
    let client = connect().await;

    client.drop_graph("it_lifecycle", true).await.expect("drop failed");
    assert!(!client.graph_exists("it_lifecycle").await.unwrap());

    client.create_graph("it_lifecycle").await.expect("create failed");
    assert!(client.graph_exists("it_lifecycle").await.unwrap());

    // Idempotent re-create
    client.create_graph("it_lifecycle").await.expect("re-create failed");

    client.drop_graph("it_lifecycle", true).await.expect("drop failed");
    assert!(!client.graph_exists("it_lifecycle").await.unwrap());
}

#[tokio::test]
#[serial]
async fn test_basic_vertex_load() {
    let client = connect().await;
    fresh_graph(&client, "it_basic").await;
    let schema = person_schema();

    let data = GraphData::new().with_vertices(
        "Person",
        vec![
            json!({"name": "Alice", "age": 30}),
            json!({"name": "Bob", "age": 25}),
        ],
    );

    let result = client
        .load_graph_data(&schema, &data, &LoadOptions::new("it_basic"))
        .await
        .expect("load failed");

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.vertex_count, 2);
    assert_eq!(result.edge_count, 0);
    assert_eq!(result.vertex_labels, vec!["Person"]);

    assert_eq!(count_label(&client, "it_basic", "Person").await, 2);
}

#[tokio::test]
#[serial]
async fn test_vertex_and_edge_load() {
    let client = connect().await;
    fresh_graph(&client, "it_edges").await;
    let schema = person_schema();

    let data = GraphData::new()
        .with_vertices(
            "Person",
            vec![
                json!({"id": 1, "name": "Alice"}),
                json!({"id": 2, "name": "Bob"}),
            ],
        )
        .with_edges(
            "KNOWS",
            vec![json!({"from": 1, "to": 2, "properties": {"since": "2020-05-01"}})],
        );

    let result = client
        .load_graph_data(&schema, &data, &LoadOptions::new("it_edges"))
        .await
        .expect("load failed");

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.vertex_count, 2);
    assert_eq!(result.edge_count, 1);

    let rows = client
        .execute_cypher(
            "it_edges",
            "MATCH (a:Person)-[e:KNOWS]->(b:Person) RETURN a.name AS from_name, b.name AS to_name",
            &Params::new(),
            &StatementOptions::default(),
        )
        .await
        .expect("edge query failed");
    assert_eq!(rows.row_count, 1);
    let from_name: String = rows.rows[0].get("from_name").unwrap();
    assert_eq!(from_name, "Alice");
}

#[tokio::test]
#[serial]
async fn test_edge_with_missing_endpoint() {
    let client = connect().await;
    fresh_graph(&client, "it_missing").await;
    let schema = person_schema();

    let data = GraphData::new()
        .with_vertices(
            "Person",
            vec![
                json!({"id": 1, "name": "Alice"}),
                json!({"id": 2, "name": "Bob"}),
            ],
        )
        .with_edges("KNOWS", vec![json!({"from": 1, "to": 99})]);

    let result = client
        .load_graph_data(&schema, &data, &LoadOptions::new("it_missing"))
        .await
        .expect("load should not throw");

    assert!(!result.success);
    assert_eq!(result.errors[0].kind, ErrorKind::ReferentialIntegrity);
    // Atomicity: nothing was inserted
    assert_eq!(count_label(&client, "it_missing", "Person").await, 0);
}

#[tokio::test]
#[serial]
async fn test_missing_endpoint_against_live_graph() {
    // With assume_existing_vertices the client-side check is skipped and
    // the engine's created-count shortfall triggers the failure.
    let client = connect().await;
    fresh_graph(&client, "it_missing_live").await;
    let schema = person_schema();

    let vertices = GraphData::new().with_vertices(
        "Person",
        vec![json!({"id": 1, "name": "Alice"})],
    );
    let result = client
        .load_graph_data(&schema, &vertices, &LoadOptions::new("it_missing_live"))
        .await
        .expect("vertex load failed");
    assert!(result.success);

    let edges = GraphData::new().with_edges("KNOWS", vec![json!({"from": 1, "to": 42})]);
    let options = LoadOptions::new("it_missing_live").assume_existing_vertices(true);
    let result = client
        .load_graph_data(&schema, &edges, &options)
        .await
        .expect("edge load should not throw");

    assert!(!result.success);
    assert_eq!(result.errors[0].kind, ErrorKind::ReferentialIntegrity);
    assert!(
        result.errors[0].message.contains("42"),
        "missing endpoint should be listed: {}",
        result.errors[0].message
    );

    let edges = client
        .execute_cypher(
            "it_missing_live",
            "MATCH ()-[e:KNOWS]->() RETURN count(e) AS total",
            &Params::new(),
            &StatementOptions::default(),
        )
        .await
        .expect("edge count failed");
    let total: i64 = edges.rows[0].get("total").unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
#[serial]
async fn test_validation_failure_default_options() {
    let client = connect().await;
    fresh_graph(&client, "it_validation").await;
    let schema = person_schema();

    let data = GraphData::new().with_vertices("Person", vec![json!({"age": 30})]);

    let result = client
        .load_graph_data(&schema, &data, &LoadOptions::new("it_validation"))
        .await
        .expect("load should not throw");

    assert!(!result.success);
    assert_eq!(result.errors[0].kind, ErrorKind::Validation);
    assert_eq!(result.errors[0].row_index, Some(0));
    assert_eq!(count_label(&client, "it_validation", "Person").await, 0);
}

#[tokio::test]
#[serial]
async fn test_validation_continue_drops_offending_rows() {
    let client = connect().await;
    fresh_graph(&client, "it_validation_continue").await;
    let schema = person_schema();

    let data = GraphData::new().with_vertices("Person", vec![json!({"age": 30})]);
    let options = LoadOptions::new("it_validation_continue").continue_on_validation_error(true);

    let result = client
        .load_graph_data(&schema, &data, &options)
        .await
        .expect("load should not throw");

    assert!(result.success);
    assert_eq!(result.vertex_count, 0);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.row_index == Some(0) && w.message.contains("dropped")));
}

#[tokio::test]
#[serial]
async fn test_staging_round_trip_and_isolation() {
    let client = connect().await;
    fresh_graph(&client, "it_staging").await;

    // Stage on connection A and observe the value from inside Cypher on
    // the same connection.
    let conn_a = client.pool().acquire().await.expect("acquire failed");
    conn_a
        .set_param("x", &json!({"a": 1}))
        .await
        .expect("set_param failed");

    let result = conn_a
        .execute_cypher(
            "it_staging",
            "RETURN age_client.get_param('x') AS v",
            &Params::new(),
            &StatementOptions::default(),
        )
        .await
        .expect("query failed");
    assert_eq!(result.rows[0].get_raw("v"), Some(&json!({"a": 1})));

    client
        .pool()
        .release(conn_a, agekit::ReleaseOutcome::Success)
        .await;

    // A fresh borrow (possibly the same physical session) must not see it
    let conn_b = client.pool().acquire().await.expect("acquire failed");
    let result = conn_b
        .execute_cypher(
            "it_staging",
            "RETURN age_client.get_param('x') AS v",
            &Params::new(),
            &StatementOptions::default(),
        )
        .await
        .expect("query failed");
    assert_eq!(result.rows[0].get_raw("v"), Some(&serde_json::Value::Null));

    // Client-side readback agrees
    assert_eq!(conn_b.get_param("x").await.expect("get_param failed"), None);
    client
        .pool()
        .release(conn_b, agekit::ReleaseOutcome::Success)
        .await;
}

#[tokio::test]
#[serial]
async fn test_staging_functions_installed_once_per_schema() {
    let client = connect().await;

    let result = client
        .execute_sql(
            "SELECT count(*) AS n FROM pg_proc p \
             JOIN pg_namespace ns ON ns.oid = p.pronamespace \
             WHERE ns.nspname = 'age_client'",
            &[],
            &StatementOptions::default(),
        )
        .await
        .expect("catalog query failed");

    let n: i64 = result.rows[0].get("n").expect("no count");
    assert_eq!(n, 4, "expected exactly the four staging functions");
}

#[tokio::test]
#[serial]
async fn test_pool_respects_max_size() {
    let mut config = test_config();
    config.pool.max_size = 2;
    let client = Arc::new(
        AgeClient::connect(config)
            .await
            .expect("failed to connect"),
    );

    let max_active = Arc::new(Mutex::new(0usize));
    let started = Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let client = client.clone();
        let max_active = max_active.clone();
        tasks.push(tokio::spawn(async move {
            client
                .pool()
                .with_connection(|_conn| {
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<(), agekit::Error>(())
                    })
                })
                .await
                .expect("with_connection failed");
            let active = client.pool().stats().active;
            let mut max = max_active.lock().unwrap();
            *max = (*max).max(active);
        }));
    }

    // Sample while the tasks run
    for _ in 0..20 {
        let stats = client.pool().stats();
        assert!(stats.active <= 2, "active exceeded max: {:?}", stats);
        assert!(stats.active + stats.idle <= 2);
        let mut max = max_active.lock().unwrap();
        *max = (*max).max(stats.active);
        drop(max);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for task in tasks {
        task.await.expect("task panicked");
    }

    // Three 100 ms holders through two sessions need at least two rounds
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(*max_active.lock().unwrap(), 2);
}

#[tokio::test]
#[serial]
async fn test_acquire_timeout() {
    let mut config = test_config();
    config.pool.max_size = 1;
    config.pool.acquire_timeout_millis = 200;
    let client = AgeClient::connect(config).await.expect("failed to connect");

    let held = client.pool().acquire().await.expect("first acquire failed");

    let err = client
        .pool()
        .acquire()
        .await
        .expect_err("second acquire should time out");
    assert_eq!(err.kind(), ErrorKind::AcquireTimeout);

    client
        .pool()
        .release(held, agekit::ReleaseOutcome::Success)
        .await;
}

#[tokio::test]
#[serial]
async fn test_cancellation_rolls_back() {
    let client = connect().await;
    fresh_graph(&client, "it_cancel").await;
    let schema = person_schema();

    let rows: Vec<_> = (0..10_000)
        .map(|i| json!({"id": i, "name": format!("p{}", i)}))
        .collect();
    let data = GraphData::new().with_vertices("Person", rows);

    let token = CancellationToken::new();
    let cancel = token.clone();
    let last_event: Arc<Mutex<Option<ProgressEvent>>> = Arc::new(Mutex::new(None));
    let sink = last_event.clone();

    let options = LoadOptions::new("it_cancel")
        .batch_size(500)
        .cancellation(token)
        .on_progress(Arc::new(move |event: ProgressEvent| {
            if event.current >= 1_000 {
                cancel.cancel();
            }
            *sink.lock().unwrap() = Some(event);
        }));

    let err = client
        .load_graph_data(&schema, &data, &options)
        .await
        .expect_err("cancelled load must propagate");
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    // Rolled back: the graph is empty
    assert_eq!(count_label(&client, "it_cancel", "Person").await, 0);

    let last = last_event.lock().unwrap().clone().expect("no progress seen");
    assert!(last.percentage < 100.0);
}

#[tokio::test]
#[serial]
async fn test_transaction_commit_and_rollback() {
    let client = connect().await;
    fresh_graph(&client, "it_txn").await;

    let mut conn = client.pool().acquire().await.expect("acquire failed");

    // Committed work is visible
    let txn = conn.begin().await.expect("begin failed");
    txn.execute_cypher(
        "it_txn",
        "CREATE (n:TxTest {id: 1})",
        &Params::new(),
        &StatementOptions::default(),
    )
    .await
    .expect("create failed");
    txn.commit().await.expect("commit failed");

    // Rolled-back work is not
    let txn = conn.begin().await.expect("begin failed");
    txn.execute_cypher(
        "it_txn",
        "CREATE (n:TxTest {id: 2})",
        &Params::new(),
        &StatementOptions::default(),
    )
    .await
    .expect("create failed");
    txn.rollback().await.expect("rollback failed");

    client
        .pool()
        .release(conn, agekit::ReleaseOutcome::Success)
        .await;

    assert_eq!(count_label(&client, "it_txn", "TxTest").await, 1);
}

#[tokio::test]
#[serial]
async fn test_savepoints() {
    let client = connect().await;
    fresh_graph(&client, "it_savepoints").await;

    let mut conn = client.pool().acquire().await.expect("acquire failed");
    let mut txn = conn.begin().await.expect("begin failed");

    txn.execute_cypher(
        "it_savepoints",
        "CREATE (n:SpTest {id: 1})",
        &Params::new(),
        &StatementOptions::default(),
    )
    .await
    .expect("first create failed");

    txn.savepoint("sp1").await.expect("savepoint failed");

    // Reusing an active name is a programming error
    let err = txn.savepoint("sp1").await.expect_err("duplicate name");
    assert_eq!(err.kind(), ErrorKind::Transaction);

    txn.execute_cypher(
        "it_savepoints",
        "CREATE (n:SpTest {id: 2})",
        &Params::new(),
        &StatementOptions::default(),
    )
    .await
    .expect("second create failed");

    txn.rollback_to("sp1").await.expect("rollback_to failed");
    txn.commit().await.expect("commit failed");

    client
        .pool()
        .release(conn, agekit::ReleaseOutcome::Success)
        .await;

    // Only the pre-savepoint row survived
    assert_eq!(count_label(&client, "it_savepoints", "SpTest").await, 1);
}

#[tokio::test]
#[serial]
async fn test_commit_refused_after_statement_error() {
    let client = connect().await;
    fresh_graph(&client, "it_aborted").await;

    let mut conn = client.pool().acquire().await.expect("acquire failed");
    let txn = conn.begin().await.expect("begin failed");

    let err = txn
        .execute_cypher(
            "it_aborted",
            "THIS IS NOT CYPHER",
            &Params::new(),
            &StatementOptions::default(),
        )
        .await
        .expect_err("bad statement must fail");
    assert_eq!(err.kind(), ErrorKind::Cypher);

    let err = txn.commit().await.expect_err("commit must be refused");
    assert_eq!(err.kind(), ErrorKind::Transaction);

    client
        .pool()
        .release(conn, agekit::ReleaseOutcome::Success)
        .await;
}

#[tokio::test]
#[serial]
async fn test_query_builder_end_to_end() {
    let client = connect().await;
    fresh_graph(&client, "it_builder").await;
    let schema = person_schema();

    let data = GraphData::new().with_vertices(
        "Person",
        vec![
            json!({"id": 1, "name": "Alice", "age": 30}),
            json!({"id": 2, "name": "Bob", "age": 25}),
        ],
    );
    let load = client
        .load_graph_data(&schema, &data, &LoadOptions::new("it_builder"))
        .await
        .expect("load failed");
    assert!(load.success);

    let query = client
        .query("it_builder")
        .match_("(p:Person)")
        .where_param("p.name", "=", "Alice")
        .return_items(&["p.name AS name", "p.age AS age"])
        .build()
        .expect("build failed");

    let result = client
        .execute(&query, &StatementOptions::default())
        .await
        .expect("execute failed");

    assert_eq!(result.row_count, 1);
    let name: String = result.rows[0].get("name").unwrap();
    let age: i64 = result.rows[0].get("age").unwrap();
    assert_eq!(name, "Alice");
    assert_eq!(age, 30);
}

// -----------------------------------------------------------------------------
// Injection prevention
//
// Malicious input in staged parameters must not escape the parameter
// context and execute as Cypher.
// -----------------------------------------------------------------------------

#[tokio::test]
#[serial]
async fn test_cypher_injection_via_staged_param() {
    let client = connect().await;
    fresh_graph(&client, "it_injection").await;
    let schema = person_schema();

    let data = GraphData::new().with_vertices(
        "Person",
        vec![json!({"id": 1, "name": "legitimate"})],
    );
    let load = client
        .load_graph_data(&schema, &data, &LoadOptions::new("it_injection"))
        .await
        .expect("load failed");
    assert!(load.success);

    let malicious = "x' DETACH DELETE n WITH n MATCH (m) WHERE m.name = '";
    let query = client
        .query("it_injection")
        .match_("(p:Person)")
        .where_param("p.name", "=", malicious)
        .return_items(&["p"])
        .build()
        .expect("build failed");

    // The value never appears in the statement text
    assert!(!query.cypher.contains("DETACH"));

    let result = client
        .execute(&query, &StatementOptions::default())
        .await
        .expect("query should run safely");
    assert_eq!(result.row_count, 0);

    // The legitimate vertex is intact
    assert_eq!(count_label(&client, "it_injection", "Person").await, 1);
}

#[tokio::test]
#[serial]
async fn test_staged_value_stored_literally() {
    let client = connect().await;
    fresh_graph(&client, "it_literal").await;
    let schema = person_schema();

    let weird_name = r#"{"$id": "injected"}, extra: "payload"}"#;
    let data = GraphData::new().with_vertices(
        "Person",
        vec![json!({"id": 1, "name": weird_name})],
    );
    let load = client
        .load_graph_data(&schema, &data, &LoadOptions::new("it_literal"))
        .await
        .expect("load failed");
    assert!(load.success, "errors: {:?}", load.errors);

    let result = client
        .execute_cypher(
            "it_literal",
            "MATCH (p:Person) RETURN p.name AS name",
            &Params::new(),
            &StatementOptions::default(),
        )
        .await
        .expect("query failed");
    let stored: String = result.rows[0].get("name").unwrap();
    assert_eq!(stored, weird_name);
}
