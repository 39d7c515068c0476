use std::time::{Duration, Instant};

use dental_etl::connection::{ConnectionManager, ConnectionManagerConfig, QueryParam};
use dental_etl::error::ErrorKind;
use dental_etl::test_utils::database::{
    connect_single_mysql, connect_single_pg, create_mysql_database, create_pg_database,
    drop_mysql_database, drop_pg_database, local_mysql_config, local_pg_config,
};
use dental_telemetry::tracing::init_test_tracing;
use sqlx::Row;

fn config(retry_delay: Duration, rate_limit: Duration) -> ConnectionManagerConfig {
    ConnectionManagerConfig {
        max_retries: 3,
        retry_delay,
        rate_limit,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_consecutive_queries_reuse_one_connection() {
    init_test_tracing();

    let database = local_pg_config();
    create_pg_database(&database).await.close().await;
    let pool = connect_single_pg(&database).await;

    let mut manager = ConnectionManager::with_config(
        pool.clone(),
        config(Duration::from_millis(10), Duration::ZERO),
    );
    assert!(!manager.is_connected());

    let first = manager
        .execute_with_retry("SELECT pg_backend_pid()", &[])
        .await
        .unwrap();
    assert!(manager.is_connected());
    // The open connection stays checked out between queries.
    assert!(pool.try_acquire().is_none());

    let second = manager
        .execute_with_retry("SELECT pg_backend_pid()", &[])
        .await
        .unwrap();

    let first_pid: i32 = first[0].try_get(0).unwrap();
    let second_pid: i32 = second[0].try_get(0).unwrap();
    assert_eq!(first_pid, second_pid);
    assert_eq!(manager.query_count(), 2);

    manager.close_connection();
    assert!(!manager.is_connected());
    drop(pool.acquire().await.unwrap());

    pool.close().await;
    drop_pg_database(&database).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_queries_are_spaced_by_the_rate_limit() {
    init_test_tracing();

    let database = local_pg_config();
    let pool = create_pg_database(&database).await;

    let rate_limit = Duration::from_millis(200);
    let mut manager =
        ConnectionManager::with_config(pool.clone(), config(Duration::from_millis(10), rate_limit));

    let started = Instant::now();
    manager.execute_with_retry("SELECT 1", &[]).await.unwrap();
    manager.execute_with_retry("SELECT 1", &[]).await.unwrap();
    manager.execute_with_retry("SELECT 1", &[]).await.unwrap();

    assert!(started.elapsed() >= rate_limit * 2);
    assert_eq!(manager.query_count(), 3);

    drop(manager);
    pool.close().await;
    drop_pg_database(&database).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failing_query_is_retried_with_growing_delay() {
    init_test_tracing();

    let database = local_pg_config();
    let pool = create_pg_database(&database).await;

    let mut manager = ConnectionManager::with_config(
        pool.clone(),
        config(Duration::from_millis(100), Duration::ZERO),
    );

    let started = Instant::now();
    let err = manager
        .execute_with_retry("SELECT * FROM missing_table", &[])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DatabaseQueryError);
    assert_eq!(err.operation(), Some("execute_with_retry"));
    assert_eq!(err.details()["attempts"], 3);
    assert!(err.detail().unwrap_or_default().contains("missing_table"));
    // Backoff between the three attempts is 100ms + 200ms.
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(!manager.is_connected());
    assert_eq!(manager.query_count(), 0);

    // The manager recovers on the next query.
    manager.execute_with_retry("SELECT 1", &[]).await.unwrap();
    assert_eq!(manager.query_count(), 1);

    drop(manager);
    pool.close().await;
    drop_pg_database(&database).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scoped_manager_returns_its_connection() {
    init_test_tracing();

    let database = local_pg_config();
    create_pg_database(&database).await.close().await;
    let pool = connect_single_pg(&database).await;

    let value = ConnectionManager::scoped(pool.clone(), async |manager| {
        let rows = manager
            .execute_with_retry("SELECT $1::bigint + 1", &[QueryParam::Int(41)])
            .await
            .unwrap();
        assert!(manager.is_connected());
        assert!(pool.try_acquire().is_none());

        rows[0].try_get::<i64, _>(0).unwrap()
    })
    .await;

    assert_eq!(value, 42);
    drop(pool.acquire().await.unwrap());

    pool.close().await;
    drop_pg_database(&database).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mysql_statements_with_and_without_parameters() {
    init_test_tracing();

    let database = local_mysql_config();
    create_mysql_database(&database).await.close().await;
    let pool = connect_single_mysql(&database).await;

    let mut manager = ConnectionManager::with_config(
        pool.clone(),
        config(Duration::from_millis(10), Duration::ZERO),
    );

    manager
        .execute_with_retry("CREATE TABLE `group` (`GroupNum` bigint NOT NULL)", &[])
        .await
        .unwrap();

    // SHOW statements cannot be prepared and go through the text protocol.
    let rows = manager
        .execute_with_retry("SHOW CREATE TABLE `group`", &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    let rows = manager
        .execute_with_retry(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = ?",
            &[QueryParam::from("group")],
        )
        .await
        .unwrap();
    let count: i64 = rows[0].try_get(0).unwrap();
    assert_eq!(count, 1);

    let first_id: u64 = manager
        .execute_with_retry("SELECT CONNECTION_ID()", &[])
        .await
        .unwrap()[0]
        .try_get(0)
        .unwrap();
    let second_id: u64 = manager
        .execute_with_retry("SELECT CONNECTION_ID()", &[])
        .await
        .unwrap()[0]
        .try_get(0)
        .unwrap();
    assert_eq!(first_id, second_id);
    assert_eq!(manager.query_count(), 5);

    drop(manager);
    pool.close().await;
    drop_mysql_database(&database).await;
}
