use std::sync::Arc;

use dental_config::shared::PostgresSchema;
use dental_config::{DictConfigProvider, Environment, Settings};
use dental_etl::connection::ConnectionFactory;
use dental_etl::error::ErrorKind;
use dental_telemetry::tracing::init_test_tracing;

use crate::common::offline_test_settings;

#[tokio::test(flavor = "multi_thread")]
async fn test_engines_are_cached_per_database_and_schema() {
    init_test_tracing();

    let settings = offline_test_settings();
    let factory = ConnectionFactory::new();

    factory.get_replication_connection(&settings).unwrap();
    factory.get_replication_connection(&settings).unwrap();
    assert_eq!(factory.engine_count(), 1);

    factory.get_analytics_raw_connection(&settings).unwrap();
    factory.get_analytics_raw_connection(&settings).unwrap();
    factory
        .get_analytics_connection(&settings, PostgresSchema::Staging)
        .unwrap();
    assert_eq!(factory.engine_count(), 3);

    factory.get_source_connection(&settings).unwrap();
    assert_eq!(factory.engine_count(), 4);

    factory.dispose_all().await;
    assert_eq!(factory.engine_count(), 0);

    factory.get_analytics_marts_connection(&settings).unwrap();
    assert_eq!(factory.engine_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_variables_fail_without_creating_an_engine() {
    init_test_tracing();

    // Unprefixed variables are never read in the test environment.
    let provider = DictConfigProvider::new().with_env([
        ("MYSQL_REPLICATION_HOST", "replication.invalid"),
        ("MYSQL_REPLICATION_PORT", "3305"),
        ("MYSQL_REPLICATION_DB", "opendental_replication"),
        ("MYSQL_REPLICATION_USER", "replicator"),
        ("MYSQL_REPLICATION_PASSWORD", "replicator"),
    ]);
    let settings = Settings::new(Environment::Test, Arc::new(provider)).unwrap();
    let factory = ConnectionFactory::new();

    let err = factory.get_replication_connection(&settings).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert_eq!(
        err.detail(),
        Some("missing required Replication (MySQL) connection parameters: host, port, database, user, password")
    );
    assert_eq!(factory.engine_count(), 0);
}
