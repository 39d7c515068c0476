use std::sync::Arc;

use dental_config::{DictConfigProvider, Environment, Settings};

/// Settings for the test environment pointing at databases that are never contacted.
pub fn offline_test_settings() -> Settings {
    let vars = [
        ("TEST_OPENDENTAL_SOURCE_HOST", "source.invalid"),
        ("TEST_OPENDENTAL_SOURCE_PORT", "3306"),
        ("TEST_OPENDENTAL_SOURCE_DB", "test_opendental"),
        ("TEST_OPENDENTAL_SOURCE_USER", "reader"),
        ("TEST_OPENDENTAL_SOURCE_PASSWORD", "reader"),
        ("TEST_MYSQL_REPLICATION_HOST", "replication.invalid"),
        ("TEST_MYSQL_REPLICATION_PORT", "3305"),
        ("TEST_MYSQL_REPLICATION_DB", "test_opendental_replication"),
        ("TEST_MYSQL_REPLICATION_USER", "replicator"),
        ("TEST_MYSQL_REPLICATION_PASSWORD", "replicator"),
        ("TEST_POSTGRES_ANALYTICS_HOST", "analytics.invalid"),
        ("TEST_POSTGRES_ANALYTICS_PORT", "5432"),
        ("TEST_POSTGRES_ANALYTICS_DB", "test_opendental_analytics"),
        ("TEST_POSTGRES_ANALYTICS_USER", "analytics"),
        ("TEST_POSTGRES_ANALYTICS_PASSWORD", "analytics"),
    ];
    let provider = DictConfigProvider::new().with_env(vars);

    Settings::new(Environment::Test, Arc::new(provider)).expect("failed to build test settings")
}
