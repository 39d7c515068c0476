use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dental_config::shared::{ConnectionParams, DatabaseType, PgSessionOptions, PostgresSchema};
use dental_config::{Environment, Settings};
use secrecy::ExposeSecret;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, MySqlPool, PgPool};
use tracing::{info, warn};

use crate::error::{ErrorKind, EtlResult};
use crate::{bail, etl_error};

/// Schema used when an analytics connection is requested without one.
pub const DEFAULT_POSTGRES_SCHEMA: &str = "raw";

/// A pooled engine held by the [`ConnectionFactory`].
#[derive(Debug, Clone)]
pub enum Engine {
    MySql(MySqlPool),
    Postgres(PgPool),
}

impl Engine {
    pub async fn close(&self) {
        match self {
            Engine::MySql(pool) => pool.close().await,
            Engine::Postgres(pool) => pool.close().await,
        }
    }
}

type EngineKey = (DatabaseType, Option<PostgresSchema>, Environment);

/// Creates and caches one pooled engine per database, schema and environment.
///
/// Engines are created lazily: no connection is opened until a query needs one. Lookups and
/// construction run under one lock, so concurrent callers asking for the same engine share a
/// single pool. Creating engines requires a running Tokio runtime.
#[derive(Debug, Default)]
pub struct ConnectionFactory {
    engines: Mutex<HashMap<EngineKey, Engine>>,
}

impl ConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn engines(&self) -> MutexGuard<'_, HashMap<EngineKey, Engine>> {
        self.engines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of cached engines.
    pub fn engine_count(&self) -> usize {
        self.engines().len()
    }

    /// Returns the engine for the OpenDental source database.
    pub fn get_source_connection(&self, settings: &Settings) -> EtlResult<MySqlPool> {
        self.mysql_engine(settings, DatabaseType::Source)
    }

    /// Returns the engine for the MySQL replication database.
    pub fn get_replication_connection(&self, settings: &Settings) -> EtlResult<MySqlPool> {
        self.mysql_engine(settings, DatabaseType::Replication)
    }

    /// Returns the engine for the analytics database with `schema` as `search_path`.
    pub fn get_analytics_connection(
        &self,
        settings: &Settings,
        schema: PostgresSchema,
    ) -> EtlResult<PgPool> {
        let key = (DatabaseType::Analytics, Some(schema), settings.environment());

        let mut engines = self.engines();
        if let Some(Engine::Postgres(pool)) = engines.get(&key) {
            return Ok(pool.clone());
        }

        let params = settings.get_database_config(DatabaseType::Analytics, Some(schema))?;
        let pool = create_postgres_engine(&params, Some(schema.as_str()))?;
        engines.insert(key, Engine::Postgres(pool.clone()));

        info!(
            database = DatabaseType::Analytics.as_str(),
            %schema,
            environment = %settings.environment(),
            "analytics engine created"
        );

        Ok(pool)
    }

    pub fn get_analytics_raw_connection(&self, settings: &Settings) -> EtlResult<PgPool> {
        self.get_analytics_connection(settings, PostgresSchema::Raw)
    }

    pub fn get_analytics_staging_connection(&self, settings: &Settings) -> EtlResult<PgPool> {
        self.get_analytics_connection(settings, PostgresSchema::Staging)
    }

    pub fn get_analytics_intermediate_connection(&self, settings: &Settings) -> EtlResult<PgPool> {
        self.get_analytics_connection(settings, PostgresSchema::Intermediate)
    }

    pub fn get_analytics_marts_connection(&self, settings: &Settings) -> EtlResult<PgPool> {
        self.get_analytics_connection(settings, PostgresSchema::Marts)
    }

    #[deprecated(note = "use `get_source_connection`")]
    pub fn get_opendental_source_connection(&self, settings: &Settings) -> EtlResult<MySqlPool> {
        warn_deprecated("get_opendental_source_connection", "get_source_connection");
        self.get_source_connection(settings)
    }

    #[deprecated(note = "use `get_replication_connection`")]
    pub fn get_mysql_replication_connection(&self, settings: &Settings) -> EtlResult<MySqlPool> {
        warn_deprecated(
            "get_mysql_replication_connection",
            "get_replication_connection",
        );
        self.get_replication_connection(settings)
    }

    #[deprecated(note = "use `get_analytics_raw_connection`")]
    pub fn get_postgres_analytics_connection(&self, settings: &Settings) -> EtlResult<PgPool> {
        warn_deprecated(
            "get_postgres_analytics_connection",
            "get_analytics_raw_connection",
        );
        self.get_analytics_raw_connection(settings)
    }

    #[deprecated(note = "use `get_analytics_raw_connection`")]
    pub fn get_opendental_analytics_raw_connection(
        &self,
        settings: &Settings,
    ) -> EtlResult<PgPool> {
        warn_deprecated(
            "get_opendental_analytics_raw_connection",
            "get_analytics_raw_connection",
        );
        self.get_analytics_raw_connection(settings)
    }

    #[deprecated(note = "use `get_analytics_staging_connection`")]
    pub fn get_opendental_analytics_staging_connection(
        &self,
        settings: &Settings,
    ) -> EtlResult<PgPool> {
        warn_deprecated(
            "get_opendental_analytics_staging_connection",
            "get_analytics_staging_connection",
        );
        self.get_analytics_staging_connection(settings)
    }

    #[deprecated(note = "use `get_analytics_intermediate_connection`")]
    pub fn get_opendental_analytics_intermediate_connection(
        &self,
        settings: &Settings,
    ) -> EtlResult<PgPool> {
        warn_deprecated(
            "get_opendental_analytics_intermediate_connection",
            "get_analytics_intermediate_connection",
        );
        self.get_analytics_intermediate_connection(settings)
    }

    #[deprecated(note = "use `get_analytics_marts_connection`")]
    pub fn get_opendental_analytics_marts_connection(
        &self,
        settings: &Settings,
    ) -> EtlResult<PgPool> {
        warn_deprecated(
            "get_opendental_analytics_marts_connection",
            "get_analytics_marts_connection",
        );
        self.get_analytics_marts_connection(settings)
    }

    /// Closes every cached engine and empties the cache.
    pub async fn dispose_all(&self) {
        let engines: Vec<_> = self.engines().drain().collect();

        for ((db_type, schema, environment), engine) in engines {
            engine.close().await;
            info!(
                database = db_type.as_str(),
                schema = schema.map(|schema| schema.as_str()),
                %environment,
                "engine disposed"
            );
        }
    }

    fn mysql_engine(&self, settings: &Settings, db_type: DatabaseType) -> EtlResult<MySqlPool> {
        let key = (db_type, None, settings.environment());

        let mut engines = self.engines();
        if let Some(Engine::MySql(pool)) = engines.get(&key) {
            return Ok(pool.clone());
        }

        let params = settings.get_database_config(db_type, None)?;
        let pool = create_mysql_engine(&params, db_type.label())?;
        engines.insert(key, Engine::MySql(pool.clone()));

        info!(
            database = db_type.as_str(),
            environment = %settings.environment(),
            "mysql engine created"
        );

        Ok(pool)
    }
}

fn warn_deprecated(name: &str, replacement: &str) {
    warn!(
        function = name,
        replacement,
        "deprecated connection method called"
    );
}

/// Fails with a [`ErrorKind::ValidationError`] naming every missing or empty parameter.
pub fn validate_connection_params(params: &ConnectionParams, db_label: &str) -> EtlResult<()> {
    let missing = params.missing_keys();
    if missing.is_empty() {
        return Ok(());
    }

    Err(etl_error!(
        ErrorKind::ValidationError,
        "Connection parameters are incomplete",
        format!(
            "missing required {db_label} connection parameters: {}",
            missing.join(", ")
        )
    )
    .with_detail_field("database", db_label)
    .with_detail_field("missing_keys", missing))
}

/// Returns `schema`, or [`DEFAULT_POSTGRES_SCHEMA`] with a warning when it is missing or blank.
pub fn resolve_postgres_schema(schema: Option<&str>) -> String {
    match schema.map(str::trim).filter(|schema| !schema.is_empty()) {
        Some(schema) => schema.to_string(),
        None => {
            warn!(
                default = DEFAULT_POSTGRES_SCHEMA,
                "no postgres schema given, using default"
            );
            DEFAULT_POSTGRES_SCHEMA.to_string()
        }
    }
}

fn parse_port(params: &ConnectionParams) -> EtlResult<u16> {
    let port = params.port.as_deref().unwrap_or_default().trim();
    match port.parse::<u16>() {
        Ok(port) => Ok(port),
        Err(err) => bail!(
            ErrorKind::ValidationError,
            "Connection port is not a valid port number",
            format!("`{port}` is not a valid port"),
            source: err
        ),
    }
}

/// Creates a MySQL engine with `utf8mb4` and the configured pool and session timeouts.
pub fn create_mysql_engine(params: &ConnectionParams, db_label: &str) -> EtlResult<MySqlPool> {
    validate_connection_params(params, db_label)?;

    let database = params.database.as_deref().unwrap_or_default();
    let options = mysql_connect_options(params).map_err(|err| {
        etl_error!(
            ErrorKind::DatabaseConnectionError,
            "Failed to create MySQL connection",
            format!("Failed to create MySQL connection to {database}"),
            source: err
        )
    })?;

    let session_sql = format!(
        "SET SESSION net_read_timeout = {}, net_write_timeout = {}",
        params.pool.read_timeout, params.pool.write_timeout
    );

    let pool = MySqlPoolOptions::new()
        .max_connections(params.pool.max_connections())
        .acquire_timeout(Duration::from_secs(params.pool.pool_timeout))
        .max_lifetime(Duration::from_secs(params.pool.pool_recycle))
        .test_before_acquire(true)
        .after_connect(move |connection, _meta| {
            let session_sql = session_sql.clone();
            Box::pin(async move {
                connection.execute(session_sql.as_str()).await?;
                Ok(())
            })
        })
        .connect_lazy_with(options);

    Ok(pool)
}

fn mysql_connect_options(params: &ConnectionParams) -> EtlResult<MySqlConnectOptions> {
    let port = parse_port(params)?;

    let mut options = MySqlConnectOptions::new()
        .host(params.host.as_deref().unwrap_or_default())
        .port(port)
        .username(params.user.as_deref().unwrap_or_default())
        .database(params.database.as_deref().unwrap_or_default())
        .charset("utf8mb4");

    if let Some(password) = &params.password {
        options = options.password(password.expose_secret());
    }

    Ok(options)
}

/// Creates a PostgreSQL engine whose connections use `schema` as `search_path`.
///
/// A missing or blank schema falls back to [`DEFAULT_POSTGRES_SCHEMA`].
pub fn create_postgres_engine(params: &ConnectionParams, schema: Option<&str>) -> EtlResult<PgPool> {
    validate_connection_params(params, DatabaseType::Analytics.label())?;

    let schema = resolve_postgres_schema(schema);
    let database = params.database.as_deref().unwrap_or_default();
    let options = postgres_connect_options(params, &schema).map_err(|err| {
        etl_error!(
            ErrorKind::DatabaseConnectionError,
            "Failed to create PostgreSQL connection",
            format!("Failed to create PostgreSQL connection to {database}.{schema}"),
            source: err
        )
    })?;

    let pool = PgPoolOptions::new()
        .max_connections(params.pool.max_connections())
        .acquire_timeout(Duration::from_secs(params.pool.pool_timeout))
        .max_lifetime(Duration::from_secs(params.pool.pool_recycle))
        .test_before_acquire(true)
        .connect_lazy_with(options);

    Ok(pool)
}

fn postgres_connect_options(params: &ConnectionParams, schema: &str) -> EtlResult<PgConnectOptions> {
    let port = parse_port(params)?;

    let mut options = PgConnectOptions::new()
        .host(params.host.as_deref().unwrap_or_default())
        .port(port)
        .username(params.user.as_deref().unwrap_or_default())
        .database(params.database.as_deref().unwrap_or_default())
        .application_name(&params.pool.application_name)
        .options(PgSessionOptions::new(schema).to_key_value_pairs());

    if let Some(password) = &params.password {
        options = options.password(password.expose_secret());
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::sync::Arc;

    use dental_config::{DictConfigProvider, ETL_ENVIRONMENT_ENV_NAME};
    use dental_telemetry::tracing::init_test_tracing;
    use secrecy::SecretString;

    use super::*;

    fn test_settings() -> Settings {
        let env = [
            ("TEST_OPENDENTAL_SOURCE_HOST", "localhost"),
            ("TEST_OPENDENTAL_SOURCE_PORT", "3306"),
            ("TEST_OPENDENTAL_SOURCE_DB", "test_opendental"),
            ("TEST_OPENDENTAL_SOURCE_USER", "reader"),
            ("TEST_OPENDENTAL_SOURCE_PASSWORD", "secret"),
            ("TEST_POSTGRES_ANALYTICS_HOST", "localhost"),
            ("TEST_POSTGRES_ANALYTICS_PORT", "5432"),
            ("TEST_POSTGRES_ANALYTICS_DB", "test_analytics"),
            ("TEST_POSTGRES_ANALYTICS_USER", "analytics"),
            ("TEST_POSTGRES_ANALYTICS_PASSWORD", "secret"),
            (ETL_ENVIRONMENT_ENV_NAME, "test"),
        ];
        let provider = DictConfigProvider::new().with_env(env);

        Settings::with_provider(Arc::new(provider)).unwrap()
    }

    #[test]
    fn test_validation_names_every_missing_key() {
        let params = ConnectionParams {
            host: Some(String::new()),
            port: Some("3306".to_string()),
            database: None,
            user: Some("u".to_string()),
            password: Some(SecretString::new(String::new())),
            ..Default::default()
        };

        let err = validate_connection_params(&params, "MySQL").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        let detail = err.detail().unwrap();
        assert!(detail.contains("host"));
        assert!(detail.contains("database"));
        assert!(detail.contains("password"));
        assert!(!detail.contains("user"));
    }

    #[test]
    fn test_blank_schema_defaults_to_raw() {
        assert_eq!(resolve_postgres_schema(None), "raw");
        assert_eq!(resolve_postgres_schema(Some("  ")), "raw");
        assert_eq!(resolve_postgres_schema(Some("marts")), "marts");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_engines_are_cached_per_database_and_schema() {
        init_test_tracing();

        let settings = test_settings();
        let factory = ConnectionFactory::new();

        factory.get_source_connection(&settings).unwrap();
        factory.get_source_connection(&settings).unwrap();
        assert_eq!(factory.engine_count(), 1);

        factory.get_analytics_raw_connection(&settings).unwrap();
        factory.get_analytics_marts_connection(&settings).unwrap();
        #[allow(deprecated)]
        factory.get_postgres_analytics_connection(&settings).unwrap();
        assert_eq!(factory.engine_count(), 3);

        factory.dispose_all().await;
        assert_eq!(factory.engine_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_replication_variables_are_rejected() {
        init_test_tracing();

        let settings = test_settings();
        let factory = ConnectionFactory::new();

        let err = factory.get_replication_connection(&settings).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(factory.engine_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_creation_errors_name_the_target() {
        init_test_tracing();

        let params = ConnectionParams {
            host: Some("localhost".to_string()),
            port: Some("postgres".to_string()),
            database: Some("analytics".to_string()),
            user: Some("u".to_string()),
            password: Some(SecretString::new("p".to_string())),
            ..Default::default()
        };

        let err = create_postgres_engine(&params, Some("staging")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DatabaseConnectionError);
        assert_eq!(
            err.detail(),
            Some("Failed to create PostgreSQL connection to analytics.staging")
        );
        assert!(err.source().is_some());
    }
}
