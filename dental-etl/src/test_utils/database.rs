//! Throwaway MySQL and PostgreSQL databases for tests that run against live servers.
//!
//! Server locations are read from the environment:
//! - `TESTS_MYSQL_HOST`, `TESTS_MYSQL_PORT`, `TESTS_MYSQL_USERNAME`, `TESTS_MYSQL_PASSWORD`
//! - `TESTS_DATABASE_HOST`, `TESTS_DATABASE_PORT`, `TESTS_DATABASE_USERNAME`,
//!   `TESTS_DATABASE_PASSWORD` for PostgreSQL
//!
//! Every spawned database gets a unique name so tests can run in parallel.

use std::sync::Arc;
use std::time::Duration;

use dental_config::{DictConfigProvider, Environment, Settings};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, Executor, MySqlConnection, MySqlPool, PgConnection, PgPool};
use uuid::Uuid;

/// Location of a test database server and the name of the database created on it.
#[derive(Debug, Clone)]
pub struct TestDatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub name: String,
}

impl TestDatabaseConfig {
    fn from_env(prefix: &str) -> Self {
        let var = |suffix: &str| {
            let key = format!("{prefix}_{suffix}");
            std::env::var(&key).unwrap_or_else(|_| panic!("{key} must be set"))
        };

        Self {
            host: var("HOST"),
            port: var("PORT")
                .parse()
                .unwrap_or_else(|_| panic!("{prefix}_PORT must be a valid port number")),
            username: var("USERNAME"),
            password: var("PASSWORD"),
            // Generate unique database name for test isolation
            name: format!("dental_test_{}", Uuid::new_v4().simple()),
        }
    }

    fn mysql_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
    }

    fn pg_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
    }

    /// Environment variables pointing the `prefix` connection at this database.
    fn env_vars(&self, prefix: &str) -> Vec<(String, String)> {
        vec![
            (format!("{prefix}_HOST"), self.host.clone()),
            (format!("{prefix}_PORT"), self.port.to_string()),
            (format!("{prefix}_DB"), self.name.clone()),
            (format!("{prefix}_USER"), self.username.clone()),
            (format!("{prefix}_PASSWORD"), self.password.clone()),
        ]
    }
}

/// Returns the configuration of a new MySQL test database, which is not created yet.
pub fn local_mysql_config() -> TestDatabaseConfig {
    TestDatabaseConfig::from_env("TESTS_MYSQL")
}

/// Returns the configuration of a new PostgreSQL test database, which is not created yet.
pub fn local_pg_config() -> TestDatabaseConfig {
    TestDatabaseConfig::from_env("TESTS_DATABASE")
}

/// Creates the MySQL database named in `config` and returns a pool connected to it.
///
/// # Panics
///
/// Panics if connecting or creating the database fails.
pub async fn create_mysql_database(config: &TestDatabaseConfig) -> MySqlPool {
    let mut connection = MySqlConnection::connect_with(&config.mysql_options())
        .await
        .expect("Failed to connect to MySQL");
    connection
        .execute(&*format!("CREATE DATABASE `{}`", config.name))
        .await
        .expect("Failed to create database");

    MySqlPool::connect_with(config.mysql_options().database(&config.name))
        .await
        .expect("Failed to connect to MySQL database")
}

/// Drops the MySQL database named in `config`.
///
/// Errors are printed and otherwise ignored so cleanup never fails a test.
pub async fn drop_mysql_database(config: &TestDatabaseConfig) {
    let mut connection = match MySqlConnection::connect_with(&config.mysql_options()).await {
        Ok(connection) => connection,
        Err(e) => {
            eprintln!("warning: failed to connect to MySQL for cleanup: {e}");
            return;
        }
    };

    if let Err(e) = connection
        .execute(&*format!("DROP DATABASE IF EXISTS `{}`", config.name))
        .await
    {
        eprintln!("warning: failed to drop database {}: {}", config.name, e);
    }
}

/// Creates the PostgreSQL database named in `config` and returns a pool connected to it.
///
/// # Panics
///
/// Panics if connecting or creating the database fails.
pub async fn create_pg_database(config: &TestDatabaseConfig) -> PgPool {
    let mut connection = PgConnection::connect_with(&config.pg_options().database("postgres"))
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"create database "{}";"#, config.name))
        .await
        .expect("Failed to create database");

    PgPool::connect_with(config.pg_options().database(&config.name))
        .await
        .expect("Failed to connect to Postgres")
}

/// Drops the PostgreSQL database named in `config` after terminating its connections.
///
/// Errors are printed and otherwise ignored so cleanup never fails a test.
pub async fn drop_pg_database(config: &TestDatabaseConfig) {
    let mut connection =
        match PgConnection::connect_with(&config.pg_options().database("postgres")).await {
            Ok(connection) => connection,
            Err(e) => {
                eprintln!("warning: failed to connect to Postgres for cleanup: {e}");
                return;
            }
        };

    if let Err(e) = connection
        .execute(&*format!(
            r#"
            select pg_terminate_backend(pg_stat_activity.pid)
            from pg_stat_activity
            where pg_stat_activity.datname = '{}'
            and pid <> pg_backend_pid();"#,
            config.name
        ))
        .await
    {
        eprintln!(
            "warning: failed to terminate connections for database {}: {}",
            config.name, e
        );
    }

    if let Err(e) = connection
        .execute(&*format!(r#"drop database if exists "{}";"#, config.name))
        .await
    {
        eprintln!("warning: failed to drop database {}: {}", config.name, e);
    }
}

/// Connects a pool limited to one connection to the existing MySQL database named in `config`.
///
/// Acquiring times out after two seconds, so a connection that is never returned fails the test
/// instead of hanging it.
///
/// # Panics
///
/// Panics if the connection cannot be established.
pub async fn connect_single_mysql(config: &TestDatabaseConfig) -> MySqlPool {
    MySqlPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(2))
        .connect_with(config.mysql_options().database(&config.name))
        .await
        .expect("Failed to connect to MySQL database")
}

/// Connects a pool limited to one connection to the existing PostgreSQL database named in
/// `config`.
///
/// # Panics
///
/// Panics if the connection cannot be established.
pub async fn connect_single_pg(config: &TestDatabaseConfig) -> PgPool {
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(2))
        .connect_with(config.pg_options().database(&config.name))
        .await
        .expect("Failed to connect to Postgres")
}

/// A fresh MySQL replication database and PostgreSQL analytics database with matching
/// test environment [`Settings`].
///
/// The OpenDental source and the MySQL replication connections both point at the MySQL database.
pub struct TestDatabases {
    pub mysql: TestDatabaseConfig,
    pub postgres: TestDatabaseConfig,
    pub settings: Settings,
}

impl TestDatabases {
    /// Drops both databases.
    pub async fn cleanup(self) {
        drop_mysql_database(&self.mysql).await;
        drop_pg_database(&self.postgres).await;
    }
}

/// Creates a MySQL and a PostgreSQL database with unique names.
///
/// # Panics
///
/// Panics if either database cannot be created or the settings cannot be built.
pub async fn spawn_test_databases() -> TestDatabases {
    let mysql = local_mysql_config();
    let postgres = local_pg_config();

    create_mysql_database(&mysql).await.close().await;
    create_pg_database(&postgres).await.close().await;

    let mut vars = mysql.env_vars("TEST_OPENDENTAL_SOURCE");
    vars.extend(mysql.env_vars("TEST_MYSQL_REPLICATION"));
    vars.extend(postgres.env_vars("TEST_POSTGRES_ANALYTICS"));
    let provider = DictConfigProvider::new().with_env(vars);
    let settings = Settings::new(Environment::Test, Arc::new(provider))
        .expect("failed to build test settings");

    TestDatabases {
        mysql,
        postgres,
        settings,
    }
}
