use std::future::Future;
use std::time::Duration;

use sqlx::encode::Encode;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{Database, Executor, MySql, Pool, Postgres, Type};
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;

/// Default number of attempts made by [`ConnectionManager::execute_with_retry`].
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default base delay between attempts, multiplied by the attempt number.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Default minimum spacing between two queries.
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_millis(100);

/// A positional query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for QueryParam {
    fn from(value: bool) -> Self {
        QueryParam::Bool(value)
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        QueryParam::Int(value)
    }
}

impl From<f64> for QueryParam {
    fn from(value: f64) -> Self {
        QueryParam::Float(value)
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        QueryParam::Text(value.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(value: String) -> Self {
        QueryParam::Text(value)
    }
}

/// Databases a [`ConnectionManager`] can run queries against.
pub trait ManagedDatabase: Database {
    /// Name used in logs.
    const LABEL: &'static str;

    /// Runs `query` on `connection` and returns every row.
    ///
    /// Queries without parameters go through the text protocol so that statements which cannot
    /// be prepared, such as `SHOW CREATE TABLE`, work.
    fn fetch_all<'c>(
        connection: &'c mut PoolConnection<Self>,
        query: &'c str,
        params: &'c [QueryParam],
    ) -> impl Future<Output = Result<Vec<Self::Row>, sqlx::Error>> + Send + 'c;
}

fn bind_params<'q, DB>(
    mut query: Query<'q, DB, <DB as Database>::Arguments<'q>>,
    params: &'q [QueryParam],
) -> Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    Option<&'q str>: Encode<'q, DB> + Type<DB>,
{
    for param in params {
        query = match param {
            QueryParam::Null => query.bind(None::<&'q str>),
            QueryParam::Bool(value) => query.bind(*value),
            QueryParam::Int(value) => query.bind(*value),
            QueryParam::Float(value) => query.bind(*value),
            QueryParam::Text(value) => query.bind(value.as_str()),
        };
    }

    query
}

impl ManagedDatabase for MySql {
    const LABEL: &'static str = "MySQL";

    fn fetch_all<'c>(
        connection: &'c mut PoolConnection<Self>,
        query: &'c str,
        params: &'c [QueryParam],
    ) -> impl Future<Output = Result<Vec<Self::Row>, sqlx::Error>> + Send + 'c {
        let connection: &'c mut <Self as Database>::Connection = &mut **connection;

        if params.is_empty() {
            Executor::fetch_all(connection, query)
        } else {
            Executor::fetch_all(connection, bind_params(sqlx::query(query), params))
        }
    }
}

impl ManagedDatabase for Postgres {
    const LABEL: &'static str = "PostgreSQL";

    fn fetch_all<'c>(
        connection: &'c mut PoolConnection<Self>,
        query: &'c str,
        params: &'c [QueryParam],
    ) -> impl Future<Output = Result<Vec<Self::Row>, sqlx::Error>> + Send + 'c {
        let connection: &'c mut <Self as Database>::Connection = &mut **connection;

        if params.is_empty() {
            Executor::fetch_all(connection, query)
        } else {
            Executor::fetch_all(connection, bind_params(sqlx::query(query), params))
        }
    }
}

/// Retry and rate limiting settings of a [`ConnectionManager`].
#[derive(Debug, Clone, Copy)]
pub struct ConnectionManagerConfig {
    /// Total number of attempts per query, at least one is always made.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub rate_limit: Duration,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            rate_limit: DEFAULT_RATE_LIMIT,
        }
    }
}

/// Keeps one pooled connection open across a burst of sequential queries.
///
/// The connection is acquired lazily by the first query and returned to the pool by
/// [`ConnectionManager::close_connection`], after a failed query, or when the manager is
/// dropped. A manager is owned by a single task and is not meant to be shared.
#[derive(Debug)]
pub struct ConnectionManager<DB: ManagedDatabase> {
    pool: Pool<DB>,
    connection: Option<PoolConnection<DB>>,
    config: ConnectionManagerConfig,
    last_query_at: Option<Instant>,
    query_count: u64,
}

impl<DB: ManagedDatabase> ConnectionManager<DB> {
    pub fn new(pool: Pool<DB>) -> Self {
        Self::with_config(pool, ConnectionManagerConfig::default())
    }

    pub fn with_config(pool: Pool<DB>, config: ConnectionManagerConfig) -> Self {
        Self {
            pool,
            connection: None,
            config,
            last_query_at: None,
            query_count: 0,
        }
    }

    /// Runs `f` with a fresh manager and closes its connection afterwards.
    pub async fn scoped<T>(pool: Pool<DB>, f: impl AsyncFnOnce(&mut Self) -> T) -> T {
        let mut manager = Self::new(pool);
        let output = f(&mut manager).await;
        manager.close_connection();

        output
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Number of queries that completed successfully.
    pub fn query_count(&self) -> u64 {
        self.query_count
    }

    /// Returns the cached connection, acquiring one from the pool if none is open.
    pub async fn get_connection(&mut self) -> EtlResult<&mut PoolConnection<DB>> {
        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                let connection = self.pool.acquire().await.map_err(|err| {
                    EtlError::from(err).with_operation("get_connection")
                })?;
                debug!(database = DB::LABEL, "connection opened");

                connection
            }
        };

        Ok(self.connection.insert(connection))
    }

    /// Returns the open connection to the pool. Does nothing when no connection is open.
    pub fn close_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            drop(connection);
            debug!(
                database = DB::LABEL,
                queries = self.query_count,
                "connection closed"
            );
        }
    }

    /// Runs a query, retrying failures with a linearly growing delay.
    ///
    /// Consecutive queries are spaced by at least the configured rate limit. After a failure the
    /// connection is discarded so that the next attempt starts on a fresh one. The error of the
    /// last attempt is returned when every attempt fails.
    pub async fn execute_with_retry(
        &mut self,
        query: &str,
        params: &[QueryParam],
    ) -> EtlResult<Vec<DB::Row>> {
        self.apply_rate_limit().await;

        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            let result = match self.get_connection().await {
                Ok(connection) => DB::fetch_all(connection, query, params)
                    .await
                    .map_err(EtlError::from),
                Err(err) => Err(err),
            };
            self.last_query_at = Some(Instant::now());

            match result {
                Ok(rows) => {
                    self.query_count += 1;
                    return Ok(rows);
                }
                Err(err) => {
                    warn!(
                        database = DB::LABEL,
                        attempt = attempt + 1,
                        attempts,
                        error = %err.description(),
                        detail = err.detail().unwrap_or_default(),
                        "query failed"
                    );
                    self.close_connection();
                    last_error = Some(err);

                    if attempt + 1 < attempts {
                        sleep(self.config.retry_delay * (attempt + 1)).await;
                    }
                }
            }
        }

        let err = last_error.unwrap_or_else(|| {
            etl_error!(
                ErrorKind::DatabaseQueryError,
                "Query was not attempted",
                query.to_string()
            )
        });

        Err(err
            .with_operation("execute_with_retry")
            .with_detail_field("attempts", attempts))
    }

    async fn apply_rate_limit(&self) {
        if let Some(last_query_at) = self.last_query_at {
            let elapsed = last_query_at.elapsed();
            if elapsed < self.config.rate_limit {
                sleep(self.config.rate_limit - elapsed).await;
            }
        }
    }
}

impl<DB: ManagedDatabase> Drop for ConnectionManager<DB> {
    fn drop(&mut self) {
        self.close_connection();
    }
}

#[cfg(test)]
mod tests {
    use dental_telemetry::tracing::init_test_tracing;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

    use super::*;

    /// A pool pointing at a port nothing listens on.
    fn unreachable_pool() -> Pool<Postgres> {
        let options = PgConnectOptions::new()
            .host("127.0.0.1")
            .port(1)
            .username("nobody")
            .database("nothing");

        PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy_with(options)
    }

    fn fast_config() -> ConnectionManagerConfig {
        ConnectionManagerConfig {
            max_retries: 3,
            retry_delay: Duration::from_millis(10),
            rate_limit: Duration::from_millis(10),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_without_connection_is_a_noop() {
        init_test_tracing();

        let mut manager = ConnectionManager::with_config(unreachable_pool(), fast_config());
        assert!(!manager.is_connected());

        manager.close_connection();
        manager.close_connection();
        assert!(!manager.is_connected());
        assert_eq!(manager.query_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failing_query_returns_last_error_after_retries() {
        init_test_tracing();

        let mut manager = ConnectionManager::with_config(unreachable_pool(), fast_config());

        let started = Instant::now();
        let err = manager
            .execute_with_retry("SELECT 1", &[])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DatabaseConnectionError);
        assert_eq!(err.operation(), Some("execute_with_retry"));
        assert_eq!(err.details()["attempts"], 3);
        assert!(!manager.is_connected());
        assert_eq!(manager.query_count(), 0);
        // Backoff between the three attempts is 10ms + 20ms.
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
