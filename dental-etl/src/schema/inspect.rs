use std::future::Future;

use sqlx::{MySql, MySqlPool, Row};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::connection::{ConnectionManager, ConnectionManagerConfig};
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::schema::quote::quote_mysql_identifier;
use crate::schema::types::{is_tinyint, map_mysql_type};

/// How much of a column the boolean check looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InspectionSampling {
    /// Every row is considered.
    #[default]
    Full,
    /// Only the first `n` non-null values are considered.
    Sampled(u64),
}

/// Inspects column data to refine the static type mapping.
pub trait ColumnInspector: Send + Sync {
    /// Returns whether every non-null value of the column is `0` or `1`.
    fn is_boolean_column(
        &self,
        table_name: &str,
        column_name: &str,
    ) -> impl Future<Output = EtlResult<bool>> + Send;
}

/// [`ColumnInspector`] that queries the MySQL table.
///
/// Checks run one at a time and return their connection to the pool once they complete.
#[derive(Debug)]
pub struct MySqlColumnInspector {
    manager: Mutex<ConnectionManager<MySql>>,
    sampling: InspectionSampling,
}

impl MySqlColumnInspector {
    pub fn new(pool: MySqlPool, sampling: InspectionSampling) -> Self {
        Self::with_config(pool, sampling, ConnectionManagerConfig::default())
    }

    pub fn with_config(
        pool: MySqlPool,
        sampling: InspectionSampling,
        config: ConnectionManagerConfig,
    ) -> Self {
        Self {
            manager: Mutex::new(ConnectionManager::with_config(pool, config)),
            sampling,
        }
    }

    pub fn sampling(&self) -> InspectionSampling {
        self.sampling
    }
}

/// Builds the query returning `1` when the column holds a value other than `0`, `1` or `NULL`.
pub fn boolean_check_query(table_name: &str, column_name: &str, sampling: InspectionSampling) -> String {
    let table = quote_mysql_identifier(table_name);
    let column = quote_mysql_identifier(column_name);

    match sampling {
        InspectionSampling::Full => format!(
            "SELECT CAST(EXISTS(SELECT 1 FROM {table} WHERE {column} IS NOT NULL AND {column} NOT IN (0, 1) LIMIT 1) AS SIGNED) AS has_non_boolean"
        ),
        InspectionSampling::Sampled(limit) => format!(
            "SELECT CAST(EXISTS(SELECT 1 FROM (SELECT {column} FROM {table} WHERE {column} IS NOT NULL LIMIT {limit}) AS sample WHERE sample.{column} NOT IN (0, 1)) AS SIGNED) AS has_non_boolean"
        ),
    }
}

impl ColumnInspector for MySqlColumnInspector {
    async fn is_boolean_column(&self, table_name: &str, column_name: &str) -> EtlResult<bool> {
        let query = boolean_check_query(table_name, column_name, self.sampling);

        let rows = {
            let mut manager = self.manager.lock().await;
            let rows = manager.execute_with_retry(&query, &[]).await;
            manager.close_connection();

            rows?
        };

        let Some(row) = rows.first() else {
            return Err(etl_error!(
                ErrorKind::DatabaseQueryError,
                "Boolean check returned no rows",
                format!("boolean check of `{table_name}`.`{column_name}` returned no rows")
            ));
        };

        let has_non_boolean: i64 = row.try_get(0)?;

        Ok(has_non_boolean == 0)
    }
}

/// Maps a MySQL column type to a PostgreSQL type, probing the data of `TINYINT` columns.
///
/// With a `(table, column)` context a `TINYINT` column holding only `0`, `1` and `NULL` maps to
/// `boolean` and any other `TINYINT` column to `smallint`. A failing inspector is logged and the
/// static mapping is used instead.
pub async fn convert_mysql_type<P>(
    column_type: &str,
    context: Option<(&str, &str)>,
    inspector: &P,
) -> String
where
    P: ColumnInspector,
{
    if let Some((table_name, column_name)) = context
        && is_tinyint(column_type)
    {
        match inspector.is_boolean_column(table_name, column_name).await {
            Ok(true) => {
                debug!(table_name, column_name, "tinyint column holds boolean values");
                return "boolean".to_string();
            }
            Ok(false) => return "smallint".to_string(),
            Err(err) => {
                warn!(
                    table_name,
                    column_name,
                    error = %err.description(),
                    detail = err.detail().unwrap_or_default(),
                    "boolean detection failed, using static type mapping"
                );
            }
        }
    }

    map_mysql_type(column_type)
}
