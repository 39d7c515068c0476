//! Comparison of live PostgreSQL tables with the schema adapted from MySQL.

use dental_config::Environment;
use sqlx::{Postgres, Row};

use crate::connection::{ConnectionManager, QueryParam};
use crate::error::EtlResult;
use crate::schema::adapt::AdaptedColumn;
use crate::schema::types::normalize_type;
use crate::types::SchemaVerification;

const TABLE_COLUMNS_QUERY: &str = "
    SELECT a.attname::text AS column_name,
           format_type(a.atttypid, a.atttypmod) AS data_type
    FROM pg_catalog.pg_attribute a
    JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1
    AND c.relname = $2
    AND a.attnum > 0
    AND NOT a.attisdropped
    ORDER BY a.attnum
";

const TABLE_EXISTS_QUERY: &str = "
    SELECT EXISTS (
        SELECT 1
        FROM information_schema.tables
        WHERE table_schema = $1
        AND table_name = $2
    ) AS table_exists
";

/// A column of a live PostgreSQL table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgColumn {
    pub name: String,
    /// Type as rendered by `format_type`, for example `character varying(255)`.
    pub data_type: String,
}

/// Returns whether `schema.table_name` exists.
pub async fn postgres_table_exists(
    manager: &mut ConnectionManager<Postgres>,
    schema: &str,
    table_name: &str,
) -> EtlResult<bool> {
    let params = [QueryParam::from(schema), QueryParam::from(table_name)];
    let rows = manager.execute_with_retry(TABLE_EXISTS_QUERY, &params).await?;

    match rows.first() {
        Some(row) => Ok(row.try_get("table_exists")?),
        None => Ok(false),
    }
}

/// Returns the columns of `schema.table_name` in attribute order.
pub async fn fetch_postgres_columns(
    manager: &mut ConnectionManager<Postgres>,
    schema: &str,
    table_name: &str,
) -> EtlResult<Vec<PgColumn>> {
    let params = [QueryParam::from(schema), QueryParam::from(table_name)];
    let rows = manager
        .execute_with_retry(TABLE_COLUMNS_QUERY, &params)
        .await?;

    rows.iter()
        .map(|row| -> EtlResult<PgColumn> {
            Ok(PgColumn {
                name: row.try_get("column_name")?,
                data_type: row.try_get("data_type")?,
            })
        })
        .collect()
}

/// Lists the differences between the expected and the actual columns.
///
/// Column count, column order and normalized types are compared. An empty list means the
/// table matches.
pub fn compare_columns(expected: &[AdaptedColumn], actual: &[PgColumn]) -> Vec<String> {
    let mut mismatches = Vec::new();

    if expected.len() != actual.len() {
        mismatches.push(format!(
            "column count differs: expected {}, found {}",
            expected.len(),
            actual.len()
        ));
    }

    for (position, (expected, actual)) in expected.iter().zip(actual).enumerate() {
        if expected.name != actual.name {
            mismatches.push(format!(
                "column {} differs: expected `{}`, found `{}`",
                position + 1,
                expected.name,
                actual.name
            ));
            continue;
        }

        let expected_type = normalize_type(&expected.pg_type);
        let actual_type = normalize_type(&actual.data_type);
        if expected_type != actual_type {
            mismatches.push(format!(
                "column `{}` type differs: expected `{expected_type}`, found `{actual_type}`",
                expected.name
            ));
        }
    }

    mismatches
}

/// Turns a list of differences into a verification outcome.
///
/// Differences are tolerated in the test environment and fail verification otherwise.
pub fn verification_outcome(
    mismatches: Vec<String>,
    environment: Environment,
) -> SchemaVerification {
    if mismatches.is_empty() {
        SchemaVerification::Exact
    } else if environment.is_test() {
        SchemaVerification::MismatchTolerated(mismatches)
    } else {
        SchemaVerification::Mismatch(mismatches)
    }
}
