//! Reads table schemas from MySQL.

use chrono::Utc;
use md5::{Digest, Md5};
use sqlx::mysql::MySqlRow;
use sqlx::{ColumnIndex, MySql, Row};
use tracing::debug;

use crate::bail;
use crate::connection::{ConnectionManager, QueryParam};
use crate::error::{ErrorKind, EtlResult};
use crate::schema::quote::{quote_mysql_identifier, quote_mysql_like_literal};
use crate::types::{MySqlColumn, MySqlSchemaSnapshot, SCHEMA_ANALYSIS_VERSION, TableMetadata};

const TABLE_EXISTS_QUERY: &str = "
    SELECT COUNT(*) AS table_count
    FROM information_schema.tables
    WHERE table_schema = DATABASE()
    AND table_name = ?
";

const COLUMNS_QUERY: &str = "
    SELECT column_name, column_type, is_nullable, column_default, extra, column_comment, column_key
    FROM information_schema.columns
    WHERE table_schema = DATABASE()
    AND table_name = ?
    ORDER BY ordinal_position
";

/// Returns the hex encoded MD5 digest of a `CREATE TABLE` statement.
pub fn schema_hash(create_statement: &str) -> String {
    format!("{:x}", Md5::digest(create_statement.as_bytes()))
}

/// Builds a [`MySqlSchemaSnapshot`] of `table_name` from the database the manager is connected
/// to.
///
/// Fails with [`ErrorKind::SchemaValidationError`] when the table does not exist.
pub async fn extract_schema_snapshot(
    manager: &mut ConnectionManager<MySql>,
    table_name: &str,
) -> EtlResult<MySqlSchemaSnapshot> {
    let params = [QueryParam::from(table_name)];

    let rows = manager.execute_with_retry(TABLE_EXISTS_QUERY, &params).await?;
    let table_count = rows.first().and_then(|row| u64_value(row, 0)).unwrap_or(0);
    if table_count == 0 {
        bail!(
            ErrorKind::SchemaValidationError,
            "Table not found in source database",
            format!("table `{table_name}` does not exist")
        );
    }

    let query = format!("SHOW CREATE TABLE {}", quote_mysql_identifier(table_name));
    let rows = manager.execute_with_retry(&query, &[]).await?;
    let Some(create_statement) = rows.first().and_then(|row| text_value(row, 1)) else {
        bail!(
            ErrorKind::SchemaValidationError,
            "Table not found in source database",
            format!("SHOW CREATE TABLE returned no row for `{table_name}`")
        );
    };

    let query = format!(
        "SHOW TABLE STATUS LIKE {}",
        quote_mysql_like_literal(table_name)
    );
    let rows = manager.execute_with_retry(&query, &[]).await?;
    let metadata = rows.first().map(table_metadata).unwrap_or_default();

    let rows = manager.execute_with_retry(COLUMNS_QUERY, &params).await?;
    let columns: Vec<_> = rows.iter().map(mysql_column).collect();

    debug!(
        table_name,
        columns = columns.len(),
        engine = metadata.engine.as_deref(),
        "mysql schema extracted"
    );

    Ok(MySqlSchemaSnapshot {
        table_name: table_name.to_string(),
        schema_hash: schema_hash(&create_statement),
        create_statement,
        metadata,
        columns,
        analysis_timestamp: Utc::now(),
        analysis_version: SCHEMA_ANALYSIS_VERSION.to_string(),
    })
}

fn table_metadata(row: &MySqlRow) -> TableMetadata {
    let collation = text_value(row, "Collation");
    let charset = collation
        .as_deref()
        .and_then(|collation| collation.split('_').next())
        .map(str::to_string);

    TableMetadata {
        engine: text_value(row, "Engine"),
        charset,
        collation,
        auto_increment: u64_value(row, "Auto_increment"),
        row_count: u64_value(row, "Rows"),
    }
}

fn mysql_column(row: &MySqlRow) -> MySqlColumn {
    MySqlColumn {
        name: text_value(row, 0).unwrap_or_default(),
        column_type: text_value(row, 1).unwrap_or_default(),
        is_nullable: text_value(row, 2).is_some_and(|value| value.eq_ignore_ascii_case("YES")),
        default: text_value(row, 3),
        extra: text_value(row, 4).unwrap_or_default(),
        comment: text_value(row, 5).unwrap_or_default(),
        key_type: text_value(row, 6).unwrap_or_default(),
    }
}

/// Reads a textual column, accepting binary collations that only decode as bytes.
fn text_value<I>(row: &MySqlRow, index: I) -> Option<String>
where
    I: ColumnIndex<MySqlRow> + Copy,
{
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value;
    }

    row.try_get::<Option<Vec<u8>>, _>(index)
        .ok()
        .flatten()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Reads a numeric column whose reported type differs between MySQL versions.
fn u64_value<I>(row: &MySqlRow, index: I) -> Option<u64>
where
    I: ColumnIndex<MySqlRow> + Copy,
{
    if let Ok(value) = row.try_get::<Option<u64>, _>(index) {
        return value;
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.and_then(|value| u64::try_from(value).ok());
    }

    text_value(row, index).and_then(|value| value.trim().parse().ok())
}
