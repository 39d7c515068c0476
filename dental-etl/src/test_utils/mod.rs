//! Helpers shared by unit and integration tests.

pub mod database;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use md5::{Digest, Md5};

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::schema::ColumnInspector;
use crate::schema::ddl::parse_create_table;
use crate::types::{MySqlColumn, MySqlSchemaSnapshot, SCHEMA_ANALYSIS_VERSION, TableMetadata};

/// [`ColumnInspector`] answering from in-memory column values.
///
/// Checking a column that was never registered fails, which exercises the fallback path of type
/// conversion.
#[derive(Debug, Default)]
pub struct StaticColumnInspector {
    columns: HashMap<(String, String), Vec<Option<i64>>>,
    inspections: AtomicUsize,
}

impl StaticColumnInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column<I>(mut self, table_name: &str, column_name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = Option<i64>>,
    {
        self.columns.insert(
            (table_name.to_string(), column_name.to_string()),
            values.into_iter().collect(),
        );
        self
    }

    /// Number of inspections answered or failed so far.
    pub fn inspection_count(&self) -> usize {
        self.inspections.load(Ordering::SeqCst)
    }
}

impl ColumnInspector for StaticColumnInspector {
    async fn is_boolean_column(&self, table_name: &str, column_name: &str) -> EtlResult<bool> {
        self.inspections.fetch_add(1, Ordering::SeqCst);

        let key = (table_name.to_string(), column_name.to_string());
        match self.columns.get(&key) {
            Some(values) => Ok(values
                .iter()
                .flatten()
                .all(|value| *value == 0 || *value == 1)),
            None => Err(etl_error!(
                ErrorKind::DatabaseQueryError,
                "Column does not exist",
                format!("unknown column `{table_name}`.`{column_name}`")
            )),
        }
    }
}

/// Builds a snapshot from a `CREATE TABLE` statement without touching a database.
///
/// Columns are derived from the statement; metadata is left empty.
///
/// # Panics
///
/// Panics if the statement cannot be parsed.
pub fn snapshot_from_create_statement(create_statement: &str) -> MySqlSchemaSnapshot {
    let parsed = parse_create_table(create_statement).expect("invalid CREATE TABLE statement");

    let columns = parsed
        .columns
        .iter()
        .map(|column| MySqlColumn {
            name: column.name.clone(),
            column_type: column.full_type(),
            is_nullable: !column.is_not_null(),
            default: None,
            extra: String::new(),
            comment: String::new(),
            key_type: if parsed.primary_key.contains(&column.name) {
                "PRI".to_string()
            } else {
                String::new()
            },
        })
        .collect();

    MySqlSchemaSnapshot {
        table_name: parsed.table_name,
        create_statement: create_statement.to_string(),
        metadata: TableMetadata::default(),
        columns,
        schema_hash: format!("{:x}", Md5::digest(create_statement.as_bytes())),
        analysis_timestamp: Utc::now(),
        analysis_version: SCHEMA_ANALYSIS_VERSION.to_string(),
    }
}
