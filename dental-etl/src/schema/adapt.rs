//! Generation of PostgreSQL `CREATE TABLE` statements from MySQL schema snapshots.

use tracing::debug;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::schema::ddl::parse_create_table;
use crate::schema::inspect::{ColumnInspector, convert_mysql_type};
use crate::schema::quote::quote_pg_identifier;
use crate::types::MySqlSchemaSnapshot;

/// A MySQL column together with the PostgreSQL type it converts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptedColumn {
    pub name: String,
    pub mysql_type: String,
    pub pg_type: String,
}

/// Columns and primary key of a table converted to PostgreSQL types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptedTable {
    pub columns: Vec<AdaptedColumn>,
    pub primary_key: Vec<String>,
}

/// Parses the snapshot's `CREATE TABLE` statement and converts every column type.
///
/// `TINYINT` columns are inspected through `inspector`. Fails with
/// [`ErrorKind::SchemaTransformationError`] when no column can be extracted.
pub async fn adapt_columns<P>(
    table_name: &str,
    snapshot: &MySqlSchemaSnapshot,
    inspector: &P,
) -> EtlResult<AdaptedTable>
where
    P: ColumnInspector,
{
    let parsed = parse_create_table(&snapshot.create_statement)
        .map_err(|err| err.with_table(table_name).with_operation("adapt_schema"))?;

    if parsed.columns.is_empty() {
        return Err(etl_error!(
            ErrorKind::SchemaTransformationError,
            "No columns found in CREATE TABLE statement",
            format!("CREATE TABLE statement of `{table_name}` defines no columns")
        )
        .with_table(table_name)
        .with_operation("adapt_schema"));
    }

    let mut columns = Vec::with_capacity(parsed.columns.len());
    for column in &parsed.columns {
        let mysql_type = column.full_type();
        let pg_type =
            convert_mysql_type(&mysql_type, Some((table_name, column.name.as_str())), inspector).await;

        columns.push(AdaptedColumn {
            name: column.name.clone(),
            mysql_type,
            pg_type,
        });
    }

    Ok(AdaptedTable {
        columns,
        primary_key: parsed.primary_key,
    })
}

/// Renders a `CREATE TABLE "schema"."table"` statement.
pub fn render_create_table(schema: &str, table_name: &str, table: &AdaptedTable) -> String {
    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|column| format!("    {} {}", quote_pg_identifier(&column.name), column.pg_type))
        .collect();

    if !table.primary_key.is_empty() {
        let key_columns = table
            .primary_key
            .iter()
            .map(|column| quote_pg_identifier(column))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("    PRIMARY KEY ({key_columns})"));
    }

    format!(
        "CREATE TABLE {}.{} (\n{}\n)",
        quote_pg_identifier(schema),
        quote_pg_identifier(table_name),
        lines.join(",\n")
    )
}

/// Converts the snapshot of `table_name` into a PostgreSQL `CREATE TABLE` statement in `schema`.
pub async fn adapt_schema<P>(
    schema: &str,
    table_name: &str,
    snapshot: &MySqlSchemaSnapshot,
    inspector: &P,
) -> EtlResult<String>
where
    P: ColumnInspector,
{
    let table = adapt_columns(table_name, snapshot, inspector).await?;
    let ddl = render_create_table(schema, table_name, &table);

    debug!(
        table_name,
        schema,
        columns = table.columns.len(),
        "postgres ddl generated"
    );

    Ok(ddl)
}
