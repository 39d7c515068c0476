//! Conversion of MySQL table schemas into PostgreSQL tables.
//!
//! Schemas are read from MySQL as [`crate::types::MySqlSchemaSnapshot`] values, their
//! `CREATE TABLE` statements are parsed by [`ddl`], column types are mapped by [`types`] with
//! data inspection for `TINYINT` columns, and the resulting tables are created and verified by
//! [`SchemaConverter`].

mod adapt;
mod converter;
pub mod ddl;
mod inspect;
mod mysql;
pub mod quote;
pub mod types;
mod verify;

pub use adapt::{AdaptedColumn, AdaptedTable, adapt_columns, adapt_schema, render_create_table};
pub use converter::SchemaConverter;
pub use inspect::{
    ColumnInspector, InspectionSampling, MySqlColumnInspector, boolean_check_query,
    convert_mysql_type,
};
pub use mysql::{extract_schema_snapshot, schema_hash};
pub use types::{map_mysql_type, normalize_type};
pub use verify::{
    PgColumn, compare_columns, fetch_postgres_columns, postgres_table_exists,
    verification_outcome,
};
