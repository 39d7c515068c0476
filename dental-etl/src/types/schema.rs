use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version tag written into every [`MySqlSchemaSnapshot`].
pub const SCHEMA_ANALYSIS_VERSION: &str = "4.0";

/// Table level metadata reported by `SHOW TABLE STATUS`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub engine: Option<String>,
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub auto_increment: Option<u64>,
    pub row_count: Option<u64>,
}

/// A column as reported by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MySqlColumn {
    pub name: String,
    /// Full column type, for example `varchar(255)` or `tinyint(3) unsigned`.
    pub column_type: String,
    pub is_nullable: bool,
    pub default: Option<String>,
    pub extra: String,
    pub comment: String,
    /// `PRI`, `UNI`, `MUL` or empty.
    pub key_type: String,
}

impl MySqlColumn {
    pub fn is_primary_key(&self) -> bool {
        self.key_type == "PRI"
    }
}

/// Snapshot of one MySQL table's schema.
///
/// A snapshot is built fresh on every extraction and is the only input of DDL generation and
/// schema verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MySqlSchemaSnapshot {
    pub table_name: String,
    pub create_statement: String,
    pub metadata: TableMetadata,
    pub columns: Vec<MySqlColumn>,
    /// Hex encoded MD5 of `create_statement`.
    pub schema_hash: String,
    pub analysis_timestamp: DateTime<Utc>,
    pub analysis_version: String,
}

/// PostgreSQL type families that row values are converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PgType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    DoublePrecision,
    Numeric,
    Character,
    Varchar,
    Text,
    Timestamp,
    Date,
    Time,
    Bit,
    Bytea,
    Jsonb,
}

impl PgType {
    /// Classifies a PostgreSQL type name such as `character varying(255)` or `numeric(10,2)`.
    ///
    /// Unknown names are treated as `text`.
    pub fn from_type_name(type_name: &str) -> PgType {
        let lowered = type_name.trim().to_lowercase();
        let base = lowered
            .split('(')
            .next()
            .unwrap_or_default()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        match base.as_str() {
            "boolean" | "bool" => PgType::Boolean,
            "smallint" | "int2" => PgType::SmallInt,
            "integer" | "int" | "int4" => PgType::Integer,
            "bigint" | "int8" => PgType::BigInt,
            "real" | "float4" => PgType::Real,
            "double precision" | "float8" => PgType::DoublePrecision,
            "numeric" | "decimal" => PgType::Numeric,
            "character" | "char" | "bpchar" => PgType::Character,
            "character varying" | "varchar" => PgType::Varchar,
            "timestamp" | "timestamp without time zone" => PgType::Timestamp,
            "date" => PgType::Date,
            "time" | "time without time zone" => PgType::Time,
            "bit" => PgType::Bit,
            "bytea" => PgType::Bytea,
            "jsonb" | "json" => PgType::Jsonb,
            _ => PgType::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PgType::Boolean => "boolean",
            PgType::SmallInt => "smallint",
            PgType::Integer => "integer",
            PgType::BigInt => "bigint",
            PgType::Real => "real",
            PgType::DoublePrecision => "double precision",
            PgType::Numeric => "numeric",
            PgType::Character => "character",
            PgType::Varchar => "character varying",
            PgType::Text => "text",
            PgType::Timestamp => "timestamp",
            PgType::Date => "date",
            PgType::Time => "time",
            PgType::Bit => "bit",
            PgType::Bytea => "bytea",
            PgType::Jsonb => "jsonb",
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, PgType::Character | PgType::Varchar | PgType::Text)
    }
}

impl fmt::Display for PgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved PostgreSQL type of every column of a table, in column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnTypes {
    pub table_name: String,
    pub columns: Vec<(String, PgType)>,
}

impl ColumnTypes {
    pub fn new(table_name: impl Into<String>, columns: Vec<(String, PgType)>) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
        }
    }

    pub fn get(&self, column: &str) -> Option<PgType> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, pg_type)| *pg_type)
    }
}

/// Outcome of comparing a PostgreSQL table with the schema adapted from MySQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaVerification {
    /// Columns, order and types all match.
    Exact,
    /// Differences were found but tolerated because the pipeline runs in the test environment.
    MismatchTolerated(Vec<String>),
    /// Differences were found.
    Mismatch(Vec<String>),
}

impl SchemaVerification {
    /// Returns whether downstream loading may proceed.
    pub fn passed(&self) -> bool {
        !matches!(self, SchemaVerification::Mismatch(_))
    }

    /// Returns the differences that were found, if any.
    pub fn mismatches(&self) -> &[String] {
        match self {
            SchemaVerification::Exact => &[],
            SchemaVerification::MismatchTolerated(mismatches)
            | SchemaVerification::Mismatch(mismatches) => mismatches,
        }
    }
}
