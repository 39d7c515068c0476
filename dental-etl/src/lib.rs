//! Schema conversion and connection core of the dental ETL pipeline.
//!
//! Copies table schemas from the OpenDental MySQL replication database into the PostgreSQL
//! analytics warehouse. [`connection::ConnectionFactory`] hands out one pooled engine per database
//! and environment, [`schema::SchemaConverter`] turns MySQL `CREATE TABLE` statements into
//! PostgreSQL tables and [`conversions`] coerces row values to the resulting column types.

pub mod connection;
pub mod conversions;
pub mod error;
mod macros;
pub mod schema;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
