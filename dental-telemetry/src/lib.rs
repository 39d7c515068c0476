//! Tracing setup for the dental ETL binaries and tests.

pub mod tracing;
