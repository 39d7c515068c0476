//! Shared configuration types for the dental ETL pipeline.

mod base;
mod connection;
mod pipeline;
mod tables;

pub use base::ValidationError;
pub use connection::{
    ConnectionParams, DatabaseEnvVars, DatabaseType, PgSessionOptions, PostgresSchema,
};
pub use pipeline::{
    ConnectionsConfig, GeneralConfig, MonitoringConfig, PipelineConfig, PoolSettings, StageConfig,
};
pub use tables::{
    ExtractionStrategy, TableConfig, TableImportance, TableMonitoring, TablesMetadata,
};
