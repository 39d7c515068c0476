//! Pooled engines for the source, replication and analytics databases, and a manager that keeps
//! one connection open across bursts of queries.

mod factory;
mod manager;

pub use factory::{
    ConnectionFactory, DEFAULT_POSTGRES_SCHEMA, Engine, create_mysql_engine,
    create_postgres_engine, resolve_postgres_schema, validate_connection_params,
};
pub use manager::{
    ConnectionManager, ConnectionManagerConfig, DEFAULT_MAX_RETRIES, DEFAULT_RATE_LIMIT,
    DEFAULT_RETRY_DELAY, ManagedDatabase, QueryParam,
};
