use std::path::PathBuf;

use thiserror::Error;

use crate::provider::ConfigNamespace;

/// Errors that can occur while resolving environment, pipeline and table configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `ETL_ENVIRONMENT` is not set. There is deliberately no fallback.
    #[error(
        "`ETL_ENVIRONMENT` is not set; set it to `production` or `test` before running the pipeline"
    )]
    MissingEnvironment,

    /// `ETL_ENVIRONMENT` holds an unsupported value.
    #[error("`{0}` is not a supported environment; use either `production` or `test`")]
    InvalidEnvironment(String),

    /// Failed to determine the current working directory.
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    /// The tables configuration file does not exist.
    #[error("tables configuration file `{path}` not found")]
    TablesFileNotFound { path: PathBuf },

    /// The tables configuration file exists but could not be read.
    #[error("failed to read tables configuration file `{path}`: {source}")]
    TablesFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The tables configuration file is not valid YAML.
    #[error("failed to parse tables configuration file `{path}`: {source}")]
    TablesFileParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The `tables` key does not hold a mapping of table names to table settings.
    #[error("`tables` in `{path}` must map table names to table settings")]
    InvalidTablesKey { path: PathBuf },

    /// The tables configuration file is empty or lacks the top-level `tables` key.
    #[error("tables configuration file `{path}` is empty or has no `tables` key")]
    MissingTablesKey { path: PathBuf },

    /// A table entry has fields whose types do not match the expected schema.
    #[error("invalid configuration for table `{table}` in `{path}`: {source}")]
    InvalidTableEntry {
        path: PathBuf,
        table: String,
        #[source]
        source: serde_json::Error,
    },

    /// The tables dependency graph contains a cycle.
    #[error("table dependencies form a cycle involving: {0}")]
    DependencyCycle(String),

    /// A YAML configuration file existed but could not be parsed.
    #[error("failed to load configuration file `{path}`: {source}")]
    FileLoad {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    /// An environment file existed but could not be read.
    #[error("failed to read environment file `{path}`: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenv::Error,
    },

    /// A configuration namespace could not be deserialized into its typed form.
    #[error("invalid `{namespace}` configuration: {source}")]
    Deserialization {
        namespace: ConfigNamespace,
        #[source]
        source: serde_json::Error,
    },

    /// A resolved connection variable has an invalid value.
    #[error("invalid value `{value}` for `{variable}`: {reason}")]
    InvalidVariable {
        variable: String,
        value: String,
        reason: String,
    },

    /// Connection variables required to build a connection string are not set.
    #[error("missing connection variables for the {database} database: {}", variables.join(", "))]
    MissingConnectionVariables {
        database: String,
        variables: Vec<String>,
    },

    /// A PostgreSQL schema name is not one of the analytics schemas.
    #[error("`{0}` is not a valid analytics schema; use raw, staging, intermediate or marts")]
    InvalidSchema(String),
}
