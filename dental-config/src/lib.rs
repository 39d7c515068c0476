//! Environment-aware configuration for the dental ETL pipeline.
//!
//! Resolves connection parameters for the source, replication and analytics databases with the
//! prefix of the selected [`Environment`], and exposes the pipeline and table settings loaded from
//! the configuration directory.

mod environment;
mod error;
mod load;
mod provider;
mod reader;
mod settings;
pub mod shared;

pub use environment::{ETL_ENVIRONMENT_ENV_NAME, Environment};
pub use error::ConfigError;
pub use load::{
    CONFIGURATION_DIR, PIPELINE_CONFIG_FILE, TABLES_CONFIG_FILE, default_config_dir,
    default_env_file, load_tables_file, load_yaml_file,
};
pub use provider::{ConfigNamespace, ConfigProvider, DictConfigProvider, FileConfigProvider};
pub use reader::{
    ConfigReader, ConfigurationIssues, ConfigurationSummary, DEFAULT_LARGE_TABLE_THRESHOLD_MB,
    SizeRanges,
};
pub use settings::Settings;
