use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::environment::Environment;
use crate::error::ConfigError;

/// Directory containing configuration files relative to application root.
pub const CONFIGURATION_DIR: &str = "config";

/// File holding the pipeline settings inside [`CONFIGURATION_DIR`].
pub const PIPELINE_CONFIG_FILE: &str = "pipeline.yml";

/// File holding the per-table extraction settings inside [`CONFIGURATION_DIR`].
pub const TABLES_CONFIG_FILE: &str = "tables.yml";

/// Parses a YAML settings file into a dynamic JSON value.
///
/// Keys are lowercased, so this is only suitable for files whose keys are fixed setting names.
/// An empty document yields an empty object.
pub fn load_yaml_file(path: &Path) -> Result<Value, config::ConfigError> {
    let source = config::File::from(path.to_path_buf())
        .format(config::FileFormat::Yaml)
        .required(true);

    config::Config::builder()
        .add_source(source)
        .build()?
        .try_deserialize::<Value>()
}

/// Parses a tables configuration file into a dynamic JSON value, keeping table names as written.
///
/// An empty document yields an empty object.
pub fn load_tables_file(path: &Path) -> Result<Value, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::TablesFileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let parse_error = |source: serde_yaml::Error| ConfigError::TablesFileParse {
        path: path.to_path_buf(),
        source,
    };
    let document: serde_yaml::Value = serde_yaml::from_str(&contents).map_err(parse_error)?;
    if document.is_null() {
        return Ok(Value::Object(Map::new()));
    }

    serde_yaml::from_value(document).map_err(parse_error)
}

/// Returns the configuration directory below the current working directory.
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    let base_path = std::env::current_dir().map_err(ConfigError::CurrentDir)?;

    Ok(base_path.join(CONFIGURATION_DIR))
}

/// Returns the `.env_{environment}` file below the current working directory.
pub fn default_env_file(environment: Environment) -> Result<PathBuf, ConfigError> {
    let base_path = std::env::current_dir().map_err(ConfigError::CurrentDir)?;

    Ok(base_path.join(format!(".env_{environment}")))
}
