//! Sources of raw configuration values.
//!
//! [`Settings`](crate::Settings) never reads files or the process environment directly: it asks a
//! [`ConfigProvider`] for one of three namespaces. Production and integration runs use
//! [`FileConfigProvider`], unit tests inject values through [`DictConfigProvider`].

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::load::{PIPELINE_CONFIG_FILE, TABLES_CONFIG_FILE, load_tables_file, load_yaml_file};

/// Configuration namespaces a [`ConfigProvider`] can supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigNamespace {
    /// Flat key/value environment variables.
    Env,
    /// Nested pipeline settings (`general`, `connections`, `stages`, `monitoring`).
    Pipeline,
    /// Mapping of table name to table settings.
    Tables,
}

impl ConfigNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigNamespace::Env => "env",
            ConfigNamespace::Pipeline => "pipeline",
            ConfigNamespace::Tables => "tables",
        }
    }
}

impl fmt::Display for ConfigNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source of configuration values.
///
/// Every implementation returns a JSON object for every namespace; a namespace without any
/// configured value is an empty object, never an error.
pub trait ConfigProvider: fmt::Debug + Send + Sync {
    /// Returns the raw configuration stored under `namespace`.
    fn get_config(&self, namespace: ConfigNamespace) -> Result<Value, ConfigError>;
}

/// Reads configuration from the file system and the process environment.
///
/// The `env` namespace merges an optional dotenv file with the process environment, where the
/// process environment wins. `pipeline` and `tables` are read from YAML files in the
/// configuration directory.
#[derive(Debug, Clone)]
pub struct FileConfigProvider {
    config_dir: PathBuf,
    env_file: Option<PathBuf>,
}

impl FileConfigProvider {
    pub fn new(config_dir: impl Into<PathBuf>, env_file: Option<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            env_file,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn load_env(&self) -> Result<Value, ConfigError> {
        let mut values = BTreeMap::new();

        if let Some(env_file) = self.env_file.as_ref().filter(|path| path.is_file()) {
            let iter = dotenv::from_path_iter(env_file).map_err(|source| ConfigError::EnvFile {
                path: env_file.clone(),
                source,
            })?;

            for item in iter {
                let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                    path: env_file.clone(),
                    source,
                })?;
                values.insert(key, value);
            }

            debug!(path = %env_file.display(), "loaded environment file");
        }

        values.extend(utf8_vars(std::env::vars_os()));

        Ok(Value::Object(
            values
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect(),
        ))
    }

    fn load_pipeline(&self) -> Result<Value, ConfigError> {
        let Some(path) = self.existing_file(PIPELINE_CONFIG_FILE) else {
            return Ok(Value::Object(Map::new()));
        };

        load_yaml_file(&path).map_err(|source| ConfigError::FileLoad { path, source })
    }

    fn load_tables(&self) -> Result<Value, ConfigError> {
        let Some(path) = self.existing_file(TABLES_CONFIG_FILE) else {
            return Ok(Value::Object(Map::new()));
        };

        let mut document = load_tables_file(&path)?;
        Ok(document
            .get_mut("tables")
            .map(Value::take)
            .unwrap_or_else(|| Value::Object(Map::new())))
    }

    fn existing_file(&self, file_name: &str) -> Option<PathBuf> {
        let path = self.config_dir.join(file_name);
        if !path.is_file() {
            warn!(path = %path.display(), "configuration file not found, using defaults");
            return None;
        }

        Some(path)
    }
}

/// Keeps the variables whose name and value are both valid UTF-8.
fn utf8_vars(
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> impl Iterator<Item = (String, String)> {
    vars.into_iter().filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
        (Ok(key), Ok(value)) => Some((key, value)),
        (key, _) => {
            let variable = match key {
                Ok(key) => key,
                Err(key) => key.to_string_lossy().into_owned(),
            };
            debug!(variable, "skipping environment variable that is not valid UTF-8");
            None
        }
    })
}

impl ConfigProvider for FileConfigProvider {
    fn get_config(&self, namespace: ConfigNamespace) -> Result<Value, ConfigError> {
        match namespace {
            ConfigNamespace::Env => self.load_env(),
            ConfigNamespace::Pipeline => self.load_pipeline(),
            ConfigNamespace::Tables => self.load_tables(),
        }
    }
}

/// Holds injected configuration values in memory.
#[derive(Debug, Clone, Default)]
pub struct DictConfigProvider {
    env: BTreeMap<String, String>,
    pipeline: Map<String, Value>,
    tables: Map<String, Value>,
}

impl DictConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the given environment variables.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    /// Replaces the pipeline namespace. Non-object values are ignored.
    pub fn with_pipeline(mut self, pipeline: Value) -> Self {
        if let Value::Object(map) = pipeline {
            self.pipeline = map;
        }
        self
    }

    /// Replaces the tables namespace. Non-object values are ignored.
    pub fn with_tables(mut self, tables: Value) -> Self {
        if let Value::Object(map) = tables {
            self.tables = map;
        }
        self
    }
}

impl ConfigProvider for DictConfigProvider {
    fn get_config(&self, namespace: ConfigNamespace) -> Result<Value, ConfigError> {
        let value = match namespace {
            ConfigNamespace::Env => Value::Object(
                self.env
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                    .collect(),
            ),
            ConfigNamespace::Pipeline => Value::Object(self.pipeline.clone()),
            ConfigNamespace::Tables => Value::Object(self.tables.clone()),
        };

        Ok(value)
    }
}
