use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::environment::{ETL_ENVIRONMENT_ENV_NAME, Environment};
use crate::error::ConfigError;
use crate::load::{default_config_dir, default_env_file};
use crate::provider::{ConfigNamespace, ConfigProvider, FileConfigProvider};
use crate::shared::{ConnectionParams, DatabaseType, PipelineConfig, PostgresSchema, TableConfig};

/// Unified, environment-aware view over the pipeline configuration.
///
/// Every connection variable is looked up with the environment prefix: production reads
/// `OPENDENTAL_SOURCE_HOST`, test reads `TEST_OPENDENTAL_SOURCE_HOST`. A test run never falls back
/// to unprefixed variables, and production never reads `TEST_` ones.
pub struct Settings {
    environment: Environment,
    provider: Arc<dyn ConfigProvider>,
    env: BTreeMap<String, String>,
    pipeline_config: PipelineConfig,
    pipeline_value: Value,
    tables_config: BTreeMap<String, TableConfig>,
}

impl Settings {
    /// Loads settings for the environment named by the `ETL_ENVIRONMENT` process variable.
    ///
    /// Fails before any other configuration is read when the variable is missing or invalid.
    /// Files are read from `./config` and the environment file from `./.env_{environment}`.
    pub fn load() -> Result<Self, ConfigError> {
        let environment = Environment::load()?;
        let provider = FileConfigProvider::new(
            default_config_dir()?,
            Some(default_env_file(environment)?),
        );

        Self::new(environment, Arc::new(provider))
    }

    /// Builds settings from a provider, reading `ETL_ENVIRONMENT` from its `env` namespace.
    pub fn with_provider(provider: Arc<dyn ConfigProvider>) -> Result<Self, ConfigError> {
        let env = provider.get_config(ConfigNamespace::Env)?;
        let environment =
            Environment::resolve(env.get(ETL_ENVIRONMENT_ENV_NAME).and_then(Value::as_str))?;

        Self::new(environment, provider)
    }

    /// Builds settings for an explicit environment.
    pub fn new(
        environment: Environment,
        provider: Arc<dyn ConfigProvider>,
    ) -> Result<Self, ConfigError> {
        let mut settings = Self {
            environment,
            provider,
            env: BTreeMap::new(),
            pipeline_config: PipelineConfig::default(),
            pipeline_value: Value::Null,
            tables_config: BTreeMap::new(),
        };
        settings.reload()?;

        info!(
            environment = %settings.environment,
            tables = settings.tables_config.len(),
            "settings loaded"
        );

        Ok(settings)
    }

    /// Re-reads every namespace from the provider. The environment itself never changes.
    ///
    /// On failure the previous configuration is kept.
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        let env = read_env(self.provider.as_ref())?;

        let pipeline_raw = self.provider.get_config(ConfigNamespace::Pipeline)?;
        let pipeline_config: PipelineConfig =
            serde_json::from_value(pipeline_raw).map_err(|source| {
                ConfigError::Deserialization {
                    namespace: ConfigNamespace::Pipeline,
                    source,
                }
            })?;
        let pipeline_value =
            serde_json::to_value(&pipeline_config).map_err(|source| {
                ConfigError::Deserialization {
                    namespace: ConfigNamespace::Pipeline,
                    source,
                }
            })?;

        let tables_raw = self.provider.get_config(ConfigNamespace::Tables)?;
        let tables_config: BTreeMap<String, TableConfig> = serde_json::from_value(tables_raw)
            .map_err(|source| ConfigError::Deserialization {
                namespace: ConfigNamespace::Tables,
                source,
            })?;

        self.env = env;
        self.pipeline_config = pipeline_config;
        self.pipeline_value = pipeline_value;
        self.tables_config = tables_config;

        Ok(())
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Returns `""` in production and `"TEST_"` in the test environment.
    pub fn env_prefix(&self) -> &'static str {
        self.environment.env_prefix()
    }

    pub fn pipeline_config(&self) -> &PipelineConfig {
        &self.pipeline_config
    }

    pub fn tables_config(&self) -> &BTreeMap<String, TableConfig> {
        &self.tables_config
    }

    /// Looks up a connection variable with the environment prefix applied.
    ///
    /// Blank values are treated as unset.
    pub fn env_var(&self, name: &str) -> Option<&str> {
        let key = format!("{}{}", self.env_prefix(), name);
        self.env
            .get(&key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Resolves the connection parameters for a database.
    ///
    /// Unset variables stay `None`; deciding whether that is fatal is left to the caller. For the
    /// analytics database the schema is taken from `schema`, then from `POSTGRES_ANALYTICS_SCHEMA`,
    /// then defaults to `raw`.
    pub fn get_database_config(
        &self,
        db_type: DatabaseType,
        schema: Option<PostgresSchema>,
    ) -> Result<ConnectionParams, ConfigError> {
        let vars = db_type.env_vars();

        let port = self.env_var(vars.port).map(str::to_string);
        if let Some(port) = &port {
            port.trim()
                .parse::<u16>()
                .map_err(|err| ConfigError::InvalidVariable {
                    variable: format!("{}{}", self.env_prefix(), vars.port),
                    value: port.clone(),
                    reason: err.to_string(),
                })?;
        }

        let schema = match (db_type.is_postgres(), schema) {
            (false, _) => None,
            (true, Some(schema)) => Some(schema.as_str().to_string()),
            (true, None) => Some(
                vars.schema
                    .and_then(|name| self.env_var(name))
                    .unwrap_or(PostgresSchema::default().as_str())
                    .to_string(),
            ),
        };

        Ok(ConnectionParams {
            host: self.env_var(vars.host).map(str::to_string),
            port,
            database: self.env_var(vars.database).map(str::to_string),
            user: self.env_var(vars.user).map(str::to_string),
            password: self
                .env_var(vars.password)
                .map(|password| SecretString::new(password.to_string())),
            schema,
            pool: self.pipeline_config.connections.for_database(db_type).clone(),
        })
    }

    /// Builds the connection URL for a database.
    ///
    /// The PostgreSQL schema is never part of the URL path; it is applied as `search_path` when
    /// the connection is opened.
    pub fn get_connection_string(
        &self,
        db_type: DatabaseType,
        schema: Option<PostgresSchema>,
    ) -> Result<String, ConfigError> {
        let params = self.get_database_config(db_type, schema)?;

        let missing = params.missing_keys();
        if !missing.is_empty() {
            return Err(ConfigError::MissingConnectionVariables {
                database: db_type.to_string(),
                variables: missing.into_iter().map(str::to_string).collect(),
            });
        }

        let user = params.user.as_deref().unwrap_or_default();
        let password = params
            .password
            .as_ref()
            .map(|password| password.expose_secret().as_str())
            .unwrap_or_default();
        let host = params.host.as_deref().unwrap_or_default();
        let port = params.port.as_deref().unwrap_or_default();
        let database = params.database.as_deref().unwrap_or_default();
        let pool = &params.pool;

        let credentials = format!(
            "{}:{}",
            utf8_percent_encode(user, NON_ALPHANUMERIC),
            utf8_percent_encode(password, NON_ALPHANUMERIC)
        );

        let url = if db_type.is_postgres() {
            format!(
                "postgresql://{credentials}@{host}:{port}/{database}?connect_timeout={}&application_name={}",
                pool.connect_timeout,
                utf8_percent_encode(&pool.application_name, NON_ALPHANUMERIC)
            )
        } else {
            format!(
                "mysql://{credentials}@{host}:{port}/{database}?connect_timeout={}&read_timeout={}&write_timeout={}&charset=utf8mb4",
                pool.connect_timeout, pool.read_timeout, pool.write_timeout
            )
        };

        Ok(url)
    }

    /// Checks that every database has its required connection variables and that the pipeline
    /// settings are usable.
    ///
    /// Each problem is logged. Returns `false` instead of failing so that callers decide
    /// whether an incomplete configuration is fatal.
    pub fn validate_configs(&self) -> bool {
        let mut valid = true;

        for db_type in [
            DatabaseType::Source,
            DatabaseType::Replication,
            DatabaseType::Analytics,
        ] {
            for name in db_type.env_vars().required() {
                if self.env_var(name).is_none() {
                    error!(
                        environment = %self.environment,
                        database = %db_type,
                        variable = %format!("{}{}", self.env_prefix(), name),
                        "missing required connection variable"
                    );
                    valid = false;
                }
            }
        }

        if let Err(err) = self.pipeline_config.validate() {
            error!(environment = %self.environment, error = %err, "invalid pipeline configuration");
            valid = false;
        }

        if valid {
            debug!(environment = %self.environment, "all connection variables are set");
        }

        valid
    }

    /// Returns a pipeline setting addressed by a dotted path such as `general.batch_size`.
    ///
    /// Defaults are included, so every known setting resolves even when absent from the file.
    pub fn get_pipeline_setting(&self, key: &str) -> Option<&Value> {
        key.split('.')
            .try_fold(&self.pipeline_value, |value, segment| value.get(segment))
    }

    /// Returns the configuration of a table, or `None` when the table is not configured.
    pub fn get_table_config(&self, table_name: &str) -> Option<&TableConfig> {
        self.tables_config.get(table_name)
    }

    pub fn list_tables(&self) -> Vec<&str> {
        self.tables_config.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("environment", &self.environment)
            .field("env_prefix", &self.env_prefix())
            .field("pipeline_config", &self.pipeline_config)
            .field("tables", &self.tables_config.len())
            .finish_non_exhaustive()
    }
}

fn read_env(provider: &dyn ConfigProvider) -> Result<BTreeMap<String, String>, ConfigError> {
    let env = provider.get_config(ConfigNamespace::Env)?;

    let Value::Object(map) = env else {
        return Ok(BTreeMap::new());
    };

    Ok(map
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(value) => Some((key, value)),
            Value::Number(number) => Some((key, number.to_string())),
            Value::Bool(flag) => Some((key, flag.to_string())),
            _ => None,
        })
        .collect())
}
