use std::fmt;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::shared::PoolSettings;

/// Identifies which of the three logical databases a connection targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseType {
    /// The OpenDental production MySQL database.
    Source,
    /// The MySQL replication copy that extraction reads from.
    Replication,
    /// The PostgreSQL analytics warehouse.
    Analytics,
}

impl DatabaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::Source => "source",
            DatabaseType::Replication => "replication",
            DatabaseType::Analytics => "analytics",
        }
    }

    /// Returns a human readable label used in logs and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            DatabaseType::Source => "OpenDental source (MySQL)",
            DatabaseType::Replication => "Replication (MySQL)",
            DatabaseType::Analytics => "Analytics (PostgreSQL)",
        }
    }

    /// Returns the environment variable names for this database, without prefix.
    pub fn env_vars(&self) -> &'static DatabaseEnvVars {
        match self {
            DatabaseType::Source => &SOURCE_ENV_VARS,
            DatabaseType::Replication => &REPLICATION_ENV_VARS,
            DatabaseType::Analytics => &ANALYTICS_ENV_VARS,
        }
    }

    pub fn is_postgres(&self) -> bool {
        matches!(self, Self::Analytics)
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PostgreSQL schema used as `search_path` by an analytics connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostgresSchema {
    Raw,
    Staging,
    Intermediate,
    Marts,
}

impl PostgresSchema {
    pub const ALL: [PostgresSchema; 4] = [
        PostgresSchema::Raw,
        PostgresSchema::Staging,
        PostgresSchema::Intermediate,
        PostgresSchema::Marts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PostgresSchema::Raw => "raw",
            PostgresSchema::Staging => "staging",
            PostgresSchema::Intermediate => "intermediate",
            PostgresSchema::Marts => "marts",
        }
    }
}

impl Default for PostgresSchema {
    fn default() -> Self {
        Self::Raw
    }
}

impl fmt::Display for PostgresSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostgresSchema {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "staging" => Ok(Self::Staging),
            "intermediate" => Ok(Self::Intermediate),
            "marts" => Ok(Self::Marts),
            other => Err(ConfigError::InvalidSchema(other.to_string())),
        }
    }
}

/// Names of the environment variables holding one database's connection parameters.
#[derive(Debug)]
pub struct DatabaseEnvVars {
    pub host: &'static str,
    pub port: &'static str,
    pub database: &'static str,
    pub user: &'static str,
    pub password: &'static str,
    pub schema: Option<&'static str>,
}

impl DatabaseEnvVars {
    /// Variables that must be set for the database to be usable.
    pub fn required(&self) -> [&'static str; 5] {
        [self.host, self.port, self.database, self.user, self.password]
    }
}

static SOURCE_ENV_VARS: DatabaseEnvVars = DatabaseEnvVars {
    host: "OPENDENTAL_SOURCE_HOST",
    port: "OPENDENTAL_SOURCE_PORT",
    database: "OPENDENTAL_SOURCE_DB",
    user: "OPENDENTAL_SOURCE_USER",
    password: "OPENDENTAL_SOURCE_PASSWORD",
    schema: None,
};

static REPLICATION_ENV_VARS: DatabaseEnvVars = DatabaseEnvVars {
    host: "MYSQL_REPLICATION_HOST",
    port: "MYSQL_REPLICATION_PORT",
    database: "MYSQL_REPLICATION_DB",
    user: "MYSQL_REPLICATION_USER",
    password: "MYSQL_REPLICATION_PASSWORD",
    schema: None,
};

static ANALYTICS_ENV_VARS: DatabaseEnvVars = DatabaseEnvVars {
    host: "POSTGRES_ANALYTICS_HOST",
    port: "POSTGRES_ANALYTICS_PORT",
    database: "POSTGRES_ANALYTICS_DB",
    user: "POSTGRES_ANALYTICS_USER",
    password: "POSTGRES_ANALYTICS_PASSWORD",
    schema: Some("POSTGRES_ANALYTICS_SCHEMA"),
};

/// Connection parameters resolved for one database, before validation.
///
/// Fields that were not configured are `None`; the connection factory decides whether that is
/// fatal. The password is redacted in debug output.
#[derive(Debug, Clone, Default)]
pub struct ConnectionParams {
    pub host: Option<String>,
    pub port: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<SecretString>,
    /// Target `search_path`, only set for analytics connections.
    pub schema: Option<String>,
    /// Pool tuning merged from the pipeline configuration.
    pub pool: PoolSettings,
}

impl ConnectionParams {
    /// Returns the names of the required parameters that are missing or empty.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();

        let is_blank = |value: &Option<String>| value.as_deref().is_none_or(|v| v.trim().is_empty());

        if is_blank(&self.host) {
            missing.push("host");
        }
        if is_blank(&self.port) {
            missing.push("port");
        }
        if is_blank(&self.database) {
            missing.push("database");
        }
        if is_blank(&self.user) {
            missing.push("user");
        }
        if self
            .password
            .as_ref()
            .is_none_or(|password| password.expose_secret().is_empty())
        {
            missing.push("password");
        }

        missing
    }
}

/// Static PostgreSQL session options applied to every analytics connection.
#[derive(Debug, Clone)]
pub struct PgSessionOptions {
    pub search_path: String,
    pub datestyle: &'static str,
    pub client_encoding: &'static str,
    pub timezone: &'static str,
}

impl PgSessionOptions {
    pub fn new(search_path: impl Into<String>) -> Self {
        Self {
            search_path: search_path.into(),
            datestyle: "ISO",
            client_encoding: "UTF8",
            timezone: "UTC",
        }
    }

    /// Returns the options as a string suitable for the libpq `options` parameter.
    pub fn to_options_string(&self) -> String {
        format!(
            "-csearch_path={} -cdatestyle={} -cclient_encoding={} -ctimezone={}",
            self.search_path, self.datestyle, self.client_encoding, self.timezone
        )
    }

    /// Returns the options as key-value pairs suitable for sqlx.
    pub fn to_key_value_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("search_path".to_string(), self.search_path.clone()),
            ("datestyle".to_string(), self.datestyle.to_string()),
            ("client_encoding".to_string(), self.client_encoding.to_string()),
            ("timezone".to_string(), self.timezone.to_string()),
        ]
    }
}
