use std::fmt;

use crate::error::ConfigError;

/// Name of the environment variable which selects the runtime environment.
pub const ETL_ENVIRONMENT_ENV_NAME: &str = "ETL_ENVIRONMENT";

/// The name of the production environment.
const PRODUCTION_ENV_NAME: &str = "production";

/// The name of the test environment.
const TEST_ENV_NAME: &str = "test";

/// Prefix applied to every connection variable in the test environment.
const TEST_ENV_PREFIX: &str = "TEST_";

/// Represents the runtime environment of the pipeline.
///
/// The environment decides which set of connection variables is read: production reads the
/// unprefixed names and test reads the `TEST_` prefixed ones. The two sets are never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    /// Production environment, connected to the live clinic databases.
    Production,
    /// Test environment, connected to the `TEST_` prefixed databases.
    Test,
}

impl Environment {
    /// Loads the environment from the `ETL_ENVIRONMENT` env variable.
    ///
    /// There is no default: a missing variable is an error so that a misconfigured test run can
    /// never fall through to production databases.
    pub fn load() -> Result<Environment, ConfigError> {
        Self::resolve(std::env::var(ETL_ENVIRONMENT_ENV_NAME).ok().as_deref())
    }

    /// Resolves the environment from an optional raw value.
    pub fn resolve(value: Option<&str>) -> Result<Environment, ConfigError> {
        match value.map(str::trim) {
            None | Some("") => Err(ConfigError::MissingEnvironment),
            Some(value) => value.try_into(),
        }
    }

    /// Returns the string name of the environment.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => PRODUCTION_ENV_NAME,
            Environment::Test => TEST_ENV_NAME,
        }
    }

    /// Returns the prefix applied to environment variable lookups.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Environment::Production => "",
            Environment::Test => TEST_ENV_PREFIX,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_test(&self) -> bool {
        matches!(self, Self::Test)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Environment {
    type Error = ConfigError;

    /// Attempts to create an [`Environment`] from a string, case-insensitively.
    ///
    /// Accepts "production" or "test".
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            PRODUCTION_ENV_NAME => Ok(Self::Production),
            TEST_ENV_NAME => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }
}
