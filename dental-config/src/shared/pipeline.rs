use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::shared::{DatabaseType, ValidationError};

/// Pipeline settings loaded from `pipeline.yml`.
///
/// Every section is optional; missing values fall back to defaults so a bare deployment only
/// needs the environment variables.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub general: GeneralConfig,
    pub connections: ConnectionsConfig,
    pub stages: BTreeMap<String, StageConfig>,
    pub monitoring: MonitoringConfig,
}

impl PipelineConfig {
    /// Validates pipeline configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.general.batch_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "general.batch_size".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.general.parallel_jobs == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "general.parallel_jobs".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        for db_type in [
            DatabaseType::Source,
            DatabaseType::Replication,
            DatabaseType::Analytics,
        ] {
            if self.connections.for_database(db_type).pool_size == 0 {
                return Err(ValidationError::InvalidFieldValue {
                    field: format!("connections.{db_type}.pool_size"),
                    constraint: "must be greater than 0".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// General pipeline behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub pipeline_name: String,
    pub timezone: String,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub batch_size: u64,
    pub parallel_jobs: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            pipeline_name: "dental_clinic_etl".to_string(),
            timezone: "UTC".to_string(),
            max_retries: 3,
            retry_delay_seconds: 5,
            batch_size: 25_000,
            parallel_jobs: 6,
        }
    }
}

/// Connection tuning per database role.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionsConfig {
    pub source: PoolSettings,
    pub replication: PoolSettings,
    pub analytics: PoolSettings,
}

impl ConnectionsConfig {
    pub fn for_database(&self, db_type: DatabaseType) -> &PoolSettings {
        match db_type {
            DatabaseType::Source => &self.source,
            DatabaseType::Replication => &self.replication,
            DatabaseType::Analytics => &self.analytics,
        }
    }
}

/// Pool and timeout settings applied when an engine is created.
///
/// Timeouts are expressed in seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub pool_size: u32,
    pub max_overflow: u32,
    pub pool_timeout: u64,
    pub pool_recycle: u64,
    pub connect_timeout: u64,
    pub read_timeout: u64,
    pub write_timeout: u64,
    pub application_name: String,
}

impl PoolSettings {
    pub const DEFAULT_POOL_SIZE: u32 = 5;
    pub const DEFAULT_MAX_OVERFLOW: u32 = 10;
    pub const DEFAULT_POOL_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_POOL_RECYCLE_SECS: u64 = 1800;

    /// Maximum number of connections the pool may hold at once.
    pub fn max_connections(&self) -> u32 {
        self.pool_size.saturating_add(self.max_overflow).max(1)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            pool_size: Self::DEFAULT_POOL_SIZE,
            max_overflow: Self::DEFAULT_MAX_OVERFLOW,
            pool_timeout: Self::DEFAULT_POOL_TIMEOUT_SECS,
            pool_recycle: Self::DEFAULT_POOL_RECYCLE_SECS,
            connect_timeout: 10,
            read_timeout: 30,
            write_timeout: 30,
            application_name: "dental_etl_pipeline".to_string(),
        }
    }
}

/// Settings for a single pipeline stage (extract, load, transform).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub enabled: bool,
    pub timeout_minutes: u64,
    pub error_threshold: f64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_minutes: 30,
            error_threshold: 0.01,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub health_check_interval: u64,
    pub failure_threshold: u32,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            health_check_interval: 60,
            failure_threshold: 3,
        }
    }
}
