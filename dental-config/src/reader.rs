//! Read access to the static `tables.yml` table configuration.
//!
//! The file is produced by the schema analysis step and lists, per table, how it is extracted,
//! how important it is and which tables must be processed before it. Everything here is a pure
//! read over the loaded configuration; the file is only touched by [`ConfigReader::new`] and
//! [`ConfigReader::reload_configuration`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::ConfigError;
use crate::load::{TABLES_CONFIG_FILE, default_config_dir, load_tables_file};
use crate::shared::{ExtractionStrategy, TableConfig, TableImportance, TablesMetadata};

/// Tables above this size in megabytes count as large.
pub const DEFAULT_LARGE_TABLE_THRESHOLD_MB: f64 = 100.0;

/// Tables below this size in megabytes count as small in the configuration summary.
const SMALL_TABLE_THRESHOLD_MB: f64 = 1.0;

/// Loaded contents of a tables configuration file.
#[derive(Debug, Clone)]
struct TablesDocument {
    metadata: TablesMetadata,
    tables: BTreeMap<String, TableConfig>,
}

/// Reads table configuration from a `tables.yml` file.
#[derive(Debug, Clone)]
pub struct ConfigReader {
    path: PathBuf,
    document: TablesDocument,
    last_loaded: DateTime<Utc>,
}

impl ConfigReader {
    /// Loads the table configuration from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let document = load_tables_document(&path)?;

        info!(
            path = %path.display(),
            tables = document.tables.len(),
            "loaded table configuration"
        );

        Ok(Self {
            path,
            document,
            last_loaded: Utc::now(),
        })
    }

    /// Loads `config/tables.yml` below the current working directory.
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::new(default_config_dir()?.join(TABLES_CONFIG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_loaded(&self) -> DateTime<Utc> {
        self.last_loaded
    }

    pub fn metadata(&self) -> &TablesMetadata {
        &self.document.metadata
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.document.tables.keys().map(String::as_str).collect()
    }

    /// Returns the configuration of a table, or `None` when the table is unknown.
    pub fn get_table_config(&self, table_name: &str) -> Option<&TableConfig> {
        self.document.tables.get(table_name)
    }

    pub fn get_tables_by_importance(&self, importance: TableImportance) -> Vec<String> {
        self.tables_where(|config| config.table_importance == Some(importance))
    }

    pub fn get_tables_by_strategy(&self, strategy: ExtractionStrategy) -> Vec<String> {
        self.tables_where(|config| config.extraction_strategy == Some(strategy))
    }

    /// Returns the tables whose estimated size is strictly greater than `threshold_mb`.
    pub fn get_large_tables(&self, threshold_mb: f64) -> Vec<String> {
        self.tables_where(|config| config.size_mb() > threshold_mb)
    }

    /// Returns the tables that alert on extraction failure.
    pub fn get_monitored_tables(&self) -> Vec<String> {
        self.tables_where(TableConfig::is_monitored)
    }

    /// Returns the tables that must be processed before `table_name`.
    ///
    /// Unknown tables have no dependencies.
    pub fn get_table_dependencies(&self, table_name: &str) -> Vec<String> {
        self.get_table_config(table_name)
            .map(|config| config.dependencies.clone())
            .unwrap_or_default()
    }

    pub fn get_configuration_summary(&self) -> ConfigurationSummary {
        let mut summary = ConfigurationSummary {
            total_tables: self.document.tables.len(),
            importance_levels: BTreeMap::new(),
            extraction_strategies: BTreeMap::new(),
            size_ranges: SizeRanges::default(),
            monitored_tables: 0,
            modeled_tables: 0,
            last_loaded: self.last_loaded,
        };

        for config in self.document.tables.values() {
            if let Some(importance) = config.table_importance {
                *summary.importance_levels.entry(importance).or_default() += 1;
            }
            if let Some(strategy) = config.extraction_strategy {
                *summary.extraction_strategies.entry(strategy).or_default() += 1;
            }

            let size_mb = config.size_mb();
            if size_mb < SMALL_TABLE_THRESHOLD_MB {
                summary.size_ranges.small += 1;
            } else if size_mb <= DEFAULT_LARGE_TABLE_THRESHOLD_MB {
                summary.size_ranges.medium += 1;
            } else {
                summary.size_ranges.large += 1;
            }

            if config.is_monitored() {
                summary.monitored_tables += 1;
            }
            if config.is_modeled {
                summary.modeled_tables += 1;
            }
        }

        summary
    }

    /// Checks every table against the configuration rules and returns the violating tables.
    ///
    /// Fields with the wrong type never reach this point: they are rejected with
    /// [`ConfigError::InvalidTableEntry`] when the file is loaded.
    pub fn validate_configuration(&self) -> ConfigurationIssues {
        let mut issues = ConfigurationIssues::default();

        for (name, config) in &self.document.tables {
            match config.batch_size {
                None => issues.missing_batch_size.push(name.clone()),
                Some(batch_size) if batch_size <= 0 => {
                    issues.invalid_batch_size.push(name.clone())
                }
                Some(_) => {}
            }

            if config.extraction_strategy.is_none() {
                issues.missing_extraction_strategy.push(name.clone());
            }

            if config.table_importance.is_none() {
                issues.missing_importance.push(name.clone());
            }

            if config.size_mb() > DEFAULT_LARGE_TABLE_THRESHOLD_MB && !config.is_monitored() {
                issues.large_tables_without_monitoring.push(name.clone());
            }
        }

        if issues.is_clean() {
            debug!(path = %self.path.display(), "table configuration is valid");
        } else {
            warn!(
                path = %self.path.display(),
                issues = issues.total(),
                "table configuration has issues"
            );
        }

        issues
    }

    /// Re-reads the configuration file.
    ///
    /// Returns `false` and keeps the previous configuration when the file cannot be loaded.
    pub fn reload_configuration(&mut self) -> bool {
        match load_tables_document(&self.path) {
            Ok(document) => {
                self.document = document;
                self.last_loaded = Utc::now();

                info!(
                    path = %self.path.display(),
                    tables = self.document.tables.len(),
                    "reloaded table configuration"
                );

                true
            }
            Err(err) => {
                error!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to reload table configuration, keeping previous configuration"
                );

                false
            }
        }
    }

    /// Returns every table ordered so that each one comes after its dependencies.
    ///
    /// Among tables that are ready at the same time, more important tables come first.
    /// Dependencies on tables that are not configured are ignored.
    pub fn get_table_processing_order(&self) -> Result<Vec<String>, ConfigError> {
        let tables = &self.document.tables;

        let mut pending: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (name, config) in tables {
            let dependencies = config
                .dependencies
                .iter()
                .map(String::as_str)
                .filter(|dependency| {
                    let known = tables.contains_key(*dependency);
                    if !known {
                        debug!(table = %name, dependency, "ignoring unknown table dependency");
                    }
                    known && *dependency != name.as_str()
                })
                .collect();
            pending.insert(name.as_str(), dependencies);
        }

        let mut order = Vec::with_capacity(tables.len());
        while !pending.is_empty() {
            let next = pending
                .iter()
                .filter(|(_, dependencies)| dependencies.is_empty())
                .map(|(name, _)| *name)
                .min_by_key(|name| (importance_rank(tables.get(*name)), *name));

            let Some(next) = next else {
                let cycle = pending.keys().copied().collect::<Vec<_>>().join(", ");
                return Err(ConfigError::DependencyCycle(cycle));
            };

            pending.remove(next);
            for dependencies in pending.values_mut() {
                dependencies.remove(next);
            }
            order.push(next.to_string());
        }

        Ok(order)
    }

    fn tables_where(&self, predicate: impl Fn(&TableConfig) -> bool) -> Vec<String> {
        self.document
            .tables
            .iter()
            .filter(|(_, config)| predicate(config))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn importance_rank(config: Option<&TableConfig>) -> usize {
    config
        .and_then(|config| config.table_importance)
        .and_then(|importance| TableImportance::ALL.iter().position(|i| *i == importance))
        .unwrap_or(TableImportance::ALL.len())
}

fn load_tables_document(path: &Path) -> Result<TablesDocument, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::TablesFileNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut document = load_tables_file(path)?;

    let tables = match document.get_mut("tables").map(Value::take) {
        None | Some(Value::Null) => {
            return Err(ConfigError::MissingTablesKey {
                path: path.to_path_buf(),
            });
        }
        Some(Value::Object(tables)) => tables,
        Some(_) => {
            return Err(ConfigError::InvalidTablesKey {
                path: path.to_path_buf(),
            });
        }
    };

    let mut parsed = BTreeMap::new();
    for (table, value) in tables {
        let config = match value {
            Value::Null => TableConfig::default(),
            value => serde_json::from_value(value).map_err(|source| {
                ConfigError::InvalidTableEntry {
                    path: path.to_path_buf(),
                    table: table.clone(),
                    source,
                }
            })?,
        };
        parsed.insert(table, config);
    }

    let metadata = match document.get_mut("metadata").map(Value::take) {
        None | Some(Value::Null) => TablesMetadata::default(),
        Some(value) => serde_json::from_value(value).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "ignoring malformed tables metadata");
            TablesMetadata::default()
        }),
    };

    Ok(TablesDocument {
        metadata,
        tables: parsed,
    })
}

/// Number of tables per size range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SizeRanges {
    /// Under 1 MB.
    pub small: usize,
    /// Between 1 MB and 100 MB.
    pub medium: usize,
    /// Over 100 MB.
    pub large: usize,
}

/// Aggregate view of the loaded table configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigurationSummary {
    pub total_tables: usize,
    pub importance_levels: BTreeMap<TableImportance, usize>,
    pub extraction_strategies: BTreeMap<ExtractionStrategy, usize>,
    pub size_ranges: SizeRanges,
    pub monitored_tables: usize,
    pub modeled_tables: usize,
    pub last_loaded: DateTime<Utc>,
}

/// Tables violating each configuration rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigurationIssues {
    pub missing_batch_size: Vec<String>,
    pub missing_extraction_strategy: Vec<String>,
    pub missing_importance: Vec<String>,
    pub invalid_batch_size: Vec<String>,
    pub large_tables_without_monitoring: Vec<String>,
}

impl ConfigurationIssues {
    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }

    /// Total number of violations across all rules.
    pub fn total(&self) -> usize {
        self.missing_batch_size.len()
            + self.missing_extraction_strategy.len()
            + self.missing_importance.len()
            + self.invalid_batch_size.len()
            + self.large_tables_without_monitoring.len()
    }
}
