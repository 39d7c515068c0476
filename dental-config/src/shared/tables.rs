use std::fmt;

use serde::{Deserialize, Serialize};

/// How rows of a table are pulled from the replication database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Only rows whose incremental column advanced since the last run.
    Incremental,
    /// The whole table on every run.
    FullTable,
    /// Incremental extraction split into bounded chunks for very large tables.
    IncrementalChunked,
}

impl ExtractionStrategy {
    pub const ALL: [ExtractionStrategy; 3] = [
        ExtractionStrategy::Incremental,
        ExtractionStrategy::FullTable,
        ExtractionStrategy::IncrementalChunked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStrategy::Incremental => "incremental",
            ExtractionStrategy::FullTable => "full_table",
            ExtractionStrategy::IncrementalChunked => "incremental_chunked",
        }
    }
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business importance of a table, used to prioritize processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableImportance {
    Critical,
    Important,
    Audit,
    Reference,
    Standard,
}

impl TableImportance {
    pub const ALL: [TableImportance; 5] = [
        TableImportance::Critical,
        TableImportance::Important,
        TableImportance::Audit,
        TableImportance::Reference,
        TableImportance::Standard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableImportance::Critical => "critical",
            TableImportance::Important => "important",
            TableImportance::Audit => "audit",
            TableImportance::Reference => "reference",
            TableImportance::Standard => "standard",
        }
    }
}

impl fmt::Display for TableImportance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monitoring settings of a single table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableMonitoring {
    pub alert_on_failure: bool,
    pub max_extraction_time_minutes: Option<u64>,
    pub data_quality_threshold: Option<f64>,
}

/// Extraction settings of a single table, as found under `tables.<name>` in `tables.yml`.
///
/// Most fields are optional so that configuration validation can report what is missing
/// instead of failing the load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub primary_key: Option<String>,
    pub incremental_column: Option<String>,
    pub incremental_columns: Vec<String>,
    pub extraction_strategy: Option<ExtractionStrategy>,
    pub table_importance: Option<TableImportance>,
    pub batch_size: Option<i64>,
    pub estimated_size_mb: Option<f64>,
    pub estimated_rows: Option<u64>,
    pub monitoring: TableMonitoring,
    pub dependencies: Vec<String>,
    pub is_modeled: bool,
    pub dbt_model_types: Vec<String>,
    pub schema_hash: Option<String>,
    pub last_analyzed: Option<String>,
}

impl TableConfig {
    /// Returns the estimated size in megabytes, treating an unknown size as empty.
    pub fn size_mb(&self) -> f64 {
        self.estimated_size_mb.unwrap_or(0.0)
    }

    pub fn is_monitored(&self) -> bool {
        self.monitoring.alert_on_failure
    }
}

/// The `metadata` block written by the schema analysis at the top of `tables.yml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TablesMetadata {
    pub generated_at: Option<String>,
    pub source_database: Option<String>,
    pub total_tables: Option<u64>,
    pub configuration_version: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_table_config_ignores_unknown_keys() {
        let config: TableConfig = serde_json::from_value(json!({
            "primary_key": "PatNum",
            "extraction_strategy": "incremental_chunked",
            "table_importance": "critical",
            "batch_size": 5000,
            "monitoring": { "alert_on_failure": true },
            "performance_category": "large"
        }))
        .unwrap();

        assert_eq!(
            config.extraction_strategy,
            Some(ExtractionStrategy::IncrementalChunked)
        );
        assert_eq!(config.table_importance, Some(TableImportance::Critical));
        assert!(config.is_monitored());
        assert_eq!(config.size_mb(), 0.0);
    }

    #[test]
    fn test_string_batch_size_is_a_type_error() {
        let result = serde_json::from_value::<TableConfig>(json!({ "batch_size": "lots" }));
        assert!(result.is_err());
    }
}
