use std::path::PathBuf;

use dental_config::shared::{ExtractionStrategy, TableImportance};
use dental_config::{ConfigError, ConfigReader, DEFAULT_LARGE_TABLE_THRESHOLD_MB};
use uuid::Uuid;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Writes `contents` to a uniquely named file in the temp directory.
fn temp_tables_file(contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("dental-tables-{}.yml", Uuid::new_v4()));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn loads_tables_and_metadata() {
    let reader = ConfigReader::new(fixture("tables_valid.yml")).unwrap();

    assert_eq!(reader.table_names().len(), 5);
    assert_eq!(reader.metadata().source_database.as_deref(), Some("opendental"));
    assert_eq!(reader.metadata().total_tables, Some(5));

    let patient = reader.get_table_config("patient").unwrap();
    assert_eq!(patient.primary_key.as_deref(), Some("PatNum"));
    assert_eq!(patient.batch_size, Some(5000));
    assert_eq!(patient.monitoring.max_extraction_time_minutes, Some(10));
}

#[test]
fn unknown_table_has_no_config_and_no_dependencies() {
    let reader = ConfigReader::new(fixture("tables_valid.yml")).unwrap();

    assert!(reader.get_table_config("nonexistent").is_none());
    assert!(reader.get_table_dependencies("nonexistent").is_empty());
    assert_eq!(
        reader.get_table_dependencies("procedurelog"),
        vec!["patient", "appointment"]
    );
}

#[test]
fn large_tables_use_strict_threshold() {
    let path = temp_tables_file(
        r#"
tables:
  patient:
    estimated_size_mb: 50.0
  appointment:
    estimated_size_mb: 25.0
  procedurelog:
    estimated_size_mb: 150.0
"#,
    );
    let reader = ConfigReader::new(&path).unwrap();

    assert_eq!(reader.get_large_tables(50.0), vec!["procedurelog"]);
    assert_eq!(
        reader.get_large_tables(DEFAULT_LARGE_TABLE_THRESHOLD_MB),
        vec!["procedurelog"]
    );
    assert_eq!(reader.get_large_tables(10.0).len(), 3);

    std::fs::remove_file(path).unwrap();
}

#[test]
fn filters_by_importance_strategy_and_monitoring() {
    let reader = ConfigReader::new(fixture("tables_valid.yml")).unwrap();

    assert_eq!(
        reader.get_tables_by_importance(TableImportance::Critical),
        vec!["patient", "procedurelog"]
    );
    assert_eq!(
        reader.get_tables_by_strategy(ExtractionStrategy::FullTable),
        vec!["definition", "securitylog"]
    );
    assert_eq!(
        reader.get_monitored_tables(),
        vec!["appointment", "patient", "procedurelog"]
    );
}

#[test]
fn summary_counts_tables() {
    let reader = ConfigReader::new(fixture("tables_valid.yml")).unwrap();
    let summary = reader.get_configuration_summary();

    assert_eq!(summary.total_tables, 5);
    assert_eq!(summary.importance_levels[&TableImportance::Critical], 2);
    assert_eq!(summary.extraction_strategies[&ExtractionStrategy::Incremental], 2);
    assert_eq!(summary.size_ranges.small, 2);
    assert_eq!(summary.size_ranges.medium, 2);
    assert_eq!(summary.size_ranges.large, 1);
    assert_eq!(summary.monitored_tables, 3);
    assert_eq!(summary.modeled_tables, 4);
    assert_eq!(summary.last_loaded, reader.last_loaded());
}

#[test]
fn validation_reports_every_rule() {
    let reader = ConfigReader::new(fixture("tables_issues.yml")).unwrap();
    let issues = reader.validate_configuration();

    assert_eq!(issues.missing_batch_size, vec!["appointment"]);
    assert_eq!(issues.missing_extraction_strategy, vec!["appointment"]);
    assert_eq!(issues.missing_importance, vec!["procedurelog"]);
    assert_eq!(issues.invalid_batch_size, vec!["claimproc", "patient"]);
    assert_eq!(issues.large_tables_without_monitoring, vec!["procedurelog"]);
    assert_eq!(issues.total(), 6);

    let clean = ConfigReader::new(fixture("tables_valid.yml")).unwrap();
    assert!(clean.validate_configuration().is_clean());
}

#[test]
fn missing_file_is_reported_with_path() {
    let err = ConfigReader::new(fixture("does_not_exist.yml")).unwrap_err();

    assert!(matches!(err, ConfigError::TablesFileNotFound { .. }));
    assert!(err.to_string().contains("does_not_exist.yml"));
}

#[test]
fn malformed_yaml_is_a_parse_error() {
    let err = ConfigReader::new(fixture("tables_invalid_yaml.yml")).unwrap_err();

    assert!(matches!(err, ConfigError::TablesFileParse { .. }));
    assert!(err.to_string().contains("tables_invalid_yaml.yml"));
}

#[test]
fn missing_tables_key_and_empty_document_are_rejected() {
    let err = ConfigReader::new(fixture("tables_no_tables_key.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::MissingTablesKey { .. }));

    let path = temp_tables_file("");
    let err = ConfigReader::new(&path).unwrap_err();
    assert!(matches!(err, ConfigError::MissingTablesKey { .. }));

    std::fs::remove_file(path).unwrap();
}

#[test]
fn table_names_keep_their_case() {
    let path = temp_tables_file(
        "tables:\n  PatientNote:\n    primary_key: PatNum\n    batch_size: 250\n    \
         dependencies: [patient.v2]\n  patient.v2:\n    batch_size: 100\n",
    );
    let reader = ConfigReader::new(&path).unwrap();
    std::fs::remove_file(path).unwrap();

    let mut names = reader.table_names();
    names.sort();
    assert_eq!(names, vec!["PatientNote", "patient.v2"]);

    let note = reader.get_table_config("PatientNote").unwrap();
    assert_eq!(note.primary_key.as_deref(), Some("PatNum"));
    assert_eq!(note.batch_size, Some(250));
    assert!(reader.get_table_config("patientnote").is_none());
    assert_eq!(reader.get_table_dependencies("PatientNote"), vec!["patient.v2"]);
}

#[test]
fn tables_key_must_hold_a_mapping() {
    let path = temp_tables_file("tables:\n  - patient\n  - appointment\n");
    let err = ConfigReader::new(&path).unwrap_err();
    std::fs::remove_file(path).unwrap();

    assert!(matches!(err, ConfigError::InvalidTablesKey { .. }));
}

#[test]
fn incompatible_field_type_is_a_configuration_error() {
    let err = ConfigReader::new(fixture("tables_bad_types.yml")).unwrap_err();

    assert!(matches!(
        err,
        ConfigError::InvalidTableEntry { ref table, .. } if table == "patient"
    ));
}

#[test]
fn failed_reload_keeps_previous_configuration() {
    let path = temp_tables_file("tables:\n  patient:\n    batch_size: 100\n");
    let mut reader = ConfigReader::new(&path).unwrap();
    let loaded_at = reader.last_loaded();

    std::fs::write(&path, "tables:\n  patient:\n    batch_size: [oops\n").unwrap();
    assert!(!reader.reload_configuration());
    assert_eq!(reader.get_table_config("patient").unwrap().batch_size, Some(100));
    assert_eq!(reader.last_loaded(), loaded_at);

    std::fs::write(
        &path,
        "tables:\n  patient:\n    batch_size: 200\n  appointment: {}\n",
    )
    .unwrap();
    assert!(reader.reload_configuration());
    assert_eq!(reader.get_table_config("patient").unwrap().batch_size, Some(200));
    assert_eq!(reader.table_names(), vec!["appointment", "patient"]);

    std::fs::remove_file(path).unwrap();
}

#[test]
fn processing_order_respects_dependencies() {
    let reader = ConfigReader::new(fixture("tables_valid.yml")).unwrap();
    let order = reader.get_table_processing_order().unwrap();

    let position = |name: &str| order.iter().position(|table| table == name).unwrap();
    assert_eq!(order.len(), 5);
    assert_eq!(order[0], "patient");
    assert!(position("appointment") < position("procedurelog"));
    assert!(position("securitylog") > position("procedurelog"));
}

#[test]
fn processing_order_detects_cycles() {
    let reader = ConfigReader::new(fixture("tables_cycle.yml")).unwrap();
    let err = reader.get_table_processing_order().unwrap_err();

    match err {
        ConfigError::DependencyCycle(tables) => {
            assert!(tables.contains("claim"));
            assert!(tables.contains("claimproc"));
            assert!(!tables.contains("definition"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
