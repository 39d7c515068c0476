use chrono::NaiveDate;
use dental_config::shared::PostgresSchema;
use dental_etl::connection::ConnectionFactory;
use dental_etl::schema::{ColumnInspector, InspectionSampling, MySqlColumnInspector, SchemaConverter};
use dental_etl::test_utils::database::{
    connect_single_mysql, create_mysql_database, drop_mysql_database, local_mysql_config,
    spawn_test_databases,
};
use dental_etl::test_utils::{StaticColumnInspector, snapshot_from_create_statement};
use dental_etl::types::{Cell, PgType, RowData, SchemaVerification};
use dental_telemetry::tracing::init_test_tracing;

use crate::common::offline_test_settings;

const APPOINTMENT: &str = "CREATE TABLE `appointment` (
  `AptNum` bigint(20) NOT NULL AUTO_INCREMENT,
  `PatNum` bigint(20) NOT NULL,
  `AptStatus` tinyint(4) NOT NULL DEFAULT 0,
  `IsNewPatient` tinyint(3) unsigned NOT NULL DEFAULT 0,
  `Pattern` varchar(255) NOT NULL DEFAULT '',
  `AptDateTime` datetime NOT NULL DEFAULT '0001-01-01 00:00:00',
  `Note` text,
  `ProcFee` decimal(10,2) DEFAULT NULL,
  PRIMARY KEY (`AptNum`),
  KEY `indexPatNum` (`PatNum`)
) ENGINE=MyISAM DEFAULT CHARSET=utf8";

fn appointment_inspector() -> StaticColumnInspector {
    StaticColumnInspector::new()
        .with_column("appointment", "AptStatus", [Some(1), Some(2), Some(5)])
        .with_column("appointment", "IsNewPatient", [Some(0), None, Some(1)])
}

#[tokio::test(flavor = "multi_thread")]
async fn test_converter_adapts_schema_and_rows_offline() {
    init_test_tracing();

    let settings = offline_test_settings();
    let factory = ConnectionFactory::new();
    let converter = SchemaConverter::new(&factory, &settings, PostgresSchema::Staging)
        .unwrap()
        .with_inspector(appointment_inspector());

    assert_eq!(converter.source_db(), "test_opendental_replication");
    assert_eq!(converter.analytics_db(), "test_opendental_analytics");
    assert_eq!(factory.engine_count(), 2);

    let snapshot = snapshot_from_create_statement(APPOINTMENT);
    let ddl = converter.adapt_schema("appointment", &snapshot).await.unwrap();
    assert_eq!(
        ddl,
        "CREATE TABLE \"staging\".\"appointment\" (
    \"AptNum\" bigint,
    \"PatNum\" bigint,
    \"AptStatus\" smallint,
    \"IsNewPatient\" boolean,
    \"Pattern\" character varying(255),
    \"AptDateTime\" timestamp,
    \"Note\" text,
    \"ProcFee\" numeric(10,2),
    PRIMARY KEY (\"AptNum\")
)"
    );

    let column_types = converter
        .resolve_column_types("appointment", &snapshot)
        .await
        .unwrap();
    assert_eq!(column_types.get("IsNewPatient"), Some(PgType::Boolean));
    assert_eq!(column_types.get("ProcFee"), Some(PgType::Numeric));

    let row = RowData::from([
        ("AptNum".to_string(), Cell::U64(9001)),
        ("AptStatus".to_string(), Cell::I64(2)),
        ("IsNewPatient".to_string(), Cell::I64(0)),
        (
            "AptDateTime".to_string(),
            Cell::String("0000-00-00 00:00:00".to_string()),
        ),
        ("ProcFee".to_string(), Cell::String("85.00".to_string())),
    ]);
    let row = converter
        .convert_row_data_types(&column_types, row)
        .unwrap();

    assert_eq!(row["AptNum"], Cell::I64(9001));
    assert_eq!(row["AptStatus"], Cell::I64(2));
    assert_eq!(row["IsNewPatient"], Cell::Bool(false));
    assert_eq!(row["AptDateTime"], Cell::Null);
    assert_eq!(row["ProcFee"], Cell::Numeric("85.00".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_schema_change_detection_tracks_hashes() {
    init_test_tracing();

    let settings = offline_test_settings();
    let factory = ConnectionFactory::new();
    let converter = SchemaConverter::new(&factory, &settings, PostgresSchema::Raw)
        .unwrap()
        .with_inspector(appointment_inspector());

    let snapshot = snapshot_from_create_statement(APPOINTMENT);
    assert!(converter.has_schema_changed("appointment", &snapshot).await);
    assert!(!converter.has_schema_changed("appointment", &snapshot).await);

    let altered = snapshot_from_create_statement(&APPOINTMENT.replace(
        "`Note` text,",
        "`Note` text,\n  `Confirmed` bigint(20) NOT NULL,",
    ));
    assert!(converter.has_schema_changed("appointment", &altered).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_table_round_trip_against_live_databases() {
    init_test_tracing();

    let databases = spawn_test_databases().await;
    let settings = &databases.settings;
    let factory = ConnectionFactory::new();
    let converter = SchemaConverter::new(&factory, settings, PostgresSchema::Raw).unwrap();
    let mysql = factory.get_replication_connection(settings).unwrap();

    sqlx::raw_sql(
        "CREATE TABLE `patient` (
            `PatNum` bigint(20) NOT NULL AUTO_INCREMENT,
            `LName` varchar(100) NOT NULL DEFAULT '',
            `Gender` tinyint(3) unsigned NOT NULL DEFAULT 0,
            `Position` tinyint(3) unsigned NOT NULL DEFAULT 0,
            `Birthdate` date NOT NULL DEFAULT '0001-01-01',
            `EstBalance` double NOT NULL DEFAULT 0,
            PRIMARY KEY (`PatNum`)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8",
    )
    .execute(&mysql)
    .await
    .unwrap();
    sqlx::raw_sql(
        "INSERT INTO `patient` (`LName`, `Gender`, `Position`, `Birthdate`, `EstBalance`)
        VALUES ('Smith', 0, 0, '1980-04-12', 10.5),
               ('Jones', 1, 3, '1975-11-02', 0)",
    )
    .execute(&mysql)
    .await
    .unwrap();

    let snapshot = converter.get_table_schema_from_mysql("patient").await.unwrap();
    assert_eq!(snapshot.table_name, "patient");
    assert_eq!(snapshot.columns.len(), 6);
    assert!(snapshot.columns[0].is_primary_key());
    assert_eq!(snapshot.metadata.engine.as_deref(), Some("InnoDB"));
    assert_eq!(snapshot.schema_hash.len(), 32);

    // Reading an unchanged table twice yields the same hash.
    let again = converter.get_table_schema_from_mysql("patient").await.unwrap();
    assert_eq!(again.schema_hash, snapshot.schema_hash);
    assert!(converter.has_schema_changed("patient", &snapshot).await);
    assert!(!converter.has_schema_changed("patient", &again).await);

    assert!(converter.create_postgres_table("patient", &snapshot).await);
    assert_eq!(
        converter.verify_schema("patient", &snapshot).await.unwrap(),
        SchemaVerification::Exact
    );

    let pg = factory.get_analytics_raw_connection(settings).unwrap();
    let columns: Vec<(String, String)> = sqlx::query_as(
        "SELECT column_name::text, data_type::text FROM information_schema.columns
        WHERE table_schema = 'raw' AND table_name = 'patient' ORDER BY ordinal_position",
    )
    .fetch_all(&pg)
    .await
    .unwrap();
    assert_eq!(
        columns,
        vec![
            ("PatNum".to_string(), "bigint".to_string()),
            ("LName".to_string(), "character varying".to_string()),
            ("Gender".to_string(), "boolean".to_string()),
            ("Position".to_string(), "smallint".to_string()),
            ("Birthdate".to_string(), "date".to_string()),
            ("EstBalance".to_string(), "double precision".to_string()),
        ]
    );

    // Recreating drops the previous table first and keeps the same shape.
    sqlx::raw_sql("INSERT INTO \"raw\".\"patient\" (\"PatNum\") VALUES (1)")
        .execute(&pg)
        .await
        .unwrap();
    assert!(converter.create_postgres_table("patient", &snapshot).await);
    let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM \"raw\".\"patient\"")
        .fetch_one(&pg)
        .await
        .unwrap();
    assert_eq!(rows, 0);
    assert_eq!(
        converter.verify_schema("patient", &snapshot).await.unwrap(),
        SchemaVerification::Exact
    );
    assert!(converter.ensure_table_exists("patient", &snapshot).await.unwrap());

    let column_types = converter
        .resolve_column_types("patient", &snapshot)
        .await
        .unwrap();
    assert_eq!(column_types.get("Gender"), Some(PgType::Boolean));
    assert_eq!(column_types.get("Position"), Some(PgType::SmallInt));

    let row = RowData::from([
        ("Gender".to_string(), Cell::U64(1)),
        ("Birthdate".to_string(), Cell::Date(NaiveDate::from_ymd_opt(1975, 11, 2).unwrap())),
    ]);
    let row = converter.convert_row_data_types(&column_types, row).unwrap();
    assert_eq!(row["Gender"], Cell::Bool(true));

    factory.dispose_all().await;
    databases.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_postgres_table_is_created_on_demand() {
    init_test_tracing();

    let databases = spawn_test_databases().await;
    let settings = &databases.settings;
    let factory = ConnectionFactory::new();
    let converter = SchemaConverter::new(&factory, settings, PostgresSchema::Staging)
        .unwrap()
        .with_inspector(appointment_inspector());

    let snapshot = snapshot_from_create_statement(APPOINTMENT);
    // The test environment tolerates the missing table instead of failing verification.
    let outcome = converter.verify_schema("appointment", &snapshot).await.unwrap();
    assert!(matches!(outcome, SchemaVerification::MismatchTolerated(_)));
    assert_eq!(
        outcome.mismatches(),
        ["column count differs: expected 8, found 0"]
    );

    assert!(converter.ensure_table_exists("appointment", &snapshot).await.unwrap());
    assert_eq!(
        converter.verify_schema("appointment", &snapshot).await.unwrap(),
        SchemaVerification::Exact
    );
    // A second call finds the table and leaves it alone.
    assert!(converter.ensure_table_exists("appointment", &snapshot).await.unwrap());

    factory.dispose_all().await;
    databases.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_mysql_table_is_a_validation_error() {
    init_test_tracing();

    let databases = spawn_test_databases().await;
    let factory = ConnectionFactory::new();
    let converter =
        SchemaConverter::new(&factory, &databases.settings, PostgresSchema::Raw).unwrap();

    let err = converter
        .get_table_schema_from_mysql("missing_table")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), dental_etl::error::ErrorKind::SchemaValidationError);
    assert_eq!(err.table_name(), Some("missing_table"));
    assert_eq!(err.operation(), Some("get_table_schema_from_mysql"));

    factory.dispose_all().await;
    databases.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_boolean_check_returns_its_connection_to_the_pool() {
    init_test_tracing();

    let config = local_mysql_config();
    let pool = create_mysql_database(&config).await;
    sqlx::raw_sql("CREATE TABLE `flags` (`Id` bigint NOT NULL, `Flag` tinyint NOT NULL)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::raw_sql("INSERT INTO `flags` VALUES (1, 0), (2, 1)")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let pool = connect_single_mysql(&config).await;
    let inspector = MySqlColumnInspector::new(pool.clone(), InspectionSampling::Full);

    // The pool holds a single connection, so acquiring it only succeeds once the check has
    // given it back.
    assert!(inspector.is_boolean_column("flags", "Flag").await.unwrap());
    drop(pool.acquire().await.unwrap());

    assert!(!inspector.is_boolean_column("flags", "Id").await.unwrap());
    drop(pool.acquire().await.unwrap());
    assert_eq!(pool.size(), 1);

    pool.close().await;
    drop_mysql_database(&config).await;
}
