use std::collections::HashMap;

use dental_config::shared::{DatabaseType, PostgresSchema};
use dental_config::{Environment, Settings};
use sqlx::{Connection, MySqlPool, PgPool};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::connection::{ConnectionFactory, ConnectionManager};
use crate::conversions::convert_row_data_types;
use crate::error::EtlResult;
use crate::schema::adapt::{adapt_columns, render_create_table};
use crate::schema::mysql::extract_schema_snapshot;
use crate::schema::inspect::{ColumnInspector, InspectionSampling, MySqlColumnInspector};
use crate::schema::quote::quote_pg_identifier;
use crate::schema::verify::{
    compare_columns, fetch_postgres_columns, postgres_table_exists, verification_outcome,
};
use crate::types::{ColumnTypes, MySqlSchemaSnapshot, PgType, RowData, SchemaVerification};

/// Converts MySQL table schemas into PostgreSQL tables in one analytics schema.
///
/// Schemas are read from the replication database and tables are created in the analytics
/// database. `TINYINT` columns are classified as `boolean` or `smallint` by probing their data
/// through `P`.
#[derive(Debug)]
pub struct SchemaConverter<P = MySqlColumnInspector> {
    mysql_pool: MySqlPool,
    pg_pool: PgPool,
    schema: PostgresSchema,
    environment: Environment,
    source_db: String,
    analytics_db: String,
    inspector: P,
    schema_hashes: Mutex<HashMap<String, String>>,
}

impl SchemaConverter<MySqlColumnInspector> {
    /// Creates a converter reading from the replication database and writing to `schema` of
    /// the analytics database.
    pub fn new(
        factory: &ConnectionFactory,
        settings: &Settings,
        schema: PostgresSchema,
    ) -> EtlResult<Self> {
        let mysql_pool = factory.get_replication_connection(settings)?;
        let pg_pool = factory.get_analytics_connection(settings, schema)?;

        let source_db = settings
            .get_database_config(DatabaseType::Replication, None)?
            .database
            .unwrap_or_default();
        let analytics_db = settings
            .get_database_config(DatabaseType::Analytics, Some(schema))?
            .database
            .unwrap_or_default();

        Ok(Self::from_pools(
            mysql_pool,
            pg_pool,
            schema,
            settings.environment(),
            source_db,
            analytics_db,
        ))
    }

    pub fn from_pools(
        mysql_pool: MySqlPool,
        pg_pool: PgPool,
        schema: PostgresSchema,
        environment: Environment,
        source_db: String,
        analytics_db: String,
    ) -> Self {
        let inspector = MySqlColumnInspector::new(mysql_pool.clone(), InspectionSampling::default());

        Self {
            mysql_pool,
            pg_pool,
            schema,
            environment,
            source_db,
            analytics_db,
            inspector,
            schema_hashes: Mutex::new(HashMap::new()),
        }
    }

    /// Limits boolean detection to the first `sampling` values of each column.
    pub fn with_inspection_sampling(mut self, sampling: InspectionSampling) -> Self {
        self.inspector = MySqlColumnInspector::new(self.mysql_pool.clone(), sampling);
        self
    }
}

impl<P> SchemaConverter<P>
where
    P: ColumnInspector,
{
    /// Replaces the column inspector.
    pub fn with_inspector<Q: ColumnInspector>(self, inspector: Q) -> SchemaConverter<Q> {
        SchemaConverter {
            mysql_pool: self.mysql_pool,
            pg_pool: self.pg_pool,
            schema: self.schema,
            environment: self.environment,
            source_db: self.source_db,
            analytics_db: self.analytics_db,
            inspector,
            schema_hashes: self.schema_hashes,
        }
    }

    pub fn schema(&self) -> PostgresSchema {
        self.schema
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn source_db(&self) -> &str {
        &self.source_db
    }

    pub fn analytics_db(&self) -> &str {
        &self.analytics_db
    }

    /// Reads the current schema of `table_name` from MySQL.
    pub async fn get_table_schema_from_mysql(
        &self,
        table_name: &str,
    ) -> EtlResult<MySqlSchemaSnapshot> {
        let mut manager = ConnectionManager::new(self.mysql_pool.clone());

        extract_schema_snapshot(&mut manager, table_name)
            .await
            .map_err(|err| {
                err.with_table(table_name)
                    .with_operation("get_table_schema_from_mysql")
                    .with_detail_field("database", self.source_db.as_str())
            })
    }

    /// Records the snapshot's hash and returns whether it differs from the last one seen for
    /// the table. The first snapshot of a table always counts as changed.
    pub async fn has_schema_changed(&self, table_name: &str, snapshot: &MySqlSchemaSnapshot) -> bool {
        let mut schema_hashes = self.schema_hashes.lock().await;
        let previous = schema_hashes.insert(table_name.to_string(), snapshot.schema_hash.clone());

        previous.as_deref() != Some(snapshot.schema_hash.as_str())
    }

    /// Converts a MySQL column type to a PostgreSQL type, probing `TINYINT` columns when a
    /// `(table, column)` context is given.
    pub async fn convert_mysql_type(&self, column_type: &str, context: Option<(&str, &str)>) -> String {
        crate::schema::inspect::convert_mysql_type(column_type, context, &self.inspector).await
    }

    /// Generates the PostgreSQL `CREATE TABLE` statement for `table_name`.
    pub async fn adapt_schema(
        &self,
        table_name: &str,
        snapshot: &MySqlSchemaSnapshot,
    ) -> EtlResult<String> {
        let table = adapt_columns(table_name, snapshot, &self.inspector).await?;

        Ok(render_create_table(self.schema.as_str(), table_name, &table))
    }

    /// Drops and recreates `table_name` in the analytics schema.
    ///
    /// Failures are logged and reported as `false`.
    pub async fn create_postgres_table(
        &self,
        table_name: &str,
        snapshot: &MySqlSchemaSnapshot,
    ) -> bool {
        let ddl = match self.adapt_schema(table_name, snapshot).await {
            Ok(ddl) => ddl,
            Err(err) => {
                error!(
                    table_name,
                    error = %err,
                    "failed to generate postgres ddl"
                );
                return false;
            }
        };

        match self.recreate_table(table_name, &ddl).await {
            Ok(()) => {
                info!(
                    table_name,
                    schema = %self.schema,
                    database = self.analytics_db.as_str(),
                    "postgres table created"
                );
                true
            }
            Err(err) => {
                error!(
                    table_name,
                    schema = %self.schema,
                    error = %err,
                    "failed to create postgres table"
                );
                false
            }
        }
    }

    async fn recreate_table(&self, table_name: &str, ddl: &str) -> EtlResult<()> {
        let schema = quote_pg_identifier(self.schema.as_str());
        let table = quote_pg_identifier(table_name);

        let mut transaction = self.pg_pool.begin().await?;

        // Concurrent workers may create the schema at the same time, so a failure here only
        // rolls back to the savepoint.
        let mut savepoint = Connection::begin(&mut *transaction).await?;
        let create_schema = format!("CREATE SCHEMA IF NOT EXISTS {schema}");
        let created = sqlx::raw_sql(&create_schema).execute(&mut *savepoint).await;
        match created {
            Ok(_) => savepoint.commit().await?,
            Err(err) => {
                warn!(
                    schema = %self.schema,
                    error = %err,
                    "could not create schema, it likely already exists"
                );
                savepoint.rollback().await?;
            }
        }

        let drop_table = format!("DROP TABLE IF EXISTS {schema}.{table}");
        sqlx::raw_sql(&drop_table).execute(&mut *transaction).await?;
        sqlx::raw_sql(ddl).execute(&mut *transaction).await?;

        transaction.commit().await?;

        Ok(())
    }

    /// Compares the live PostgreSQL table with the schema adapted from `snapshot`.
    pub async fn verify_schema(
        &self,
        table_name: &str,
        snapshot: &MySqlSchemaSnapshot,
    ) -> EtlResult<SchemaVerification> {
        let expected = adapt_columns(table_name, snapshot, &self.inspector).await?;

        let mut manager = ConnectionManager::new(self.pg_pool.clone());
        let actual = fetch_postgres_columns(&mut manager, self.schema.as_str(), table_name)
            .await
            .map_err(|err| err.with_table(table_name).with_operation("verify_schema"))?;

        let mismatches = compare_columns(&expected.columns, &actual);
        let outcome = verification_outcome(mismatches, self.environment);

        match &outcome {
            SchemaVerification::Exact => {}
            SchemaVerification::MismatchTolerated(mismatches) => {
                for mismatch in mismatches {
                    warn!(
                        table_name,
                        environment = %self.environment,
                        mismatch = mismatch.as_str(),
                        "schema mismatch tolerated"
                    );
                }
            }
            SchemaVerification::Mismatch(mismatches) => {
                for mismatch in mismatches {
                    error!(table_name, mismatch = mismatch.as_str(), "schema mismatch");
                }
            }
        }

        Ok(outcome)
    }

    /// Creates `table_name` when it is missing, otherwise verifies it.
    ///
    /// Returns whether the table is ready to receive rows.
    pub async fn ensure_table_exists(
        &self,
        table_name: &str,
        snapshot: &MySqlSchemaSnapshot,
    ) -> EtlResult<bool> {
        let mut manager = ConnectionManager::new(self.pg_pool.clone());
        let exists = postgres_table_exists(&mut manager, self.schema.as_str(), table_name)
            .await
            .map_err(|err| err.with_table(table_name).with_operation("ensure_table_exists"))?;
        manager.close_connection();

        if !exists {
            info!(table_name, schema = %self.schema, "postgres table missing, creating it");
            return Ok(self.create_postgres_table(table_name, snapshot).await);
        }

        Ok(self.verify_schema(table_name, snapshot).await?.passed())
    }

    /// Resolves the PostgreSQL type of every column, for use with
    /// [`SchemaConverter::convert_row_data_types`].
    pub async fn resolve_column_types(
        &self,
        table_name: &str,
        snapshot: &MySqlSchemaSnapshot,
    ) -> EtlResult<ColumnTypes> {
        let table = adapt_columns(table_name, snapshot, &self.inspector).await?;

        let columns = table
            .columns
            .into_iter()
            .map(|column| {
                let pg_type = PgType::from_type_name(&column.pg_type);
                (column.name, pg_type)
            })
            .collect();

        Ok(ColumnTypes::new(table_name, columns))
    }

    /// Coerces the values of a row read from MySQL to the column types of the PostgreSQL table.
    pub fn convert_row_data_types(
        &self,
        column_types: &ColumnTypes,
        row: RowData,
    ) -> EtlResult<RowData> {
        convert_row_data_types(column_types, row)
    }
}
