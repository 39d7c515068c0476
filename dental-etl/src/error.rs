//! Error types and result definitions for ETL operations.
//!
//! Every failure is classified by an [`ErrorKind`] and carries a static description, optional
//! dynamic detail, the originating error and the callsite where it was raised. Errors can be
//! enriched with the table and operation they relate to plus free-form detail fields, and rendered
//! as a JSON object with [`EtlError::to_dict`] for structured logging.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

use dental_config::ConfigError;
use serde_json::{Value, json};

/// Convenient result type for ETL operations using [`EtlError`] as the error type.
pub type EtlResult<T> = Result<T, EtlError>;

/// Structured context attached to an [`EtlError`].
#[derive(Debug, Clone, Default)]
struct ErrorContext {
    table_name: Option<String>,
    operation: Option<Cow<'static, str>>,
    details: BTreeMap<String, Value>,
}

/// Detailed payload stored for each [`EtlError`].
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    context: ErrorContext,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for ETL operations.
#[derive(Debug, Clone)]
pub struct EtlError {
    payload: Box<ErrorPayload>,
}

/// Categories of errors raised by the schema and connection core.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Bad or missing configuration files or keys.
    ConfigurationError,
    /// Missing or invalid `ETL_ENVIRONMENT` or environment specific variables.
    EnvironmentError,

    /// Engine construction or connect failures.
    DatabaseConnectionError,
    DatabaseQueryError,
    DatabaseTransactionError,

    /// The requested table does not exist in the source database.
    SchemaValidationError,
    /// A `CREATE TABLE` statement could not be parsed or adapted.
    SchemaTransformationError,
    /// A column type or value could not be converted.
    TypeConversionError,

    /// Raised by extraction and loading layers built on top of this crate.
    DataExtractionError,
    DataLoadingError,

    /// Invalid arguments such as incomplete connection parameters.
    ValidationError,
    IoError,

    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConfigurationError => "ConfigurationError",
            ErrorKind::EnvironmentError => "EnvironmentError",
            ErrorKind::DatabaseConnectionError => "DatabaseConnectionError",
            ErrorKind::DatabaseQueryError => "DatabaseQueryError",
            ErrorKind::DatabaseTransactionError => "DatabaseTransactionError",
            ErrorKind::SchemaValidationError => "SchemaValidationError",
            ErrorKind::SchemaTransformationError => "SchemaTransformationError",
            ErrorKind::TypeConversionError => "TypeConversionError",
            ErrorKind::DataExtractionError => "DataExtractionError",
            ErrorKind::DataLoadingError => "DataLoadingError",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::IoError => "IoError",
            ErrorKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EtlError {
    pub fn kind(&self) -> ErrorKind {
        self.payload.kind
    }

    pub fn description(&self) -> &str {
        &self.payload.description
    }

    /// Returns the dynamic detail of this error, if any.
    pub fn detail(&self) -> Option<&str> {
        self.payload.detail.as_deref()
    }

    pub fn table_name(&self) -> Option<&str> {
        self.payload.context.table_name.as_deref()
    }

    pub fn operation(&self) -> Option<&str> {
        self.payload.context.operation.as_deref()
    }

    pub fn details(&self) -> &BTreeMap<String, Value> {
        &self.payload.context.details
    }

    pub fn backtrace(&self) -> &Backtrace {
        self.payload.backtrace.as_ref()
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.payload.location
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.payload.source = Some(Arc::new(source));
        self
    }

    /// Records the table this error relates to.
    pub fn with_table(mut self, table_name: impl Into<String>) -> Self {
        self.payload.context.table_name = Some(table_name.into());
        self
    }

    /// Records the operation that failed.
    pub fn with_operation(mut self, operation: impl Into<Cow<'static, str>>) -> Self {
        self.payload.context.operation = Some(operation.into());
        self
    }

    /// Adds a structured detail field.
    pub fn with_detail_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.context.details.insert(key.into(), value.into());
        self
    }

    /// Renders the error as a JSON object for logging and monitoring.
    pub fn to_dict(&self) -> Value {
        let payload = &self.payload;

        json!({
            "error_type": payload.kind.as_str(),
            "message": payload.description,
            "detail": payload.detail,
            "table_name": payload.context.table_name,
            "operation": payload.context.operation,
            "details": payload.context.details,
            "source": payload.source.as_ref().map(|source| source.to_string()),
            "location": format!(
                "{}:{}:{}",
                payload.location.file(),
                payload.location.line(),
                payload.location.column()
            ),
        })
    }

    /// Creates an [`EtlError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        let location = Location::caller();
        let backtrace = Arc::new(Backtrace::capture());

        EtlError {
            payload: Box::new(ErrorPayload {
                kind,
                description,
                detail,
                source,
                context: ErrorContext::default(),
                location,
                backtrace,
            }),
        }
    }
}

impl PartialEq for EtlError {
    fn eq(&self, other: &EtlError) -> bool {
        self.payload.kind == other.payload.kind
    }
}

impl Hash for EtlError {
    /// Hashes only the kind and static description so that repeated occurrences of the same
    /// failure group together regardless of table, detail or location.
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.payload.kind.hash(state);
        self.payload.description.hash(state);
    }
}

impl fmt::Display for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let payload = &self.payload;
        let location = payload.location;
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            payload.kind,
            payload.description,
            location.file(),
            location.line(),
            location.column()
        )?;

        write_detail(payload.detail.as_deref(), f, 1)?;
        write_context(&payload.context, f, 1)?;
        write_backtrace(payload.backtrace.as_ref(), f, 1)?;

        Ok(())
    }
}

impl error::Error for EtlError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.payload
            .source
            .as_ref()
            .map(|source| source as &(dyn error::Error + 'static))
    }
}

/// Writes the captured backtrace with indentation.
fn write_backtrace(
    backtrace: &Backtrace,
    f: &mut fmt::Formatter<'_>,
    indent: usize,
) -> fmt::Result {
    let indent_str = "  ".repeat(indent);

    let rendered_backtrace = format!("{backtrace}");
    if !rendered_backtrace.trim().is_empty() {
        write!(f, "\n{indent_str}Backtrace:")?;
        for line in rendered_backtrace.lines() {
            if line.trim().is_empty() {
                write!(f, "\n{indent_str}  ")?;
            } else {
                write!(f, "\n{indent_str}  {line}")?;
            }
        }
    }

    Ok(())
}

/// Writes the detail block with indentation.
fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    if let Some(detail) = detail {
        let indent_str = "  ".repeat(indent);
        if detail.trim().is_empty() {
            write!(f, "\n{indent_str}Detail: <empty>")?;
        } else {
            write!(f, "\n{indent_str}Detail:")?;
            for line in detail.lines() {
                if line.trim().is_empty() {
                    write!(f, "\n{indent_str}  ")?;
                } else {
                    write!(f, "\n{indent_str}  {line}")?;
                }
            }
        }
    }

    Ok(())
}

fn write_context(context: &ErrorContext, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    let indent_str = "  ".repeat(indent);

    if let Some(table_name) = &context.table_name {
        write!(f, "\n{indent_str}Table: {table_name}")?;
    }
    if let Some(operation) = &context.operation {
        write!(f, "\n{indent_str}Operation: {operation}")?;
    }
    for (key, value) in &context.details {
        write!(f, "\n{indent_str}{key}: {value}")?;
    }

    Ok(())
}

/// Creates an [`EtlError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for EtlError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates an [`EtlError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for EtlError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Converts [`std::io::Error`] to [`EtlError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for EtlError {
    #[track_caller]
    fn from(err: std::io::Error) -> EtlError {
        let detail = err.to_string();
        let source = Arc::new(err);
        EtlError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`serde_json::Error`] to [`EtlError`] with [`ErrorKind::TypeConversionError`].
impl From<serde_json::Error> for EtlError {
    #[track_caller]
    fn from(err: serde_json::Error) -> EtlError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => {
                (ErrorKind::TypeConversionError, "JSON conversion failed")
            }
        };

        let detail = err.to_string();
        let source = Arc::new(err);
        EtlError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`std::num::ParseIntError`] to [`EtlError`] with [`ErrorKind::TypeConversionError`].
impl From<std::num::ParseIntError> for EtlError {
    #[track_caller]
    fn from(err: std::num::ParseIntError) -> EtlError {
        let detail = err.to_string();
        let source = Arc::new(err);
        EtlError::from_components(
            ErrorKind::TypeConversionError,
            Cow::Borrowed("Integer parsing failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`std::num::ParseFloatError`] to [`EtlError`] with [`ErrorKind::TypeConversionError`].
impl From<std::num::ParseFloatError> for EtlError {
    #[track_caller]
    fn from(err: std::num::ParseFloatError) -> EtlError {
        let detail = err.to_string();
        let source = Arc::new(err);
        EtlError::from_components(
            ErrorKind::TypeConversionError,
            Cow::Borrowed("Float parsing failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`chrono::ParseError`] to [`EtlError`] with [`ErrorKind::TypeConversionError`].
impl From<chrono::ParseError> for EtlError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> EtlError {
        let detail = err.to_string();
        let source = Arc::new(err);
        EtlError::from_components(
            ErrorKind::TypeConversionError,
            Cow::Borrowed("Datetime parsing failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`ConfigError`] to [`EtlError`].
///
/// Environment selection and connection variable problems map to [`ErrorKind::EnvironmentError`],
/// everything else to [`ErrorKind::ConfigurationError`].
impl From<ConfigError> for EtlError {
    #[track_caller]
    fn from(err: ConfigError) -> EtlError {
        let (kind, description) = match &err {
            ConfigError::MissingEnvironment | ConfigError::InvalidEnvironment(_) => (
                ErrorKind::EnvironmentError,
                "Environment is not configured",
            ),
            ConfigError::MissingConnectionVariables { .. } | ConfigError::InvalidVariable { .. } => {
                (
                    ErrorKind::EnvironmentError,
                    "Connection variables are not configured",
                )
            }
            _ => (ErrorKind::ConfigurationError, "Configuration is invalid"),
        };

        let detail = err.to_string();
        let source = Arc::new(err);
        EtlError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`sqlx::Error`] to [`EtlError`] with the appropriate error kind.
///
/// Pool, I/O and TLS failures map to [`ErrorKind::DatabaseConnectionError`]. Database errors with
/// a transaction SQLSTATE class (`25`, `40`) map to [`ErrorKind::DatabaseTransactionError`], other
/// database errors to [`ErrorKind::DatabaseQueryError`].
impl From<sqlx::Error> for EtlError {
    #[track_caller]
    fn from(err: sqlx::Error) -> EtlError {
        let (kind, description) = match &err {
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some(code) if code.starts_with("25") || code.starts_with("40") => (
                    ErrorKind::DatabaseTransactionError,
                    "Database transaction failed",
                ),
                _ => (ErrorKind::DatabaseQueryError, "Database query failed"),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Configuration(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut => (
                ErrorKind::DatabaseConnectionError,
                "Database connection failed",
            ),
            _ => (ErrorKind::DatabaseQueryError, "Database operation failed"),
        };

        let detail = err.to_string();
        let source = Arc::new(err);
        EtlError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}
