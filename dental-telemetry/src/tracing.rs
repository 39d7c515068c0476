use std::backtrace::{Backtrace, BacktraceStatus};
use std::io::Write;
use std::panic::PanicHookInfo;
use std::sync::{Once, OnceLock};

use dental_config::{ConfigError, Environment};
use thiserror::Error;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, InitError},
};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber, Registry, fmt, layer::SubscriberExt};

/// JSON field name for the runtime environment in logs.
const ENVIRONMENT_KEY_IN_LOG: &str = "environment";
/// JSON field name for the pipeline name in logs.
const PIPELINE_KEY_IN_LOG: &str = "pipeline";

/// Directory receiving the production log files.
const LOG_DIR: &str = "logs";

/// Errors that can occur during tracing initialization.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to build rolling file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("failed to resolve the runtime environment: {0}")]
    Environment(#[from] ConfigError),
}

/// Log flusher handle for ensuring logs are written before shutdown.
///
/// Production mode returns a [`WorkerGuard`] that must be kept alive until the process exits.
#[must_use]
pub enum LogFlusher {
    Flusher(WorkerGuard),
    NullFlusher,
}

static INIT_TEST_TRACING: Once = Once::new();

/// Initializes tracing for tests.
///
/// Output is only produced when `ENABLE_TRACING` is set:
/// ```bash
/// ENABLE_TRACING=1 cargo test test_name
/// ```
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into());
            let _log_flusher =
                configure_dev_tracing(filter).expect("Failed to initialize tracing for tests");
        }
    });
}

static PIPELINE_NAME: OnceLock<String> = OnceLock::new();
static ENVIRONMENT: OnceLock<Environment> = OnceLock::new();

/// Sets the pipeline name injected into every JSON log entry.
pub fn set_global_pipeline_name(pipeline_name: String) {
    let _ = PIPELINE_NAME.set(pipeline_name);
}

pub fn get_global_pipeline_name() -> Option<&'static str> {
    PIPELINE_NAME.get().map(|s| s.as_str())
}

/// Writer wrapper that adds the environment and pipeline name to JSON log entries.
///
/// Entries that are not JSON objects, or that already carry the fields, are written unchanged.
struct FieldInjectingWriter<W> {
    inner: W,
}

impl<W> FieldInjectingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W> Write for FieldInjectingWriter<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(output) = inject_fields(buf) {
            self.inner.write_all(output.as_bytes())?;
            return Ok(buf.len());
        }

        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Returns the entry with the global fields added, or `None` when nothing had to change.
fn inject_fields(buf: &[u8]) -> Option<String> {
    let json_str = std::str::from_utf8(buf).ok()?;
    let serde_json::Value::Object(mut map) =
        serde_json::from_str::<serde_json::Value>(json_str).ok()?
    else {
        return None;
    };

    let mut modified = false;

    if let Some(environment) = ENVIRONMENT.get()
        && !map.contains_key(ENVIRONMENT_KEY_IN_LOG)
    {
        map.insert(
            ENVIRONMENT_KEY_IN_LOG.to_string(),
            serde_json::Value::String(environment.to_string()),
        );
        modified = true;
    }

    if let Some(pipeline_name) = get_global_pipeline_name()
        && !map.contains_key(PIPELINE_KEY_IN_LOG)
    {
        map.insert(
            PIPELINE_KEY_IN_LOG.to_string(),
            serde_json::Value::String(pipeline_name.to_string()),
        );
        modified = true;
    }

    if !modified {
        return None;
    }

    let modified = serde_json::to_string(&map).ok()?;
    if json_str.ends_with('\n') {
        Some(format!("{modified}\n"))
    } else {
        Some(modified)
    }
}

/// Initializes tracing for the application.
///
/// The environment is read from `ETL_ENVIRONMENT`: production writes JSON to daily rolling files
/// under `logs/`, test logs pretty output to the console. The filter comes from `RUST_LOG` and
/// defaults to `info`.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    init_tracing_with_pipeline(app_name, None)
}

/// Initializes tracing and tags every production log entry with `pipeline_name`.
pub fn init_tracing_with_pipeline(
    app_name: &str,
    pipeline_name: Option<String>,
) -> Result<LogFlusher, TracingError> {
    let environment = Environment::load()?;
    let _ = ENVIRONMENT.set(environment);

    if let Some(pipeline_name) = pipeline_name {
        set_global_pipeline_name(pipeline_name);
    }

    // Forward records emitted through the `log` crate by sqlx and friends.
    LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_flusher = if environment.is_production() {
        configure_prod_tracing(filter, app_name)?
    } else {
        configure_dev_tracing(filter)?
    };

    set_tracing_panic_hook();

    Ok(log_flusher)
}

fn configure_prod_tracing(filter: EnvFilter, app_name: &str) -> Result<LogFlusher, TracingError> {
    let file_appender = rolling::Builder::new()
        .filename_prefix(app_name)
        .filename_suffix("log")
        .rotation(rolling::Rotation::DAILY)
        .max_log_files(7)
        .build(LOG_DIR)?;

    let (file_appender, guard) = tracing_appender::non_blocking(file_appender);

    let format = fmt::format()
        .with_level(true)
        .with_ansi(false)
        .with_target(false);

    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .event_format(format)
            .with_writer(move || FieldInjectingWriter::new(file_appender.make_writer()))
            .json()
            .with_current_span(true)
            .with_span_list(true),
    );

    set_global_default(subscriber)?;

    Ok(LogFlusher::Flusher(guard))
}

fn configure_dev_tracing(filter: EnvFilter) -> Result<LogFlusher, TracingError> {
    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .pretty()
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let subscriber = FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .finish();

    set_global_default(subscriber)?;

    Ok(LogFlusher::NullFlusher)
}

/// Replaces the panic hook with one that reports the panic through `tracing` before calling the
/// previous hook, so panics reach the log files in production.
fn set_tracing_panic_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        panic_hook(info);
        prev_hook(info);
    }));
}

fn panic_hook(panic_info: &PanicHookInfo) {
    let backtrace = Backtrace::capture();
    let (backtrace, note) = match backtrace.status() {
        BacktraceStatus::Captured => (Some(backtrace), None),
        BacktraceStatus::Disabled => (
            None,
            Some("run with RUST_BACKTRACE=1 to display backtraces"),
        ),
        BacktraceStatus::Unsupported => {
            (None, Some("backtraces are not supported on this platform"))
        }
        _ => (None, Some("backtrace status is unknown")),
    };

    let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    };

    let location = panic_info.location().map(|location| location.to_string());

    tracing::error!(
        panic.payload = payload,
        payload.location = location,
        panic.backtrace = backtrace.map(tracing::field::display),
        panic.note = note,
        "a panic occurred",
    );
}
