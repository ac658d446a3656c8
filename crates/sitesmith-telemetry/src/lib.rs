mod logging;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default filter directive. Overridden by `RUST_LOG`.
    pub level: String,
    /// JSON lines on stdout instead of the human-readable format.
    pub json: bool,
    /// Whether to persist warn+ logs to SQLite.
    pub persist_warnings: bool,
    /// Path to the log database.
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            persist_warnings: false,
            log_db_path: PathBuf::from("sitesmith-logs.db"),
        }
    }
}

/// Keeps handles produced during initialization.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    /// A guard with no persisted log sink.
    pub fn disabled() -> Self {
        Self { log_sink: None }
    }

    /// Wrap an existing sink (used by tests and embedders).
    pub fn with_sink(sink: Arc<SqliteLogSink>) -> Self {
        Self {
            log_sink: Some(sink),
        }
    }

    /// Access the log sink for querying persisted warnings.
    pub fn logs(&self) -> Option<&SqliteLogSink> {
        self.log_sink.as_deref()
    }
}

/// Initialize the global tracing subscriber. Call once at startup.
///
/// A second call leaves the first subscriber in place.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    let (sqlite_layer, sqlite_sink) = if config.persist_warnings {
        match SqliteLogSink::new(&config.log_db_path) {
            Ok(sink) => {
                let sink = Arc::new(sink);
                (Some(SqliteLogLayer::new(Arc::clone(&sink))), Some(sink))
            }
            Err(e) => {
                eprintln!("sitesmith-telemetry: failed to open log DB: {e}");
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    let installed = tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .with(sqlite_layer)
        .try_init();

    if let Err(e) = installed {
        eprintln!("sitesmith-telemetry: subscriber already installed: {e}");
    }

    TelemetryGuard {
        log_sink: sqlite_sink,
    }
}
