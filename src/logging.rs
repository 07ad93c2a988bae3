//! # Structured Logging Module
//!
//! Environment-aware structured logging that outputs to the console and to a
//! JSON log file, for following plugin supervisors across many concurrent
//! tasks.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// The JSON log file goes under `INGRESS_LOG_DIR`, or `./log` when unset.
pub fn init_structured_logging() {
    let log_dir = std::env::var_os("INGRESS_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("log"));
    init_structured_logging_in(log_dir);
}

/// Same as [`init_structured_logging`] with an explicit log directory
pub fn init_structured_logging_in(log_dir: impl Into<PathBuf>) {
    let log_dir = log_dir.into();
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(build_filter(&log_level));

        if let Err(e) = fs::create_dir_all(&log_dir) {
            // Console-only when the log directory cannot be created
            let _ = tracing_subscriber::registry().with(console_layer).try_init();
            tracing::warn!(
                error = %e,
                dir = %log_dir.display(),
                "Could not create log directory, logging to console only"
            );
            return;
        }

        let pid = process::id();
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_filename = format!("{environment}.{pid}.{timestamp}.log");
        let log_path = log_dir.join(&log_filename);

        let file_appender = tracing_appender::rolling::never(&log_dir, log_filename);
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

        let subscriber = tracing_subscriber::registry().with(console_layer).with(
            fmt::layer()
                .with_writer(file_writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(build_filter(&log_level)),
        );

        if subscriber.try_init().is_err() {
            // Another global subscriber is already installed (host process, tests)
            tracing::debug!("Global tracing subscriber already initialized - continuing");
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = %log_path.display(),
            "🔧 STRUCTURED LOGGING: Initialized with file output"
        );

        // The writer must outlive every logging call in the process
        std::mem::forget(guard);
    });
}

fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("INGRESS_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for plugin lifecycle operations
pub fn log_plugin_operation(
    operation: &str,
    plugin_type: &str,
    plugin_name: &str,
    alloc_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        plugin_type = %plugin_type,
        plugin_name = %plugin_name,
        alloc_id = alloc_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔌 PLUGIN_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
