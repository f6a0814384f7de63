//! # Structured Logging
//!
//! Environment-aware `tracing` setup plus helpers that give launcher,
//! admission and restart operations a uniform record shape.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber once. Safe to call from every test and
/// entry point; an already-installed subscriber is left in place.
pub fn init_tracing() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let layer = if json_output_requested() {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .boxed()
        };

        if tracing_subscriber::registry()
            .with(layer.with_filter(filter))
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized");
            return;
        }

        tracing::info!(
            environment = %environment,
            pid = std::process::id(),
            "Structured logging initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("STAGEHAND_ENV").unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

fn json_output_requested() -> bool {
    std::env::var("STAGEHAND_LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"))
}

/// Log structured data for execution-level operations
pub fn log_execution_operation(
    operation: &str,
    execution_id: &str,
    pipeline_config_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        execution_id = %execution_id,
        pipeline_config_id = pipeline_config_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "EXECUTION_OPERATION"
    );
}

/// Log structured data for stage-level operations
pub fn log_stage_operation(
    operation: &str,
    execution_id: &str,
    stage_id: &str,
    stage_type: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        execution_id = %execution_id,
        stage_id = %stage_id,
        stage_type = stage_type,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "STAGE_OPERATION"
    );
}
