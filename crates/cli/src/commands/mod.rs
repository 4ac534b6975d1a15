pub mod ask;
pub mod config;
pub mod doctor;
pub mod handoffs;
pub mod migrate;
pub mod rollout;

use std::future::Future;

use serde::Serialize;
use switchboard_core::config::{AppConfig, LogFormat, LoadOptions, LoggingConfig};
use switchboard_db::{connect_with_config, migrations, DbPool};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) const EXIT_CONFIG: u8 = 2;
pub(crate) const EXIT_RUNTIME: u8 = 3;
pub(crate) const EXIT_DATABASE: u8 = 4;
pub(crate) const EXIT_MIGRATION: u8 = 5;
pub(crate) const EXIT_PERSISTENCE: u8 = 6;
pub(crate) const EXIT_INVALID_INPUT: u8 = 7;
pub(crate) const EXIT_TURN: u8 = 8;

/// `(error_class, message, exit_code)`
pub(crate) type Failure = (&'static str, String, u8);

pub(crate) fn persistence_failure(error: impl std::fmt::Display) -> Failure {
    ("persistence", error.to_string(), EXIT_PERSISTENCE)
}

pub(crate) fn invalid_input(message: impl Into<String>) -> Failure {
    ("invalid_input", message.into(), EXIT_INVALID_INPUT)
}

/// Logs go to stderr so stdout stays a single JSON envelope. Repeated calls
/// keep the first subscriber.
pub(crate) fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,switchboard={}", config.level)));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let _ = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

/// Loads configuration, connects, applies pending migrations, then runs
/// `action` against the pool on a current-thread runtime.
pub(crate) fn run_with_store<F, Fut>(command: &str, action: F) -> CommandResult
where
    F: FnOnce(AppConfig, DbPool) -> Fut,
    Fut: Future<Output = Result<String, Failure>>,
{
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                EXIT_CONFIG,
            );
        }
    };
    init_logging(&config.logging);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_RUNTIME,
            );
        }
    };

    let result = runtime.block_on(async move {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DATABASE))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;
        let outcome = action(config, pool.clone()).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(message) => {
            tracing::debug!(event_name = "cli.command.completed", command, "command completed");
            CommandResult::success(command, message)
        }
        Err((error_class, message, exit_code)) => {
            tracing::warn!(
                event_name = "cli.command.failed",
                command,
                error_class,
                exit_code,
                "command failed"
            );
            CommandResult::failure(command, error_class, message, exit_code)
        }
    }
}
