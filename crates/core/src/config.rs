use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub orchestration: OrchestrationConfig,
    pub consent: ConsentConfig,
    pub rollout: RolloutSettings,
    pub server: ServerConfig,
    pub admin: AdminConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Safety limits for a single conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchestrationConfig {
    pub max_steps_per_specialist: u32,
    /// How many of the most recent handoffs the circular breaker inspects.
    pub circular_lookback: usize,
    /// Occurrences of the same two-specialist pair inside the lookback that trip the breaker.
    pub circular_threshold: usize,
    pub tool_timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsentConfig {
    pub phrases: Vec<String>,
    /// A reply containing any of these is a refusal, even when it also contains a phrase.
    pub refusal_markers: Vec<String>,
    pub lookback_messages: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RolloutSettings {
    pub initial_percentage: u8,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    /// Conversations untouched for this long are dropped from the session registry.
    pub session_idle_secs: u64,
}

#[derive(Clone, Debug, Default)]
pub struct AdminConfig {
    /// Bearer token for the rollout admin endpoints. Admin routes are disabled when unset.
    pub api_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

pub const DEFAULT_CONSENT_PHRASES: [&str; 12] = [
    "yes",
    "please check",
    "go ahead",
    "connect",
    "sure",
    "okay",
    "ok",
    "proceed",
    "do it",
    "check it",
    "check the instance",
    "connect to instance",
];

pub const DEFAULT_CONSENT_REFUSAL_MARKERS: [&str; 11] = [
    "no",
    "not",
    "don't",
    "dont",
    "do not",
    "never",
    "stop",
    "cancel",
    "nope",
    "wait",
    "hold on",
];

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_steps_per_specialist: 10,
            circular_lookback: 5,
            circular_threshold: 3,
            tool_timeout_secs: 20,
        }
    }
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            phrases: DEFAULT_CONSENT_PHRASES.iter().map(|phrase| phrase.to_string()).collect(),
            refusal_markers: DEFAULT_CONSENT_REFUSAL_MARKERS
                .iter()
                .map(|marker| marker.to_string())
                .collect(),
            lookback_messages: 3,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub max_steps_per_specialist: Option<u32>,
    pub rollout_initial_percentage: Option<u8>,
    pub server_port: Option<u16>,
    pub admin_api_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://switchboard.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            orchestration: OrchestrationConfig::default(),
            consent: ConsentConfig::default(),
            rollout: RolloutSettings { initial_percentage: 0 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                session_idle_secs: 1800,
            },
            admin: AdminConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("switchboard.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(orchestration) = patch.orchestration {
            if let Some(max_steps) = orchestration.max_steps_per_specialist {
                self.orchestration.max_steps_per_specialist = max_steps;
            }
            if let Some(lookback) = orchestration.circular_lookback {
                self.orchestration.circular_lookback = lookback;
            }
            if let Some(threshold) = orchestration.circular_threshold {
                self.orchestration.circular_threshold = threshold;
            }
            if let Some(timeout_secs) = orchestration.tool_timeout_secs {
                self.orchestration.tool_timeout_secs = timeout_secs;
            }
        }

        if let Some(consent) = patch.consent {
            if let Some(phrases) = consent.phrases {
                self.consent.phrases = phrases;
            }
            if let Some(refusal_markers) = consent.refusal_markers {
                self.consent.refusal_markers = refusal_markers;
            }
            if let Some(lookback_messages) = consent.lookback_messages {
                self.consent.lookback_messages = lookback_messages;
            }
        }

        if let Some(rollout) = patch.rollout {
            if let Some(initial_percentage) = rollout.initial_percentage {
                self.rollout.initial_percentage = initial_percentage;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(session_idle_secs) = server.session_idle_secs {
                self.server.session_idle_secs = session_idle_secs;
            }
        }

        if let Some(admin) = patch.admin {
            if let Some(api_token) = admin.api_token {
                self.admin.api_token = Some(secret_value(api_token));
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SWITCHBOARD_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SWITCHBOARD_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("SWITCHBOARD_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SWITCHBOARD_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SWITCHBOARD_ORCHESTRATION_MAX_STEPS_PER_SPECIALIST") {
            self.orchestration.max_steps_per_specialist =
                parse_u32("SWITCHBOARD_ORCHESTRATION_MAX_STEPS_PER_SPECIALIST", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_ORCHESTRATION_CIRCULAR_LOOKBACK") {
            self.orchestration.circular_lookback =
                parse_usize("SWITCHBOARD_ORCHESTRATION_CIRCULAR_LOOKBACK", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_ORCHESTRATION_CIRCULAR_THRESHOLD") {
            self.orchestration.circular_threshold =
                parse_usize("SWITCHBOARD_ORCHESTRATION_CIRCULAR_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_ORCHESTRATION_TOOL_TIMEOUT_SECS") {
            self.orchestration.tool_timeout_secs =
                parse_u64("SWITCHBOARD_ORCHESTRATION_TOOL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SWITCHBOARD_CONSENT_PHRASES") {
            self.consent.phrases = split_list(&value);
        }
        if let Some(value) = read_env("SWITCHBOARD_CONSENT_REFUSAL_MARKERS") {
            self.consent.refusal_markers = split_list(&value);
        }
        if let Some(value) = read_env("SWITCHBOARD_CONSENT_LOOKBACK_MESSAGES") {
            self.consent.lookback_messages =
                parse_usize("SWITCHBOARD_CONSENT_LOOKBACK_MESSAGES", &value)?;
        }

        if let Some(value) = read_env("SWITCHBOARD_ROLLOUT_INITIAL_PERCENTAGE") {
            self.rollout.initial_percentage =
                parse_u8("SWITCHBOARD_ROLLOUT_INITIAL_PERCENTAGE", &value)?;
        }

        if let Some(value) = read_env("SWITCHBOARD_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SWITCHBOARD_SERVER_PORT") {
            self.server.port = parse_u16("SWITCHBOARD_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SWITCHBOARD_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_SERVER_SESSION_IDLE_SECS") {
            self.server.session_idle_secs =
                parse_u64("SWITCHBOARD_SERVER_SESSION_IDLE_SECS", &value)?;
        }

        if let Some(value) = read_env("SWITCHBOARD_ADMIN_API_TOKEN") {
            self.admin.api_token = Some(secret_value(value));
        }

        let log_level =
            read_env("SWITCHBOARD_LOGGING_LEVEL").or_else(|| read_env("SWITCHBOARD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SWITCHBOARD_LOGGING_FORMAT").or_else(|| read_env("SWITCHBOARD_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(max_steps) = overrides.max_steps_per_specialist {
            self.orchestration.max_steps_per_specialist = max_steps;
        }
        if let Some(initial_percentage) = overrides.rollout_initial_percentage {
            self.rollout.initial_percentage = initial_percentage;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(api_token) = overrides.admin_api_token {
            self.admin.api_token = Some(secret_value(api_token));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_orchestration(&self.orchestration)?;
        validate_consent(&self.consent)?;
        validate_rollout(&self.rollout)?;
        validate_server(&self.server)?;
        validate_admin(&self.admin)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("switchboard.toml"), PathBuf::from("config/switchboard.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_orchestration(orchestration: &OrchestrationConfig) -> Result<(), ConfigError> {
    if orchestration.max_steps_per_specialist == 0 {
        return Err(ConfigError::Validation(
            "orchestration.max_steps_per_specialist must be greater than zero".to_string(),
        ));
    }

    if orchestration.circular_threshold < 2 {
        return Err(ConfigError::Validation(
            "orchestration.circular_threshold must be at least 2".to_string(),
        ));
    }

    if orchestration.circular_lookback < orchestration.circular_threshold {
        return Err(ConfigError::Validation(
            "orchestration.circular_lookback must be >= orchestration.circular_threshold"
                .to_string(),
        ));
    }

    if orchestration.tool_timeout_secs == 0 || orchestration.tool_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "orchestration.tool_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_consent(consent: &ConsentConfig) -> Result<(), ConfigError> {
    if consent.phrases.iter().all(|phrase| phrase.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "consent.phrases must contain at least one non-empty phrase".to_string(),
        ));
    }

    if consent.lookback_messages == 0 {
        return Err(ConfigError::Validation(
            "consent.lookback_messages must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_rollout(rollout: &RolloutSettings) -> Result<(), ConfigError> {
    if rollout.initial_percentage > 100 {
        return Err(ConfigError::Validation(
            "rollout.initial_percentage must be in range 0..=100".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if server.session_idle_secs == 0 {
        return Err(ConfigError::Validation(
            "server.session_idle_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_admin(admin: &AdminConfig) -> Result<(), ConfigError> {
    if let Some(token) = &admin.api_token {
        if token.expose_secret().trim().len() < 16 {
            return Err(ConfigError::Validation(
                "admin.api_token must be at least 16 characters when set".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(|item| item.trim().to_string()).filter(|item| !item.is_empty()).collect()
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u8(key: &str, value: &str) -> Result<u8, ConfigError> {
    value.parse::<u8>().map_err(|_| invalid_override(key, value))
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    orchestration: Option<OrchestrationPatch>,
    consent: Option<ConsentPatch>,
    rollout: Option<RolloutPatch>,
    server: Option<ServerPatch>,
    admin: Option<AdminPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OrchestrationPatch {
    max_steps_per_specialist: Option<u32>,
    circular_lookback: Option<usize>,
    circular_threshold: Option<usize>,
    tool_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConsentPatch {
    phrases: Option<Vec<String>>,
    refusal_markers: Option<Vec<String>>,
    lookback_messages: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RolloutPatch {
    initial_percentage: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    session_idle_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AdminPatch {
    api_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
