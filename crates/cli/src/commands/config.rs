use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use switchboard_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in effective_values(&config) {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, &'static [&'static str])> {
    let admin_token = config
        .admin
        .api_token
        .as_ref()
        .map(|token| redact_token(token.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    vec![
        ("database.url", config.database.url.clone(), &["SWITCHBOARD_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["SWITCHBOARD_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["SWITCHBOARD_DATABASE_TIMEOUT_SECS"],
        ),
        (
            "orchestration.max_steps_per_specialist",
            config.orchestration.max_steps_per_specialist.to_string(),
            &["SWITCHBOARD_ORCHESTRATION_MAX_STEPS_PER_SPECIALIST"],
        ),
        (
            "orchestration.circular_lookback",
            config.orchestration.circular_lookback.to_string(),
            &["SWITCHBOARD_ORCHESTRATION_CIRCULAR_LOOKBACK"],
        ),
        (
            "orchestration.circular_threshold",
            config.orchestration.circular_threshold.to_string(),
            &["SWITCHBOARD_ORCHESTRATION_CIRCULAR_THRESHOLD"],
        ),
        (
            "orchestration.tool_timeout_secs",
            config.orchestration.tool_timeout_secs.to_string(),
            &["SWITCHBOARD_ORCHESTRATION_TOOL_TIMEOUT_SECS"],
        ),
        ("consent.phrases", config.consent.phrases.join(","), &["SWITCHBOARD_CONSENT_PHRASES"]),
        (
            "consent.refusal_markers",
            config.consent.refusal_markers.join(","),
            &["SWITCHBOARD_CONSENT_REFUSAL_MARKERS"],
        ),
        (
            "consent.lookback_messages",
            config.consent.lookback_messages.to_string(),
            &["SWITCHBOARD_CONSENT_LOOKBACK_MESSAGES"],
        ),
        (
            "rollout.initial_percentage",
            config.rollout.initial_percentage.to_string(),
            &["SWITCHBOARD_ROLLOUT_INITIAL_PERCENTAGE"],
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            &["SWITCHBOARD_SERVER_BIND_ADDRESS"],
        ),
        ("server.port", config.server.port.to_string(), &["SWITCHBOARD_SERVER_PORT"]),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["SWITCHBOARD_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        (
            "server.session_idle_secs",
            config.server.session_idle_secs.to_string(),
            &["SWITCHBOARD_SERVER_SESSION_IDLE_SECS"],
        ),
        ("admin.api_token", admin_token, &["SWITCHBOARD_ADMIN_API_TOKEN"]),
        (
            "logging.level",
            config.logging.level.clone(),
            &["SWITCHBOARD_LOGGING_LEVEL", "SWITCHBOARD_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            &["SWITCHBOARD_LOGGING_FORMAT", "SWITCHBOARD_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["switchboard.toml", "config/switchboard.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the first four characters so operators can tell tokens apart.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    let prefix: String = trimmed.chars().take(4).collect();
    format!("{prefix}***")
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_token};

    #[test]
    fn redaction_keeps_only_a_short_prefix() {
        assert_eq!(redact_token("sb-admin-0123456789abcdef"), "sb-a***");
        assert_eq!(redact_token("   "), "<empty>");
    }

    #[test]
    fn nested_keys_are_found_in_toml() {
        let doc = "[orchestration]\nmax_steps_per_specialist = 4\n"
            .parse::<toml::Value>()
            .expect("valid toml");
        assert!(contains_path(&doc, "orchestration.max_steps_per_specialist"));
        assert!(!contains_path(&doc, "orchestration.circular_threshold"));
    }
}
