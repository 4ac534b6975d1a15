use std::env;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use switchboard_cli::commands::{ask, doctor, handoffs, migrate, rollout};

#[test]
fn migrate_returns_success_with_in_memory_database() {
    with_env(&[("SWITCHBOARD_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or_default().contains("schema versions: 1, 2"));
    });
}

#[test]
fn migrate_returns_config_failure_for_unsupported_database_url() {
    with_env(&[("SWITCHBOARD_DATABASE_URL", "postgres://localhost/switchboard")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn rollout_commands_reject_out_of_range_initial_percentage() {
    with_env(
        &[
            ("SWITCHBOARD_DATABASE_URL", "sqlite::memory:"),
            ("SWITCHBOARD_ROLLOUT_INITIAL_PERCENTAGE", "101"),
        ],
        || {
            let result = rollout::get();
            assert_eq!(result.exit_code, 2);
            assert_eq!(parse_payload(&result.output)["error_class"], "config_validation");
        },
    );
}

#[test]
fn rollout_percentage_persists_between_invocations() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = database_url(dir.path());

    with_env(&[("SWITCHBOARD_DATABASE_URL", url.as_str())], || {
        let initial = parse_payload(&rollout::get().output);
        assert_eq!(initial["command"], "rollout.get");
        assert_eq!(initial["message"], "rollout_percentage=0 overrides=[]");

        let set = rollout::set(25);
        assert_eq!(set.exit_code, 0);
        assert_eq!(parse_payload(&set.output)["message"], "rollout_percentage=25");

        let after = parse_payload(&rollout::get().output);
        assert_eq!(after["message"], "rollout_percentage=25 overrides=[]");
    });
}

#[test]
fn rollout_set_rejects_out_of_range_percentage() {
    with_env(&[("SWITCHBOARD_DATABASE_URL", "sqlite::memory:")], || {
        for percentage in [150, -1] {
            let result = rollout::set(percentage);
            assert_eq!(result.exit_code, 7, "expected invalid input for {percentage}");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "rollout.set");
            assert_eq!(payload["error_class"], "invalid_input");
        }
    });
}

#[test]
fn rollout_overrides_can_be_set_read_and_cleared() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = database_url(dir.path());

    with_env(&[("SWITCHBOARD_DATABASE_URL", url.as_str())], || {
        let unset = parse_payload(&rollout::get_override("user123").output);
        assert_eq!(unset["message"], "user123=unset (effective: false)");

        assert_eq!(rollout::set_override("user123", true).exit_code, 0);
        let enabled = parse_payload(&rollout::get_override("user123").output);
        assert_eq!(enabled["command"], "rollout.override.get");
        assert_eq!(enabled["message"], "user123=true (effective: true)");

        let listed = parse_payload(&rollout::get().output);
        assert_eq!(listed["message"], "rollout_percentage=0 overrides=[user123=true]");

        let cleared = parse_payload(&rollout::clear_override("user123").output);
        assert_eq!(cleared["message"], "user123=unset");
        let after = parse_payload(&rollout::get_override("user123").output);
        assert_eq!(after["message"], "user123=unset (effective: false)");

        let blank = rollout::set_override("   ", true);
        assert_eq!(blank.exit_code, 7);
    });
}

#[test]
fn handoffs_list_reports_empty_history() {
    with_env(&[("SWITCHBOARD_DATABASE_URL", "sqlite::memory:")], || {
        let result = handoffs::list("conv-unknown");
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "handoffs.list");
        assert_eq!(payload["message"], "no handoffs recorded for `conv-unknown`");
    });
}

#[test]
fn handoffs_window_rejects_inverted_bounds() {
    with_env(&[("SWITCHBOARD_DATABASE_URL", "sqlite::memory:")], || {
        let result =
            handoffs::window(Some("2026-05-02T00:00:00Z"), Some("2026-05-01T00:00:00Z"));
        assert_eq!(result.exit_code, 7);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_input");
    });
}

#[test]
fn ask_uses_fallback_path_when_rollout_is_off() {
    with_env(&[("SWITCHBOARD_DATABASE_URL", "sqlite::memory:")], || {
        let result = ask::run(Some("user123"), Some("conv-cli-1"), "How do I reset my password?");
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "ask");
        assert!(payload["message"].as_str().unwrap_or_default().starts_with("[fallback]"));
    });
}

#[test]
fn ask_uses_multi_specialist_path_for_overridden_user() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = database_url(dir.path());

    with_env(&[("SWITCHBOARD_DATABASE_URL", url.as_str())], || {
        assert_eq!(rollout::set_override("user123", true).exit_code, 0);

        let result = ask::run(Some("user123"), Some("conv-cli-2"), "How do I reset my password?");
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

        let message = parse_payload(&result.output)["message"].as_str().unwrap_or_default().to_string();
        assert!(message.starts_with("[multi_specialist]"), "unexpected message: {message}");
        assert!(message.contains("conversation conv-cli-2"));
    });
}

#[test]
fn ask_rejects_blank_message() {
    with_env(&[("SWITCHBOARD_DATABASE_URL", "sqlite::memory:")], || {
        let result = ask::run(None, None, "   ");
        assert_eq!(result.exit_code, 7);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_input");
    });
}

#[test]
fn doctor_reports_all_checks_after_migration() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = database_url(dir.path());

    with_env(&[("SWITCHBOARD_DATABASE_URL", url.as_str())], || {
        let before: Value = parse_payload(&doctor::run(true));
        assert_eq!(before["overall_status"], "fail");
        assert_eq!(before["checks"][2]["name"], "migrations_current");
        assert_eq!(before["checks"][2]["status"], "fail");

        assert_eq!(migrate::run().exit_code, 0);

        let after: Value = parse_payload(&doctor::run(true));
        assert_eq!(after["overall_status"], "pass");
        let names = after["checks"]
            .as_array()
            .expect("checks array")
            .iter()
            .map(|check| check["name"].as_str().unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, ["config_validation", "database_connectivity", "migrations_current"]);
    });
}

#[test]
fn doctor_skips_store_checks_when_config_fails() {
    with_env(&[("SWITCHBOARD_ORCHESTRATION_CIRCULAR_THRESHOLD", "three")], || {
        let report: Value = parse_payload(&doctor::run(true));
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(report["checks"][0]["status"], "fail");
        assert_eq!(report["checks"][1]["status"], "skipped");
        assert_eq!(report["checks"][2]["status"], "skipped");
    });
}

fn database_url(dir: &Path) -> String {
    format!("sqlite://{}", dir.join("switchboard.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "SWITCHBOARD_DATABASE_URL",
        "SWITCHBOARD_DATABASE_MAX_CONNECTIONS",
        "SWITCHBOARD_DATABASE_TIMEOUT_SECS",
        "SWITCHBOARD_ORCHESTRATION_MAX_STEPS_PER_SPECIALIST",
        "SWITCHBOARD_ORCHESTRATION_CIRCULAR_LOOKBACK",
        "SWITCHBOARD_ORCHESTRATION_CIRCULAR_THRESHOLD",
        "SWITCHBOARD_ORCHESTRATION_TOOL_TIMEOUT_SECS",
        "SWITCHBOARD_CONSENT_PHRASES",
        "SWITCHBOARD_CONSENT_REFUSAL_MARKERS",
        "SWITCHBOARD_CONSENT_LOOKBACK_MESSAGES",
        "SWITCHBOARD_ROLLOUT_INITIAL_PERCENTAGE",
        "SWITCHBOARD_SERVER_BIND_ADDRESS",
        "SWITCHBOARD_SERVER_PORT",
        "SWITCHBOARD_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "SWITCHBOARD_SERVER_SESSION_IDLE_SECS",
        "SWITCHBOARD_ADMIN_API_TOKEN",
        "SWITCHBOARD_LOGGING_LEVEL",
        "SWITCHBOARD_LOGGING_FORMAT",
        "SWITCHBOARD_LOG_LEVEL",
        "SWITCHBOARD_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
