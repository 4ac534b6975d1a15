use chrono::{DateTime, Duration, Utc};
use switchboard_core::domain::conversation::ConversationId;
use switchboard_db::{HandoffRepository, SqlHandoffRepository};

use crate::commands::{invalid_input, persistence_failure, run_with_store, CommandResult, Failure};

pub fn list(conversation_id: &str) -> CommandResult {
    let conversation_id = ConversationId(conversation_id.trim().to_string());
    run_with_store("handoffs.list", |_config, pool| async move {
        if conversation_id.0.is_empty() {
            return Err(invalid_input("conversation id must not be empty"));
        }
        let records = SqlHandoffRepository::new(pool)
            .list_for_conversation(&conversation_id)
            .await
            .map_err(persistence_failure)?;
        if records.is_empty() {
            return Ok(format!("no handoffs recorded for `{}`", conversation_id.0));
        }

        let lines = records
            .iter()
            .map(|record| {
                format!(
                    "{} {} -> {}: {}",
                    record.timestamp.to_rfc3339(),
                    record.from_specialist,
                    record.to_specialist,
                    record.reason
                )
            })
            .collect::<Vec<_>>();
        Ok(lines.join("\n"))
    })
}

pub fn window(since: Option<&str>, until: Option<&str>) -> CommandResult {
    let bounds = parse_window(since, until, Utc::now());
    run_with_store("handoffs.window", |_config, pool| async move {
        let (since, until) = bounds?;
        let counts = SqlHandoffRepository::new(pool)
            .path_counts_between(since, until)
            .await
            .map_err(persistence_failure)?;
        let total: u64 = counts.iter().map(|path| path.count).sum();

        let mut lines = vec![format!(
            "{total} handoffs between {} and {}",
            since.to_rfc3339(),
            until.to_rfc3339()
        )];
        lines.extend(counts.iter().map(|path| {
            format!("- {} -> {}: {}", path.from_specialist, path.to_specialist, path.count)
        }));
        Ok(lines.join("\n"))
    })
}

fn parse_window(
    since: Option<&str>,
    until: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), Failure> {
    let until = match until {
        Some(value) => parse_bound("--until", value)?,
        None => now,
    };
    let since = match since {
        Some(value) => parse_bound("--since", value)?,
        None => until - Duration::hours(24),
    };
    if since >= until {
        return Err(invalid_input("--since must be earlier than --until"));
    }
    Ok((since, until))
}

fn parse_bound(flag: &str, value: &str) -> Result<DateTime<Utc>, Failure> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|at| at.with_timezone(&Utc))
        .map_err(|error| invalid_input(format!("{flag} must be an RFC 3339 timestamp: {error}")))
}
