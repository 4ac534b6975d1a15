use switchboard_core::feature_flags::validate_percentage;
use switchboard_db::{RolloutRepository, SqlRolloutRepository};

use crate::commands::{invalid_input, persistence_failure, run_with_store, CommandResult};

pub fn get() -> CommandResult {
    run_with_store("rollout.get", |config, pool| async move {
        let repo = SqlRolloutRepository::new(pool);
        let rollout =
            repo.load(config.rollout.initial_percentage).await.map_err(persistence_failure)?;
        let overrides = rollout
            .overrides
            .iter()
            .map(|(user_id, enabled)| format!("{user_id}={enabled}"))
            .collect::<Vec<_>>();
        Ok(format!(
            "rollout_percentage={} overrides=[{}]",
            rollout.rollout_percentage,
            overrides.join(", ")
        ))
    })
}

pub fn set(percentage: i64) -> CommandResult {
    run_with_store("rollout.set", |_config, pool| async move {
        let percentage =
            validate_percentage(percentage).map_err(|error| invalid_input(error.to_string()))?;
        SqlRolloutRepository::new(pool)
            .save_percentage(percentage)
            .await
            .map_err(persistence_failure)?;
        Ok(format!("rollout_percentage={percentage}"))
    })
}

pub fn get_override(user_id: &str) -> CommandResult {
    let user_id = user_id.trim().to_string();
    run_with_store("rollout.override.get", |config, pool| async move {
        require_user(&user_id)?;
        let rollout = SqlRolloutRepository::new(pool)
            .load(config.rollout.initial_percentage)
            .await
            .map_err(persistence_failure)?;
        let value = match rollout.overrides.get(&user_id) {
            Some(enabled) => enabled.to_string(),
            None => "unset".to_string(),
        };
        Ok(format!("{user_id}={value} (effective: {})", rollout.is_enabled(&user_id)))
    })
}

pub fn set_override(user_id: &str, enabled: bool) -> CommandResult {
    let user_id = user_id.trim().to_string();
    run_with_store("rollout.override.set", |_config, pool| async move {
        require_user(&user_id)?;
        SqlRolloutRepository::new(pool)
            .save_override(&user_id, enabled)
            .await
            .map_err(persistence_failure)?;
        Ok(format!("{user_id}={enabled}"))
    })
}

pub fn clear_override(user_id: &str) -> CommandResult {
    let user_id = user_id.trim().to_string();
    run_with_store("rollout.override.clear", |_config, pool| async move {
        require_user(&user_id)?;
        SqlRolloutRepository::new(pool)
            .clear_override(&user_id)
            .await
            .map_err(persistence_failure)?;
        Ok(format!("{user_id}=unset"))
    })
}

fn require_user(user_id: &str) -> Result<(), crate::commands::Failure> {
    if user_id.is_empty() {
        return Err(invalid_input("user id must not be empty"));
    }
    Ok(())
}
