use crate::commands::{run_with_store, CommandResult, EXIT_MIGRATION};
use switchboard_db::migrations;

pub fn run() -> CommandResult {
    run_with_store("migrate", |_config, pool| async move {
        let applied = migrations::applied_versions(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;
        let versions = applied.iter().map(i64::to_string).collect::<Vec<_>>().join(", ");
        Ok(format!("applied pending migrations (schema versions: {versions})"))
    })
}
