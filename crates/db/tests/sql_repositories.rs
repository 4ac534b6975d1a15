use chrono::{DateTime, Duration, TimeZone, Utc};

use switchboard_core::domain::conversation::ConversationId;
use switchboard_core::domain::handoff::HandoffRecord;
use switchboard_core::domain::specialist::SpecialistId::{
    self, Consultant, Implementation, SolutionArchitect,
};
use switchboard_db::migrations::run_pending;
use switchboard_db::{
    connect_with_settings, DbPool, HandoffRepository, RolloutRepository, SqlHandoffRepository,
    SqlRolloutRepository,
};

async fn migrated_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    run_pending(&pool).await.expect("run migrations");
    pool
}

fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid timestamp")
        + Duration::minutes(minute)
}

fn record(from: SpecialistId, to: SpecialistId, minute: i64) -> HandoffRecord {
    HandoffRecord {
        from_specialist: from,
        to_specialist: to,
        reason: format!("{from} needs {to}"),
        context_summary: "User wants approvals routed by cost center.".to_string(),
        timestamp: at(minute),
    }
}

#[tokio::test]
async fn handoff_records_round_trip_per_conversation() {
    let repo = SqlHandoffRepository::new(migrated_pool().await);
    let conversation = ConversationId("conv-42".to_string());
    let other = ConversationId("conv-43".to_string());

    let first = record(Consultant, SolutionArchitect, 0);
    let second = record(SolutionArchitect, Implementation, 3);
    repo.append(&conversation, &first).await.expect("append first");
    repo.append(&other, &record(Consultant, Implementation, 1)).await.expect("append other");
    repo.append(&conversation, &second).await.expect("append second");

    let listed = repo.list_for_conversation(&conversation).await.expect("list");
    assert_eq!(listed, vec![first, second]);
    assert!(repo
        .list_for_conversation(&ConversationId("missing".to_string()))
        .await
        .expect("list missing")
        .is_empty());
}

#[tokio::test]
async fn failed_batch_stores_nothing() {
    let repo = SqlHandoffRepository::new(migrated_pool().await);
    let conversation = ConversationId("conv-batch".to_string());
    let batch = vec![
        record(Consultant, SolutionArchitect, 0),
        record(SolutionArchitect, Consultant, 1),
        record(Consultant, Consultant, 2),
    ];

    let result = repo.append_all(&conversation, &batch).await;

    assert!(result.is_err(), "self-handoff row violates the table check");
    assert!(repo.list_for_conversation(&conversation).await.expect("list").is_empty());
    assert!(repo.path_counts_between(at(0), at(10)).await.expect("counts").is_empty());

    repo.append_all(&conversation, &batch[..2]).await.expect("valid batch");
    assert_eq!(
        repo.list_for_conversation(&conversation).await.expect("list"),
        batch[..2].to_vec()
    );
    repo.append_all(&conversation, &[]).await.expect("empty batch is a no-op");
}

#[tokio::test]
async fn window_queries_use_half_open_bounds() {
    let repo = SqlHandoffRepository::new(migrated_pool().await);
    let conversation = ConversationId("conv".to_string());
    for (from, to, minute) in [
        (Consultant, SolutionArchitect, 0),
        (SolutionArchitect, Consultant, 10),
        (Consultant, SolutionArchitect, 20),
        (Consultant, Implementation, 30),
    ] {
        repo.append(&conversation, &record(from, to, minute)).await.expect("append");
    }

    let window = repo.list_between(at(0), at(30)).await.expect("window");
    assert_eq!(window.len(), 3);
    assert!(window.iter().all(|stored| stored.conversation_id == conversation));

    let counts = repo.path_counts_between(at(0), at(31)).await.expect("counts");
    assert_eq!(counts.len(), 3);
    assert_eq!(counts[0].from_specialist, Consultant);
    assert_eq!(counts[0].to_specialist, SolutionArchitect);
    assert_eq!(counts[0].count, 2);
}

#[tokio::test]
async fn rollout_settings_persist_and_overrides_are_idempotent() {
    let repo = SqlRolloutRepository::new(migrated_pool().await);

    let initial = repo.load(0).await.expect("load defaults");
    assert_eq!(initial.rollout_percentage, 0);
    assert!(initial.overrides.is_empty());

    repo.save_percentage(25).await.expect("save percentage");
    repo.save_percentage(25).await.expect("save percentage again");
    repo.save_override("user123", true).await.expect("save override");
    repo.save_override("user456", false).await.expect("save override");
    repo.save_override("user123", true).await.expect("save override again");

    let loaded = repo.load(0).await.expect("load");
    assert_eq!(loaded.rollout_percentage, 25);
    assert_eq!(loaded.overrides.len(), 2);
    assert!(loaded.is_enabled("user123"));
    assert!(!loaded.is_enabled("user456"));

    repo.clear_override("user123").await.expect("clear");
    repo.clear_override("user123").await.expect("clear again");
    assert_eq!(repo.load(0).await.expect("load").overrides.get("user123"), None);
}
