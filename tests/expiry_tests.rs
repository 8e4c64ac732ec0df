/// Idle expiry tests
///
/// All tests run on a paused clock and move time forward explicitly.
/// Run with: cargo test --test expiry_tests

use runboard::{
    Activity, Category, HistoryStore, Participant, ParticipantId, RunConfig, RunError,
    RunRegistry,
};
use std::sync::Arc;
use std::time::Duration;

const IDLE: Duration = Duration::from_secs(2 * 60 * 60);

fn new_registry() -> RunRegistry {
    let config = RunConfig::new().idle_timeout(IDLE);
    RunRegistry::new(&config, Arc::new(HistoryStore::in_memory()))
}

async fn open_run(registry: &RunRegistry, host: u64) {
    registry
        .start(
            Participant::new(host, format!("host{}", host)),
            Category::Ladder,
            Activity::Baal,
            "Baal-1",
            "",
        )
        .await
        .unwrap();
}

fn player(id: u64) -> Participant {
    Participant::new(id, format!("host{}", id))
}

/// Move the paused clock and let woken timer tasks run.
async fn advance(by: Duration) {
    tokio::time::advance(by).await;
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_run_expires_after_idle_timeout() {
    let registry = new_registry();
    open_run(&registry, 1).await;
    registry
        .join(ParticipantId(1), Participant::new(2, "guest"))
        .await
        .unwrap();

    advance(IDLE - Duration::from_secs(1)).await;
    assert_eq!(registry.runs().await.len(), 1);

    advance(Duration::from_secs(2)).await;
    assert!(registry.runs().await.is_empty());
    assert!(!registry.is_participant(ParticipantId(2)).await);
    assert_eq!(registry.armed_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reset_expiry_postpones() {
    let registry = new_registry();
    open_run(&registry, 1).await;

    advance(IDLE / 2).await;
    registry.reset_expiry(ParticipantId(1)).await.unwrap();

    advance(IDLE / 2 + Duration::from_secs(60)).await;
    assert_eq!(registry.runs().await.len(), 1);

    advance(IDLE / 2).await;
    assert!(registry.runs().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_next_game_restarts_timer() {
    let registry = new_registry();
    open_run(&registry, 1).await;

    advance(IDLE - Duration::from_secs(10)).await;
    assert_eq!(registry.advance_name(ParticipantId(1)).await.unwrap(), "Baal-2");

    advance(Duration::from_secs(60)).await;
    assert_eq!(registry.runs().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transfer_moves_timer_to_new_host() {
    let registry = new_registry();
    open_run(&registry, 1).await;

    advance(IDLE - Duration::from_secs(10)).await;
    registry
        .transfer_ownership(ParticipantId(1), Participant::new(2, "heir"))
        .await
        .unwrap();
    assert_eq!(registry.armed_timers(), 1);

    advance(Duration::from_secs(60)).await;
    let runs = registry.runs().await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].host.id, ParticipantId(2));

    advance(IDLE).await;
    assert!(registry.runs().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ended_run_timer_spares_restarted_run() {
    let registry = new_registry();
    open_run(&registry, 1).await;

    advance(IDLE / 2).await;
    registry.end(ParticipantId(1)).await.unwrap();
    open_run(&registry, 1).await;

    advance(IDLE / 2 + Duration::from_secs(1)).await;
    assert_eq!(registry.runs().await.len(), 1);

    advance(IDLE / 2).await;
    assert!(registry.runs().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timers_expire_independently() {
    let registry = new_registry();
    open_run(&registry, 1).await;
    advance(IDLE / 2).await;
    open_run(&registry, 2).await;

    advance(IDLE / 2 + Duration::from_secs(1)).await;
    let runs = registry.runs().await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].host.id, ParticipantId(2));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_expiry() {
    let registry = new_registry();
    open_run(&registry, 1).await;
    registry.shutdown().await;
    assert!(registry.runs().await.is_empty());

    // A closed registry opens nothing and arms nothing.
    let started = registry
        .start(player(2), Category::Ladder, Activity::Baal, "Baal-1", "")
        .await;
    assert_eq!(started.unwrap_err(), RunError::Closed);
    advance(IDLE * 2).await;
    assert!(registry.runs().await.is_empty());
    assert_eq!(registry.armed_timers(), 0);
}
