/// Leaderboard aggregation tests
/// Run with: cargo test --test leaderboard_tests

use chrono::{DateTime, Duration, Utc};
use runboard::storage::NewHistoryRow;
use runboard::{
    Activity, Category, HistoryLog, HistoryStore, Leaderboard, ParticipantId, Standing, Window,
};
use std::sync::Arc;

fn row(host: u64, host_name: &str, attendees: &[&str], started_at: DateTime<Utc>) -> NewHistoryRow {
    NewHistoryRow {
        host_id: ParticipantId(host),
        host_name: host_name.to_string(),
        category: Category::Ladder,
        activity: Activity::ChaosFullClear,
        name: "Chaos".to_string(),
        attendees: attendees.iter().map(|s| s.to_string()).collect(),
        started_at,
    }
}

async fn board_with(rows: Vec<NewHistoryRow>) -> Leaderboard {
    let store = Arc::new(HistoryStore::in_memory());
    for new in rows {
        store.append_run(new).await.unwrap();
    }
    Leaderboard::new(store)
}

#[tokio::test]
async fn test_participants_skip_empty_names() {
    let now = Utc::now();
    let board = board_with(vec![
        row(1, "h", &["a", "b"], now),
        row(1, "h", &["a"], now),
        row(1, "h", &[], now),
        row(1, "h", &[""], now),
    ])
    .await;

    let top = board.top_participants(Window::AllTime).await.unwrap();
    assert_eq!(top, vec![Standing::new("a", 2), Standing::new("b", 1)]);
}

#[tokio::test]
async fn test_monthly_window_excludes_old_rows() {
    let now = Utc::now();
    let board = board_with(vec![
        row(1, "old-host", &["veteran"], now - Duration::days(45)),
        row(1, "old-host", &["veteran"], now - Duration::days(31)),
        row(2, "fresh", &["rookie"], now - Duration::days(2)),
        row(1, "old-host", &["veteran"], now - Duration::days(30)),
    ])
    .await;

    let monthly = board.top_hosts_at(Window::Last30Days, now).await.unwrap();
    assert_eq!(
        monthly,
        vec![Standing::new("fresh", 1), Standing::new("old-host", 1)]
    );

    let all_time = board.top_hosts_at(Window::AllTime, now).await.unwrap();
    assert_eq!(all_time[0], Standing::new("old-host", 3));

    let monthly_participants = board
        .top_participants_at(Window::Last30Days, now)
        .await
        .unwrap();
    assert_eq!(
        monthly_participants,
        vec![Standing::new("rookie", 1), Standing::new("veteran", 1)]
    );
}

#[tokio::test]
async fn test_hosts_named_by_latest_name() {
    let now = Utc::now();
    let board = board_with(vec![
        row(1, "Deckard", &[], now),
        row(2, "Cain", &[], now),
        row(1, "Deckard Cain", &[], now),
    ])
    .await;

    let top = board.top_hosts(Window::AllTime).await.unwrap();
    assert_eq!(
        top,
        vec![Standing::new("Deckard Cain", 2), Standing::new("Cain", 1)]
    );
}

#[tokio::test]
async fn test_rankings_capped_at_ten() {
    let now = Utc::now();
    let rows = (1..=15)
        .map(|host| {
            let name = format!("host{}", host);
            row(host, &name, &[], now)
        })
        .collect();
    let board = board_with(rows).await;

    let top = board.top_hosts(Window::AllTime).await.unwrap();
    assert_eq!(top.len(), 10);
    assert_eq!(top[0].name, "host1");
    assert_eq!(top[9].name, "host10");
}

#[tokio::test]
async fn test_report_has_all_sections() {
    let now = Utc::now();
    let board = board_with(vec![
        row(1, "h1", &["a"], now - Duration::days(60)),
        row(2, "h2", &["b"], now),
    ])
    .await;

    let report = board.report_at(now).await.unwrap();
    assert_eq!(report.monthly_hosts, vec![Standing::new("h2", 1)]);
    assert_eq!(report.all_time_hosts.len(), 2);
    assert_eq!(report.monthly_participants, vec![Standing::new("b", 1)]);
    assert_eq!(report.all_time_participants.len(), 2);
}

#[tokio::test]
async fn test_empty_history() {
    let board = board_with(Vec::new()).await;
    let report = board.report().await.unwrap();
    assert!(report.all_time_hosts.is_empty());
    assert!(report.all_time_participants.is_empty());
}
