use super::table::{HostCount, NewHistoryRow};
use crate::core::{HistoryResult, ParticipantId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// History log trait - the outbound seam the registry and leaderboard use
///
/// Rows are snapshots of a run. Only the most recent row of a host is ever
/// mutated; every update method returns `false` when the host has no row.
#[async_trait]
pub trait HistoryLog: Send + Sync {
    /// Append a new row and return its id
    async fn append_run(&self, row: NewHistoryRow) -> HistoryResult<u64>;

    /// Overwrite the name of the host's most recent row
    async fn update_most_recent_name(&self, host: ParticipantId, name: &str) -> HistoryResult<bool>;

    /// Overwrite the attendee list of the host's most recent row
    async fn update_most_recent_attendees(
        &self,
        host: ParticipantId,
        attendees: &[String],
    ) -> HistoryResult<bool>;

    /// Re-attribute the old host's most recent row to the new host
    async fn update_most_recent_host(
        &self,
        old_host: ParticipantId,
        new_host: ParticipantId,
        new_host_name: &str,
    ) -> HistoryResult<bool>;

    /// Row counts per host, optionally limited to rows started at or after `since`
    async fn top_host_counts(&self, since: Option<DateTime<Utc>>) -> HistoryResult<Vec<HostCount>>;

    /// Attendee lists of every row in scope
    async fn all_attendee_snapshots(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> HistoryResult<Vec<Vec<String>>>;
}
