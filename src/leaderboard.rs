use crate::core::HistoryResult;
use crate::storage::HistoryLog;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Number of entries a ranking is cut down to.
pub const TOP_N: usize = 10;

/// Rows considered by a ranking query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    /// Rows started within the last 30 days, bound inclusive.
    Last30Days,
    AllTime,
}

impl Window {
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Window::Last30Days => Some(now - Duration::days(30)),
            Window::AllTime => None,
        }
    }
}

/// One ranked entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub name: String,
    pub count: usize,
}

impl Standing {
    pub fn new(name: impl Into<String>, count: usize) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

/// The four tables of the leaderboard command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardReport {
    pub monthly_hosts: Vec<Standing>,
    pub all_time_hosts: Vec<Standing>,
    pub monthly_participants: Vec<Standing>,
    pub all_time_participants: Vec<Standing>,
}

/// Stateless ranking queries over a history log.
#[derive(Clone)]
pub struct Leaderboard {
    history: Arc<dyn HistoryLog>,
}

impl Leaderboard {
    pub fn new(history: Arc<dyn HistoryLog>) -> Self {
        Self { history }
    }

    pub async fn top_hosts(&self, window: Window) -> HistoryResult<Vec<Standing>> {
        self.top_hosts_at(window, Utc::now()).await
    }

    /// Hosts by number of runs, most first, ties in first-seen order.
    pub async fn top_hosts_at(
        &self,
        window: Window,
        now: DateTime<Utc>,
    ) -> HistoryResult<Vec<Standing>> {
        let counts = self.history.top_host_counts(window.since(now)).await?;
        let standings = counts
            .into_iter()
            .map(|c| Standing::new(c.host_name, c.count))
            .collect();
        Ok(rank(standings))
    }

    pub async fn top_participants(&self, window: Window) -> HistoryResult<Vec<Standing>> {
        self.top_participants_at(window, Utc::now()).await
    }

    /// Attendee names by number of runs attended, most first.
    pub async fn top_participants_at(
        &self,
        window: Window,
        now: DateTime<Utc>,
    ) -> HistoryResult<Vec<Standing>> {
        let snapshots = self.history.all_attendee_snapshots(window.since(now)).await?;

        let mut order: Vec<String> = Vec::new();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for name in snapshots.into_iter().flatten() {
            if name.is_empty() {
                continue;
            }
            let count = counts.entry(name.clone()).or_insert_with(|| {
                order.push(name);
                0
            });
            *count += 1;
        }

        let standings = order
            .into_iter()
            .map(|name| {
                let count = counts.get(&name).copied().unwrap_or_default();
                Standing::new(name, count)
            })
            .collect();
        Ok(rank(standings))
    }

    pub async fn report(&self) -> HistoryResult<LeaderboardReport> {
        self.report_at(Utc::now()).await
    }

    pub async fn report_at(&self, now: DateTime<Utc>) -> HistoryResult<LeaderboardReport> {
        Ok(LeaderboardReport {
            monthly_hosts: self.top_hosts_at(Window::Last30Days, now).await?,
            all_time_hosts: self.top_hosts_at(Window::AllTime, now).await?,
            monthly_participants: self.top_participants_at(Window::Last30Days, now).await?,
            all_time_participants: self.top_participants_at(Window::AllTime, now).await?,
        })
    }
}

/// Stable sort by count descending, cut to [`TOP_N`].
fn rank(mut standings: Vec<Standing>) -> Vec<Standing> {
    standings.sort_by(|a, b| b.count.cmp(&a.count));
    standings.truncate(TOP_N);
    standings
}
