use crate::core::{Activity, Category, ParticipantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One run snapshot in the history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub row_id: u64,
    pub host_id: ParticipantId,
    pub host_name: String,
    pub category: Category,
    pub activity: Activity,
    pub name: String,
    pub attendees: Vec<String>,
    pub started_at: DateTime<Utc>,
}

/// Row contents supplied by the registry; the table assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryRow {
    pub host_id: ParticipantId,
    pub host_name: String,
    pub category: Category,
    pub activity: Activity,
    pub name: String,
    pub attendees: Vec<String>,
    pub started_at: DateTime<Utc>,
}

/// Number of rows attributed to one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCount {
    pub host_id: ParticipantId,
    pub host_name: String,
    pub count: usize,
}

/// Append-only row storage with a `host -> most recent row` index.
///
/// The index is maintained explicitly on every append and re-host so that
/// "most recent row for this host" never has to be re-derived by scanning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryTable {
    rows: Vec<HistoryRow>,
    latest_by_host: HashMap<ParticipantId, usize>,
}

impl HistoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[HistoryRow] {
        &self.rows
    }

    pub fn next_row_id(&self) -> u64 {
        self.rows.len() as u64 + 1
    }

    pub fn latest_for(&self, host: ParticipantId) -> Option<&HistoryRow> {
        self.latest_by_host.get(&host).map(|&idx| &self.rows[idx])
    }

    pub fn has_latest(&self, host: ParticipantId) -> bool {
        self.latest_by_host.contains_key(&host)
    }

    /// Build the row that `append` would store for `new`.
    pub fn materialize(&self, new: NewHistoryRow) -> HistoryRow {
        HistoryRow {
            row_id: self.next_row_id(),
            host_id: new.host_id,
            host_name: new.host_name,
            category: new.category,
            activity: new.activity,
            name: new.name,
            attendees: new.attendees,
            started_at: new.started_at,
        }
    }

    pub fn append(&mut self, row: HistoryRow) -> u64 {
        let idx = self.rows.len();
        let row_id = row.row_id;
        self.latest_by_host.insert(row.host_id, idx);
        self.rows.push(row);
        row_id
    }

    pub fn set_name(&mut self, host: ParticipantId, name: &str) -> bool {
        match self.latest_mut(host) {
            Some(row) => {
                row.name = name.to_string();
                true
            }
            None => false,
        }
    }

    pub fn set_attendees(&mut self, host: ParticipantId, attendees: &[String]) -> bool {
        match self.latest_mut(host) {
            Some(row) => {
                row.attendees = attendees.to_vec();
                true
            }
            None => false,
        }
    }

    /// Move the most recent row of `old` to `new`.
    ///
    /// `old` falls back to its previous row, if it has one.
    pub fn rehost(&mut self, old: ParticipantId, new: ParticipantId, new_name: &str) -> bool {
        let Some(idx) = self.latest_by_host.remove(&old) else {
            return false;
        };

        let row = &mut self.rows[idx];
        row.host_id = new;
        row.host_name = new_name.to_string();
        self.latest_by_host.insert(new, idx);

        if let Some(previous) = self.rows.iter().rposition(|r| r.host_id == old) {
            self.latest_by_host.insert(old, previous);
        }
        true
    }

    /// Per-host row counts in first-appearance order.
    ///
    /// A host is named by its most recent in-scope row.
    pub fn host_counts(&self, since: Option<DateTime<Utc>>) -> Vec<HostCount> {
        let mut order: Vec<ParticipantId> = Vec::new();
        let mut counts: HashMap<ParticipantId, HostCount> = HashMap::new();

        for row in self.rows_since(since) {
            let entry = counts.entry(row.host_id).or_insert_with(|| {
                order.push(row.host_id);
                HostCount {
                    host_id: row.host_id,
                    host_name: row.host_name.clone(),
                    count: 0,
                }
            });
            entry.count += 1;
            entry.host_name.clone_from(&row.host_name);
        }

        order
            .into_iter()
            .filter_map(|host| counts.remove(&host))
            .collect()
    }

    pub fn attendee_snapshots(&self, since: Option<DateTime<Utc>>) -> Vec<Vec<String>> {
        self.rows_since(since)
            .map(|row| row.attendees.clone())
            .collect()
    }

    fn rows_since(&self, since: Option<DateTime<Utc>>) -> impl Iterator<Item = &HistoryRow> {
        self.rows
            .iter()
            .filter(move |row| since.is_none_or(|bound| row.started_at >= bound))
    }

    fn latest_mut(&mut self, host: ParticipantId) -> Option<&mut HistoryRow> {
        let idx = *self.latest_by_host.get(&host)?;
        self.rows.get_mut(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(host: u64, name: &str) -> NewHistoryRow {
        NewHistoryRow {
            host_id: ParticipantId(host),
            host_name: format!("host{}", host),
            category: Category::Ladder,
            activity: Activity::Baal,
            name: name.to_string(),
            attendees: Vec::new(),
            started_at: Utc::now(),
        }
    }

    fn push(table: &mut HistoryTable, new: NewHistoryRow) -> u64 {
        let row = table.materialize(new);
        table.append(row)
    }

    #[test]
    fn test_updates_target_most_recent_row() {
        let mut table = HistoryTable::new();
        push(&mut table, row(1, "Baal-01"));
        push(&mut table, row(1, "Baal-02"));

        assert!(table.set_name(ParticipantId(1), "Baal-xx"));
        assert_eq!(table.rows()[0].name, "Baal-01");
        assert_eq!(table.rows()[1].name, "Baal-xx");

        assert!(!table.set_name(ParticipantId(2), "nobody"));
    }

    #[test]
    fn test_rehost_moves_index_and_restores_previous() {
        let mut table = HistoryTable::new();
        push(&mut table, row(1, "first"));
        push(&mut table, row(1, "second"));

        assert!(table.rehost(ParticipantId(1), ParticipantId(2), "bob"));
        assert_eq!(table.latest_for(ParticipantId(2)).unwrap().name, "second");
        assert_eq!(table.latest_for(ParticipantId(2)).unwrap().host_name, "bob");
        assert_eq!(table.latest_for(ParticipantId(1)).unwrap().name, "first");

        assert!(!table.rehost(ParticipantId(3), ParticipantId(4), "nobody"));
    }

    #[test]
    fn test_host_counts_respect_lower_bound() {
        let mut table = HistoryTable::new();
        let mut old = row(1, "old");
        old.started_at = Utc::now() - Duration::days(45);
        push(&mut table, old);
        push(&mut table, row(1, "new"));
        push(&mut table, row(2, "other"));

        let all = table.host_counts(None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].count, 2);

        let recent = table.host_counts(Some(Utc::now() - Duration::days(30)));
        assert_eq!(recent[0].count, 1);
        assert_eq!(recent[1].host_id, ParticipantId(2));
    }
}
