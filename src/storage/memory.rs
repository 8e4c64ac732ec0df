use super::engine::HistoryLog;
use super::persistence::{DurabilityMode, PersistenceManager, WalEntry};
use super::table::{HistoryRow, HistoryTable, HostCount, NewHistoryRow};
use crate::core::{HistoryResult, ParticipantId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// History log backed by an in-memory table, optionally made durable.
///
/// Every mutation is written to the WAL before it is applied to the table,
/// and the table is checkpointed to a snapshot once the WAL grows past the
/// configured threshold.
pub struct HistoryStore {
    table: RwLock<HistoryTable>,
    persistence: Option<Mutex<PersistenceManager>>,
}

impl HistoryStore {
    /// History that lives only as long as the process
    pub fn in_memory() -> Self {
        Self {
            table: RwLock::new(HistoryTable::new()),
            persistence: None,
        }
    }

    /// Open (or create) a durable history under `data_dir`, replaying any
    /// snapshot and WAL found there.
    pub fn open<P: AsRef<Path>>(
        data_dir: P,
        durability: DurabilityMode,
        checkpoint_threshold: usize,
    ) -> HistoryResult<Self> {
        let mut persistence = PersistenceManager::new(data_dir.as_ref(), durability)?;
        persistence.wal_mut().set_checkpoint_threshold(checkpoint_threshold);
        let table = persistence.recover()?;
        info!(
            dir = %data_dir.as_ref().display(),
            rows = table.row_count(),
            "history log opened"
        );

        Ok(Self {
            table: RwLock::new(table),
            persistence: Some(Mutex::new(persistence)),
        })
    }

    /// Load the history under `data_dir` for reading only.
    ///
    /// Nothing is created, truncated or written: a missing directory is an
    /// error, and later mutations only change the in-memory copy.
    pub fn read_only<P: AsRef<Path>>(data_dir: P) -> HistoryResult<Self> {
        let table = PersistenceManager::load(data_dir.as_ref())?;
        info!(
            dir = %data_dir.as_ref().display(),
            rows = table.row_count(),
            "history log loaded read-only"
        );

        Ok(Self {
            table: RwLock::new(table),
            persistence: None,
        })
    }

    pub fn is_durable(&self) -> bool {
        self.persistence.is_some()
    }

    pub async fn row_count(&self) -> usize {
        self.table.read().await.row_count()
    }

    /// Copy of every row, oldest first
    pub async fn rows(&self) -> Vec<HistoryRow> {
        self.table.read().await.rows().to_vec()
    }

    pub async fn latest_for(&self, host: ParticipantId) -> Option<HistoryRow> {
        self.table.read().await.latest_for(host).cloned()
    }

    /// Force a snapshot and truncate the WAL
    pub async fn checkpoint(&self) -> HistoryResult<()> {
        if let Some(persistence) = &self.persistence {
            let table = self.table.read().await;
            persistence.lock().await.checkpoint(&table)?;
        }
        Ok(())
    }

    /// Log `entry` ahead of applying it, then checkpoint if due.
    ///
    /// Caller holds the table write lock, so WAL order equals apply order.
    async fn write(&self, table: &mut HistoryTable, entry: WalEntry) -> HistoryResult<()> {
        if let Some(persistence) = &self.persistence {
            let mut persistence = persistence.lock().await;
            persistence.log(&entry)?;
            entry.apply(table);
            if persistence.needs_checkpoint() {
                persistence.checkpoint(table)?;
            }
        } else {
            entry.apply(table);
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryLog for HistoryStore {
    async fn append_run(&self, row: NewHistoryRow) -> HistoryResult<u64> {
        let mut table = self.table.write().await;
        let row = table.materialize(row);
        let row_id = row.row_id;
        self.write(&mut table, WalEntry::Append(row)).await?;
        Ok(row_id)
    }

    async fn update_most_recent_name(&self, host: ParticipantId, name: &str) -> HistoryResult<bool> {
        let mut table = self.table.write().await;
        if !table.has_latest(host) {
            return Ok(false);
        }
        let entry = WalEntry::SetName {
            host,
            name: name.to_string(),
        };
        self.write(&mut table, entry).await?;
        Ok(true)
    }

    async fn update_most_recent_attendees(
        &self,
        host: ParticipantId,
        attendees: &[String],
    ) -> HistoryResult<bool> {
        let mut table = self.table.write().await;
        if !table.has_latest(host) {
            return Ok(false);
        }
        let entry = WalEntry::SetAttendees {
            host,
            attendees: attendees.to_vec(),
        };
        self.write(&mut table, entry).await?;
        Ok(true)
    }

    async fn update_most_recent_host(
        &self,
        old_host: ParticipantId,
        new_host: ParticipantId,
        new_host_name: &str,
    ) -> HistoryResult<bool> {
        let mut table = self.table.write().await;
        if !table.has_latest(old_host) {
            return Ok(false);
        }
        let entry = WalEntry::Rehost {
            old: old_host,
            new: new_host,
            new_name: new_host_name.to_string(),
        };
        self.write(&mut table, entry).await?;
        Ok(true)
    }

    async fn top_host_counts(&self, since: Option<DateTime<Utc>>) -> HistoryResult<Vec<HostCount>> {
        Ok(self.table.read().await.host_counts(since))
    }

    async fn all_attendee_snapshots(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> HistoryResult<Vec<Vec<String>>> {
        Ok(self.table.read().await.attendee_snapshots(since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Activity, Category};

    fn new_row(host: u64, name: &str, attendees: &[&str]) -> NewHistoryRow {
        NewHistoryRow {
            host_id: ParticipantId(host),
            host_name: format!("host{}", host),
            category: Category::Ladder,
            activity: Activity::Tombs,
            name: name.to_string(),
            attendees: attendees.iter().map(|s| s.to_string()).collect(),
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_updates_only_latest_row() {
        let store = HistoryStore::in_memory();
        store.append_run(new_row(1, "Tombs-1", &[])).await.unwrap();
        store.append_run(new_row(1, "Tombs-2", &["a"])).await.unwrap();

        let names = vec!["a".to_string(), "b".to_string()];
        assert!(store.update_most_recent_attendees(ParticipantId(1), &names).await.unwrap());

        let rows = store.rows().await;
        assert!(rows[0].attendees.is_empty());
        assert_eq!(rows[1].attendees, names);
    }

    #[tokio::test]
    async fn test_update_without_row_reports_false() {
        let store = HistoryStore::in_memory();
        assert!(!store.update_most_recent_name(ParticipantId(9), "x").await.unwrap());
        assert!(!store.update_most_recent_host(ParticipantId(9), ParticipantId(10), "y").await.unwrap());
        assert_eq!(store.row_count().await, 0);
    }

    #[tokio::test]
    async fn test_row_ids_are_sequential() {
        let store = HistoryStore::in_memory();
        assert_eq!(store.append_run(new_row(1, "a", &[])).await.unwrap(), 1);
        assert_eq!(store.append_run(new_row(2, "b", &[])).await.unwrap(), 2);
        assert!(!store.is_durable());
    }
}
