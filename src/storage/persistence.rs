//! Write-Ahead Logging (WAL) and snapshots for the history log

use super::table::{HistoryRow, HistoryTable};
use crate::core::{HistoryError, HistoryResult, ParticipantId};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const WAL_FILE: &str = "history.wal";
const SNAPSHOT_FILE: &str = "history.snapshot";

// ============================================================================
// WAL Entry Types
// ============================================================================

/// Write-Ahead Log entry types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalEntry {
    Append(HistoryRow),
    SetName { host: ParticipantId, name: String },
    SetAttendees { host: ParticipantId, attendees: Vec<String> },
    Rehost { old: ParticipantId, new: ParticipantId, new_name: String },
}

impl WalEntry {
    /// Replay this entry against `table`.
    pub fn apply(&self, table: &mut HistoryTable) {
        match self {
            WalEntry::Append(row) => {
                table.append(row.clone());
            }
            WalEntry::SetName { host, name } => {
                table.set_name(*host, name);
            }
            WalEntry::SetAttendees { host, attendees } => {
                table.set_attendees(*host, attendees);
            }
            WalEntry::Rehost { old, new, new_name } => {
                table.rehost(*old, *new, new_name);
            }
        }
    }
}

/// A WAL entry stamped with its position in the log.
///
/// Sequence numbers keep growing across checkpoints, so replay can skip
/// entries a snapshot already contains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub seq: u64,
    pub entry: WalEntry,
}

// ============================================================================
// History Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub version: u32,
    pub table: HistoryTable,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: u64,
    pub row_count: usize,
    /// Sequence number of the last WAL entry applied to `table`
    pub last_seq: u64,
}

impl HistorySnapshot {
    pub fn new(table: HistoryTable, last_seq: u64) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let row_count = table.row_count();

        Self {
            version: 1,
            table,
            metadata: SnapshotMetadata {
                created_at,
                row_count,
                last_seq,
            },
        }
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityMode {
    /// fsync after every entry
    Sync,
    /// flush to the OS, no fsync
    #[default]
    Async,
    /// keep everything in memory
    None,
}

// ============================================================================
// WAL Manager
// ============================================================================

pub struct WalManager {
    wal_path: PathBuf,
    wal_file: Option<BufWriter<File>>,
    durability_mode: DurabilityMode,
    entries_since_checkpoint: usize,
    checkpoint_threshold: usize,
}

impl WalManager {
    pub fn new<P: AsRef<Path>>(wal_path: P, durability_mode: DurabilityMode) -> HistoryResult<Self> {
        let wal_path = wal_path.as_ref().to_path_buf();
        if let Some(parent) = wal_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| HistoryError::Io(format!("Failed to create WAL directory: {}", e)))?;
        }

        let wal_file = if durability_mode != DurabilityMode::None {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&wal_path)
                .map_err(|e| HistoryError::Io(format!("Failed to open WAL file: {}", e)))?;
            Some(BufWriter::new(file))
        } else {
            None
        };

        Ok(Self {
            wal_path,
            wal_file,
            durability_mode,
            entries_since_checkpoint: 0,
            checkpoint_threshold: 1000,
        })
    }

    pub fn append(&mut self, record: &WalRecord) -> HistoryResult<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let file = self
            .wal_file
            .as_mut()
            .ok_or_else(|| HistoryError::Io("WAL file not initialized".to_string()))?;
        let serialized = rmp_serde::to_vec(record)
            .map_err(|e| HistoryError::Serialization(format!("Failed to serialize WAL entry: {}", e)))?;
        let len = serialized.len() as u32;
        file.write_all(&len.to_le_bytes())?;
        file.write_all(&serialized)?;
        file.flush()?;
        if self.durability_mode == DurabilityMode::Sync {
            file.get_mut().sync_all()?;
        }
        self.entries_since_checkpoint += 1;
        Ok(())
    }

    /// Read every complete record.
    pub fn read_all(&self) -> HistoryResult<Vec<WalRecord>> {
        read_wal(&self.wal_path)
    }

    pub fn clear(&mut self) -> HistoryResult<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.wal_file = None;
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.wal_path)
            .map_err(|e| HistoryError::Io(format!("Failed to truncate WAL: {}", e)))?;
        // Reopen in append mode so later writes land at the end.
        drop(file);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.wal_path)
            .map_err(|e| HistoryError::Io(format!("Failed to reopen WAL: {}", e)))?;
        self.wal_file = Some(BufWriter::new(file));
        self.entries_since_checkpoint = 0;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.entries_since_checkpoint >= self.checkpoint_threshold
    }

    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint
    }

    pub fn set_checkpoint_threshold(&mut self, threshold: usize) {
        self.checkpoint_threshold = threshold;
    }
}

/// Read every complete record of the WAL at `path`; a missing file is empty.
///
/// A torn trailing record (crash mid-write) ends the log instead of failing
/// recovery.
fn read_wal(path: &Path) -> HistoryResult<Vec<WalRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)
        .map_err(|e| HistoryError::Io(format!("Failed to open WAL for reading: {}", e)))?;
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    loop {
        let mut len_bytes = [0u8; 4];
        match reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                return Err(HistoryError::Io(format!("Failed to read WAL entry length: {}", e)));
            }
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut data = vec![0u8; len];
        match reader.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!(path = %path.display(), "ignoring torn WAL tail");
                break;
            }
            Err(e) => {
                return Err(HistoryError::Io(format!("Failed to read WAL entry data: {}", e)));
            }
        }
        let record: WalRecord = rmp_serde::from_slice(&data)
            .map_err(|e| HistoryError::Corrupt(format!("Failed to deserialize WAL entry: {}", e)))?;
        records.push(record);
    }
    Ok(records)
}

/// Snapshot plus the WAL records written after it.
fn replay(snapshot: &SnapshotManager, wal_path: &Path) -> HistoryResult<(HistoryTable, u64)> {
    let (mut table, mut last_seq) = match snapshot.load()? {
        Some(snapshot) => (snapshot.table, snapshot.metadata.last_seq),
        None => (HistoryTable::new(), 0),
    };

    let mut replayed = 0;
    for record in read_wal(wal_path)? {
        // Already in the snapshot: the WAL was not truncated after it was saved.
        if record.seq <= last_seq {
            continue;
        }
        record.entry.apply(&mut table);
        last_seq = record.seq;
        replayed += 1;
    }
    if replayed > 0 {
        info!(replayed, rows = table.row_count(), "history recovered from WAL");
    }
    Ok((table, last_seq))
}

// ============================================================================
// Snapshot Manager
// ============================================================================

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    /// Write the snapshot to a temp file in the same directory and rename it
    /// into place.
    pub fn save(&self, snapshot: &HistorySnapshot) -> HistoryResult<()> {
        let parent = self
            .snapshot_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .map_err(|e| HistoryError::Io(format!("Failed to create snapshot directory: {}", e)))?;

        let temp = NamedTempFile::new_in(parent)
            .map_err(|e| HistoryError::Io(format!("Failed to create temp file: {}", e)))?;
        let serialized = rmp_serde::to_vec(snapshot)
            .map_err(|e| HistoryError::Serialization(format!("Failed to serialize snapshot: {}", e)))?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            writer.write_all(&serialized)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.snapshot_path)
            .map_err(|e| HistoryError::Io(format!("Failed to rename snapshot: {}", e)))?;
        Ok(())
    }

    pub fn load(&self) -> HistoryResult<Option<HistorySnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path)
            .map_err(|e| HistoryError::Io(format!("Failed to open snapshot: {}", e)))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let snapshot: HistorySnapshot = rmp_serde::from_slice(&data)
            .map_err(|e| HistoryError::Corrupt(format!("Failed to deserialize snapshot: {}", e)))?;
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

// ============================================================================
// Persistence Manager
// ============================================================================

pub struct PersistenceManager {
    wal: WalManager,
    snapshot: SnapshotManager,
    durability_mode: DurabilityMode,
    wal_path: PathBuf,
    last_seq: u64,
}

impl PersistenceManager {
    pub fn new<P: AsRef<Path>>(data_dir: P, durability_mode: DurabilityMode) -> HistoryResult<Self> {
        let data_dir = data_dir.as_ref();
        let wal_path = data_dir.join(WAL_FILE);
        let snapshot_path = data_dir.join(SNAPSHOT_FILE);
        let wal = WalManager::new(&wal_path, durability_mode)?;
        let snapshot = SnapshotManager::new(snapshot_path);
        Ok(Self {
            wal,
            snapshot,
            durability_mode,
            wal_path,
            last_seq: 0,
        })
    }

    /// Rebuild the table of `data_dir` without creating or writing any file.
    pub fn load<P: AsRef<Path>>(data_dir: P) -> HistoryResult<HistoryTable> {
        let data_dir = data_dir.as_ref();
        if !data_dir.is_dir() {
            return Err(HistoryError::Io(format!(
                "History directory not found: {}",
                data_dir.display()
            )));
        }
        let snapshot = SnapshotManager::new(data_dir.join(SNAPSHOT_FILE));
        let (table, _) = replay(&snapshot, &data_dir.join(WAL_FILE))?;
        Ok(table)
    }

    pub fn log(&mut self, entry: &WalEntry) -> HistoryResult<()> {
        let record = WalRecord {
            seq: self.last_seq + 1,
            entry: entry.clone(),
        };
        self.wal.append(&record)?;
        self.last_seq = record.seq;
        Ok(())
    }

    /// Sequence number of the last logged entry
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn checkpoint(&mut self, table: &HistoryTable) -> HistoryResult<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let snapshot = HistorySnapshot::new(table.clone(), self.last_seq);
        self.snapshot.save(&snapshot)?;
        self.wal.clear()?;
        info!(rows = table.row_count(), "history checkpoint written");
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.wal.needs_checkpoint()
    }

    /// Rebuild the table from the last snapshot plus the WAL written after it.
    ///
    /// Logging continues after the highest sequence number seen.
    pub fn recover(&mut self) -> HistoryResult<HistoryTable> {
        let (table, last_seq) = replay(&self.snapshot, &self.wal_path)?;
        self.last_seq = last_seq;
        Ok(table)
    }

    pub fn wal(&self) -> &WalManager {
        &self.wal
    }

    pub fn wal_mut(&mut self) -> &mut WalManager {
        &mut self.wal
    }

    pub fn snapshot(&self) -> &SnapshotManager {
        &self.snapshot
    }
}
