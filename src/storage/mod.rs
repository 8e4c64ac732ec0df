pub mod engine;
pub mod memory;
pub mod persistence;
pub mod table;

pub use engine::HistoryLog;
pub use memory::HistoryStore;
pub use persistence::{DurabilityMode, PersistenceManager, WalEntry, WalRecord};
pub use table::{HistoryRow, HistoryTable, HostCount, NewHistoryRow};
