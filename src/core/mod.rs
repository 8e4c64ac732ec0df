pub mod error;
pub mod name;
pub mod types;

pub use error::{ConfigError, HistoryError, HistoryResult, Result, RunError, StartupError};
pub use types::{Activity, Category, Participant, ParticipantId, RunId, RunRecord};
