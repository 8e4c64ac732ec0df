// ============================================================================
// Runboard Library
// ============================================================================

pub mod config;
pub mod core;
pub mod dispatch;
pub mod leaderboard;
pub mod registry;
pub mod storage;
pub mod web;

// Re-export main types for convenience
pub use crate::config::RunConfig;
pub use crate::core::{
    Activity, Category, ConfigError, HistoryError, Participant, ParticipantId, Result, RunError,
    RunId, RunRecord, StartupError,
};
pub use crate::dispatch::{Action, DispatchError, Dispatcher, Invocation, Reply};
pub use crate::leaderboard::{Leaderboard, LeaderboardReport, Standing, Window};
pub use crate::registry::{JoinReceipt, RunRegistry, RunView};
pub use crate::storage::{DurabilityMode, HistoryLog, HistoryStore};

use std::sync::Arc;
use tracing::info;

// ============================================================================
// Board
// ============================================================================

/// A fully wired run board: history, registry, leaderboard and dispatcher
/// built from one configuration.
///
/// # Examples
///
/// ```
/// use runboard::{Action, Activity, Category, Invocation, Participant, RunBoard, RunConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let board = RunBoard::open(RunConfig::new())?;
///
/// let host = Participant::new(1, "Akara");
/// board
///     .dispatcher()
///     .handle(Invocation::new(
///         host,
///         Action::Host {
///             category: Category::Ladder,
///             activity: Activity::Baal,
///             name: "Baal-1".into(),
///             secret: String::new(),
///         },
///     ))
///     .await?;
///
/// assert_eq!(board.registry().runs().await.len(), 1);
/// board.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct RunBoard {
    config: RunConfig,
    history: Arc<HistoryStore>,
    dispatcher: Dispatcher,
}

impl RunBoard {
    /// Validate `config` and open the history it points at.
    ///
    /// Without a `history_dir` the history only lives in memory.
    pub fn open(config: RunConfig) -> std::result::Result<Self, StartupError> {
        config.validate()?;

        let history = match &config.history_dir {
            Some(dir) => HistoryStore::open(dir, config.durability, config.checkpoint_threshold)?,
            None => HistoryStore::in_memory(),
        };
        let history = Arc::new(history);
        let log: Arc<dyn HistoryLog> = history.clone();

        let registry = RunRegistry::new(&config, Arc::clone(&log));
        let dispatcher = Dispatcher::new(registry, Leaderboard::new(log), &config);
        info!(
            capacity = config.capacity,
            idle_secs = config.idle_timeout.as_secs(),
            durable = history.is_durable(),
            "run board opened"
        );

        Ok(Self {
            config,
            history,
            dispatcher,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &RunRegistry {
        self.dispatcher.registry()
    }

    pub fn leaderboard(&self) -> &Leaderboard {
        self.dispatcher.leaderboard()
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// HTTP router serving this board
    pub fn router(&self) -> axum::Router {
        web::router(self.dispatcher.clone())
    }

    /// Stop every timer, drop open runs and checkpoint durable history.
    pub async fn shutdown(&self) {
        self.registry().shutdown().await;
        if let Err(err) = self.history.checkpoint().await {
            tracing::warn!(error = %err, "final history checkpoint failed");
        }
    }
}
