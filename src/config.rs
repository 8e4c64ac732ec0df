use crate::core::{Category, ConfigError};
use crate::storage::DurabilityMode;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default idle period before a run expires.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Default number of attendees a run can hold (the host is not counted).
pub const DEFAULT_CAPACITY: usize = 6;

/// Run tracker configuration
///
/// Built with the builder methods below or loaded from a JSON file.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Idle period after which a run is removed unless renewed
    pub idle_timeout: Duration,

    /// Maximum attendees per run
    pub capacity: usize,

    /// Directory for the durable history log (`None` keeps history in memory)
    pub history_dir: Option<PathBuf>,

    /// Durability of history writes when `history_dir` is set
    pub durability: DurabilityMode,

    /// WAL entries between history snapshots
    pub checkpoint_threshold: usize,

    /// Announcement channel per category
    pub realms: HashMap<Category, u64>,

    /// Address the HTTP adapter binds to
    pub listen_addr: String,
}

impl RunConfig {
    pub fn new() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            capacity: DEFAULT_CAPACITY,
            history_dir: None,
            durability: DurabilityMode::default(),
            checkpoint_threshold: 1000,
            realms: HashMap::new(),
            listen_addr: "0.0.0.0:3000".to_string(),
        }
    }

    /// Set the idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set run capacity
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Persist history under `dir`
    pub fn history_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.history_dir = Some(dir.into());
        self
    }

    /// Set durability mode
    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    /// Set checkpoint threshold
    pub fn checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_threshold = threshold;
        self
    }

    /// Route announcements for `category` to `channel`
    pub fn realm(mut self, category: Category, channel: u64) -> Self {
        self.realms.insert(category, channel);
        self
    }

    /// Set the HTTP listen address
    pub fn listen_addr(mut self, addr: &str) -> Self {
        self.listen_addr = addr.to_string();
        self
    }

    pub fn realm_for(&self, category: Category) -> Option<u64> {
        self.realms.get(&category).copied()
    }

    /// Load configuration from a JSON file
    ///
    /// Missing keys fall back to the defaults of [`RunConfig::new`].
    ///
    /// ```json
    /// {
    ///   "idle_timeout_secs": 7200,
    ///   "capacity": 6,
    ///   "history_dir": "data/history",
    ///   "durability": "sync",
    ///   "realms": { "Ladder": 1337608997997510732 }
    /// }
    /// ```
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut config = Self::new();
        if let Some(secs) = file.idle_timeout_secs {
            config.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) = file.capacity {
            config.capacity = capacity;
        }
        if let Some(dir) = file.history_dir {
            config.history_dir = Some(dir);
        }
        if let Some(mode) = file.durability {
            config.durability = mode;
        }
        if let Some(threshold) = file.checkpoint_threshold {
            config.checkpoint_threshold = threshold;
        }
        if let Some(addr) = file.listen_addr {
            config.listen_addr = addr;
        }
        config.realms.extend(file.realms);

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("capacity must be > 0".to_string()));
        }

        if self.idle_timeout.is_zero() {
            return Err(ConfigError::Invalid("idle_timeout must be > 0".to_string()));
        }

        if self.checkpoint_threshold == 0 {
            return Err(ConfigError::Invalid(
                "checkpoint_threshold must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    idle_timeout_secs: Option<u64>,
    capacity: Option<usize>,
    history_dir: Option<PathBuf>,
    durability: Option<DurabilityMode>,
    checkpoint_threshold: Option<usize>,
    listen_addr: Option<String>,
    #[serde(default)]
    realms: HashMap<Category, u64>,
}
