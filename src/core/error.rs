use thiserror::Error;

/// Typed failures reported by registry operations.
///
/// Every operation either succeeds with a value or reports exactly one of
/// these. None of them leave the active-run set modified.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunError {
    #[error("Participant is already hosting or attending a run")]
    HostAlreadyActive,

    #[error("Participant is not hosting a run")]
    NotHost,

    #[error("Run not found")]
    NotFound,

    #[error("Participant is already in a run")]
    AlreadyInARun,

    #[error("Run is full")]
    Full,

    #[error("Participant is not in this run")]
    NotPresent,

    #[error("Action cannot target yourself")]
    SelfTargetInvalid,

    #[error("Registry is shut down")]
    Closed,
}

impl RunError {
    /// Stable machine-readable code used by the HTTP adapter.
    pub fn code(&self) -> &'static str {
        match self {
            RunError::HostAlreadyActive => "host_already_active",
            RunError::NotHost => "not_host",
            RunError::NotFound => "not_found",
            RunError::AlreadyInARun => "already_in_a_run",
            RunError::Full => "full",
            RunError::NotPresent => "not_present",
            RunError::SelfTargetInvalid => "self_target_invalid",
            RunError::Closed => "closed",
        }
    }
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt history data: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for HistoryError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read configuration file: {0}")]
    Read(String),

    #[error("Failed to parse configuration file: {0}")]
    Parse(String),
}

/// Failure to bring a board up from its configuration.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    History(#[from] HistoryError),
}

pub type Result<T> = std::result::Result<T, RunError>;
pub type HistoryResult<T> = std::result::Result<T, HistoryError>;
