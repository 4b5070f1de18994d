/// Core error type for the bulk engine.
///
/// Per-target remote failures are not errors at this level: they become
/// `OperationOutcome::Failed` entries in the ledger. This type covers misuse of
/// the engine and local I/O only.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("invalid runner state: {0}")]
    InvalidState(String),

    #[error("outcome already recorded for target {0}")]
    DuplicateOutcome(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
