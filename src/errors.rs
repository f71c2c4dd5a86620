use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("device not connected")]
    NotConnected,
    #[error("validation failed: {0}")]
    Validation(#[from] RomError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Range-of-motion integrity violations. These are never clamped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RomError {
    #[error("range is not ordered: min {min} > max {max}")]
    Unordered { min: f32, max: f32 },
    #[error("{outer} cannot be less than {inner}")]
    NotNested {
        inner: &'static str,
        outer: &'static str,
    },
    #[error("{0} completed without a measured range")]
    Missing(&'static str),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("no incomplete row left in the ledger")]
    NoCurrentRow,
    #[error("skipping a mechanism requires an operator comment")]
    MissingComment,
    #[error("unknown mechanism: {0}")]
    UnknownMechanism(String),
    #[error("unknown task: {0}")]
    UnknownTask(String),
    #[error("unknown status: {0}")]
    UnknownStatus(String),
    #[error("expected {expected}, got {got}")]
    OutOfOrder { expected: String, got: String },
}

pub type Result<T> = std::result::Result<T, DriverError>;
