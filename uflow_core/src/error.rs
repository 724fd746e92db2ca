use thiserror::Error;

use crate::fault::Fault;

#[derive(Debug, Error, Clone)]
pub enum UflowError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("{0}")]
    Fault(Fault),
    #[error("no terminal condition reached within {0} ticks")]
    TickBudget(u64),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing transfer collaborator")]
    MissingTransfer,
    #[error("missing operator collaborator")]
    MissingOperator,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
