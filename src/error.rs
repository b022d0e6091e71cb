//! Error and Result definitions shared by every interface of the crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UrError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("State error: {0}")]
    State(String),

    #[error("No data available: {0}")]
    NoDataAvailable(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// The controller entered a protective or emergency stop while a command was executing.
    #[error("Safety stop: {0}")]
    SafetyStop(String),

    #[error("Dashboard error: {0}")]
    Dashboard(String),

    #[error("Script client error: {0}")]
    ScriptClient(String),

    #[error("Gripper error: {0}")]
    Gripper(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl From<tokio_serial::Error> for UrError {
    fn from(err: tokio_serial::Error) -> Self {
        UrError::Connection(err.to_string())
    }
}

pub type UrResult<T> = Result<T, UrError>;
