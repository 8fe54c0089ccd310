//! Error types for pollq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("dispatcher already stopped; create a new one to resume polling")]
    AlreadyStopped,

    #[error("dispatcher already running")]
    AlreadyRunning,

    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    #[error("invalid dispatcher config: {0}")]
    InvalidConfig(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("worker pool is shut down, job rejected")]
    PoolShutdown,

    #[error("task source error: {0}")]
    Source(String),

    #[error("telemetry setup failed: {0}")]
    Telemetry(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
