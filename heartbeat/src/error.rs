//! Crate-level error type.

use thiserror::Error;

use crate::correlator::CorrelationError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("correlation failed: {0}")]
    Correlation(#[from] CorrelationError),

    /// The server never accepted the connection.
    #[error("could not connect to {addr} after {attempts} attempts: {source}")]
    Connect {
        addr: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("logger already initialized: {0}")]
    Logger(#[from] log::SetLoggerError),
}

pub type Result<T> = std::result::Result<T, Error>;
