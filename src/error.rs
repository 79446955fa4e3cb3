//! Crate-wide error taxonomy.
//!
//! Wire-level failures close the offending connection; load-time failures in
//! the data store or server definition loaders abort startup; persistence
//! failures roll back the active change set.

use thiserror::Error;

/// Errors raised by packet buffer operations.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("packet operation at {position} would leave the window [0, {size}]")]
    OutOfBounds { position: u32, size: u32 },

    #[error("write of {requested} bytes would exceed the packet cap")]
    Overflow { requested: u32 },

    #[error("string is not valid in the requested encoding")]
    BadEncoding,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("overflow: {0}")]
    Overflow(String),

    #[error(transparent)]
    Packet(#[from] PacketError),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Persistence(e.to_string())
    }
}

impl From<mlua::Error> for Error {
    fn from(e: mlua::Error) -> Self {
        Error::Schema(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
