//! Error taxonomy shared by the filesystem adapter, transfer bridge, and
//! protocol front ends.
//!
//! Backend responses collapse onto exactly these kinds; the front ends
//! translate them 1:1 into protocol status codes. Nothing in the gateway
//! retries internally - the first failure kind encountered is surfaced.

use thiserror::Error;

/// Gateway-wide error kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Container or object does not exist (backend 404)
    #[error("not found")]
    NotFound,

    /// Non-empty directory or destination collision (backend 409)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Credentials rejected or access denied (backend 401/403)
    #[error("unauthorized")]
    UnAuthorized,

    /// Operation the gateway refuses by policy: root mutation,
    /// cross-container rename, non-empty-directory rename, symlink/xattr
    /// requests, or a directory opened as a byte stream.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Backend or wire I/O failure, including partial transfers.
    #[error("transport failure: {0}")]
    TransportFailure(String),
}

impl Error {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::UnsupportedOperation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Error::TransportFailure(msg.into())
    }

    /// True for failures at the transport level, which tear down the
    /// session rather than just the current command.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::TransportFailure(_))
    }
}
