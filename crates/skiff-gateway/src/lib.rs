//! Skiff Gateway - object storage exposed as an FTP/SFTP filesystem
//!
//! The gateway sits between an external protocol engine (FTP command
//! dispatch, SSH/SFTP framing) and an authenticated [`ObjectStore`]
//! backend. It translates hierarchical filesystem commands into flat
//! container/object operations, streams transfers without buffering whole
//! bodies, and enforces per-user session caps plus backend connection
//! ceilings.
//!
//! Module map:
//! - [`fs`] - path-to-object translation, pseudo-directory semantics
//! - [`transfer`] - upload/download state machines
//! - [`session`] - session registry and backend connection pool
//! - [`ftp`] / [`sftp`] - protocol front ends over the fixed engine contract
//! - [`memstore`] - in-memory backend for tests and local development
//!
//! [`ObjectStore`]: skiff_core::ObjectStore

pub mod fs;
pub mod ftp;
pub mod memstore;
pub mod session;
pub mod sftp;
pub mod transfer;

pub use fs::ObjectFilesystem;
pub use ftp::FtpShell;
pub use session::{Checkout, ConnectionPool, SessionGuard, SessionRegistry};
pub use sftp::SftpSession;
pub use transfer::{Download, TransferState, Upload};

/// Channel depth for streaming bodies between the wire and the backend.
pub const STREAM_CHANNEL_DEPTH: usize = 16;
