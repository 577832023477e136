//! FTP front end
//!
//! Implements the shell contract the FTP protocol engine drives: one
//! shell per authenticated session, commands arriving in order. The
//! shell resolves paths, delegates to the filesystem adapter and
//! transfer bridge, and maps the gateway error taxonomy onto FTP reply
//! codes.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use skiff_core::{Error, ObjectPath, ObjectStore, Stat};

use crate::fs::ObjectFilesystem;
use crate::session::{ConnectionPool, SessionGuard, SessionRegistry};
use crate::transfer::{Download, Upload};

/// Hardcoded SYST reply.
pub const SYSTEM_TYPE: &str = "215 UNIX Type: I";

/// Shell-level failures, each carrying its FTP reply code.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FtpError {
    #[error("file not found")]
    FileNotFound,
    #[error("is a directory")]
    IsADirectory,
    #[error("not a directory")]
    IsNotADirectory,
    #[error("permission denied")]
    PermissionDenied,
    #[error("{0}")]
    CmdNotImplementedForArg(String),
    #[error("too many connections")]
    TooManyConnections,
    #[error("transfer failed: {0}")]
    TransferFailed(String),
}

impl FtpError {
    pub fn reply_code(&self) -> u16 {
        match self {
            FtpError::FileNotFound
            | FtpError::IsADirectory
            | FtpError::IsNotADirectory
            | FtpError::PermissionDenied => 550,
            FtpError::CmdNotImplementedForArg(_) => 504,
            FtpError::TooManyConnections => 421,
            FtpError::TransferFailed(_) => 426,
        }
    }
}

impl From<Error> for FtpError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound => FtpError::FileNotFound,
            Error::UnAuthorized => FtpError::PermissionDenied,
            Error::Conflict(msg) | Error::UnsupportedOperation(msg) => {
                FtpError::CmdNotImplementedForArg(msg)
            }
            Error::TransportFailure(msg) => FtpError::TransferFailed(msg),
        }
    }
}

/// One value in a formatted listing row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    UInt(u64),
    Bool(bool),
    Text(String),
}

/// Fill a listing row for the engine's requested keys.
///
/// Ownership is fixed: the backend has no per-object owner to report.
pub fn stat_format(keys: &[&str], stat: &Stat) -> Vec<Value> {
    keys.iter()
        .map(|key| match *key {
            "size" => Value::UInt(stat.size),
            "directory" => Value::Bool(stat.is_dir),
            "permissions" => Value::UInt(u64::from(stat.mode)),
            "hardlinks" => Value::UInt(u64::from(stat.nlink)),
            "modified" => Value::UInt(stat.mtime.max(0) as u64),
            "owner" | "group" => Value::Text("nobody".to_string()),
            other => Value::Text(format!("unknown key: {other}")),
        })
        .collect()
}

/// Strip recognized LIST flags from the argument before path resolution.
///
/// Clients routinely send `LIST -la /path`; the flags carry no meaning
/// here and must not be mistaken for a path segment.
pub fn strip_list_flags(arg: &str) -> String {
    arg.split_whitespace()
        .filter(|token| {
            !matches!(
                token.to_ascii_lowercase().as_str(),
                "-a" | "-l" | "-la" | "-al"
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Per-session FTP shell.
pub struct FtpShell<S> {
    fs: ObjectFilesystem<S>,
    pool: ConnectionPool,
    guard: SessionGuard,
    allow_no_existing_path: bool,
}

impl<S> std::fmt::Debug for FtpShell<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpShell")
            .field("allow_no_existing_path", &self.allow_no_existing_path)
            .finish_non_exhaustive()
    }
}

impl<S: ObjectStore> FtpShell<S> {
    /// Complete a login: count the session against the per-user cap and
    /// bind a shell to the authenticated filesystem view.
    pub fn login(
        fs: ObjectFilesystem<S>,
        registry: &Arc<SessionRegistry>,
        pool: ConnectionPool,
        username: &str,
        allow_no_existing_path: bool,
    ) -> Result<Self, FtpError> {
        let guard = registry
            .register(username)
            .map_err(|_| FtpError::TooManyConnections)?;
        info!(username, protocol = "ftp", "session opened");
        Ok(Self {
            fs,
            pool,
            guard,
            allow_no_existing_path,
        })
    }

    pub fn username(&self) -> &str {
        self.guard.username()
    }

    /// Tear down the session's backend connections. The registry slot
    /// releases when the shell drops.
    pub fn logout(&self) {
        info!(username = self.guard.username(), protocol = "ftp", "session closed");
        self.pool.close();
    }

    fn parse(&self, raw: &str) -> Result<ObjectPath, FtpError> {
        ObjectPath::parse(raw).map_err(FtpError::from)
    }

    pub async fn stat(&self, raw: &str) -> Result<Stat, FtpError> {
        let path = self.parse(raw)?;
        let _slot = self.pool.acquire().await?;
        Ok(self.fs.get_attrs(&path).await?)
    }

    /// LIST / NLST. Flags are stripped from the raw argument first.
    pub async fn list(&self, raw: &str) -> Result<Vec<(String, Stat)>, FtpError> {
        let cleaned = strip_list_flags(raw);
        let path = self.parse(&cleaned)?;
        let _slot = self.pool.acquire().await?;
        let listing = self.fs.get_full_listing(&path).await?;
        debug!(
            username = self.guard.username(),
            path = %path,
            entries = listing.len(),
            "cmd.LIST"
        );
        Ok(listing.into_iter().collect())
    }

    /// CWD existence probe.
    ///
    /// With `allow_no_existing_path` set, paths below the container level
    /// are assumed present so clients can cd into directories that will
    /// only exist once something is uploaded there.
    pub async fn access(&self, raw: &str) -> Result<(), FtpError> {
        let path = self.parse(raw)?;
        if self.allow_no_existing_path && path.depth() >= 2 {
            return Ok(());
        }
        let _slot = self.pool.acquire().await?;
        let stat = self.fs.get_attrs(&path).await?;
        if !stat.is_dir {
            return Err(FtpError::IsNotADirectory);
        }
        Ok(())
    }

    pub async fn make_directory(&self, raw: &str) -> Result<(), FtpError> {
        let path = self.parse(raw)?;
        let _slot = self.pool.acquire().await?;
        debug!(username = self.guard.username(), path = %path, "cmd.MKD");
        Ok(self.fs.make_directory(&path).await?)
    }

    /// RMD. Deleting an already-absent directory is cleanup, not an
    /// error; deleting a non-empty one is refused hard.
    pub async fn remove_directory(&self, raw: &str) -> Result<(), FtpError> {
        let path = self.parse(raw)?;
        let _slot = self.pool.acquire().await?;
        debug!(username = self.guard.username(), path = %path, "cmd.RMD");
        match self.fs.remove_directory(&path).await {
            Ok(()) | Err(Error::NotFound) => Ok(()),
            Err(Error::Conflict(_)) => Err(FtpError::CmdNotImplementedForArg(
                "Cannot delete non-empty directories.".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// DELE. Absent is cleanup; a directory target reports as such.
    pub async fn remove_file(&self, raw: &str) -> Result<(), FtpError> {
        let path = self.parse(raw)?;
        let _slot = self.pool.acquire().await?;
        debug!(username = self.guard.username(), path = %path, "cmd.DELE");
        match self.fs.remove_file(&path).await {
            Ok(()) | Err(Error::NotFound) => Ok(()),
            Err(Error::UnsupportedOperation(_)) => Err(FtpError::IsADirectory),
            Err(e) => Err(e.into()),
        }
    }

    /// RNFR/RNTO pair.
    pub async fn rename(&self, from: &str, to: &str) -> Result<(), FtpError> {
        let old = self.parse(from)?;
        let new = self.parse(to)?;
        let _slot = self.pool.acquire().await?;
        debug!(username = self.guard.username(), from = %old, to = %new, "cmd.RNTO");
        Ok(self.fs.rename_file(&old, &new).await?)
    }

    /// RETR precheck; a directory cannot be opened as a byte stream.
    pub async fn open_for_reading(&self, raw: &str) -> Result<Stat, FtpError> {
        let path = self.parse(raw)?;
        let _slot = self.pool.acquire().await?;
        match self.fs.check_file_existence(&path).await {
            Ok(stat) => Ok(stat),
            Err(Error::UnsupportedOperation(_)) => Err(FtpError::IsADirectory),
            Err(e) => Err(e.into()),
        }
    }

    /// RETR body: stream the object into the engine's data connection.
    pub async fn retrieve(
        &self,
        raw: &str,
        offset: u64,
        sink: mpsc::Sender<Bytes>,
    ) -> Result<u64, FtpError> {
        let path = self.parse(raw)?;
        let _slot = self.pool.acquire().await?;
        let mut download = Download::new(offset);
        let sent = download.run(&self.fs, &path, sink).await?;
        debug!(username = self.guard.username(), path = %path, bytes = sent, "cmd.RETR");
        Ok(sent)
    }

    /// STOR: open a streaming upload. The engine pushes wire chunks into
    /// the returned transfer and reports success only once it completes.
    pub async fn open_for_writing(
        &self,
        raw: &str,
        declared_size: Option<u64>,
    ) -> Result<(Upload, crate::session::Checkout), FtpError> {
        let path = self.parse(raw)?;
        if path.object().is_none() {
            return Err(FtpError::CmdNotImplementedForArg(
                "Cannot upload files to root directory.".to_string(),
            ));
        }
        let slot = self.pool.acquire().await?;
        debug!(username = self.guard.username(), path = %path, "cmd.STOR");
        let mut upload = Upload::begin(&self.fs, &path, None, declared_size)?;
        upload.start().await?;
        Ok((upload, slot))
    }
}
