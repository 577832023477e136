//! SFTP front end
//!
//! Adapts the SSH subsystem contract onto the filesystem adapter. The
//! engine owns packet framing; this layer owns path resolution, handle
//! state, and mapping gateway errors onto SFTP status codes.
//!
//! Link operations and protocol extensions are refused with
//! `OpUnsupported` rather than pretending to succeed; `setstat` is the
//! one deliberate silent no-op, because common clients issue it after
//! every upload and treat failure as fatal.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, info};

use skiff_core::{ByteStream, Error, ObjectPath, ObjectStore, Stat};

use crate::fs::ObjectFilesystem;
use crate::session::{Checkout, ConnectionPool, SessionGuard, SessionRegistry};
use crate::transfer::Upload;

/// SFTP status codes (draft-ietf-secsh-filexfer).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SftpStatus {
    Ok = 0,
    Eof = 1,
    NoSuchFile = 2,
    PermissionDenied = 3,
    Failure = 4,
    BadMessage = 5,
    NoConnection = 6,
    ConnectionLost = 7,
    OpUnsupported = 8,
}

/// A command failure carrying the status the engine sends back.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("{message}")]
pub struct SftpError {
    pub status: SftpStatus,
    pub message: String,
}

impl SftpError {
    fn new(status: SftpStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn eof() -> Self {
        Self::new(SftpStatus::Eof, "end of file")
    }
}

impl From<Error> for SftpError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound => Self::new(SftpStatus::NoSuchFile, "No Such File"),
            Error::UnAuthorized => Self::new(SftpStatus::PermissionDenied, "Permission Denied"),
            Error::Conflict(msg) => Self::new(SftpStatus::Failure, msg),
            Error::UnsupportedOperation(msg) => Self::new(SftpStatus::OpUnsupported, msg),
            Error::TransportFailure(msg) => Self::new(SftpStatus::ConnectionLost, msg),
        }
    }
}

/// Open flags relevant to this gateway, decoded by the engine from the
/// wire pflags.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
}

/// Attributes as the subsystem reports them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SftpAttrs {
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub permissions: u32,
    pub atime: i64,
    pub mtime: i64,
}

impl From<Stat> for SftpAttrs {
    fn from(stat: Stat) -> Self {
        Self {
            size: stat.size,
            uid: stat.uid,
            gid: stat.gid,
            permissions: stat.mode,
            atime: stat.mtime,
            mtime: stat.mtime,
        }
    }
}

/// One row of a readdir response.
#[derive(Clone, Debug)]
pub struct DirEntry {
    pub name: String,
    /// ls-style presentation line some clients display verbatim.
    pub long_name: String,
    pub attrs: SftpAttrs,
}

fn long_name(name: &str, stat: &Stat) -> String {
    let kind = if stat.is_dir { 'd' } else { '-' };
    let perms = if stat.is_dir { "rwx------" } else { "rw-------" };
    let when = DateTime::<Utc>::from_timestamp(stat.mtime, 0)
        .map(|dt| dt.format("%b %d %H:%M").to_string())
        .unwrap_or_else(|| "Jan 01 00:00".to_string());
    format!(
        "{kind}{perms} {:>4} {:<8} {:<8} {:>12} {when} {name}",
        stat.nlink, "nobody", "nobody", stat.size
    )
}

/// Per-session SFTP subsystem state.
pub struct SftpSession<S> {
    fs: Arc<ObjectFilesystem<S>>,
    pool: Arc<ConnectionPool>,
    guard: SessionGuard,
}

impl<S: ObjectStore> SftpSession<S> {
    /// Count the session against the per-user cap and bind the subsystem
    /// to the authenticated filesystem view.
    pub fn login(
        fs: ObjectFilesystem<S>,
        registry: &Arc<SessionRegistry>,
        pool: ConnectionPool,
        username: &str,
    ) -> Result<Self, SftpError> {
        let guard = registry
            .register(username)
            .map_err(|_| SftpError::new(SftpStatus::ConnectionLost, "too many connections"))?;
        info!(username, protocol = "sftp", "session opened");
        Ok(Self {
            fs: Arc::new(fs),
            pool: Arc::new(pool),
            guard,
        })
    }

    pub fn username(&self) -> &str {
        self.guard.username()
    }

    pub fn logout(&self) {
        info!(username = self.guard.username(), protocol = "sftp", "session closed");
        self.pool.close();
    }

    fn parse(&self, raw: &str) -> Result<ObjectPath, SftpError> {
        ObjectPath::parse(raw).map_err(SftpError::from)
    }

    /// Open a file handle.
    ///
    /// Opening for write with CREATE or TRUNC on an absent object creates
    /// it empty, so clients that open-then-write see the open succeed. A
    /// missing container surfaces as a hard failure at that point.
    pub async fn open_file(
        &self,
        raw: &str,
        flags: OpenFlags,
    ) -> Result<SftpFile<S>, SftpError> {
        let path = self.parse(raw)?;
        if path.object().is_none() {
            return Err(SftpError::new(
                SftpStatus::OpUnsupported,
                "cannot open a directory as a file",
            ));
        }
        let _slot = self.pool.acquire().await?;
        debug!(username = self.guard.username(), path = %path, "cmd.open");
        if flags.write && (flags.create || flags.truncate) {
            match self.fs.check_file_existence(&path).await {
                Ok(_) if !flags.truncate => {}
                Ok(_) | Err(Error::NotFound) => {
                    self.fs.touch_file(&path).await.map_err(|e| match e {
                        Error::NotFound => {
                            SftpError::new(SftpStatus::Failure, "Container Doesn't Exist")
                        }
                        other => other.into(),
                    })?;
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            self.fs.check_file_existence(&path).await?;
        }
        Ok(SftpFile {
            fs: Arc::clone(&self.fs),
            pool: Arc::clone(&self.pool),
            path,
            slot: None,
            reader: None,
            read_offset: 0,
            read_buffer: BytesMut::new(),
            writer: None,
        })
    }

    /// List a directory, prefixed with the `.` and `..` rows clients
    /// expect.
    pub async fn open_directory(&self, raw: &str) -> Result<Vec<DirEntry>, SftpError> {
        let path = self.parse(raw)?;
        let _slot = self.pool.acquire().await?;
        let listing = self.fs.get_full_listing(&path).await?;
        debug!(
            username = self.guard.username(),
            path = %path,
            entries = listing.len(),
            "cmd.opendir"
        );
        let here = Stat::directory(0, None);
        let mut rows = vec![
            DirEntry {
                name: ".".to_string(),
                long_name: long_name(".", &here),
                attrs: here.into(),
            },
            DirEntry {
                name: "..".to_string(),
                long_name: long_name("..", &here),
                attrs: here.into(),
            },
        ];
        rows.extend(listing.into_iter().map(|(name, stat)| DirEntry {
            long_name: long_name(&name, &stat),
            attrs: stat.into(),
            name,
        }));
        Ok(rows)
    }

    /// stat / lstat; the namespace has no links so both are identical.
    pub async fn get_attrs(&self, raw: &str) -> Result<SftpAttrs, SftpError> {
        let path = self.parse(raw)?;
        let _slot = self.pool.acquire().await?;
        Ok(self.fs.get_attrs(&path).await?.into())
    }

    /// setstat: accepted and ignored. Attributes here are synthesized,
    /// and clients that chmod after upload must not see their transfer
    /// fail over it.
    pub async fn set_attrs(&self, raw: &str) -> Result<(), SftpError> {
        let _path = self.parse(raw)?;
        Ok(())
    }

    pub async fn remove_file(&self, raw: &str) -> Result<(), SftpError> {
        let path = self.parse(raw)?;
        let _slot = self.pool.acquire().await?;
        debug!(username = self.guard.username(), path = %path, "cmd.remove");
        match self.fs.remove_file(&path).await {
            Ok(()) | Err(Error::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn remove_directory(&self, raw: &str) -> Result<(), SftpError> {
        let path = self.parse(raw)?;
        let _slot = self.pool.acquire().await?;
        debug!(username = self.guard.username(), path = %path, "cmd.rmdir");
        match self.fs.remove_directory(&path).await {
            Ok(()) | Err(Error::NotFound) => Ok(()),
            Err(Error::Conflict(_)) => {
                Err(SftpError::new(SftpStatus::Failure, "Directory Not Empty"))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError> {
        let old = self.parse(from)?;
        let new = self.parse(to)?;
        let _slot = self.pool.acquire().await?;
        debug!(username = self.guard.username(), from = %old, to = %new, "cmd.rename");
        Ok(self.fs.rename_file(&old, &new).await?)
    }

    pub async fn make_directory(&self, raw: &str) -> Result<(), SftpError> {
        let path = self.parse(raw)?;
        let _slot = self.pool.acquire().await?;
        debug!(username = self.guard.username(), path = %path, "cmd.mkdir");
        self.fs.make_directory(&path).await.map_err(|e| match e {
            Error::NotFound => SftpError::new(SftpStatus::NoSuchFile, "Directory Not Found"),
            other => other.into(),
        })
    }

    /// realpath: pure normalization, no backend round trip.
    pub fn real_path(&self, raw: &str) -> Result<String, SftpError> {
        Ok(self.parse(raw)?.to_absolute())
    }

    pub fn read_link(&self, _raw: &str) -> Result<String, SftpError> {
        Err(SftpError::new(SftpStatus::OpUnsupported, "links not supported"))
    }

    pub fn make_link(&self, _link: &str, _target: &str) -> Result<(), SftpError> {
        Err(SftpError::new(SftpStatus::OpUnsupported, "links not supported"))
    }

    pub fn extended_request(&self, name: &str) -> Result<(), SftpError> {
        Err(SftpError::new(
            SftpStatus::OpUnsupported,
            format!("extension not supported: {name}"),
        ))
    }
}

/// An open file handle.
///
/// The backend streams bodies; it cannot seek. Reads and writes are
/// therefore served at sequential offsets only, which is how SFTP
/// clients issue them in practice. A handle is either reading or
/// writing, never both. While a backend stream is open the handle holds
/// a pool slot, released when the stream ends or the handle closes.
pub struct SftpFile<S> {
    fs: Arc<ObjectFilesystem<S>>,
    pool: Arc<ConnectionPool>,
    path: ObjectPath,
    slot: Option<Checkout>,
    reader: Option<ByteStream>,
    read_offset: u64,
    read_buffer: BytesMut,
    writer: Option<Upload>,
}

impl<S> std::fmt::Debug for SftpFile<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpFile")
            .field("path", &self.path)
            .field("read_offset", &self.read_offset)
            .finish_non_exhaustive()
    }
}

impl<S: ObjectStore> SftpFile<S> {
    /// Serve one read request. EOF is a distinct status, not an error in
    /// the transport sense.
    pub async fn read_chunk(&mut self, offset: u64, len: usize) -> Result<Bytes, SftpError> {
        if self.writer.is_some() {
            return Err(SftpError::new(SftpStatus::Failure, "handle is open for writing"));
        }
        if offset != self.read_offset {
            return Err(SftpError::new(
                SftpStatus::Failure,
                "non-sequential read not supported",
            ));
        }
        if self.reader.is_none() {
            let slot = self.pool.acquire().await?;
            let (_, body) = self.fs.open_download(&self.path, offset).await?;
            self.reader = Some(body);
            self.slot = Some(slot);
        }

        while self.read_buffer.len() < len {
            let reader = match self.reader.as_mut() {
                Some(reader) => reader,
                None => break,
            };
            match reader.next().await {
                Some(Ok(chunk)) => self.read_buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e.into()),
                None => {
                    self.reader = None;
                    self.slot = None;
                    break;
                }
            }
        }
        if self.read_buffer.is_empty() {
            return Err(SftpError::eof());
        }
        let take = len.min(self.read_buffer.len());
        let chunk = self.read_buffer.split_to(take).freeze();
        self.read_offset += chunk.len() as u64;
        Ok(chunk)
    }

    /// Serve one write request. The upload starts lazily on the first
    /// write so a handle opened and closed untouched leaves the object
    /// exactly as `open` created it.
    pub async fn write_chunk(&mut self, offset: u64, data: Bytes) -> Result<(), SftpError> {
        if self.reader.is_some() {
            return Err(SftpError::new(SftpStatus::Failure, "handle is open for reading"));
        }
        if self.writer.is_none() {
            if offset != 0 {
                return Err(SftpError::new(
                    SftpStatus::Failure,
                    "non-sequential write not supported",
                ));
            }
            let slot = self.pool.acquire().await?;
            let mut upload = Upload::begin(self.fs.as_ref(), &self.path, None, None)?;
            upload.start().await?;
            self.slot = Some(slot);
            self.writer = Some(upload);
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SftpError::new(SftpStatus::Failure, "handle is not open for writing"))?;
        if offset != writer.bytes_sent() {
            return Err(SftpError::new(
                SftpStatus::Failure,
                "non-sequential write not supported",
            ));
        }
        Ok(writer.push(data).await?)
    }

    /// Close the handle, completing any in-flight upload.
    pub async fn close(mut self) -> Result<(), SftpError> {
        if let Some(writer) = self.writer.take() {
            writer.finish().await?;
        }
        Ok(())
    }
}
