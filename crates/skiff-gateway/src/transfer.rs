//! Upload and download state machines
//!
//! Bridges the protocol engine's pull/push of file bytes onto the
//! streaming backend calls in [`crate::fs`]. Each transfer owns exactly
//! one byte accounting ledger; mismatches between declared and observed
//! sizes fail the transfer rather than storing or serving a truncated
//! body.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use skiff_core::{Error, ObjectPath, ObjectStore};

use crate::fs::{ObjectFilesystem, UploadCompletion, UploadWriter};

/// Lifecycle of a single transfer.
///
/// `New` until the backend stream is established, `Streaming` while bytes
/// move, then exactly one of `Completed` or `Failed`. Terminal states
/// never revert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferState {
    New,
    Streaming,
    Completed,
    Failed,
}

/// An in-flight upload.
///
/// Bytes are pushed as they arrive off the wire; the backend PUT consumes
/// them concurrently. Dropping an upload mid-stream aborts the PUT so a
/// truncated object is never stored.
pub struct Upload {
    state: TransferState,
    declared_size: Option<u64>,
    bytes_sent: u64,
    writer: Option<UploadWriter>,
    chunks: Option<mpsc::Sender<Result<Bytes, Error>>>,
    abort: Option<Arc<AtomicBool>>,
    completion: Option<UploadCompletion>,
}

impl std::fmt::Debug for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload")
            .field("state", &self.state)
            .field("declared_size", &self.declared_size)
            .field("bytes_sent", &self.bytes_sent)
            .finish_non_exhaustive()
    }
}

impl Upload {
    /// Begin an upload through `fs`. `declared_size` is the size the
    /// client announced, when the protocol carries one.
    pub fn begin<S: ObjectStore>(
        fs: &ObjectFilesystem<S>,
        path: &ObjectPath,
        content_type: Option<String>,
        declared_size: Option<u64>,
    ) -> Result<Self, Error> {
        let (completion, writer) = fs.start_file_upload(path, content_type)?;
        Ok(Self {
            state: TransferState::New,
            declared_size,
            bytes_sent: 0,
            writer: Some(writer),
            chunks: None,
            abort: None,
            completion: Some(completion),
        })
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Wait for the backend to accept the PUT.
    ///
    /// Fails without entering `Streaming` when the backend refuses the
    /// upload up front, e.g. the target container does not exist.
    pub async fn start(&mut self) -> Result<(), Error> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| Error::transport("upload already started"))?;
        if writer.started.await.is_err() {
            self.state = TransferState::Failed;
            return Err(self.completion_error().await);
        }
        self.chunks = Some(writer.chunks);
        self.abort = Some(writer.abort);
        self.state = TransferState::Streaming;
        Ok(())
    }

    /// Push one chunk toward the backend.
    ///
    /// Exceeding the declared size fails the transfer immediately and
    /// aborts the PUT.
    pub async fn push(&mut self, chunk: Bytes) -> Result<(), Error> {
        if self.state != TransferState::Streaming {
            return Err(Error::transport("upload is not streaming"));
        }
        let next = self.bytes_sent + chunk.len() as u64;
        if let Some(declared) = self.declared_size {
            if next > declared {
                self.fail("received more bytes than declared").await;
                return Err(Error::transport(format!(
                    "upload exceeded declared size of {declared} bytes"
                )));
            }
        }
        let tx = self
            .chunks
            .as_ref()
            .ok_or_else(|| Error::transport("upload channel closed"))?;
        if tx.send(Ok(chunk)).await.is_err() {
            // Backend side hung up; the completion receiver has the cause.
            self.state = TransferState::Failed;
            return Err(self.completion_error().await);
        }
        self.bytes_sent = next;
        Ok(())
    }

    /// Signal end of input and wait for the backend to acknowledge the
    /// stored object.
    pub async fn finish(mut self) -> Result<u64, Error> {
        if self.state != TransferState::Streaming {
            return Err(Error::transport("upload is not streaming"));
        }
        if let Some(declared) = self.declared_size {
            if self.bytes_sent != declared {
                self.fail("received fewer bytes than declared").await;
                return Err(Error::transport(format!(
                    "upload ended at {} of {declared} declared bytes",
                    self.bytes_sent
                )));
            }
        }
        // Dropping the sender ends the body stream.
        self.chunks = None;
        let completion = self
            .completion
            .take()
            .ok_or_else(|| Error::transport("upload already finished"))?;
        match completion.await {
            Ok(Ok(())) => {
                self.state = TransferState::Completed;
                Ok(self.bytes_sent)
            }
            Ok(Err(e)) => {
                self.state = TransferState::Failed;
                Err(e)
            }
            Err(_) => {
                self.state = TransferState::Failed;
                Err(Error::transport("upload task exited without a result"))
            }
        }
    }

    /// Abort the transfer, discarding whatever was sent.
    pub async fn abort(mut self) {
        self.fail("aborted by client").await;
    }

    async fn fail(&mut self, reason: &str) {
        self.state = TransferState::Failed;
        if let Some(abort) = self.abort.take() {
            abort.store(true, Ordering::Release);
        }
        if let Some(tx) = self.chunks.take() {
            let _ = tx.send(Err(Error::transport(reason))).await;
        }
        if let Some(completion) = self.completion.take() {
            // Wait so the backend has settled before the caller reuses
            // the connection.
            let _ = completion.await;
        }
        debug!(bytes_sent = self.bytes_sent, reason, "upload failed");
    }

    async fn completion_error(&mut self) -> Error {
        match self.completion.take() {
            Some(completion) => match completion.await {
                Ok(Ok(())) => Error::transport("backend closed upload stream early"),
                Ok(Err(e)) => e,
                Err(_) => Error::transport("upload task exited without a result"),
            },
            None => Error::transport("upload channel closed"),
        }
    }
}

impl Drop for Upload {
    fn drop(&mut self) {
        // A mid-stream drop must not leave the PUT waiting on more input,
        // which would store a truncated object. The flag is the abort
        // signal; the in-band error is best-effort and may not fit if the
        // channel is full.
        if self.state == TransferState::Streaming {
            if let Some(abort) = self.abort.take() {
                abort.store(true, Ordering::Release);
            }
            if let Some(tx) = self.chunks.take() {
                let _ = tx.try_send(Err(Error::transport("upload dropped mid-stream")));
            }
        }
    }
}

/// A download pump: pulls the backend body and pushes chunks into the
/// protocol engine's sink.
pub struct Download {
    state: TransferState,
    offset: u64,
}

impl Download {
    pub fn new(offset: u64) -> Self {
        Self {
            state: TransferState::New,
            offset,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Stream the object at `path` into `sink`, returning the byte count
    /// on success.
    ///
    /// A body ending before the size the backend announced is a failure:
    /// the client must not mistake a truncated download for a complete
    /// one. A closed sink means the client went away.
    pub async fn run<S: ObjectStore>(
        &mut self,
        fs: &ObjectFilesystem<S>,
        path: &ObjectPath,
        sink: mpsc::Sender<Bytes>,
    ) -> Result<u64, Error> {
        let (info, mut body) = fs.open_download(path, self.offset).await?;
        let expected = info.size.saturating_sub(self.offset);
        self.state = TransferState::Streaming;

        let mut sent: u64 = 0;
        while let Some(item) = body.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.state = TransferState::Failed;
                    return Err(e);
                }
            };
            sent += chunk.len() as u64;
            if sink.send(chunk).await.is_err() {
                self.state = TransferState::Failed;
                return Err(Error::transport("client closed the data connection"));
            }
        }
        if sent != expected {
            self.state = TransferState::Failed;
            return Err(Error::transport(format!(
                "download ended at {sent} of {expected} bytes"
            )));
        }
        self.state = TransferState::Completed;
        Ok(sent)
    }
}
