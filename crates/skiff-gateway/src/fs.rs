//! Filesystem adapter
//!
//! Maps hierarchical paths onto the flat container/object namespace:
//! containers are top-level directories, objects are files, and
//! intermediate path segments are pseudo-directories - either explicit
//! zero-byte marker objects with the directory content type, or implied
//! purely by deeper object names.
//!
//! One instance is built per authenticated session and shared by whichever
//! protocol front end is active. All methods surface the first error kind
//! encountered; nothing here retries.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use skiff_core::{
    ByteStream, Error, ListOptions, ObjectInfo, ObjectPath, ObjectStore, Stat,
    DIRECTORY_CONTENT_TYPE,
};

use crate::STREAM_CHANNEL_DEPTH;

/// Writable side of a streaming upload, handed to the transfer bridge.
pub struct UploadWriter {
    /// Resolves once the backend has accepted the PUT and bytes may be
    /// pushed. A dropped sender means the upload failed before starting;
    /// the completion receiver carries the cause.
    pub started: oneshot::Receiver<()>,
    /// Body chunks; sending an `Err` aborts the PUT.
    pub chunks: mpsc::Sender<Result<Bytes, Error>>,
    /// Set when the owning transfer is torn down mid-stream. The body
    /// stream checks it before treating a closed channel as a clean end
    /// of input, so an aborted upload can never store a truncated body.
    pub abort: Arc<AtomicBool>,
}

/// Completion signal for an in-flight upload.
pub type UploadCompletion = oneshot::Receiver<Result<(), Error>>;

/// Filesystem view over one authenticated backend account.
pub struct ObjectFilesystem<S> {
    store: Arc<S>,
}

impl<S: ObjectStore> ObjectFilesystem<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Resolve a path to synthesized attributes.
    ///
    /// Root and containers are directories by definition. An object path
    /// resolves to its object if one exists; otherwise, if any deeper
    /// object implies it, to a directory; otherwise NotFound.
    pub async fn get_attrs(&self, path: &ObjectPath) -> Result<Stat, Error> {
        match path {
            ObjectPath::Root => {
                let info = self.store.head_account().await?;
                Ok(Stat::directory(info.bytes_used, None))
            }
            ObjectPath::Container(container) => {
                let info = self.store.head_container(container).await?;
                Ok(Stat::directory(info.bytes_used, None))
            }
            ObjectPath::Object { container, name } => {
                match self.store.head_object(container, name).await {
                    Ok(info) => Ok(Stat::from_metadata(
                        info.size,
                        info.content_type.as_deref(),
                        info.last_modified.as_deref(),
                    )),
                    Err(Error::NotFound) => {
                        if self.has_children(container, name).await? {
                            Ok(Stat::directory(0, None))
                        } else {
                            Err(Error::NotFound)
                        }
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// List the immediate children of a directory path.
    ///
    /// Pages through the backend listing until exhausted. Children implied
    /// by deeper objects appear as directories; duplicates between a
    /// marker object and its implied prefix collapse to one entry.
    pub async fn get_full_listing(
        &self,
        path: &ObjectPath,
    ) -> Result<BTreeMap<String, Stat>, Error> {
        match path {
            ObjectPath::Root => self.list_account().await,
            _ => {
                let container = path
                    .container()
                    .ok_or_else(|| Error::unsupported("no container in path"))?;
                let listing = self.list_container(container, path.child_prefix()).await?;
                // An empty result may mean "empty directory" or "nothing
                // there at all"; only the attrs probe can tell them apart.
                if listing.is_empty() && path.object().is_some() {
                    let stat = self.get_attrs(path).await?;
                    if !stat.is_dir {
                        return Err(Error::unsupported("not a directory"));
                    }
                }
                Ok(listing)
            }
        }
    }

    async fn list_account(&self) -> Result<BTreeMap<String, Stat>, Error> {
        let mut out = BTreeMap::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self.store.list_containers(marker.as_deref()).await?;
            let Some(last) = page.last() else {
                return Ok(out);
            };
            marker = Some(last.name.clone());
            for entry in page {
                out.insert(entry.name, Stat::directory(entry.bytes, None));
            }
        }
    }

    async fn list_container(
        &self,
        container: &str,
        prefix: Option<String>,
    ) -> Result<BTreeMap<String, Stat>, Error> {
        let prefix_len = prefix.as_deref().map_or(0, str::len);
        let mut out: BTreeMap<String, Stat> = BTreeMap::new();
        let mut marker: Option<String> = None;
        loop {
            let opts = ListOptions {
                prefix: prefix.clone(),
                delimiter: Some('/'),
                marker: marker.clone(),
                limit: None,
            };
            let page = self.store.list_objects(container, &opts).await?;
            let Some(last) = page.last() else {
                return Ok(out);
            };
            marker = Some(last.name().to_string());
            for entry in page {
                let full = entry.name();
                let child = full[prefix_len..].trim_end_matches('/').to_string();
                if child.is_empty() {
                    // The marker object for the listed directory itself.
                    continue;
                }
                let stat = match &entry {
                    skiff_core::ObjectEntry::Subdir { .. } => Stat::directory(0, None),
                    skiff_core::ObjectEntry::Object {
                        bytes,
                        content_type,
                        last_modified,
                        ..
                    } => Stat::from_metadata(
                        *bytes,
                        Some(content_type.as_str()),
                        last_modified.as_deref(),
                    ),
                };
                // A marker object and its implied prefix are one child;
                // the directory version wins.
                match out.get(&child) {
                    Some(existing) if existing.is_dir && !stat.is_dir => {}
                    _ => {
                        out.insert(child, stat);
                    }
                }
            }
        }
    }

    /// Create a container (depth 1) or a zero-byte directory marker
    /// (deeper). The parent container must already exist for markers.
    pub async fn make_directory(&self, path: &ObjectPath) -> Result<(), Error> {
        match path {
            ObjectPath::Root => Err(Error::unsupported("cannot create root")),
            ObjectPath::Container(container) => self.store.put_container(container).await,
            ObjectPath::Object { container, name } => {
                self.store
                    .put_object(
                        container,
                        name,
                        Some(DIRECTORY_CONTENT_TYPE),
                        skiff_core::empty_body(),
                    )
                    .await
            }
        }
    }

    /// Delete an empty container or an empty pseudo-directory.
    ///
    /// Fails `Conflict` when children remain - distinguishable from
    /// `NotFound` so front ends can treat deletion-of-absent as cleanup.
    pub async fn remove_directory(&self, path: &ObjectPath) -> Result<(), Error> {
        match path {
            ObjectPath::Root => Err(Error::unsupported("cannot remove root")),
            ObjectPath::Container(container) => self.store.delete_container(container).await,
            ObjectPath::Object { container, name } => {
                if self.has_children(container, name).await? {
                    return Err(Error::conflict("directory not empty"));
                }
                match self.store.head_object(container, name).await {
                    Ok(info) if info.content_type.as_deref() == Some(DIRECTORY_CONTENT_TYPE) => {
                        self.store.delete_object(container, name).await
                    }
                    Ok(_) => Err(Error::unsupported("not a directory")),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Delete a real object. Containers, markers, and implied directories
    /// are refused with a directory-type error, never silently removed.
    pub async fn remove_file(&self, path: &ObjectPath) -> Result<(), Error> {
        let (container, name) = match path {
            ObjectPath::Object { container, name } => (container, name),
            _ => return Err(Error::unsupported("is a directory")),
        };
        let info = self.store.head_object(container, name).await?;
        if info.content_type.as_deref() == Some(DIRECTORY_CONTENT_TYPE) {
            return Err(Error::unsupported("is a directory"));
        }
        self.store.delete_object(container, name).await
    }

    /// Rename an object within one container via copy-then-delete.
    ///
    /// The backend has no atomic rename. If the delete step fails after a
    /// successful copy, the partial state is surfaced as a transport
    /// failure naming both paths.
    pub async fn rename_file(
        &self,
        old: &ObjectPath,
        new: &ObjectPath,
    ) -> Result<(), Error> {
        let (container, old_name) = match old {
            ObjectPath::Root => return Err(Error::unsupported("cannot rename root")),
            ObjectPath::Container(_) => {
                return Err(Error::unsupported("container rename not supported"))
            }
            ObjectPath::Object { container, name } => (container, name),
        };
        let new_name = match new {
            ObjectPath::Object {
                container: new_container,
                name,
            } if new_container == container => name,
            ObjectPath::Object { .. } => {
                return Err(Error::unsupported("cross-container rename not supported"))
            }
            _ => return Err(Error::unsupported("invalid rename destination")),
        };

        // Source must be an existing object without children.
        self.store.head_object(container, old_name).await?;
        if self.has_children(container, old_name).await? {
            return Err(Error::unsupported("cannot rename a directory with children"));
        }
        // Destination must not be a non-empty directory.
        if self.has_children(container, new_name).await? {
            return Err(Error::unsupported(
                "destination is a non-empty directory",
            ));
        }

        self.store
            .copy_object(container, old_name, container, new_name)
            .await?;
        if let Err(e) = self.store.delete_object(container, old_name).await {
            warn!(
                container,
                old = %old_name,
                new = %new_name,
                error = %e,
                "rename partially applied: copy succeeded, delete failed"
            );
            return Err(Error::transport(format!(
                "rename partially applied: {old} copied to {new} but source delete failed: {e}"
            )));
        }
        Ok(())
    }

    /// Existence probe used before opening for read.
    ///
    /// Containers and pseudo-directories cannot be opened as byte streams
    /// and yield a directory-type error, distinct from plain NotFound.
    pub async fn check_file_existence(&self, path: &ObjectPath) -> Result<Stat, Error> {
        let (container, name) = match path {
            ObjectPath::Object { container, name } => (container, name),
            _ => return Err(Error::unsupported("is a directory")),
        };
        let info = self.store.head_object(container, name).await?;
        let stat = Stat::from_metadata(
            info.size,
            info.content_type.as_deref(),
            info.last_modified.as_deref(),
        );
        if stat.is_dir {
            return Err(Error::unsupported("is a directory"));
        }
        Ok(stat)
    }

    /// Create a zero-byte object, used by SFTP open-with-CREATE/TRUNC.
    pub async fn touch_file(&self, path: &ObjectPath) -> Result<(), Error> {
        let (container, name) = match path {
            ObjectPath::Object { container, name } => (container, name),
            _ => return Err(Error::unsupported("cannot touch a directory")),
        };
        self.store
            .put_object(container, name, None, skiff_core::empty_body())
            .await
    }

    /// Begin a streaming upload.
    ///
    /// Uploads directly under the root are unsupported: containers must
    /// pre-exist and objects need a name inside one. The returned writer's
    /// `started` resolves once the backend has accepted the PUT; an upload
    /// into a missing container fails here, before any bytes are pushed.
    /// The completion receiver fires with the final result.
    pub fn start_file_upload(
        &self,
        path: &ObjectPath,
        content_type: Option<String>,
    ) -> Result<(UploadCompletion, UploadWriter), Error> {
        let (container, name) = match path {
            ObjectPath::Object { container, name } => (container.clone(), name.clone()),
            _ => return Err(Error::unsupported("cannot upload to root directory")),
        };

        let (chunk_tx, chunk_rx) = mpsc::channel::<Result<Bytes, Error>>(STREAM_CHANNEL_DEPTH);
        let (started_tx, started_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let abort = Arc::new(AtomicBool::new(false));

        let store = Arc::clone(&self.store);
        let aborted = Arc::clone(&abort);
        tokio::spawn(async move {
            // The PUT is accepted only once the container is known to
            // exist; dropping started_tx on failure tells the writer not
            // to push bytes, and the completion carries the cause.
            if let Err(e) = store.head_container(&container).await {
                drop(started_tx);
                let _ = done_tx.send(Err(e));
                return;
            }
            // A closed chunk channel is a clean end of input only when
            // the abort flag is clear; a torn-down sender whose final
            // error never fit in the channel still fails the PUT.
            let body: ByteStream = Box::pin(futures::stream::unfold(
                (chunk_rx, aborted, false),
                |(mut rx, aborted, done)| async move {
                    if done {
                        return None;
                    }
                    match rx.recv().await {
                        Some(item) => Some((item, (rx, aborted, false))),
                        None if aborted.load(Ordering::Acquire) => Some((
                            Err(Error::transport("upload aborted mid-stream")),
                            (rx, aborted, true),
                        )),
                        None => None,
                    }
                },
            ));
            let _ = started_tx.send(());
            let result = store
                .put_object(&container, &name, content_type.as_deref(), body)
                .await;
            if let Err(e) = &result {
                debug!(container, object = %name, error = %e, "upload failed");
            }
            let _ = done_tx.send(result);
        });

        Ok((
            done_rx,
            UploadWriter {
                started: started_rx,
                chunks: chunk_tx,
                abort,
            },
        ))
    }

    /// Begin a streaming download, pushing bytes into `sink` as they
    /// arrive. The returned receiver resolves with the byte count on a
    /// clean end of body, or the failure that cut the stream short.
    pub fn start_file_download(
        &self,
        path: &ObjectPath,
        offset: u64,
        sink: mpsc::Sender<Bytes>,
    ) -> oneshot::Receiver<Result<u64, Error>> {
        let fs = ObjectFilesystem::new(Arc::clone(&self.store));
        let path = path.clone();
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let mut download = crate::transfer::Download::new(offset);
            let result = download.run(&fs, &path, sink).await;
            let _ = done_tx.send(result);
        });
        done_rx
    }

    /// Open a streaming download starting at `offset`.
    pub async fn open_download(
        &self,
        path: &ObjectPath,
        offset: u64,
    ) -> Result<(ObjectInfo, ByteStream), Error> {
        let (container, name) = match path {
            ObjectPath::Object { container, name } => (container, name),
            _ => return Err(Error::unsupported("is a directory")),
        };
        self.store.get_object(container, name, offset).await
    }

    /// True when any object sits strictly below `name/`.
    async fn has_children(&self, container: &str, name: &str) -> Result<bool, Error> {
        let opts = ListOptions {
            prefix: Some(format!("{name}/")),
            delimiter: None,
            marker: None,
            limit: Some(1),
        };
        match self.store.list_objects(container, &opts).await {
            Ok(rows) => Ok(!rows.is_empty()),
            // No container means no children; existence is judged elsewhere.
            Err(Error::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
