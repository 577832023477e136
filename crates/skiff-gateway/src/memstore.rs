//! In-memory object store
//!
//! A faithful stand-in for the real backend, used by the test suite and
//! for local development. It reproduces the behaviors the gateway's edge
//! cases depend on: PUT into an absent container is NotFound, deleting a
//! non-empty container is Conflict, and delimiter listings interleave
//! object rows with deduplicated common-prefix rows, paginated by marker.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;

use skiff_core::{
    empty_body, AccountInfo, ByteStream, ContainerEntry, ContainerInfo, Error, ListOptions,
    ObjectEntry, ObjectInfo, ObjectStore,
};

/// Chunk size used when streaming bodies back out.
const READ_CHUNK: usize = 32 * 1024;

/// Default page size for listings, as a real backend would cap them.
const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    last_modified: String,
}

#[derive(Default)]
struct AccountState {
    containers: BTreeMap<String, BTreeMap<String, StoredObject>>,
}

/// In-memory [`ObjectStore`] implementation.
pub struct MemStore {
    state: Arc<Mutex<AccountState>>,
    page_size: usize,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(AccountState::default())),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Use a small page size to exercise the gateway's pagination loop.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            ..Self::new()
        }
    }

    /// Raw object bytes, for test assertions.
    pub fn object_bytes(&self, container: &str, object: &str) -> Option<Bytes> {
        let state = self.state.lock();
        state
            .containers
            .get(container)
            .and_then(|c| c.get(object))
            .map(|o| o.data.clone())
    }

    fn now() -> String {
        Utc::now().to_rfc3339()
    }
}

#[async_trait]
impl ObjectStore for MemStore {
    async fn head_account(&self) -> Result<AccountInfo, Error> {
        let state = self.state.lock();
        Ok(AccountInfo {
            container_count: state.containers.len() as u64,
            bytes_used: state
                .containers
                .values()
                .flat_map(|c| c.values())
                .map(|o| o.data.len() as u64)
                .sum(),
        })
    }

    async fn list_containers(
        &self,
        marker: Option<&str>,
    ) -> Result<Vec<ContainerEntry>, Error> {
        let state = self.state.lock();
        Ok(state
            .containers
            .iter()
            .filter(|(name, _)| marker.map_or(true, |m| name.as_str() > m))
            .take(self.page_size)
            .map(|(name, objects)| ContainerEntry {
                name: name.clone(),
                count: objects.len() as u64,
                bytes: objects.values().map(|o| o.data.len() as u64).sum(),
            })
            .collect())
    }

    async fn head_container(&self, container: &str) -> Result<ContainerInfo, Error> {
        let state = self.state.lock();
        let objects = state.containers.get(container).ok_or(Error::NotFound)?;
        Ok(ContainerInfo {
            object_count: objects.len() as u64,
            bytes_used: objects.values().map(|o| o.data.len() as u64).sum(),
        })
    }

    async fn put_container(&self, container: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.containers.entry(container.to_string()).or_default();
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        let objects = state.containers.get(container).ok_or(Error::NotFound)?;
        if !objects.is_empty() {
            return Err(Error::conflict("container not empty"));
        }
        state.containers.remove(container);
        Ok(())
    }

    async fn list_objects(
        &self,
        container: &str,
        opts: &ListOptions,
    ) -> Result<Vec<ObjectEntry>, Error> {
        let state = self.state.lock();
        let objects = state.containers.get(container).ok_or(Error::NotFound)?;

        let prefix = opts.prefix.as_deref().unwrap_or("");
        let marker = opts.marker.as_deref().unwrap_or("");
        let limit = opts.limit.unwrap_or(self.page_size).min(self.page_size);

        let mut rows = Vec::new();
        let mut last_subdir: Option<String> = None;

        for (name, obj) in objects.iter() {
            if rows.len() >= limit {
                break;
            }
            if !name.starts_with(prefix) || name.as_str() <= marker {
                continue;
            }
            let remainder = &name[prefix.len()..];
            match opts.delimiter {
                Some(d) if remainder.contains(d) => {
                    let first = remainder.split(d).next().unwrap_or(remainder);
                    let subdir = format!("{prefix}{first}{d}");
                    // Common prefixes are emitted once per page. A subdir
                    // row also sorts after the marker it stands for, so
                    // pagination resumes past the whole prefix.
                    if last_subdir.as_deref() != Some(subdir.as_str())
                        && subdir.as_str() > marker
                    {
                        last_subdir = Some(subdir.clone());
                        rows.push(ObjectEntry::Subdir { prefix: subdir });
                    }
                }
                _ => rows.push(ObjectEntry::Object {
                    name: name.clone(),
                    bytes: obj.data.len() as u64,
                    content_type: obj.content_type.clone(),
                    last_modified: Some(obj.last_modified.clone()),
                }),
            }
        }
        Ok(rows)
    }

    async fn head_object(&self, container: &str, object: &str) -> Result<ObjectInfo, Error> {
        let state = self.state.lock();
        let obj = state
            .containers
            .get(container)
            .ok_or(Error::NotFound)?
            .get(object)
            .ok_or(Error::NotFound)?;
        Ok(ObjectInfo {
            size: obj.data.len() as u64,
            content_type: Some(obj.content_type.clone()),
            last_modified: Some(obj.last_modified.clone()),
            etag: None,
        })
    }

    async fn get_object(
        &self,
        container: &str,
        object: &str,
        offset: u64,
    ) -> Result<(ObjectInfo, ByteStream), Error> {
        let (info, data) = {
            let state = self.state.lock();
            let obj = state
                .containers
                .get(container)
                .ok_or(Error::NotFound)?
                .get(object)
                .ok_or(Error::NotFound)?;
            (
                ObjectInfo {
                    size: obj.data.len() as u64,
                    content_type: Some(obj.content_type.clone()),
                    last_modified: Some(obj.last_modified.clone()),
                    etag: None,
                },
                obj.data.clone(),
            )
        };

        if offset > data.len() as u64 {
            return Err(Error::transport("range not satisfiable"));
        }
        let body = data.slice(offset as usize..);
        let chunks: Vec<Result<Bytes, Error>> = (0..body.len())
            .step_by(READ_CHUNK.max(1))
            .map(|start| Ok(body.slice(start..(start + READ_CHUNK).min(body.len()))))
            .collect();
        let stream: ByteStream = if chunks.is_empty() {
            empty_body()
        } else {
            Box::pin(futures::stream::iter(chunks))
        };
        Ok((info, stream))
    }

    async fn put_object(
        &self,
        container: &str,
        object: &str,
        content_type: Option<&str>,
        mut body: ByteStream,
    ) -> Result<(), Error> {
        // Container existence is checked before the body is consumed,
        // matching a backend that rejects the PUT from its headers.
        {
            let state = self.state.lock();
            if !state.containers.contains_key(container) {
                return Err(Error::NotFound);
            }
        }

        let mut data = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            data.extend_from_slice(&chunk);
        }

        let mut state = self.state.lock();
        let objects = state.containers.get_mut(container).ok_or(Error::NotFound)?;
        objects.insert(
            object.to_string(),
            StoredObject {
                data: Bytes::from(data),
                content_type: content_type
                    .unwrap_or("application/octet-stream")
                    .to_string(),
                last_modified: Self::now(),
            },
        );
        Ok(())
    }

    async fn copy_object(
        &self,
        src_container: &str,
        src_object: &str,
        dst_container: &str,
        dst_object: &str,
    ) -> Result<(), Error> {
        let mut state = self.state.lock();
        let obj = state
            .containers
            .get(src_container)
            .ok_or(Error::NotFound)?
            .get(src_object)
            .ok_or(Error::NotFound)?
            .clone();
        let dst = state
            .containers
            .get_mut(dst_container)
            .ok_or(Error::NotFound)?;
        dst.insert(dst_object.to_string(), obj);
        Ok(())
    }

    async fn delete_object(&self, container: &str, object: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        let objects = state.containers.get_mut(container).ok_or(Error::NotFound)?;
        objects.remove(object).ok_or(Error::NotFound)?;
        Ok(())
    }
}
