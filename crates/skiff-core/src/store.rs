//! Backend object-storage contract
//!
//! The gateway talks to the storage service exclusively through this
//! trait. Implementations own the HTTP client, authentication refresh,
//! and whatever retrying they promise; errors arriving here are already
//! collapsed onto the gateway taxonomy.
//!
//! Listings are paginated: each call returns at most one backend page and
//! the caller re-issues with `marker` set past the last returned name
//! until a page comes back empty.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Streaming object body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

/// An empty body for zero-byte PUTs.
pub fn empty_body() -> ByteStream {
    Box::pin(futures::stream::empty())
}

/// Account-level metadata from a HEAD on the storage root.
#[derive(Clone, Debug, Default)]
pub struct AccountInfo {
    pub container_count: u64,
    pub bytes_used: u64,
}

/// Container-level metadata.
#[derive(Clone, Debug, Default)]
pub struct ContainerInfo {
    pub object_count: u64,
    pub bytes_used: u64,
}

/// Object-level metadata from a HEAD/GET response.
#[derive(Clone, Debug)]
pub struct ObjectInfo {
    pub size: u64,
    pub content_type: Option<String>,
    /// Raw Last-Modified value; parsed lazily by stat synthesis.
    pub last_modified: Option<String>,
    /// Opaque integrity tag (ETag).
    pub etag: Option<String>,
}

/// One row of an account listing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContainerEntry {
    pub name: String,
    pub count: u64,
    pub bytes: u64,
}

/// One row of a container listing. Delimiter listings interleave real
/// objects with synthesized common-prefix rows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ObjectEntry {
    Object {
        name: String,
        bytes: u64,
        content_type: String,
        last_modified: Option<String>,
    },
    /// Common prefix ending in the delimiter, e.g. `photos/2024/`.
    Subdir { prefix: String },
}

impl ObjectEntry {
    /// Full backend name of the row; for subdir rows this is the prefix
    /// itself and doubles as the pagination marker.
    pub fn name(&self) -> &str {
        match self {
            ObjectEntry::Object { name, .. } => name,
            ObjectEntry::Subdir { prefix } => prefix,
        }
    }
}

/// Options for a container listing request.
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub delimiter: Option<char>,
    pub marker: Option<String>,
    pub limit: Option<usize>,
}

/// Authenticated object-storage operations.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn head_account(&self) -> Result<AccountInfo, Error>;

    /// One page of containers whose names sort after `marker`.
    async fn list_containers(&self, marker: Option<&str>)
        -> Result<Vec<ContainerEntry>, Error>;

    async fn head_container(&self, container: &str) -> Result<ContainerInfo, Error>;

    async fn put_container(&self, container: &str) -> Result<(), Error>;

    /// Fails `Conflict` when the container still holds objects.
    async fn delete_container(&self, container: &str) -> Result<(), Error>;

    /// One page of objects matching `opts`.
    async fn list_objects(
        &self,
        container: &str,
        opts: &ListOptions,
    ) -> Result<Vec<ObjectEntry>, Error>;

    async fn head_object(&self, container: &str, object: &str) -> Result<ObjectInfo, Error>;

    /// Streaming GET. `offset > 0` requests a suffix range.
    async fn get_object(
        &self,
        container: &str,
        object: &str,
        offset: u64,
    ) -> Result<(ObjectInfo, ByteStream), Error>;

    /// Streaming PUT. The body is consumed as chunks arrive; fails
    /// `NotFound` when the container does not exist.
    async fn put_object(
        &self,
        container: &str,
        object: &str,
        content_type: Option<&str>,
        body: ByteStream,
    ) -> Result<(), Error>;

    /// Server-side copy within the backend.
    async fn copy_object(
        &self,
        src_container: &str,
        src_object: &str,
        dst_container: &str,
        dst_object: &str,
    ) -> Result<(), Error>;

    async fn delete_object(&self, container: &str, object: &str) -> Result<(), Error>;
}
