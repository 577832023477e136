//! Skiff Core - Shared types, error taxonomy, and the object-storage contract
//!
//! This crate contains the foundational types used across the skiff gateway.
//! It has no dependencies on protocol or streaming code.

pub mod config;
pub mod error;
pub mod path;
pub mod store;
pub mod types;

pub use config::{Config, GatewayConfig, LimitsConfig};
pub use error::Error;
pub use path::ObjectPath;
pub use store::*;
pub use types::*;

/// Content type that marks an object as a pseudo-directory
pub const DIRECTORY_CONTENT_TYPE: &str = "application/directory";

/// Maximum object path length in bytes
pub const MAX_PATH_LEN: usize = 1024;

/// Maximum length of a single path segment in bytes
pub const MAX_SEGMENT_LEN: usize = 255;

/// uid/gid reported for every entry ("nobody")
pub const NOBODY_ID: u32 = 65535;
