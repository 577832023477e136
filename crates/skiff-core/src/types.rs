//! Stat synthesis and timestamp parsing
//!
//! Containers and objects have no POSIX attributes of their own, so the
//! gateway fabricates a fixed, read-only view: directories are 0o700,
//! files 0o600, everything owned by "nobody", zero hard links.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::{DIRECTORY_CONTENT_TYPE, NOBODY_ID};

/// Type bits matching S_IFDIR / S_IFREG.
const MODE_DIR: u32 = 0o040000;
const MODE_FILE: u32 = 0o100000;

/// Synthesized attributes for a container, object, or pseudo-directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stat {
    pub size: u64,
    pub is_dir: bool,
    /// Full mode word including the file-type bits.
    pub mode: u32,
    /// Modification time, unix seconds.
    pub mtime: i64,
    /// Always 0; the backend has no link concept.
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
}

impl Stat {
    pub fn directory(size: u64, mtime: Option<i64>) -> Self {
        Self {
            size,
            is_dir: true,
            mode: MODE_DIR | 0o700,
            mtime: mtime.unwrap_or_else(now_unix),
            nlink: 0,
            uid: NOBODY_ID,
            gid: NOBODY_ID,
        }
    }

    pub fn file(size: u64, mtime: Option<i64>) -> Self {
        Self {
            size,
            is_dir: false,
            mode: MODE_FILE | 0o600,
            mtime: mtime.unwrap_or_else(now_unix),
            nlink: 0,
            uid: NOBODY_ID,
            gid: NOBODY_ID,
        }
    }

    /// Build a stat from backend-reported metadata, deciding file vs
    /// directory by the marker content type.
    pub fn from_metadata(size: u64, content_type: Option<&str>, last_modified: Option<&str>) -> Self {
        let mtime = last_modified.and_then(parse_http_datetime);
        if content_type == Some(DIRECTORY_CONTENT_TYPE) {
            Self::directory(size, mtime)
        } else {
            Self::file(size, mtime)
        }
    }
}

fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Parse the timestamp formats the backend emits in headers and listing
/// rows. Returns unix seconds, or `None` if nothing matches.
pub fn parse_http_datetime(raw: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.and_utc().timestamp());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d.and_hms_opt(0, 0, 0)?.and_utc().timestamp());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_stat() {
        let s = Stat::directory(0, Some(1_700_000_000));
        assert!(s.is_dir);
        assert_eq!(s.mode, MODE_DIR | 0o700);
        assert_eq!(s.nlink, 0);
        assert_eq!(s.uid, NOBODY_ID);
        assert_eq!(s.gid, NOBODY_ID);
    }

    #[test]
    fn test_file_stat() {
        let s = Stat::file(42, Some(1_700_000_000));
        assert!(!s.is_dir);
        assert_eq!(s.size, 42);
        assert_eq!(s.mode, MODE_FILE | 0o600);
    }

    #[test]
    fn test_from_metadata_marker_is_directory() {
        let s = Stat::from_metadata(0, Some(DIRECTORY_CONTENT_TYPE), None);
        assert!(s.is_dir);
        let s = Stat::from_metadata(10, Some("image/jpeg"), None);
        assert!(!s.is_dir);
    }

    #[test]
    fn test_parse_http_datetime_formats() {
        // Last-Modified header
        assert_eq!(
            parse_http_datetime("Fri, 17 Nov 2023 12:00:00 GMT"),
            Some(1_700_222_400)
        );
        // Listing rows
        assert!(parse_http_datetime("2023-11-17T12:00:00.123456").is_some());
        assert!(parse_http_datetime("2023-11-17 12:00:00").is_some());
        assert!(parse_http_datetime("2023-11-17").is_some());
        assert_eq!(parse_http_datetime("not a date"), None);
    }

    #[test]
    fn test_missing_mtime_defaults_to_now() {
        let before = Utc::now().timestamp();
        let s = Stat::from_metadata(0, None, None);
        assert!(s.mtime >= before);
    }
}
