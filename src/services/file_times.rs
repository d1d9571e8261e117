//! Creation-time lookup for archived files.
//!
//! Not every platform records when a file was born. [`PlatformClock`] uses the
//! true birth time when the OS reports it (macOS, Windows, Linux with `statx`),
//! then the inode status-change time on other unix systems, then the
//! modification time. When none of those are readable it falls back to the wall
//! clock at scan time, which keeps listings working but orders such files as
//! if they had just been created.

use std::{fs::Metadata, time::SystemTime};

/// Capability answering "when was this file created" from its metadata.
pub trait CreationClock: Send + Sync {
    fn created(&self, metadata: &Metadata) -> SystemTime;
}

/// Best timestamp available on the current platform.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformClock;

impl CreationClock for PlatformClock {
    fn created(&self, metadata: &Metadata) -> SystemTime {
        metadata
            .created()
            .ok()
            .or_else(|| status_change_time(metadata))
            .or_else(|| metadata.modified().ok())
            .unwrap_or_else(SystemTime::now)
    }
}

#[cfg(unix)]
fn status_change_time(metadata: &Metadata) -> Option<SystemTime> {
    use std::{os::unix::fs::MetadataExt, time::Duration};

    let secs = u64::try_from(metadata.ctime()).ok()?;
    let nanos = u32::try_from(metadata.ctime_nsec()).ok()?;
    SystemTime::UNIX_EPOCH.checked_add(Duration::new(secs, nanos))
}

#[cfg(not(unix))]
fn status_change_time(_metadata: &Metadata) -> Option<SystemTime> {
    None
}
