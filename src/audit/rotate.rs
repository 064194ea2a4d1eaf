//! Size-based log file rotation.

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct RotationPolicy {
    /// Rotate before a write would grow the file past this. Zero never rotates.
    pub max_size_bytes: u64,
    /// Backups kept after rotation. Zero keeps all.
    pub max_backups: u32,
    /// Backups older than this are removed. Ignored when `max_backups` is set.
    pub max_age: Option<Duration>,
}

impl RotationPolicy {
    fn file_limit(&self) -> FileLimit {
        if self.max_backups > 0 {
            return FileLimit::MaxFiles(self.max_backups as usize);
        }
        match self.max_age.and_then(|age| chrono::Duration::from_std(age).ok()) {
            Some(age) => FileLimit::Age(age),
            None => FileLimit::Unlimited,
        }
    }

    fn content_limit(&self) -> ContentLimit {
        match usize::try_from(self.max_size_bytes) {
            Ok(0) => ContentLimit::None,
            Ok(bytes) => ContentLimit::Bytes(bytes),
            Err(_) => ContentLimit::None,
        }
    }
}

/// An append-only file at `path`; backups are `<name>.<timestamp>` beside it.
pub type RotatingFile = FileRotate<AppendTimestamp>;

pub fn open_rotating(path: &Path, policy: RotationPolicy) -> io::Result<RotatingFile> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    Ok(FileRotate::new(
        path,
        AppendTimestamp::default(policy.file_limit()),
        policy.content_limit(),
        Compression::None,
        #[cfg(unix)]
        None,
    ))
}
