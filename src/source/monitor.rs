//! Stat-based classification of file transitions.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use anyhow::{Context, Result};

use crate::config::Clock;

/// What happened to the file since the last capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTransition {
    Unchanged,
    Grown { from: u64, to: u64 },
    TruncatedOrReplaced,
}

/// Identity of the underlying file object, used to tell an append apart
/// from an atomic replace at the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    #[cfg(unix)]
    inode: u64,
    #[cfg(not(unix))]
    created: Option<SystemTime>,
}

impl FileIdentity {
    fn of(metadata: &fs::Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Self {
                inode: metadata.ino(),
            }
        }
        #[cfg(not(unix))]
        {
            Self {
                created: metadata.created().ok(),
            }
        }
    }
}

/// Last observed state of the monitored file.
#[derive(Debug, Clone)]
pub struct FileMonitor {
    size: u64,
    mtime: Option<SystemTime>,
    identity: FileIdentity,
    captured_at: SystemTime,
}

impl FileMonitor {
    pub fn capture(path: &Path, clock: &dyn Clock) -> Result<Self> {
        let metadata = fs::metadata(path)
            .with_context(|| format!("stat of {} failed", path.display()))?;
        Ok(Self {
            size: metadata.len(),
            mtime: metadata.modified().ok(),
            identity: FileIdentity::of(&metadata),
            captured_at: clock.now(),
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// Re-stat `path` and classify the transition against this capture.
    ///
    /// A vanished file, a different file object at the same path, a
    /// shrink, and an in-place rewrite (same size, newer mtime) all
    /// classify as `TruncatedOrReplaced`: the existing index can no
    /// longer be trusted.
    pub fn classify(&self, path: &Path) -> FileTransition {
        let Ok(metadata) = fs::metadata(path) else {
            return FileTransition::TruncatedOrReplaced;
        };

        if FileIdentity::of(&metadata) != self.identity {
            return FileTransition::TruncatedOrReplaced;
        }
        let size = metadata.len();
        if size < self.size {
            return FileTransition::TruncatedOrReplaced;
        }
        if size > self.size {
            return FileTransition::Grown {
                from: self.size,
                to: size,
            };
        }
        if metadata.modified().ok() != self.mtime {
            return FileTransition::TruncatedOrReplaced;
        }
        FileTransition::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemClock;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn unchanged_file_classifies_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "one\n").unwrap();

        let monitor = FileMonitor::capture(&path, &SystemClock).unwrap();
        assert_eq!(monitor.classify(&path), FileTransition::Unchanged);
    }

    #[test]
    fn appended_file_classifies_grown() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "one\n").unwrap();

        let monitor = FileMonitor::capture(&path, &SystemClock).unwrap();
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"two\n").unwrap();
        f.flush().unwrap();

        assert_eq!(
            monitor.classify(&path),
            FileTransition::Grown { from: 4, to: 8 }
        );
    }

    #[test]
    fn shrunk_file_classifies_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "one\ntwo\n").unwrap();

        let monitor = FileMonitor::capture(&path, &SystemClock).unwrap();
        let f = File::options().write(true).open(&path).unwrap();
        f.set_len(4).unwrap();

        assert_eq!(monitor.classify(&path), FileTransition::TruncatedOrReplaced);
    }

    #[test]
    fn replaced_file_classifies_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "one\n").unwrap();

        let monitor = FileMonitor::capture(&path, &SystemClock).unwrap();
        // Same size, different file object.
        std::fs::remove_file(&path).unwrap();
        std::fs::write(&path, "eno\n").unwrap();

        assert_eq!(monitor.classify(&path), FileTransition::TruncatedOrReplaced);
    }

    #[test]
    fn vanished_file_classifies_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "one\n").unwrap();

        let monitor = FileMonitor::capture(&path, &SystemClock).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(monitor.classify(&path), FileTransition::TruncatedOrReplaced);
    }
}
