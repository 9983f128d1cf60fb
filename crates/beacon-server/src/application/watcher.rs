//! Filesystem snapshot scanner for the live-reload watcher.
//!
//! The watcher polls: it walks the served root on an interval and compares
//! snapshots.  Polling is portable across platforms and filesystems (NFS,
//! bind mounts, containers) where native change notification is spotty, and
//! a dev-server root is small enough that a rescan every few hundred
//! milliseconds is negligible.
//!
//! A snapshot records modification time *and* size per file; size catches
//! rapid successive writes that land within the filesystem's mtime
//! granularity.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// What the scanner records per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    /// Last modification time.
    pub modified: SystemTime,
    /// File size in bytes.
    pub len: u64,
}

/// A point-in-time view of every file under the root.
pub type Snapshot = HashMap<PathBuf, FileStamp>;

/// Recursive directory scanner.
///
/// Hidden entries (names starting with `.`) are skipped, which also keeps
/// editors' atomic-save temp files and VCS metadata out of the snapshot.
#[derive(Debug, Clone)]
pub struct DirScanner {
    root: PathBuf,
}

impl DirScanner {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Walks the tree and stamps every visible file.  Unreadable entries
    /// are skipped; a vanished directory simply yields an empty snapshot.
    pub fn scan(&self) -> Snapshot {
        let mut snapshot = Snapshot::new();
        walk(&self.root, &mut snapshot);
        snapshot
    }
}

fn walk(dir: &Path, snapshot: &mut Snapshot) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };

        if meta.is_dir() {
            walk(&path, snapshot);
        } else if meta.is_file() {
            let Ok(modified) = meta.modified() else {
                continue;
            };
            snapshot.insert(
                path,
                FileStamp {
                    modified,
                    len: meta.len(),
                },
            );
        }
    }
}

/// Paths that differ between two snapshots: created, modified, or removed.
pub fn diff_snapshots(old: &Snapshot, new: &Snapshot) -> Vec<PathBuf> {
    let mut changed = Vec::new();

    for (path, stamp) in new {
        if old.get(path) != Some(stamp) {
            changed.push(path.clone());
        }
    }
    for path in old.keys() {
        if !new.contains_key(path) {
            changed.push(path.clone());
        }
    }

    changed
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_stamps_files_recursively() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.html"), "one").unwrap();
        fs::create_dir(dir.path().join("css")).unwrap();
        fs::write(dir.path().join("css/site.css"), "two").unwrap();

        let snapshot = DirScanner::new(dir.path().to_path_buf()).scan();

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_key(&dir.path().join("a.html")));
        assert!(snapshot.contains_key(&dir.path().join("css/site.css")));
    }

    #[test]
    fn test_scan_skips_hidden_entries() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".hidden"), "x").unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/config"), "x").unwrap();
        fs::write(dir.path().join("visible.txt"), "x").unwrap();

        let snapshot = DirScanner::new(dir.path().to_path_buf()).scan();

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key(&dir.path().join("visible.txt")));
    }

    #[test]
    fn test_scan_of_missing_root_is_empty() {
        let snapshot = DirScanner::new(PathBuf::from("/no/such/dir")).scan();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_diff_detects_created_file() {
        let dir = TempDir::new().unwrap();
        let scanner = DirScanner::new(dir.path().to_path_buf());

        let before = scanner.scan();
        fs::write(dir.path().join("new.js"), "created").unwrap();
        let after = scanner.scan();

        assert_eq!(diff_snapshots(&before, &after), vec![dir.path().join("new.js")]);
    }

    #[test]
    fn test_diff_detects_removed_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("old.js"), "bye").unwrap();
        let scanner = DirScanner::new(dir.path().to_path_buf());

        let before = scanner.scan();
        fs::remove_file(dir.path().join("old.js")).unwrap();
        let after = scanner.scan();

        assert_eq!(diff_snapshots(&before, &after), vec![dir.path().join("old.js")]);
    }

    #[test]
    fn test_diff_detects_content_change_via_size() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("page.html"), "v1").unwrap();
        let scanner = DirScanner::new(dir.path().to_path_buf());

        let before = scanner.scan();
        // Same instant on coarse-mtime filesystems, but the size differs.
        fs::write(dir.path().join("page.html"), "version two").unwrap();
        let after = scanner.scan();

        assert_eq!(
            diff_snapshots(&before, &after),
            vec![dir.path().join("page.html")]
        );
    }

    #[test]
    fn test_diff_of_identical_snapshots_is_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("same.css"), "stable").unwrap();
        let scanner = DirScanner::new(dir.path().to_path_buf());

        let before = scanner.scan();
        let after = scanner.scan();
        assert!(diff_snapshots(&before, &after).is_empty());
    }
}
