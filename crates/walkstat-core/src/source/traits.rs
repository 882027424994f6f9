//! Abstractions over the storage being walked.
//!
//! The `FileSystem` and `ObjectStore` traits let the walkers run against the
//! real storage in production and against in-memory mocks in tests.

use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// A regular file found while walking a directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
}

/// An entry that could not be read. The walk continues past it.
#[derive(Debug)]
pub struct EntryError {
    pub path: Option<PathBuf>,
    pub error: io::Error,
}

impl std::fmt::Display for EntryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path.display(), self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for EntryError {}

/// Iterator over the files below a root.
pub type FileIter<'a> = Box<dyn Iterator<Item = Result<FileEntry, EntryError>> + 'a>;

/// Abstraction for filesystem traversal.
pub trait FileSystem: Send + Sync {
    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Checks if a path is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Lists every non-directory entry below `root`, recursively.
    ///
    /// Unreadable entries are yielded as errors instead of ending the walk.
    fn walk_files<'a>(&'a self, root: &Path) -> FileIter<'a>;
}

/// Real filesystem implementation backed by `walkdir`.
///
/// Symbolic links are reported as entries and never followed.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn walk_files<'a>(&'a self, root: &Path) -> FileIter<'a> {
        let entries = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) if entry.file_type().is_dir() => None,
                Ok(entry) => match entry.metadata() {
                    Ok(metadata) => Some(Ok(FileEntry {
                        size: metadata.len(),
                        path: entry.into_path(),
                    })),
                    Err(e) => Some(Err(EntryError {
                        path: Some(entry.path().to_path_buf()),
                        error: e.into(),
                    })),
                },
                Err(e) => Some(Err(EntryError {
                    path: e.path().map(Path::to_path_buf),
                    error: e.into(),
                })),
            });
        Box::new(entries)
    }
}

/// A bucket of an object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
}

/// An object listed from a bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub storage_class: Option<String>,
}

impl ObjectInfo {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            ..Default::default()
        }
    }
}

/// Error returned by an object store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// A request was sent and failed.
    Request {
        operation: &'static str,
        message: String,
    },
    /// A request did not complete in time.
    TimedOut(&'static str),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Request { operation, message } => {
                write!(f, "{} failed: {}", operation, message)
            }
            StoreError::TimedOut(operation) => write!(f, "{} timed out", operation),
        }
    }
}

impl std::error::Error for StoreError {}

/// Iterator over the objects of a bucket.
///
/// An `Err` item ends the listing of that bucket.
pub type ObjectIter<'a> = Box<dyn Iterator<Item = Result<ObjectInfo, StoreError>> + 'a>;

/// Abstraction for object-store listing.
pub trait ObjectStore: Send + Sync {
    /// Lists all buckets visible with the configured credentials.
    fn list_buckets(&self) -> Result<Vec<BucketInfo>, StoreError>;

    /// Lists every object of `bucket`, recursively.
    fn list_objects<'a>(&'a self, bucket: &'a str) -> ObjectIter<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_real_fs_exists_and_is_dir() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFs::new();
        assert!(fs.exists(dir.path()));
        assert!(fs.is_dir(dir.path()));
        assert!(!fs.exists(Path::new("/nonexistent/path/12345")));
    }

    #[test]
    fn test_real_fs_walk_files_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), vec![0u8; 10]).unwrap();
        fs::create_dir_all(dir.path().join("dir1/dir2")).unwrap();
        fs::write(dir.path().join("dir1/b.txt"), vec![0u8; 20]).unwrap();
        fs::write(dir.path().join("dir1/dir2/c.txt"), vec![0u8; 30]).unwrap();

        let mut files: Vec<FileEntry> = RealFs::new()
            .walk_files(dir.path())
            .collect::<Result<_, _>>()
            .unwrap();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let sizes: Vec<u64> = files.iter().map(|f| f.size).collect();
        assert_eq!(sizes, vec![10, 20, 30]);
        assert!(files[2].path.ends_with("dir1/dir2/c.txt"));
    }

    #[test]
    fn test_real_fs_missing_root_yields_error() {
        let fs = RealFs::new();
        let items: Vec<_> = fs.walk_files(Path::new("/nonexistent/path/12345")).collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[test]
    fn store_error_display() {
        let err = StoreError::Request {
            operation: "ListBuckets",
            message: "access denied".into(),
        };
        assert_eq!(err.to_string(), "ListBuckets failed: access denied");
        assert_eq!(
            StoreError::TimedOut("ListObjectsV2").to_string(),
            "ListObjectsV2 timed out"
        );
    }
}
