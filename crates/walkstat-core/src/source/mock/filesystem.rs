//! In-memory mock filesystem for testing walkers without touching disk.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use crate::source::traits::{EntryError, FileEntry, FileIter, FileSystem};

/// In-memory filesystem for testing.
///
/// Stores file sizes and directories in memory. Paths marked unreadable are
/// yielded as errors by `walk_files`, in path order with the files.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    /// Map from path to file size.
    files: BTreeMap<PathBuf, u64>,
    directories: BTreeSet<PathBuf>,
    unreadable: BTreeSet<PathBuf>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given size.
    ///
    /// Parent directories are automatically created.
    pub fn add_file(&mut self, path: impl AsRef<Path>, size: u64) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.files.insert(path, size);
    }

    /// Adds an empty directory.
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    /// Adds an entry whose metadata cannot be read.
    pub fn add_unreadable(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.unreadable.insert(path);
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }
}

impl FileSystem for MockFs {
    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
            || self.directories.contains(path)
            || self.unreadable.contains(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.directories.contains(path)
    }

    fn walk_files<'a>(&'a self, root: &Path) -> FileIter<'a> {
        if !self.exists(root) {
            let error = EntryError {
                path: Some(root.to_path_buf()),
                error: io::Error::new(io::ErrorKind::NotFound, "no such file or directory"),
            };
            return Box::new(std::iter::once(Err(error)));
        }

        let root = root.to_path_buf();
        let mut entries: Vec<(PathBuf, Option<u64>)> = self
            .files
            .iter()
            .filter(|(path, _)| path.starts_with(&root))
            .map(|(path, size)| (path.clone(), Some(*size)))
            .chain(
                self.unreadable
                    .iter()
                    .filter(|path| path.starts_with(&root))
                    .map(|path| (path.clone(), None)),
            )
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        Box::new(entries.into_iter().map(|(path, size)| match size {
            Some(size) => Ok(FileEntry { path, size }),
            None => Err(EntryError {
                path: Some(path),
                error: io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
            }),
        }))
    }
}
