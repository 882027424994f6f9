//! Local filesystem backend.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use super::{AggregationPipeline, Backend, ObservedFile, WalkError, WalkStatus};
use crate::config::{ConfigError, FsConfig, WalkerConfig};
use crate::metrics::MetricSnapshot;
use crate::source::{FileSystem, RealFs};

/// Walks a directory tree and aggregates every file below it.
pub struct FsWalker<F: FileSystem = RealFs> {
    fs: F,
    folder: PathBuf,
    root: String,
    pipeline: AggregationPipeline,
}

impl<F: FileSystem> FsWalker<F> {
    /// Creates the walker. The folder must exist and be a directory.
    pub fn new(fs: F, config: FsConfig, walker: &WalkerConfig) -> Result<Self, ConfigError> {
        let folder = config.folder;
        if !fs.exists(&folder) {
            return Err(ConfigError::Folder {
                path: folder,
                reason: "does not exist".to_string(),
            });
        }
        if !fs.is_dir(&folder) {
            return Err(ConfigError::Folder {
                path: folder,
                reason: "not a directory".to_string(),
            });
        }

        let root = folder.to_string_lossy().into_owned();
        let labels = [("type", "fsWalker"), ("baseDir", root.as_str())];
        let pipeline = AggregationPipeline::new(walker, &labels, &[])?;

        Ok(Self {
            fs,
            folder,
            root,
            pipeline,
        })
    }
}

impl<F: FileSystem> Backend for FsWalker<F> {
    fn name(&self) -> &'static str {
        "fs"
    }

    fn walk(&self) -> Result<WalkStatus, WalkError> {
        self.pipeline.run(self.name(), |session| {
            if !self.fs.is_dir(&self.folder) {
                return Err(WalkError::RootUnavailable {
                    path: self.folder.clone(),
                    reason: "not a readable directory".to_string(),
                });
            }

            for entry in self.fs.walk_files(&self.folder) {
                session.check_deadline()?;
                match entry {
                    Ok(file) => {
                        let path = file.path.to_string_lossy();
                        session.observe(&ObservedFile {
                            root: &self.root,
                            path: &path,
                            size: file.size,
                            content_type: None,
                            labels: &[],
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "skipping unreadable entry");
                        session.record_unreadable();
                    }
                }
            }
            Ok(())
        })
    }

    fn snapshot(&self) -> &Arc<MetricSnapshot> {
        self.pipeline.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::sample;
    use crate::source::MockFs;
    use crate::walker::WalkReport;
    use std::path::Path;

    fn scenario_fs() -> MockFs {
        let mut fs = MockFs::new();
        fs.add_file("/data/a.txt", 10);
        fs.add_file("/data/dir1/b.txt", 20);
        fs.add_file("/data/dir1/dir2/c.txt", 30);
        fs
    }

    fn walker(fs: MockFs, config: WalkerConfig) -> FsWalker<MockFs> {
        let fs_config = FsConfig {
            folder: PathBuf::from("/data"),
        };
        FsWalker::new(fs, fs_config, &config).unwrap()
    }

    fn completed(status: Result<WalkStatus, WalkError>) -> WalkReport {
        match status.unwrap() {
            WalkStatus::Completed(report) => report,
            WalkStatus::Skipped => panic!("walk was skipped"),
        }
    }

    fn without_timing(text: &str) -> String {
        text.lines()
            .filter(|l| {
                !l.contains("stats_collection_duration")
                    && !l.contains("stats_collection_date")
                    && !l.contains("walks_total")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_rejects_missing_or_non_directory_folder() {
        let err = FsWalker::new(
            MockFs::new(),
            FsConfig {
                folder: "/nope".into(),
            },
            &WalkerConfig::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::Folder { .. }));

        let mut fs = MockFs::new();
        fs.add_file("/data/a.txt", 1);
        let err = FsWalker::new(
            fs,
            FsConfig {
                folder: "/data/a.txt".into(),
            },
            &WalkerConfig::default(),
        )
        .err()
        .unwrap();
        assert_eq!(err.to_string(), "folder /data/a.txt: not a directory");
    }

    #[test]
    fn test_empty_directories_add_no_prefix() {
        let mut fs = MockFs::new();
        fs.add_dir("/data/empty/nested");
        let walker = walker(fs, WalkerConfig::default());
        let report = completed(walker.walk());

        assert_eq!(report.total_objects, 0);
        assert!(report.prefixes.is_empty());
        let text = walker.snapshot().encode_text().unwrap();
        assert_eq!(sample(&text, "file_walker_total_objects_count", &[]), Some(0.0));
    }

    #[test]
    fn test_scenario_max_depth_one() {
        let walker = walker(scenario_fs(), WalkerConfig::default());
        let report = completed(walker.walk());

        assert_eq!(report.total_size, 60);
        assert_eq!(report.total_objects, 3);
        assert_eq!(report.max_depth, 3);
        let prefixes: Vec<&str> = report.prefixes.keys().map(String::as_str).collect();
        assert_eq!(prefixes, vec!["ROOT", "dir1", "dir1/dir2"]);
        assert_eq!(report.prefixes["ROOT"].total_size, 10);
        assert_eq!(report.prefixes["dir1"].total_size, 20);
        assert_eq!(report.prefixes["dir1/dir2"].ext_counts.get(".txt"), Some(&1));

        let text = walker.snapshot().encode_text().unwrap();
        let labels = [("type", "fsWalker"), ("baseDir", "/data"), ("prefix", "dir1")];
        assert_eq!(sample(&text, "file_walker_objects_size", &labels), Some(20.0));
        assert_eq!(sample(&text, "file_walker_total_objects_count", &[]), Some(3.0));
        assert_eq!(sample(&text, "file_walker_max_tree_depth", &[]), Some(3.0));
    }

    #[test]
    fn test_scenario_max_depth_zero() {
        let walker = walker(
            scenario_fs(),
            WalkerConfig {
                max_depth: 0,
                ..Default::default()
            },
        );
        let report = completed(walker.walk());

        let prefixes: Vec<&str> = report.prefixes.keys().map(String::as_str).collect();
        assert_eq!(prefixes, vec!["ROOT", "dir1"]);
        assert_eq!(report.prefixes["dir1"].file_count, 2);
        assert_eq!(report.prefixes["dir1"].total_size, 50);
        assert_eq!(report.total_size, 60);
    }

    #[test]
    fn test_exclusion() {
        let mut fs = scenario_fs();
        fs.add_file("/data/tmp/cache/blob.bin", 1_000);
        let walker = walker(
            fs,
            WalkerConfig {
                prefix_filters: vec!["^tmp".into()],
                ..Default::default()
            },
        );
        let report = completed(walker.walk());

        assert_eq!(report.total_size, 60);
        assert_eq!(report.total_objects, 3);
        assert_eq!(report.excluded_objects, 1);
        assert!(!report.prefixes.contains_key("tmp/cache"));
    }

    #[test]
    fn test_walks_are_idempotent() {
        let walker = walker(scenario_fs(), WalkerConfig::default());
        let first = completed(walker.walk());
        let first_text = walker.snapshot().encode_text().unwrap();
        let second = completed(walker.walk());
        let second_text = walker.snapshot().encode_text().unwrap();

        assert_eq!(first.prefixes, second.prefixes);
        assert_eq!(first.total_size, second.total_size);
        assert_eq!(without_timing(&first_text), without_timing(&second_text));
        assert_eq!(
            sample(&second_text, "file_walker_walks_total", &[("result", "completed")]),
            Some(2.0)
        );
    }

    #[test]
    fn test_unreadable_entries_are_skipped() {
        let mut fs = scenario_fs();
        fs.add_unreadable("/data/dir1/locked.db");
        let walker = walker(fs, WalkerConfig::default());
        let report = completed(walker.walk());

        assert_eq!(report.unreadable_entries, 1);
        assert_eq!(report.total_objects, 3);
    }

    #[test]
    fn test_timeout() {
        let walker = walker(
            scenario_fs(),
            WalkerConfig {
                walk_timeout: Some(std::time::Duration::ZERO),
                ..Default::default()
            },
        );
        assert!(matches!(walker.walk(), Err(WalkError::TimedOut { .. })));
        assert!(!walker.snapshot().has_published_generation());
    }

    #[test]
    fn test_vanished_root_keeps_previous_generation() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        std::fs::create_dir_all(root.join("dir1")).unwrap();
        std::fs::write(root.join("dir1/b.txt"), vec![0u8; 20]).unwrap();

        let walker = FsWalker::new(
            RealFs::new(),
            FsConfig {
                folder: root.clone(),
            },
            &WalkerConfig::default(),
        )
        .unwrap();
        assert_eq!(completed(walker.walk()).total_size, 20);

        std::fs::remove_dir_all(&root).unwrap();
        let err = walker.walk().err().unwrap();
        assert!(matches!(err, WalkError::RootUnavailable { .. }));

        let text = walker.snapshot().encode_text().unwrap();
        assert_eq!(sample(&text, "file_walker_total_objects_size", &[]), Some(20.0));

        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.txt"), vec![0u8; 5]).unwrap();
        let report = completed(walker.walk());
        assert_eq!(report.total_size, 5);
        assert!(Path::new(&root).is_dir());
    }
}
