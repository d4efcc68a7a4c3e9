//! Recursive removal of every file under the watched directory.

use std::io;
use std::path::Path;

use tracing::{debug, info, warn};
use txtpool_core::LifecycleError;
use walkdir::WalkDir;

/// Outcome of [`delete_all`].
#[derive(Debug, Default)]
pub struct ClearReport {
    /// Files successfully removed
    pub removed: usize,
    /// Entries that could not be visited or removed
    pub failed: usize,
    /// The first error hit during the walk
    pub first_error: Option<LifecycleError>,
}

impl ClearReport {
    fn record(&mut self, err: LifecycleError) {
        warn!(error = %err, "Clear: entry not removed");
        self.failed += 1;
        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
    }
}

/// Remove every non-directory entry below `dir`, recursively. Directories are
/// left in place. A failure on one entry never stops the others; only a `dir`
/// that cannot be read at all fails the whole call.
pub fn delete_all(dir: &Path) -> Result<ClearReport, LifecycleError> {
    delete_all_with(dir, |path| std::fs::remove_file(path))
}

/// [`delete_all`] with a caller-supplied removal function.
pub fn delete_all_with<F>(dir: &Path, mut remove: F) -> Result<ClearReport, LifecycleError>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    std::fs::read_dir(dir).map_err(|source| LifecycleError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut report = ClearReport::default();

    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(dir).to_path_buf();
                report.record(LifecycleError::Walk {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        match remove(entry.path()) {
            Ok(()) => {
                debug!(path = %entry.path().display(), "Removed file");
                report.removed += 1;
            }
            Err(source) => report.record(LifecycleError::Remove {
                path: entry.path().to_path_buf(),
                source,
            }),
        }
    }

    info!(
        dir = %dir.display(),
        removed = report.removed,
        failed = report.failed,
        "Cleared watched directory"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn populate(root: &Path) -> Vec<PathBuf> {
        let nested = root.join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        let files = vec![
            root.join("one.txt"),
            root.join("all.txt"),
            root.join("a").join("two.log"),
            nested.join("three.txt"),
        ];
        for f in &files {
            fs::write(f, "x").unwrap();
        }
        files
    }

    fn remaining_files(root: &Path) -> usize {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_type().is_dir())
            .count()
    }

    #[test]
    fn removes_every_file_and_keeps_directories() {
        let dir = tempfile::tempdir().unwrap();
        let files = populate(dir.path());

        let report = delete_all(dir.path()).unwrap();

        assert_eq!(report.removed, files.len());
        assert_eq!(report.failed, 0);
        assert!(report.first_error.is_none());
        assert_eq!(remaining_files(dir.path()), 0);
        assert!(dir.path().join("a").join("b").is_dir());
    }

    #[test]
    fn one_failure_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let files = populate(dir.path());

        let report = delete_all_with(dir.path(), |path| {
            if path.ends_with("two.log") {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
            } else {
                fs::remove_file(path)
            }
        })
        .unwrap();

        assert_eq!(report.removed, files.len() - 1);
        assert_eq!(report.failed, 1);
        match report.first_error {
            Some(LifecycleError::Remove { path, .. }) => assert!(path.ends_with("two.log")),
            other => panic!("Expected Remove error, got {other:?}"),
        }
        assert_eq!(remaining_files(dir.path()), 1);
    }

    #[test]
    fn empty_directory_removes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let report = delete_all(dir.path()).unwrap();
        assert_eq!(report.removed, 0);
        assert!(report.first_error.is_none());
    }

    #[test]
    fn missing_directory_fails_the_clear() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        match delete_all(&missing) {
            Err(LifecycleError::ReadDir { path, .. }) => assert_eq!(path, missing),
            other => panic!("Expected ReadDir error, got {other:?}"),
        }
    }
}
