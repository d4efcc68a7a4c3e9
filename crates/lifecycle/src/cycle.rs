//! One lifecycle cycle: evict stale files, then rebuild the aggregate.
//!
//! Both passes are partial-failure tolerant. A file that cannot be inspected,
//! removed or read is logged and skipped; only an unreadable directory or an
//! aggregate that cannot be written fails the cycle.
//!
//! The aggregate is assembled in a temporary file next to it and renamed into
//! place, so readers see either the previous aggregate or the new one.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};
use txtpool_config::StorageConfig;
use txtpool_core::LifecycleError;

/// What to evict and what to merge.
#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    /// The watched directory
    pub dir: PathBuf,
    /// Files strictly older than this are evicted
    pub retention: Duration,
    /// Recognized text extension, including the leading dot
    pub extension: String,
    /// File name of the aggregate inside `dir`
    pub aggregate_name: String,
}

impl LifecyclePolicy {
    /// A policy with the default `.txt` extension and `all.txt` aggregate.
    pub fn new(dir: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            dir: dir.into(),
            retention,
            extension: ".txt".into(),
            aggregate_name: "all.txt".into(),
        }
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        Self {
            dir: storage.watch_dir(),
            retention: storage.retention(),
            extension: storage.extension.clone(),
            aggregate_name: storage.aggregate_name.clone(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_aggregate_name(mut self, name: impl Into<String>) -> Self {
        self.aggregate_name = name.into();
        self
    }

    pub fn aggregate_path(&self) -> PathBuf {
        self.dir.join(&self.aggregate_name)
    }

    /// Whether a file modified at `modified` is stale at `now`.
    ///
    /// Modification times in the future count as age zero.
    pub fn is_stale(&self, modified: SystemTime, now: SystemTime) -> bool {
        now.duration_since(modified)
            .map(|age| age > self.retention)
            .unwrap_or(false)
    }

    /// Whether a surviving file takes part in aggregation. The aggregate
    /// itself never does.
    pub fn is_mergeable(&self, name: &str) -> bool {
        name != self.aggregate_name && name.ends_with(&self.extension)
    }
}

/// Outcome of a full cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Stale files removed
    pub evicted: usize,
    /// Stale (or uninspectable) files that could not be removed
    pub eviction_failures: usize,
    /// Files appended to the aggregate
    pub merged: usize,
    /// Mergeable files skipped because they could not be read
    pub skipped: usize,
    /// Size of the new aggregate
    pub bytes: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvictionReport {
    pub evicted: usize,
    pub failures: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub merged: usize,
    pub skipped: usize,
    pub bytes: u64,
}

/// A non-directory entry of the watched directory.
struct FileEntry {
    name: String,
    path: PathBuf,
    entry: fs::DirEntry,
}

/// List non-directory entries, ordered by file name.
fn list_files(dir: &Path) -> Result<Vec<FileEntry>, LifecycleError> {
    let read_dir = fs::read_dir(dir).map_err(|source| LifecycleError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<(OsString, FileEntry)> = Vec::new();
    for entry in read_dir {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to read directory entry");
                continue;
            }
        };
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => continue,
            Ok(_) => {}
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Failed to stat entry");
                continue;
            }
        }
        let raw = entry.file_name();
        let name = raw.to_string_lossy().into_owned();
        files.push((
            raw,
            FileEntry {
                name,
                path: entry.path(),
                entry,
            },
        ));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files.into_iter().map(|(_, f)| f).collect())
}

/// Delete every non-directory entry of the watched directory that is stale at
/// `now`. Per-file failures are logged and counted.
pub fn evict_stale(
    policy: &LifecyclePolicy,
    now: SystemTime,
) -> Result<EvictionReport, LifecycleError> {
    let mut report = EvictionReport::default();

    for file in list_files(&policy.dir)? {
        let modified = match file.entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!(file = %file.name, error = %e, "Failed to read modification time");
                report.failures += 1;
                continue;
            }
        };

        if !policy.is_stale(modified, now) {
            continue;
        }

        match fs::remove_file(&file.path) {
            Ok(()) => {
                info!(file = %file.name, "Deleted stale file");
                report.evicted += 1;
            }
            Err(e) => {
                warn!(file = %file.name, error = %e, "Failed to delete stale file");
                report.failures += 1;
            }
        }
    }

    Ok(report)
}

/// Mode of a published aggregate, before the umask.
#[cfg(unix)]
const AGGREGATE_MODE: u32 = 0o644;

/// Rebuild the aggregate from every mergeable file, in name order.
pub fn merge(policy: &LifecyclePolicy) -> Result<MergeReport, LifecycleError> {
    let aggregate_path = policy.aggregate_path();
    let aggregate_err = |source| LifecycleError::Aggregate {
        path: aggregate_path.clone(),
        source,
    };

    // Enumerate before the temp file exists so it can never be an input.
    let inputs: Vec<FileEntry> = list_files(&policy.dir)?
        .into_iter()
        .filter(|f| policy.is_mergeable(&f.name))
        .collect();

    let prefix = format!(".{}.", policy.aggregate_name);
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix).suffix(".partial");
    // The staging file becomes the served aggregate, so it must not keep
    // tempfile's owner-only mode.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(AGGREGATE_MODE));
    }
    let mut staging = builder.tempfile_in(&policy.dir).map_err(aggregate_err)?;

    let mut report = MergeReport::default();
    for input in &inputs {
        let content = match fs::read(&input.path) {
            Ok(content) => content,
            Err(e) => {
                warn!(file = %input.name, error = %e, "Failed to read file, skipping");
                report.skipped += 1;
                continue;
            }
        };

        staging.write_all(&content).map_err(aggregate_err)?;
        debug!(file = %input.name, bytes = content.len(), "Merged file");
        report.merged += 1;
        report.bytes += content.len() as u64;
    }

    staging.flush().map_err(aggregate_err)?;
    staging
        .persist(&aggregate_path)
        .map_err(|e| aggregate_err(e.error))?;

    Ok(report)
}

/// Run one lifecycle cycle: eviction, then aggregation.
pub fn run_cycle(policy: &LifecyclePolicy, now: SystemTime) -> Result<CycleReport, LifecycleError> {
    let eviction = evict_stale(policy, now)?;
    let merged = merge(policy)?;

    let report = CycleReport {
        evicted: eviction.evicted,
        eviction_failures: eviction.failures,
        merged: merged.merged,
        skipped: merged.skipped,
        bytes: merged.bytes,
    };

    info!(
        dir = %policy.dir.display(),
        evicted = report.evicted,
        merged = report.merged,
        skipped = report.skipped,
        bytes = report.bytes,
        "Lifecycle cycle complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;

    const HOUR: Duration = Duration::from_secs(3600);

    fn policy(dir: &Path) -> LifecyclePolicy {
        LifecyclePolicy::new(dir, 4 * HOUR)
    }

    /// Write `content` to `dir/name` and backdate its mtime by `age`.
    fn write_aged(dir: &Path, name: &str, content: &str, age: Duration) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        let mtime = FileTime::from_system_time(SystemTime::now() - age);
        filetime::set_file_mtime(&path, mtime).unwrap();
        path
    }

    fn aggregate(dir: &Path) -> String {
        fs::read_to_string(dir.join("all.txt")).unwrap()
    }

    #[test]
    fn evicts_stale_and_merges_fresh_text_files() {
        let dir = tempfile::tempdir().unwrap();
        write_aged(dir.path(), "a.txt", "A", HOUR);
        write_aged(dir.path(), "b.txt", "B", 5 * HOUR);
        write_aged(dir.path(), "notes.log", "log line", HOUR);

        let report = run_cycle(&policy(dir.path()), SystemTime::now()).unwrap();

        assert!(!dir.path().join("b.txt").exists());
        assert!(dir.path().join("notes.log").exists());
        assert_eq!(aggregate(dir.path()), "A");
        assert_eq!(report.evicted, 1);
        assert_eq!(report.merged, 1);
        assert_eq!(report.bytes, 1);
    }

    #[test]
    fn aggregate_is_name_ordered_concatenation() {
        let dir = tempfile::tempdir().unwrap();
        write_aged(dir.path(), "c.txt", "CCC", HOUR);
        write_aged(dir.path(), "a.txt", "A", HOUR);
        write_aged(dir.path(), "b.txt", "BB\n", HOUR);

        let report = run_cycle(&policy(dir.path()), SystemTime::now()).unwrap();

        assert_eq!(aggregate(dir.path()), "ABB\nCCC");
        assert_eq!(report.bytes, 1 + 3 + 3);
        assert_eq!(report.merged, 3);
    }

    #[test]
    fn repeated_cycles_are_identical_and_never_self_include() {
        let dir = tempfile::tempdir().unwrap();
        write_aged(dir.path(), "1.txt", "one\n", HOUR);
        write_aged(dir.path(), "2.txt", "two\n", 2 * HOUR);

        let p = policy(dir.path());
        run_cycle(&p, SystemTime::now()).unwrap();
        let first = aggregate(dir.path());
        let report = run_cycle(&p, SystemTime::now()).unwrap();
        let second = aggregate(dir.path());

        assert_eq!(first, "one\ntwo\n");
        assert_eq!(first, second);
        assert_eq!(report.merged, 2);
    }

    #[test]
    fn empty_directory_yields_empty_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let report = run_cycle(&policy(dir.path()), SystemTime::now()).unwrap();
        assert_eq!(aggregate(dir.path()), "");
        assert_eq!(report, CycleReport::default());
    }

    #[test]
    fn previous_aggregate_is_replaced_not_appended() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("all.txt"), "stale aggregate").unwrap();
        write_aged(dir.path(), "x.txt", "fresh", HOUR);

        run_cycle(&policy(dir.path()), SystemTime::now()).unwrap();
        assert_eq!(aggregate(dir.path()), "fresh");
    }

    #[test]
    fn stale_aggregate_is_evicted_then_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        write_aged(dir.path(), "all.txt", "old", 6 * HOUR);
        write_aged(dir.path(), "a.txt", "new", HOUR);

        let report = run_cycle(&policy(dir.path()), SystemTime::now()).unwrap();
        assert_eq!(report.evicted, 1);
        assert_eq!(aggregate(dir.path()), "new");
    }

    #[test]
    fn future_mtime_is_not_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.txt");
        fs::write(&path, "F").unwrap();
        let future = FileTime::from_system_time(SystemTime::now() + HOUR);
        filetime::set_file_mtime(&path, future).unwrap();

        run_cycle(&policy(dir.path()), SystemTime::now()).unwrap();
        assert!(path.exists());
        assert_eq!(aggregate(dir.path()), "F");
    }

    #[test]
    fn staleness_threshold_is_strict() {
        let p = LifecyclePolicy::new("/unused", 4 * HOUR);
        let now = SystemTime::now();
        assert!(!p.is_stale(now - 4 * HOUR, now));
        assert!(p.is_stale(now - 4 * HOUR - Duration::from_secs(1), now));
        assert!(!p.is_stale(now + HOUR, now));
    }

    #[test]
    fn subdirectories_are_neither_evicted_nor_merged() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("nested.txt");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("inner.txt"), "inner").unwrap();
        filetime::set_file_mtime(
            &sub,
            FileTime::from_system_time(SystemTime::now() - 10 * HOUR),
        )
        .unwrap();
        write_aged(dir.path(), "top.txt", "top", HOUR);

        run_cycle(&policy(dir.path()), SystemTime::now()).unwrap();
        assert!(sub.join("inner.txt").exists());
        assert_eq!(aggregate(dir.path()), "top");
    }

    #[test]
    fn custom_extension_and_aggregate_name() {
        let dir = tempfile::tempdir().unwrap();
        write_aged(dir.path(), "a.csv", "1,2\n", HOUR);
        write_aged(dir.path(), "b.txt", "ignored", HOUR);

        let p = policy(dir.path())
            .with_extension(".csv")
            .with_aggregate_name("merged.csv");
        run_cycle(&p, SystemTime::now()).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("merged.csv")).unwrap(), "1,2\n");
        assert!(!dir.path().join("all.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_aged(dir.path(), "good.txt", "good", HOUR);
        std::os::unix::fs::symlink(dir.path().join("missing-target"), dir.path().join("broken.txt"))
            .unwrap();

        let report = run_cycle(&policy(dir.path()), SystemTime::now()).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.merged, 1);
        assert_eq!(aggregate(dir.path()), "good");
    }

    #[cfg(unix)]
    #[test]
    fn aggregate_is_readable_by_others() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();

        run_cycle(&policy(dir.path()), SystemTime::now()).unwrap();

        let mode = fs::metadata(dir.path().join("all.txt"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o644, 0o644, "mode was {mode:o}");
    }

    #[test]
    fn no_staging_files_are_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        write_aged(dir.path(), "a.txt", "A", HOUR);
        run_cycle(&policy(dir.path()), SystemTime::now()).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".partial")), "{names:?}");
    }

    #[test]
    fn missing_directory_fails_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");
        let err = run_cycle(&policy(&gone), SystemTime::now()).unwrap_err();
        assert!(matches!(err, LifecycleError::ReadDir { .. }));
    }

    #[test]
    fn policy_from_config() {
        let mut storage = StorageConfig::default();
        storage.watch_dir = Some(PathBuf::from("/srv/drop"));
        storage.retention_secs = 60;
        let p = LifecyclePolicy::from_config(&storage);
        assert_eq!(p.aggregate_path(), PathBuf::from("/srv/drop/all.txt"));
        assert_eq!(p.retention, Duration::from_secs(60));
        assert!(p.is_mergeable("x.txt"));
        assert!(!p.is_mergeable("all.txt"));
        assert!(!p.is_mergeable("x.log"));
    }
}
