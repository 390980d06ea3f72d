//! Replay retention: prune old match folders by age and count

use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::catalog::HEADER_FILE_SUFFIX;

/// Sweep period when none is configured
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// How many recorded matches stay on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Keep at most this many matches, newest first; zero keeps all
    pub max_matches: usize,
    /// Remove matches last modified longer ago than this
    pub max_age: Option<Duration>,
}

impl RetentionPolicy {
    pub fn is_unbounded(&self) -> bool {
        self.max_matches == 0 && self.max_age.is_none()
    }
}

/// Disk footprint of the replays kept by the last sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub matches: usize,
    pub headers: usize,
    pub bytes: u64,
    pub last_sweep: Option<DateTime<Utc>>,
}

/// One logical match: a folder, or a frame file with its `.header.json` companions
#[derive(Debug, Default)]
struct Artefact {
    name: String,
    paths: Vec<PathBuf>,
    headers: Vec<PathBuf>,
    bytes: u64,
    modified: Option<SystemTime>,
}

impl Artefact {
    fn touch(&mut self, modified: SystemTime) {
        if self.modified.map_or(true, |current| modified > current) {
            self.modified = Some(modified);
        }
    }
}

/// Applies a [`RetentionPolicy`] to the top level of a replay directory
pub struct ReplayCleaner {
    dir: PathBuf,
    policy: RetentionPolicy,
    stats: RwLock<StorageStats>,
}

impl ReplayCleaner {
    pub fn new(dir: impl Into<PathBuf>, policy: RetentionPolicy) -> Self {
        Self {
            dir: dir.into(),
            policy,
            stats: RwLock::new(StorageStats::default()),
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Statistics published by the last sweep
    pub fn stats(&self) -> StorageStats {
        *self.stats.read()
    }

    pub fn sweep(&self) -> StorageStats {
        self.sweep_at(SystemTime::now())
    }

    /// Prune against `now` and publish the resulting statistics
    pub fn sweep_at(&self, now: SystemTime) -> StorageStats {
        let mut stats = StorageStats {
            last_sweep: Some(DateTime::<Utc>::from(now)),
            ..StorageStats::default()
        };

        let artefacts = match self.collect() {
            Ok(artefacts) => artefacts,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Replay retention scan failed");
                return self.publish(stats);
            }
        };

        let mut kept = 0;
        for artefact in artefacts {
            if let Some(reason) = self.removal_reason(&artefact, now, kept) {
                match remove(&artefact) {
                    Ok(()) => {
                        info!(
                            match_name = %artefact.name,
                            reason = %reason,
                            "Replay retention removed match"
                        );
                        continue;
                    }
                    Err(e) => {
                        warn!(
                            match_name = %artefact.name,
                            error = %e,
                            "Replay retention removal failed"
                        );
                    }
                }
            }
            kept += 1;
            stats.matches += 1;
            stats.headers += artefact.headers.len();
            stats.bytes += artefact.bytes;
        }

        debug!(
            dir = %self.dir.display(),
            matches = stats.matches,
            bytes = stats.bytes,
            "Replay retention sweep complete"
        );
        self.publish(stats)
    }

    /// Sweep now, then once per `period` until `shutdown` resolves
    pub async fn run<F>(self: Arc<Self>, period: Duration, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let period = if period.is_zero() {
            DEFAULT_SWEEP_INTERVAL
        } else {
            period
        };
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            dir = %self.dir.display(),
            max_matches = self.policy.max_matches,
            max_age_secs = self.policy.max_age.map(|age| age.as_secs()),
            "Replay retention started"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let cleaner = self.clone();
                    if let Err(e) = tokio::task::spawn_blocking(move || cleaner.sweep()).await {
                        warn!(error = %e, "Replay retention sweep panicked");
                    }
                }
            }
        }

        info!(dir = %self.dir.display(), "Replay retention stopped");
    }

    fn publish(&self, stats: StorageStats) -> StorageStats {
        *self.stats.write() = stats;
        stats
    }

    fn removal_reason(&self, artefact: &Artefact, now: SystemTime, kept: usize) -> Option<String> {
        let mut reasons = Vec::new();
        if let (Some(max_age), Some(modified)) = (self.policy.max_age, artefact.modified) {
            let age = now.duration_since(modified).unwrap_or_default();
            if age > max_age {
                reasons.push(format!("age>{}s", max_age.as_secs()));
            }
        }
        if self.policy.max_matches > 0 && kept >= self.policy.max_matches {
            reasons.push(format!(">={} matches", self.policy.max_matches));
        }
        (!reasons.is_empty()).then(|| reasons.join(", "))
    }

    /// Group top-level entries into matches, newest first
    fn collect(&self) -> io::Result<Vec<Artefact>> {
        let mut grouped: HashMap<String, Artefact> = HashMap::new();

        for item in fs::read_dir(&self.dir)? {
            let item = item?;
            let path = item.path();
            let name = item.file_name().to_string_lossy().into_owned();
            let metadata = match item.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Replay retention stat failed");
                    continue;
                }
            };

            let (base, is_header) = match name.strip_suffix(HEADER_FILE_SUFFIX) {
                Some(base) => (base.to_string(), true),
                None => (name.clone(), false),
            };
            let artefact = grouped.entry(base.clone()).or_insert_with(|| Artefact {
                name: base,
                ..Artefact::default()
            });

            if metadata.is_dir() {
                let (bytes, newest) = match directory_footprint(&path) {
                    Ok(footprint) => footprint,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Replay retention size failed");
                        continue;
                    }
                };
                // Folder mtime only moves when entries are added; the files carry the age
                if let Some(modified) = newest.or_else(|| metadata.modified().ok()) {
                    artefact.touch(modified);
                }
                artefact.paths.push(path);
                artefact.bytes += bytes;
                continue;
            }

            if let Ok(modified) = metadata.modified() {
                artefact.touch(modified);
            }
            if is_header {
                artefact.headers.push(path);
            } else {
                artefact.paths.push(path);
            }
            artefact.bytes += metadata.len();
        }

        let mut artefacts: Vec<Artefact> = grouped.into_values().collect();
        artefacts.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(artefacts)
    }
}

/// Total file size under `root` and the newest file modification time
fn directory_footprint(root: &Path) -> io::Result<(u64, Option<SystemTime>)> {
    let mut bytes = 0;
    let mut newest: Option<SystemTime> = None;

    for item in fs::read_dir(root)? {
        let item = item?;
        let metadata = item.metadata()?;
        if metadata.is_dir() {
            let (nested_bytes, nested_newest) = directory_footprint(&item.path())?;
            bytes += nested_bytes;
            newest = newest.max(nested_newest);
            continue;
        }
        bytes += metadata.len();
        newest = newest.max(metadata.modified().ok());
    }
    Ok((bytes, newest))
}

/// Delete an artefact; already-missing files are not an error
fn remove(artefact: &Artefact) -> io::Result<()> {
    let mut first_error = None;
    for path in artefact.paths.iter().chain(&artefact.headers) {
        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                first_error.get_or_insert(e);
            }
            _ => {}
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    fn write_file(path: &Path, bytes: usize, modified: SystemTime) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; bytes]).unwrap();
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
    }

    /// A flat replay: frame file plus its named header
    fn write_flat_match(dir: &Path, base: &str, modified: SystemTime, bytes: usize) {
        let frames = dir.join(format!("{}.jsonl.zst", base));
        write_file(&frames, bytes, modified);
        let header = dir.join(format!("{}.jsonl.zst{}", base, HEADER_FILE_SUFFIX));
        write_file(&header, 2, modified);
    }

    /// A recorder-style match folder
    fn write_match_dir(dir: &Path, name: &str, modified: SystemTime, files: usize) {
        for i in 0..files {
            write_file(&dir.join(name).join(format!("frame-{}.bin", i)), 1, modified);
        }
    }

    fn remaining(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|item| item.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| !name.ends_with(HEADER_FILE_SUFFIX))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_max_matches_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        write_flat_match(dir.path(), "alpha", now - 3 * HOUR, 64);
        write_flat_match(dir.path(), "bravo", now - 2 * HOUR, 32);
        write_flat_match(dir.path(), "charlie", now - HOUR, 48);

        let cleaner = ReplayCleaner::new(
            dir.path(),
            RetentionPolicy {
                max_matches: 2,
                max_age: None,
            },
        );
        let stats = cleaner.sweep_at(now);

        assert_eq!(remaining(dir.path()), vec!["bravo.jsonl.zst", "charlie.jsonl.zst"]);
        assert_eq!(stats.matches, 2);
        assert_eq!(stats.headers, 2);
        assert_eq!(stats.bytes, 48 + 32 + 2 + 2);
        assert!(stats.last_sweep.is_some());
        assert_eq!(cleaner.stats(), stats);
    }

    #[test]
    fn test_max_age_prunes_files_and_folders() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        write_flat_match(dir.path(), "delta", now - 48 * HOUR, 16);
        write_match_dir(dir.path(), "echo-20240714T080000Z", now - 72 * HOUR, 3);
        write_match_dir(dir.path(), "foxtrot-20240716T070000Z", now - HOUR, 5);

        let cleaner = ReplayCleaner::new(
            dir.path(),
            RetentionPolicy {
                max_matches: 5,
                max_age: Some(36 * HOUR),
            },
        );
        let stats = cleaner.sweep_at(now);

        assert_eq!(remaining(dir.path()), vec!["foxtrot-20240716T070000Z"]);
        assert_eq!(stats.matches, 1);
        assert_eq!(stats.headers, 0);
        assert_eq!(stats.bytes, 5);
    }

    #[test]
    fn test_unbounded_policy_only_reports() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        write_match_dir(dir.path(), "old", now - 1000 * HOUR, 2);
        write_flat_match(dir.path(), "new", now, 10);

        let cleaner = ReplayCleaner::new(dir.path(), RetentionPolicy::default());
        assert!(cleaner.policy().is_unbounded());
        let stats = cleaner.sweep_at(now);

        assert_eq!(remaining(dir.path()), vec!["new.jsonl.zst", "old"]);
        assert_eq!(stats.matches, 2);
        assert_eq!(stats.bytes, 2 + 10 + 2);
    }

    #[test]
    fn test_missing_directory_publishes_empty_stats() {
        let dir = tempfile::tempdir().unwrap();
        let cleaner = ReplayCleaner::new(dir.path().join("absent"), RetentionPolicy::default());

        let stats = cleaner.sweep();
        assert_eq!(stats.matches, 0);
        assert!(stats.last_sweep.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweeps_eagerly_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        write_match_dir(dir.path(), "a", now - 2 * HOUR, 1);
        write_match_dir(dir.path(), "b", now - HOUR, 1);

        let cleaner = Arc::new(ReplayCleaner::new(
            dir.path(),
            RetentionPolicy {
                max_matches: 1,
                max_age: None,
            },
        ));
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(cleaner.clone().run(HOUR, async move {
            let _ = stop_rx.await;
        }));

        while cleaner.stats().last_sweep.is_none() {
            tokio::task::yield_now().await;
        }
        let _ = stop_tx.send(());
        task.await.unwrap();

        assert_eq!(remaining(dir.path()), vec!["b"]);
        assert_eq!(cleaner.stats().matches, 1);
    }
}
