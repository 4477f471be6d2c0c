//! Bulk sync: fill the local store for every (field, entity) in a catalog.
//!
//! Keys already cached or listed in the skip list are not fetched. A key
//! whose fetch fails permanently is added to the skip list so later runs
//! do not retry it; transient failures are only reported. The skip list is
//! saved at the end of every run, including runs cut short.

use crate::catalog::Catalog;
use crate::codec::Codec;
use crate::error::{CacheError, Result};
use crate::field::Field;
use crate::key::StructuredKey;
use crate::store::{KvStore, ReadThroughCache};
use crate::value::FieldValue;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Fields synced when none are given.
pub const DEFAULT_SYNC_FIELDS: [Field; 4] = [
    Field::Earnings,
    Field::BalanceSheet,
    Field::Cashflow,
    Field::History,
];

/// File name of the skip list inside the root directory.
pub const DEFAULT_SKIP_LIST_FILENAME: &str = "bad_ticker_info.json";

/// Keys that failed permanently, persisted as a JSON array of `entity/field`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipList {
    path: Option<PathBuf>,
    keys: BTreeSet<String>,
}

impl SkipList {
    /// In-memory only; [`save`](Self::save) is a no-op.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing file is an empty list.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let keys = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                CacheError::Serialization(format!("skip list {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(CacheError::io(path, e)),
        };
        Ok(Self {
            path: Some(path),
            keys,
        })
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(&self.keys)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| CacheError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            CacheError::io(path, e)
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn contains(&self, key: &StructuredKey) -> bool {
        self.keys.contains(&key.to_string())
    }

    pub fn insert(&mut self, key: &StructuredKey) -> bool {
        self.keys.insert(key.to_string())
    }

    pub fn remove(&mut self, key: &StructuredKey) -> bool {
        self.keys.remove(&key.to_string())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

/// Why a key was not fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Cached,
    SkipListed,
}

/// Progress callback for sync operations.
pub trait SyncProgress: Send {
    /// Called when starting to fetch a key.
    fn on_start(&self, key: &StructuredKey, index: usize, total: usize);

    /// Called for keys that are not fetched.
    fn on_skip(&self, _key: &StructuredKey, _reason: SkipReason) {}

    /// Called when a key fetch completes.
    fn on_complete(&self, key: &StructuredKey, index: usize, total: usize, result: &Result<()>);

    /// Called when the entire run is done.
    fn on_batch_complete(&self, summary: &SyncSummary);
}

/// Simple progress reporter that prints to stdout.
pub struct StdoutProgress;

impl SyncProgress for StdoutProgress {
    fn on_start(&self, key: &StructuredKey, index: usize, total: usize) {
        println!("[{}/{}] Fetching {key}...", index + 1, total);
    }

    fn on_complete(&self, key: &StructuredKey, _index: usize, _total: usize, result: &Result<()>) {
        match result {
            Ok(()) => println!("  OK: {key}"),
            Err(e) => println!("  FAIL: {key}: {e}"),
        }
    }

    fn on_batch_complete(&self, summary: &SyncSummary) {
        println!("\n{summary}");
    }
}

/// Reports through `tracing` instead of stdout.
pub struct TracingProgress;

impl SyncProgress for TracingProgress {
    fn on_start(&self, key: &StructuredKey, index: usize, total: usize) {
        info!(%key, n = index + 1, total, "fetching");
    }

    fn on_skip(&self, key: &StructuredKey, reason: SkipReason) {
        tracing::debug!(%key, ?reason, "skipped");
    }

    fn on_complete(&self, key: &StructuredKey, _index: usize, _total: usize, result: &Result<()>) {
        if let Err(e) = result {
            warn!(%key, error = %e, "fetch failed");
        }
    }

    fn on_batch_complete(&self, summary: &SyncSummary) {
        info!(
            total = summary.total,
            fetched = summary.fetched,
            skipped = summary.skipped,
            failed = summary.failed,
            aborted = summary.aborted,
            "sync complete"
        );
    }
}

/// Outcome of a sync run.
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub total: usize,
    pub fetched: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Keys never attempted because the remote became unavailable.
    pub aborted: usize,
    pub errors: Vec<(String, CacheError)>,
}

impl SyncSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.aborted == 0
    }
}

impl std::fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sync complete: {} fetched, {} skipped, {} failed",
            self.fetched, self.skipped, self.failed
        )?;
        if self.aborted > 0 {
            write!(f, ", {} not attempted (remote unavailable)", self.aborted)?;
        }
        write!(f, " ({} keys)", self.total)
    }
}

/// Fetch every missing `(entity, field)` of `catalog` through `cache`.
///
/// Iterates fields in the outer loop. Stops early when the remote reports
/// itself unavailable. Per-key errors are collected, not returned; the
/// result is `Err` only when the skip list cannot be saved.
pub fn sync_catalog<R: KvStore, C: Codec<FieldValue>>(
    cache: &ReadThroughCache<R, C>,
    catalog: &Catalog,
    fields: &[Field],
    skip_list: &mut SkipList,
    progress: &dyn SyncProgress,
) -> Result<SyncSummary> {
    let total = fields.len() * catalog.len();
    let mut summary = SyncSummary {
        total,
        ..SyncSummary::default()
    };
    let mut index = 0;

    'fields: for &field in fields {
        for entity in catalog.iter() {
            let i = index;
            index += 1;

            let key = match StructuredKey::new(entity, field) {
                Ok(key) => key,
                Err(e) => {
                    warn!(entity, %field, error = %e, "cannot form key");
                    summary.failed += 1;
                    summary.errors.push((format!("{entity}/{field}"), e));
                    continue;
                }
            };

            if skip_list.contains(&key) {
                summary.skipped += 1;
                progress.on_skip(&key, SkipReason::SkipListed);
                continue;
            }
            if cache.local().contains(&key).unwrap_or(false) {
                summary.skipped += 1;
                progress.on_skip(&key, SkipReason::Cached);
                continue;
            }

            // Bail out early if the remote stopped serving (circuit breaker)
            if !cache.is_available() {
                summary.aborted = total - i;
                warn!(%key, remaining = summary.aborted, "remote unavailable, stopping sync");
                break 'fields;
            }

            progress.on_start(&key, i, total);
            let result = cache.get(&key).map(|_| ());
            progress.on_complete(&key, i, total, &result);

            match result {
                Ok(()) => summary.fetched += 1,
                Err(e) => {
                    if is_permanent_remote_failure(&e) && skip_list.insert(&key) {
                        info!(%key, "added to skip list");
                    }
                    summary.failed += 1;
                    summary.errors.push((key.to_string(), e));
                }
            }
        }
    }

    skip_list.save()?;
    progress.on_batch_complete(&summary);
    Ok(summary)
}

fn is_permanent_remote_failure(e: &CacheError) -> bool {
    matches!(e, CacheError::RemoteUnavailable { .. }) && !e.is_transient()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use crate::store::{LocalStore, RootPolicy};
    use std::cell::Cell;
    use tempfile::TempDir;

    struct Scripted {
        calls: Cell<usize>,
        available_for: usize,
    }

    impl KvStore for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn get(&self, key: &StructuredKey) -> Result<FieldValue> {
            self.calls.set(self.calls.get() + 1);
            let source = match key.entity() {
                "BAD" => ProviderError::SymbolNotFound {
                    symbol: "BAD".into(),
                },
                "FLAKY" => ProviderError::NetworkUnreachable("timeout".into()),
                _ => return Ok(FieldValue::from(key.to_string())),
            };
            Err(CacheError::RemoteUnavailable {
                key: key.to_string(),
                source,
            })
        }

        fn is_available(&self) -> bool {
            self.calls.get() < self.available_for
        }
    }

    struct Silent;

    impl SyncProgress for Silent {
        fn on_start(&self, _: &StructuredKey, _: usize, _: usize) {}
        fn on_complete(&self, _: &StructuredKey, _: usize, _: usize, _: &Result<()>) {}
        fn on_batch_complete(&self, _: &SyncSummary) {}
    }

    fn cache(dir: &TempDir, available_for: usize) -> ReadThroughCache<Scripted> {
        let local = LocalStore::open(dir.path().join("ticker_data"), RootPolicy::Create).unwrap();
        ReadThroughCache::new(
            local,
            Scripted {
                calls: Cell::new(0),
                available_for,
            },
        )
    }

    #[test]
    fn permanent_failures_are_skip_listed_transient_are_not() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir, usize::MAX);
        let catalog = Catalog::from_symbols(["AAPL", "BAD", "FLAKY"]);
        let mut skip = SkipList::load(dir.path().join(DEFAULT_SKIP_LIST_FILENAME)).unwrap();

        let summary = sync_catalog(&cache, &catalog, &[Field::Info], &mut skip, &Silent).unwrap();
        assert_eq!((summary.fetched, summary.failed, summary.skipped), (1, 2, 0));
        assert_eq!(skip.iter().collect::<Vec<_>>(), vec!["BAD/info"]);

        // Second run: AAPL cached, BAD skip-listed, FLAKY retried.
        let mut skip = SkipList::load(dir.path().join(DEFAULT_SKIP_LIST_FILENAME)).unwrap();
        let summary = sync_catalog(&cache, &catalog, &[Field::Info], &mut skip, &Silent).unwrap();
        assert_eq!((summary.fetched, summary.failed, summary.skipped), (0, 1, 2));
        assert_eq!(cache.remote().calls.get(), 4);
    }

    #[test]
    fn stops_when_remote_becomes_unavailable() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir, 2);
        let catalog = Catalog::from_symbols(["A", "B", "C", "D"]);
        let mut skip = SkipList::new();

        let summary =
            sync_catalog(&cache, &catalog, &DEFAULT_SYNC_FIELDS, &mut skip, &Silent).unwrap();
        assert_eq!(summary.total, 16);
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.aborted, 14);
        assert!(!summary.all_succeeded());
        assert!(skip.is_empty());
    }

    #[test]
    fn skip_list_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("skip.json");
        let mut skip = SkipList::load(&path).unwrap();
        assert!(skip.is_empty());

        let key = StructuredKey::new("ZZZZ", Field::History).unwrap();
        assert!(skip.insert(&key));
        assert!(!skip.insert(&key));
        skip.save().unwrap();

        let loaded = SkipList::load(&path).unwrap();
        assert!(loaded.contains(&key));
        let raw: Vec<String> = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw, vec!["ZZZZ/history"]);
    }
}
