//! Integration tests for the bulk sync driver with an on-disk skip list.

use invest_core::field::{Field, FieldArgs};
use invest_core::provider::{CircuitBreaker, Provider, ProviderError};
use invest_core::sync::{sync_catalog, SkipList, SyncProgress, SyncSummary, TracingProgress};
use invest_core::value::FieldValue;
use invest_core::{Catalog, InvestConfig, Result, StructuredKey};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// Fails permanently for `DELISTED`; opens its breaker after `budget` calls.
struct Budgeted {
    calls: AtomicUsize,
    breaker: CircuitBreaker,
    budget: usize,
}

impl Budgeted {
    fn new(budget: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            breaker: CircuitBreaker::new(Duration::from_secs(3600)),
            budget,
        }
    }

    fn fetch(&self, entity: &str) -> std::result::Result<FieldValue, ProviderError> {
        if !self.breaker.is_allowed() {
            return Err(ProviderError::CircuitBreakerTripped);
        }
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.budget {
            self.breaker.trip();
        }
        match entity {
            "DELISTED" => Err(ProviderError::SymbolNotFound {
                symbol: entity.into(),
            }),
            _ => Ok(FieldValue::from(entity)),
        }
    }
}

impl Provider for Budgeted {
    fn name(&self) -> &str {
        "budgeted"
    }

    fn attribute(&self, entity: &str, _field: Field) -> std::result::Result<FieldValue, ProviderError> {
        self.fetch(entity)
    }

    fn invoke(
        &self,
        entity: &str,
        _field: Field,
        _args: &FieldArgs,
    ) -> std::result::Result<FieldValue, ProviderError> {
        self.fetch(entity)
    }

    fn is_available(&self) -> bool {
        self.breaker.is_allowed()
    }
}

/// Collects the keys it was told about.
#[derive(Default)]
struct Recording {
    started: Mutex<Vec<String>>,
    skipped: Mutex<Vec<String>>,
}

impl SyncProgress for Recording {
    fn on_start(&self, key: &StructuredKey, _index: usize, _total: usize) {
        self.started.lock().unwrap().push(key.to_string());
    }

    fn on_skip(&self, key: &StructuredKey, _reason: invest_core::sync::SkipReason) {
        self.skipped.lock().unwrap().push(key.to_string());
    }

    fn on_complete(&self, _key: &StructuredKey, _index: usize, _total: usize, _result: &Result<()>) {}

    fn on_batch_complete(&self, _summary: &SyncSummary) {}
}

fn config(dir: &TempDir) -> InvestConfig {
    InvestConfig {
        root_dir: Some(dir.path().to_path_buf()),
        ..InvestConfig::default()
    }
}

#[test]
fn sync_fills_store_and_persists_skip_list() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    let provider = Budgeted::new(usize::MAX);
    let cache = cfg.open_cache(&provider).unwrap();
    let catalog = Catalog::from_symbols(["AAPL", "DELISTED", "MSFT"]);
    let fields = [Field::Earnings, Field::History];

    let mut skip = cfg.load_skip_list().unwrap();
    let progress = Recording::default();
    let summary = sync_catalog(&cache, &catalog, &fields, &mut skip, &progress).unwrap();

    assert_eq!(summary.total, 6);
    assert_eq!(summary.fetched, 4);
    assert_eq!(summary.failed, 2);
    assert_eq!(
        *progress.started.lock().unwrap(),
        vec![
            "AAPL/earnings",
            "DELISTED/earnings",
            "MSFT/earnings",
            "AAPL/history",
            "DELISTED/history",
            "MSFT/history",
        ]
    );

    let saved = SkipList::load(cfg.skip_list_path().unwrap()).unwrap();
    assert_eq!(
        saved.iter().collect::<Vec<_>>(),
        vec!["DELISTED/earnings", "DELISTED/history"]
    );
    assert_eq!(cache.len(), 4);

    // Re-running does nothing new.
    let mut skip = cfg.load_skip_list().unwrap();
    let summary = sync_catalog(&cache, &catalog, &fields, &mut skip, &TracingProgress).unwrap();
    assert_eq!((summary.fetched, summary.skipped, summary.failed), (0, 6, 0));
    assert!(summary.all_succeeded());
}

#[test]
fn tripped_breaker_stops_the_run_and_keeps_progress() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    let provider = Budgeted::new(2);
    let cache = cfg.open_cache(&provider).unwrap();
    let catalog = Catalog::from_symbols(["A", "B", "C", "D", "E"]);

    let mut skip = cfg.load_skip_list().unwrap();
    let summary = sync_catalog(&cache, &catalog, &[Field::Info], &mut skip, &TracingProgress).unwrap();

    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.aborted, 3);
    assert!(skip.is_empty());
    assert!(cfg.skip_list_path().unwrap().is_file());
    assert_eq!(cache.len(), 2);
}
