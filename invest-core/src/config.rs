//! Configuration: where data lives and how the stores behave.
//!
//! Loaded from TOML:
//!
//! ```toml
//! root_dir = "/data/invest"
//! root_policy = "create"        # create | prompt | require
//! corrupt_policy = "fail"       # fail | refetch
//! format = "record"             # record | json
//!
//! [overrides.history]
//! period = "5y"
//! interval = "1wk"
//!
//! [provider]
//! retries = 2
//!
//! [sync]
//! fields = ["earnings", "history"]
//! ```
//!
//! The root directory resolves as: `root_dir` from the file, then the
//! `INVEST_ROOTDIR` environment variable, then `~/.invest`.

use crate::catalog::Catalog;
use crate::codec::StoreFormat;
use crate::error::{CacheError, Result};
use crate::field::{Field, FieldOverrides};
use crate::provider::{CircuitBreaker, Provider, YahooProvider};
use crate::store::{CorruptPolicy, LocalStore, ReadThroughCache, RemoteSource, RootPolicy};
use crate::sync::{SkipList, DEFAULT_SKIP_LIST_FILENAME, DEFAULT_SYNC_FIELDS};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable overriding the root directory.
pub const ROOTDIR_ENVVAR: &str = "INVEST_ROOTDIR";

/// Root directory name under the home directory.
pub const DEFAULT_ROOT_DIRNAME: &str = ".invest";

/// Ticker records live in this subdirectory of the root.
pub const TICKER_DATA_DIRNAME: &str = "ticker_data";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InvestConfig {
    pub root_dir: Option<PathBuf>,
    pub root_policy: RootPolicy,
    pub corrupt_policy: CorruptPolicy,
    pub format: StoreFormat,
    /// Arguments bound to parametrized fields, per field.
    pub overrides: FieldOverrides,
    pub provider: ProviderConfig,
    pub sync: SyncConfig,
}

/// Yahoo provider transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub cooldown_secs: u64,
    pub failure_threshold: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_delay_ms: 500,
            cooldown_secs: 30 * 60,
            failure_threshold: 3,
        }
    }
}

/// Bulk sync settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub fields: Vec<Field>,
    /// Defaults to `{root}/bad_ticker_info.json`.
    pub skip_list: Option<PathBuf>,
    /// Symbol list or TOML universe; the bundled list when absent.
    pub catalog: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fields: DEFAULT_SYNC_FIELDS.to_vec(),
            skip_list: None,
            catalog: None,
        }
    }
}

impl InvestConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CacheError::io(path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CacheError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CacheError::Config(e.to_string()))
    }

    /// The root directory after applying env and home-directory fallbacks.
    pub fn root_dir(&self) -> Result<PathBuf> {
        resolve_root(
            self.root_dir.as_deref(),
            std::env::var_os(ROOTDIR_ENVVAR),
            dirs::home_dir(),
        )
    }

    pub fn ticker_data_dir(&self) -> Result<PathBuf> {
        Ok(self.root_dir()?.join(TICKER_DATA_DIRNAME))
    }

    pub fn skip_list_path(&self) -> Result<PathBuf> {
        match &self.sync.skip_list {
            Some(path) => Ok(path.clone()),
            None => Ok(self.root_dir()?.join(DEFAULT_SKIP_LIST_FILENAME)),
        }
    }

    pub fn load_skip_list(&self) -> Result<SkipList> {
        SkipList::load(self.skip_list_path()?)
    }

    /// The sync catalog: the configured file, or the bundled list.
    pub fn catalog(&self) -> Result<Catalog> {
        match &self.sync.catalog {
            Some(path) => Catalog::from_file(path),
            None => Catalog::bundled(),
        }
    }

    pub fn open_store(&self) -> Result<LocalStore<StoreFormat>> {
        LocalStore::with_codec(self.ticker_data_dir()?, self.root_policy, self.format)
    }

    /// Local store in front of `provider`, with the configured overrides bound.
    pub fn open_cache<P: Provider>(
        &self,
        provider: P,
    ) -> Result<ReadThroughCache<RemoteSource<P>, StoreFormat>> {
        let remote = RemoteSource::with_overrides(provider, self.overrides.clone());
        Ok(ReadThroughCache::new(self.open_store()?, remote).with_corrupt_policy(self.corrupt_policy))
    }

    pub fn yahoo_provider(&self) -> Result<YahooProvider> {
        let p = &self.provider;
        let breaker = CircuitBreaker::new(Duration::from_secs(p.cooldown_secs))
            .with_failure_threshold(p.failure_threshold);
        let provider = YahooProvider::new(Arc::new(breaker))
            .map_err(|e| CacheError::Config(e.to_string()))?;
        Ok(provider.with_retries(p.retries, Duration::from_millis(p.retry_delay_ms)))
    }
}

/// Explicit path, then a non-empty env value, then `{home}/.invest`.
fn resolve_root(
    explicit: Option<&Path>,
    env: Option<OsString>,
    home: Option<PathBuf>,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(value) = env.filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(value));
    }
    home.map(|h| h.join(DEFAULT_ROOT_DIRNAME)).ok_or_else(|| {
        CacheError::Config(format!(
            "cannot determine a root directory: set {ROOTDIR_ENVVAR} or root_dir"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldArgs;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = InvestConfig::from_toml("").unwrap();
        assert_eq!(cfg, InvestConfig::default());
        assert_eq!(cfg.sync.fields, DEFAULT_SYNC_FIELDS.to_vec());
        assert_eq!(cfg.root_policy, RootPolicy::Create);
        assert_eq!(cfg.corrupt_policy, CorruptPolicy::Fail);
    }

    #[test]
    fn full_file_parses() {
        let cfg = InvestConfig::from_toml(
            r#"
            root_dir = "/tmp/invest"
            root_policy = "require"
            corrupt_policy = "refetch"
            format = "json"

            [overrides.history]
            period = "5y"
            interval = "1wk"

            [provider]
            retries = 2

            [sync]
            fields = ["info", "history"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.root_dir().unwrap(), PathBuf::from("/tmp/invest"));
        assert_eq!(
            cfg.ticker_data_dir().unwrap(),
            PathBuf::from("/tmp/invest/ticker_data")
        );
        assert_eq!(cfg.format, StoreFormat::Json);
        assert_eq!(
            cfg.overrides.args_for(Field::History),
            &FieldArgs::new().with("interval", "1wk").with("period", "5y")
        );
        assert_eq!(cfg.provider.retries, 2);
        assert_eq!(cfg.provider.failure_threshold, 3);
        assert_eq!(cfg.sync.fields, vec![Field::Info, Field::History]);
    }

    #[test]
    fn bad_values_are_config_errors() {
        for bad in [
            "root_policy = \"sometimes\"",
            "[overrides.info]\nperiod = \"1d\"",
            "[sync]\nfields = [\"price\"]",
            "colour = \"blue\"",
        ] {
            assert!(
                matches!(InvestConfig::from_toml(bad), Err(CacheError::Config(_))),
                "{bad} should fail"
            );
        }
    }

    #[test]
    fn root_resolution_order() {
        let home = Some(PathBuf::from("/home/u"));
        let env = Some(OsString::from("/env/root"));

        assert_eq!(
            resolve_root(Some(Path::new("/explicit")), env.clone(), home.clone()).unwrap(),
            PathBuf::from("/explicit")
        );
        assert_eq!(
            resolve_root(None, env, home.clone()).unwrap(),
            PathBuf::from("/env/root")
        );
        assert_eq!(
            resolve_root(None, Some(OsString::new()), home).unwrap(),
            PathBuf::from("/home/u/.invest")
        );
        assert!(resolve_root(None, None, None).is_err());
    }

    #[test]
    fn toml_roundtrip() {
        let mut cfg = InvestConfig::default();
        cfg.overrides = FieldOverrides::new()
            .bind(Field::History, FieldArgs::new().with("period", "max"))
            .unwrap();
        let back = InvestConfig::from_toml(&cfg.to_toml().unwrap()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn open_cache_under_configured_root() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = InvestConfig {
            root_dir: Some(dir.path().to_path_buf()),
            ..InvestConfig::default()
        };
        let provider = cfg.yahoo_provider().unwrap();
        let cache = cfg.open_cache(provider).unwrap();
        assert!(dir.path().join(TICKER_DATA_DIRNAME).is_dir());
        assert!(cache.is_empty());
    }
}
