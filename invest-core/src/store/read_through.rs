//! Read-through cache: local store first, remote on miss.

use super::local::{Keys, LocalStore};
use super::KvStore;
use crate::codec::{Codec, RecordCodec};
use crate::error::{CacheError, Result};
use crate::key::{IntoKey, StructuredKey};
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Where a value returned by the cache came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Local,
    Remote,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provenance::Local => "local",
            Provenance::Remote => "remote",
        })
    }
}

/// A value tagged with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: Provenance,
}

/// How the cache treats a local record that fails to decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptPolicy {
    /// Surface [`CacheError::CorruptRecord`] to the caller.
    #[default]
    Fail,
    /// Treat it as a miss and overwrite it with a fresh fetch.
    Refetch,
}

/// Local store in front of a remote store.
///
/// A hit never touches the remote. A miss costs exactly one remote fetch,
/// which is persisted before it is returned. A failed fetch leaves the
/// local store untouched. Nothing expires.
#[derive(Debug)]
pub struct ReadThroughCache<R, C = RecordCodec> {
    local: LocalStore<C>,
    remote: R,
    corrupt_policy: CorruptPolicy,
}

impl<R: KvStore, C: Codec<FieldValue>> ReadThroughCache<R, C> {
    pub fn new(local: LocalStore<C>, remote: R) -> Self {
        Self {
            local,
            remote,
            corrupt_policy: CorruptPolicy::default(),
        }
    }

    pub fn with_corrupt_policy(mut self, policy: CorruptPolicy) -> Self {
        self.corrupt_policy = policy;
        self
    }

    pub fn corrupt_policy(&self) -> CorruptPolicy {
        self.corrupt_policy
    }

    pub fn local(&self) -> &LocalStore<C> {
        &self.local
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn get(&self, key: impl IntoKey) -> Result<FieldValue> {
        self.get_sourced(key).map(|s| s.value)
    }

    /// Like [`get`](Self::get), also reporting whether the value was fetched.
    pub fn get_sourced(&self, key: impl IntoKey) -> Result<Sourced<FieldValue>> {
        let key = key.into_key()?;

        match self.local.get(&key) {
            Ok(value) => {
                debug!(%key, "cache hit");
                return Ok(Sourced {
                    value,
                    source: Provenance::Local,
                });
            }
            Err(e) if e.is_not_found() => debug!(%key, "cache miss"),
            Err(CacheError::CorruptRecord { path, reason })
                if self.corrupt_policy == CorruptPolicy::Refetch =>
            {
                warn!(%key, path = %path.display(), %reason, "corrupt record, refetching");
            }
            Err(e) => return Err(e),
        }

        let value = self.remote.get(&key)?;
        self.local.set(&key, &value)?;
        info!(%key, remote = self.remote.name(), "fetched and cached");

        Ok(Sourced {
            value,
            source: Provenance::Remote,
        })
    }

    /// Write straight to the local store.
    pub fn set(&self, key: impl IntoKey, value: &FieldValue) -> Result<()> {
        self.local.set(key, value)
    }

    pub fn delete(&self, key: impl IntoKey) -> Result<()> {
        self.local.delete(key)
    }

    /// Local membership only. Never fetches.
    pub fn contains(&self, key: impl IntoKey) -> Result<bool> {
        self.local.contains(key)
    }

    pub fn keys(&self) -> Keys<'_> {
        self.local.keys()
    }

    pub fn len(&self) -> usize {
        self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    /// Whether a miss could currently be filled.
    pub fn is_available(&self) -> bool {
        self.remote.is_available()
    }
}

impl<R: KvStore, C: Codec<FieldValue>> KvStore for ReadThroughCache<R, C> {
    fn name(&self) -> &'static str {
        "read-through cache"
    }

    fn get(&self, key: &StructuredKey) -> Result<FieldValue> {
        ReadThroughCache::<R, C>::get(self, key)
    }

    fn set(&self, key: &StructuredKey, value: &FieldValue) -> Result<()> {
        ReadThroughCache::<R, C>::set(self, key, value)
    }

    fn delete(&self, key: &StructuredKey) -> Result<()> {
        ReadThroughCache::<R, C>::delete(self, key)
    }

    fn contains(&self, key: &StructuredKey) -> Result<bool> {
        ReadThroughCache::<R, C>::contains(self, key)
    }

    fn is_available(&self) -> bool {
        ReadThroughCache::<R, C>::is_available(self)
    }
}
