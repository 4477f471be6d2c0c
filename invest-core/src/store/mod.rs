//! Key-value stores over structured keys.
//!
//! - [`LocalStore`]: records on disk, one file per key
//! - [`RemoteSource`]: read-only view over a [`Provider`](crate::provider::Provider)
//! - [`ReadThroughCache`]: local first, remote on miss, persisted before return

pub mod local;
pub mod read_through;
pub mod remote;

pub use local::{Keys, LocalStore, RootPolicy};
pub use read_through::{CorruptPolicy, Provenance, ReadThroughCache, Sourced};
pub use remote::RemoteSource;

use crate::error::{CacheError, Result};
use crate::key::StructuredKey;
use crate::value::FieldValue;
use std::sync::Arc;

/// Common surface of every store. Mutation is optional.
pub trait KvStore {
    /// Name used in error messages.
    fn name(&self) -> &'static str;

    fn get(&self, key: &StructuredKey) -> Result<FieldValue>;

    fn set(&self, _key: &StructuredKey, _value: &FieldValue) -> Result<()> {
        Err(CacheError::UnsupportedOperation {
            operation: "set",
            store: self.name(),
        })
    }

    fn delete(&self, _key: &StructuredKey) -> Result<()> {
        Err(CacheError::UnsupportedOperation {
            operation: "delete",
            store: self.name(),
        })
    }

    fn contains(&self, key: &StructuredKey) -> Result<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether the store can currently serve requests.
    fn is_available(&self) -> bool {
        true
    }
}

impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn get(&self, key: &StructuredKey) -> Result<FieldValue> {
        (**self).get(key)
    }

    fn set(&self, key: &StructuredKey, value: &FieldValue) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &StructuredKey) -> Result<()> {
        (**self).delete(key)
    }

    fn contains(&self, key: &StructuredKey) -> Result<bool> {
        (**self).contains(key)
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}
