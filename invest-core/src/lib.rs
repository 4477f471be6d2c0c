//! Invest Core: a read-through cache over remote ticker data.
//!
//! - Structured `(entity, field)` keys and their flat forms
//! - A local store of one encoded record per key
//! - A read-only remote source over a data provider (Yahoo Finance included)
//! - A read-through cache joining the two
//! - Catalogs of ticker symbols and dict-like views over a provider
//! - A bulk sync driver with a persistent skip list

pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod field;
pub mod key;
pub mod provider;
pub mod store;
pub mod sync;
pub mod value;
pub mod view;

pub use catalog::Catalog;
pub use codec::{Codec, JsonCodec, RecordCodec, StoreFormat};
pub use config::InvestConfig;
pub use error::{CacheError, Result};
pub use field::{ArgValue, Field, FieldArgs, FieldKind, FieldOverrides};
pub use key::{IntoKey, KeyTemplate, StructuredKey};
pub use provider::{Provider, ProviderError, YahooProvider};
pub use store::{
    CorruptPolicy, KvStore, LocalStore, Provenance, ReadThroughCache, RemoteSource, RootPolicy,
    Sourced,
};
pub use sync::{sync_catalog, SkipList, SyncSummary};
pub use value::{FieldValue, Scalar, Series, Table};
pub use view::{CatalogView, EntityView, SpecificField};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: values, keys, errors and providers cross threads.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<FieldValue>();
        require_sync::<FieldValue>();
        require_send::<StructuredKey>();
        require_sync::<StructuredKey>();
        require_send::<FieldOverrides>();
        require_sync::<FieldOverrides>();
        require_send::<CacheError>();
        require_sync::<CacheError>();
        require_send::<LocalStore>();
        require_sync::<LocalStore>();
        require_send::<YahooProvider>();
        require_sync::<YahooProvider>();
        require_send::<ReadThroughCache<RemoteSource<YahooProvider>>>();
        require_sync::<ReadThroughCache<RemoteSource<YahooProvider>>>();
        require_send::<Catalog>();
        require_sync::<Catalog>();
    }
}
