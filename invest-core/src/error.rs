//! Error taxonomy for the key translator, stores, and read-through cache.
//!
//! Provider-side failures are kept in their own [`ProviderError`] type and
//! only enter this taxonomy wrapped in [`CacheError::RemoteUnavailable`].

use crate::provider::ProviderError;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Structured errors for cache operations.
///
/// Nothing in the core swallows these: every variant reaches the caller.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("malformed key '{key}': {reason}")]
    MalformedKey { key: String, reason: String },

    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    #[error("corrupt record at {}: {reason}", path.display())]
    CorruptRecord { path: PathBuf, reason: String },

    #[error("unknown field '{field}' (valid fields: {})", valid.join(", "))]
    UnknownField {
        field: String,
        valid: Vec<&'static str>,
    },

    #[error("invalid argument for '{field}': {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("remote source unavailable for {key}: {source}")]
    RemoteUnavailable {
        key: String,
        #[source]
        source: ProviderError,
    },

    #[error("{operation} is not supported by the {store}")]
    UnsupportedOperation {
        operation: &'static str,
        store: &'static str,
    },

    #[error("directory unavailable: {}", path.display())]
    DirectoryUnavailable { path: PathBuf },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("config error: {0}")]
    Config(String),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// True for a local miss, the one error the read-through cache recovers from.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. })
    }

    /// True when the failure came from the remote side and is worth retrying later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RemoteUnavailable { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_field_lists_valid_set() {
        let err = CacheError::UnknownField {
            field: "nope".into(),
            valid: vec!["history", "info"],
        };
        assert_eq!(
            err.to_string(),
            "unknown field 'nope' (valid fields: history, info)"
        );
    }

    #[test]
    fn transient_only_for_remote_network_failures() {
        let net = CacheError::RemoteUnavailable {
            key: "SPY/history".into(),
            source: ProviderError::NetworkUnreachable("timeout".into()),
        };
        assert!(net.is_transient());

        let missing = CacheError::RemoteUnavailable {
            key: "ZZZZ/history".into(),
            source: ProviderError::SymbolNotFound {
                symbol: "ZZZZ".into(),
            },
        };
        assert!(!missing.is_transient());
        assert!(!CacheError::KeyNotFound { key: "x".into() }.is_transient());
    }
}
