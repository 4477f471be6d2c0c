//! Data provider trait and structured provider errors.
//!
//! The [`Provider`] trait abstracts over remote sources (Yahoo Finance, test
//! stubs) so the cache layers never depend on a particular transport.
//! Providers know nothing about the cache.

pub mod circuit_breaker;
pub mod yahoo;

pub use circuit_breaker::CircuitBreaker;
pub use yahoo::YahooProvider;

use crate::field::{Field, FieldArgs, FieldKind, FieldOverrides};
use crate::value::FieldValue;
use std::sync::Arc;
use thiserror::Error;

/// Structured error types for provider operations.
///
/// Designed to be displayable in CLI output and logs.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("field '{field}' is not supported by this provider")]
    Unsupported { field: Field },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Failures that may clear up on their own; everything else is permanent
    /// for the key that produced it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::NetworkUnreachable(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::CircuitBreakerTripped
        )
    }
}

/// A remote source of per-entity field values.
///
/// Attribute fields go through [`Provider::attribute`]; parametrized fields
/// through [`Provider::invoke`] with whatever overrides the caller bound
/// (empty means "use your defaults").
pub trait Provider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    fn attribute(&self, entity: &str, field: Field) -> Result<FieldValue, ProviderError>;

    fn invoke(
        &self,
        entity: &str,
        field: Field,
        args: &FieldArgs,
    ) -> Result<FieldValue, ProviderError>;

    /// Whether requests are currently allowed (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}

impl<P: Provider + ?Sized> Provider for &P {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn attribute(&self, entity: &str, field: Field) -> Result<FieldValue, ProviderError> {
        (**self).attribute(entity, field)
    }

    fn invoke(
        &self,
        entity: &str,
        field: Field,
        args: &FieldArgs,
    ) -> Result<FieldValue, ProviderError> {
        (**self).invoke(entity, field, args)
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

impl<P: Provider + ?Sized> Provider for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn attribute(&self, entity: &str, field: Field) -> Result<FieldValue, ProviderError> {
        (**self).attribute(entity, field)
    }

    fn invoke(
        &self,
        entity: &str,
        field: Field,
        args: &FieldArgs,
    ) -> Result<FieldValue, ProviderError> {
        (**self).invoke(entity, field, args)
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

/// Resolve one field on a provider, dispatching on its kind.
pub fn resolve_field<P: Provider + ?Sized>(
    provider: &P,
    entity: &str,
    field: Field,
    overrides: &FieldOverrides,
) -> Result<FieldValue, ProviderError> {
    match field.kind() {
        FieldKind::Attribute => provider.attribute(entity, field),
        FieldKind::Parametrized => provider.invoke(entity, field, overrides.args_for(field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records how each field was dispatched.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Provider for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn attribute(&self, entity: &str, field: Field) -> Result<FieldValue, ProviderError> {
            self.calls.lock().unwrap().push(format!("attr {entity}/{field}"));
            Ok(FieldValue::null())
        }

        fn invoke(
            &self,
            entity: &str,
            field: Field,
            args: &FieldArgs,
        ) -> Result<FieldValue, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("call {entity}/{field}({args})"));
            Ok(FieldValue::null())
        }
    }

    #[test]
    fn dispatch_follows_field_kind() {
        let p = Recorder::default();
        let overrides = FieldOverrides::new()
            .bind(Field::History, FieldArgs::new().with("period", "5d"))
            .unwrap();

        resolve_field(&p, "SPY", Field::Info, &overrides).unwrap();
        resolve_field(&p, "SPY", Field::History, &overrides).unwrap();
        resolve_field(&p, "SPY", Field::OptionChain, &overrides).unwrap();

        let calls = p.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                "attr SPY/info".to_string(),
                "call SPY/history(period='5d')".to_string(),
                "call SPY/option_chain()".to_string(),
            ]
        );
    }

    #[test]
    fn transient_classification() {
        assert!(ProviderError::RateLimited { retry_after_secs: 5 }.is_transient());
        assert!(ProviderError::CircuitBreakerTripped.is_transient());
        assert!(!ProviderError::Unsupported { field: Field::Isin }.is_transient());
    }
}
