//! Read-only key-value view over a provider.

use super::KvStore;
use crate::error::{CacheError, Result};
use crate::field::FieldOverrides;
use crate::key::{IntoKey, KeyTemplate, StructuredKey};
use crate::provider::{resolve_field, Provider};
use crate::value::FieldValue;
use tracing::debug;

/// Resolves `entity/field` keys against a [`Provider`].
///
/// Parametrized fields use the overrides bound at construction, provider
/// defaults otherwise. Failures are wrapped, never retried here.
#[derive(Debug, Clone)]
pub struct RemoteSource<P> {
    provider: P,
    overrides: FieldOverrides,
    template: KeyTemplate,
}

impl<P: Provider> RemoteSource<P> {
    pub fn new(provider: P) -> Self {
        Self::with_overrides(provider, FieldOverrides::new())
    }

    pub fn with_overrides(provider: P, overrides: FieldOverrides) -> Self {
        Self {
            provider,
            overrides,
            template: KeyTemplate::remote(),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn overrides(&self) -> &FieldOverrides {
        &self.overrides
    }

    pub fn template(&self) -> &KeyTemplate {
        &self.template
    }

    pub fn get(&self, key: impl IntoKey) -> Result<FieldValue> {
        let key = key.into_key()?;
        debug!(provider = self.provider.name(), key = %self.template.format(&key), "remote fetch");
        resolve_field(&self.provider, key.entity(), key.field(), &self.overrides).map_err(|source| {
            CacheError::RemoteUnavailable {
                key: key.to_string(),
                source,
            }
        })
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_available()
    }
}

impl<P: Provider> KvStore for RemoteSource<P> {
    fn name(&self) -> &'static str {
        "remote source"
    }

    fn get(&self, key: &StructuredKey) -> Result<FieldValue> {
        RemoteSource::<P>::get(self, key)
    }

    fn is_available(&self) -> bool {
        RemoteSource::<P>::is_available(self)
    }
}
