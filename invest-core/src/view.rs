//! Dict-like views over a provider: one entity, a whole catalog, or one
//! field across a catalog.
//!
//! Views never touch the local store. Put a [`ReadThroughCache`] in front of
//! them when values should persist.
//!
//! [`ReadThroughCache`]: crate::store::ReadThroughCache

use crate::catalog::Catalog;
use crate::error::{CacheError, Result};
use crate::field::{Field, FieldArgs, FieldOverrides};
use crate::provider::{resolve_field, Provider};
use crate::value::FieldValue;
use std::fmt;

/// Every field of a single entity, resolved live against a provider.
pub struct EntityView<'p, P: ?Sized> {
    entity: String,
    provider: &'p P,
    overrides: FieldOverrides,
}

impl<'p, P: Provider + ?Sized> EntityView<'p, P> {
    pub fn new(entity: impl Into<String>, provider: &'p P) -> Self {
        Self::with_overrides(entity, provider, FieldOverrides::new())
    }

    pub fn with_overrides(entity: impl Into<String>, provider: &'p P, overrides: FieldOverrides) -> Self {
        Self {
            entity: entity.into(),
            provider,
            overrides,
        }
    }

    /// Bind arguments for a parametrized field, e.g. `history(period="1d")`.
    pub fn bind(mut self, field: Field, args: FieldArgs) -> Result<Self> {
        self.overrides = self.overrides.bind(field, args)?;
        Ok(self)
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn overrides(&self) -> &FieldOverrides {
        &self.overrides
    }

    /// Look a field up by name.
    pub fn get(&self, field_name: &str) -> Result<FieldValue> {
        self.get_field(field_name.parse()?)
    }

    pub fn get_field(&self, field: Field) -> Result<FieldValue> {
        resolve_field(self.provider, &self.entity, field, &self.overrides).map_err(|source| {
            CacheError::RemoteUnavailable {
                key: format!("{}/{field}", self.entity),
                source,
            }
        })
    }

    /// The full field set, in name order. Independent of the entity.
    pub fn fields(&self) -> impl Iterator<Item = Field> {
        Field::ALL.into_iter()
    }

    pub fn contains(&self, field_name: &str) -> bool {
        field_name.parse::<Field>().is_ok()
    }

    pub fn len(&self) -> usize {
        Field::ALL.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Every field whose value is non-empty, in field order.
    ///
    /// Costs one provider request per field. The first failure aborts.
    pub fn all_info(&self) -> Result<Vec<(Field, FieldValue)>> {
        let mut out = Vec::new();
        for field in self.fields() {
            let value = self.get_field(field)?;
            if !value.is_empty() {
                out.push((field, value));
            }
        }
        Ok(out)
    }

    /// [`all_info`](Self::all_info) rendered as one block per field.
    pub fn all_info_printable(&self) -> Result<String> {
        let blocks: Vec<String> = self
            .all_info()?
            .into_iter()
            .map(|(field, value)| format!("\n----------{field}-------------\n{value}"))
            .collect();
        Ok(blocks.join("\n"))
    }
}

impl<P: ?Sized> fmt::Display for EntityView<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ticker('{}'", self.entity)?;
        if !self.overrides.is_empty() {
            write!(f, ", {}", self.overrides)?;
        }
        f.write_str(")")
    }
}

/// A catalog paired with a provider: `view(entity)` for any entity,
/// listed or not.
pub struct CatalogView<'p, P: ?Sized> {
    catalog: Catalog,
    provider: &'p P,
    overrides: FieldOverrides,
}

impl<'p, P: Provider + ?Sized> CatalogView<'p, P> {
    pub fn new(catalog: Catalog, provider: &'p P) -> Self {
        Self::with_overrides(catalog, provider, FieldOverrides::new())
    }

    pub fn with_overrides(catalog: Catalog, provider: &'p P, overrides: FieldOverrides) -> Self {
        Self {
            catalog,
            provider,
            overrides,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// View of any entity. Catalog membership is not checked.
    pub fn view(&self, entity: impl Into<String>) -> EntityView<'p, P> {
        EntityView::with_overrides(entity, self.provider, self.overrides.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.catalog.iter()
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.catalog.contains(entity)
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }
}

impl<P: ?Sized> fmt::Display for CatalogView<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tickers(ticker_symbols=<{}>", self.catalog)?;
        if !self.overrides.is_empty() {
            write!(f, ", {}", self.overrides)?;
        }
        f.write_str(")")
    }
}

type Transform = Box<dyn Fn(FieldValue) -> FieldValue + Send + Sync>;

/// One field across a catalog: `get(entity)` returns that entity's value of
/// the field, optionally passed through a transform.
pub struct SpecificField<'p, P: ?Sized> {
    catalog: Catalog,
    provider: &'p P,
    field: Field,
    overrides: FieldOverrides,
    transform: Option<Transform>,
}

impl<'p, P: Provider + ?Sized> SpecificField<'p, P> {
    /// `args` are bound to `field`; they must be empty for attribute fields.
    pub fn new(catalog: Catalog, provider: &'p P, field: Field, args: FieldArgs) -> Result<Self> {
        let overrides = if args.is_empty() {
            FieldOverrides::new()
        } else {
            FieldOverrides::new().bind(field, args)?
        };
        Ok(Self {
            catalog,
            provider,
            field,
            overrides,
            transform: None,
        })
    }

    pub fn with_transform(mut self, transform: impl Fn(FieldValue) -> FieldValue + Send + Sync + 'static) -> Self {
        self.transform = Some(Box::new(transform));
        self
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn get(&self, entity: &str) -> Result<FieldValue> {
        let value = EntityView::with_overrides(entity, self.provider, self.overrides.clone())
            .get_field(self.field)?;
        Ok(match &self.transform {
            Some(t) => t(value),
            None => value,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.catalog.iter()
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.catalog.contains(entity)
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }
}

impl<P: ?Sized> fmt::Display for SpecificField<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TickersWithSpecificInfo(ticker_symbols=<{}>, specific_key={}",
            self.catalog, self.field
        )?;
        let args = self.overrides.args_for(self.field);
        if !args.is_empty() {
            write!(f, ", {args}")?;
        }
        f.write_str(")")
    }
}
