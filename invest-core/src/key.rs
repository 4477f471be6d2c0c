//! Key translation between structured `(entity, field)` keys and flat strings.
//!
//! Two templates share the same key space:
//! - remote: `{entity}/{field}`, the compound key handed to the provider
//! - local: `{entity}/{field}.{ext}`, the path of a record below the store root

use crate::error::{CacheError, Result};
use crate::field::Field;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Separator between entity and field in every flat key.
pub const SEPARATOR: char = '/';

/// An `(entity, field)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructuredKey {
    entity: String,
    field: Field,
}

impl StructuredKey {
    /// Build a key, rejecting entity names that cannot live in a flat key.
    pub fn new(entity: impl Into<String>, field: Field) -> Result<Self> {
        let entity = entity.into();
        validate_entity(&entity)?;
        Ok(Self { entity, field })
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn field(&self) -> Field {
        self.field
    }
}

impl fmt::Display for StructuredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.entity, self.field)
    }
}

impl FromStr for StructuredKey {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        KeyTemplate::remote().parse(s)
    }
}

fn validate_entity(entity: &str) -> Result<()> {
    let reason = if entity.is_empty() {
        "entity is empty"
    } else if entity.contains(SEPARATOR) || entity.contains('\\') {
        "entity contains a path separator"
    } else if entity == "." || entity == ".." {
        "entity is a relative path component"
    } else if entity.contains('\0') {
        "entity contains a NUL byte"
    } else {
        return Ok(());
    };
    Err(CacheError::malformed(entity, reason))
}

/// A flat-key template: `{entity}/{field}` plus an optional `.{ext}` suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    extension: Option<String>,
}

impl KeyTemplate {
    /// `{entity}/{field}`
    pub fn remote() -> Self {
        Self { extension: None }
    }

    /// `{entity}/{field}.{ext}`
    pub fn local(extension: impl Into<String>) -> Self {
        Self {
            extension: Some(extension.into()),
        }
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub fn format(&self, key: &StructuredKey) -> String {
        match &self.extension {
            Some(ext) => format!("{key}.{ext}"),
            None => key.to_string(),
        }
    }

    pub fn parse(&self, flat: &str) -> Result<StructuredKey> {
        let mut parts = flat.split(SEPARATOR);
        let (entity, file) = match (parts.next(), parts.next(), parts.next()) {
            (Some(entity), Some(file), None) => (entity, file),
            _ => {
                return Err(CacheError::malformed(
                    flat,
                    format!("expected exactly one '{SEPARATOR}'"),
                ))
            }
        };

        let field_name = match &self.extension {
            Some(ext) => file
                .strip_suffix(ext.as_str())
                .and_then(|stem| stem.strip_suffix('.'))
                .ok_or_else(|| CacheError::malformed(flat, format!("expected a '.{ext}' suffix")))?,
            None => file,
        };

        StructuredKey::new(entity, field_name.parse()?)
    }

    /// Relative filesystem path of a key: `entity` / `field[.ext]`.
    pub fn relative_path(&self, key: &StructuredKey) -> PathBuf {
        let file = match &self.extension {
            Some(ext) => format!("{}.{ext}", key.field),
            None => key.field.to_string(),
        };
        Path::new(&key.entity).join(file)
    }
}

/// Anything that can name a cache key.
///
/// Strings are parsed strictly except for one convenience: a bare entity
/// with no separator means that entity's price history.
pub trait IntoKey {
    fn into_key(self) -> Result<StructuredKey>;
}

impl IntoKey for StructuredKey {
    fn into_key(self) -> Result<StructuredKey> {
        Ok(self)
    }
}

impl IntoKey for &StructuredKey {
    fn into_key(self) -> Result<StructuredKey> {
        Ok(self.clone())
    }
}

impl IntoKey for &str {
    fn into_key(self) -> Result<StructuredKey> {
        if self.contains(SEPARATOR) {
            self.parse()
        } else {
            StructuredKey::new(self, Field::History)
        }
    }
}

impl IntoKey for &String {
    fn into_key(self) -> Result<StructuredKey> {
        self.as_str().into_key()
    }
}

impl IntoKey for String {
    fn into_key(self) -> Result<StructuredKey> {
        self.as_str().into_key()
    }
}

impl IntoKey for (&str, &str) {
    fn into_key(self) -> Result<StructuredKey> {
        StructuredKey::new(self.0, self.1.parse()?)
    }
}

impl IntoKey for (&str, Field) {
    fn into_key(self) -> Result<StructuredKey> {
        StructuredKey::new(self.0, self.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn remote_format_and_parse() {
        let key = StructuredKey::new("AAPL", Field::Info).unwrap();
        let t = KeyTemplate::remote();
        assert_eq!(t.format(&key), "AAPL/info");
        assert_eq!(t.parse("AAPL/info").unwrap(), key);
    }

    #[test]
    fn local_template_requires_extension() {
        let t = KeyTemplate::local("rec");
        let key = t.parse("MSFT/balance_sheet.rec").unwrap();
        assert_eq!(key.entity(), "MSFT");
        assert_eq!(key.field(), Field::BalanceSheet);
        assert_eq!(t.format(&key), "MSFT/balance_sheet.rec");

        assert!(matches!(
            t.parse("MSFT/balance_sheet"),
            Err(CacheError::MalformedKey { .. })
        ));
        assert!(matches!(
            t.parse("MSFT/balance_sheetrec"),
            Err(CacheError::MalformedKey { .. })
        ));
    }

    #[test]
    fn wrong_separator_count_is_malformed() {
        let t = KeyTemplate::remote();
        for bad in ["AAPL", "AAPL/info/extra", "", "/"] {
            assert!(t.parse(bad).is_err(), "{bad} should not parse");
        }
        assert!(matches!(
            t.parse("AAPL/info/extra"),
            Err(CacheError::MalformedKey { .. })
        ));
    }

    #[test]
    fn unknown_field_is_reported_as_such() {
        assert!(matches!(
            KeyTemplate::remote().parse("AAPL/price"),
            Err(CacheError::UnknownField { .. })
        ));
    }

    #[test]
    fn entity_validation() {
        assert!(StructuredKey::new("", Field::Info).is_err());
        assert!(StructuredKey::new("..", Field::Info).is_err());
        assert!(StructuredKey::new("A\\B", Field::Info).is_err());
        assert!(StructuredKey::new("BRK-B", Field::Info).is_ok());
        assert!(StructuredKey::new("^GSPC", Field::Info).is_ok());
    }

    #[test]
    fn bare_entity_defaults_to_history() {
        let key = "NVDA".into_key().unwrap();
        assert_eq!(key.to_string(), "NVDA/history");
        assert_eq!(("NVDA", "info").into_key().unwrap().to_string(), "NVDA/info");
    }

    #[test]
    fn relative_path_is_two_levels() {
        let key = StructuredKey::new("GOOG", Field::Cashflow).unwrap();
        let p = KeyTemplate::local("rec").relative_path(&key);
        assert_eq!(p, Path::new("GOOG").join("cashflow.rec"));
    }

    fn field_strategy() -> impl Strategy<Value = Field> {
        (0..Field::ALL.len()).prop_map(|i| Field::ALL[i])
    }

    proptest! {
        #[test]
        fn roundtrip_over_recognized_alphabet(
            entity in "[A-Za-z0-9^=.-]{1,12}",
            field in field_strategy(),
            ext in prop::option::of("[a-z]{1,4}"),
        ) {
            prop_assume!(entity != "." && entity != "..");
            let template = match ext {
                Some(e) => KeyTemplate::local(e),
                None => KeyTemplate::remote(),
            };
            let key = StructuredKey::new(entity, field).unwrap();
            let flat = template.format(&key);
            let parsed = template.parse(&flat).unwrap();
            prop_assert_eq!(&parsed, &key);
            prop_assert_eq!(template.format(&parsed), flat);
        }
    }
}
