//! Entity catalog: the ordered collection of ticker symbols a caller works with.
//!
//! Three sources:
//! - the bundled list shipped with the crate (`data/default_ticker_symbols.csv`)
//! - an explicit collection
//! - a file: one symbol per line (CSV, first column), or a TOML universe
//!   with sectors
//!
//! Membership only answers `contains`/`iter`. It never restricts which
//! entities can be viewed or fetched.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

const BUNDLED_SYMBOLS: &str = include_str!("../data/default_ticker_symbols.csv");

/// A sector-organized universe file.
///
/// ```toml
/// [sectors]
/// Technology = ["AAPL", "MSFT"]
/// ETFs = ["SPY", "QQQ"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Universe {
    pub sectors: BTreeMap<String, Vec<String>>,
}

/// Where a catalog's symbols came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    Bundled,
    Explicit,
    File(PathBuf),
}

/// Ordered, duplicate-free set of entity identifiers.
#[derive(Debug, Clone)]
pub struct Catalog {
    symbols: Vec<String>,
    lookup: HashSet<String>,
    sectors: BTreeMap<String, Vec<String>>,
    source: CatalogSource,
}

impl Catalog {
    /// The list packaged with the crate. Each call parses a fresh copy;
    /// callers that need it repeatedly keep the returned catalog.
    pub fn bundled() -> Result<Self> {
        let symbols = parse_symbol_list(BUNDLED_SYMBOLS)?;
        Ok(Self::build(symbols, BTreeMap::new(), CatalogSource::Bundled))
    }

    /// An explicit collection. Order is kept, duplicates dropped.
    pub fn from_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(
            symbols.into_iter().map(Into::into).collect(),
            BTreeMap::new(),
            CatalogSource::Explicit,
        )
    }

    /// Load from a `.toml` universe or a one-symbol-per-line list.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CacheError::io(path, e))?;
        let mut catalog = if path.extension().is_some_and(|e| e == "toml") {
            Self::from_toml(&content)?
        } else {
            Self::build(parse_symbol_list(&content)?, BTreeMap::new(), CatalogSource::Explicit)
        };
        catalog.source = CatalogSource::File(path.to_path_buf());
        Ok(catalog)
    }

    /// Parse a TOML universe. Symbols are ordered by sector name.
    pub fn from_toml(content: &str) -> Result<Self> {
        let universe: Universe = toml::from_str(content)
            .map_err(|e| CacheError::Catalog(format!("parse universe TOML: {e}")))?;
        let symbols = universe.sectors.values().flatten().cloned().collect();
        Ok(Self::build(symbols, universe.sectors, CatalogSource::Explicit))
    }

    fn build(symbols: Vec<String>, sectors: BTreeMap<String, Vec<String>>, source: CatalogSource) -> Self {
        let mut lookup = HashSet::with_capacity(symbols.len());
        let symbols = symbols
            .into_iter()
            .filter(|s| !s.is_empty() && lookup.insert(s.clone()))
            .collect();
        Self {
            symbols,
            lookup,
            sectors,
            source,
        }
    }

    /// Symbols in their original order. Each call restarts.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(String::as_str)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.lookup.contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn source(&self) -> &CatalogSource {
        &self.source
    }

    /// Members of one sector (TOML universes only).
    pub fn sector(&self, name: &str) -> Option<&[String]> {
        self.sectors.get(name).map(Vec::as_slice)
    }

    pub fn sector_names(&self) -> impl Iterator<Item = &str> {
        self.sectors.keys().map(String::as_str)
    }

    /// Render as a TOML universe. Catalogs without sectors land in one
    /// `All` sector.
    pub fn to_toml(&self) -> Result<String> {
        let sectors = if self.sectors.is_empty() {
            BTreeMap::from([("All".to_string(), self.symbols.clone())])
        } else {
            self.sectors.clone()
        };
        toml::to_string_pretty(&Universe { sectors })
            .map_err(|e| CacheError::Catalog(format!("serialize universe: {e}")))
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a str;
    type IntoIter = std::iter::Map<std::slice::Iter<'a, String>, fn(&'a String) -> &'a str>;

    fn into_iter(self) -> Self::IntoIter {
        self.symbols.iter().map(String::as_str as fn(&'a String) -> &'a str)
    }
}

impl fmt::Display for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            CatalogSource::Bundled => write!(f, "bundled list of {} tickers", self.len()),
            CatalogSource::Explicit if self.len() <= 7 => write!(f, "{:?}", self.symbols),
            CatalogSource::Explicit => write!(f, "explicit collection of {} tickers", self.len()),
            CatalogSource::File(p) => write!(f, "{} tickers from {}", self.len(), p.display()),
        }
    }
}

/// First column of each row; blank lines, `#` comments and a
/// `symbol`/`ticker` header are skipped.
fn parse_symbol_list(text: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut symbols = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| CacheError::Catalog(format!("symbol list: {e}")))?;
        let Some(symbol) = record.get(0).filter(|s| !s.is_empty()) else {
            continue;
        };
        if i == 0 && (symbol.eq_ignore_ascii_case("symbol") || symbol.eq_ignore_ascii_case("ticker")) {
            continue;
        }
        symbols.push(symbol.to_string());
    }
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_list_has_faang() {
        let c = Catalog::bundled().unwrap();
        assert!(c.len() > 100);
        for t in ["FB", "AMZN", "AAPL", "NFLX", "GOOG"] {
            assert!(c.contains(t), "{t} missing");
        }
        assert_eq!(c.source(), &CatalogSource::Bundled);
    }

    #[test]
    fn bundled_is_rebuilt_per_call() {
        let a = Catalog::bundled().unwrap();
        let b = Catalog::bundled().unwrap();
        assert!(a.iter().eq(b.iter()));
        assert!(!std::ptr::eq(a.iter().next().unwrap(), b.iter().next().unwrap()));
    }

    #[test]
    fn explicit_keeps_order_and_drops_duplicates() {
        let c = Catalog::from_symbols(["GOOG", "AAPL", "GOOG", "AMZN"]);
        assert_eq!(c.iter().collect::<Vec<_>>(), vec!["GOOG", "AAPL", "AMZN"]);
        assert_eq!(c.len(), 3);
        assert!(!c.contains("MSFT"));
        assert_eq!(c.to_string(), r#"["GOOG", "AAPL", "AMZN"]"#);
    }

    #[test]
    fn symbol_list_parsing() {
        let text = "ticker,name\nAAPL, Apple\n\n# comment\n MSFT \n";
        assert_eq!(parse_symbol_list(text).unwrap(), vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn toml_universe_with_sectors() {
        let c = Catalog::from_toml(
            r#"
            [sectors]
            Technology = ["AAPL", "MSFT"]
            ETFs = ["SPY", "QQQ", "AAPL"]
            "#,
        )
        .unwrap();
        assert_eq!(c.iter().collect::<Vec<_>>(), vec!["SPY", "QQQ", "AAPL", "MSFT"]);
        assert_eq!(c.sector("Technology").unwrap(), &["AAPL", "MSFT"]);
        assert_eq!(c.sector_names().collect::<Vec<_>>(), vec!["ETFs", "Technology"]);

        let back = Catalog::from_toml(&c.to_toml().unwrap()).unwrap();
        assert_eq!(back.len(), c.len());
    }

    #[test]
    fn from_file_detects_format() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("mine.csv");
        std::fs::write(&list, "NVDA\nAMD\n").unwrap();
        let c = Catalog::from_file(&list).unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c.source(), &CatalogSource::File(list.clone()));

        assert!(Catalog::from_file(&dir.path().join("absent.csv")).is_err());
    }
}
