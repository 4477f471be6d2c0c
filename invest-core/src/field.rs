//! The fixed field table.
//!
//! Every datum the cache knows how to fetch is a [`Field`]. Fields are either
//! plain attributes or parametrized accessors whose parameters all carry
//! defaults, so every field can be resolved with no arguments at all.
//! Callers may bind overrides for parametrized fields once, up front, through
//! [`FieldOverrides`].

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How a field is resolved on the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Read directly, no parameters.
    Attribute,
    /// Invoked with keyword arguments, all of which have defaults.
    Parametrized,
}

/// A parameter accepted by a parametrized field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    /// Provider default, `None` when the provider decides at call time.
    pub default: Option<&'static str>,
}

const HISTORY_PARAMS: &[Param] = &[
    Param {
        name: "period",
        default: Some("1mo"),
    },
    Param {
        name: "interval",
        default: Some("1d"),
    },
    Param {
        name: "start",
        default: None,
    },
    Param {
        name: "end",
        default: None,
    },
    Param {
        name: "auto_adjust",
        default: Some("true"),
    },
    Param {
        name: "actions",
        default: Some("true"),
    },
];

const OPTION_CHAIN_PARAMS: &[Param] = &[Param {
    name: "date",
    default: None,
}];

/// A named datum about an entity.
///
/// Serialized as its snake_case name so it can key TOML tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Field {
    Actions,
    BalanceSheet,
    Calendar,
    Cashflow,
    Dividends,
    Earnings,
    Financials,
    History,
    Info,
    InstitutionalHolders,
    Isin,
    MajorHolders,
    MutualfundHolders,
    OptionChain,
    Options,
    QuarterlyBalanceSheet,
    QuarterlyCashflow,
    QuarterlyEarnings,
    QuarterlyFinancials,
    Recommendations,
    Splits,
    Sustainability,
}

impl Field {
    /// All fields, in name order.
    pub const ALL: [Field; 22] = [
        Field::Actions,
        Field::BalanceSheet,
        Field::Calendar,
        Field::Cashflow,
        Field::Dividends,
        Field::Earnings,
        Field::Financials,
        Field::History,
        Field::Info,
        Field::InstitutionalHolders,
        Field::Isin,
        Field::MajorHolders,
        Field::MutualfundHolders,
        Field::OptionChain,
        Field::Options,
        Field::QuarterlyBalanceSheet,
        Field::QuarterlyCashflow,
        Field::QuarterlyEarnings,
        Field::QuarterlyFinancials,
        Field::Recommendations,
        Field::Splits,
        Field::Sustainability,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Actions => "actions",
            Field::BalanceSheet => "balance_sheet",
            Field::Calendar => "calendar",
            Field::Cashflow => "cashflow",
            Field::Dividends => "dividends",
            Field::Earnings => "earnings",
            Field::Financials => "financials",
            Field::History => "history",
            Field::Info => "info",
            Field::InstitutionalHolders => "institutional_holders",
            Field::Isin => "isin",
            Field::MajorHolders => "major_holders",
            Field::MutualfundHolders => "mutualfund_holders",
            Field::OptionChain => "option_chain",
            Field::Options => "options",
            Field::QuarterlyBalanceSheet => "quarterly_balance_sheet",
            Field::QuarterlyCashflow => "quarterly_cashflow",
            Field::QuarterlyEarnings => "quarterly_earnings",
            Field::QuarterlyFinancials => "quarterly_financials",
            Field::Recommendations => "recommendations",
            Field::Splits => "splits",
            Field::Sustainability => "sustainability",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Field::History | Field::OptionChain => FieldKind::Parametrized,
            _ => FieldKind::Attribute,
        }
    }

    /// Parameters accepted by this field (empty for attributes).
    pub fn params(self) -> &'static [Param] {
        match self {
            Field::History => HISTORY_PARAMS,
            Field::OptionChain => OPTION_CHAIN_PARAMS,
            _ => &[],
        }
    }

    /// One-line help text.
    pub fn describe(self) -> &'static str {
        match self {
            Field::Actions => "dividends and stock splits, one row per event date",
            Field::BalanceSheet => "annual balance sheet statements",
            Field::Calendar => "upcoming earnings and dividend dates",
            Field::Cashflow => "annual cash flow statements",
            Field::Dividends => "dividend amounts by ex-date",
            Field::Earnings => "annual revenue and earnings",
            Field::Financials => "annual income statements",
            Field::History => "OHLCV price history",
            Field::Info => "company profile, quote summary and key statistics",
            Field::InstitutionalHolders => "top institutional holders",
            Field::Isin => "International Securities Identification Number",
            Field::MajorHolders => "ownership breakdown by holder class",
            Field::MutualfundHolders => "top mutual fund holders",
            Field::OptionChain => "calls and puts for one expiry date",
            Field::Options => "available option expiry dates",
            Field::QuarterlyBalanceSheet => "quarterly balance sheet statements",
            Field::QuarterlyCashflow => "quarterly cash flow statements",
            Field::QuarterlyEarnings => "quarterly revenue and earnings",
            Field::QuarterlyFinancials => "quarterly income statements",
            Field::Recommendations => "analyst upgrades and downgrades",
            Field::Splits => "stock split ratios by date",
            Field::Sustainability => "ESG scores",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|f| f.as_str()).collect()
    }

    pub(crate) fn unknown(name: &str) -> CacheError {
        CacheError::UnknownField {
            field: name.to_string(),
            valid: Self::names(),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| Self::unknown(s))
    }
}

impl TryFrom<String> for Field {
    type Error = CacheError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Field> for &'static str {
    fn from(field: Field) -> Self {
        field.as_str()
    }
}

/// A keyword argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Booleans, plus the strings `"true"`/`"false"`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(b) => Some(*b),
            ArgValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Bool(b) => write!(f, "{b}"),
            ArgValue::Int(i) => write!(f, "{i}"),
            ArgValue::Float(x) => write!(f, "{x}"),
            ArgValue::Text(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        ArgValue::Text(s.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(s: String) -> Self {
        ArgValue::Text(s)
    }
}

impl From<bool> for ArgValue {
    fn from(b: bool) -> Self {
        ArgValue::Bool(b)
    }
}

impl From<i64> for ArgValue {
    fn from(i: i64) -> Self {
        ArgValue::Int(i)
    }
}

/// Keyword arguments for one parametrized field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldArgs(BTreeMap<String, ArgValue>);

static NO_ARGS: FieldArgs = FieldArgs::new();

impl FieldArgs {
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ArgValue::as_str)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ArgValue::as_bool)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Check every argument name against the field's parameter list.
    pub fn validate(&self, field: Field) -> Result<()> {
        if field.kind() == FieldKind::Attribute && !self.is_empty() {
            return Err(CacheError::InvalidArgument {
                field: field.to_string(),
                reason: "attribute fields take no arguments".into(),
            });
        }
        for name in self.0.keys() {
            if !field.params().iter().any(|p| p.name == name) {
                let valid: Vec<&str> = field.params().iter().map(|p| p.name).collect();
                return Err(CacheError::InvalidArgument {
                    field: field.to_string(),
                    reason: format!("unknown parameter '{name}' (valid: {})", valid.join(", ")),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for FieldArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&pairs.join(", "))
    }
}

/// Bound keyword overrides, per parametrized field.
///
/// Validated on construction, so a provider never sees an argument its
/// field does not declare.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<Field, FieldArgs>", into = "BTreeMap<Field, FieldArgs>")]
pub struct FieldOverrides(BTreeMap<Field, FieldArgs>);

impl FieldOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `args` to `field`, replacing any earlier binding.
    pub fn bind(mut self, field: Field, args: FieldArgs) -> Result<Self> {
        args.validate(field)?;
        self.0.insert(field, args);
        Ok(self)
    }

    /// Arguments bound to `field`; empty when nothing was bound.
    pub fn args_for(&self, field: Field) -> &FieldArgs {
        self.0.get(&field).unwrap_or(&NO_ARGS)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &FieldArgs)> {
        self.0.iter().map(|(f, a)| (*f, a))
    }
}

impl TryFrom<BTreeMap<Field, FieldArgs>> for FieldOverrides {
    type Error = CacheError;

    fn try_from(map: BTreeMap<Field, FieldArgs>) -> Result<Self> {
        map.into_iter()
            .try_fold(FieldOverrides::new(), |acc, (field, args)| acc.bind(field, args))
    }
}

impl From<FieldOverrides> for BTreeMap<Field, FieldArgs> {
    fn from(overrides: FieldOverrides) -> Self {
        overrides.0
    }
}

impl fmt::Display for FieldOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(field, args)| format!("{field}=({args})")).collect();
        f.write_str(&parts.join(", "))
    }
}
