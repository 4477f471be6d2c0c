//! Field values: the opaque records the cache stores and returns.
//!
//! Shapes are dictated by the provider, not by the cache. The only contract
//! the stores hold to is faithful round-tripping through a [`Codec`].
//!
//! [`Codec`]: crate::codec::Codec

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single cell.
///
/// Missing numbers are [`Scalar::Null`]. A `Float` may still hold NaN or an
/// infinity; those are stored as the strings `"NaN"`, `"inf"` and `"-inf"`,
/// and NaN compares equal to NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "float_repr")] f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => true,
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            (Scalar::Int(a), Scalar::Int(b)) => a == b,
            (Scalar::Float(a), Scalar::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Scalar::Text(a), Scalar::Text(b)) => a == b,
            (Scalar::Date(a), Scalar::Date(b)) => a == b,
            (Scalar::DateTime(a), Scalar::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

mod float_repr {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(x: &f64, s: S) -> Result<S::Ok, S::Error> {
        if x.is_nan() {
            s.serialize_str("NaN")
        } else if *x == f64::INFINITY {
            s.serialize_str("inf")
        } else if *x == f64::NEG_INFINITY {
            s.serialize_str("-inf")
        } else {
            s.serialize_f64(*x)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Number(x) => Ok(x),
            Repr::Text(t) => match t.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("invalid float '{other}'"))),
            },
        }
    }
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for Scalar {
    fn from(x: f64) -> Self {
        if x.is_finite() {
            Scalar::Float(x)
        } else {
            Scalar::Null
        }
    }
}

impl From<Option<f64>> for Scalar {
    fn from(x: Option<f64>) -> Self {
        x.map_or(Scalar::Null, Scalar::from)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

impl From<NaiveDate> for Scalar {
    fn from(d: NaiveDate) -> Self {
        Scalar::Date(d)
    }
}

impl From<NaiveDateTime> for Scalar {
    fn from(dt: NaiveDateTime) -> Self {
        Scalar::DateTime(dt)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("NaN"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Text(s) => f.write_str(s),
            Scalar::Date(d) => write!(f, "{d}"),
            Scalar::DateTime(dt) => write!(f, "{dt}"),
        }
    }
}

/// A labelled one-dimensional column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: Option<String>,
    pub index: Vec<Scalar>,
    pub values: Vec<Scalar>,
}

impl Series {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn push(&mut self, index: impl Into<Scalar>, value: impl Into<Scalar>) {
        self.index.push(index.into());
        self.values.push(value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Scalar, &Scalar)> {
        self.index.iter().zip(self.values.iter())
    }
}

/// A row-major table with a labelled index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub index: Vec<Scalar>,
    pub rows: Vec<Vec<Scalar>>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Append a row. Short rows are padded with nulls, long rows truncated.
    pub fn push_row(&mut self, index: impl Into<Scalar>, mut row: Vec<Scalar>) {
        row.resize(self.columns.len(), Scalar::Null);
        self.index.push(index.into());
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Extract one column as a series sharing the table's index.
    pub fn column(&self, name: &str) -> Option<Series> {
        let pos = self.columns.iter().position(|c| c == name)?;
        Some(Series {
            name: Some(name.to_string()),
            index: self.index.clone(),
            values: self
                .rows
                .iter()
                .map(|r| r.get(pos).cloned().unwrap_or(Scalar::Null))
                .collect(),
        })
    }
}

/// A structured value returned by a provider and stored by the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "data", rename_all = "snake_case")]
pub enum FieldValue {
    Table(Table),
    Series(Series),
    Mapping(BTreeMap<String, FieldValue>),
    Scalar(Scalar),
}

impl FieldValue {
    pub fn null() -> Self {
        FieldValue::Scalar(Scalar::Null)
    }

    /// Build a mapping from key/value pairs.
    pub fn mapping<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        FieldValue::Mapping(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Empty tables/series/mappings and nulls.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Table(t) => t.is_empty(),
            FieldValue::Series(s) => s.is_empty(),
            FieldValue::Mapping(m) => m.is_empty(),
            FieldValue::Scalar(s) => s.is_null(),
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            FieldValue::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_series(&self) -> Option<&Series> {
        match self {
            FieldValue::Series(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, FieldValue>> {
        match self {
            FieldValue::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            FieldValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a key in a mapping value.
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.as_mapping().and_then(|m| m.get(key))
    }

    /// Convert arbitrary JSON into a field value.
    ///
    /// Objects become mappings, except `{"raw": .., "fmt": ..}` number
    /// wrappers, which collapse to their raw value, and `{}`, which is null.
    /// Arrays of flat objects become tables, arrays of scalars become
    /// series, anything else becomes a mapping keyed by position.
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Object(mut obj) => {
                if obj.is_empty() {
                    return FieldValue::null();
                }
                if let Some(raw) = obj.remove("raw") {
                    if obj.keys().all(|k| k == "fmt" || k == "longFmt") {
                        return FieldValue::from_json(raw);
                    }
                    obj.insert("raw".into(), raw);
                }
                FieldValue::Mapping(
                    obj.into_iter()
                        .map(|(k, v)| (k, FieldValue::from_json(v)))
                        .collect(),
                )
            }
            Value::Array(items) => array_to_value(items),
            other => FieldValue::Scalar(json_scalar(other).unwrap_or(Scalar::Null)),
        }
    }
}

fn json_scalar(value: serde_json::Value) -> Option<Scalar> {
    use serde_json::Value;

    match value {
        Value::Null => Some(Scalar::Null),
        Value::Bool(b) => Some(Scalar::Bool(b)),
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => Scalar::Int(i),
            None => Scalar::from(n.as_f64()),
        }),
        Value::String(s) => Some(Scalar::Text(s)),
        _ => None,
    }
}

fn array_to_value(items: Vec<serde_json::Value>) -> FieldValue {
    let converted: Vec<FieldValue> = items.into_iter().map(FieldValue::from_json).collect();

    if converted.iter().all(|v| matches!(v, FieldValue::Scalar(_))) {
        let mut series = Series::default();
        for (i, v) in converted.into_iter().enumerate() {
            if let FieldValue::Scalar(s) = v {
                series.push(i as i64, s);
            }
        }
        return FieldValue::Series(series);
    }

    let flat_records = !converted.is_empty()
        && converted.iter().all(|v| {
            v.as_mapping()
                .is_some_and(|m| m.values().all(|c| matches!(c, FieldValue::Scalar(_))))
        });
    if flat_records {
        return FieldValue::Table(records_to_table(&converted, None));
    }

    FieldValue::Mapping(
        converted
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
    )
}

/// Build a table from mapping records, optionally pulling the index out of
/// one of the record keys. Columns are the union of keys in first-seen order.
pub fn records_to_table(records: &[FieldValue], index_key: Option<&str>) -> Table {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        if let Some(m) = record.as_mapping() {
            for key in m.keys() {
                if Some(key.as_str()) != index_key && !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
    }

    let mut table = Table::new(columns.clone());
    for (i, record) in records.iter().enumerate() {
        let Some(m) = record.as_mapping() else {
            continue;
        };
        let cell = |key: &str| {
            m.get(key)
                .and_then(FieldValue::as_scalar)
                .cloned()
                .unwrap_or(Scalar::Null)
        };
        let index = match index_key {
            Some(k) => cell(k),
            None => Scalar::Int(i as i64),
        };
        let row = columns.iter().map(|c| cell(c)).collect();
        table.push_row(index, row);
    }
    table
}

impl From<Scalar> for FieldValue {
    fn from(s: Scalar) -> Self {
        FieldValue::Scalar(s)
    }
}

impl From<Table> for FieldValue {
    fn from(t: Table) -> Self {
        FieldValue::Table(t)
    }
}

impl From<Series> for FieldValue {
    fn from(s: Series) -> Self {
        FieldValue::Series(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Scalar(Scalar::Int(i))
    }
}

impl From<f64> for FieldValue {
    fn from(x: f64) -> Self {
        FieldValue::Scalar(Scalar::from(x))
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Scalar(Scalar::from(s))
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Scalar(Scalar::Text(s))
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Scalar(s) => write!(f, "{s}"),
            FieldValue::Series(s) => {
                if let Some(name) = &s.name {
                    writeln!(f, "{name}")?;
                }
                for (i, v) in s.iter() {
                    writeln!(f, "{i}\t{v}")?;
                }
                Ok(())
            }
            FieldValue::Table(t) => {
                writeln!(f, "\t{}", t.columns.join("\t"))?;
                for (i, row) in t.index.iter().zip(&t.rows) {
                    let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
                    writeln!(f, "{i}\t{}", cells.join("\t"))?;
                }
                Ok(())
            }
            FieldValue::Mapping(m) => {
                for (k, v) in m {
                    match v {
                        FieldValue::Scalar(s) => writeln!(f, "{k}: {s}")?,
                        nested => write!(f, "{k}:\n{nested}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_fmt_wrappers_collapse() {
        let v = FieldValue::from_json(json!({
            "marketCap": {"raw": 1_000_000, "fmt": "1M"},
            "currency": "USD",
            "empty": {}
        }));
        assert_eq!(v.get("marketCap"), Some(&FieldValue::from(1_000_000i64)));
        assert_eq!(v.get("currency"), Some(&FieldValue::from("USD")));
        assert!(v.get("empty").unwrap().is_empty());
    }

    #[test]
    fn array_of_flat_objects_becomes_table() {
        let v = FieldValue::from_json(json!([
            {"firm": "A", "grade": "Buy"},
            {"firm": "B", "action": "up"}
        ]));
        let table = v.as_table().unwrap();
        assert_eq!(table.columns, vec!["firm", "grade", "action"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[1][1], Scalar::Null);
    }

    #[test]
    fn array_of_scalars_becomes_series() {
        let v = FieldValue::from_json(json!([1, 2.5, "x"]));
        let series = v.as_series().unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.values[1], Scalar::Float(2.5));
    }

    #[test]
    fn non_finite_floats_are_null() {
        assert_eq!(Scalar::from(f64::NAN), Scalar::Null);
        assert_eq!(Scalar::from(f64::INFINITY), Scalar::Null);
    }

    #[test]
    fn table_column_extraction() {
        let mut t = Table::new(["Open", "Close"]);
        t.push_row(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), vec![1.0.into(), 2.0.into()]);
        t.push_row(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(), vec![3.0.into()]);

        let close = t.column("Close").unwrap();
        assert_eq!(close.values, vec![Scalar::Float(2.0), Scalar::Null]);
        assert!(t.column("Volume").is_none());
    }

    #[test]
    fn emptiness() {
        assert!(FieldValue::null().is_empty());
        assert!(FieldValue::Table(Table::new(["a"])).is_empty());
        assert!(!FieldValue::from(0i64).is_empty());
    }

    #[test]
    fn non_finite_floats_survive_json() {
        let v = FieldValue::mapping([
            ("nan", FieldValue::Scalar(Scalar::Float(f64::NAN))),
            ("up", FieldValue::Scalar(Scalar::Float(f64::INFINITY))),
            ("down", FieldValue::Scalar(Scalar::Float(f64::NEG_INFINITY))),
            ("plain", FieldValue::Scalar(Scalar::Float(1.5))),
        ]);
        let text = serde_json::to_string(&v).unwrap();
        assert!(text.contains(r#""value":"NaN""#));
        assert!(text.contains(r#""value":"-inf""#));

        let back: FieldValue = serde_json::from_str(&text).unwrap();
        assert_eq!(back, v);
        match back.get("nan") {
            Some(FieldValue::Scalar(Scalar::Float(x))) => assert!(x.is_nan()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_float_text_is_rejected() {
        let err = serde_json::from_str::<Scalar>(r#"{"type":"float","value":"lots"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn nan_equals_nan_but_not_null() {
        assert_eq!(Scalar::Float(f64::NAN), Scalar::Float(f64::NAN));
        assert_ne!(Scalar::Float(f64::NAN), Scalar::Null);
        assert_ne!(Scalar::Float(1.0), Scalar::Int(1));
    }

    #[test]
    fn column_pads_short_rows() {
        let t: Table = serde_json::from_value(json!({
            "columns": ["Open", "Close"],
            "index": [{"type": "int", "value": 0}, {"type": "int", "value": 1}],
            "rows": [[{"type": "int", "value": 1}, {"type": "int", "value": 2}], [{"type": "int", "value": 3}]]
        }))
        .unwrap();
        let close = t.column("Close").unwrap();
        assert_eq!(close.values, vec![Scalar::Int(2), Scalar::Null]);
    }
}
