//! Core domain types: cell values, column roles, and index languages.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::TextsiftError;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A single cell of a record table.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// Missing value.
    #[default]
    Null,
    Bool(bool),
    /// All numbers are stored as `f64`; NaN counts as missing.
    Number(f64),
    Text(String),
    /// A list of values, e.g. the tags extracted for one row.
    List(Vec<Value>),
    /// A dense embedding vector.
    Vector(Vec<f32>),
    /// A nested JSON object carried through unchanged.
    Json(serde_json::Value),
}

impl Value {
    /// `true` for `Null` and for NaN numbers.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Number(n) => n.is_nan(),
            _ => false,
        }
    }

    /// The numeric content, if this cell is a (non-NaN) number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) if !n.is_nan() => Some(*n),
            _ => None,
        }
    }

    /// The string content, if this cell is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render the cell as text. Missing values render as the empty string.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Null => Cow::Borrowed(""),
            Self::Number(n) if n.is_nan() => Cow::Borrowed(""),
            Self::Text(s) => Cow::Borrowed(s),
            Self::Bool(b) => Cow::Owned(b.to_string()),
            Self::Number(n) => Cow::Owned(format_number(*n)),
            Self::List(_) | Self::Vector(_) | Self::Json(_) => {
                Cow::Owned(self.to_json().to_string())
            }
        }
    }

    /// Interpret a text cell as a timestamp.
    ///
    /// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`, and
    /// `YYYY-MM-DD`. Naive timestamps are taken as UTC.
    pub fn as_date(&self) -> Option<DateTime<FixedOffset>> {
        let s = self.as_str()?.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt);
        }
        for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Some(naive.and_utc().fixed_offset());
            }
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc().fixed_offset())
    }

    /// Convert to JSON, dropping non-finite numbers to `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Self::Null => J::Null,
            Self::Bool(b) => J::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(|num| {
                    if n.fract() == 0.0 && n.abs() < 1e15 {
                        J::from(*n as i64)
                    } else {
                        J::Number(num)
                    }
                })
                .unwrap_or(J::Null),
            Self::Text(s) => J::String(s.clone()),
            Self::List(items) => J::Array(items.iter().map(Self::to_json).collect()),
            Self::Vector(v) => J::Array(
                v.iter()
                    .map(|x| {
                        serde_json::Number::from_f64(f64::from(*x))
                            .map(J::Number)
                            .unwrap_or(J::Null)
                    })
                    .collect(),
            ),
            Self::Json(v) => v.clone(),
        }
    }

    /// Compare two cells of the same kind. Cells of different kinds, and
    /// kinds without a natural order, compare as `None`.
    pub fn partial_cmp_same_kind(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.partial_cmp(b),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Integral floats print without a trailing `.0` so that ids and counts
/// stay readable.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match v {
            J::Null => Self::Null,
            J::Bool(b) => Self::Bool(b),
            J::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Null),
            J::String(s) => Self::Text(s),
            J::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            obj @ J::Object(_) => Self::Json(obj),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Self::List(items.into_iter().map(Self::Text).collect())
    }
}

// ---------------------------------------------------------------------------
// ColumnRole
// ---------------------------------------------------------------------------

/// Semantic category of a column, driving index mappings and dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    /// Free text: analyzed for full-text search, shown as a word cloud.
    Text,
    /// Exact-value keyword(s): shown as a bar chart of top terms.
    Tag,
    /// Numeric score or count: shown as a histogram.
    Numeric,
    /// Latitude/longitude pair.
    GeoPoint,
}

impl ColumnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Tag => "tag",
            Self::Numeric => "numeric",
            Self::GeoPoint => "geo_point",
        }
    }
}

impl fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Lang
// ---------------------------------------------------------------------------

/// Languages with a stemming/stop-word analyzer in the search index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Lang {
    De,
    El,
    #[default]
    En,
    Es,
    Fr,
    It,
    Nl,
    Pt,
    /// Multi-language: no language-specific analysis.
    Xx,
}

impl Lang {
    /// Two-letter code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::De => "de",
            Self::El => "el",
            Self::En => "en",
            Self::Es => "es",
            Self::Fr => "fr",
            Self::It => "it",
            Self::Nl => "nl",
            Self::Pt => "pt",
            Self::Xx => "xx",
        }
    }

    /// Analyzer language name understood by the search index.
    pub fn analyzer(&self) -> Option<&'static str> {
        match self {
            Self::De => Some("german"),
            Self::El => Some("greek"),
            Self::En => Some("english"),
            Self::Es => Some("spanish"),
            Self::Fr => Some("french"),
            Self::It => Some("italian"),
            Self::Nl => Some("dutch"),
            Self::Pt => Some("portuguese"),
            Self::Xx => None,
        }
    }

    const ALL: [Self; 9] = [
        Self::De,
        Self::El,
        Self::En,
        Self::Es,
        Self::Fr,
        Self::It,
        Self::Nl,
        Self::Pt,
        Self::Xx,
    ];
}

impl FromStr for Lang {
    type Err = TextsiftError;

    /// Parse either a two-letter code (`"de"`) or an analyzer name (`"german"`).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|l| l.code() == needle || l.analyzer() == Some(needle.as_str()))
            .ok_or_else(|| TextsiftError::config(format!("unsupported language '{s}'")))
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_from_json() {
        let v = Value::from(serde_json::json!(["a", 1, null]));
        assert_eq!(
            v,
            Value::List(vec![Value::from("a"), Value::Number(1.0), Value::Null])
        );
        assert!(matches!(
            Value::from(serde_json::json!({"k": 1})),
            Value::Json(_)
        ));
    }

    #[test]
    fn value_as_text() {
        assert_eq!(Value::Null.as_text(), "");
        assert_eq!(Value::Number(3.0).as_text(), "3");
        assert_eq!(Value::Number(0.25).as_text(), "0.25");
        assert_eq!(Value::from("abc").as_text(), "abc");
        assert_eq!(Value::from(vec!["x".to_string()]).as_text(), r#"["x"]"#);
    }

    #[test]
    fn nan_is_null_and_serializes_to_null() {
        let v = Value::Number(f64::NAN);
        assert!(v.is_null());
        assert_eq!(v.to_json(), serde_json::Value::Null);
        assert_eq!(Value::Number(2.0).to_json(), serde_json::json!(2));
    }

    #[test]
    fn date_parsing() {
        assert!(Value::from("2020-01-02").as_date().is_some());
        assert!(Value::from("2020-01-02 10:11:12").as_date().is_some());
        assert!(Value::from("2020-01-02T10:11:12+02:00").as_date().is_some());
        assert!(Value::from("yesterday").as_date().is_none());
        assert!(Value::Number(5.0).as_date().is_none());
    }

    #[test]
    fn lang_parsing() {
        assert_eq!("de".parse::<Lang>().unwrap(), Lang::De);
        assert_eq!("English".parse::<Lang>().unwrap(), Lang::En);
        assert_eq!(Lang::Xx.analyzer(), None);
        assert!("klingon".parse::<Lang>().is_err());
    }
}
