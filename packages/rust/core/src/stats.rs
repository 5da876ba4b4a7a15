//! Min/max statistics over the numeric and date columns of a table.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use textsift_shared::{Table, Value};
use tracing::warn;

/// Extremes of one column.
///
/// Dates keep their original cell text so they can be passed on verbatim,
/// e.g. as a dashboard time range.
#[derive(Debug, Clone, PartialEq)]
pub struct MinMax {
    pub min: Value,
    pub max: Value,
}

impl MinMax {
    /// Both extremes as numbers, if the column is numeric.
    pub fn numeric(&self) -> Option<(f64, f64)> {
        Some((self.min.as_f64()?, self.max.as_f64()?))
    }
}

impl fmt::Display for MinMax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "min={} max={}", self.min, self.max)
    }
}

/// Statistics per column name.
pub type MinMaxStats = BTreeMap<String, MinMax>;

/// Compute the extremes of every column in `columns`.
///
/// Nulls are ignored. A column whose values are all numbers is compared
/// numerically, one whose values all parse as dates chronologically, and
/// anything else by its text rendering. Columns that are missing or hold
/// no values are skipped with a warning.
pub fn compute_min_max<S: AsRef<str>>(table: &Table, columns: &[S]) -> MinMaxStats {
    let mut stats = MinMaxStats::new();
    for name in columns.iter().map(AsRef::as_ref) {
        let Some(values) = table.column(name) else {
            warn!(column = name, "statistics column missing from output, skipped");
            continue;
        };
        let present: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
        if present.is_empty() {
            warn!(column = name, "statistics column has no values, skipped");
            continue;
        }
        if let Some(mm) = extremes(&present) {
            stats.insert(name.to_string(), mm);
        }
    }
    stats
}

fn extremes(values: &[&Value]) -> Option<MinMax> {
    if values.iter().all(|v| v.as_f64().is_some()) {
        return extremes_by(values, |a, b| a.partial_cmp_same_kind(b).unwrap_or(Ordering::Equal));
    }
    if values.iter().all(|v| v.as_date().is_some()) {
        return extremes_by(values, |a, b| a.as_date().cmp(&b.as_date()));
    }
    extremes_by(values, |a, b| a.as_text().cmp(&b.as_text()))
}

fn extremes_by(values: &[&Value], cmp: impl Fn(&Value, &Value) -> Ordering) -> Option<MinMax> {
    let min = values.iter().copied().min_by(|a, b| cmp(a, b))?;
    let max = values.iter().copied().max_by(|a, b| cmp(a, b))?;
    Some(MinMax {
        min: min.clone(),
        max: max.clone(),
    })
}

#[cfg(test)]
mod tests {
    use textsift_shared::Column;

    use super::*;

    fn table() -> Table {
        Table::from_columns(vec![
            Column::new(
                "score",
                vec![Value::Number(0.2), Value::Null, Value::Number(-0.5), Value::Number(f64::NAN)],
            ),
            Column::new(
                "date",
                vec![
                    "2021-03-01".into(),
                    "2020-12-31T23:00:00+00:00".into(),
                    Value::Null,
                    "2021-01-15 08:00:00".into(),
                ],
            ),
            Column::new("word", vec!["pear".into(), "apple".into(), Value::Number(3.0), "zoo".into()]),
            Column::new("empty", vec![Value::Null; 4]),
        ])
        .unwrap()
    }

    #[test]
    fn numeric_extremes_ignore_missing() {
        let stats = compute_min_max(&table(), &["score"]);
        assert_eq!(stats["score"].numeric(), Some((-0.5, 0.2)));
    }

    #[test]
    fn dates_compare_chronologically_and_keep_text() {
        let stats = compute_min_max(&table(), &["date"]);
        assert_eq!(stats["date"].min, Value::from("2020-12-31T23:00:00+00:00"));
        assert_eq!(stats["date"].max, Value::from("2021-03-01"));
        assert_eq!(stats["date"].numeric(), None);
    }

    #[test]
    fn mixed_columns_compare_lexically() {
        let stats = compute_min_max(&table(), &["word"]);
        assert_eq!(stats["word"].min, Value::Number(3.0));
        assert_eq!(stats["word"].max, Value::from("zoo"));
    }

    #[test]
    fn missing_and_empty_columns_are_skipped() {
        let stats = compute_min_max(&table(), &["empty", "nope", "score"]);
        assert_eq!(stats.len(), 1);
        assert!(stats.contains_key("score"));
    }
}
