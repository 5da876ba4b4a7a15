//! Visualization descriptors derived from the role registry and statistics.

use serde::{Deserialize, Serialize};
use textsift_shared::Value;
use tracing::warn;

use crate::roles::ColumnRoles;
use crate::stats::MinMaxStats;

/// Number of buckets shown by terms charts.
pub const DEFAULT_TERMS_SIZE: usize = 20;

/// Histogram bin width used when no usable statistics exist.
pub const FALLBACK_INTERVAL: f64 = 0.1;

/// Histograms aim for this many bins across the observed range.
const HISTOGRAM_BINS: f64 = 100.0;

/// One chart on the dashboard, bound to a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Visualization {
    /// Documents over time.
    DateHistogram { field: String },
    /// Most frequent values of a tag column.
    HorizontalBar { field: String, size: usize },
    /// Word cloud of a text column.
    TagCloud { field: String, size: usize },
    /// Distribution of a numeric column.
    Histogram { field: String, interval: f64 },
}

impl Visualization {
    pub fn field(&self) -> &str {
        match self {
            Self::DateHistogram { field }
            | Self::HorizontalBar { field, .. }
            | Self::TagCloud { field, .. }
            | Self::Histogram { field, .. } => field,
        }
    }
}

/// Derive the dashboard's charts: the date column first, then tag, text
/// and numeric columns in registration order.
pub fn derive_visualizations(roles: &ColumnRoles, stats: &MinMaxStats) -> Vec<Visualization> {
    let mut out = Vec::new();
    if let Some(date) = &roles.date {
        out.push(Visualization::DateHistogram {
            field: date.clone(),
        });
    }
    for field in &roles.tag {
        out.push(Visualization::HorizontalBar {
            field: field.clone(),
            size: DEFAULT_TERMS_SIZE,
        });
    }
    for field in &roles.text {
        out.push(Visualization::TagCloud {
            field: field.clone(),
            size: DEFAULT_TERMS_SIZE,
        });
    }
    for field in &roles.numeric {
        out.push(Visualization::Histogram {
            field: field.clone(),
            interval: histogram_interval(field, stats),
        });
    }
    out
}

fn histogram_interval(field: &str, stats: &MinMaxStats) -> f64 {
    let Some(mm) = stats.get(field) else {
        warn!(
            column = field,
            interval = FALLBACK_INTERVAL,
            "no statistics for numeric column, run process() first; using fallback interval"
        );
        return FALLBACK_INTERVAL;
    };
    let Some((min, max)) = mm.numeric() else {
        warn!(
            column = field,
            min = %mm.min,
            max = %mm.max,
            "min/max of numeric column are not numbers; using fallback interval"
        );
        return FALLBACK_INTERVAL;
    };
    let interval = (max - min) / HISTOGRAM_BINS;
    if interval > 0.0 && interval.is_finite() {
        interval
    } else {
        warn!(column = field, min, max, "numeric column has no spread; using fallback interval");
        FALLBACK_INTERVAL
    }
}

/// Everything a dashboard client needs to build the dashboard of one index.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardRequest {
    pub index: String,
    pub date_column: Option<String>,
    /// Columns shown in the saved search panel.
    pub search_columns: Vec<String>,
    pub visualizations: Vec<Visualization>,
    /// Restored time range, the date column's `(min, max)`.
    pub time_range: Option<(Value, Value)>,
}

impl DashboardRequest {
    pub fn new(roles: &ColumnRoles, index: impl Into<String>, stats: &MinMaxStats) -> Self {
        let time_range = roles
            .date
            .as_ref()
            .and_then(|d| stats.get(d))
            .map(|mm| (mm.min.clone(), mm.max.clone()));
        Self {
            index: index.into(),
            date_column: roles.date.clone(),
            search_columns: roles.text.clone(),
            visualizations: derive_visualizations(roles, stats),
            time_range,
        }
    }
}
