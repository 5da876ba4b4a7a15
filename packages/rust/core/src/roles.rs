//! Column role registry owned by a pipeline.

use serde::{Deserialize, Serialize};
use textsift_shared::ColumnRole;

use crate::stage::StageColumns;

/// Which columns play which role, in registration order.
///
/// Every column appears in at most one of the four role lists. The id, date
/// and suggest columns are not roles; they configure indexing and the
/// dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRoles {
    pub text: Vec<String>,
    pub tag: Vec<String>,
    pub numeric: Vec<String>,
    pub geo: Vec<String>,
    pub id: Option<String>,
    pub date: Option<String>,
    pub suggest: Vec<String>,
    /// Columns dropped from every batch before it reaches the search sink.
    pub sink_excluded: Vec<String>,
}

fn owned<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names.into_iter().map(Into::into) {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

impl ColumnRoles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.assign(ColumnRole::Text, owned(names));
        self
    }

    pub fn with_tag<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.assign(ColumnRole::Tag, owned(names));
        self
    }

    pub fn with_numeric<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.assign(ColumnRole::Numeric, owned(names));
        self
    }

    pub fn with_geo<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.assign(ColumnRole::GeoPoint, owned(names));
        self
    }

    pub fn with_id(mut self, name: impl Into<String>) -> Self {
        self.id = Some(name.into());
        self
    }

    pub fn with_date(mut self, name: impl Into<String>) -> Self {
        self.date = Some(name.into());
        self
    }

    pub fn with_suggest<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.suggest = owned(names);
        self
    }

    fn assign(&mut self, role: ColumnRole, names: Vec<String>) {
        for name in names {
            self.insert(&name, role);
        }
    }

    fn list_mut(&mut self, role: ColumnRole) -> &mut Vec<String> {
        match role {
            ColumnRole::Text => &mut self.text,
            ColumnRole::Tag => &mut self.tag,
            ColumnRole::Numeric => &mut self.numeric,
            ColumnRole::GeoPoint => &mut self.geo,
        }
    }

    /// Columns registered under `role`.
    pub fn columns(&self, role: ColumnRole) -> &[String] {
        match role {
            ColumnRole::Text => &self.text,
            ColumnRole::Tag => &self.tag,
            ColumnRole::Numeric => &self.numeric,
            ColumnRole::GeoPoint => &self.geo,
        }
    }

    pub fn role_of(&self, name: &str) -> Option<ColumnRole> {
        [
            ColumnRole::Text,
            ColumnRole::Tag,
            ColumnRole::Numeric,
            ColumnRole::GeoPoint,
        ]
        .into_iter()
        .find(|role| self.columns(*role).iter().any(|c| c == name))
    }

    /// Place `name` under `role`, removing it from any other role. A column
    /// already registered under `role` keeps its position.
    pub fn insert(&mut self, name: &str, role: ColumnRole) {
        match self.role_of(name) {
            Some(current) if current == role => {}
            Some(current) => {
                self.list_mut(current).retain(|c| c != name);
                self.list_mut(role).push(name.to_string());
            }
            None => self.list_mut(role).push(name.to_string()),
        }
    }

    /// Apply a stage's attach-time declaration.
    pub fn register(&mut self, decl: &StageColumns) {
        for (name, role) in &decl.columns {
            self.insert(name, *role);
        }
        for name in &decl.sink_excluded {
            if !self.sink_excluded.contains(name) {
                self.sink_excluded.push(name.clone());
            }
        }
    }

    /// Columns that min/max statistics are tracked for: numeric columns,
    /// then the date column.
    pub fn stats_columns(&self) -> Vec<String> {
        let mut cols = self.numeric.clone();
        if let Some(date) = &self.date {
            if !cols.contains(date) {
                cols.push(date.clone());
            }
        }
        cols
    }
}
