//! Contracts of the external search index and dashboard services.

use textsift_shared::{Lang, Result, Table};

use crate::dashboard::DashboardRequest;
use crate::roles::ColumnRoles;

/// Default start of the dashboard time picker.
pub const DEFAULT_TIME_FROM: &str = "now-15m";
/// Default end of the dashboard time picker.
pub const DEFAULT_TIME_TO: &str = "now";

/// Index layout derived from the role registry.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSchema {
    pub index: String,
    pub text_columns: Vec<String>,
    pub tag_columns: Vec<String>,
    pub geo_columns: Vec<String>,
    pub date_column: Option<String>,
    pub lang: Lang,
    /// Synonym rules in Solr format (`"tv, television"`), applied to text columns.
    pub synonyms: Vec<String>,
    /// Drop an existing index of the same name first.
    pub delete_old: bool,
}

impl IndexSchema {
    pub fn from_roles(index: impl Into<String>, roles: &ColumnRoles, lang: Lang) -> Self {
        Self {
            index: index.into(),
            text_columns: roles.text.clone(),
            tag_columns: roles.tag.clone(),
            geo_columns: roles.geo.clone(),
            date_column: roles.date.clone(),
            lang,
            synonyms: Vec::new(),
            delete_old: true,
        }
    }
}

/// One processed batch on its way to the index.
#[derive(Debug, Clone, Copy)]
pub struct SinkBatch<'a> {
    pub index: &'a str,
    /// Records with sink-excluded columns already dropped.
    pub records: &'a Table,
    /// Column holding document ids; `None` uses the global row position.
    pub id_column: Option<&'a str>,
    /// Columns feeding the completion suggester, first present value wins.
    pub suggest_columns: &'a [String],
    /// Position of the batch's first row within the whole input.
    pub offset: usize,
}

/// Outcome of a bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub indexed: usize,
    pub failed: usize,
}

/// Search index receiving processed batches.
pub trait SearchSink {
    /// (Re)create the index. By default existing contents are destroyed.
    fn create_schema(&self, schema: &IndexSchema) -> Result<()>;

    fn write_batch(&self, batch: &SinkBatch<'_>) -> Result<WriteReport>;

    fn delete_all(&self, index: &str) -> Result<()>;
}

/// Identifiers of the saved objects making up a dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardIds {
    pub index_pattern: String,
    pub search: String,
    pub visualizations: Vec<String>,
    pub dashboard: String,
}

/// Visualization service configured from pipeline-derived descriptors.
pub trait DashboardClient {
    fn configure(&self, request: &DashboardRequest) -> Result<DashboardIds>;

    /// Set the default time picker range, e.g. to the span of the data.
    fn set_time_defaults(&self, from: &str, to: &str) -> Result<()>;
}
