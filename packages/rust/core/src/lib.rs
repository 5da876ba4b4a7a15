//! Batch enrichment engine for textsift.
//!
//! A [`Pipeline`] splits a record table into batches, threads every batch
//! through its ordered [`Stage`]s, optionally forwards results to a
//! [`SearchSink`], and keeps min/max statistics that drive the dashboard
//! descriptors handed to a [`DashboardClient`].

pub mod batcher;
pub mod dashboard;
pub mod pipeline;
pub mod progress;
pub mod roles;
pub mod sink;
pub mod stage;
pub mod stages;
pub mod stats;
pub mod timer;

pub use batcher::{Batches, batches};
pub use dashboard::{DashboardRequest, Visualization, derive_visualizations};
pub use pipeline::{Pipeline, ProcessOptions};
pub use progress::{ProgressSink, SilentProgress};
pub use roles::ColumnRoles;
pub use sink::{DashboardClient, DashboardIds, IndexSchema, SearchSink, SinkBatch, WriteReport};
pub use stage::{
    Annotations, MapToNamedTags, MapToSingle, MapToTags, NamedTagAnnotator, Stage, StageColumns,
    StageContext, TagExtractor, ValueMapper,
};
pub use stats::{MinMax, MinMaxStats, compute_min_max};
pub use timer::{Tictoc, TimerOutput, TimerSummary, format_duration};
