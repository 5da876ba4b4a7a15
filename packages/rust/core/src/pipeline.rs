//! The batch enrichment pipeline: ordered stages over chunked input,
//! optional forwarding to a search sink, min/max statistics for dashboards.

use std::ops::AddAssign;
use std::sync::Arc;

use textsift_shared::{Lang, Result, Table, TextsiftError};
use tracing::{debug, info, instrument, warn};

use crate::batcher::batches;
use crate::dashboard::DashboardRequest;
use crate::progress::ProgressSink;
use crate::roles::ColumnRoles;
use crate::sink::{DashboardClient, DashboardIds, IndexSchema, SearchSink, SinkBatch, WriteReport};
use crate::stage::{Stage, StageContext};
use crate::stats::{MinMaxStats, compute_min_max};
use crate::timer::{Tictoc, TimerSummary};

/// Options for [`Pipeline::process`].
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Forward batches to the search sink. `None` means "if one is configured".
    pub write_to_sink: Option<bool>,
    pub batch_size: usize,
    /// Return the enriched table. When `false` an empty table is returned and
    /// only the statistics columns of each batch are kept in memory.
    pub return_processed: bool,
    /// Report progress through the pipeline's progress sink; otherwise log
    /// the start of every stage.
    pub show_progress: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            write_to_sink: None,
            batch_size: 1000,
            return_processed: true,
            show_progress: true,
        }
    }
}

/// Ordered stages plus the column role registry they populate.
pub struct Pipeline {
    index: String,
    lang: Lang,
    synonyms: Vec<String>,
    roles: ColumnRoles,
    stages: Vec<Box<dyn Stage>>,
    sink: Option<Arc<dyn SearchSink>>,
    dashboard: Option<Arc<dyn DashboardClient>>,
    progress: Option<Box<dyn ProgressSink>>,
    timer: Tictoc,
    min_max: MinMaxStats,
}

impl Pipeline {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            lang: Lang::default(),
            synonyms: Vec::new(),
            roles: ColumnRoles::default(),
            stages: Vec::new(),
            sink: None,
            dashboard: None,
            progress: None,
            timer: Tictoc::default(),
            min_max: MinMaxStats::new(),
        }
    }

    /// Replace the initial role registry.
    pub fn with_roles(mut self, roles: ColumnRoles) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_text_columns<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.roles = self.roles.with_text(names);
        self
    }

    pub fn with_tag_columns<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.roles = self.roles.with_tag(names);
        self
    }

    pub fn with_numeric_columns<S: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        self.roles = self.roles.with_numeric(names);
        self
    }

    pub fn with_geo_columns<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.roles = self.roles.with_geo(names);
        self
    }

    pub fn with_id_column(mut self, name: impl Into<String>) -> Self {
        self.roles = self.roles.with_id(name);
        self
    }

    pub fn with_date_column(mut self, name: impl Into<String>) -> Self {
        self.roles = self.roles.with_date(name);
        self
    }

    pub fn with_suggest_columns<S: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        self.set_suggest_columns(names);
        self
    }

    pub fn with_lang(mut self, lang: Lang) -> Self {
        self.lang = lang;
        self
    }

    /// Synonym rules applied to text columns when the index is created.
    pub fn with_synonyms<S: Into<String>>(mut self, rules: impl IntoIterator<Item = S>) -> Self {
        self.synonyms = rules.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn SearchSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_dashboard(mut self, dashboard: Arc<dyn DashboardClient>) -> Self {
        self.dashboard = Some(dashboard);
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn set_suggest_columns<S: Into<String>>(&mut self, names: impl IntoIterator<Item = S>) {
        self.roles.suggest = names.into_iter().map(Into::into).collect();
    }

    /// Append a stage and apply its column declaration to the registry.
    pub fn add(&mut self, stage: impl Stage + 'static) -> &mut Self {
        let decl = stage.attach();
        debug!(
            stage = stage.name(),
            columns = decl.columns.len(),
            excluded = decl.sink_excluded.len(),
            "attaching stage"
        );
        self.roles.register(&decl);
        self.stages.push(Box::new(stage));
        self
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn roles(&self) -> &ColumnRoles {
        &self.roles
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Statistics of the most recent [`process`](Self::process) call.
    pub fn min_max(&self) -> &MinMaxStats {
        &self.min_max
    }

    pub fn timer(&self) -> &Tictoc {
        &self.timer
    }

    /// Accumulated stage and sink timings.
    pub fn timer_summary(&self) -> TimerSummary {
        let summary = self.timer.summary();
        for (name, total) in &summary.totals {
            debug!(section = %name, total = ?total, "timing");
        }
        summary
    }

    /// Run every stage over `table` in batches.
    ///
    /// Stage errors abort the run and are returned as-is. Statistics are
    /// replaced only when the run completes.
    #[instrument(skip_all, fields(index = %self.index, rows = table.len(), stages = self.stages.len()))]
    pub fn process(&mut self, table: &Table, opts: &ProcessOptions) -> Result<Table> {
        let write = opts.write_to_sink.unwrap_or(self.sink.is_some());
        if write {
            self.setup_sink()?;
        }
        let stats_columns = self.roles.stats_columns();

        self.timer.tic("global / process");
        let results = self.run_batches(table, opts, write, &stats_columns);
        if let Some(p) = self.progress.as_deref() {
            p.finish();
        }
        self.timer.toc()?;
        let results = results?;

        self.timer.tic("global / concat results");
        let output = Table::concat(&results);
        self.timer.toc()?;

        self.timer.tic("global / min_max_calc");
        self.min_max = compute_min_max(&output, &stats_columns);
        self.timer.toc()?;

        if write {
            self.apply_time_defaults()?;
        }

        info!(
            rows = output.len(),
            columns = output.columns().len(),
            stats = self.min_max.len(),
            "pipeline run complete"
        );
        Ok(if opts.return_processed {
            output
        } else {
            Table::new()
        })
    }

    fn run_batches(
        &self,
        table: &Table,
        opts: &ProcessOptions,
        write: bool,
        stats_columns: &[String],
    ) -> Result<Vec<Table>> {
        let progress = if opts.show_progress {
            self.progress.as_deref()
        } else {
            None
        };
        let mut results = Vec::new();
        let mut offset = 0;
        for chunk in batches(table, opts.batch_size, progress)? {
            let rows = chunk.len();
            let mut batch = chunk;
            for (i, stage) in self.stages.iter().enumerate() {
                if !opts.show_progress {
                    info!("Stage {} of {}: {}", i + 1, self.stages.len(), stage.name());
                }
                self.timer.tic(format!("Stage {} / {}", i + 1, stage.name()));
                let out = stage.process(&batch, &StageContext::new(&self.timer, stage.name()));
                self.timer.toc()?;
                batch = out?;
                if batch.len() != rows {
                    return Err(TextsiftError::stage(
                        stage.name(),
                        format!("returned {} rows for a batch of {rows}", batch.len()),
                    ));
                }
            }
            if write {
                self.upload(&batch, offset)?;
            }
            offset += rows;
            results.push(if opts.return_processed {
                batch
            } else {
                batch.select(stats_columns)
            });
        }
        Ok(results)
    }

    fn sink(&self) -> Result<&dyn SearchSink> {
        self.sink
            .as_deref()
            .ok_or_else(|| TextsiftError::config("no search sink configured for this pipeline"))
    }

    fn dashboard(&self) -> Result<&dyn DashboardClient> {
        self.dashboard
            .as_deref()
            .ok_or_else(|| TextsiftError::config("no dashboard client configured for this pipeline"))
    }

    /// (Re)create the index from the current role registry.
    pub fn setup_sink(&self) -> Result<()> {
        let mut schema = IndexSchema::from_roles(&self.index, &self.roles, self.lang);
        schema.synonyms = self.synonyms.clone();
        info!(index = %self.index, lang = %self.lang, "creating index");
        self.sink()?.create_schema(&schema)
    }

    fn upload(&self, batch: &Table, offset: usize) -> Result<WriteReport> {
        let records = batch.without_columns(&self.roles.sink_excluded);
        let sink_batch = SinkBatch {
            index: &self.index,
            records: &records,
            id_column: self.roles.id.as_deref(),
            suggest_columns: &self.roles.suggest,
            offset,
        };
        let sink = self.sink()?;
        self.timer.tic("sink / upload");
        let report = sink.write_batch(&sink_batch);
        self.timer.toc()?;
        let report = report?;
        if report.failed > 0 {
            warn!(failed = report.failed, indexed = report.indexed, "some documents were rejected");
        }
        Ok(report)
    }

    /// Send an already processed table to the sink in one batch.
    ///
    /// With `set_time_default`, the dashboard time picker is set to the span
    /// of the table's date column.
    pub fn write_to_sink(&self, table: &Table, set_time_default: bool) -> Result<WriteReport> {
        let report = self.upload(table, 0)?;
        if set_time_default {
            let Some(date) = self.roles.date.as_deref() else {
                return Ok(report);
            };
            let stats = compute_min_max(table, &[date]);
            self.time_defaults_from(&stats)?;
        }
        Ok(report)
    }

    fn apply_time_defaults(&self) -> Result<()> {
        if self.roles.date.is_none() || self.dashboard.is_none() {
            return Ok(());
        }
        self.time_defaults_from(&self.min_max)
    }

    fn time_defaults_from(&self, stats: &MinMaxStats) -> Result<()> {
        let Some(mm) = self.roles.date.as_deref().and_then(|d| stats.get(d)) else {
            warn!("date column has no statistics; time defaults left unchanged");
            return Ok(());
        };
        self.dashboard()?
            .set_time_defaults(&mm.min.as_text(), &mm.max.as_text())
    }

    /// Build the dashboard from the registry and the latest statistics.
    #[instrument(skip_all, fields(index = %self.index))]
    pub fn setup_dashboard(&self) -> Result<DashboardIds> {
        let request = DashboardRequest::new(&self.roles, &self.index, &self.min_max);
        info!(visualizations = request.visualizations.len(), "configuring dashboard");
        self.dashboard()?.configure(&request)
    }
}

impl<S: Stage + 'static> AddAssign<S> for Pipeline {
    fn add_assign(&mut self, stage: S) {
        self.add(stage);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use textsift_shared::{Column, ColumnRole, Value};

    use super::*;
    use crate::dashboard::Visualization;
    use crate::stage::{MapToSingle, StageColumns};
    use crate::stages::{LexiconSentiment, RegexTag};

    #[derive(Default)]
    struct MockSink {
        schemas: RefCell<Vec<IndexSchema>>,
        batches: RefCell<Vec<(usize, Vec<String>, usize)>>,
    }

    impl SearchSink for MockSink {
        fn create_schema(&self, schema: &IndexSchema) -> Result<()> {
            self.schemas.borrow_mut().push(schema.clone());
            Ok(())
        }

        fn write_batch(&self, batch: &SinkBatch<'_>) -> Result<WriteReport> {
            let cols = batch.records.column_names().iter().map(|c| c.to_string()).collect();
            self.batches
                .borrow_mut()
                .push((batch.offset, cols, batch.records.len()));
            Ok(WriteReport {
                indexed: batch.records.len(),
                failed: 0,
            })
        }

        fn delete_all(&self, _index: &str) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockDashboard {
        requests: RefCell<Vec<DashboardRequest>>,
        time_defaults: RefCell<Vec<(String, String)>>,
    }

    impl DashboardClient for MockDashboard {
        fn configure(&self, request: &DashboardRequest) -> Result<DashboardIds> {
            self.requests.borrow_mut().push(request.clone());
            Ok(DashboardIds {
                dashboard: "d1".into(),
                ..Default::default()
            })
        }

        fn set_time_defaults(&self, from: &str, to: &str) -> Result<()> {
            self.time_defaults
                .borrow_mut()
                .push((from.to_string(), to.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder(RefCell<Vec<(usize, usize)>>);

    impl ProgressSink for Recorder {
        fn update(&self, current: usize, total: usize) {
            self.0.borrow_mut().push((current, total));
        }
    }

    impl ProgressSink for Arc<Recorder> {
        fn update(&self, current: usize, total: usize) {
            self.as_ref().update(current, total);
        }
    }

    fn texts(values: &[&str]) -> Table {
        Table::from_columns(vec![Column::new(
            "text",
            values.iter().map(|v| Value::from(*v)).collect(),
        )])
        .unwrap()
    }

    fn no_sink() -> ProcessOptions {
        ProcessOptions {
            write_to_sink: Some(false),
            ..Default::default()
        }
    }

    #[test]
    fn regex_tags_digits() {
        let mut p = Pipeline::new("docs").with_text_columns(["text"]);
        p += RegexTag::stage(r"\d+", ["text"], "nums").unwrap();

        let out = p.process(&texts(&["a1b2", "no digits", "3 4 5"]), &no_sink()).unwrap();
        assert_eq!(out.len(), 3);
        let strs = |v: &[&str]| Value::from(v.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        assert_eq!(
            out.column("nums").unwrap(),
            &[strs(&["1", "2"]), strs(&[]), strs(&["3", "4", "5"])]
        );
        assert_eq!(p.roles().tag, vec!["nums"]);
    }

    #[test]
    fn min_max_spans_all_batches() {
        let input = Table::from_columns(vec![Column::new(
            "score",
            vec![Value::Number(0.2), Value::Number(-0.5), Value::Number(0.9)],
        )])
        .unwrap();
        let mut p = Pipeline::new("scores").with_numeric_columns(["score"]);
        let opts = ProcessOptions {
            batch_size: 2,
            ..no_sink()
        };
        p.process(&input, &opts).unwrap();
        assert_eq!(p.min_max()["score"].numeric(), Some((-0.5, 0.9)));
    }

    #[test]
    fn statistics_are_idempotent_without_returned_output() {
        let input = texts(&["good day", "awful night", "fine"]);
        let mut p = Pipeline::new("s").with_date_column("missing");
        p += LexiconSentiment::stage("text", "sentiment");
        let opts = ProcessOptions {
            return_processed: false,
            batch_size: 2,
            ..no_sink()
        };

        let first = p.process(&input, &opts).unwrap();
        let stats = p.min_max().clone();
        let second = p.process(&input, &opts).unwrap();

        assert!(first.is_empty() && second.is_empty());
        assert_eq!(&stats, p.min_max());
        let (min, max) = stats["sentiment"].numeric().unwrap();
        assert!(min < 0.0 && max > 0.0);
        assert!(!stats.contains_key("missing"));
    }

    #[test]
    fn attached_columns_registered_exactly_once() {
        struct Declares;
        impl Stage for Declares {
            fn name(&self) -> &str {
                "Declares"
            }
            fn attach(&self) -> StageColumns {
                StageColumns::of(ColumnRole::Numeric, ["body", "len"])
            }
            fn process(&self, batch: &Table, _ctx: &StageContext<'_>) -> Result<Table> {
                Ok(batch.clone())
            }
        }

        let mut p = Pipeline::new("x").with_text_columns(["body"]).with_tag_columns(["len"]);
        p.add(Declares);
        let roles = p.roles();
        for name in ["body", "len"] {
            let count = [&roles.text, &roles.tag, &roles.numeric, &roles.geo]
                .iter()
                .filter(|l| l.iter().any(|c| c == name))
                .count();
            assert_eq!(count, 1, "{name}");
            assert_eq!(roles.role_of(name), Some(ColumnRole::Numeric));
        }
        assert_eq!(p.stage_names(), vec!["Declares"]);
    }

    #[test]
    fn stage_errors_abort_and_keep_previous_stats() {
        let mut p = Pipeline::new("x").with_numeric_columns(["n"]);
        let input = Table::from_columns(vec![Column::new("n", vec![Value::Number(1.0)])]).unwrap();
        p.process(&input, &no_sink()).unwrap();
        let before = p.min_max().clone();

        p += MapToSingle::new(
            |_: &str| -> Result<Value> { Err(TextsiftError::validation("bad input")) },
            "n",
            "m",
            None,
        )
        .named("Fails");
        let err = p.process(&input, &no_sink()).unwrap_err();
        assert!(matches!(err, TextsiftError::Validation { .. }));
        assert_eq!(p.min_max(), &before);
        assert!(p.timer_summary().is_balanced());
    }

    #[test]
    fn writing_requires_a_sink() {
        let mut p = Pipeline::new("x");
        let opts = ProcessOptions {
            write_to_sink: Some(true),
            ..Default::default()
        };
        let err = p.process(&texts(&["a"]), &opts).unwrap_err();
        assert!(matches!(err, TextsiftError::Config { .. }));
    }

    #[test]
    fn batches_are_forwarded_without_excluded_columns() {
        let sink = Arc::new(MockSink::default());
        let dashboard = Arc::new(MockDashboard::default());
        let input = Table::from_columns(vec![
            Column::new("text", vec!["a".into(), "b".into(), "c".into()]),
            Column::new(
                "date",
                vec!["2021-01-02".into(), "2021-01-01".into(), "2021-03-01".into()],
            ),
        ])
        .unwrap();

        struct Blob;
        impl Stage for Blob {
            fn name(&self) -> &str {
                "Blob"
            }
            fn attach(&self) -> StageColumns {
                StageColumns::default().excluding(["blob"])
            }
            fn process(&self, batch: &Table, _ctx: &StageContext<'_>) -> Result<Table> {
                batch.with_column("blob", vec![Value::Bool(true); batch.len()])
            }
        }

        let mut p = Pipeline::new("news")
            .with_text_columns(["text"])
            .with_date_column("date")
            .with_sink(sink.clone())
            .with_dashboard(dashboard.clone());
        p += Blob;
        let out = p
            .process(
                &input,
                &ProcessOptions {
                    batch_size: 2,
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(out.has_column("blob"));
        assert_eq!(sink.schemas.borrow().len(), 1);
        assert_eq!(sink.schemas.borrow()[0].text_columns, vec!["text"]);
        let batches = sink.batches.borrow();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], (0, vec!["text".to_string(), "date".to_string()], 2));
        assert_eq!(batches[1].0, 2);
        assert_eq!(batches[1].2, 1);
        assert_eq!(
            *dashboard.time_defaults.borrow(),
            vec![("2021-01-01".to_string(), "2021-03-01".to_string())]
        );

        let summary = p.timer_summary();
        assert!(summary.is_balanced());
        for section in [
            "global / process",
            "Stage 1 / Blob",
            "sink / upload",
            "global / concat results",
            "global / min_max_calc",
        ] {
            assert!(p.timer().total(section).is_some(), "{section}");
        }
    }

    #[test]
    fn dashboard_request_uses_latest_stats() {
        let dashboard = Arc::new(MockDashboard::default());
        let input = Table::from_columns(vec![Column::new(
            "score",
            vec![Value::Number(0.0), Value::Number(20.0)],
        )])
        .unwrap();
        let mut p = Pipeline::new("n")
            .with_numeric_columns(["score"])
            .with_dashboard(dashboard.clone());

        assert!(p.setup_dashboard().is_ok());
        p.process(&input, &no_sink()).unwrap();
        assert_eq!(p.setup_dashboard().unwrap().dashboard, "d1");

        let requests = dashboard.requests.borrow();
        assert_eq!(
            requests[0].visualizations,
            vec![Visualization::Histogram {
                field: "score".into(),
                interval: 0.1
            }]
        );
        assert_eq!(
            requests[1].visualizations,
            vec![Visualization::Histogram {
                field: "score".into(),
                interval: 0.2
            }]
        );
        assert!(dashboard.time_defaults.borrow().is_empty());
    }

    #[test]
    fn progress_is_reported_only_when_enabled() {
        let rec = Arc::new(Recorder::default());
        let mut p = Pipeline::new("x").with_progress(Box::new(rec.clone()));
        let input = texts(&["a", "b", "c"]);

        p.process(&input, &ProcessOptions { batch_size: 2, ..no_sink() })
            .unwrap();
        assert_eq!(*rec.0.borrow(), vec![(0, 3), (2, 3), (3, 3)]);

        rec.0.borrow_mut().clear();
        p.process(
            &input,
            &ProcessOptions {
                show_progress: false,
                ..no_sink()
            },
        )
        .unwrap();
        assert!(rec.0.borrow().is_empty());
    }
}
