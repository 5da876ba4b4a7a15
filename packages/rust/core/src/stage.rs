//! Stage contract and the three stage shapes.
//!
//! A [`Stage`] turns one batch into a new batch with the same rows and zero
//! or more added columns. When added to a pipeline it declares, via
//! [`Stage::attach`], which columns it produces and in which role, so the
//! pipeline can maintain its role registry without the stage touching it.
//!
//! The shapes differ only in how per-element logic maps to columns:
//!
//! | Shape | Per-element trait | Output |
//! |---|---|---|
//! | [`MapToSingle`] | [`ValueMapper`] | one scalar column |
//! | [`MapToTags`] | [`TagExtractor`] | one list column |
//! | [`MapToNamedTags`] | [`NamedTagAnnotator`] | `{source}_{tag}` columns |

use std::collections::HashMap;
use std::time::Duration;

use textsift_shared::{ColumnRole, Result, Table, TextsiftError, Value};

use crate::timer::{Tictoc, Timed};

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// Columns a stage produces, returned from [`Stage::attach`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageColumns {
    /// Produced columns and their roles, in registration order.
    pub columns: Vec<(String, ColumnRole)>,
    /// Produced columns that must not be sent to the search index.
    pub sink_excluded: Vec<String>,
}

impl StageColumns {
    /// Declare `names` under a single role.
    pub fn of<S: Into<String>>(role: ColumnRole, names: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: names.into_iter().map(|n| (n.into(), role)).collect(),
            sink_excluded: Vec::new(),
        }
    }

    /// Also keep `names` out of the search index.
    pub fn excluding<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.sink_excluded.extend(names.into_iter().map(Into::into));
        self
    }
}

// ---------------------------------------------------------------------------
// Stage trait and context
// ---------------------------------------------------------------------------

/// A named transformation over one batch of records.
pub trait Stage {
    /// Human-readable name used in logs and timings.
    fn name(&self) -> &str;

    /// Columns this stage will produce. Called once, when added to a pipeline.
    fn attach(&self) -> StageColumns {
        StageColumns::default()
    }

    /// Transform `batch` into a new batch with the same rows.
    ///
    /// Errors abort the whole run; per-row recovery belongs inside the stage.
    fn process(&self, batch: &Table, ctx: &StageContext<'_>) -> Result<Table>;
}

/// Instrumentation handle passed to [`Stage::process`].
///
/// Sections are recorded under `"{stage} / {name}"` on the pipeline's timer.
pub struct StageContext<'a> {
    timer: &'a Tictoc,
    stage: &'a str,
}

impl<'a> StageContext<'a> {
    pub fn new(timer: &'a Tictoc, stage: &'a str) -> Self {
        Self { timer, stage }
    }

    pub fn stage_name(&self) -> &str {
        self.stage
    }

    pub fn tic(&self, name: &str) {
        self.timer.tic(format!("{} / {name}", self.stage));
    }

    pub fn toc(&self) -> Result<Duration> {
        self.timer.toc()
    }

    /// Time the production of each element of `iter`.
    pub fn wrap<I: IntoIterator>(&self, iter: I, name: &str) -> Timed<'a, I::IntoIter> {
        self.timer.wrap(iter, format!("{} / {name}", self.stage))
    }
}

/// Last path segment of a type name, with generics stripped.
pub(crate) fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Default stage name: the element type's short name, or `variant` for
/// closures and other anonymous types.
fn default_stage_name<T: ?Sized>(variant: &str) -> String {
    let name = short_type_name::<T>();
    if name.starts_with('{') {
        variant.to_string()
    } else {
        name
    }
}

fn source_values<'t>(batch: &'t Table, column: &str, stage: &str) -> Result<&'t [Value]> {
    batch
        .column(column)
        .ok_or_else(|| TextsiftError::stage(stage, format!("input column '{column}' not found")))
}

// ---------------------------------------------------------------------------
// MapToSingle
// ---------------------------------------------------------------------------

/// Per-element logic of a [`MapToSingle`] stage.
pub trait ValueMapper {
    /// Map one cell, rendered as text, to one output value.
    fn map(&self, text: &str) -> Result<Value>;
}

impl<F> ValueMapper for F
where
    F: Fn(&str) -> Result<Value>,
{
    fn map(&self, text: &str) -> Result<Value> {
        self(text)
    }
}

/// One source column in, one scalar column out.
///
/// Every source cell is rendered as text before mapping; missing values
/// arrive as the empty string.
pub struct MapToSingle<M> {
    name: String,
    column: String,
    out_column: String,
    role: Option<ColumnRole>,
    mapper: M,
}

impl<M: ValueMapper> MapToSingle<M> {
    /// `role` is registered for `out_column`; `None` leaves it unregistered.
    pub fn new(
        mapper: M,
        column: impl Into<String>,
        out_column: impl Into<String>,
        role: Option<ColumnRole>,
    ) -> Self {
        Self {
            name: default_stage_name::<M>("MapToSingle"),
            column: column.into(),
            out_column: out_column.into(),
            role,
            mapper,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn out_column(&self) -> &str {
        &self.out_column
    }
}

impl<M: ValueMapper> Stage for MapToSingle<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach(&self) -> StageColumns {
        match self.role {
            Some(role) => StageColumns::of(role, [self.out_column.clone()]),
            None => StageColumns::default(),
        }
    }

    fn process(&self, batch: &Table, _ctx: &StageContext<'_>) -> Result<Table> {
        let values = source_values(batch, &self.column, &self.name)?
            .iter()
            .map(|v| self.mapper.map(&v.as_text()))
            .collect::<Result<Vec<_>>>()?;
        batch.with_column(&self.out_column, values)
    }
}

// ---------------------------------------------------------------------------
// MapToTags
// ---------------------------------------------------------------------------

/// Per-element logic of a [`MapToTags`] stage.
pub trait TagExtractor {
    /// Extract zero or more tags from one cell.
    fn extract(&self, value: &Value) -> Result<Vec<String>>;
}

/// One or more source columns in, one list-of-tags column out.
///
/// For each row the tags of every source column are concatenated, in
/// source-column order.
pub struct MapToTags<E> {
    name: String,
    columns: Vec<String>,
    out_column: String,
    extractor: E,
}

impl<E: TagExtractor> MapToTags<E> {
    pub fn new<S: Into<String>>(
        extractor: E,
        columns: impl IntoIterator<Item = S>,
        out_column: impl Into<String>,
    ) -> Self {
        Self {
            name: default_stage_name::<E>("MapToTags"),
            columns: columns.into_iter().map(Into::into).collect(),
            out_column: out_column.into(),
            extractor,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }
}

impl<E: TagExtractor> Stage for MapToTags<E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach(&self) -> StageColumns {
        StageColumns::of(ColumnRole::Tag, [self.out_column.clone()])
    }

    fn process(&self, batch: &Table, _ctx: &StageContext<'_>) -> Result<Table> {
        let sources = self
            .columns
            .iter()
            .map(|c| source_values(batch, c, &self.name))
            .collect::<Result<Vec<_>>>()?;

        let mut target = Vec::with_capacity(batch.len());
        for row in 0..batch.len() {
            let mut tags = Vec::new();
            for values in &sources {
                tags.extend(self.extractor.extract(&values[row])?);
            }
            target.push(Value::from(tags));
        }
        batch.with_column(&self.out_column, target)
    }
}

// ---------------------------------------------------------------------------
// MapToNamedTags
// ---------------------------------------------------------------------------

/// Keyed outputs for one document, in the order they were produced.
pub type Annotations = Vec<(String, Value)>;

/// Per-batch logic of a [`MapToNamedTags`] stage.
pub trait NamedTagAnnotator {
    /// Annotate every text of one source column. Must return exactly one
    /// entry per input text.
    fn annotate(&self, texts: &[String], ctx: &StageContext<'_>) -> Result<Vec<Annotations>>;
}

/// One or more source columns in, several `{source}_{key}` columns out.
///
/// Keys are expanded into columns in the order they are first seen across
/// the batch; rows lacking a key get `Null`. Declared `tags` are registered
/// as tag columns, declared `sink_excluded` keys are kept out of the index.
///
/// With `coerce_to_text` (the default), missing cells are handed to the
/// annotator as a single space rather than an empty string, since some
/// annotation models reject empty documents.
pub struct MapToNamedTags<A> {
    name: String,
    columns: Vec<String>,
    tags: Vec<String>,
    sink_excluded: Vec<String>,
    coerce_to_text: bool,
    annotator: A,
}

impl<A: NamedTagAnnotator> MapToNamedTags<A> {
    pub fn new<S: Into<String>, T: Into<String>>(
        annotator: A,
        columns: impl IntoIterator<Item = S>,
        tags: impl IntoIterator<Item = T>,
    ) -> Self {
        Self {
            name: default_stage_name::<A>("MapToNamedTags"),
            columns: columns.into_iter().map(Into::into).collect(),
            tags: tags.into_iter().map(Into::into).collect(),
            sink_excluded: Vec::new(),
            coerce_to_text: true,
            annotator,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Keys whose columns must not be sent to the search index.
    pub fn excluding_from_sink<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.sink_excluded = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn coerce_to_text(mut self, coerce: bool) -> Self {
        self.coerce_to_text = coerce;
        self
    }

    /// Declared output columns: `{source}_{tag}` for every source and tag.
    pub fn out_columns(&self) -> Vec<String> {
        prefixed(&self.columns, &self.tags)
    }

    fn to_text(&self, value: &Value) -> String {
        if self.coerce_to_text && value.is_null() {
            " ".to_string()
        } else {
            value.as_text().into_owned()
        }
    }
}

fn prefixed(columns: &[String], keys: &[String]) -> Vec<String> {
    columns
        .iter()
        .flat_map(|c| keys.iter().map(move |k| format!("{c}_{k}")))
        .collect()
}

impl<A: NamedTagAnnotator> Stage for MapToNamedTags<A> {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach(&self) -> StageColumns {
        StageColumns::of(ColumnRole::Tag, self.out_columns())
            .excluding(prefixed(&self.columns, &self.sink_excluded))
    }

    fn process(&self, batch: &Table, ctx: &StageContext<'_>) -> Result<Table> {
        let mut out = batch.clone();
        for column in &self.columns {
            let texts: Vec<String> = source_values(batch, column, &self.name)?
                .iter()
                .map(|v| self.to_text(v))
                .collect();

            let docs = self.annotator.annotate(&texts, ctx)?;
            if docs.len() != texts.len() {
                return Err(TextsiftError::stage(
                    &self.name,
                    format!(
                        "annotator returned {} results for {} texts",
                        docs.len(),
                        texts.len()
                    ),
                ));
            }

            let mut keys: Vec<String> = Vec::new();
            let mut cols: HashMap<String, Vec<Value>> = HashMap::new();
            for (row, doc) in docs.into_iter().enumerate() {
                for (key, value) in doc {
                    let values = cols.entry(key.clone()).or_insert_with(|| {
                        keys.push(key.clone());
                        vec![Value::Null; texts.len()]
                    });
                    values[row] = value;
                }
            }

            for key in keys {
                if let Some(values) = cols.remove(&key) {
                    out.set_column(&format!("{column}_{key}"), values)?;
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use textsift_shared::Column;

    use super::*;

    fn batch() -> Table {
        Table::from_columns(vec![
            Column::new("a", vec!["x y".into(), Value::Null, "z".into()]),
            Column::new("b", vec!["1".into(), "2".into(), "3".into()]),
        ])
        .unwrap()
    }

    struct Words;

    impl TagExtractor for Words {
        fn extract(&self, value: &Value) -> Result<Vec<String>> {
            Ok(value.as_text().split_whitespace().map(String::from).collect())
        }
    }

    struct Lengths;

    impl NamedTagAnnotator for Lengths {
        fn annotate(&self, texts: &[String], _ctx: &StageContext<'_>) -> Result<Vec<Annotations>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut ann = vec![("len".to_string(), Value::from(t.len()))];
                    if t.trim().is_empty() {
                        ann.push(("blank".to_string(), Value::Bool(true)));
                    }
                    ann
                })
                .collect())
        }
    }

    fn ctx_run<S: Stage>(stage: &S, input: &Table) -> Result<Table> {
        let timer = Tictoc::default();
        let ctx = StageContext::new(&timer, stage.name());
        stage.process(input, &ctx)
    }

    #[test]
    fn single_mapper_adds_exactly_one_column() {
        let input = batch();
        let stage = MapToSingle::new(
            |s: &str| -> Result<Value> { Ok(Value::from(s.len())) },
            "a",
            "a_len",
            Some(ColumnRole::Numeric),
        );
        let out = ctx_run(&stage, &input).unwrap();

        assert_eq!(out.len(), input.len());
        assert_eq!(out.column_names(), vec!["a", "b", "a_len"]);
        assert_eq!(out.column("a"), input.column("a"));
        assert_eq!(out.column("b"), input.column("b"));
        assert_eq!(
            out.column("a_len").unwrap(),
            &[Value::Number(3.0), Value::Number(0.0), Value::Number(1.0)]
        );
        // The input batch is left untouched.
        assert!(!input.has_column("a_len"));
        assert_eq!(
            stage.attach(),
            StageColumns::of(ColumnRole::Numeric, ["a_len"])
        );
    }

    #[test]
    fn missing_source_column_is_a_stage_error() {
        let stage = MapToSingle::new(|_: &str| -> Result<Value> { Ok(Value::Null) }, "nope", "out", None);
        let err = ctx_run(&stage, &batch()).unwrap_err();
        assert!(matches!(err, TextsiftError::Stage { .. }));
        assert!(stage.attach().columns.is_empty());
    }

    #[test]
    fn tags_concatenate_across_columns() {
        let stage = MapToTags::new(Words, ["a", "b"], "words");
        assert_eq!(stage.name(), "Words");
        let out = ctx_run(&stage, &batch()).unwrap();
        assert_eq!(
            out.column("words").unwrap()[0],
            Value::from(vec!["x".to_string(), "y".to_string(), "1".to_string()])
        );
        assert_eq!(
            out.column("words").unwrap()[1],
            Value::from(vec!["2".to_string()])
        );
        assert_eq!(stage.attach(), StageColumns::of(ColumnRole::Tag, ["words"]));
    }

    #[test]
    fn named_tags_expand_keys_into_prefixed_columns() {
        let stage = MapToNamedTags::new(Lengths, ["a"], ["len"]).excluding_from_sink(["blank"]);
        let out = ctx_run(&stage, &batch()).unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(out.column_names(), vec!["a", "b", "a_len", "a_blank"]);
        // Null was coerced to a single space before annotation.
        assert_eq!(out.column("a_len").unwrap()[1], Value::Number(1.0));
        assert_eq!(
            out.column("a_blank").unwrap(),
            &[Value::Null, Value::Bool(true), Value::Null]
        );

        let decl = stage.attach();
        assert_eq!(decl.columns, vec![("a_len".to_string(), ColumnRole::Tag)]);
        assert_eq!(decl.sink_excluded, vec!["a_blank".to_string()]);
    }

    #[test]
    fn named_tags_without_coercion_pass_empty_text() {
        let stage = MapToNamedTags::new(Lengths, ["a"], ["len"]).coerce_to_text(false);
        let out = ctx_run(&stage, &batch()).unwrap();
        assert_eq!(out.column("a_len").unwrap()[1], Value::Number(0.0));
    }

    #[test]
    fn short_type_names() {
        assert_eq!(short_type_name::<Words>(), "Words");
        assert_eq!(short_type_name::<MapToTags<Words>>(), "MapToTags");
    }

    #[test]
    fn closure_stages_fall_back_to_the_variant_name() {
        let stage = MapToSingle::new(|_: &str| -> Result<Value> { Ok(Value::Null) }, "a", "out", None);
        assert_eq!(stage.name(), "MapToSingle");
        assert_eq!(stage.named("length").name(), "length");
    }
}
