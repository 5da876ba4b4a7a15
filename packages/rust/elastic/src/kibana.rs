//! Kibana saved-objects client: index patterns, searches, visualizations
//! and dashboards.

use serde::Deserialize;
use serde_json::{Map, Value as Json, json};
use textsift_core::{DashboardIds, DashboardRequest, Visualization};
use textsift_shared::{AppConfig, Result, TextsiftError};
use tracing::{debug, info, instrument};
use url::Url;

use crate::client::{build_http, check, network, read_json};

/// Kibana rejects writes without this header.
const XSRF_HEADER: &str = "kbn-xsrf";

/// Config key of the default time picker range.
const TIME_DEFAULTS_KEY: &str = "timepicker:timeDefaults";

/// Saved object types removed by [`KibanaClient::truncate_saved_objects`],
/// dependents first.
const SAVED_OBJECT_TYPES: [&str; 4] = ["dashboard", "visualization", "search", "index-pattern"];

// Dashboard grid layout.
const PANEL_VERSION: &str = "6.3.2";
const VIS_COLUMNS: usize = 3;
const VIS_W: usize = 16;
const VIS_H: usize = 16;
const SEARCH_W: usize = 48;
const SEARCH_H: usize = 16;

/// What to do when a saved object with the same title already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IfExists {
    /// Reuse the existing object.
    #[default]
    ReturnExisting,
    /// Fail.
    Error,
    /// Delete the existing object and create a new one.
    Overwrite,
    /// Create another object with the same title.
    Add,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SavedObject {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub attributes: Json,
}

impl SavedObject {
    fn title(&self) -> Option<&str> {
        self.attributes.get("title").and_then(Json::as_str)
    }
}

#[derive(Deserialize)]
struct FindResponse {
    saved_objects: Vec<SavedObject>,
}

#[derive(Debug, Clone)]
pub struct KibanaClient {
    base: Url,
    http: reqwest::blocking::Client,
    if_exists: IfExists,
}

impl KibanaClient {
    /// Client for the Kibana configured in `config`, falling back to the
    /// elastic host and protocol.
    pub fn new(config: &AppConfig) -> Result<Self> {
        Self::with_url(
            &config.kibana_url(),
            config.elastic.timeout_secs,
            config.elastic.verify_certs,
        )
    }

    pub fn with_url(base: &str, timeout_secs: u64, verify_certs: bool) -> Result<Self> {
        let base = Url::parse(base)
            .map_err(|e| TextsiftError::config(format!("invalid kibana url '{base}': {e}")))?;
        Ok(Self {
            base,
            http: build_http(timeout_secs, verify_certs)?,
            if_exists: IfExists::default(),
        })
    }

    /// Policy used by [`setup`](Self::setup) for already existing objects.
    pub fn with_if_exists(mut self, if_exists: IfExists) -> Self {
        self.if_exists = if_exists;
        self
    }

    /// Absolute URL of `path`; a missing leading `/` is added.
    pub fn url(&self, path: &str) -> String {
        let mut url = self.base.clone();
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        url.set_path(&path);
        url.to_string()
    }

    pub fn alive(&self) -> bool {
        match self.http.head(self.url("/")).send() {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(url = %self.base, error = %e, "kibana not reachable");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Saved objects
    // -----------------------------------------------------------------------

    pub fn find(
        &self,
        kind: &str,
        search: Option<&str>,
        fields: Option<&str>,
    ) -> Result<Vec<SavedObject>> {
        let mut url = self.base.join("/api/saved_objects/_find").map_err(|e| {
            TextsiftError::config(format!("invalid kibana url: {e}"))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("type", kind);
            if let Some(search) = search {
                query.append_pair("search", search);
            }
            if let Some(fields) = fields {
                query.append_pair("fields", fields);
            }
        }
        let what = format!("find {kind}");
        let resp = self.http.get(url).send().map_err(|e| network(&what, e))?;
        let found: FindResponse = check(resp, &what)?
            .json()
            .map_err(|e| TextsiftError::Sink(format!("{what}: invalid JSON response: {e}")))?;
        Ok(found.saved_objects)
    }

    /// Create or replace a saved object; returns its id.
    pub fn post(&self, kind: &str, attributes: Json, id: Option<&str>) -> Result<String> {
        let path = match id {
            Some(id) => format!("/api/saved_objects/{kind}/{id}"),
            None => format!("/api/saved_objects/{kind}"),
        };
        let what = format!("create {kind}");
        let resp = self
            .http
            .post(format!("{}?overwrite=true", self.url(&path)))
            .header(XSRF_HEADER, "true")
            .json(&json!({ "attributes": attributes }))
            .send()
            .map_err(|e| network(&what, e))?;
        let created = read_json(check(resp, &what)?, &what)?;
        created
            .get("id")
            .and_then(Json::as_str)
            .map(String::from)
            .ok_or_else(|| TextsiftError::Sink(format!("{what}: response lacks an id")))
    }

    pub fn delete(&self, kind: &str, id: &str) -> Result<()> {
        let what = format!("delete {kind} {id}");
        let resp = self
            .http
            .delete(self.url(&format!("/api/saved_objects/{kind}/{id}")))
            .header(XSRF_HEADER, "true")
            .send()
            .map_err(|e| network(&what, e))?;
        check(resp, &what)?;
        Ok(())
    }

    /// Delete saved objects of every managed type, optionally filtered by a
    /// search term. Returns the number deleted.
    pub fn truncate_saved_objects(&self, search: Option<&str>) -> Result<usize> {
        let mut deleted = 0;
        for kind in SAVED_OBJECT_TYPES {
            let objects = self.find(kind, search, Some("title"))?;
            info!(kind, count = objects.len(), "deleting saved objects");
            for obj in objects {
                self.delete(kind, &obj.id)?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Id of an existing object titled `title`, per the `if_exists` policy.
    pub fn existing_object(
        &self,
        kind: &str,
        title: &str,
        if_exists: IfExists,
    ) -> Result<Option<String>> {
        for obj in self.find(kind, Some(title), Some("title"))? {
            if obj.title() != Some(title) {
                continue;
            }
            match if_exists {
                IfExists::ReturnExisting => {
                    debug!(kind, title, id = %obj.id, "reusing saved object");
                    return Ok(Some(obj.id));
                }
                IfExists::Error => {
                    return Err(TextsiftError::Sink(format!("{kind} '{title}' already exists")));
                }
                IfExists::Overwrite => self.delete(kind, &obj.id)?,
                IfExists::Add => {}
            }
        }
        Ok(None)
    }

    // -----------------------------------------------------------------------
    // Advanced settings
    // -----------------------------------------------------------------------

    /// All config attributes merged, later objects winning.
    pub fn config(&self) -> Result<Map<String, Json>> {
        let mut merged = Map::new();
        for obj in self.find("config", None, None)? {
            if let Json::Object(attrs) = obj.attributes {
                merged.extend(attrs);
            }
        }
        Ok(merged)
    }

    pub fn config_value(&self, name: &str) -> Result<Option<Json>> {
        Ok(self.config()?.remove(name))
    }

    pub fn add_config(&self, name: &str, value: Json) -> Result<String> {
        let mut attributes = Map::new();
        attributes.insert(name.to_string(), value);
        self.post("config", Json::Object(attributes), None)
    }

    /// Default time picker range; the value is stored as a JSON string.
    pub fn set_time_defaults(&self, from: &str, to: &str) -> Result<String> {
        let value = json!({ "from": from, "to": to, "mode": "quick" });
        self.add_config(TIME_DEFAULTS_KEY, Json::String(value.to_string()))
    }

    // -----------------------------------------------------------------------
    // Dashboard building blocks
    // -----------------------------------------------------------------------

    pub fn add_index_pattern(
        &self,
        pattern: &str,
        time_field: Option<&str>,
        if_exists: IfExists,
    ) -> Result<String> {
        if let Some(id) = self.existing_object("index-pattern", pattern, if_exists)? {
            return Ok(id);
        }
        let mut attributes = json!({ "title": pattern });
        if let Some(field) = time_field {
            attributes["timeFieldName"] = json!(field);
        }
        self.post("index-pattern", attributes, None)
    }

    pub fn add_search(
        &self,
        title: &str,
        columns: &[String],
        index_pattern: &str,
        if_exists: IfExists,
    ) -> Result<String> {
        if let Some(id) = self.existing_object("search", title, if_exists)? {
            return Ok(id);
        }
        let attributes = json!({
            "title": title,
            "columns": columns,
            "kibanaSavedObjectMeta": { "searchSourceJSON": search_source(index_pattern) },
        });
        self.post("search", attributes, None)
    }

    pub fn add_visualization(
        &self,
        title: &str,
        vis: &Visualization,
        index_pattern: &str,
        if_exists: IfExists,
    ) -> Result<String> {
        if let Some(id) = self.existing_object("visualization", title, if_exists)? {
            return Ok(id);
        }
        let attributes = json!({
            "title": title,
            "visState": vis_state(vis, title).to_string(),
            "uiStateJSON": r#"{"vis":{"legendOpen":false}}"#,
            "kibanaSavedObjectMeta": { "searchSourceJSON": search_source(index_pattern) },
        });
        self.post("visualization", attributes, None)
    }

    pub fn add_dashboard(
        &self,
        title: &str,
        search: &str,
        visualizations: &[String],
        time_range: Option<(&str, &str)>,
        if_exists: IfExists,
    ) -> Result<String> {
        if let Some(id) = self.existing_object("dashboard", title, if_exists)? {
            return Ok(id);
        }
        let mut attributes = json!({
            "title": title,
            "description": "",
            "panelsJSON": dashboard_panels(search, visualizations).to_string(),
            "optionsJSON": r#"{"darkTheme":false,"useMargins":true,"hidePanelTitles":false}"#,
            "kibanaSavedObjectMeta": {
                "searchSourceJSON": r#"{"query":{"query":"","language":"kuery"},"filter":[],"highlightAll":true,"version":true}"#,
            },
        });
        if let Some((from, to)) = time_range {
            attributes["timeRestore"] = json!(true);
            attributes["timeFrom"] = json!(from);
            attributes["timeTo"] = json!(to);
        }
        self.post("dashboard", attributes, None)
    }

    /// Create the index pattern, saved search, one visualization per
    /// descriptor and the dashboard tying them together, then set the time
    /// picker to the requested range.
    #[instrument(skip_all, fields(index = %request.index))]
    pub fn setup(&self, request: &DashboardRequest) -> Result<DashboardIds> {
        let index = &request.index;
        let policy = self.if_exists;

        info!("adding index pattern");
        let index_pattern =
            self.add_index_pattern(index, request.date_column.as_deref(), policy)?;
        if self.config_value("defaultIndex")?.is_none() {
            info!("setting default index pattern");
            self.add_config("defaultIndex", json!(index_pattern))?;
        }

        info!("adding search");
        let search = self.add_search(
            &format!("{index}-search"),
            &request.search_columns,
            &index_pattern,
            policy,
        )?;

        let mut visualizations = Vec::with_capacity(request.visualizations.len());
        for vis in &request.visualizations {
            info!(field = vis.field(), "adding visualization");
            let title = format!("[{index}] {}", vis.field());
            visualizations.push(self.add_visualization(&title, vis, &index_pattern, policy)?);
        }

        let range = request
            .time_range
            .as_ref()
            .map(|(from, to)| (from.as_text().into_owned(), to.as_text().into_owned()));
        info!("adding dashboard");
        let dashboard = self.add_dashboard(
            &format!("[{index}] Dashboard"),
            &search,
            &visualizations,
            range.as_ref().map(|(f, t)| (f.as_str(), t.as_str())),
            policy,
        )?;

        let (from, to) = range
            .as_ref()
            .map(|(f, t)| (f.as_str(), t.as_str()))
            .unwrap_or((textsift_core::sink::DEFAULT_TIME_FROM, textsift_core::sink::DEFAULT_TIME_TO));
        self.set_time_defaults(from, to)?;

        Ok(DashboardIds {
            index_pattern,
            search,
            visualizations,
            dashboard,
        })
    }
}

fn search_source(index_pattern: &str) -> String {
    json!({
        "index": index_pattern,
        "query": { "query": "", "language": "kuery" },
        "filter": [],
    })
    .to_string()
}

/// Kibana `visState`: a count metric (agg 1) split by one segment agg (agg 2).
pub fn vis_state(vis: &Visualization, title: &str) -> Json {
    let (vis_type, segment, mut params) = match vis {
        Visualization::HorizontalBar { field, size } => {
            ("horizontal_bar", terms_agg(field, *size), Map::new())
        }
        Visualization::TagCloud { field, size } => {
            let params = Map::from_iter([
                ("scale".to_string(), json!("linear")),
                ("orientation".to_string(), json!("single")),
                ("minFontSize".to_string(), json!(18)),
                ("maxFontSize".to_string(), json!(72)),
                ("showLabel".to_string(), json!(true)),
            ]);
            ("tagcloud", terms_agg(field, *size), params)
        }
        Visualization::Histogram { field, interval } => (
            "histogram",
            json!({
                "id": "2",
                "enabled": true,
                "type": "histogram",
                "schema": "segment",
                "params": { "field": field, "interval": interval, "extended_bounds": {} },
            }),
            Map::new(),
        ),
        Visualization::DateHistogram { field } => (
            "histogram",
            json!({
                "id": "2",
                "enabled": true,
                "type": "date_histogram",
                "schema": "segment",
                "params": {
                    "field": field,
                    "interval": "auto",
                    "customInterval": "2h",
                    "min_doc_count": 1,
                    "extended_bounds": {},
                },
            }),
            Map::new(),
        ),
    };
    params.insert("type".into(), json!(vis_type));
    json!({
        "title": title,
        "type": vis_type,
        "params": params,
        "aggs": [
            { "id": "1", "schema": "metric", "type": "count" },
            segment,
        ],
    })
}

fn terms_agg(field: &str, size: usize) -> Json {
    json!({
        "id": "2",
        "schema": "segment",
        "type": "terms",
        "params": { "field": field, "size": size, "order": "desc", "orderBy": "1" },
    })
}

/// Search panel across the top, visualizations below in a three-wide grid.
pub fn dashboard_panels(search: &str, visualizations: &[String]) -> Json {
    let mut panels = vec![json!({
        "panelIndex": "1",
        "gridData": { "x": 0, "y": 0, "w": SEARCH_W, "h": SEARCH_H, "i": "1" },
        "version": PANEL_VERSION,
        "type": "search",
        "id": search,
        "embeddableConfig": {},
    })];
    for (i, id) in visualizations.iter().enumerate() {
        let x = (i % VIS_COLUMNS) * VIS_W;
        let y = SEARCH_H + (i / VIS_COLUMNS) * VIS_H;
        let panel_index = (i + 2).to_string();
        panels.push(json!({
            "panelIndex": panel_index,
            "gridData": { "x": x, "y": y, "w": VIS_W, "h": VIS_H, "i": panel_index },
            "version": PANEL_VERSION,
            "type": "visualization",
            "id": id,
            "embeddableConfig": {},
        }));
    }
    Json::Array(panels)
}
