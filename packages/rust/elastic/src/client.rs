//! Elasticsearch REST client: index creation and bulk loading.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde_json::{Map, Value as Json, json};
use textsift_core::{IndexSchema, SinkBatch, WriteReport};
use textsift_shared::{ElasticConfig, Result, TextsiftError};
use tracing::{debug, info, instrument, warn};

/// User-Agent string for all requests.
pub(crate) const USER_AGENT: &str = concat!("textsift/", env!("CARGO_PKG_VERSION"));

/// Field receiving the completion suggester input.
const SUGGEST_FIELD: &str = "suggest";

/// Mapping type used by clusters before 7.x.
const DOC_TYPE: &str = "_doc";

/// Build a blocking HTTP client with the shared settings.
pub(crate) fn build_http(timeout_secs: u64, verify_certs: bool) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs))
        .danger_accept_invalid_certs(!verify_certs)
        .build()
        .map_err(|e| TextsiftError::Network(format!("failed to build HTTP client: {e}")))
}

/// Fail with a sink error unless the response is a success.
pub(crate) fn check(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(TextsiftError::Sink(format!("{what}: HTTP {status}: {body}")))
}

pub(crate) fn network(what: &str, e: reqwest::Error) -> TextsiftError {
    TextsiftError::Network(format!("{what}: {e}"))
}

pub(crate) fn read_json(response: Response, what: &str) -> Result<Json> {
    response
        .json()
        .map_err(|e| TextsiftError::Sink(format!("{what}: invalid JSON response: {e}")))
}

// ---------------------------------------------------------------------------
// ElasticClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ElasticClient {
    base: String,
    http: Client,
    major: OnceLock<u32>,
}

impl ElasticClient {
    pub fn new(config: &ElasticConfig) -> Result<Self> {
        Self::with_url(config.url(), config.timeout_secs, config.verify_certs)
    }

    pub fn with_url(base: impl Into<String>, timeout_secs: u64, verify_certs: bool) -> Result<Self> {
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            http: build_http(timeout_secs, verify_certs)?,
            major: OnceLock::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.base
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    /// `true` if the cluster answers its root endpoint.
    pub fn alive(&self) -> bool {
        match self.http.head(self.endpoint("/")).send() {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(url = %self.base, error = %e, "elasticsearch not reachable");
                false
            }
        }
    }

    /// Cluster version number, e.g. `"7.1.1"`.
    pub fn version(&self) -> Result<String> {
        let what = "cluster info";
        let resp = self
            .http
            .get(self.endpoint("/"))
            .send()
            .map_err(|e| network(what, e))?;
        let info = read_json(check(resp, what)?, what)?;
        info.pointer("/version/number")
            .and_then(Json::as_str)
            .map(String::from)
            .ok_or_else(|| TextsiftError::Sink("cluster info lacks version.number".into()))
    }

    /// Major version of the cluster, queried once per client.
    pub fn cluster_major(&self) -> Result<u32> {
        if let Some(major) = self.major.get() {
            return Ok(*major);
        }
        let major = major_version(&self.version()?);
        Ok(*self.major.get_or_init(|| major))
    }

    /// Delete `index`. Returns `false` if it did not exist.
    pub fn delete_index(&self, index: &str) -> Result<bool> {
        let what = format!("delete index {index}");
        let resp = self
            .http
            .delete(self.endpoint(index))
            .send()
            .map_err(|e| network(&what, e))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(resp, &what)?;
        Ok(true)
    }

    /// Create the index described by `schema` and return the request body.
    #[instrument(skip_all, fields(index = %schema.index))]
    pub fn create_index(&self, schema: &IndexSchema) -> Result<Json> {
        let major = self.cluster_major()?;
        let body = index_body(schema, major);
        if schema.delete_old && self.delete_index(&schema.index)? {
            info!("deleted existing index");
        }
        let what = format!("create index {}", schema.index);
        let resp = self
            .http
            .put(self.endpoint(&schema.index))
            .json(&body)
            .send()
            .map_err(|e| network(&what, e))?;
        check(resp, &what)?;
        info!(major, "index created");
        Ok(body)
    }

    /// Index every record of `batch` through the `_bulk` endpoint.
    ///
    /// Rejected documents are logged and counted; they do not fail the call.
    #[instrument(skip_all, fields(index = batch.index, rows = batch.records.len(), offset = batch.offset))]
    pub fn bulk_index(&self, batch: &SinkBatch<'_>) -> Result<WriteReport> {
        if batch.records.is_empty() {
            return Ok(WriteReport::default());
        }
        let payload = bulk_payload(batch, self.cluster_major()?)?;
        let what = format!("bulk index into {}", batch.index);
        let resp = self
            .http
            .post(self.endpoint("_bulk"))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(payload)
            .send()
            .map_err(|e| network(&what, e))?;
        let result = read_json(check(resp, &what)?, &what)?;

        let items = result
            .get("items")
            .and_then(Json::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let mut report = WriteReport::default();
        for item in items {
            let op = item.get("index").unwrap_or(item);
            match op.get("error") {
                Some(error) => {
                    report.failed += 1;
                    warn!(id = %op.get("_id").unwrap_or(&Json::Null), error = %error, "document rejected");
                }
                None => report.indexed += 1,
            }
        }
        debug!(indexed = report.indexed, failed = report.failed, "bulk request done");
        Ok(report)
    }

    /// Remove every document of `index`, keeping its mapping.
    pub fn delete_all(&self, index: &str) -> Result<()> {
        let what = format!("truncate {index}");
        let resp = self
            .http
            .post(self.endpoint(&format!("{index}/_delete_by_query")))
            .json(&json!({ "query": { "match_all": {} } }))
            .send()
            .map_err(|e| network(&what, e))?;
        let result = read_json(check(resp, &what)?, &what)?;
        info!(index, deleted = %result.get("deleted").unwrap_or(&Json::Null), "index truncated");
        Ok(())
    }
}

/// Leading major number of a version string; unparsable versions count as current.
fn major_version(version: &str) -> u32 {
    version
        .split('.')
        .next()
        .and_then(|m| m.parse().ok())
        .unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Settings and mappings for a new index.
///
/// Clusters before 7.x expect mappings nested under the `_doc` type.
pub fn index_body(schema: &IndexSchema, major_version: u32) -> Json {
    let analyzer_name = schema
        .lang
        .analyzer()
        .map(|lang| format!("{lang}_syn"))
        .unwrap_or_else(|| "standard".to_string());

    let mut properties = Map::new();
    for col in &schema.text_columns {
        properties.insert(
            col.clone(),
            json!({ "type": "text", "fielddata": true, "analyzer": analyzer_name }),
        );
    }
    for col in &schema.tag_columns {
        properties.insert(col.clone(), json!({ "type": "keyword" }));
    }
    for col in &schema.geo_columns {
        properties.insert(col.clone(), json!({ "type": "geo_point" }));
    }
    if let Some(date) = &schema.date_column {
        properties.insert(date.clone(), json!({ "type": "date" }));
    }
    properties.insert(SUGGEST_FIELD.to_string(), json!({ "type": "completion" }));

    let mut mappings = json!({ "properties": properties });
    if major_version < 7 {
        mappings = json!({ DOC_TYPE: mappings });
    }

    let mut body = json!({ "mappings": mappings });
    if let Some(lang) = schema.lang.analyzer() {
        body["settings"] = json!({ "analysis": analysis(lang, &schema.synonyms) });
    }
    body
}

/// Stop-word, stemming and optional synonym filters for `lang`, chained into
/// the `{lang}_syn` analyzer.
fn analysis(lang: &str, synonyms: &[String]) -> Json {
    let mut filters = Map::new();
    let mut chain: Vec<String> = Vec::new();
    if lang == "english" {
        chain.push("english_possessive_stemmer".into());
        filters.insert(
            "english_possessive_stemmer".into(),
            json!({ "type": "stemmer", "language": "possessive_english" }),
        );
    }
    chain.push("lowercase".into());

    let stop = format!("{lang}_stop");
    filters.insert(stop.clone(), json!({ "type": "stop", "stopwords": format!("_{lang}_") }));
    chain.push(stop);

    let stemmer = format!("{lang}_stemmer");
    filters.insert(stemmer.clone(), json!({ "type": "stemmer", "language": lang }));
    chain.push(stemmer);

    if !synonyms.is_empty() {
        let synonym = format!("{lang}_synonym");
        filters.insert(synonym.clone(), json!({ "type": "synonym", "synonyms": synonyms }));
        chain.push(synonym);
    }

    json!({
        "filter": filters,
        "analyzer": { format!("{lang}_syn"): { "tokenizer": "standard", "filter": chain } },
    })
}

/// Drop nulls from objects and arrays, recursively.
pub fn strip_nulls(value: Json) -> Json {
    match value {
        Json::Object(map) => Json::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Json::Array(items) => Json::Array(
            items
                .into_iter()
                .filter(|v| !v.is_null())
                .map(strip_nulls)
                .collect(),
        ),
        other => other,
    }
}

/// NDJSON body of a bulk request: an action line and a source line per record.
/// Actions for pre-7 clusters name the type their mapping lives under.
fn bulk_payload(batch: &SinkBatch<'_>, major_version: u32) -> Result<String> {
    let mut payload = String::new();
    for (i, record) in batch.records.to_records().into_iter().enumerate() {
        let Json::Object(mut doc) = strip_nulls(record) else {
            continue;
        };
        let id = match batch.id_column {
            Some(col) => match doc.get(col) {
                Some(Json::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => {
                    return Err(TextsiftError::validation(format!(
                        "row {} has no value in id column '{col}'",
                        batch.offset + i
                    )));
                }
            },
            None => (batch.offset + i).to_string(),
        };
        if let Some(suggest) = batch
            .suggest_columns
            .iter()
            .find_map(|c| doc.get(c).cloned())
        {
            doc.insert(SUGGEST_FIELD.to_string(), suggest);
        }
        let mut action = json!({ "_index": batch.index, "_id": id });
        if major_version < 7 {
            action["_type"] = json!(DOC_TYPE);
        }
        let action = json!({ "index": action });
        payload.push_str(&serde_json::to_string(&action)?);
        payload.push('\n');
        payload.push_str(&serde_json::to_string(&Json::Object(doc))?);
        payload.push('\n');
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use textsift_shared::{Column, Lang, Table, Value};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn schema(lang: Lang) -> IndexSchema {
        IndexSchema {
            index: "news".into(),
            text_columns: vec!["body".into()],
            tag_columns: vec!["kw".into()],
            geo_columns: vec!["loc".into()],
            date_column: Some("published".into()),
            lang,
            synonyms: vec![],
            delete_old: true,
        }
    }

    async fn blocking<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        tokio::task::spawn_blocking(f).await.unwrap()
    }

    #[test]
    fn english_index_body() {
        let body = index_body(&schema(Lang::En), 7);
        assert_eq!(
            body["mappings"]["properties"]["body"],
            json!({ "type": "text", "fielddata": true, "analyzer": "english_syn" })
        );
        assert_eq!(body["mappings"]["properties"]["kw"]["type"], "keyword");
        assert_eq!(body["mappings"]["properties"]["loc"]["type"], "geo_point");
        assert_eq!(body["mappings"]["properties"]["suggest"]["type"], "completion");
        assert_eq!(
            body["settings"]["analysis"]["analyzer"]["english_syn"]["filter"],
            json!(["english_possessive_stemmer", "lowercase", "english_stop", "english_stemmer"])
        );
        assert_eq!(
            body["settings"]["analysis"]["filter"]["english_stop"]["stopwords"],
            "_english_"
        );
    }

    #[test]
    fn legacy_clusters_nest_mapping_under_doc_type() {
        let mut s = schema(Lang::De);
        s.synonyms = vec!["auto, wagen".into()];
        let body = index_body(&s, 6);
        assert!(body["mappings"]["_doc"]["properties"]["body"].is_object());
        let chain = &body["settings"]["analysis"]["analyzer"]["german_syn"]["filter"];
        assert_eq!(
            chain,
            &json!(["lowercase", "german_stop", "german_stemmer", "german_synonym"])
        );
    }

    #[test]
    fn unknown_language_uses_standard_analyzer() {
        let body = index_body(&schema(Lang::Xx), 7);
        assert_eq!(body["mappings"]["properties"]["body"]["analyzer"], "standard");
        assert!(body.get("settings").is_none());
    }

    #[test]
    fn nulls_are_removed_recursively() {
        let v = strip_nulls(json!({ "a": null, "b": [1, null, { "c": null, "d": 2 }] }));
        assert_eq!(v, json!({ "b": [1, { "d": 2 }] }));
    }

    #[test]
    fn bulk_payload_ids_and_suggest() {
        let records = Table::from_columns(vec![
            Column::new("title", vec!["First".into(), Value::Null]),
            Column::new("body", vec!["one".into(), "two".into()]),
            Column::new("score", vec![Value::Number(f64::NAN), Value::Number(0.5)]),
        ])
        .unwrap();
        let suggest = vec!["title".to_string(), "body".to_string()];
        let batch = SinkBatch {
            index: "news",
            records: &records,
            id_column: None,
            suggest_columns: &suggest,
            offset: 10,
        };
        let payload = bulk_payload(&batch, 7).unwrap();
        let lines: Vec<Json> = payload
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], json!({ "index": { "_index": "news", "_id": "10" } }));
        assert_eq!(lines[1], json!({ "title": "First", "body": "one", "suggest": "First" }));
        assert_eq!(lines[2]["index"]["_id"], "11");
        assert_eq!(lines[3], json!({ "body": "two", "score": 0.5, "suggest": "two" }));
    }

    #[test]
    fn bulk_payload_requires_ids_when_configured() {
        let records =
            Table::from_columns(vec![Column::new("id", vec![Value::Number(7.0), Value::Null])])
                .unwrap();
        let mut batch = SinkBatch {
            index: "news",
            records: &records,
            id_column: Some("id"),
            suggest_columns: &[],
            offset: 0,
        };
        assert!(bulk_payload(&batch, 7).is_err());
        let first = records.slice(0, 1);
        batch.records = &first;
        let payload = bulk_payload(&batch, 7).unwrap();
        let action: Json = serde_json::from_str(payload.lines().next().unwrap()).unwrap();
        assert_eq!(action, json!({ "index": { "_index": "news", "_id": "7" } }));
    }

    #[tokio::test]
    async fn create_index_replaces_old_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "version": { "number": "7.1.1" } })),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/news"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/news"))
            .and(body_partial_json(
                json!({ "mappings": { "properties": { "kw": { "type": "keyword" } } } }),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
            .expect(1)
            .mount(&server)
            .await;

        let uri = server.uri();
        let body = blocking(move || {
            ElasticClient::with_url(uri, 5, true)
                .unwrap()
                .create_index(&schema(Lang::En))
        })
        .await
        .unwrap();
        assert!(body["settings"].is_object());
    }

    async fn mount_version(server: &MockServer, number: &str) {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "version": { "number": number } })),
            )
            .expect(1)
            .mount(server)
            .await;
    }

    fn two_rows() -> Table {
        Table::from_columns(vec![Column::new("body", vec!["a".into(), "b".into()])]).unwrap()
    }

    #[test]
    fn legacy_bulk_actions_name_the_doc_type() {
        let records = two_rows();
        let batch = SinkBatch {
            index: "news",
            records: &records,
            id_column: None,
            suggest_columns: &[],
            offset: 0,
        };
        let legacy: Json = serde_json::from_str(
            bulk_payload(&batch, 6).unwrap().lines().next().unwrap(),
        )
        .unwrap();
        assert_eq!(
            legacy,
            json!({ "index": { "_index": "news", "_id": "0", "_type": "_doc" } })
        );
        let current: Json = serde_json::from_str(
            bulk_payload(&batch, 7).unwrap().lines().next().unwrap(),
        )
        .unwrap();
        assert!(current["index"].get("_type").is_none());
    }

    #[tokio::test]
    async fn legacy_cluster_version_is_fetched_once_for_bulk_writes() {
        let server = MockServer::start().await;
        mount_version(&server, "6.8.0").await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "errors": false, "items": [] })),
            )
            .expect(2)
            .mount(&server)
            .await;

        let uri = server.uri();
        blocking(move || {
            let client = ElasticClient::with_url(uri, 5, true).unwrap();
            let records = two_rows();
            for offset in [0, 2] {
                let batch = SinkBatch {
                    index: "news",
                    records: &records,
                    id_column: None,
                    suggest_columns: &[],
                    offset,
                };
                client.bulk_index(&batch).unwrap();
            }
        })
        .await;

        let bodies: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.url.path() == "/_bulk")
            .map(|r| String::from_utf8(r.body).unwrap())
            .collect();
        assert_eq!(bodies.len(), 2);
        assert!(bodies.iter().all(|b| b.contains(r#""_type":"_doc""#)));
    }

    #[tokio::test]
    async fn bulk_errors_are_counted_not_fatal() {
        let server = MockServer::start().await;
        mount_version(&server, "7.1.1").await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": true,
                "items": [
                    { "index": { "_id": "0", "status": 201 } },
                    { "index": { "_id": "1", "status": 400, "error": { "type": "mapper_parsing_exception" } } }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let uri = server.uri();
        let report = blocking(move || {
            let records = Table::from_columns(vec![Column::new(
                "body",
                vec!["a".into(), "b".into()],
            )])
            .unwrap();
            let batch = SinkBatch {
                index: "news",
                records: &records,
                id_column: None,
                suggest_columns: &[],
                offset: 0,
            };
            ElasticClient::with_url(uri, 5, true).unwrap().bulk_index(&batch)
        })
        .await
        .unwrap();
        assert_eq!(report, WriteReport { indexed: 1, failed: 1 });

        let requests = server.received_requests().await.unwrap();
        let bulk = requests
            .iter()
            .find(|r| r.url.path() == "/_bulk")
            .unwrap();
        let body = String::from_utf8(bulk.body.clone()).unwrap();
        assert_eq!(body.lines().count(), 4);
    }

    #[tokio::test]
    async fn server_errors_surface_as_sink_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/news/_delete_by_query"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let uri = server.uri();
        let err = blocking(move || ElasticClient::with_url(uri, 5, true).unwrap().delete_all("news"))
            .await
            .unwrap_err();
        assert!(matches!(err, TextsiftError::Sink(ref m) if m.contains("boom")));
    }

    #[test]
    fn unreachable_cluster_is_not_alive() {
        let client = ElasticClient::with_url("http://127.0.0.1:9", 1, true).unwrap();
        assert!(!client.alive());
    }
}
