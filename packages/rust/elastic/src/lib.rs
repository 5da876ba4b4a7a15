//! Elasticsearch and Kibana clients behind the pipeline's sink traits.
//!
//! - [`ElasticClient`]: index creation, bulk loading, truncation
//! - [`KibanaClient`]: saved objects making up a dashboard
//! - [`ElasticStack`]: both together, implementing [`SearchSink`] and
//!   [`DashboardClient`]

pub mod client;
pub mod kibana;

use std::thread;
use std::time::{Duration, Instant};

use textsift_core::{
    DashboardClient, DashboardIds, DashboardRequest, IndexSchema, SearchSink, SinkBatch,
    WriteReport,
};
use textsift_shared::{AppConfig, Result, TextsiftError};
use tracing::{info, instrument};

pub use client::ElasticClient;
pub use kibana::{IfExists, KibanaClient, SavedObject};

/// A search cluster and the Kibana instance in front of it.
#[derive(Debug, Clone)]
pub struct ElasticStack {
    elastic: ElasticClient,
    kibana: KibanaClient,
}

impl ElasticStack {
    pub fn new(elastic: ElasticClient, kibana: KibanaClient) -> Self {
        Self { elastic, kibana }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self::new(
            ElasticClient::new(&config.elastic)?,
            KibanaClient::new(config)?,
        ))
    }

    pub fn elastic(&self) -> &ElasticClient {
        &self.elastic
    }

    pub fn kibana(&self) -> &KibanaClient {
        &self.kibana
    }

    /// `true` if both services answer.
    pub fn alive(&self) -> bool {
        self.elastic.alive() && self.kibana.alive()
    }

    /// Poll [`alive`](Self::alive) every `interval` until it succeeds or
    /// `timeout` elapses. A zero timeout waits forever.
    pub fn wait_for(&self, timeout: Duration, interval: Duration) -> bool {
        let start = Instant::now();
        while timeout.is_zero() || start.elapsed() < timeout {
            if self.alive() {
                return true;
            }
            thread::sleep(interval);
        }
        false
    }
}

impl std::fmt::Display for ElasticStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Elasticsearch on {}, Kibana on {}",
            self.elastic.url(),
            self.kibana.url("/")
        )
    }
}

/// Connect to the configured stack; fails if it is not reachable.
#[instrument(skip_all, fields(elastic = %config.elastic.url(), kibana = %config.kibana_url()))]
pub fn connect(config: &AppConfig) -> Result<ElasticStack> {
    let stack = ElasticStack::from_config(config)?;
    if !stack.alive() {
        return Err(TextsiftError::Network(format!(
            "no running Elasticsearch/Kibana found at {} / {}",
            config.elastic.url(),
            config.kibana_url()
        )));
    }
    info!(%stack, "connected");
    Ok(stack)
}

impl SearchSink for ElasticStack {
    fn create_schema(&self, schema: &IndexSchema) -> Result<()> {
        self.elastic.create_index(schema).map(|_| ())
    }

    fn write_batch(&self, batch: &SinkBatch<'_>) -> Result<WriteReport> {
        self.elastic.bulk_index(batch)
    }

    fn delete_all(&self, index: &str) -> Result<()> {
        self.elastic.delete_all(index)
    }
}

impl DashboardClient for ElasticStack {
    fn configure(&self, request: &DashboardRequest) -> Result<DashboardIds> {
        self.kibana.setup(request)
    }

    fn set_time_defaults(&self, from: &str, to: &str) -> Result<()> {
        self.kibana.set_time_defaults(from, to).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use textsift_core::{Pipeline, ProcessOptions, stages::RegexTag};
    use textsift_shared::{Column, Table, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn blocking<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        tokio::task::spawn_blocking(f).await.unwrap()
    }

    fn stack(uri: &str) -> ElasticStack {
        ElasticStack::new(
            ElasticClient::with_url(uri, 5, true).unwrap(),
            KibanaClient::with_url(uri, 5, true).unwrap(),
        )
    }

    #[test]
    fn unreachable_stack_fails_to_connect() {
        let mut config = AppConfig::default();
        config.elastic.port = 9;
        config.elastic.timeout_secs = 1;
        config.kibana.port = 9;
        let err = connect(&config).unwrap_err();
        assert!(matches!(err, TextsiftError::Network(_)));
    }

    #[test]
    fn wait_for_gives_up_after_timeout() {
        let s = stack("http://127.0.0.1:9");
        assert!(!s.wait_for(Duration::from_millis(50), Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn alive_when_both_services_answer() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let uri = server.uri();
        assert!(blocking(move || stack(&uri).wait_for(Duration::from_secs(1), Duration::from_millis(10))).await);
    }

    #[tokio::test]
    async fn pipeline_writes_through_the_stack() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "version": { "number": "7.1.1" } })),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/docs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/docs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "errors": false, "items": [] })),
            )
            .expect(2)
            .mount(&server)
            .await;

        let uri = server.uri();
        let out = blocking(move || {
            let stack = std::sync::Arc::new(stack(&uri));
            let mut p = Pipeline::new("docs")
                .with_text_columns(["text"])
                .with_sink(stack);
            p += RegexTag::stage(r"\d+", ["text"], "nums").unwrap();
            let input = Table::from_columns(vec![Column::new(
                "text",
                vec![Value::from("a1"), Value::from("b"), Value::from("22")],
            )])
            .unwrap();
            p.process(
                &input,
                &ProcessOptions {
                    batch_size: 2,
                    ..Default::default()
                },
            )
            .map(|t| t.len())
        })
        .await
        .unwrap();
        assert_eq!(out, 3);

        let bulk: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.url.path() == "/_bulk")
            .map(|r| String::from_utf8(r.body).unwrap())
            .collect();
        assert!(bulk[1].contains(r#""_id":"2""#));
        assert!(bulk[1].contains(r#""nums":["22"]"#));
    }
}
