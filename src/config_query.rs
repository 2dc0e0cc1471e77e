//! Fetching, validating and caching per-service configuration documents.
//!
//! For every service it is told about, [`ConfigQueryService`] runs one fetch
//! loop per [`ConfigQueryItem`]. A loop fetches `{base_url}/{config_file_name}`,
//! validates the JSON document against the item's schema and caches it. Failed
//! fetches and invalid documents are retried with exponential backoff until
//! the item's `limit_of_tries` is exhausted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use jsonschema::{Draft, Validator};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{AbortHandle, JoinHandle};

use crate::collaborators::Collaborators;
use crate::error::{Error, Result};
use crate::service::{DiscoveredService, Protocol, ServiceEvent};
use crate::tls::CertificateManager;
use crate::wait::wait;

/// Default cap on simultaneously active fetch loops.
pub const MAX_LOOP_ID: usize = 1000;

/// One configuration document fetched from every service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigQueryItem {
    /// Name the document is cached and published under.
    pub config_name: String,
    /// Path of the document relative to the service base URL.
    pub config_file_name: String,
    /// Draft-04 JSON Schema the document must satisfy.
    pub schema: Value,
    /// Schemas referenced from `schema`, registered under their `id`.
    #[serde(default)]
    pub additional_schema_list: Vec<Value>,
    /// Accept an empty response body, caching `config_default` instead.
    #[serde(default)]
    pub allow_empty_config: bool,
    /// Document cached when an empty body is accepted.
    #[serde(default)]
    pub config_default: Option<Value>,
    /// Maximum number of fetch attempts. `None` retries forever.
    #[serde(default)]
    pub limit_of_tries: Option<usize>,
}

impl ConfigQueryItem {
    /// Creates an item fetching `config_file_name` and validating it against `schema`.
    #[must_use]
    pub fn new(
        config_name: impl Into<String>,
        config_file_name: impl Into<String>,
        schema: Value,
    ) -> Self {
        Self {
            config_name: config_name.into(),
            config_file_name: config_file_name.into(),
            schema,
            additional_schema_list: Vec::new(),
            allow_empty_config: false,
            config_default: None,
            limit_of_tries: None,
        }
    }

    /// Registers a schema referenced from the main schema.
    #[must_use]
    pub fn additional_schema(mut self, schema: Value) -> Self {
        self.additional_schema_list.push(schema);
        self
    }

    /// Accepts empty documents, caching `default` in their place.
    #[must_use]
    pub fn allow_empty_config(mut self, default: Value) -> Self {
        self.allow_empty_config = true;
        self.config_default = Some(default);
        self
    }

    /// Limits the number of fetch attempts.
    #[must_use]
    pub fn limit_of_tries(mut self, limit: usize) -> Self {
        self.limit_of_tries = Some(limit);
        self
    }

    fn compile(&self) -> Result<Validator> {
        let invalid = |message: String| Error::InvalidSchema {
            config_name: self.config_name.clone(),
            message,
        };

        let mut options = jsonschema::options();
        options.with_draft(Draft::Draft4);
        for schema in &self.additional_schema_list {
            let id = schema
                .get("id")
                .or_else(|| schema.get("$id"))
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("additional schema has no id".to_string()))?;
            options.with_resource(id, Draft::Draft4.create_resource(schema.clone()));
        }
        options.build(&self.schema).map_err(|e| invalid(e.to_string()))
    }
}

/// Retry and admission settings of the fetch loops.
#[derive(Clone, Debug)]
pub struct ConfigQueryConfig {
    /// Delay before the first retry.
    pub config_fetch_retry_period: Duration,
    /// Upper bound of the retry delay.
    pub config_fetch_max_retry_period: Duration,
    /// Factor applied to the delay after every failed attempt.
    pub backoff_factor: f32,
    /// Maximum number of simultaneously active fetch loops.
    pub max_loop_id: usize,
    /// Timeout of a single HTTP fetch.
    pub request_timeout: Duration,
}

impl Default for ConfigQueryConfig {
    fn default() -> Self {
        Self {
            config_fetch_retry_period: Duration::from_secs(1),
            config_fetch_max_retry_period: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_loop_id: MAX_LOOP_ID,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ConfigQueryConfig {
    /// Sets the first and maximum retry delays.
    #[must_use]
    pub fn retry_period(mut self, first: Duration, max: Duration) -> Self {
        self.config_fetch_retry_period = first;
        self.config_fetch_max_retry_period = max;
        self
    }

    /// Sets the cap on active fetch loops.
    #[must_use]
    pub fn max_loop_id(mut self, max: usize) -> Self {
        self.max_loop_id = max;
        self
    }

    /// Backoff producing the delays between the attempts of one loop.
    ///
    /// With `limit_of_tries` set, it yields `limit_of_tries - 1` delays.
    #[must_use]
    pub fn backoff(&self, limit_of_tries: Option<usize>) -> ExponentialBuilder {
        let retries = limit_of_tries.map_or(usize::MAX, |limit| limit.saturating_sub(1));
        ExponentialBuilder::default()
            .with_min_delay(self.config_fetch_retry_period)
            .with_max_delay(self.config_fetch_max_retry_period)
            .with_factor(self.backoff_factor)
            .with_max_times(retries)
    }
}

/// Change of a cached configuration document.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigEvent {
    /// A validated document was cached for the service.
    Updated {
        /// The config item name.
        config_name: String,
        /// The service that served the document.
        service: DiscoveredService,
    },
    /// The service's document was evicted.
    Deleted {
        /// The config item name.
        config_name: String,
        /// The service that is gone.
        service: DiscoveredService,
    },
}

/// Retrieves the raw body of a configuration document.
#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    /// Fetches `config_file_name` from `service`.
    ///
    /// # Errors
    ///
    /// Transport failures and non-success responses.
    async fn fetch_config(
        &self,
        service: &DiscoveredService,
        config_file_name: &str,
    ) -> Result<String>;
}

/// [`ConfigFetcher`] issuing `GET {base_url}/{config_file_name}`.
///
/// HTTPS services use the TLS options the certificate manager holds for the
/// service name.
pub struct HttpConfigFetcher {
    client: Client,
    timeout: Duration,
    certificates: Option<Arc<dyn CertificateManager>>,
}

impl HttpConfigFetcher {
    /// Creates a fetcher with the given request timeout.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(
        timeout: Duration,
        certificates: Option<Arc<dyn CertificateManager>>,
    ) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            timeout,
            certificates,
        })
    }

    fn client_for(&self, service: &DiscoveredService) -> Result<Client> {
        if service.protocol == Protocol::Https {
            if let Some(options) = self
                .certificates
                .as_ref()
                .and_then(|certificates| certificates.tls_options(&service.name))
            {
                return Ok(options.apply(Client::builder().timeout(self.timeout)).build()?);
            }
        }
        Ok(self.client.clone())
    }
}

#[async_trait]
impl ConfigFetcher for HttpConfigFetcher {
    async fn fetch_config(
        &self,
        service: &DiscoveredService,
        config_file_name: &str,
    ) -> Result<String> {
        let url = service.url_for(config_file_name);
        tracing::debug!("fetching {url}");

        let response = self.client_for(service)?.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url,
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}

/// Keeps validated configuration documents of every known service.
///
/// Cheap to clone; clones share the cache and the fetch loops.
#[derive(Clone)]
pub struct ConfigQueryService {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConfigQueryConfig,
    items: Vec<CompiledItem>,
    fetcher: Arc<dyn ConfigFetcher>,
    state: Mutex<State>,
    events: broadcast::Sender<ConfigEvent>,
}

struct CompiledItem {
    item: ConfigQueryItem,
    validator: Validator,
}

#[derive(Default)]
struct State {
    next_loop_id: u64,
    /// Active loops by (service name, config name).
    loops: HashMap<(String, String), FetchLoop>,
    /// Config name to service name to document.
    cache: HashMap<String, HashMap<String, Value>>,
}

struct FetchLoop {
    id: u64,
    /// The service as the loop fetches from it.
    service: DiscoveredService,
    handle: AbortHandle,
}

impl ConfigQueryService {
    /// Creates a service fetching over HTTP(S).
    ///
    /// # Errors
    ///
    /// Fails if a schema does not compile or the HTTP client cannot be built.
    pub fn new(
        items: Vec<ConfigQueryItem>,
        config: ConfigQueryConfig,
        collaborators: &Collaborators,
    ) -> Result<Self> {
        let fetcher =
            HttpConfigFetcher::new(config.request_timeout, collaborators.certificates.clone())?;
        Self::with_fetcher(items, config, Arc::new(fetcher))
    }

    /// Creates a service using a custom fetcher.
    ///
    /// # Errors
    ///
    /// Fails if a schema does not compile.
    pub fn with_fetcher(
        items: Vec<ConfigQueryItem>,
        config: ConfigQueryConfig,
        fetcher: Arc<dyn ConfigFetcher>,
    ) -> Result<Self> {
        let items = items
            .into_iter()
            .map(|item| {
                let validator = item.compile()?;
                Ok(CompiledItem { item, validator })
            })
            .collect::<Result<Vec<_>>>()?;

        let (events, _) = broadcast::channel(256);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                items,
                fetcher,
                state: Mutex::new(State::default()),
                events,
            }),
        })
    }

    /// Subscribes to configuration changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.inner.events.subscribe()
    }

    /// Starts a fetch loop for every item that has none running for `service`.
    ///
    /// A running loop started for a different version of the service (a
    /// moved base URL, say) is replaced. Loops beyond `max_loop_id` are
    /// rejected; the next event for the service tries again. Returns the
    /// number of loops started.
    pub fn service_handler(&self, service: &DiscoveredService) -> usize {
        let inner = &self.inner;
        let mut state = inner.lock();
        let mut started = 0;

        for (index, compiled) in inner.items.iter().enumerate() {
            let config_name = &compiled.item.config_name;
            let key = (service.name.clone(), config_name.clone());
            match state.loops.get(&key) {
                Some(running) if running.service == *service => {
                    tracing::debug!("fetch of {config_name} from {} already running", service.name);
                    continue;
                }
                Some(running) => {
                    tracing::info!("{} changed, restarting fetch of {config_name}", service.name);
                    running.handle.abort();
                    state.loops.remove(&key);
                }
                None => {}
            }
            if state.loops.len() >= inner.config.max_loop_id {
                tracing::warn!(
                    "{} fetch loops active, not fetching {config_name} from {}",
                    state.loops.len(),
                    service.name
                );
                continue;
            }

            let id = state.next_loop_id;
            state.next_loop_id += 1;
            let task = tokio::spawn(Arc::clone(inner).run_loop(id, service.clone(), index));
            state.loops.insert(
                key,
                FetchLoop {
                    id,
                    service: service.clone(),
                    handle: task.abort_handle(),
                },
            );
            started += 1;
        }
        started
    }

    /// Fetches the raw body of `config_file_name` from `service`.
    ///
    /// # Errors
    ///
    /// Transport failures and non-success responses.
    pub async fn fetch_config(
        &self,
        service: &DiscoveredService,
        config_file_name: &str,
    ) -> Result<String> {
        self.inner.fetcher.fetch_config(service, config_file_name).await
    }

    /// Cached documents of `config_name`, keyed by service name.
    #[must_use]
    pub fn get_config(&self, config_name: &str) -> HashMap<String, Value> {
        self.inner
            .lock()
            .cache
            .get(config_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Cancels the fetch loops of `service` and evicts its documents.
    pub fn delete_service(&self, service: &DiscoveredService) {
        let inner = &self.inner;
        let mut state = inner.lock();

        state.loops.retain(|(name, _), fetch| {
            if *name == service.name {
                fetch.handle.abort();
                false
            } else {
                true
            }
        });

        for compiled in &inner.items {
            let config_name = &compiled.item.config_name;
            let evicted = state
                .cache
                .get_mut(config_name)
                .and_then(|documents| documents.remove(&service.name))
                .is_some();
            if evicted {
                tracing::info!("config {config_name} of {} evicted", service.name);
                let _ = inner.events.send(ConfigEvent::Deleted {
                    config_name: config_name.clone(),
                    service: service.clone(),
                });
            }
        }
    }

    /// Number of fetch loops currently running.
    #[must_use]
    pub fn active_loops(&self) -> usize {
        self.inner.lock().loops.len()
    }

    /// Feeds service lifecycle events into this service until the sender closes.
    pub fn attach(&self, mut events: broadcast::Receiver<ServiceEvent>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ServiceEvent::Added(service) | ServiceEvent::Modified(service)) => {
                        this.service_handler(&service);
                    }
                    Ok(ServiceEvent::Deleted(service)) => this.delete_service(&service),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("missed {missed} service events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_loop(self: Arc<Self>, id: u64, service: DiscoveredService, index: usize) {
        let Some(compiled) = self.items.get(index) else {
            return;
        };
        let config_name = &compiled.item.config_name;
        let mut delays = self.config.backoff(compiled.item.limit_of_tries).build();
        let mut attempt = 1;

        loop {
            match self.fetch_document(&service, compiled).await {
                Ok(document) => {
                    self.store(id, &service, config_name, document);
                    return;
                }
                Err(e) => match delays.next() {
                    Some(delay) => {
                        tracing::warn!(
                            "attempt {attempt} to fetch {config_name} from {} failed: {e}, \
                             retrying in {delay:?}",
                            service.name
                        );
                        wait(delay).await;
                        attempt += 1;
                    }
                    None => {
                        tracing::error!(
                            "giving up on {config_name} from {} after {attempt} tries: {e}",
                            service.name
                        );
                        self.finish(id, &service.name, config_name);
                        return;
                    }
                },
            }
        }
    }

    async fn fetch_document(
        &self,
        service: &DiscoveredService,
        compiled: &CompiledItem,
    ) -> Result<Value> {
        let item = &compiled.item;
        let body = self
            .fetcher
            .fetch_config(service, &item.config_file_name)
            .await?;

        if body.trim().is_empty() {
            if item.allow_empty_config {
                tracing::debug!(
                    "{} of {} is empty, using the default",
                    item.config_name,
                    service.name
                );
                return Ok(item.config_default.clone().unwrap_or(Value::Null));
            }
            return Err(Error::EmptyConfig {
                config_name: item.config_name.clone(),
            });
        }

        let document: Value = serde_json::from_str(&body)?;
        let errors: Vec<String> = compiled
            .validator
            .iter_errors(&document)
            .map(|e| e.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(Error::Validation {
                config_name: item.config_name.clone(),
                message: errors.join("; "),
            });
        }
        Ok(document)
    }

    /// Caches the document unless the loop was cancelled meanwhile.
    fn store(&self, id: u64, service: &DiscoveredService, config_name: &str, document: Value) {
        let mut state = self.lock();
        let key = (service.name.clone(), config_name.to_string());
        if state.loops.get(&key).map(|fetch| fetch.id) != Some(id) {
            return;
        }
        state.loops.remove(&key);
        state
            .cache
            .entry(config_name.to_string())
            .or_default()
            .insert(service.name.clone(), document);

        tracing::info!("config {config_name} of {} updated", service.name);
        let _ = self.events.send(ConfigEvent::Updated {
            config_name: config_name.to_string(),
            service: service.clone(),
        });
    }

    fn finish(&self, id: u64, service_name: &str, config_name: &str) {
        let mut state = self.lock();
        let key = (service_name.to_string(), config_name.to_string());
        if state.loops.get(&key).map(|fetch| fetch.id) == Some(id) {
            state.loops.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;
    use crate::collection::ServiceCollection;
    use crate::tls::TlsOptions;

    /// Replies with the scripted bodies in order; `None` is a failed fetch.
    #[derive(Default)]
    struct ScriptedFetcher {
        replies: Mutex<Vec<Option<String>>>,
        calls: Mutex<Vec<Instant>>,
        hang: bool,
    }

    impl ScriptedFetcher {
        fn new(replies: &[Option<&str>]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().rev().map(|r| r.map(str::to_string)).collect()),
                ..Default::default()
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                hang: true,
                ..Default::default()
            })
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ConfigFetcher for ScriptedFetcher {
        async fn fetch_config(
            &self,
            service: &DiscoveredService,
            config_file_name: &str,
        ) -> Result<String> {
            self.calls.lock().unwrap().push(Instant::now());
            if self.hang {
                futures::future::pending::<()>().await;
            }
            match self.replies.lock().unwrap().pop().flatten() {
                Some(body) => Ok(body),
                None => Err(Error::HttpStatus {
                    url: service.url_for(config_file_name),
                    status: 503,
                }),
            }
        }
    }

    /// Serves `body` from one base URL and fails everywhere else.
    struct MovedFetcher {
        base_url: String,
        urls: Mutex<Vec<String>>,
    }

    impl MovedFetcher {
        fn new(base_url: &str) -> Arc<Self> {
            Arc::new(Self {
                base_url: base_url.to_string(),
                urls: Mutex::new(Vec::new()),
            })
        }

        fn urls(&self) -> Vec<String> {
            self.urls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ConfigFetcher for MovedFetcher {
        async fn fetch_config(
            &self,
            service: &DiscoveredService,
            config_file_name: &str,
        ) -> Result<String> {
            let url = service.url_for(config_file_name);
            self.urls.lock().unwrap().push(url.clone());
            if service.base_url == self.base_url {
                Ok(r#"{"title":"moved"}"#.to_string())
            } else {
                Err(Error::HttpStatus { url, status: 503 })
            }
        }
    }

    /// Hands out TLS options and records who asked.
    #[derive(Default)]
    struct RecordingCertificates {
        requested: Mutex<Vec<String>>,
    }

    impl CertificateManager for RecordingCertificates {
        fn tls_options(&self, name: &str) -> Option<TlsOptions> {
            self.requested.lock().unwrap().push(name.to_string());
            Some(TlsOptions::default())
        }
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": { "title": { "type": "string" } },
            "required": ["title"]
        })
    }

    fn item() -> ConfigQueryItem {
        ConfigQueryItem::new("ui-config", "config.json", schema())
    }

    fn make_service(name: &str) -> DiscoveredService {
        DiscoveredService {
            name: name.to_string(),
            uid: format!("uid-{name}"),
            base_url: format!("http://{name}.prod:8080"),
            ..Default::default()
        }
    }

    fn config() -> ConfigQueryConfig {
        ConfigQueryConfig::default().retry_period(Duration::from_secs(1), Duration::from_secs(5))
    }

    fn service_with(
        items: Vec<ConfigQueryItem>,
        fetcher: Arc<ScriptedFetcher>,
    ) -> ConfigQueryService {
        ConfigQueryService::with_fetcher(items, config(), fetcher).unwrap()
    }

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        addr
    }

    // Item tests

    #[test]
    fn item_deserializes_from_camel_case() {
        let item: ConfigQueryItem = serde_json::from_value(json!({
            "configName": "ui-config",
            "configFileName": "config.json",
            "schema": { "type": "object" },
            "allowEmptyConfig": true,
            "configDefault": {},
            "limitOfTries": 3
        }))
        .unwrap();

        assert_eq!(item.config_file_name, "config.json");
        assert!(item.allow_empty_config);
        assert_eq!(item.limit_of_tries, Some(3));
        assert!(item.additional_schema_list.is_empty());
    }

    #[test]
    fn invalid_schema_is_rejected() {
        let bad = ConfigQueryItem::new("bad", "bad.json", json!({ "type": 12 }));
        let result =
            ConfigQueryService::with_fetcher(vec![bad], config(), ScriptedFetcher::new(&[]));

        assert!(matches!(
            result,
            Err(Error::InvalidSchema { config_name, .. }) if config_name == "bad"
        ));
    }

    #[test]
    fn additional_schema_without_id_is_rejected() {
        let item = item().additional_schema(json!({ "type": "string" }));
        assert!(matches!(item.compile(), Err(Error::InvalidSchema { .. })));
    }

    #[test]
    fn additional_schemas_resolve_references() {
        let item = ConfigQueryItem::new(
            "ui-config",
            "config.json",
            json!({
                "type": "object",
                "properties": { "menu": { "$ref": "http://schemas.config-sync.io/menu.json" } }
            }),
        )
        .additional_schema(json!({
            "id": "http://schemas.config-sync.io/menu.json",
            "type": "array",
            "items": { "type": "string" }
        }));
        let validator = item.compile().unwrap();

        assert!(validator.is_valid(&json!({ "menu": ["home", "cart"] })));
        assert!(!validator.is_valid(&json!({ "menu": [1] })));
    }

    // Backoff tests

    #[test]
    fn backoff_grows_and_is_capped() {
        let delays: Vec<Duration> = config().backoff(Some(6)).build().collect();

        assert_eq!(
            delays,
            [1, 2, 4, 5, 5].map(Duration::from_secs).to_vec()
        );
    }

    #[test]
    fn unlimited_backoff_keeps_going() {
        assert_eq!(config().backoff(None).build().take(100).count(), 100);
        assert_eq!(config().backoff(Some(1)).build().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_fetch_backs_off_until_limit() {
        let fetcher = ScriptedFetcher::new(&[]);
        let service = service_with(vec![item().limit_of_tries(5)], fetcher.clone());

        service.service_handler(&make_service("catalog"));
        tokio::time::sleep(Duration::from_secs(120)).await;

        let calls = fetcher.calls();
        assert_eq!(calls.len(), 5);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.windows(2).all(|w| w[1] >= w[0]));
        assert!(gaps.iter().all(|gap| *gap <= Duration::from_secs(5)));
        assert_eq!(service.active_loops(), 0);
        assert!(service.get_config("ui-config").is_empty());
    }

    // Fetch loop tests

    #[tokio::test(start_paused = true)]
    async fn valid_document_is_cached_and_published() {
        let fetcher = ScriptedFetcher::new(&[Some(r#"{"title":"Catalog"}"#)]);
        let service = service_with(vec![item()], fetcher);
        let mut events = service.subscribe();

        assert_eq!(service.service_handler(&make_service("catalog")), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let config = service.get_config("ui-config");
        assert_eq!(config.get("catalog"), Some(&json!({ "title": "Catalog" })));
        assert!(matches!(
            events.try_recv(),
            Ok(ConfigEvent::Updated { config_name, service })
                if config_name == "ui-config" && service.name == "catalog"
        ));
        assert_eq!(service.active_loops(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_document_is_retried() {
        let fetcher = ScriptedFetcher::new(&[
            Some(r#"{"name":"x"}"#),
            Some("not json"),
            Some(r#"{"title":"ok"}"#),
        ]);
        let service = service_with(vec![item()], fetcher.clone());

        service.service_handler(&make_service("catalog"));
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(fetcher.calls().len(), 3);
        assert_eq!(service.get_config("ui-config")["catalog"], json!({ "title": "ok" }));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_document_uses_default_without_retry() {
        let fetcher = ScriptedFetcher::new(&[Some("  ")]);
        let empty_ok = item().allow_empty_config(json!({ "title": "default" }));
        let service = service_with(vec![empty_ok], fetcher.clone());

        service.service_handler(&make_service("catalog"));
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(fetcher.calls().len(), 1);
        assert_eq!(service.get_config("ui-config")["catalog"], json!({ "title": "default" }));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_document_is_retried_when_not_allowed() {
        let fetcher = ScriptedFetcher::new(&[Some(""), Some(r#"{"title":"late"}"#)]);
        let service = service_with(vec![item()], fetcher.clone());

        service.service_handler(&make_service("catalog"));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(fetcher.calls().len(), 2);
        assert_eq!(service.get_config("ui-config")["catalog"], json!({ "title": "late" }));
    }

    #[tokio::test(start_paused = true)]
    async fn one_loop_per_service_and_item() {
        let fetcher = ScriptedFetcher::hanging();
        let second = ConfigQueryItem::new("theme", "theme.json", json!({}));
        let service = service_with(vec![item(), second], fetcher);

        assert_eq!(service.service_handler(&make_service("catalog")), 2);
        assert_eq!(service.service_handler(&make_service("catalog")), 0);
        assert_eq!(service.active_loops(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn loops_are_capped() {
        let fetcher = ScriptedFetcher::hanging();
        let capped = config().max_loop_id(2);
        let service = ConfigQueryService::with_fetcher(vec![item()], capped, fetcher).unwrap();

        for name in ["a", "b", "c", "d"] {
            service.service_handler(&make_service(name));
        }

        assert_eq!(service.active_loops(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn changed_service_restarts_its_loop() {
        let fetcher = MovedFetcher::new("http://catalog.prod:9090");
        let service =
            ConfigQueryService::with_fetcher(vec![item()], config(), fetcher.clone()).unwrap();
        let old = make_service("catalog");
        let moved = DiscoveredService {
            base_url: "http://catalog.prod:9090".to_string(),
            ..make_service("catalog")
        };

        assert_eq!(service.service_handler(&old), 1);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(service.service_handler(&old), 0);
        let mut events = service.subscribe();

        assert_eq!(service.service_handler(&moved), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(service.get_config("ui-config")["catalog"], json!({ "title": "moved" }));
        assert_eq!(service.active_loops(), 0);
        assert!(matches!(
            events.try_recv(),
            Ok(ConfigEvent::Updated { service, .. })
                if service.base_url == "http://catalog.prod:9090"
        ));

        let fetched = fetcher.urls();
        assert_eq!(
            fetched.last().map(String::as_str),
            Some("http://catalog.prod:9090/config.json")
        );
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fetcher.urls().len(), fetched.len());
    }

    // Eviction tests

    #[tokio::test(start_paused = true)]
    async fn delete_evicts_cached_document() {
        let fetcher = ScriptedFetcher::new(&[Some(r#"{"title":"a"}"#), Some(r#"{"title":"b"}"#)]);
        let service = service_with(vec![item()], fetcher);
        service.service_handler(&make_service("a"));
        service.service_handler(&make_service("b"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut events = service.subscribe();

        service.delete_service(&make_service("a"));

        let config = service.get_config("ui-config");
        assert_eq!(config.len(), 1);
        assert!(config.contains_key("b"));
        assert!(matches!(
            events.try_recv(),
            Ok(ConfigEvent::Deleted { service, .. }) if service.name == "a"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_cancels_retrying_loop() {
        let fetcher = ScriptedFetcher::new(&[None, Some(r#"{"title":"late"}"#)]);
        let service = service_with(vec![item()], fetcher.clone());
        let mut events = service.subscribe();

        service.service_handler(&make_service("catalog"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        service.delete_service(&make_service("catalog"));
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(fetcher.calls().len(), 1);
        assert_eq!(service.active_loops(), 0);
        assert!(service.get_config("ui-config").is_empty());
        assert!(events.try_recv().is_err());
    }

    // Event attachment tests

    #[tokio::test(start_paused = true)]
    async fn attach_follows_collection_events() {
        let fetcher = ScriptedFetcher::new(&[Some(r#"{"title":"Catalog"}"#)]);
        let service = service_with(vec![item()], fetcher);
        let collection = ServiceCollection::new();
        service.attach(collection.subscribe());

        collection.add_service(make_service("catalog")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(service.get_config("ui-config").contains_key("catalog"));

        collection.delete_service(&make_service("catalog")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(service.get_config("ui-config").is_empty());
    }

    // HTTP fetch tests

    #[tokio::test]
    async fn http_fetcher_reads_document() {
        let router =
            Router::new().route("/config.json", get(|| async { r#"{"title":"Catalog"}"# }));
        let addr = serve(router).await;
        let service = DiscoveredService {
            base_url: format!("http://{addr}/"),
            ..make_service("catalog")
        };

        let fetcher = HttpConfigFetcher::new(Duration::from_secs(5), None).unwrap();
        let body = fetcher.fetch_config(&service, "/config.json").await.unwrap();

        assert_eq!(body, r#"{"title":"Catalog"}"#);
    }

    #[tokio::test]
    async fn http_fetcher_reports_error_status() {
        let router = Router::new().route("/config.json", get(|| async { StatusCode::NOT_FOUND }));
        let addr = serve(router).await;
        let service = DiscoveredService {
            base_url: format!("http://{addr}"),
            ..make_service("catalog")
        };

        let fetcher = HttpConfigFetcher::new(Duration::from_secs(5), None).unwrap();
        let result = fetcher.fetch_config(&service, "config.json").await;

        assert!(matches!(result, Err(Error::HttpStatus { status: 404, .. })));
    }

    #[tokio::test]
    async fn http_fetcher_asks_certificates_for_https_services_only() {
        let certificates = Arc::new(RecordingCertificates::default());
        let fetcher =
            HttpConfigFetcher::new(Duration::from_secs(5), Some(certificates.clone())).unwrap();
        let https = DiscoveredService {
            base_url: "https://catalog.prod:8443".to_string(),
            protocol: Protocol::Https,
            ..make_service("catalog")
        };
        let http = DiscoveredService {
            protocol: Protocol::Http,
            ..make_service("cart")
        };

        fetcher.client_for(&https).unwrap();
        fetcher.client_for(&http).unwrap();

        assert_eq!(*certificates.requested.lock().unwrap(), vec!["catalog".to_string()]);
    }
}
