//! Kubernetes service discovery using `Service`, `EndpointSlice` and `Pod` watches.
//!
//! [`K8sQueryService`] keeps a reconciled view of the services relevant to this
//! deployment and publishes it into a [`ServiceCollection`].
//!
//! # How It Works
//!
//! 1. Reads the namespace from the service-account mount
//! 2. Watches `Service`, `EndpointSlice` and `Pod` resources matching the label selector
//! 3. Publishes a service once it is relevant and has at least one ready endpoint
//! 4. Removes it when the `Service` is deleted, or when no endpoint is ready for
//!    longer than the grace period
//! 5. Forces a configuration refresh when a pod of a published service is
//!    (re)started
//!
//! Each watch is supervised: failures are logged, reported, and the watch is
//! re-issued after `watch_reconnect_interval` until [`K8sQueryService::stop_watching`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use k8s_config_sync::{K8sQueryConfig, K8sQueryService, ServiceCollection};
//!
//! let collection = Arc::new(ServiceCollection::new());
//! let config = K8sQueryConfig::new("ui.example.com/discoverable", "true");
//! let discovery = K8sQueryService::new(config, collection.clone());
//! discovery.start_watching().await?;
//! ```

mod endpoints;
mod mapping;
mod pods;
mod state;
mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::ListParams;
use kube::runtime::watcher::{self, Config as WatcherConfig, Event};
use kube::{Api, Client};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

pub use mapping::IngressMap;

use self::pods::{PodLifecycleState, PodStatus};
use self::state::{Action, ClusterState};
use crate::collaborators::Collaborators;
use crate::collection::ServiceCollection;
use crate::error::{Error, Result};
use crate::fault::{FaultIndication, FaultReporter, K8S_UNAVAILABLE};
use crate::metric::{ResourceKind, ResourceMetric};
use crate::service::DiscoveredService;
use crate::wait::{wait, wait_until};

/// Default location of the mounted service-account files.
pub const DEFAULT_SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Configuration for Kubernetes service discovery.
#[derive(Clone, Debug)]
pub struct K8sQueryConfig {
    /// Label a `Service` must carry to be relevant.
    pub label_name: String,
    /// Required value of `label_name`.
    pub label_value: String,
    /// Label selector for the pod watch.
    ///
    /// Defaults to the service selector. Pods rarely carry the label of the
    /// `Service` in front of them, so this usually needs to be set (for
    /// example to `app.kubernetes.io/part-of=shop`) for pod restarts to be
    /// noticed.
    pub pod_label_selector: Option<String>,
    /// Namespace to watch. If `None`, read from the service-account mount.
    pub namespace: Option<String>,
    /// Directory holding the service-account `namespace` file.
    pub service_account_dir: PathBuf,
    /// Delay before a failed watch is re-issued.
    pub watch_reconnect_interval: Duration,
    /// How long a new pod may take to become ready.
    pub pod_startup_timeout: Duration,
    /// How long a terminating pod may take to disappear.
    pub pod_termination_timeout: Duration,
    /// How long to wait for the replacement of a deleted pod.
    pub pod_replica_startup_timeout: Duration,
    /// Poll interval of the pod waits.
    pub pod_poll_interval: Duration,
    /// How long a published service may have no ready endpoint before removal.
    pub endpoint_grace_period: Duration,
    /// Resolve base URLs through ingress routes when available.
    pub discover_ingress: bool,
    /// Use HTTPS unless the protocol annotation says otherwise.
    pub use_https: bool,
    /// Annotation holding the application name.
    pub app_name_annotation: String,
    /// Annotation holding the application version.
    pub app_version_annotation: String,
    /// Annotation selecting `http` or `https`.
    pub protocol_annotation: String,
    /// Annotation selecting the port, by number or name.
    pub port_annotation: String,
    /// Annotation holding a path prefix appended to the base URL.
    pub context_root_annotation: String,
    /// Annotations copied verbatim into [`DiscoveredService::extra_annotations`].
    pub extra_annotations: Vec<String>,
    /// Prefix of the resource count metric names.
    pub metric_prefix: String,
}

impl K8sQueryConfig {
    /// Creates a configuration selecting services labelled `label_name=label_value`.
    #[must_use]
    pub fn new(label_name: impl Into<String>, label_value: impl Into<String>) -> Self {
        Self {
            label_name: label_name.into(),
            label_value: label_value.into(),
            pod_label_selector: None,
            namespace: None,
            service_account_dir: PathBuf::from(DEFAULT_SERVICE_ACCOUNT_DIR),
            watch_reconnect_interval: Duration::from_secs(5),
            pod_startup_timeout: Duration::from_secs(60),
            pod_termination_timeout: Duration::from_secs(60),
            pod_replica_startup_timeout: Duration::from_secs(30),
            pod_poll_interval: Duration::from_secs(1),
            endpoint_grace_period: Duration::from_secs(5),
            discover_ingress: false,
            use_https: false,
            app_name_annotation: "config-sync.io/app-name".to_string(),
            app_version_annotation: "config-sync.io/app-version".to_string(),
            protocol_annotation: "config-sync.io/protocol".to_string(),
            port_annotation: "config-sync.io/port".to_string(),
            context_root_annotation: "config-sync.io/context-root".to_string(),
            extra_annotations: Vec::new(),
            metric_prefix: "config_sync".to_string(),
        }
    }

    /// Sets an explicit namespace instead of reading the service-account mount.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the service-account directory.
    #[must_use]
    pub fn service_account_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.service_account_dir = dir.into();
        self
    }

    /// Sets the watch reconnect interval.
    #[must_use]
    pub fn watch_reconnect_interval(mut self, interval: Duration) -> Self {
        self.watch_reconnect_interval = interval;
        self
    }

    /// Sets the pod startup, termination and replica startup timeouts.
    #[must_use]
    pub fn pod_timeouts(
        mut self,
        startup: Duration,
        termination: Duration,
        replica: Duration,
    ) -> Self {
        self.pod_startup_timeout = startup;
        self.pod_termination_timeout = termination;
        self.pod_replica_startup_timeout = replica;
        self
    }

    /// Sets the label selector of the pod watch.
    #[must_use]
    pub fn pod_label_selector(mut self, selector: impl Into<String>) -> Self {
        self.pod_label_selector = Some(selector.into());
        self
    }

    /// Sets the poll interval of the pod waits.
    #[must_use]
    pub fn pod_poll_interval(mut self, interval: Duration) -> Self {
        self.pod_poll_interval = interval;
        self
    }

    /// Sets the endpoint grace period.
    #[must_use]
    pub fn endpoint_grace_period(mut self, period: Duration) -> Self {
        self.endpoint_grace_period = period;
        self
    }

    /// Enables base URL resolution through ingress routes.
    #[must_use]
    pub fn discover_ingress(mut self, enabled: bool) -> Self {
        self.discover_ingress = enabled;
        self
    }

    /// Makes HTTPS the default protocol.
    #[must_use]
    pub fn use_https(mut self, enabled: bool) -> Self {
        self.use_https = enabled;
        self
    }

    /// Sets the annotations copied into discovered services.
    #[must_use]
    pub fn extra_annotations(mut self, keys: Vec<String>) -> Self {
        self.extra_annotations = keys;
        self
    }

    /// The `label=value` selector used by the service and endpoint watches.
    #[must_use]
    pub fn label_selector(&self) -> String {
        format!("{}={}", self.label_name, self.label_value)
    }

    /// The selector used by the pod watch.
    #[must_use]
    pub fn pod_selector(&self) -> String {
        self.pod_label_selector
            .clone()
            .unwrap_or_else(|| self.label_selector())
    }
}

/// Watches the cluster and keeps a [`ServiceCollection`] in sync with it.
pub struct K8sQueryService {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner {
    config: K8sQueryConfig,
    collection: Arc<ServiceCollection>,
    fault_reporter: Option<Arc<dyn FaultReporter>>,
    service_metric: ResourceMetric,
    pod_metric: ResourceMetric,
    endpoint_metric: ResourceMetric,
    state: Mutex<ClusterState>,
    ingress_api: RwLock<Option<Api<Ingress>>>,
    ingress: RwLock<Option<Arc<IngressMap>>>,
    stop: tokio::sync::watch::Sender<bool>,
}

impl K8sQueryService {
    /// Creates a discovery service publishing into `collection`.
    #[must_use]
    pub fn new(config: K8sQueryConfig, collection: Arc<ServiceCollection>) -> Self {
        Self::with_collaborators(config, collection, Collaborators::default())
    }

    /// Creates a discovery service reporting metrics and faults to `collaborators`.
    #[must_use]
    pub fn with_collaborators(
        config: K8sQueryConfig,
        collection: Arc<ServiceCollection>,
        collaborators: Collaborators,
    ) -> Self {
        let metric = |kind| {
            ResourceMetric::new(kind, &config.metric_prefix, collaborators.metrics.clone())
        };
        let (stop, _) = tokio::sync::watch::channel(true);

        let inner = Inner {
            service_metric: metric(ResourceKind::Service),
            pod_metric: metric(ResourceKind::Pod),
            endpoint_metric: metric(ResourceKind::Endpoint),
            state: Mutex::new(ClusterState::new(config.clone())),
            config,
            collection,
            fault_reporter: collaborators.fault_reporter,
            ingress_api: RwLock::new(None),
            ingress: RwLock::new(None),
            stop,
        };

        Self {
            inner: Arc::new(inner),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The collection this service publishes into.
    #[must_use]
    pub fn collection(&self) -> &Arc<ServiceCollection> {
        &self.inner.collection
    }

    /// Starts watching using the default (in-cluster or kubeconfig) client.
    ///
    /// # Errors
    ///
    /// Fails if no client can be built or the namespace cannot be read.
    pub async fn start_watching(&self) -> Result<()> {
        let client = Client::try_default().await?;
        self.start_watching_with_client(client).await
    }

    /// Starts the `Service`, `EndpointSlice` and `Pod` watches. Calling it while
    /// already watching does nothing.
    ///
    /// # Errors
    ///
    /// Fails if the service-account namespace file exists but cannot be read.
    pub async fn start_watching_with_client(&self, client: Client) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            tracing::debug!("Kubernetes watches already running");
            return Ok(());
        }

        let inner = &self.inner;
        let config = &inner.config;
        let namespace = match &config.namespace {
            Some(namespace) => namespace.clone(),
            None => read_namespace(&config.service_account_dir)
                .await?
                .unwrap_or_else(|| client.default_namespace().to_string()),
        };

        inner.stop.send_replace(false);
        for metric in inner.metrics() {
            metric.init();
        }
        *inner.ingress_api.write().await = Some(Api::namespaced(client.clone(), &namespace));
        *inner.ingress.write().await = None;

        let selector = config.label_selector();
        let pod_selector = config.pod_selector();
        if config.pod_label_selector.is_none() {
            tracing::warn!("No pod label selector set, watching pods labelled {pod_selector}");
        }

        tracing::info!("Starting Kubernetes discovery in {namespace} for {selector}");

        let services: Api<Service> = Api::namespaced(client.clone(), &namespace);
        let slices: Api<EndpointSlice> = Api::namespaced(client.clone(), &namespace);
        let pods: Api<Pod> = Api::namespaced(client, &namespace);

        tasks.push(inner.spawn_watch(
            ResourceKind::Service,
            services,
            WatcherConfig::default().labels(&selector),
            |inner, event| inner.handle_service_event(event).boxed(),
        ));
        tasks.push(inner.spawn_watch(
            ResourceKind::Endpoint,
            slices,
            WatcherConfig::default().labels(&selector),
            |inner, event| inner.handle_endpoint_event(event).boxed(),
        ));
        tasks.push(inner.spawn_watch(
            ResourceKind::Pod,
            pods,
            WatcherConfig::default().labels(&pod_selector),
            |inner, event| inner.handle_pod_event(event).boxed(),
        ));

        Ok(())
    }

    /// Stops all watches and removes the resource metrics. Safe to call repeatedly.
    pub async fn stop_watching(&self) {
        self.inner.stop.send_replace(true);

        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            tracing::info!("Stopping Kubernetes discovery");
        }
        for task in tasks.drain(..) {
            task.abort();
        }

        for metric in self.inner.metrics() {
            metric.clear();
        }
    }

    /// Returns true while the watches are running.
    pub async fn is_watching(&self) -> bool {
        !self.tasks.lock().await.is_empty()
    }

    /// Re-reads all ingress resources and caches the resulting route map.
    ///
    /// Failures are logged and reported; an empty map is returned instead.
    pub async fn request_ingress_map(&self) -> Arc<IngressMap> {
        self.inner.request_ingress_map().await
    }

    /// Services currently published by this discovery.
    pub async fn get_services(&self) -> Vec<DiscoveredService> {
        self.inner.state.lock().await.published()
    }

    /// Number of watched resources of `kind`.
    #[must_use]
    pub fn resource_count(&self, kind: ResourceKind) -> usize {
        self.inner.metric(kind).count()
    }
}

/// Reads `namespace` from the service-account directory.
///
/// Returns `None` when the file does not exist, e.g. outside a cluster.
async fn read_namespace(dir: &Path) -> Result<Option<String>> {
    let path = dir.join("namespace");
    match tokio::fs::read_to_string(&path).await {
        Ok(namespace) if namespace.trim().is_empty() => Err(Error::MissingField("namespace")),
        Ok(namespace) => Ok(Some(namespace.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("{} not found, using the client namespace", path.display());
            Ok(None)
        }
        Err(source) => Err(Error::Io { path, source }),
    }
}

impl Inner {
    fn metrics(&self) -> [&ResourceMetric; 3] {
        [&self.service_metric, &self.endpoint_metric, &self.pod_metric]
    }

    fn metric(&self, kind: ResourceKind) -> &ResourceMetric {
        match kind {
            ResourceKind::Service => &self.service_metric,
            ResourceKind::Pod => &self.pod_metric,
            ResourceKind::Endpoint => &self.endpoint_metric,
        }
    }

    fn report(&self, description: String) {
        if let Some(reporter) = &self.fault_reporter {
            reporter.produce_fault_indication(FaultIndication::new(K8S_UNAVAILABLE, description));
        }
    }

    fn spawn_watch<K, H>(
        self: &Arc<Self>,
        kind: ResourceKind,
        api: Api<K>,
        watcher_config: WatcherConfig,
        handler: H,
    ) -> JoinHandle<()>
    where
        K: kube::Resource
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug
            + Send
            + Sync
            + 'static,
        H: Fn(Arc<Self>, Event<K>) -> BoxFuture<'static, ()> + Send + 'static,
    {
        let inner = Arc::clone(self);
        tokio::spawn(watch::supervise(
            kind,
            move || watcher::watcher(api.clone(), watcher_config.clone()),
            move |event| handler(inner.clone(), event),
            self.config.watch_reconnect_interval,
            self.stop.subscribe(),
            self.fault_reporter.clone(),
        ))
    }

    // Watch event handlers

    async fn handle_service_event(self: Arc<Self>, event: Event<Service>) {
        let kind = ResourceKind::Service;
        let actions = match event {
            Event::Init => {
                self.state.lock().await.begin_resync(kind);
                Vec::new()
            }
            Event::InitApply(service) => self.apply_service(service, true).await,
            Event::Apply(service) => self.apply_service(service, false).await,
            Event::Delete(service) => {
                let Some(name) = service.metadata.name.as_deref() else {
                    return;
                };
                tracing::debug!("service {name} deleted");
                self.service_metric.remove(name);
                self.state.lock().await.delete_service(name)
            }
            Event::InitDone => self.finish_resync(kind).await,
        };
        self.apply_actions(actions).await;
    }

    async fn apply_service(&self, service: Service, initial: bool) -> Vec<Action> {
        let Some(name) = service.metadata.name.clone() else {
            return Vec::new();
        };
        tracing::debug!("service {name} applied");

        if mapping::is_service_relevant(&self.config, &service) {
            self.service_metric.add(&name);
        } else {
            self.service_metric.remove(&name);
        }

        let ingress = self.ingress_for_mapping().await;
        let mut state = self.state.lock().await;
        if initial {
            state.mark_seen(ResourceKind::Service, &name);
        }
        state.apply_service(service, ingress.as_deref())
    }

    async fn handle_endpoint_event(self: Arc<Self>, event: Event<EndpointSlice>) {
        let kind = ResourceKind::Endpoint;
        let actions = match event {
            Event::Init => {
                self.state.lock().await.begin_resync(kind);
                Vec::new()
            }
            Event::InitApply(slice) | Event::Apply(slice) => {
                let Some(name) = slice.metadata.name.as_deref() else {
                    return;
                };
                tracing::debug!("endpoint slice {name} applied");
                self.endpoint_metric.add(name);
                let mut state = self.state.lock().await;
                state.mark_seen(kind, name);
                state.apply_endpoint_slice(&slice)
            }
            Event::Delete(slice) => {
                if let Some(name) = slice.metadata.name.as_deref() {
                    tracing::debug!("endpoint slice {name} deleted");
                    self.endpoint_metric.remove(name);
                }
                self.state.lock().await.delete_endpoint_slice(&slice)
            }
            Event::InitDone => self.finish_resync(kind).await,
        };
        self.apply_actions(actions).await;
    }

    async fn handle_pod_event(self: Arc<Self>, event: Event<Pod>) {
        let kind = ResourceKind::Pod;
        let actions = match event {
            Event::Init => {
                self.state.lock().await.begin_resync(kind);
                Vec::new()
            }
            Event::InitApply(pod) => self.apply_pod(&pod, true).await,
            Event::Apply(pod) => self.apply_pod(&pod, false).await,
            Event::Delete(pod) => {
                let Some(name) = pod.metadata.name.as_deref() else {
                    return;
                };
                tracing::debug!("pod {name} deleted");
                self.pod_metric.remove(name);
                self.state.lock().await.delete_pod(name, true)
            }
            Event::InitDone => self.finish_resync(kind).await,
        };
        self.apply_actions(actions).await;
    }

    async fn apply_pod(&self, pod: &Pod, initial: bool) -> Vec<Action> {
        let Some(name) = pod.metadata.name.as_deref() else {
            return Vec::new();
        };
        tracing::debug!("pod {name} applied");
        self.pod_metric.add(name);

        let mut state = self.state.lock().await;
        if initial {
            state.mark_seen(ResourceKind::Pod, name);
        }
        state.apply_pod(pod, initial)
    }

    async fn finish_resync(&self, kind: ResourceKind) -> Vec<Action> {
        let mut state = self.state.lock().await;
        let actions = state.finish_resync(kind);
        self.metric(kind).reset(state.tracked(kind));
        tracing::info!("Kubernetes {kind} watch synchronized");
        actions
    }

    fn apply_actions(self: &Arc<Self>, actions: Vec<Action>) -> BoxFuture<'static, ()> {
        let inner = Arc::clone(self);
        async move {
            for action in actions {
                match action {
                    Action::Add(service) => inner.collection.add_service(service).await,
                    Action::Modify(service) => inner.collection.modify_service(service).await,
                    Action::Delete(service) => inner.collection.delete_service(&service).await,
                    Action::GraceCheck {
                        service_name,
                        generation,
                    } => {
                        tokio::spawn(inner.clone().grace_check(service_name, generation));
                    }
                    Action::AwaitStartup(pod) => {
                        tokio::spawn(inner.clone().wait_for_pod_startup(pod));
                    }
                    Action::AwaitTermination(pod) => {
                        tokio::spawn(inner.clone().wait_for_pod_termination(pod));
                    }
                    Action::AwaitReplica(pod) => {
                        tokio::spawn(inner.clone().wait_pod_replica_creation(pod));
                    }
                }
            }
        }
        .boxed()
    }

    // Readiness and pod lifecycle waits

    async fn grace_check(self: Arc<Self>, name: String, generation: u64) {
        wait(self.config.endpoint_grace_period).await;
        let actions = self.state.lock().await.grace_check(&name, generation);
        self.apply_actions(actions).await;
    }

    async fn poll_pod(
        &self,
        name: &str,
        timeout: Duration,
        done: fn(PodStatus) -> bool,
    ) -> Option<PodStatus> {
        wait_until(self.config.pod_poll_interval, timeout, move || async move {
            let status = self.state.lock().await.pod_status(name);
            done(status).then_some(status)
        })
        .await
    }

    async fn wait_for_pod_startup(self: Arc<Self>, pod: PodLifecycleState) {
        if !self.state.lock().await.begin_wait(&pod) {
            return;
        }

        let outcome = self
            .poll_pod(&pod.pod_name, self.config.pod_startup_timeout, |status| {
                status != PodStatus::Starting
            })
            .await;

        let service_name = {
            let mut state = self.state.lock().await;
            state.end_wait(&pod.pod_name);
            state.service_for_wait(&pod)
        };

        match (outcome, service_name) {
            (Some(PodStatus::Ready), Some(service_name)) => {
                if self.collection.force_update_service(&service_name).await {
                    tracing::info!("pod {} of {service_name} started, refreshing", pod.pod_name);
                }
            }
            (Some(PodStatus::Ready), None) => {
                tracing::debug!("pod {} started outside any tracked service", pod.pod_name);
            }
            (Some(status), _) => {
                tracing::debug!("pod {} stopped starting: {status:?}", pod.pod_name);
            }
            (None, _) => {
                tracing::warn!(
                    "pod {} not ready within {:?}",
                    pod.pod_name,
                    self.config.pod_startup_timeout
                );
            }
        }
    }

    async fn wait_for_pod_termination(self: Arc<Self>, pod: PodLifecycleState) {
        if !self.state.lock().await.begin_wait(&pod) {
            return;
        }

        let outcome = self
            .poll_pod(&pod.pod_name, self.config.pod_termination_timeout, |status| {
                status == PodStatus::Gone
            })
            .await;
        self.state.lock().await.end_wait(&pod.pod_name);

        if outcome.is_some() {
            tracing::debug!("pod {} terminated", pod.pod_name);
            self.wait_pod_replica_creation(pod).await;
        } else {
            tracing::warn!(
                "pod {} still terminating after {:?}",
                pod.pod_name,
                self.config.pod_termination_timeout
            );
        }
    }

    async fn wait_pod_replica_creation(self: Arc<Self>, pod: PodLifecycleState) {
        if pod.generate_name.is_none() {
            return;
        }

        let this = &*self;
        let gone = &pod;
        let replica = wait_until(
            self.config.pod_poll_interval,
            self.config.pod_replica_startup_timeout,
            move || async move { this.state.lock().await.find_replica(gone) },
        )
        .await;

        match replica {
            Some(replica) => {
                tracing::debug!("pod {} replaced by {}", pod.pod_name, replica.pod_name);
                self.wait_for_pod_startup(replica).await;
            }
            None => tracing::info!(
                "no replacement for pod {} within {:?}",
                pod.pod_name,
                self.config.pod_replica_startup_timeout
            ),
        }
    }

    // Ingress

    async fn ingress_for_mapping(&self) -> Option<Arc<IngressMap>> {
        if !self.config.discover_ingress {
            return None;
        }
        if let Some(map) = self.ingress.read().await.clone() {
            return Some(map);
        }
        Some(self.request_ingress_map().await)
    }

    async fn request_ingress_map(&self) -> Arc<IngressMap> {
        let Some(api) = self.ingress_api.read().await.clone() else {
            return Arc::default();
        };

        match api.list(&ListParams::default()).await {
            Ok(list) => {
                let map = Arc::new(mapping::build_ingress_map(&list.items));
                tracing::info!("ingress map refreshed: {} routes", map.len());
                *self.ingress.write().await = Some(map.clone());
                map
            }
            Err(e) => {
                let description = format!("failed to list ingresses: {e}");
                tracing::error!("{description}");
                self.report(description);
                Arc::default()
            }
        }
    }
}
