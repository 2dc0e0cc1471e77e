#![deny(missing_docs)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Kubernetes service discovery and configuration synchronization.
//!
//! Applications composed of many independently deployed services often need
//! each service to contribute a configuration document (menus, routes, feature
//! flags) to a shared frontend. This crate discovers those services in the
//! cluster, fetches and validates their documents, and keeps every replica of
//! the consuming deployment in sync.
//!
//! # Features
//!
//! - **Kubernetes discovery**: `Service`, `EndpointSlice` and `Pod` watches with
//!   automatic reconnection, readiness tracking and pod-restart refreshes
//! - **Manual services**: statically configured services published through the
//!   same events as discovered ones
//! - **Validated configuration**: per-service documents checked against JSON
//!   Schema, retried with exponential backoff
//! - **Replica synchronization**: refresh requests replayed on every peer pod
//!   behind a headless service
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use k8s_config_sync::{
//!     Collaborators, ConfigQueryConfig, ConfigQueryItem, ConfigQueryService, K8sQueryConfig,
//!     K8sQueryService, ServiceCollection,
//! };
//!
//! let collection = Arc::new(ServiceCollection::new());
//!
//! // Fetch ui-config.json from every discovered service
//! let schema = serde_json::json!({"type": "object"});
//! let item = ConfigQueryItem::new("ui-config", "ui-config.json", schema);
//! let collaborators = Collaborators::default();
//! let config = ConfigQueryConfig::default();
//! let configs = ConfigQueryService::new(vec![item], config, &collaborators)?;
//! configs.attach(collection.subscribe());
//!
//! // Discover services labelled ui.example.com/discoverable=true
//! let config = K8sQueryConfig::new("ui.example.com/discoverable", "true")
//!     .pod_label_selector("app.kubernetes.io/part-of=shop");
//! let discovery = K8sQueryService::new(config, collection.clone());
//! discovery.start_watching().await?;
//! ```

mod collaborators;
mod collection;
mod config_query;
mod error;
mod fault;
mod k8s;
mod manual;
mod metric;
mod service;
mod sync;
mod tls;
mod wait;

pub use collaborators::Collaborators;
pub use collection::ServiceCollection;
pub use config_query::{
    ConfigEvent, ConfigFetcher, ConfigQueryConfig, ConfigQueryItem, ConfigQueryService,
    HttpConfigFetcher, MAX_LOOP_ID,
};
pub use error::{Error, Result};
pub use fault::{FaultIndication, FaultReporter, K8S_UNAVAILABLE};
pub use k8s::{DEFAULT_SERVICE_ACCOUNT_DIR, IngressMap, K8sQueryConfig, K8sQueryService};
pub use manual::{ManualServiceConfig, ManualServiceConfigHandler};
pub use metric::{Gauge, InMemoryMetrics, MetricsSink, ResourceKind, ResourceMetric, ValidatedGauge};
pub use service::{DiscoveredService, Protocol, ServiceEvent, ServicePort};
pub use sync::{
    DnsPeerResolver, HttpRefreshSender, PeerResolver, RefreshRequest, RefreshSender, SyncConfig,
    SynchronizationService, TLS_TYPE_INTERNAL_REFRESH, VIA_HEADER,
};
pub use tls::{CertificateManager, TlsOptions};
pub use wait::{wait, wait_until};
