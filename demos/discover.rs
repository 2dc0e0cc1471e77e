//! Discovery example wiring Kubernetes discovery to configuration fetching.
//!
//! Watches services labelled `DISCOVERY_LABEL=DISCOVERY_VALUE`, fetches
//! `CONFIG_FILE` from every service that becomes ready and prints the cached
//! documents periodically.
//!
//! # Running in Kubernetes
//!
//! The example expects to run inside a cluster with permission to list and
//! watch Services, EndpointSlices, Pods and Ingresses in its namespace.
//! Outside a cluster the current kubeconfig context is used.
//!
//! # Environment Variables
//!
//! - `DISCOVERY_LABEL`: label selecting services (default: ui.example.com/discoverable)
//! - `DISCOVERY_VALUE`: required label value (default: true)
//! - `DISCOVERY_NAMESPACE`: namespace (default: uses pod's namespace)
//! - `POD_SELECTOR`: label selector of the pod watch (default: the service selector)
//! - `CONFIG_FILE`: document fetched from each service (default: ui-config.json)
//! - `REPORT_COUNT`: number of reports to print (default: 10)
//! - `REPORT_INTERVAL_MS`: milliseconds between reports (default: 5000)

use std::env;
use std::sync::Arc;
use std::time::Duration;

use k8s_config_sync::{
    Collaborators, ConfigEvent, ConfigQueryConfig, ConfigQueryItem, ConfigQueryService,
    InMemoryMetrics, K8sQueryConfig, K8sQueryService, ServiceCollection,
};
use tokio::time::sleep;
use tracing::{Level, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let label =
        env::var("DISCOVERY_LABEL").unwrap_or_else(|_| "ui.example.com/discoverable".to_string());
    let value = env::var("DISCOVERY_VALUE").unwrap_or_else(|_| "true".to_string());
    let namespace = env::var("DISCOVERY_NAMESPACE").ok();
    let pod_selector = env::var("POD_SELECTOR").ok();
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "ui-config.json".to_string());
    let report_count: u32 = env::var("REPORT_COUNT")
        .ok()
        .and_then(|c| c.parse().ok())
        .unwrap_or(10);
    let report_interval_ms: u64 = env::var("REPORT_INTERVAL_MS")
        .ok()
        .and_then(|i| i.parse().ok())
        .unwrap_or(5000);

    info!("Discovering services labelled {label}={value}");
    info!("Fetching {config_file} from each service");

    let metrics = Arc::new(InMemoryMetrics::new());
    let collaborators = Collaborators::default().metrics(metrics.clone());
    let collection = Arc::new(ServiceCollection::new());

    let schema = serde_json::json!({ "type": "object" });
    let item = ConfigQueryItem::new("ui-config", &config_file, schema).limit_of_tries(5);
    let configs =
        ConfigQueryService::new(vec![item], ConfigQueryConfig::default(), &collaborators)?;
    configs.attach(collection.subscribe());

    let mut config_events = configs.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = config_events.recv().await {
            match event {
                ConfigEvent::Updated { config_name, service } => {
                    info!("{config_name} updated by {} ({})", service.name, service.base_url);
                }
                ConfigEvent::Deleted { config_name, service } => {
                    info!("{config_name} of {} removed", service.name);
                }
            }
        }
    });

    let mut config = K8sQueryConfig::new(label, value);
    if let Some(ns) = namespace {
        config = config.namespace(ns);
    }
    if let Some(selector) = pod_selector {
        config = config.pod_label_selector(selector);
    }
    let discovery = K8sQueryService::with_collaborators(config, collection.clone(), collaborators);
    discovery.start_watching().await?;

    for i in 1..=report_count {
        sleep(Duration::from_millis(report_interval_ms)).await;

        let services = collection.get_services().await;
        let documents = configs.get_config("ui-config");
        info!("Report {i}: {} services, {} documents", services.len(), documents.len());
        for service in &services {
            match documents.get(&service.name) {
                Some(document) => info!("  {}: {document}", service.name),
                None => warn!("  {}: no document yet", service.name),
            }
        }
        info!("Metrics:\n{}", metrics.render());
    }

    discovery.stop_watching().await;
    Ok(())
}
