//! Statically configured services published like discovered ones.
//!
//! Entries can be built in code or loaded from a JSON array:
//!
//! ```json
//! [{"name": "catalog", "url": "https://catalog.example.com/ui", "version": "1.2.0"}]
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};

use crate::error::Result;
use crate::service::{DiscoveredService, Protocol, ServiceEvent};

/// One manually configured service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualServiceConfig {
    /// Service name; identifies the entry across updates.
    pub name: String,
    /// Base URL configuration documents are fetched from.
    pub url: String,
    /// Application version.
    #[serde(default)]
    pub version: Option<String>,
    /// Application name. Defaults to `name`.
    #[serde(default)]
    pub app_name: Option<String>,
    /// Annotations exposed as extra annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ManualServiceConfig {
    /// Creates an entry for `name` served at `url`.
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Parses a JSON array of entries.
    ///
    /// # Errors
    ///
    /// Fails if `json` is not an array of entries.
    pub fn from_json(json: &str) -> Result<Vec<Self>> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<ManualServiceConfig> for DiscoveredService {
    fn from(config: ManualServiceConfig) -> Self {
        let protocol = config
            .url
            .split_once("://")
            .and_then(|(scheme, _)| Protocol::parse(scheme))
            .unwrap_or_default();

        Self {
            uid: format!("manual-{}", config.name),
            app_name: Some(config.app_name.unwrap_or_else(|| config.name.clone())),
            app_version: config.version,
            base_url: config.url.trim_end_matches('/').to_string(),
            protocol,
            extra_annotations: config.annotations,
            name: config.name,
            ..Default::default()
        }
    }
}

/// Turns a statically supplied service list into service events.
pub struct ManualServiceConfigHandler {
    services: Mutex<Vec<DiscoveredService>>,
    events: broadcast::Sender<ServiceEvent>,
}

impl ManualServiceConfigHandler {
    /// Creates a handler holding `configs`. No events are sent until
    /// [`trigger_initial_events`](Self::trigger_initial_events).
    #[must_use]
    pub fn new(configs: Vec<ManualServiceConfig>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            services: Mutex::new(dedup(configs)),
            events,
        }
    }

    /// Subscribes to service events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    /// Services currently held.
    pub async fn get_services(&self) -> Vec<DiscoveredService> {
        self.services.lock().await.clone()
    }

    /// Sends `Added` for every held service.
    pub async fn trigger_initial_events(&self) {
        let services = self.services.lock().await;
        tracing::info!("publishing {} manual services", services.len());
        for service in services.iter() {
            self.publish(ServiceEvent::Added(service.clone()));
        }
    }

    /// Replaces the held list, sending `Added`, `Modified` and `Deleted`
    /// events for the differences. Entries are matched by name.
    pub async fn handle_service_config_change(&self, configs: Vec<ManualServiceConfig>) {
        let updated = dedup(configs);
        let mut services = self.services.lock().await;

        for service in &updated {
            match services.iter().find(|s| s.name == service.name) {
                None => {
                    tracing::info!("manual service added: {}", service.name);
                    self.publish(ServiceEvent::Added(service.clone()));
                }
                Some(previous) if previous != service => {
                    tracing::info!("manual service modified: {}", service.name);
                    self.publish(ServiceEvent::Modified(service.clone()));
                }
                Some(_) => {}
            }
        }

        for service in services.iter() {
            if !updated.iter().any(|s| s.name == service.name) {
                tracing::info!("manual service deleted: {}", service.name);
                self.publish(ServiceEvent::Deleted(service.clone()));
            }
        }

        *services = updated;
    }

    fn publish(&self, event: ServiceEvent) {
        let _ = self.events.send(event);
    }
}

/// Converts the entries, keeping the first of each name.
fn dedup(configs: Vec<ManualServiceConfig>) -> Vec<DiscoveredService> {
    let mut services: Vec<DiscoveredService> = Vec::with_capacity(configs.len());
    for config in configs {
        if services.iter().any(|s| s.name == config.name) {
            tracing::warn!("duplicate manual service {}, ignoring", config.name);
            continue;
        }
        services.push(config.into());
    }
    services
}
