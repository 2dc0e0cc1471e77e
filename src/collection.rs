//! Canonical, deduplicated list of discovered services.

use tokio::sync::{RwLock, broadcast};

use crate::service::{DiscoveredService, ServiceEvent};

/// Default capacity of the event channel.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Deduplicated set of services keyed by uid.
///
/// Every change is published as a [`ServiceEvent`] to all subscribers. Calls
/// that do not change the collection publish nothing.
pub struct ServiceCollection {
    services: RwLock<Vec<DiscoveredService>>,
    events: broadcast::Sender<ServiceEvent>,
}

impl ServiceCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates an empty collection whose subscribers buffer up to `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            services: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Subscribes to service lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    /// Adds a service unless one with the same uid is already present.
    pub async fn add_service(&self, service: DiscoveredService) {
        let mut services = self.services.write().await;
        if services.iter().any(|s| s.uid == service.uid) {
            tracing::debug!("service {} already in collection", service.name);
            return;
        }

        tracing::info!("service added: {} ({})", service.name, service.base_url);
        services.push(service.clone());
        self.publish(ServiceEvent::Added(service));
    }

    /// Replaces the service with the same uid. Unknown services are ignored.
    pub async fn modify_service(&self, service: DiscoveredService) {
        let mut services = self.services.write().await;
        let Some(existing) = services.iter_mut().find(|s| s.uid == service.uid) else {
            return;
        };

        tracing::info!("service modified: {}", service.name);
        *existing = service.clone();
        self.publish(ServiceEvent::Modified(service));
    }

    /// Removes the service with the same uid. Unknown services are ignored.
    pub async fn delete_service(&self, service: &DiscoveredService) {
        let mut services = self.services.write().await;
        let Some(index) = services.iter().position(|s| s.uid == service.uid) else {
            return;
        };

        let removed = services.remove(index);
        tracing::info!("service deleted: {}", removed.name);
        self.publish(ServiceEvent::Deleted(removed));
    }

    /// Re-publishes a `Modified` event for the service named `name`.
    ///
    /// Returns `false`, publishing nothing, when no such service exists.
    pub async fn force_update_service(&self, name: &str) -> bool {
        let services = self.services.read().await;
        let Some(service) = services.iter().find(|s| s.name == name) else {
            return false;
        };

        tracing::debug!("forcing update of service {name}");
        self.publish(ServiceEvent::Modified(service.clone()));
        true
    }

    /// Returns a snapshot of the current services.
    pub async fn get_services(&self) -> Vec<DiscoveredService> {
        self.services.read().await.clone()
    }

    /// Returns the current service named `name`, if any.
    pub async fn get_service(&self, name: &str) -> Option<DiscoveredService> {
        self.services
            .read()
            .await
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    fn publish(&self, event: ServiceEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

impl Default for ServiceCollection {
    fn default() -> Self {
        Self::new()
    }
}
