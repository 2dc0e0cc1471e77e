//! Reconciled cluster view.
//!
//! Every event handler here is synchronous and returns the [`Action`]s the
//! caller has to carry out, so the reconciliation rules can be tested without
//! a cluster.

use std::collections::{HashMap, HashSet};

use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;

use super::K8sQueryConfig;
use super::endpoints::{EndpointSet, extract_ready_addresses, service_name_for_slice};
use super::mapping::{IngressMap, is_service_relevant, map_service, selector_matches};
use super::pods::{PodLifecycleState, PodRecord, PodStatus, find_replica};
use crate::metric::ResourceKind;
use crate::service::DiscoveredService;

/// Side effect requested by the reconciler.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Action {
    /// Add the service to the collection.
    Add(DiscoveredService),
    /// Replace the service in the collection.
    Modify(DiscoveredService),
    /// Remove the service from the collection.
    Delete(DiscoveredService),
    /// Re-check readiness of the named service after the grace period.
    ///
    /// Only the check of the current not-ready spell may remove the service.
    GraceCheck {
        service_name: String,
        generation: u64,
    },
    /// Wait for a new pod to become ready.
    AwaitStartup(PodLifecycleState),
    /// Wait for a terminating pod to disappear.
    AwaitTermination(PodLifecycleState),
    /// Wait for a deleted pod to be replaced.
    AwaitReplica(PodLifecycleState),
}

pub(crate) struct ClusterState {
    config: K8sQueryConfig,
    /// Relevant services by name, already mapped.
    services: HashMap<String, Service>,
    mapped: HashMap<String, DiscoveredService>,
    /// What the collection currently holds, by service name.
    published: HashMap<String, DiscoveredService>,
    endpoints: HashMap<String, EndpointSet>,
    /// Slice name to owning service name.
    slice_owner: HashMap<String, String>,
    pods: HashMap<String, PodRecord>,
    pending: HashMap<String, PodLifecycleState>,
    resync: HashMap<ResourceKind, HashSet<String>>,
    /// Grace check generation of published services that lost readiness.
    unready: HashMap<String, u64>,
    next_generation: u64,
}

impl ClusterState {
    pub(crate) fn new(config: K8sQueryConfig) -> Self {
        Self {
            config,
            services: HashMap::new(),
            mapped: HashMap::new(),
            published: HashMap::new(),
            endpoints: HashMap::new(),
            slice_owner: HashMap::new(),
            pods: HashMap::new(),
            pending: HashMap::new(),
            resync: HashMap::new(),
            unready: HashMap::new(),
            next_generation: 0,
        }
    }

    fn is_ready(&self, service_name: &str) -> bool {
        self.endpoints
            .get(service_name)
            .is_some_and(EndpointSet::is_ready)
    }

    /// Names of the tracked resources of `kind`.
    pub(crate) fn tracked(&self, kind: ResourceKind) -> Vec<String> {
        match kind {
            ResourceKind::Service => self.services.keys().cloned().collect(),
            ResourceKind::Endpoint => self.slice_owner.keys().cloned().collect(),
            ResourceKind::Pod => self.pods.keys().cloned().collect(),
        }
    }

    /// Services currently published to the collection.
    pub(crate) fn published(&self) -> Vec<DiscoveredService> {
        self.published.values().cloned().collect()
    }

    // Relist handling

    pub(crate) fn begin_resync(&mut self, kind: ResourceKind) {
        self.resync.insert(kind, HashSet::new());
    }

    pub(crate) fn mark_seen(&mut self, kind: ResourceKind, name: &str) {
        if let Some(seen) = self.resync.get_mut(&kind) {
            seen.insert(name.to_string());
        }
    }

    /// Treats every tracked resource missing from the relist as deleted.
    pub(crate) fn finish_resync(&mut self, kind: ResourceKind) -> Vec<Action> {
        let Some(seen) = self.resync.remove(&kind) else {
            return Vec::new();
        };
        let stale: Vec<String> = self
            .tracked(kind)
            .into_iter()
            .filter(|name| !seen.contains(name))
            .collect();

        let mut actions = Vec::new();
        for name in stale {
            tracing::debug!("{kind} {name} vanished while the watch was down");
            match kind {
                ResourceKind::Service => actions.extend(self.delete_service(&name)),
                ResourceKind::Endpoint => actions.extend(self.remove_slice(&name)),
                ResourceKind::Pod => actions.extend(self.delete_pod(&name, false)),
            }
        }
        actions
    }

    // Services

    /// Applies an added or modified `Service`.
    pub(crate) fn apply_service(
        &mut self,
        service: Service,
        ingress: Option<&IngressMap>,
    ) -> Vec<Action> {
        let Some(name) = service.metadata.name.clone() else {
            return Vec::new();
        };

        if !is_service_relevant(&self.config, &service) {
            // A label change can make a tracked service irrelevant.
            return self.delete_service(&name);
        }

        let Some(mapped) = map_service(&self.config, &service, ingress) else {
            tracing::warn!("service {name} has no uid, ignoring");
            return Vec::new();
        };
        self.services.insert(name.clone(), service);
        self.mapped.insert(name.clone(), mapped.clone());

        match self.published.get(&name) {
            Some(current) if current.uid != mapped.uid => {
                // Recreated under the same name while we were not looking.
                let old = current.clone();
                let mut actions = vec![Action::Delete(old)];
                self.published.remove(&name);
                if self.is_ready(&name) {
                    self.published.insert(name, mapped.clone());
                    actions.push(Action::Add(mapped));
                }
                actions
            }
            Some(current) if *current != mapped => {
                self.published.insert(name, mapped.clone());
                vec![Action::Modify(mapped)]
            }
            Some(_) => Vec::new(),
            None if self.is_ready(&name) => {
                self.published.insert(name, mapped.clone());
                vec![Action::Add(mapped)]
            }
            None => {
                tracing::debug!("service {name} has no ready endpoints yet");
                Vec::new()
            }
        }
    }

    /// Forgets a deleted `Service`.
    pub(crate) fn delete_service(&mut self, name: &str) -> Vec<Action> {
        self.services.remove(name);
        self.mapped.remove(name);
        self.unready.remove(name);
        match self.published.remove(name) {
            Some(service) => vec![Action::Delete(service)],
            None => Vec::new(),
        }
    }

    /// Removes a published service that stayed not ready for the whole
    /// spell `generation` was issued for.
    pub(crate) fn grace_check(&mut self, name: &str, generation: u64) -> Vec<Action> {
        if self.is_ready(name) || self.unready.get(name) != Some(&generation) {
            tracing::debug!("grace check {generation} of {name} is stale");
            return Vec::new();
        }
        self.unready.remove(name);
        match self.published.remove(name) {
            Some(service) => {
                tracing::info!("service {name} has no ready endpoints, removing");
                vec![Action::Delete(service)]
            }
            None => Vec::new(),
        }
    }

    // Endpoints

    /// Applies an added or modified `EndpointSlice`.
    ///
    /// Slices are recorded even before their service is known, so either
    /// arrival order yields the same result.
    pub(crate) fn apply_endpoint_slice(&mut self, slice: &EndpointSlice) -> Vec<Action> {
        let (Some(slice_name), Some(service_name)) =
            (slice.metadata.name.as_deref(), service_name_for_slice(slice))
        else {
            return Vec::new();
        };

        let ready = extract_ready_addresses(slice);
        let was_ready = self.is_ready(service_name);
        self.endpoints
            .entry(service_name.to_string())
            .or_default()
            .apply(slice_name, ready);
        self.slice_owner
            .insert(slice_name.to_string(), service_name.to_string());

        self.readiness_transition(service_name, was_ready)
    }

    /// Forgets a deleted `EndpointSlice`.
    pub(crate) fn delete_endpoint_slice(&mut self, slice: &EndpointSlice) -> Vec<Action> {
        match slice.metadata.name.as_deref() {
            Some(slice_name) => self.remove_slice(slice_name),
            None => Vec::new(),
        }
    }

    fn remove_slice(&mut self, slice_name: &str) -> Vec<Action> {
        let Some(service_name) = self.slice_owner.remove(slice_name) else {
            return Vec::new();
        };
        let was_ready = self.is_ready(&service_name);
        if let Some(set) = self.endpoints.get_mut(&service_name) {
            set.remove(slice_name);
            if set.is_empty() {
                self.endpoints.remove(&service_name);
            }
        }
        self.readiness_transition(&service_name, was_ready)
    }

    /// Only services we track are relevant; others are recorded and ignored.
    fn is_endpoint_relevant(&self, service_name: &str) -> bool {
        self.mapped.contains_key(service_name)
    }

    fn readiness_transition(&mut self, service_name: &str, was_ready: bool) -> Vec<Action> {
        if !self.is_endpoint_relevant(service_name) {
            return Vec::new();
        }

        let now_ready = self.is_ready(service_name);
        if now_ready {
            self.unready.remove(service_name);
        }
        tracing::debug!(
            "endpoints of {service_name}: {} ready",
            self.endpoints
                .get(service_name)
                .map_or(0, EndpointSet::ready_count)
        );

        match (was_ready, now_ready) {
            (false, true) if !self.published.contains_key(service_name) => {
                let Some(mapped) = self.mapped.get(service_name).cloned() else {
                    return Vec::new();
                };
                self.published.insert(service_name.to_string(), mapped.clone());
                vec![Action::Add(mapped)]
            }
            (true, false) if self.published.contains_key(service_name) => {
                let generation = self.next_generation;
                self.next_generation += 1;
                self.unready.insert(service_name.to_string(), generation);
                vec![Action::GraceCheck {
                    service_name: service_name.to_string(),
                    generation,
                }]
            }
            _ => Vec::new(),
        }
    }

    // Pods

    /// Name of the tracked service whose selector matches the pod labels.
    pub(crate) fn service_name_for_pod(&self, record: &PodRecord) -> Option<String> {
        self.services
            .iter()
            .filter(|(_, svc)| {
                svc.spec
                    .as_ref()
                    .and_then(|spec| spec.selector.as_ref())
                    .is_some_and(|selector| selector_matches(selector, &record.labels))
            })
            .map(|(name, _)| name.clone())
            .min()
    }

    /// Applies an added or modified `Pod`.
    ///
    /// `initial` marks pods delivered by a (re)list; those never trigger a
    /// startup wait.
    pub(crate) fn apply_pod(&mut self, pod: &Pod, initial: bool) -> Vec<Action> {
        let Some(record) = PodRecord::from_pod(pod) else {
            return Vec::new();
        };
        let service_name = self.service_name_for_pod(&record);
        let previous = self.pods.insert(record.name.clone(), record.clone());

        let mut actions = Vec::new();
        if !initial && previous.is_none() && !record.ready && !record.terminating {
            actions.push(Action::AwaitStartup(record.lifecycle(service_name.clone())));
        }
        let was_terminating = previous.is_some_and(|p| p.terminating);
        if record.terminating && !was_terminating {
            actions.push(Action::AwaitTermination(record.lifecycle(service_name)));
        }
        actions
    }

    /// Forgets a deleted `Pod`.
    ///
    /// With `track_replica`, a pod owned by a controller triggers a wait for
    /// its replacement unless a termination wait is already following it.
    pub(crate) fn delete_pod(&mut self, name: &str, track_replica: bool) -> Vec<Action> {
        let Some(mut record) = self.pods.remove(name) else {
            return Vec::new();
        };
        let followed = self.pending.get(name).is_some_and(|s| s.terminating);
        if !track_replica || followed || record.generate_name.is_none() {
            return Vec::new();
        }
        record.terminating = true;
        let service_name = self.service_name_for_pod(&record);
        vec![Action::AwaitReplica(record.lifecycle(service_name))]
    }

    pub(crate) fn pod_status(&self, name: &str) -> PodStatus {
        match self.pods.get(name) {
            None => PodStatus::Gone,
            Some(p) if p.terminating => PodStatus::Terminating,
            Some(p) if p.ready => PodStatus::Ready,
            Some(_) => PodStatus::Starting,
        }
    }

    pub(crate) fn find_replica(&self, lifecycle: &PodLifecycleState) -> Option<PodLifecycleState> {
        let generate_name = lifecycle.generate_name.as_deref()?;
        let replica = find_replica(self.pods.values(), generate_name, &lifecycle.pod_name)?;
        let service_name = self
            .service_name_for_pod(replica)
            .or_else(|| lifecycle.service_name.clone());
        Some(replica.lifecycle(service_name))
    }

    /// Registers a running wait. Returns false if the pod is already followed.
    pub(crate) fn begin_wait(&mut self, lifecycle: &PodLifecycleState) -> bool {
        match self.pending.get(&lifecycle.pod_name) {
            Some(existing) if existing.terminating == lifecycle.terminating => false,
            _ => {
                self.pending
                    .insert(lifecycle.pod_name.clone(), lifecycle.clone());
                true
            }
        }
    }

    pub(crate) fn end_wait(&mut self, pod_name: &str) {
        self.pending.remove(pod_name);
    }

    /// Resolves the service of a pod wait, preferring the current mapping.
    pub(crate) fn service_for_wait(&self, lifecycle: &PodLifecycleState) -> Option<String> {
        self.pods
            .get(&lifecycle.pod_name)
            .and_then(|record| self.service_name_for_pod(record))
            .or_else(|| lifecycle.service_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use k8s_openapi::api::discovery::v1::{Endpoint, EndpointConditions};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::json;

    use super::super::endpoints::SERVICE_NAME_LABEL;
    use super::*;

    const LABEL: &str = "ui.example.com/discoverable";

    fn state() -> ClusterState {
        ClusterState::new(K8sQueryConfig::new(LABEL, "true"))
    }

    fn make_service(name: &str, uid: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("prod".to_string()),
                uid: Some(uid.to_string()),
                labels: Some(BTreeMap::from([(LABEL.to_string(), "true".to_string())])),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(BTreeMap::from([("app".to_string(), name.to_string())])),
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port: 8080,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn make_slice(name: &str, service: &str, ready: &[bool]) -> EndpointSlice {
        EndpointSlice {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    SERVICE_NAME_LABEL.to_string(),
                    service.to_string(),
                )])),
                ..Default::default()
            },
            endpoints: ready
                .iter()
                .enumerate()
                .map(|(i, ready)| Endpoint {
                    addresses: vec![format!("10.0.0.{}", i + 1)],
                    conditions: Some(EndpointConditions {
                        ready: Some(*ready),
                        ..Default::default()
                    }),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn make_pod(name: &str, app: &str, ready: bool, terminating: bool) -> Pod {
        let mut value = json!({
            "metadata": {
                "name": name,
                "generateName": format!("{app}-5c6d-"),
                "creationTimestamp": "2026-01-01T00:00:00Z",
                "labels": { "app": app }
            },
            "status": {
                "conditions": [{ "type": "Ready", "status": if ready { "True" } else { "False" } }]
            }
        });
        if terminating {
            value["metadata"]["deletionTimestamp"] = json!("2026-01-01T00:10:00Z");
        }
        serde_json::from_value(value).unwrap()
    }

    fn names(actions: &[Action]) -> Vec<String> {
        actions
            .iter()
            .map(|a| match a {
                Action::Add(s) => format!("add:{}", s.name),
                Action::Modify(s) => format!("modify:{}", s.name),
                Action::Delete(s) => format!("delete:{}", s.name),
                Action::GraceCheck { service_name, .. } => format!("grace:{service_name}"),
                Action::AwaitStartup(p) => format!("startup:{}", p.pod_name),
                Action::AwaitTermination(p) => format!("termination:{}", p.pod_name),
                Action::AwaitReplica(p) => format!("replica:{}", p.pod_name),
            })
            .collect()
    }

    fn generation(action: &Action) -> u64 {
        match action {
            Action::GraceCheck { generation, .. } => *generation,
            other => panic!("unexpected {other:?}"),
        }
    }

    // Service / endpoint ordering tests

    #[test]
    fn service_then_ready_endpoint_publishes() {
        let mut state = state();

        assert!(state.apply_service(make_service("catalog", "u1"), None).is_empty());
        let actions = state.apply_endpoint_slice(&make_slice("catalog-x", "catalog", &[true]));

        assert_eq!(names(&actions), vec!["add:catalog"]);
        assert_eq!(state.published().len(), 1);
    }

    #[test]
    fn endpoint_before_service_publishes_on_service() {
        let mut state = state();

        assert!(state
            .apply_endpoint_slice(&make_slice("catalog-x", "catalog", &[true]))
            .is_empty());
        let actions = state.apply_service(make_service("catalog", "u1"), None);

        assert_eq!(names(&actions), vec!["add:catalog"]);
    }

    #[test]
    fn not_ready_endpoints_do_not_publish() {
        let mut state = state();
        state.apply_service(make_service("catalog", "u1"), None);

        let slice = make_slice("catalog-x", "catalog", &[false, false]);
        let actions = state.apply_endpoint_slice(&slice);

        assert!(actions.is_empty());
        assert!(state.published().is_empty());
    }

    #[test]
    fn irrelevant_endpoint_is_ignored() {
        let mut state = state();
        state.apply_service(make_service("catalog", "u1"), None);

        let actions = state.apply_endpoint_slice(&make_slice("other-x", "other", &[true]));

        assert!(actions.is_empty());
    }

    #[test]
    fn losing_readiness_schedules_grace_check() {
        let mut state = state();
        state.apply_service(make_service("catalog", "u1"), None);
        state.apply_endpoint_slice(&make_slice("catalog-x", "catalog", &[true]));

        let actions = state.apply_endpoint_slice(&make_slice("catalog-x", "catalog", &[false]));
        assert_eq!(names(&actions), vec!["grace:catalog"]);

        let actions = state.grace_check("catalog", generation(&actions[0]));
        assert_eq!(names(&actions), vec!["delete:catalog"]);
        assert!(state.published().is_empty());
    }

    #[test]
    fn grace_check_keeps_recovered_service() {
        let mut state = state();
        state.apply_service(make_service("catalog", "u1"), None);
        state.apply_endpoint_slice(&make_slice("catalog-x", "catalog", &[true]));
        let lost = state.apply_endpoint_slice(&make_slice("catalog-x", "catalog", &[false]));
        state.apply_endpoint_slice(&make_slice("catalog-x", "catalog", &[true]));

        assert!(state.grace_check("catalog", generation(&lost[0])).is_empty());
        assert_eq!(state.published().len(), 1);
    }

    #[test]
    fn grace_check_of_earlier_spell_is_stale() {
        let mut state = state();
        state.apply_service(make_service("catalog", "u1"), None);
        state.apply_endpoint_slice(&make_slice("catalog-x", "catalog", &[true]));
        let first = state.apply_endpoint_slice(&make_slice("catalog-x", "catalog", &[false]));
        state.apply_endpoint_slice(&make_slice("catalog-x", "catalog", &[true]));
        let second = state.apply_endpoint_slice(&make_slice("catalog-x", "catalog", &[false]));

        assert!(state.grace_check("catalog", generation(&first[0])).is_empty());
        assert_eq!(state.published().len(), 1);

        let actions = state.grace_check("catalog", generation(&second[0]));
        assert_eq!(names(&actions), vec!["delete:catalog"]);
    }

    #[test]
    fn deleting_last_slice_schedules_grace_check() {
        let mut state = state();
        let slice = make_slice("catalog-x", "catalog", &[true]);
        state.apply_service(make_service("catalog", "u1"), None);
        state.apply_endpoint_slice(&slice);

        let actions = state.delete_endpoint_slice(&slice);

        assert_eq!(names(&actions), vec!["grace:catalog"]);
    }

    #[test]
    fn modified_service_emits_modify_once() {
        let mut state = state();
        state.apply_service(make_service("catalog", "u1"), None);
        state.apply_endpoint_slice(&make_slice("catalog-x", "catalog", &[true]));

        let mut changed = make_service("catalog", "u1");
        changed
            .metadata
            .labels
            .as_mut()
            .unwrap()
            .insert("app.kubernetes.io/version".to_string(), "2.0.0".to_string());

        assert_eq!(names(&state.apply_service(changed.clone(), None)), vec!["modify:catalog"]);
        assert!(state.apply_service(changed, None).is_empty());
    }

    #[test]
    fn recreated_service_replaces_published_entry() {
        let mut state = state();
        state.apply_service(make_service("catalog", "u1"), None);
        state.apply_endpoint_slice(&make_slice("catalog-x", "catalog", &[true]));

        let actions = state.apply_service(make_service("catalog", "u2"), None);

        assert_eq!(names(&actions), vec!["delete:catalog", "add:catalog"]);
        assert_eq!(state.published()[0].uid, "u2");
    }

    #[test]
    fn service_losing_label_is_deleted() {
        let mut state = state();
        state.apply_service(make_service("catalog", "u1"), None);
        state.apply_endpoint_slice(&make_slice("catalog-x", "catalog", &[true]));

        let mut unlabelled = make_service("catalog", "u1");
        unlabelled.metadata.labels = None;

        assert_eq!(names(&state.apply_service(unlabelled, None)), vec!["delete:catalog"]);
    }

    #[test]
    fn deleted_service_is_removed() {
        let mut state = state();
        state.apply_service(make_service("catalog", "u1"), None);
        state.apply_endpoint_slice(&make_slice("catalog-x", "catalog", &[true]));

        assert_eq!(names(&state.delete_service("catalog")), vec!["delete:catalog"]);
        assert!(state.delete_service("catalog").is_empty());
    }

    // Relist tests

    #[test]
    fn resync_deletes_unseen_services() {
        let mut state = state();
        state.apply_service(make_service("catalog", "u1"), None);
        state.apply_service(make_service("cart", "u2"), None);
        state.apply_endpoint_slice(&make_slice("catalog-x", "catalog", &[true]));
        state.apply_endpoint_slice(&make_slice("cart-x", "cart", &[true]));

        state.begin_resync(ResourceKind::Service);
        state.mark_seen(ResourceKind::Service, "cart");
        let actions = state.finish_resync(ResourceKind::Service);

        assert_eq!(names(&actions), vec!["delete:catalog"]);
        assert_eq!(state.tracked(ResourceKind::Service), vec!["cart".to_string()]);
    }

    #[test]
    fn resync_removes_unseen_slices() {
        let mut state = state();
        state.apply_service(make_service("catalog", "u1"), None);
        state.apply_endpoint_slice(&make_slice("catalog-x", "catalog", &[true]));

        state.begin_resync(ResourceKind::Endpoint);
        let actions = state.finish_resync(ResourceKind::Endpoint);

        assert_eq!(names(&actions), vec!["grace:catalog"]);
        assert!(state.tracked(ResourceKind::Endpoint).is_empty());
    }

    #[test]
    fn finish_without_begin_is_noop() {
        let mut state = state();
        state.apply_service(make_service("catalog", "u1"), None);

        assert!(state.finish_resync(ResourceKind::Service).is_empty());
    }

    // Pod tests

    #[test]
    fn new_pod_awaits_startup() {
        let mut state = state();
        state.apply_service(make_service("catalog", "u1"), None);

        let actions = state.apply_pod(&make_pod("catalog-5c6d-a", "catalog", false, false), false);

        assert_eq!(names(&actions), vec!["startup:catalog-5c6d-a"]);
        match &actions[0] {
            Action::AwaitStartup(p) => assert_eq!(p.service_name.as_deref(), Some("catalog")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn listed_or_ready_pods_do_not_await_startup() {
        let mut state = state();

        assert!(state
            .apply_pod(&make_pod("catalog-5c6d-a", "catalog", false, false), true)
            .is_empty());
        assert!(state
            .apply_pod(&make_pod("catalog-5c6d-b", "catalog", true, false), false)
            .is_empty());
    }

    #[test]
    fn terminating_pod_awaits_termination_once() {
        let mut state = state();
        state.apply_pod(&make_pod("catalog-5c6d-a", "catalog", true, false), true);

        let terminating = make_pod("catalog-5c6d-a", "catalog", true, true);
        assert_eq!(
            names(&state.apply_pod(&terminating, false)),
            vec!["termination:catalog-5c6d-a"]
        );
        assert!(state.apply_pod(&terminating, false).is_empty());
        assert_eq!(state.pod_status("catalog-5c6d-a"), PodStatus::Terminating);
    }

    #[test]
    fn deleted_pod_awaits_replica() {
        let mut state = state();
        state.apply_pod(&make_pod("catalog-5c6d-a", "catalog", true, false), true);

        let actions = state.delete_pod("catalog-5c6d-a", true);

        assert_eq!(names(&actions), vec!["replica:catalog-5c6d-a"]);
        assert_eq!(state.pod_status("catalog-5c6d-a"), PodStatus::Gone);
    }

    #[test]
    fn deleted_pod_followed_by_termination_wait_skips_replica() {
        let mut state = state();
        let pod = make_pod("catalog-5c6d-a", "catalog", true, true);
        state.apply_pod(&pod, false);
        let record = PodRecord::from_pod(&pod).unwrap();
        assert!(state.begin_wait(&record.lifecycle(None)));

        assert!(state.delete_pod("catalog-5c6d-a", true).is_empty());
    }

    #[test]
    fn replica_lookup_and_wait_registration() {
        let mut state = state();
        state.apply_service(make_service("catalog", "u1"), None);
        state.apply_pod(&make_pod("catalog-5c6d-a", "catalog", true, false), true);
        let Action::AwaitReplica(gone) = state.delete_pod("catalog-5c6d-a", true).remove(0) else {
            panic!("expected replica wait");
        };

        assert!(state.find_replica(&gone).is_none());

        state.apply_pod(&make_pod("catalog-5c6d-b", "catalog", false, false), false);
        let replica = state.find_replica(&gone).unwrap();
        assert_eq!(replica.pod_name, "catalog-5c6d-b");
        assert_eq!(replica.service_name.as_deref(), Some("catalog"));

        assert!(state.begin_wait(&replica));
        assert!(!state.begin_wait(&replica));
        state.end_wait("catalog-5c6d-b");
        assert!(state.begin_wait(&replica));
    }
}
