//! Pod tracking used by the startup, termination and replica waits.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

/// What the reconciler remembers about a pod.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PodRecord {
    pub(crate) name: String,
    pub(crate) generate_name: Option<String>,
    pub(crate) labels: BTreeMap<String, String>,
    pub(crate) ready: bool,
    pub(crate) terminating: bool,
    pub(crate) created: Option<Time>,
}

impl PodRecord {
    pub(crate) fn from_pod(pod: &Pod) -> Option<Self> {
        let meta = &pod.metadata;
        Some(Self {
            name: meta.name.clone()?,
            generate_name: meta.generate_name.clone().filter(|g| !g.is_empty()),
            labels: meta.labels.clone().unwrap_or_default(),
            ready: is_pod_ready(pod),
            terminating: meta.deletion_timestamp.is_some(),
            created: meta.creation_timestamp.clone(),
        })
    }

    pub(crate) fn lifecycle(&self, service_name: Option<String>) -> PodLifecycleState {
        PodLifecycleState {
            pod_name: self.name.clone(),
            service_name,
            generate_name: self.generate_name.clone(),
            terminating: self.terminating,
        }
    }
}

/// Ephemeral state of one pod while a startup or termination wait is running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PodLifecycleState {
    pub(crate) pod_name: String,
    pub(crate) service_name: Option<String>,
    pub(crate) generate_name: Option<String>,
    pub(crate) terminating: bool,
}

/// Outcome observed by a pod wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PodStatus {
    Starting,
    Ready,
    Terminating,
    Gone,
}

/// A pod is ready when its `Ready` condition is `True`.
pub(crate) fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Picks the replacement for `exclude` among pods sharing its generate name.
///
/// Terminating pods never qualify. The newest creation timestamp wins and
/// ties go to the greatest pod name.
pub(crate) fn find_replica<'a, I>(
    pods: I,
    generate_name: &str,
    exclude: &str,
) -> Option<&'a PodRecord>
where
    I: IntoIterator<Item = &'a PodRecord>,
{
    pods.into_iter()
        .filter(|p| p.name != exclude && !p.terminating)
        .filter(|p| p.generate_name.as_deref() == Some(generate_name))
        .max_by(|a, b| {
            a.created
                .cmp(&b.created)
                .then_with(|| a.name.cmp(&b.name))
        })
}
