//! Per-service endpoint readiness derived from `EndpointSlice` resources.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use k8s_openapi::api::discovery::v1::EndpointSlice;

/// Label linking an `EndpointSlice` to its `Service`.
pub(crate) const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Returns the name of the service owning `slice`.
pub(crate) fn service_name_for_slice(slice: &EndpointSlice) -> Option<&str> {
    slice
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(SERVICE_NAME_LABEL))
        .map(String::as_str)
}

/// Extracts ready endpoint addresses from an `EndpointSlice`.
pub(crate) fn extract_ready_addresses(slice: &EndpointSlice) -> HashSet<IpAddr> {
    let mut addrs = HashSet::new();

    for ep in &slice.endpoints {
        // An endpoint is ready if conditions.ready is true or unset (defaults to true)
        let ready = ep.conditions.as_ref().and_then(|c| c.ready).unwrap_or(true);

        if !ready {
            continue;
        }

        for addr in &ep.addresses {
            if let Ok(ip) = addr.parse::<IpAddr>() {
                addrs.insert(ip);
            }
        }
    }

    addrs
}

/// Ready addresses of one service, aggregated over all of its slices.
///
/// The service is ready iff at least one address is ready.
#[derive(Debug, Default)]
pub(crate) struct EndpointSet {
    slices: HashMap<String, HashSet<IpAddr>>,
}

impl EndpointSet {
    /// Replaces the ready addresses contributed by `slice_name`.
    pub(crate) fn apply(&mut self, slice_name: &str, ready: HashSet<IpAddr>) {
        self.slices.insert(slice_name.to_string(), ready);
    }

    /// Drops the addresses contributed by `slice_name`.
    pub(crate) fn remove(&mut self, slice_name: &str) {
        self.slices.remove(slice_name);
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.slices.values().any(|addrs| !addrs.is_empty())
    }

    pub(crate) fn ready_count(&self) -> usize {
        self.slices
            .values()
            .flatten()
            .collect::<HashSet<_>>()
            .len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}
