//! Relevance filtering and `Service` to [`DiscoveredService`] mapping.

use std::collections::{BTreeMap, HashMap};

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;

use super::K8sQueryConfig;
use crate::service::{DiscoveredService, Protocol, ServicePort};

/// Ingress routes keyed by `service:port`, valued by `host/path`.
pub type IngressMap = HashMap<String, String>;

const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
const APP_VERSION_LABEL: &str = "app.kubernetes.io/version";

/// Returns true when the service carries the configured label.
pub(crate) fn is_service_relevant(config: &K8sQueryConfig, service: &Service) -> bool {
    service
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(&config.label_name))
        .is_some_and(|value| value == &config.label_value)
}

/// Returns true when every selector entry is present in `labels`.
///
/// An empty selector selects nothing, matching Kubernetes' handling of services
/// without a selector.
pub(crate) fn selector_matches(
    selector: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> bool {
    !selector.is_empty() && selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// Maps a relevant `Service` to a [`DiscoveredService`].
///
/// Returns `None` when the service lacks a name or uid.
pub(crate) fn map_service(
    config: &K8sQueryConfig,
    service: &Service,
    ingress: Option<&IngressMap>,
) -> Option<DiscoveredService> {
    let meta = &service.metadata;
    let name = meta.name.clone()?;
    let uid = meta.uid.clone()?;
    let namespace = meta.namespace.clone().unwrap_or_else(|| "default".to_string());
    let labels = meta.labels.clone().unwrap_or_default();
    let annotations = meta.annotations.clone().unwrap_or_default();

    let ports: Vec<ServicePort> = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .filter_map(|p| {
                    Some(ServicePort {
                        name: p.name.clone(),
                        port: u16::try_from(p.port).ok()?,
                        protocol: p.protocol.clone(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let (base_url, protocol) =
        calculate_base_url(config, &name, &namespace, &annotations, &ports, ingress);

    let app_name = annotations
        .get(&config.app_name_annotation)
        .or_else(|| labels.get(APP_NAME_LABEL))
        .cloned()
        .or_else(|| Some(name.clone()));
    let app_version = annotations
        .get(&config.app_version_annotation)
        .or_else(|| labels.get(APP_VERSION_LABEL))
        .cloned();

    let extra_annotations = config
        .extra_annotations
        .iter()
        .filter_map(|key| annotations.get(key).map(|v| (key.clone(), v.clone())))
        .collect();

    Some(DiscoveredService {
        name,
        uid,
        namespace,
        labels,
        ports,
        base_url,
        protocol,
        app_name,
        app_version,
        extra_annotations,
    })
}

/// Resolves the base URL and protocol of a service.
///
/// Uses the ingress route for the service port when ingress discovery is enabled
/// and a route exists, otherwise the in-cluster DNS name.
pub(crate) fn calculate_base_url(
    config: &K8sQueryConfig,
    name: &str,
    namespace: &str,
    annotations: &BTreeMap<String, String>,
    ports: &[ServicePort],
    ingress: Option<&IngressMap>,
) -> (String, Protocol) {
    let protocol = annotations
        .get(&config.protocol_annotation)
        .and_then(|p| Protocol::parse(p))
        .unwrap_or(if config.use_https {
            Protocol::Https
        } else {
            Protocol::Http
        });

    let port = select_port(config, name, annotations, ports, protocol);

    if config.discover_ingress {
        if let (Some(ingress), Some(port)) = (ingress, port.as_ref()) {
            let route = ingress.get(&format!("{name}:{}", port.port)).or_else(|| {
                port.name
                    .as_ref()
                    .and_then(|port_name| ingress.get(&format!("{name}:{port_name}")))
            });
            if let Some(route) = route {
                return (format!("{protocol}://{}", route.trim_end_matches('/')), protocol);
            }
        }
    }

    let context_root = annotations
        .get(&config.context_root_annotation)
        .map(|root| format!("/{}", root.trim_matches('/')))
        .filter(|root| root != "/")
        .unwrap_or_default();

    let url = match port {
        Some(port) => format!("{protocol}://{name}.{namespace}:{}{context_root}", port.port),
        None => format!("{protocol}://{name}.{namespace}{context_root}"),
    };
    (url, protocol)
}

/// Picks the port configuration is served on.
///
/// Preference: port annotation, port named after the protocol, first port.
fn select_port(
    config: &K8sQueryConfig,
    name: &str,
    annotations: &BTreeMap<String, String>,
    ports: &[ServicePort],
    protocol: Protocol,
) -> Option<ServicePort> {
    if let Some(annotated) = annotations.get(&config.port_annotation) {
        if let Ok(number) = annotated.trim().parse::<u16>() {
            return Some(
                ports
                    .iter()
                    .find(|p| p.port == number)
                    .cloned()
                    .unwrap_or(ServicePort {
                        name: None,
                        port: number,
                        protocol: None,
                    }),
            );
        }
        if let Some(named) = ports.iter().find(|p| p.name.as_deref() == Some(annotated.as_str())) {
            return Some(named.clone());
        }
        tracing::warn!("service {name} has unusable port annotation {annotated}");
    }

    ports
        .iter()
        .find(|p| p.name.as_deref() == Some(protocol.scheme()))
        .or_else(|| ports.first())
        .cloned()
}

/// Builds the `service:port -> host/path` map from ingress rules.
///
/// Rules without a host are skipped since they yield no addressable URL.
pub(crate) fn build_ingress_map(ingresses: &[Ingress]) -> IngressMap {
    let mut map = IngressMap::new();

    for ingress in ingresses {
        let rules = ingress.spec.as_ref().and_then(|spec| spec.rules.as_ref());
        for rule in rules.into_iter().flatten() {
            let Some(host) = rule.host.as_deref() else {
                continue;
            };
            let paths = rule.http.as_ref().map(|http| http.paths.as_slice());
            for path in paths.unwrap_or_default() {
                let Some(backend) = path.backend.service.as_ref() else {
                    continue;
                };
                let Some(port) = backend.port.as_ref() else {
                    continue;
                };
                let port_key = match (port.number, port.name.as_ref()) {
                    (Some(number), _) => number.to_string(),
                    (None, Some(name)) => name.clone(),
                    (None, None) => continue,
                };
                let route_path = path.path.as_deref().unwrap_or("/");
                let route = format!("{host}{}", normalize_path(route_path));
                map.entry(format!("{}:{port_key}", backend.name))
                    .or_insert(route);
            }
        }
    }

    map
}

/// Strips regex capture suffixes and trailing slashes from an ingress path.
fn normalize_path(path: &str) -> String {
    let path = path.split('(').next().unwrap_or_default();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
