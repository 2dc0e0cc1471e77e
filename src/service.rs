//! The discovered service model shared by every discovery source.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Protocol used to reach a discovered service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain HTTP.
    #[default]
    Http,
    /// HTTP over TLS.
    Https,
}

impl Protocol {
    /// Returns the URL scheme for this protocol.
    #[must_use]
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    /// Parses a protocol name, ignoring case. Unknown names yield `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// A port exposed by a discovered service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    /// The port name, if the service names it.
    pub name: Option<String>,
    /// The port number.
    pub port: u16,
    /// The transport protocol (`TCP`, `UDP`, ...).
    pub protocol: Option<String>,
}

/// One addressable backend service.
///
/// Services are identified by `uid`; two values with the same uid describe the
/// same backend at different points in time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredService {
    /// The service name.
    pub name: String,
    /// Unique identity of the service.
    pub uid: String,
    /// The namespace the service lives in.
    pub namespace: String,
    /// Labels attached to the service.
    pub labels: BTreeMap<String, String>,
    /// Ports exposed by the service.
    pub ports: Vec<ServicePort>,
    /// Base URL configuration documents are fetched from.
    pub base_url: String,
    /// Protocol of `base_url`.
    pub protocol: Protocol,
    /// Application name reported by the service.
    pub app_name: Option<String>,
    /// Application version reported by the service.
    pub app_version: Option<String>,
    /// Extra annotations copied from the service.
    pub extra_annotations: BTreeMap<String, String>,
}

impl DiscoveredService {
    /// Builds the URL of a document served relative to `base_url`.
    #[must_use]
    pub fn url_for(&self, file_name: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            file_name.trim_start_matches('/')
        )
    }
}

/// Lifecycle change of a service, published to every subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceEvent {
    /// A service became available.
    Added(DiscoveredService),
    /// A known service changed, or a refresh was forced.
    Modified(DiscoveredService),
    /// A service is gone.
    Deleted(DiscoveredService),
}

impl ServiceEvent {
    /// Returns the service the event is about.
    #[must_use]
    pub fn service(&self) -> &DiscoveredService {
        match self {
            Self::Added(service) | Self::Modified(service) | Self::Deleted(service) => service,
        }
    }
}
