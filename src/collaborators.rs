//! Optional collaborators injected into the components.

use std::sync::Arc;

use crate::fault::FaultReporter;
use crate::metric::MetricsSink;
use crate::tls::CertificateManager;

/// Collaborators shared by the components. Every one of them is optional.
#[derive(Clone, Default)]
pub struct Collaborators {
    /// Receives gauges for the watched resource counts.
    pub metrics: Option<Arc<dyn MetricsSink>>,
    /// Receives fault indications for connectivity problems.
    pub fault_reporter: Option<Arc<dyn FaultReporter>>,
    /// Supplies TLS material for outgoing HTTPS requests.
    pub certificates: Option<Arc<dyn CertificateManager>>,
}

impl Collaborators {
    /// Sets the metrics sink.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets the fault reporter.
    #[must_use]
    pub fn fault_reporter(mut self, fault_reporter: Arc<dyn FaultReporter>) -> Self {
        self.fault_reporter = Some(fault_reporter);
        self
    }

    /// Sets the certificate manager.
    #[must_use]
    pub fn certificates(mut self, certificates: Arc<dyn CertificateManager>) -> Self {
        self.certificates = Some(certificates);
        self
    }
}
