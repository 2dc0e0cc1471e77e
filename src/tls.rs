//! TLS material supplied by a certificate manager.

use reqwest::{Certificate, ClientBuilder, Identity};

/// TLS settings for outgoing requests to one peer.
#[derive(Clone, Default)]
pub struct TlsOptions {
    /// Certificate authorities trusted for the peer.
    pub ca_certificates: Vec<Certificate>,
    /// Client identity presented to the peer.
    pub identity: Option<Identity>,
}

impl TlsOptions {
    /// Applies the options to an HTTP client builder.
    #[must_use]
    pub fn apply(&self, mut builder: ClientBuilder) -> ClientBuilder {
        for ca in &self.ca_certificates {
            builder = builder.add_root_certificate(ca.clone());
        }
        if let Some(identity) = &self.identity {
            builder = builder.identity(identity.clone());
        }
        builder
    }
}

/// Supplies TLS material keyed by service name or TLS type.
pub trait CertificateManager: Send + Sync {
    /// Returns the TLS options for `name`, or `None` when none are configured.
    fn tls_options(&self, name: &str) -> Option<TlsOptions>;
}
