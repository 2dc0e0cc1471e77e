//! Propagation of refresh requests to the sibling replicas of this pod.
//!
//! Peers are found by resolving the headless service, which returns one
//! address per ready pod. Every peer except this pod receives a copy of the
//! request carrying a `via` header, so a receiving replica can tell a
//! propagated request apart and does not propagate it again.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};

use crate::collaborators::Collaborators;
use crate::error::{Error, Result};
use crate::service::Protocol;

/// TLS type the certificate manager is asked for when sending to peers.
pub const TLS_TYPE_INTERNAL_REFRESH: &str = "internal-refresh";

/// Header marking a request as already propagated.
pub const VIA_HEADER: &str = "via";

/// Settings of [`SynchronizationService`].
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// DNS name of the headless service in front of the replicas.
    pub headless_service_name: String,
    /// Port the replicas accept refresh requests on.
    pub service_port: u16,
    /// Send to peers over HTTPS.
    pub use_https: bool,
    /// Value of the `via` header on propagated requests.
    pub via_header_value: String,
    /// IP of this pod. If `None`, taken from `POD_IP` or the host name.
    pub pod_ip: Option<IpAddr>,
    /// Timeout of a single peer request.
    pub request_timeout: Duration,
}

impl SyncConfig {
    /// Creates settings for replicas behind `headless_service_name` listening on `service_port`.
    #[must_use]
    pub fn new(headless_service_name: impl Into<String>, service_port: u16) -> Self {
        Self {
            headless_service_name: headless_service_name.into(),
            service_port,
            use_https: false,
            via_header_value: "config-sync".to_string(),
            pod_ip: None,
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Sends to peers over HTTPS.
    #[must_use]
    pub fn use_https(mut self, enabled: bool) -> Self {
        self.use_https = enabled;
        self
    }

    /// Sets the IP of this pod.
    #[must_use]
    pub fn pod_ip(mut self, ip: IpAddr) -> Self {
        self.pod_ip = Some(ip);
        self
    }
}

/// A request to replay on every peer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefreshRequest {
    /// HTTP method.
    pub method: Method,
    /// Path and query, starting with `/`.
    pub path: String,
    /// Headers copied to every peer request.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Option<Vec<u8>>,
}

impl RefreshRequest {
    /// Creates a bodiless request.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Finds this pod and its peers.
#[async_trait]
pub trait PeerResolver: Send + Sync {
    /// IP address of this pod.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be determined.
    async fn local_ip(&self) -> Result<IpAddr>;

    /// Addresses of every replica, this pod included.
    ///
    /// # Errors
    ///
    /// Fails if the headless service cannot be resolved.
    async fn cluster_ips(&self) -> Result<Vec<IpAddr>>;
}

/// [`PeerResolver`] backed by the system resolver.
pub struct DnsPeerResolver {
    headless_service_name: String,
    pod_ip: Option<IpAddr>,
}

impl DnsPeerResolver {
    /// Creates a resolver for the headless service of `config`.
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            headless_service_name: config.headless_service_name.clone(),
            pod_ip: config.pod_ip,
        }
    }
}

async fn resolve(host: &str) -> Result<Vec<IpAddr>> {
    let addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|source| Error::Resolve {
            host: host.to_string(),
            source,
        })?;
    let mut ips: Vec<IpAddr> = addrs.map(|addr| addr.ip()).collect();
    ips.sort_unstable();
    ips.dedup();
    Ok(ips)
}

#[async_trait]
impl PeerResolver for DnsPeerResolver {
    async fn local_ip(&self) -> Result<IpAddr> {
        if let Some(ip) = self.pod_ip {
            return Ok(ip);
        }
        if let Some(ip) = std::env::var("POD_IP").ok().and_then(|ip| ip.parse().ok()) {
            return Ok(ip);
        }
        let hostname = std::env::var("HOSTNAME").map_err(|_| Error::MissingField("POD_IP"))?;
        resolve(&hostname)
            .await?
            .into_iter()
            .next()
            .ok_or(Error::MissingField("POD_IP"))
    }

    async fn cluster_ips(&self) -> Result<Vec<IpAddr>> {
        resolve(&self.headless_service_name).await
    }
}

/// Delivers a refresh request to one peer.
#[async_trait]
pub trait RefreshSender: Send + Sync {
    /// Sends `request` to `peer`.
    ///
    /// # Errors
    ///
    /// Transport failures and non-success responses.
    async fn send(&self, peer: SocketAddr, request: &RefreshRequest) -> Result<()>;
}

/// [`RefreshSender`] replaying the request over HTTP(S).
pub struct HttpRefreshSender {
    client: Client,
    protocol: Protocol,
    via_header_value: String,
}

impl HttpRefreshSender {
    /// Creates a sender using the `internal-refresh` TLS options when HTTPS is enabled.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(config: &SyncConfig, collaborators: &Collaborators) -> Result<Self> {
        let mut builder = Client::builder().timeout(config.request_timeout);
        if config.use_https {
            if let Some(options) = collaborators
                .certificates
                .as_ref()
                .and_then(|certificates| certificates.tls_options(TLS_TYPE_INTERNAL_REFRESH))
            {
                builder = options.apply(builder);
            }
        }

        Ok(Self {
            client: builder.build()?,
            protocol: if config.use_https { Protocol::Https } else { Protocol::Http },
            via_header_value: config.via_header_value.clone(),
        })
    }
}

#[async_trait]
impl RefreshSender for HttpRefreshSender {
    async fn send(&self, peer: SocketAddr, request: &RefreshRequest) -> Result<()> {
        let path = request.path.trim_start_matches('/');
        let url = format!("{}://{peer}/{path}", self.protocol);

        let mut builder = self.client.request(request.method.clone(), &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = builder.header(VIA_HEADER, self.via_header_value.as_str());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url,
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Replays refresh requests on every other replica of this deployment.
pub struct SynchronizationService {
    config: SyncConfig,
    resolver: Arc<dyn PeerResolver>,
    sender: Arc<dyn RefreshSender>,
}

impl SynchronizationService {
    /// Creates a service resolving peers through DNS and sending over HTTP(S).
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(config: SyncConfig, collaborators: &Collaborators) -> Result<Self> {
        let resolver = Arc::new(DnsPeerResolver::new(&config));
        let sender = Arc::new(HttpRefreshSender::new(&config, collaborators)?);
        Ok(Self::with_parts(config, resolver, sender))
    }

    /// Creates a service from custom peer resolution and delivery.
    #[must_use]
    pub fn with_parts(
        config: SyncConfig,
        resolver: Arc<dyn PeerResolver>,
        sender: Arc<dyn RefreshSender>,
    ) -> Self {
        Self {
            config,
            resolver,
            sender,
        }
    }

    /// Sends `request` to every peer except this pod.
    ///
    /// Returns the number of peers that accepted it. Failed peers are logged
    /// and do not affect the others; if peers cannot be resolved nothing is sent.
    pub async fn propagate_refresh(&self, request: &RefreshRequest) -> usize {
        let resolved =
            futures::try_join!(self.resolver.local_ip(), self.resolver.cluster_ips());
        let (local, cluster) = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!("refresh not propagated, peers unknown: {e}");
                return 0;
            }
        };

        let peers: Vec<SocketAddr> = cluster
            .into_iter()
            .filter(|ip| *ip != local)
            .map(|ip| SocketAddr::new(ip, self.config.service_port))
            .collect();
        tracing::debug!("propagating {} {} to {} peers", request.method, request.path, peers.len());

        let sends = peers.iter().map(|peer| async move {
            let result = self.sender.send(*peer, request).await;
            if let Err(e) = &result {
                tracing::warn!("refresh to {peer} failed: {e}");
            }
            result.is_ok()
        });
        join_all(sends).await.into_iter().filter(|sent| *sent).count()
    }

    /// True if `headers` mark a request already propagated by a peer.
    #[must_use]
    pub fn is_propagated(&self, headers: &HeaderMap) -> bool {
        headers
            .get_all(VIA_HEADER)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| value.split(',').any(|via| via.trim() == self.config.via_header_value))
    }
}
