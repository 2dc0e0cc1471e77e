//! Resource count gauges and the metrics sink they report to.

use std::collections::{BTreeMap, HashSet};
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::error::{Error, Result};

/// A value that can go up or down.
pub trait Gauge: Send + Sync {
    /// Sets the gauge.
    fn set(&self, value: f64);
}

/// Creates and removes metrics.
pub trait MetricsSink: Send + Sync {
    /// Creates (or returns the existing) gauge named `name`.
    fn create_gauge(&self, name: &str, help: &str) -> Arc<dyn Gauge>;

    /// Removes the metric named `name`.
    fn remove_metric(&self, name: &str);
}

/// Gauge wrapper that rejects values that are not finite numbers.
#[derive(Clone)]
pub struct ValidatedGauge {
    name: String,
    inner: Arc<dyn Gauge>,
}

impl ValidatedGauge {
    /// Wraps `inner`, reporting rejections under `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, inner: Arc<dyn Gauge>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    /// Sets the gauge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMetricValue`] for NaN or infinite values.
    pub fn set(&self, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(Error::InvalidMetricValue {
                name: self.name.clone(),
                value,
            });
        }
        self.inner.set(value);
        Ok(())
    }
}

/// Kind of Kubernetes resource being counted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// `Service` resources.
    Service,
    /// `Pod` resources.
    Pod,
    /// `EndpointSlice` resources.
    Endpoint,
}

impl ResourceKind {
    /// Plural name used in metric names and logs.
    #[must_use]
    pub fn plural(self) -> &'static str {
        match self {
            Self::Service => "services",
            Self::Pod => "pods",
            Self::Endpoint => "endpoints",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

/// Live count of the resources of one kind, exposed as a gauge.
pub struct ResourceMetric {
    kind: ResourceKind,
    name: String,
    sink: Option<Arc<dyn MetricsSink>>,
    gauge: Mutex<Option<ValidatedGauge>>,
    uids: Mutex<HashSet<String>>,
}

impl ResourceMetric {
    /// Creates a metric named `{prefix}_k8s_{kind}_count`. Without a sink only the count is kept.
    #[must_use]
    pub fn new(kind: ResourceKind, prefix: &str, sink: Option<Arc<dyn MetricsSink>>) -> Self {
        Self {
            kind,
            name: format!("{prefix}_k8s_{}_count", kind.plural()),
            sink,
            gauge: Mutex::new(None),
            uids: Mutex::new(HashSet::new()),
        }
    }

    /// The metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers the gauge with the sink and resets the count.
    pub fn init(&self) {
        lock(&self.uids).clear();
        if let Some(sink) = &self.sink {
            let help = format!("Number of watched Kubernetes {}", self.kind);
            let gauge = ValidatedGauge::new(&self.name, sink.create_gauge(&self.name, &help));
            *lock(&self.gauge) = Some(gauge);
        }
        self.publish();
    }

    /// Counts the resource with `uid`.
    pub fn add(&self, uid: &str) {
        if lock(&self.uids).insert(uid.to_string()) {
            self.publish();
        }
    }

    /// Stops counting the resource with `uid`.
    pub fn remove(&self, uid: &str) {
        if lock(&self.uids).remove(uid) {
            self.publish();
        }
    }

    /// Replaces the counted set after a relist.
    pub fn reset<I: IntoIterator<Item = String>>(&self, uids: I) {
        *lock(&self.uids) = uids.into_iter().collect();
        self.publish();
    }

    /// Number of resources counted.
    #[must_use]
    pub fn count(&self) -> usize {
        lock(&self.uids).len()
    }

    /// Forgets every resource and removes the gauge from the sink.
    pub fn clear(&self) {
        lock(&self.uids).clear();
        if lock(&self.gauge).take().is_some() {
            if let Some(sink) = &self.sink {
                sink.remove_metric(&self.name);
            }
        }
    }

    fn publish(&self) {
        // Resource counts stay far below f64's exact integer range.
        #[allow(clippy::cast_precision_loss)]
        let count = self.count() as f64;
        if let Some(gauge) = lock(&self.gauge).as_ref() {
            if let Err(e) = gauge.set(count) {
                tracing::warn!("{e}");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process metrics sink rendering gauges in Prometheus text exposition format.
#[derive(Default)]
pub struct InMemoryMetrics {
    gauges: RwLock<BTreeMap<String, Arc<InMemoryGauge>>>,
}

struct InMemoryGauge {
    bits: AtomicU64,
    help: String,
}

impl Gauge for InMemoryGauge {
    fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl InMemoryMetrics {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of the gauge named `name`.
    #[must_use]
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.gauges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|g| f64::from_bits(g.bits.load(Ordering::Relaxed)))
    }

    /// Renders all gauges in Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut output = String::new();
        let gauges = self.gauges.read().unwrap_or_else(PoisonError::into_inner);
        for (name, gauge) in gauges.iter() {
            let value = f64::from_bits(gauge.bits.load(Ordering::Relaxed));
            let _ = writeln!(output, "# HELP {name} {}", gauge.help);
            let _ = writeln!(output, "# TYPE {name} gauge");
            let _ = writeln!(output, "{name} {value}");
        }
        output
    }
}

impl MetricsSink for InMemoryMetrics {
    fn create_gauge(&self, name: &str, help: &str) -> Arc<dyn Gauge> {
        let mut gauges = self.gauges.write().unwrap_or_else(PoisonError::into_inner);
        let gauge = gauges.entry(name.to_string()).or_insert_with(|| {
            Arc::new(InMemoryGauge {
                bits: AtomicU64::new(0.0_f64.to_bits()),
                help: help.to_string(),
            })
        });
        gauge.clone()
    }

    fn remove_metric(&self, name: &str) {
        self.gauges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validated_gauge_rejects_non_finite() {
        let metrics = InMemoryMetrics::new();
        let gauge = ValidatedGauge::new("g", metrics.create_gauge("g", "help"));

        assert!(gauge.set(3.0).is_ok());
        assert!(matches!(gauge.set(f64::NAN), Err(Error::InvalidMetricValue { .. })));
        assert!(gauge.set(f64::INFINITY).is_err());
        assert_eq!(metrics.gauge_value("g"), Some(3.0));
    }

    #[test]
    fn resource_metric_counts_unique_uids() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let metric = ResourceMetric::new(ResourceKind::Pod, "app", Some(metrics.clone()));
        metric.init();

        metric.add("a");
        metric.add("a");
        metric.add("b");
        metric.remove("c");

        assert_eq!(metric.name(), "app_k8s_pods_count");
        assert_eq!(metric.count(), 2);
        assert_eq!(metrics.gauge_value("app_k8s_pods_count"), Some(2.0));

        metric.remove("a");
        assert_eq!(metrics.gauge_value("app_k8s_pods_count"), Some(1.0));
    }

    #[test]
    fn resource_metric_reset_replaces_set() {
        let metric = ResourceMetric::new(ResourceKind::Service, "app", None);
        metric.init();
        metric.add("a");

        metric.reset(vec!["b".to_string(), "c".to_string()]);

        assert_eq!(metric.count(), 2);
    }

    #[test]
    fn resource_metric_clear_removes_gauge() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let metric = ResourceMetric::new(ResourceKind::Endpoint, "app", Some(metrics.clone()));
        metric.init();
        metric.add("a");

        metric.clear();
        metric.clear();

        assert_eq!(metric.count(), 0);
        assert!(metrics.gauge_value("app_k8s_endpoints_count").is_none());
    }

    #[test]
    fn render_prometheus_text() {
        let metrics = InMemoryMetrics::new();
        metrics.create_gauge("svc_count", "Number of services").set(4.0);

        let text = metrics.render();

        assert!(text.contains("# HELP svc_count Number of services\n"));
        assert!(text.contains("# TYPE svc_count gauge\n"));
        assert!(text.contains("svc_count 4\n"));
    }
}
