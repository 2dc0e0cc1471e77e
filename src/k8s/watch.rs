//! Supervised watch streams that reconnect after failures.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use kube::runtime::watcher::Event;
use tokio::sync::watch;

use crate::fault::{FaultIndication, FaultReporter, K8S_UNAVAILABLE};
use crate::metric::ResourceKind;

/// Drives one watch stream until `stop` flips to true.
///
/// `connect` opens a fresh stream. When the stream yields an error or ends, the
/// failure is logged and reported, and after `reconnect_interval` a new stream
/// is opened. Reconnection is unbounded; only `stop` ends the loop.
pub(crate) async fn supervise<K, E, S, C, H, Fut>(
    kind: ResourceKind,
    mut connect: C,
    mut handle: H,
    reconnect_interval: Duration,
    mut stop: watch::Receiver<bool>,
    fault_reporter: Option<Arc<dyn FaultReporter>>,
) where
    E: Display,
    S: Stream<Item = Result<Event<K>, E>>,
    C: FnMut() -> S,
    H: FnMut(Event<K>) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        if *stop.borrow() {
            break;
        }

        tracing::info!("starting Kubernetes {kind} watch");
        let stream = connect();
        tokio::pin!(stream);

        let failure = loop {
            let next = tokio::select! {
                _ = stop.wait_for(|stopped| *stopped) => {
                    tracing::debug!("Kubernetes {kind} watch stopped");
                    return;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => handle(event).await,
                Some(Err(e)) => break format!("Kubernetes {kind} watch failed: {e}"),
                None => break format!("Kubernetes {kind} watch ended"),
            }
        };

        // The stop flag wins over a failure caused by the shutdown itself.
        if *stop.borrow() {
            break;
        }

        tracing::error!("{failure}, reconnecting in {reconnect_interval:?}");
        if let Some(reporter) = &fault_reporter {
            reporter.produce_fault_indication(FaultIndication::new(K8S_UNAVAILABLE, failure));
        }

        tokio::select! {
            _ = stop.wait_for(|stopped| *stopped) => break,
            () = tokio::time::sleep(reconnect_interval) => {}
        }
    }
}
