//! Fault reporting collaborator.

/// A fault raised by a component, e.g. a lost watch connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaultIndication {
    /// Fault name, as known by the fault handling system.
    pub fault: String,
    /// Human readable description.
    pub description: String,
}

impl FaultIndication {
    /// Creates a fault indication.
    #[must_use]
    pub fn new(fault: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            fault: fault.into(),
            description: description.into(),
        }
    }
}

/// Receives fault indications. Reporting is best-effort and must not fail.
pub trait FaultReporter: Send + Sync {
    /// Records a fault.
    fn produce_fault_indication(&self, indication: FaultIndication);
}

/// Fault name used for Kubernetes API connectivity problems.
pub const K8S_UNAVAILABLE: &str = "K8S_UNAVAILABLE";
