//! Shared service state.

use std::sync::Arc;
use chrono::{DateTime, Utc};

use crate::config::KernelConfig;
use crate::kernel::ConsistencyKernel;
use crate::manifest::{ManifestManager, ManifestRepository};
use crate::reasoning::ReasoningClient;
use crate::store::ReferenceStore;

/// State shared by every request handler.
///
/// Holds one kernel behind an `Arc`; cloning the state is cheap.
pub struct ServiceState<S, R, C> {
    kernel: Arc<ConsistencyKernel<S, R, C>>,
    started_at: DateTime<Utc>,
}

impl<S, R, C> Clone for ServiceState<S, R, C> {
    fn clone(&self) -> Self {
        Self {
            kernel: Arc::clone(&self.kernel),
            started_at: self.started_at,
        }
    }
}

impl<S, R, C> ServiceState<S, R, C>
where
    S: ReferenceStore + 'static,
    R: ManifestRepository + 'static,
    C: ReasoningClient + 'static,
{
    /// Wrap a kernel.
    pub fn new(kernel: ConsistencyKernel<S, R, C>) -> Self {
        Self {
            kernel: Arc::new(kernel),
            started_at: Utc::now(),
        }
    }

    /// The kernel serving checks.
    pub fn kernel(&self) -> &ConsistencyKernel<S, R, C> {
        &self.kernel
    }

    /// The reference store.
    pub fn store(&self) -> &S {
        self.kernel.store()
    }

    /// The manifest manager.
    pub fn manifests(&self) -> &ManifestManager<S, R> {
        self.kernel.manifests()
    }

    /// Kernel configuration.
    pub fn config(&self) -> &KernelConfig {
        self.kernel.config()
    }

    /// When the state was created.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
