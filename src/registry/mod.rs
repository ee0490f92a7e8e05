//! Service registry and lifecycle coordination.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     add_service(name, service)   (repeat, last write wins)
//!     → register(desc, impl)       (fan-out, fail fast)
//!     → serve()                    (failures are marked failed)
//!
//! Shutdown (shutdown.rs):
//!     close(ack) × N
//!     → first caller starts the shutdown body
//!     → hooks → close every non-failed service under one shared deadline
//!     → all callers released, acks sent
//! ```
//!
//! # Design Decisions
//! - The registry is an owned value, not a process-wide singleton
//! - Map access is internally synchronised (DashMap), so add may race with traffic
//! - Registration and shutdown operate on a snapshot of the map

mod shutdown;

pub use shutdown::ShutdownReport;

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::service::{Service, ServiceDesc, ServiceError, ServiceImpl};

/// Lower bound for the shutdown wait. A smaller configured value is raised to this.
pub const MIN_CLOSE_WAIT: Duration = Duration::from_secs(10);

/// Callback run once at the start of shutdown, before services are closed.
pub type ShutdownHook = Box<dyn FnOnce() + Send + 'static>;

/// Errors surfaced by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The descriptor passed to [`LifecycleRegistry::register`] is not a [`ServiceDesc`].
    #[error("service desc type invalid")]
    InvalidDescriptorType,

    /// A service refused the registration. Services after it were not visited.
    #[error("service {service} failed to register: {source}")]
    EntryRegistrationFailed {
        service: String,
        #[source]
        source: ServiceError,
    },

    /// Shutdown has already begun.
    #[error("registry is closed")]
    Closed,
}

/// Owns the named services of one server and coordinates their lifecycle.
pub struct LifecycleRegistry {
    services: DashMap<String, Arc<dyn Service>>,
    failed: DashSet<String>,
    max_close_wait: Option<Duration>,
    hooks: Mutex<Vec<ShutdownHook>>,
    /// Held by `serve` for its whole pass and by the shutdown snapshot, so a
    /// service is never started after shutdown has taken its snapshot.
    serve_gate: Mutex<()>,
    shutdown: Shutdown,
    report: Arc<OnceLock<ShutdownReport>>,
}

impl LifecycleRegistry {
    /// Create an empty registry using [`MIN_CLOSE_WAIT`].
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            failed: DashSet::new(),
            max_close_wait: None,
            hooks: Mutex::new(Vec::new()),
            serve_gate: Mutex::new(()),
            shutdown: Shutdown::new(),
            report: Arc::new(OnceLock::new()),
        }
    }

    /// Set the configured shutdown wait. Values below [`MIN_CLOSE_WAIT`] are floored.
    pub fn with_max_close_wait(mut self, wait: Duration) -> Self {
        self.max_close_wait = Some(wait);
        self
    }

    /// Effective wait used by the shutdown body.
    pub fn close_wait(&self) -> Duration {
        self.max_close_wait
            .map_or(MIN_CLOSE_WAIT, |wait| wait.max(MIN_CLOSE_WAIT))
    }

    /// Associate `service` with `name`, replacing any previous service of that name.
    pub fn add_service(&self, name: impl Into<String>, service: Arc<dyn Service>) {
        let name = name.into();
        if self.services.insert(name.clone(), service).is_some() {
            tracing::debug!(service = %name, "Replaced existing service");
        }
        metrics::set_registered_services(self.services.len());
    }

    /// Look up a service by name.
    pub fn service(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Names of all registered services (unordered).
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Broadcast a descriptor/implementation pair to every service.
    ///
    /// Stops at the first service that fails. Services already registered are
    /// left as they are.
    pub fn register(&self, desc: &dyn Any, service_impl: ServiceImpl) -> Result<(), RegistryError> {
        let desc = desc
            .downcast_ref::<ServiceDesc>()
            .ok_or(RegistryError::InvalidDescriptorType)?;

        for (name, service) in self.snapshot() {
            if let Err(source) = service.register(desc, Arc::clone(&service_impl)) {
                tracing::warn!(
                    service = %name,
                    rpc_service = %desc.service_name,
                    error = %source,
                    "Registration failed, aborting broadcast"
                );
                metrics::record_registration(&name, false);
                return Err(RegistryError::EntryRegistrationFailed {
                    service: name,
                    source,
                });
            }
            metrics::record_registration(&name, true);
        }

        tracing::debug!(rpc_service = %desc.service_name, "Registered on all services");
        Ok(())
    }

    /// Start every service. Services whose `serve` fails are marked failed and
    /// will not be asked to close. Returns the names that failed.
    ///
    /// A `close` that starts while this runs waits for it, then closes every
    /// service it started.
    pub fn serve(&self) -> Result<Vec<String>, RegistryError> {
        let _gate = self.lock_serve_gate();
        if self.shutdown.is_closing() {
            return Err(RegistryError::Closed);
        }

        let mut failed = Vec::new();
        for (name, service) in self.snapshot() {
            match service.serve() {
                Ok(()) => tracing::info!(service = %name, "Service serving"),
                Err(e) => {
                    tracing::error!(service = %name, error = %e, "Service failed to serve");
                    self.mark_failed(name.clone());
                    failed.push(name);
                }
            }
        }
        Ok(failed)
    }

    /// Exclude `name` from the shutdown fan-out.
    pub fn mark_failed(&self, name: impl Into<String>) {
        let name = name.into();
        tracing::warn!(service = %name, "Service marked failed");
        self.failed.insert(name);
    }

    pub fn is_failed(&self, name: &str) -> bool {
        self.failed.contains(name)
    }

    /// Names currently excluded from shutdown.
    pub fn failed_services(&self) -> Vec<String> {
        self.failed.iter().map(|name| name.key().clone()).collect()
    }

    /// Run `hook` once when shutdown starts, before any service is closed.
    ///
    /// Hooks run on the blocking pool under the same deadline as the services:
    /// time spent in hooks is taken from the services' share of the wait.
    pub fn on_shutdown(&self, hook: impl FnOnce() + Send + 'static) {
        self.hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Box::new(hook));
    }

    /// Handle for observing the shutdown state from outside the registry.
    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Outcome of the shutdown pass, once it has finished.
    pub fn shutdown_report(&self) -> Option<&ShutdownReport> {
        self.report.get()
    }

    /// Shut every non-failed service down, at most once.
    ///
    /// Safe to call any number of times from any number of tasks. Every call
    /// waits for the single shutdown pass to finish, then sends on its own
    /// `ack` (if given). Never fails: close errors and timeouts are absorbed.
    pub async fn close(&self, ack: Option<oneshot::Sender<()>>) -> Result<(), RegistryError> {
        if self.shutdown.trigger() {
            self.start_shutdown();
        }

        self.shutdown.closed().await;

        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        Ok(())
    }

    fn lock_serve_gate(&self) -> MutexGuard<'_, ()> {
        self.serve_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot(&self) -> Vec<(String, Arc<dyn Service>)> {
        self.services
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }
}

impl Default for LifecycleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LifecycleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleRegistry")
            .field("services", &self.service_names())
            .field("failed", &self.failed_services())
            .field("close_wait", &self.close_wait())
            .field("state", &self.shutdown.state())
            .finish()
    }
}
