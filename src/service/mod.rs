//! Service capability contract.
//!
//! # Data Flow
//! ```text
//! LifecycleRegistry::register(desc, impl)
//!     → Service::register (once per managed service, fail fast)
//!
//! Owner / LifecycleRegistry::serve
//!     → Service::serve (start handling traffic)
//!
//! LifecycleRegistry::close
//!     → Service::close(done) (begin shutdown, signal `done` when finished)
//! ```
//!
//! # Design Decisions
//! - The registry only knows services through this trait; transports live elsewhere
//! - Implementation values are opaque (`dyn Any`), each service downcasts to what it serves
//! - `close` reports completion on `done`; it may block, the registry calls it
//!   on the blocking pool and never waits past its deadline

use std::any::Any;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::net::listener::ListenerError;

/// Opaque implementation value handed to every service on registration.
pub type ServiceImpl = Arc<dyn Any + Send + Sync>;

/// Completion channel passed to [`Service::close`].
///
/// Dropping it without sending is treated the same as never signalling.
pub type CloseNotifier = oneshot::Sender<()>;

/// Identifies which logical RPC service a registration targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceDesc {
    /// Fully qualified service name, e.g. `"helloworld.Greeter"`.
    pub service_name: String,
}

impl ServiceDesc {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

/// Errors a single managed service can report.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The implementation value is not of the type this service understands.
    #[error("implementation for {0} has an unexpected type")]
    ImplTypeMismatch(String),

    /// A handler is already bound under this service name.
    #[error("service {0} is already registered")]
    AlreadyRegistered(String),

    #[error("service is already serving")]
    AlreadyServing,

    /// No tokio runtime is available to drive the service.
    #[error("runtime unavailable: {0}")]
    Runtime(String),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// Service-specific refusal.
    #[error("{0}")]
    Rejected(String),
}

/// One independently managed service unit (typically one protocol endpoint).
pub trait Service: Send + Sync {
    /// Bind `service_impl` under `desc` on this service.
    fn register(&self, desc: &ServiceDesc, service_impl: ServiceImpl) -> Result<(), ServiceError>;

    /// Start handling traffic. Returns once serving has started.
    fn serve(&self) -> Result<(), ServiceError>;

    /// Begin an asynchronous shutdown and send on `done` once it has finished.
    ///
    /// An error means shutdown could not be initiated.
    fn close(&self, done: CloseNotifier) -> Result<(), ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desc_equality_by_name() {
        assert_eq!(ServiceDesc::new("a.B"), ServiceDesc::new(String::from("a.B")));
        assert_ne!(ServiceDesc::new("a.B"), ServiceDesc::new("a.C"));
    }

    #[test]
    fn rejected_error_displays_message_verbatim() {
        let err = ServiceError::Rejected("duplicate binding".into());
        assert_eq!(err.to_string(), "duplicate binding");
    }
}
