//! Lifecycle coordinator for a multi-service RPC server.
//!
//! A [`LifecycleRegistry`] owns named [`Service`]s, broadcasts registrations
//! to all of them, and shuts them down exactly once under a shared deadline.

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod registry;
pub mod service;

pub use config::ServerConfig;
pub use lifecycle::Shutdown;
pub use registry::{LifecycleRegistry, RegistryError, ShutdownReport, MIN_CLOSE_WAIT};
pub use service::{CloseNotifier, Service, ServiceDesc, ServiceError, ServiceImpl};
