//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the registry from validated configuration
//! - Add one TCP service per configured endpoint
//!
//! # Design Decisions
//! - Services are added in file order; a repeated name replaces the earlier one
//! - Nothing is bound here: listeners start in `LifecycleRegistry::serve`

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::net::TcpService;
use crate::registry::LifecycleRegistry;

/// Build a registry holding a [`TcpService`] for every configured service.
pub fn build_registry(config: &ServerConfig) -> LifecycleRegistry {
    let mut registry = LifecycleRegistry::new();
    if let Some(wait) = config.server.max_close_wait() {
        registry = registry.with_max_close_wait(wait);
    }

    for service in &config.services {
        registry.add_service(service.name.clone(), Arc::new(TcpService::new(service.clone())));
    }

    tracing::info!(
        services = registry.len(),
        close_wait = ?registry.close_wait(),
        "Registry built"
    );
    registry
}
