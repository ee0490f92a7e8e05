//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges and addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Duplicate service names are allowed (the registry keeps the last one) but logged

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("service #{index} has an empty name")]
    EmptyServiceName { index: usize },

    #[error("service {service}: invalid address {address:?}")]
    InvalidAddress { service: String, address: String },

    #[error("service {service}: max_connections must be greater than 0")]
    ZeroMaxConnections { service: String },

    #[error("invalid metrics address {0:?}")]
    InvalidMetricsAddress(String),
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (index, service) in config.services.iter().enumerate() {
        if service.name.trim().is_empty() {
            errors.push(ValidationError::EmptyServiceName { index });
        } else if !seen.insert(service.name.as_str()) {
            tracing::warn!(service = %service.name, "Duplicate service name, last definition wins");
        }

        if service.address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                service: service.name.clone(),
                address: service.address.clone(),
            });
        }

        if service.max_connections == 0 {
            errors.push(ValidationError::ZeroMaxConnections {
                service: service.name.clone(),
            });
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidMetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ServiceConfig;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&ServerConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = ServerConfig::default();
        config.services.push(ServiceConfig::new("", "127.0.0.1:8000"));
        let mut bad = ServiceConfig::new("rpc", "not-an-address");
        bad.max_connections = 0;
        config.services.push(bad);

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::EmptyServiceName { index: 0 },
                ValidationError::InvalidAddress {
                    service: "rpc".into(),
                    address: "not-an-address".into(),
                },
                ValidationError::ZeroMaxConnections { service: "rpc".into() },
            ]
        );
    }

    #[test]
    fn duplicate_names_are_accepted() {
        let mut config = ServerConfig::default();
        config.services.push(ServiceConfig::new("rpc", "127.0.0.1:8000"));
        config.services.push(ServiceConfig::new("rpc", "127.0.0.1:8001"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = ServerConfig::default();
        config.observability.metrics_address = "nope".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::InvalidMetricsAddress("nope".into())])
        );
    }
}
