//! Configuration validation.
//!
//! Serde handles the syntax; this module checks that values make sense
//! together. Every problem is reported, not just the first one.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::schema::ServerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: `{value}` is not a valid socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be at most {max}")]
    TooLarge { field: &'static str, max: usize },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.max_connections",
        });
    } else if config.listener.max_connections > Semaphore::MAX_PERMITS {
        errors.push(ValidationError::TooLarge {
            field: "listener.max_connections",
            max: Semaphore::MAX_PERMITS,
        });
    }

    if config.rate_limit.enabled {
        if config.rate_limit.interval_ms == 0 {
            errors.push(ValidationError::Zero {
                field: "rate_limit.interval_ms",
            });
        }
        if config.rate_limit.burst == 0 {
            errors.push(ValidationError::Zero {
                field: "rate_limit.burst",
            });
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
