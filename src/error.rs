//! Error types for need provisioning.

use std::time::Duration;

use thiserror::Error;

/// Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Errors that can occur while provisioning a need.
///
/// Every variant identifies the stage that failed. Cleanup failures have no
/// variant on purpose: teardown errors are logged and swallowed so they can
/// never mask the outcome of the test that requested the need.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The container engine could not be reached.
    #[error("container engine not available: {reason}")]
    EngineUnavailable {
        /// Why the engine was unreachable.
        reason: String,
    },

    /// The descriptor is malformed (empty image, no exposed ports, ...).
    #[error("invalid descriptor: {reason}")]
    InvalidDescriptor {
        /// What is wrong with the descriptor.
        reason: String,
    },

    /// The image pull stream reported an error.
    #[error("failed to pull image '{image}': {reason}")]
    PullFailed {
        /// Image reference that was being pulled.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// The image pull did not finish within the descriptor's budget.
    #[error("pull of image '{image}' did not finish within {timeout:?}")]
    PullTimeout {
        /// Image reference that was being pulled.
        image: String,
        /// Pull budget that elapsed.
        timeout: Duration,
    },

    /// The engine rejected the container spec.
    #[error("failed to create container for image '{image}': {reason}")]
    CreateFailed {
        /// Image reference the container was created from.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// The engine could not start the container, or it exited immediately.
    #[error("failed to start container '{id}': {reason}")]
    StartFailed {
        /// Container id.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// The container is running but the readiness probe never succeeded.
    #[error("container '{id}' did not become ready within {timeout:?}")]
    ReadinessTimeout {
        /// Container id.
        id: String,
        /// Readiness budget that elapsed.
        timeout: Duration,
    },

    /// Another provisioning operation held this identity's gate too long.
    #[error("provisioning of '{image}' still in flight elsewhere after {waited:?}")]
    Contended {
        /// Image reference of the contended identity.
        image: String,
        /// How long this caller waited for the gate.
        waited: Duration,
    },
}

impl ProvisionError {
    /// Short name of the stage this error belongs to.
    pub fn stage(&self) -> &'static str {
        match self {
            ProvisionError::EngineUnavailable { .. } => "engine",
            ProvisionError::InvalidDescriptor { .. } => "validate",
            ProvisionError::PullFailed { .. } | ProvisionError::PullTimeout { .. } => "pull",
            ProvisionError::CreateFailed { .. } => "create",
            ProvisionError::StartFailed { .. } => "start",
            ProvisionError::ReadinessTimeout { .. } => "ready",
            ProvisionError::Contended { .. } => "gate",
        }
    }
}

/// Errors raised while resolving runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable holds a value that cannot be parsed.
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Parse failure detail.
        message: String,
    },

    /// An environment variable is set but not valid unicode.
    #[error("environment variable {key} is not valid unicode")]
    NotUnicode {
        /// Variable name.
        key: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        let err = ProvisionError::PullFailed {
            image: "postgres:16".to_string(),
            reason: "no route".to_string(),
        };
        assert_eq!(err.stage(), "pull");

        let err = ProvisionError::ReadinessTimeout {
            id: "abc".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.stage(), "ready");
    }

    #[test]
    fn test_display_identifies_image() {
        let err = ProvisionError::CreateFailed {
            image: "redis:7".to_string(),
            reason: "invalid port spec".to_string(),
        };
        assert!(err.to_string().contains("redis:7"));
    }
}
