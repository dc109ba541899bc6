//! Error types for the discovery session manager

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroconf_core::types::ServiceKey;
use zeroconf_core::{ConfigError, ValidationError};

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors that can occur while publishing or watching services
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// No active session for the key (unregister/unwatch of an unknown key)
    #[error("No active {kind} session for {key}")]
    NotFound { kind: SessionKind, key: ServiceKey },

    /// A session for the key is already active
    #[error("A {kind} session for {key} is already active")]
    DuplicateRegistration { kind: SessionKind, key: ServiceKey },

    /// The platform discovery service rejected a call
    #[error("{operation} failed ({code}): {message}")]
    CollaboratorFailure {
        operation: PlatformOperation,
        code: String,
        message: String,
    },

    /// Neither the system nor the configuration could supply a hostname
    #[error("Hostname unavailable: {0}")]
    HostnameUnavailable(String),

    /// Caller-supplied service values failed structural checks
    #[error("Invalid service: {0}")]
    InvalidService(#[from] ValidationError),

    /// The manager has been shut down or failed to reinitialize
    #[error("Discovery manager is not initialized")]
    NotInitialized,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiscoveryError {
    /// Creates a collaborator failure for `operation`.
    pub fn collaborator(
        operation: PlatformOperation,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::CollaboratorFailure {
            operation,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code for callback payloads.
    pub fn code(&self) -> &'static str {
        match self {
            DiscoveryError::NotFound { .. } => "not_found",
            DiscoveryError::DuplicateRegistration { .. } => "duplicate_registration",
            DiscoveryError::CollaboratorFailure { .. } => "collaborator_failure",
            DiscoveryError::HostnameUnavailable(_) => "hostname_unavailable",
            DiscoveryError::InvalidService(_) => "invalid_service",
            DiscoveryError::NotInitialized => "not_initialized",
            DiscoveryError::Config(_) => "config_error",
            DiscoveryError::Io(_) => "io_error",
        }
    }
}

/// The two independent session namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Publish,
    Watch,
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionKind::Publish => write!(f, "publish"),
            SessionKind::Watch => write!(f, "watch"),
        }
    }
}

/// Platform calls that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformOperation {
    Advertise,
    Withdraw,
    Discover,
    StopDiscovery,
    Resolve,
    Shutdown,
}

impl std::fmt::Display for PlatformOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PlatformOperation::Advertise => "advertise",
            PlatformOperation::Withdraw => "withdraw",
            PlatformOperation::Discover => "discover",
            PlatformOperation::StopDiscovery => "stop discovery",
            PlatformOperation::Resolve => "resolve",
            PlatformOperation::Shutdown => "shutdown",
        };
        write!(f, "{}", name)
    }
}

/// Serialized error delivered through a callback sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub code: String,
    pub message: String,
}

impl From<&DiscoveryError> for ErrorReply {
    fn from(err: &DiscoveryError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}
