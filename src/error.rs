//! Error types for the Weaver operator

use thiserror::Error;

/// Main error type for Weaver operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Missing or malformed required input (component, trait, metadata)
    #[error("input error: {0}")]
    Input(String),

    /// Expression evaluation failure inside a template
    #[error("expression error: {0}")]
    Expression(String),

    /// Resource synthesis failure (whole batch is discarded)
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Cluster client resolution failure (environment or data plane lookup)
    #[error("resolve error: {0}")]
    Resolve(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create an input error with the given message
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Create an expression error with the given message
    pub fn expression(msg: impl Into<String>) -> Self {
        Self::Expression(msg.into())
    }

    /// Create a synthesis error with the given message
    pub fn synthesis(msg: impl Into<String>) -> Self {
        Self::Synthesis(msg.into())
    }

    /// Create a resolve error with the given message
    pub fn resolve(msg: impl Into<String>) -> Self {
        Self::Resolve(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Whether this error is a Kubernetes 404 (object absent)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 404)
    }

    /// Whether this error is a Kubernetes 409 AlreadyExists
    ///
    /// Namespace creation races between concurrent reconcilers surface as
    /// 409s and are treated as success by the caller.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }
}
