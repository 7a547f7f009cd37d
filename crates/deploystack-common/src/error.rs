//! Error types for the DeployStack operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Each error variant includes contextual information like app names,
//! config keys, and underlying causes.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for DeployStack operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Configuration error raised while resolving app settings
    #[error("config error for {app}: {message}")]
    Config {
        /// Name of the app whose configuration is invalid
        app: String,
        /// Description of what's invalid
        message: String,
        /// The offending config key (e.g. "replicasForDefault")
        key: Option<String>,
    },

    /// Validation error for the DeployStack spec itself
    #[error("validation error for {stack}: {message}")]
    Validation {
        /// Name of the DeployStack with invalid configuration
        stack: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g. "spec.categories")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g. "reconciler", "sweep")
        context: String,
    },
}

impl Error {
    /// Create a config error with the given message
    ///
    /// For simple config errors without app context.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            app: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            key: None,
        }
    }

    /// Create a config error with app context
    pub fn config_for(app: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            app: app.into(),
            message: msg.into(),
            key: None,
        }
    }

    /// Create a config error with app context and the offending key
    pub fn config_for_key(
        app: impl Into<String>,
        key: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Config {
            app: app.into(),
            message: msg.into(),
            key: Some(key.into()),
        }
    }

    /// Create a validation error with the given message
    ///
    /// For simple validation errors without stack context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            stack: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with stack context
    pub fn validation_for(stack: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            stack: stack.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with stack context and field path
    pub fn validation_for_field(
        stack: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            stack: stack.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    ///
    /// For simple internal errors without specific context.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Config, validation and serialization errors are not retryable
    /// (they require a spec fix). Kubernetes errors depend on the status
    /// code. Internal errors are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Retry on transient K8s errors (connection, timeout)
                // Don't retry on 4xx errors (validation, not found, etc.)
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Config { .. } => false,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the app name if this error is associated with a specific app
    pub fn app(&self) -> Option<&str> {
        match self {
            Error::Config { app, .. } => Some(app),
            _ => None,
        }
    }

    /// Get the config key if this error carries one
    pub fn key(&self) -> Option<&str> {
        match self {
            Error::Config { key, .. } => key.as_deref(),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}
