//! Error types for the pull secret federator
//!
//! Errors are structured with fields to aid debugging in production. Every
//! variant carries the object key or Secret coordinates it relates to, so a
//! failed reconciliation can be traced back to one `ImagePullSecret`.
//!
//! Nothing here is fatal to the process: every failure degrades to "retry
//! later" on the fixed requeue cadence (see [`crate::requeue`]).

use thiserror::Error;

use crate::events::reasons;
use crate::token::TokenError;

/// Main error type for federation passes
#[derive(Debug, Error)]
pub enum Error {
    /// The `ImagePullSecret` could not be read
    #[error("failed to fetch {key}: {message}")]
    Fetch {
        /// `namespace/name` of the request object
        key: String,
        /// Description of what failed
        message: String,
    },

    /// The request spec is unusable as written
    #[error("validation error for {key}: {message}")]
    Validation {
        /// `namespace/name` of the request object
        key: String,
        /// Description of what's invalid
        message: String,
    },

    /// One hop of the federation chain failed
    #[error("federation chain failed: {source}")]
    Chain {
        /// The hop that failed and why
        #[from]
        source: TokenError,
    },

    /// The credential Secret could not be created or replaced
    #[error("failed to persist secret {namespace}/{name}: {message}")]
    Persist {
        /// Namespace of the Secret
        namespace: String,
        /// Name of the Secret
        name: String,
        /// Description of what failed
        message: String,
    },

    /// The status subresource could not be written
    #[error("failed to update status of {key}: {message}")]
    Status {
        /// `namespace/name` of the request object
        key: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g. "http-client", "startup")
        context: String,
    },
}

impl Error {
    /// Create a fetch error for the given object key
    pub fn fetch(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Fetch {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error for the given object key
    pub fn validation_for(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create a persist error for the given Secret
    pub fn persist(
        namespace: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Persist {
            namespace: namespace.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a status update error for the given object key
    pub fn status(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Status {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True when the request object itself could not be read.
    ///
    /// Fetch failures are requeued on the short interval; everything else
    /// uses the regular reconciliation interval.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Error::Fetch { .. })
    }

    /// Whether another pass may succeed where this one failed.
    ///
    /// Every failure is retried on the fixed cadence; none stops the
    /// controller from revisiting the object.
    pub fn is_retryable(&self) -> bool {
        true
    }

    /// Kubernetes Event reason describing this failure
    pub fn event_reason(&self) -> &'static str {
        match self {
            Error::Fetch { .. } => reasons::FETCH_FAILED,
            Error::Validation { .. } => reasons::VALIDATION_FAILED,
            Error::Chain { .. } => reasons::FEDERATION_FAILED,
            Error::Persist { .. } => reasons::PERSIST_FAILED,
            Error::Status { .. } => reasons::STATUS_UPDATE_FAILED,
            Error::Serialization { .. } | Error::Internal { .. } => {
                reasons::RECONCILE_FAILED
            }
        }
    }
}
