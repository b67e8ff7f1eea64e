// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for runtime-broker-core.
//!
//! Two layers are kept apart:
//!
//! - [`StoreError`] is what every store backend returns. It distinguishes
//!   missing rows and optimistic-concurrency/duplicate-key conflicts from plain
//!   database failures so the orchestrator can branch on them.
//! - [`BrokerError`] is the caller-facing taxonomy. The transport adapter maps
//!   it to a broker-protocol status through [`BrokerError::status_code`].
//!   Messages of validation, conflict and unprocessable errors are forwarded to
//!   clients verbatim and must keep their wording.

/// Result type using BrokerError
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors surfaced by the orchestrator to the broker-protocol adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum BrokerError {
    /// The request parameters were rejected.
    #[error("{message}")]
    Validation {
        /// Client-visible description of the rejected input.
        message: String,
    },

    /// The request needs an asynchronous operation but the client refused one.
    #[error("This service plan requires client support for asynchronous service operations.")]
    AsyncRequired,

    /// The request clashes with state recorded for the instance.
    #[error("{message}")]
    Conflict {
        /// Client-visible description of the conflict.
        message: String,
    },

    /// The instance is in a state that cannot accept the request.
    #[error("{message}")]
    Unprocessable {
        /// Client-visible description of the blocking state.
        message: String,
    },

    /// The instance does not exist.
    #[error("instance {instance_id} not found")]
    InstanceNotFound {
        /// The instance ID that was not found.
        instance_id: String,
    },

    /// The operation does not exist or belongs to another instance.
    #[error("operation {operation_id} not found")]
    OperationNotFound {
        /// The operation ID that was not found.
        operation_id: String,
    },

    /// The instance was already removed.
    #[error("instance {instance_id} does not exist")]
    Gone {
        /// The instance ID.
        instance_id: String,
    },

    /// Storage failure or exhausted retries. The message is generic; the
    /// detail is logged where the failure happened.
    #[error("{message}")]
    Internal {
        /// Generic message safe to return to clients.
        message: String,
    },
}

impl BrokerError {
    /// Shorthand for a [`BrokerError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a [`BrokerError::Conflict`].
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Shorthand for a [`BrokerError::Unprocessable`].
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::Unprocessable {
            message: message.into(),
        }
    }

    /// Shorthand for a [`BrokerError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::AsyncRequired => "ASYNC_REQUIRED",
            Self::Conflict { .. } => "CONFLICT",
            Self::Unprocessable { .. } => "UNPROCESSABLE_ENTITY",
            Self::InstanceNotFound { .. } => "INSTANCE_NOT_FOUND",
            Self::OperationNotFound { .. } => "OPERATION_NOT_FOUND",
            Self::Gone { .. } => "INSTANCE_GONE",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the broker-protocol adapter should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::AsyncRequired => 422,
            Self::Conflict { .. } => 409,
            Self::Unprocessable { .. } => 422,
            Self::InstanceNotFound { .. } | Self::OperationNotFound { .. } => 404,
            Self::Gone { .. } => 410,
            Self::Internal { .. } => 500,
        }
    }

    /// Whether the error is the caller's fault (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

/// Errors returned by store backends.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The addressed row does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity kind (instance, operation, archived instance).
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Duplicate key on insert, or a stale version on update.
    #[error("conflict on {kind} {id}: {reason}")]
    Conflict {
        /// Entity kind.
        kind: &'static str,
        /// The identifier that clashed.
        id: String,
        /// What clashed.
        reason: String,
    },

    /// Database operation failed.
    #[error("database error during {operation}: {details}")]
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// A structured column could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether this is an optimistic-concurrency or duplicate-key conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether the addressed row does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Database {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}

/// Log a store failure and turn it into a generic internal error.
pub(crate) fn store_failure(message: &'static str) -> impl FnOnce(StoreError) -> BrokerError {
    move |err| {
        tracing::error!(error = %err, "{}", message);
        BrokerError::internal(message)
    }
}
