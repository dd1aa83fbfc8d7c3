//! Error types for the SafeGuard core.
//!
//! All errors are strongly typed using thiserror so callers can map each
//! failure class (validation, conflict, not-found, permission, dependency)
//! onto their own transport status codes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{Entitlement, Role};
use crate::ids::{ReportId, ResponderId, SubjectId};
use crate::registry::OccurrenceKind;
use crate::storage::StorageError;

/// Validation errors. Raised before any state is touched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Latitude {value} is out of range [-90, 90]")]
    LatitudeOutOfRange {
        value: f64,
    },

    #[error("Longitude {value} is out of range [-180, 180]")]
    LongitudeOutOfRange {
        value: f64,
    },

    #[error("Coordinate '{field}' is not a finite number")]
    NonFiniteCoordinate {
        field: &'static str,
    },

    #[error("Radius {value}km is out of range [{min}, {max}]")]
    RadiusOutOfRange {
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Accuracy {value}m must be a non-negative finite number")]
    InvalidAccuracy {
        value: f64,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Unknown {field} '{value}'")]
    UnknownVariant {
        field: &'static str,
        value: String,
    },

    #[error("Unsupported protocol version '{version}'")]
    UnsupportedVersion {
        version: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Violations of the at-most-one-active invariant and other one-shot rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    #[error("Subject {subject} already has an active {kind}")]
    AlreadyActive {
        subject: SubjectId,
        kind: OccurrenceKind,
    },

    #[error("Report {report} is already marked as uploaded")]
    AlreadyUploaded {
        report: ReportId,
    },
}

/// The operation targeted an instance that does not exist (or is not active).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFoundError {
    #[error("No active {kind} for subject {subject}")]
    NoActive {
        subject: SubjectId,
        kind: OccurrenceKind,
    },

    #[error("Report not found: {report}")]
    Report {
        report: ReportId,
    },

    #[error("Responder has no catchment: {responder}")]
    Responder {
        responder: ResponderId,
    },
}

/// Role or entitlement mismatch. Checked before any query runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("Role '{role}' may not perform '{operation}'")]
    RoleNotAllowed {
        operation: &'static str,
        role: Role,
    },

    #[error("'{operation}' requires the {entitlement} entitlement")]
    MissingEntitlement {
        operation: &'static str,
        entitlement: Entitlement,
    },
}

/// Failures of an external collaborator (notification gateway, storage transport).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DependencyError {
    #[error("Notification to {responder} failed: {reason}")]
    NotificationFailed {
        responder: ResponderId,
        reason: String,
    },

    #[error("Notification to {responder} timed out after {timeout_ms}ms")]
    NotificationTimeout {
        responder: ResponderId,
        timeout_ms: u64,
    },

    #[error("Collaborator '{collaborator}' unavailable: {message}")]
    Unavailable {
        collaborator: String,
        message: String,
    },
}

/// Errors raised by the request runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("Queue full on {path} path (capacity: {capacity})")]
    QueueFull {
        path: String,
        capacity: usize,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum SafeguardError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("Permission denied: {0}")]
    Permission(#[from] PermissionError),

    #[error("Dependency error: {0}")]
    Dependency(#[from] DependencyError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl SafeguardError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Shorthand for the at-most-one-active conflict.
    #[must_use]
    pub const fn already_active(subject: SubjectId, kind: OccurrenceKind) -> Self {
        Self::Conflict(ConflictError::AlreadyActive { subject, kind })
    }

    /// Shorthand for "no active occurrence of this kind".
    #[must_use]
    pub const fn no_active(subject: SubjectId, kind: OccurrenceKind) -> Self {
        Self::NotFound(NotFoundError::NoActive { subject, kind })
    }

    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    #[must_use]
    pub const fn is_permission(&self) -> bool {
        matches!(self, Self::Permission(_))
    }

    #[must_use]
    pub const fn is_dependency(&self) -> bool {
        matches!(self, Self::Dependency(_))
    }

    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if the caller may retry the same request unchanged.
    ///
    /// The core never retries on its own; this is advice for the transport layer.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => matches!(
                e,
                StorageError::ConnectionError(_) | StorageError::BackendError(_)
            ),
            Self::Runtime(e) => matches!(e, RuntimeError::QueueFull { .. } | RuntimeError::Timeout { .. }),
            Self::Dependency(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for core operations.
pub type SafeguardResult<T> = Result<T, SafeguardError>;
