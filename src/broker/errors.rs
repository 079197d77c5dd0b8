//! # Broker Errors
//!
//! Error types for provisioning operations.
//!
//! Absence of a database or user is never an error. Existence checks answer `false`
//! and the delete operations treat it as already done.

use serde::Serialize;
use std::fmt;

/// Broker error types
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum BrokerError {
    /// An identifier sanitized down to nothing
    InvalidIdentifier {
        field: String,
        raw: String,
    },

    /// Request parameters could not be read
    InvalidParameters {
        message: String,
    },

    /// Supplied password does not meet the credential policy
    InvalidPassword {
        reason: String,
    },

    /// The server rejected an administrative statement
    AdministrativeStatementFailure {
        statement: String,
        reason: String,
    },

    /// The server could not be reached
    ConnectionFailure {
        message: String,
    },

    /// Binding targets an instance whose database does not exist
    InstanceNotFound {
        service_instance_id: String,
    },

    /// The binding's user does not exist in the instance database
    BindingNotFound {
        binding_id: String,
    },

    /// Request names a service the catalog does not offer
    UnknownServiceDefinition {
        service_id: String,
    },

    /// Request names a plan the catalog does not offer
    UnknownPlan {
        plan_id: String,
    },

    /// Configuration error
    ConfigError {
        message: String,
    },
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidIdentifier { field, raw } => {
                write!(f, "Invalid {} identifier {:?}: nothing left after sanitizing", field, raw)
            }
            Self::InvalidParameters { message } => {
                write!(f, "Invalid parameters: {}", message)
            }
            Self::InvalidPassword { reason } => {
                write!(f, "Invalid password: {}", reason)
            }
            Self::AdministrativeStatementFailure { statement, reason } => {
                write!(f, "Administrative statement '{}' failed: {}", statement, reason)
            }
            Self::ConnectionFailure { message } => {
                write!(f, "Connection failure: {}", message)
            }
            Self::InstanceNotFound { service_instance_id } => {
                write!(f, "Service instance not found: {}", service_instance_id)
            }
            Self::BindingNotFound { binding_id } => {
                write!(f, "Service binding not found: {}", binding_id)
            }
            Self::UnknownServiceDefinition { service_id } => {
                write!(f, "Unknown service definition: {}", service_id)
            }
            Self::UnknownPlan { plan_id } => {
                write!(f, "Unknown plan: {}", plan_id)
            }
            Self::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
        }
    }
}

impl std::error::Error for BrokerError {}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    /// Create an invalid identifier error
    pub fn invalid_identifier(field: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            field: field.into(),
            raw: raw.into(),
        }
    }

    /// Create a statement failure error
    pub fn statement_failure(statement: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AdministrativeStatementFailure {
            statement: statement.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection failure error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionFailure {
            message: message.into(),
        }
    }

    /// Whether a caller may reasonably retry the same request
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionFailure { .. })
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidIdentifier { .. } => 400,
            Self::InvalidParameters { .. } => 400,
            Self::InvalidPassword { .. } => 400,
            Self::AdministrativeStatementFailure { .. } => 500,
            Self::ConnectionFailure { .. } => 503,
            Self::InstanceNotFound { .. } => 404,
            Self::BindingNotFound { .. } => 404,
            Self::UnknownServiceDefinition { .. } => 400,
            Self::UnknownPlan { .. } => 400,
            Self::ConfigError { .. } => 500,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier { .. } => "INVALID_IDENTIFIER",
            Self::InvalidParameters { .. } => "INVALID_PARAMETERS",
            Self::InvalidPassword { .. } => "INVALID_PASSWORD",
            Self::AdministrativeStatementFailure { .. } => "ADMINISTRATIVE_STATEMENT_FAILURE",
            Self::ConnectionFailure { .. } => "CONNECTION_FAILURE",
            Self::InstanceNotFound { .. } => "INSTANCE_NOT_FOUND",
            Self::BindingNotFound { .. } => "BINDING_NOT_FOUND",
            Self::UnknownServiceDefinition { .. } => "UNKNOWN_SERVICE_DEFINITION",
            Self::UnknownPlan { .. } => "UNKNOWN_PLAN",
            Self::ConfigError { .. } => "CONFIG_ERROR",
        }
    }
}

impl From<sqlx::Error> for BrokerError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => Self::AdministrativeStatementFailure {
                statement: db.code().map(|c| c.to_string()).unwrap_or_default(),
                reason: db.message().to_string(),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Protocol(_) => Self::ConnectionFailure {
                message: err.to_string(),
            },
            _ => Self::AdministrativeStatementFailure {
                statement: String::new(),
                reason: err.to_string(),
            },
        }
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<BrokerError> for ErrorResponse {
    fn from(err: BrokerError) -> Self {
        Self {
            error: err.to_string(),
            code: err.error_code(),
            status: err.status_code(),
            details: serde_json::to_value(&err).ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = BrokerError::invalid_identifier("database", "%$#");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "INVALID_IDENTIFIER");

        let err = BrokerError::connection("refused");
        assert_eq!(err.status_code(), 503);
        assert!(err.is_transient());

        let err = BrokerError::statement_failure("CREATE DATABASE", "permission denied");
        assert_eq!(err.error_code(), "ADMINISTRATIVE_STATEMENT_FAILURE");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = BrokerError::UnknownPlan {
            plan_id: "gold".to_string(),
        };
        assert!(err.to_string().contains("gold"));
    }

    #[test]
    fn test_error_response() {
        let response = ErrorResponse::from(BrokerError::connection("timed out"));
        assert_eq!(response.status, 503);
        assert_eq!(response.code, "CONNECTION_FAILURE");
        let details = response.details.unwrap();
        assert_eq!(details["type"], "ConnectionFailure");
        assert_eq!(details["details"]["message"], "timed out");
    }

    #[test]
    fn test_pool_timeout_is_connection_failure() {
        let err = BrokerError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, BrokerError::ConnectionFailure { .. }));
    }
}
