//! Error types for the alert-router crate.

use std::fmt;

use thiserror::Error;

/// Machine-readable error code carried by every [`RouterError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(&'static str);

impl ErrorCode {
    /// No alertmanager server exists for the organization yet.
    pub const ALERTMANAGER_NOT_FOUND: Self = Self("alertmanager_not_found");
    /// The notification configuration is structurally invalid.
    pub const CONFIG_INVALID: Self = Self("alertmanager_config_invalid");
    /// No configuration is stored for the organization.
    pub const CONFIG_NOT_FOUND: Self = Self("alertmanager_config_not_found");
    /// A receiver or route with the same name already exists.
    pub const CONFIG_CONFLICT: Self = Self("alertmanager_config_conflict");
    /// The channel does not exist.
    pub const CHANNEL_NOT_FOUND: Self = Self("alertmanager_channel_not_found");
    /// The channel payload is invalid.
    pub const CHANNEL_INVALID: Self = Self("alertmanager_channel_invalid");
    /// An incoming alert failed validation.
    pub const ALERT_INVALID: Self = Self("alertmanager_alert_invalid");
    /// A label matcher could not be parsed.
    pub const MATCHER_INVALID: Self = Self("alertmanager_matcher_invalid");
    /// A routing-tree mutation was rejected.
    pub const ROUTE_INVALID: Self = Self("alertmanager_route_invalid");
    /// A notification policy does not exist.
    pub const ROUTE_NOT_FOUND: Self = Self("alertmanager_route_not_found");
    /// Persisted silence or notification-log state does not exist.
    pub const STATE_NOT_FOUND: Self = Self("alertmanager_state_not_found");
    /// A silence does not exist.
    pub const SILENCE_NOT_FOUND: Self = Self("alertmanager_silence_not_found");
    /// The planned maintenance payload is invalid.
    pub const MAINTENANCE_INVALID: Self = Self("invalid_planned_maintenance_payload");
    /// The planned maintenance does not exist.
    pub const MAINTENANCE_NOT_FOUND: Self = Self("planned_maintenance_not_found");
    /// The request carries no identity claims.
    pub const UNAUTHENTICATED: Self = Self("unauthenticated");
    /// The server lifecycle does not allow the operation.
    pub const SERVER_STATE: Self = Self("alertmanager_server_state");
    /// The operation is not available for this receiver or provider.
    pub const UNSUPPORTED: Self = Self("unsupported");
    /// An integration failed to deliver a notification.
    pub const NOTIFICATION_FAILED: Self = Self("notification_failed");
    /// Unexpected internal failure.
    pub const INTERNAL: Self = Self("internal");

    /// Returns the code as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Broad classification used by transport layers to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing organization, config, channel or route.
    NotFound,
    /// Malformed input.
    InvalidInput,
    /// Duplicate name.
    Conflict,
    /// Operation not available.
    Unsupported,
    /// Internal or downstream failure.
    Internal,
}

/// Errors that can occur in the routing engine.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The requested entity does not exist.
    #[error("{message}")]
    NotFound {
        /// Machine-readable code.
        code: ErrorCode,
        /// Human-readable description.
        message: String,
    },

    /// The input is malformed.
    #[error("{message}")]
    InvalidInput {
        /// Machine-readable code.
        code: ErrorCode,
        /// Human-readable description.
        message: String,
    },

    /// The entity already exists.
    #[error("{message}")]
    Conflict {
        /// Machine-readable code.
        code: ErrorCode,
        /// Human-readable description.
        message: String,
    },

    /// The operation is not supported.
    #[error("{message}")]
    Unsupported {
        /// Machine-readable code.
        code: ErrorCode,
        /// Human-readable description.
        message: String,
    },

    /// An internal or downstream failure.
    #[error("{message}")]
    Internal {
        /// Machine-readable code.
        code: ErrorCode,
        /// Human-readable description.
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Several independent failures, e.g. invalid alerts in one batch.
    #[error("{}", join_messages(.0))]
    Multiple(Vec<RouterError>),
}

fn join_messages(errors: &[RouterError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl RouterError {
    /// Creates a [`RouterError::NotFound`].
    pub fn not_found(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            message: message.into(),
        }
    }

    /// Creates a [`RouterError::InvalidInput`].
    pub fn invalid_input(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            code,
            message: message.into(),
        }
    }

    /// Creates a [`RouterError::Conflict`].
    pub fn conflict(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            message: message.into(),
        }
    }

    /// Creates a [`RouterError::Unsupported`].
    pub fn unsupported(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Unsupported {
            code,
            message: message.into(),
        }
    }

    /// Creates a [`RouterError::Internal`].
    pub fn internal(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Internal {
            code,
            message: message.into(),
        }
    }

    /// Joins a list of errors, returning `Ok(())` when it is empty.
    pub fn join(mut errors: Vec<Self>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }

    /// Returns the broad error classification.
    ///
    /// A joined error takes the kind of its first member.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidInput { .. } | Self::Serialization(_) => ErrorKind::InvalidInput,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Internal { .. } => ErrorKind::Internal,
            Self::Multiple(errors) => errors.first().map_or(ErrorKind::Internal, Self::kind),
        }
    }

    /// Returns the machine-readable code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { code, .. }
            | Self::InvalidInput { code, .. }
            | Self::Conflict { code, .. }
            | Self::Unsupported { code, .. }
            | Self::Internal { code, .. } => *code,
            Self::Serialization(_) => ErrorCode::CONFIG_INVALID,
            Self::Multiple(errors) => errors.first().map_or(ErrorCode::INTERNAL, Self::code),
        }
    }

    /// Returns true if this is a not-found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for routing engine operations.
pub type Result<T> = std::result::Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_not_found() {
        let err = RouterError::not_found(
            ErrorCode::ALERTMANAGER_NOT_FOUND,
            "alertmanager not found for org org-1",
        );
        assert_eq!(err.to_string(), "alertmanager not found for org org-1");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.code().as_str(), "alertmanager_not_found");
        assert!(err.is_not_found());
    }

    #[test]
    fn error_kinds() {
        let cases = [
            (
                RouterError::invalid_input(ErrorCode::ROUTE_INVALID, "x"),
                ErrorKind::InvalidInput,
            ),
            (
                RouterError::conflict(ErrorCode::CONFIG_CONFLICT, "x"),
                ErrorKind::Conflict,
            ),
            (
                RouterError::unsupported(ErrorCode::UNSUPPORTED, "x"),
                ErrorKind::Unsupported,
            ),
            (
                RouterError::internal(ErrorCode::INTERNAL, "x"),
                ErrorKind::Internal,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn join_empty_is_ok() {
        assert!(RouterError::join(Vec::new()).is_ok());
    }

    #[test]
    fn join_single_unwraps() {
        let err = RouterError::join(vec![RouterError::invalid_input(
            ErrorCode::ALERT_INVALID,
            "bad alert",
        )])
        .unwrap_err();
        assert!(matches!(err, RouterError::InvalidInput { .. }));
    }

    #[test]
    fn join_many_concatenates_messages() {
        let err = RouterError::join(vec![
            RouterError::invalid_input(ErrorCode::ALERT_INVALID, "first"),
            RouterError::invalid_input(ErrorCode::ALERT_INVALID, "second"),
        ])
        .unwrap_err();
        assert_eq!(err.to_string(), "first; second");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.code(), ErrorCode::ALERT_INVALID);
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid json");
        assert!(json_err.is_err());
        let err: RouterError = json_err.unwrap_err().into();
        assert!(matches!(err, RouterError::Serialization(_)));
    }
}
