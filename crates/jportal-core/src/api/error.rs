use std::fmt;

use thiserror::Error;

use crate::auth::SessionError;
use crate::codec::CodecError;

/// Which family of failure a call reports when the portal rejects it.
///
/// Threaded through every dispatch so that callers can tell a failed login
/// or a failed account change apart from an ordinary read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    #[default]
    Api,
    Login,
    Account,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Api => write!(f, "API request failed"),
            ErrorKind::Login => write!(f, "Login failed"),
            ErrorKind::Account => write!(f, "Account operation failed"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error("network error: {0}")]
    Transport(String),

    #[error("portal temporarily unavailable (HTTP 513)")]
    PortalUnavailable,

    #[error("unauthorized (HTTP 401)")]
    Unauthorized,

    #[error("status:\n{0}")]
    Status(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("could not encode payload: {0}")]
    Encoding(String),

    #[error("{0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{kind}: {reason}")]
    Failed { kind: ErrorKind, reason: FailureReason },

    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Invalid session: {0}")]
    InvalidSession(#[from] SessionError),
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    pub fn failed(kind: ErrorKind, reason: FailureReason) -> Self {
        ApiError::Failed { kind, reason }
    }

    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub(crate) fn from_codec(kind: ErrorKind, err: CodecError) -> Self {
        ApiError::failed(kind, FailureReason::Encoding(err.to_string()))
    }

    /// The error kind of a portal failure, if this is one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ApiError::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_portal_unavailable(&self) -> bool {
        matches!(
            self,
            ApiError::Failed {
                reason: FailureReason::PortalUnavailable,
                ..
            }
        )
    }
}
