use std::fmt;

use thiserror::Error;

/// Status classes reported by the remote write service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    Unavailable,
    DeadlineExceeded,
    ResourceExhausted,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    InvalidArgument,
    Internal,
    Closed,
}

impl RemoteErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteErrorKind::Unavailable => "unavailable",
            RemoteErrorKind::DeadlineExceeded => "deadline_exceeded",
            RemoteErrorKind::ResourceExhausted => "resource_exhausted",
            RemoteErrorKind::Unauthenticated => "unauthenticated",
            RemoteErrorKind::PermissionDenied => "permission_denied",
            RemoteErrorKind::NotFound => "not_found",
            RemoteErrorKind::InvalidArgument => "invalid_argument",
            RemoteErrorKind::Internal => "internal",
            RemoteErrorKind::Closed => "closed",
        }
    }

    /// Map a gRPC status code carried in a response body.
    pub fn from_grpc_code(code: i32) -> Self {
        match code {
            3 | 9 | 11 => RemoteErrorKind::InvalidArgument,
            4 => RemoteErrorKind::DeadlineExceeded,
            5 => RemoteErrorKind::NotFound,
            7 => RemoteErrorKind::PermissionDenied,
            8 => RemoteErrorKind::ResourceExhausted,
            14 => RemoteErrorKind::Unavailable,
            16 => RemoteErrorKind::Unauthenticated,
            _ => RemoteErrorKind::Internal,
        }
    }

    /// Map an HTTP status code.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 409 | 412 => RemoteErrorKind::InvalidArgument,
            401 => RemoteErrorKind::Unauthenticated,
            403 => RemoteErrorKind::PermissionDenied,
            404 => RemoteErrorKind::NotFound,
            408 | 504 => RemoteErrorKind::DeadlineExceeded,
            429 => RemoteErrorKind::ResourceExhausted,
            502 | 503 => RemoteErrorKind::Unavailable,
            _ => RemoteErrorKind::Internal,
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn closed(what: &str) -> Self {
        Self::new(RemoteErrorKind::Closed, format!("{what} is closed"))
    }

    /// Transient failures worth another attempt.
    pub fn retryable(&self) -> bool {
        matches!(
            self.kind,
            RemoteErrorKind::Unavailable
                | RemoteErrorKind::DeadlineExceeded
                | RemoteErrorKind::ResourceExhausted
                | RemoteErrorKind::Internal
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_retryable_kinds() {
        assert!(RemoteError::new(RemoteErrorKind::Unavailable, "x").retryable());
        assert!(RemoteError::new(RemoteErrorKind::ResourceExhausted, "x").retryable());
        assert!(!RemoteError::new(RemoteErrorKind::InvalidArgument, "x").retryable());
        assert!(!RemoteError::closed("stream").retryable());
    }

    #[test]
    fn maps_status_codes() {
        assert_eq!(RemoteErrorKind::from_http_status(429), RemoteErrorKind::ResourceExhausted);
        assert_eq!(RemoteErrorKind::from_http_status(404), RemoteErrorKind::NotFound);
        assert_eq!(RemoteErrorKind::from_http_status(500), RemoteErrorKind::Internal);
        assert_eq!(RemoteErrorKind::from_grpc_code(14), RemoteErrorKind::Unavailable);
        assert_eq!(RemoteErrorKind::from_grpc_code(3), RemoteErrorKind::InvalidArgument);
    }
}
