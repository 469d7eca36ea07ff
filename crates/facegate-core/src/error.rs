//! Error taxonomy shared by every provider and store.
//!
//! Callers match on [`FaceServiceError`] and consult [`FaceServiceError::is_retryable`]
//! instead of inspecting provider-specific failures.

use crate::types::ProviderKind;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type FaceResult<T> = Result<T, FaceServiceError>;

/// Kind of missing resource in a `NotFound` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Collection,
    Face,
    Account,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Collection => write!(f, "collection"),
            Resource::Face => write!(f, "face"),
            Resource::Account => write!(f, "rate limit account"),
        }
    }
}

#[derive(Error, Debug)]
pub enum FaceServiceError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: Resource, id: String },
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },
    #[error("storage failed during {operation}: {reason}")]
    StorageFailed { operation: &'static str, reason: String },
    #[error("database error during {operation}: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: tokio_rusqlite::Error,
    },
    #[error("{provider} provider failed during {operation}: {failure}")]
    ProviderFailed {
        provider: ProviderKind,
        operation: &'static str,
        retryable: bool,
        throttle: bool,
        failure: ProviderFailure,
    },
    #[error("{0}")]
    Custom(String),
}

impl FaceServiceError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    pub fn collection_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: Resource::Collection,
            id: id.into(),
        }
    }

    /// Wrap a provider failure, deriving the retry flags from its classification.
    pub fn provider(provider: ProviderKind, operation: &'static str, failure: ProviderFailure) -> Self {
        let class = classify(&failure);
        Self::ProviderFailed {
            provider,
            operation,
            retryable: class.is_retryable(),
            throttle: class == FailureClass::Throttling,
            failure,
        }
    }

    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::InvalidInput { .. } | Self::Custom(_) => false,
            Self::StorageFailed { .. } | Self::Database { .. } => true,
            Self::ProviderFailed { retryable, .. } => *retryable,
        }
    }

    /// Whether the provider signalled a rate-limit rejection.
    pub fn is_throttle(&self) -> bool {
        matches!(self, Self::ProviderFailed { throttle: true, .. })
    }

    /// Delay the provider asked for before the next call, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::ProviderFailed { failure, .. } => failure.retry_after,
            _ => None,
        }
    }
}

/// Transport-level failure that never produced an HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Connect,
    /// Connection reset or body stream interrupted mid-flight.
    Interrupted,
}

/// Everything known about one failed provider call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProviderFailure {
    pub status: Option<u16>,
    /// Provider error type, e.g. `ThrottlingException`.
    pub code: Option<String>,
    pub message: String,
    pub transport: Option<TransportError>,
    pub retry_after: Option<Duration>,
}

impl ProviderFailure {
    pub fn http(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn transport(kind: TransportError, message: impl Into<String>) -> Self {
        Self {
            transport: Some(kind),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_code(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.to_string()),
            message: message.into(),
            ..Default::default()
        }
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, &self.code, self.transport) {
            (Some(status), Some(code), _) => write!(f, "HTTP {status} {code}: {}", self.message),
            (Some(status), None, _) => write!(f, "HTTP {status}: {}", self.message),
            (None, Some(code), _) => write!(f, "{code}: {}", self.message),
            (None, None, Some(kind)) => write!(f, "{kind:?}: {}", self.message),
            (None, None, None) => write!(f, "{}", self.message),
        }
    }
}

/// Retry classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    NonRetryable,
    Retryable,
    /// Explicit rate-limit rejection; always retryable.
    Throttling,
}

impl FailureClass {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureClass::NonRetryable)
    }
}

const THROTTLING_CODES: &[&str] = &[
    "ThrottlingException",
    "ProvisionedThroughputExceededException",
    "LimitExceededException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "SlowDown",
];

const RETRYABLE_CODES: &[&str] = &[
    "InternalServerError",
    "ServiceUnavailableException",
    "ServiceUnavailable",
    "InternalFailure",
    "RequestTimeout",
];

const NON_RETRYABLE_CODES: &[&str] = &[
    "InvalidParameterException",
    "InvalidImageFormatException",
    "ImageTooLargeException",
    "AccessDeniedException",
    "ResourceNotFoundException",
    "ResourceAlreadyExistsException",
    "ValidationException",
    "InvalidS3ObjectException",
];

/// Classify a provider failure. Anything unrecognized is non-retryable.
pub fn classify(failure: &ProviderFailure) -> FailureClass {
    let code = failure.code.as_deref();

    if failure.status == Some(429) || code.is_some_and(|c| THROTTLING_CODES.contains(&c)) {
        return FailureClass::Throttling;
    }
    if failure.transport.is_some() {
        return FailureClass::Retryable;
    }
    if code.is_some_and(|c| RETRYABLE_CODES.contains(&c)) {
        return FailureClass::Retryable;
    }
    if code.is_some_and(|c| NON_RETRYABLE_CODES.contains(&c)) {
        return FailureClass::NonRetryable;
    }
    match failure.status {
        Some(s) if (500..600).contains(&s) => FailureClass::Retryable,
        Some(s) if (400..500).contains(&s) => FailureClass::NonRetryable,
        _ => FailureClass::NonRetryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_429_is_retryable_throttle() {
        let err = FaceServiceError::provider(
            ProviderKind::Remote,
            "index_photo",
            ProviderFailure::http(429, None, "slow down"),
        );
        assert!(err.is_retryable());
        assert!(err.is_throttle());
    }

    #[test]
    fn test_403_is_not_retryable() {
        let err = FaceServiceError::provider(
            ProviderKind::Remote,
            "index_photo",
            ProviderFailure::http(403, Some("AccessDeniedException".into()), "denied"),
        );
        assert!(!err.is_retryable());
        assert!(!err.is_throttle());
    }

    #[test]
    fn test_throttle_codes_without_status() {
        for code in THROTTLING_CODES {
            let failure = ProviderFailure::with_code(code, "");
            assert_eq!(classify(&failure), FailureClass::Throttling, "{code}");
        }
    }

    #[test]
    fn test_throttle_code_wins_over_4xx_status() {
        let failure = ProviderFailure::http(400, Some("ProvisionedThroughputExceededException".into()), "");
        assert_eq!(classify(&failure), FailureClass::Throttling);
    }

    #[test]
    fn test_server_errors_and_transport_are_retryable() {
        assert_eq!(classify(&ProviderFailure::http(503, None, "")), FailureClass::Retryable);
        assert_eq!(classify(&ProviderFailure::http(500, None, "")), FailureClass::Retryable);
        assert_eq!(
            classify(&ProviderFailure::transport(TransportError::Timeout, "timed out")),
            FailureClass::Retryable
        );
        assert_eq!(
            classify(&ProviderFailure::with_code("InternalServerError", "")),
            FailureClass::Retryable
        );
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        assert_eq!(classify(&ProviderFailure::http(400, None, "")), FailureClass::NonRetryable);
        assert_eq!(classify(&ProviderFailure::http(404, None, "")), FailureClass::NonRetryable);
        assert_eq!(
            classify(&ProviderFailure::with_code("ImageTooLargeException", "")),
            FailureClass::NonRetryable
        );
    }

    #[test]
    fn test_unknown_failure_fails_closed() {
        assert_eq!(
            classify(&ProviderFailure::with_code("SomethingNew", "??")),
            FailureClass::NonRetryable
        );
        assert_eq!(classify(&ProviderFailure::default()), FailureClass::NonRetryable);
    }

    #[test]
    fn test_domain_errors_retry_flags() {
        assert!(!FaceServiceError::collection_not_found("event-1").is_retryable());
        assert!(!FaceServiceError::invalid("image", "empty").is_retryable());
        assert!(FaceServiceError::StorageFailed {
            operation: "add_faces",
            reason: "disk full".into()
        }
        .is_retryable());
        assert!(!FaceServiceError::Custom("x".into()).is_retryable());
    }

    #[test]
    fn test_retry_after_surfaces_from_failure() {
        let mut failure = ProviderFailure::http(429, None, "");
        failure.retry_after = Some(Duration::from_secs(3));
        let err = FaceServiceError::provider(ProviderKind::Remote, "search", failure);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }
}
