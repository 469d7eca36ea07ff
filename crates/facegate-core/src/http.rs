//! Translation of `reqwest` outcomes into [`ProviderFailure`]s.

use crate::error::{ProviderFailure, TransportError};
use crate::wire::ErrorBody;
use reqwest::header::RETRY_AFTER;
use reqwest::Response;
use serde::Deserialize;
use std::time::Duration;

const ERROR_TYPE_HEADER: &str = "x-amzn-errortype";

/// Failure for a request that never produced a usable response.
pub(crate) fn failure_from_reqwest(err: &reqwest::Error) -> ProviderFailure {
    if err.is_timeout() {
        ProviderFailure::transport(TransportError::Timeout, err.to_string())
    } else if err.is_connect() {
        ProviderFailure::transport(TransportError::Connect, err.to_string())
    } else if err.is_request() || err.is_body() {
        ProviderFailure::transport(TransportError::Interrupted, err.to_string())
    } else if err.is_decode() {
        ProviderFailure::with_code("MalformedResponse", err.to_string())
    } else {
        ProviderFailure {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
            ..Default::default()
        }
    }
}

/// Error bodies seen in the wild: the provider's own shape, a proxy's
/// `detail` wrapper around it, or a plain `{"error": ...}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum AnyErrorBody {
    Direct(ErrorBody),
    Wrapped { detail: ErrorBody },
    Plain { error: String },
    Detail { detail: String },
}

/// Parse a body into `(code, message)`.
pub(crate) fn parse_error_body(body: &str) -> (Option<String>, String) {
    match serde_json::from_str::<AnyErrorBody>(body) {
        Ok(AnyErrorBody::Direct(e)) | Ok(AnyErrorBody::Wrapped { detail: e }) => {
            (Some(e.error_type), e.message)
        }
        Ok(AnyErrorBody::Detail { detail }) => (None, detail),
        Ok(AnyErrorBody::Plain { error }) => (Some(error.clone()), error),
        Err(_) => (None, body.trim().to_string()),
    }
}

/// Consume a non-success response into a failure.
pub(crate) async fn failure_from_response(resp: Response) -> ProviderFailure {
    let status = resp.status().as_u16();
    let retry_after = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let header_code = resp
        .headers()
        .get(ERROR_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(':').next().unwrap_or(v).to_string());

    let body = resp.text().await.unwrap_or_default();
    let (body_code, message) = parse_error_body(&body);

    ProviderFailure {
        status: Some(status),
        code: body_code.or(header_code),
        message,
        transport: None,
        retry_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_direct_error() {
        let (code, msg) = parse_error_body(r#"{"__type":"ResourceNotFoundException","message":"Collection not found"}"#);
        assert_eq!(code.as_deref(), Some("ResourceNotFoundException"));
        assert_eq!(msg, "Collection not found");
    }

    #[test]
    fn test_parse_wrapped_error() {
        let (code, msg) =
            parse_error_body(r#"{"detail":{"__type":"ResourceNotFoundException","message":"Collection not found"}}"#);
        assert_eq!(code.as_deref(), Some("ResourceNotFoundException"));
        assert_eq!(msg, "Collection not found");
    }

    #[test]
    fn test_parse_detail_string_and_plain() {
        let (code, msg) = parse_error_body(r#"{"detail":"Collection already exists"}"#);
        assert!(code.is_none());
        assert_eq!(msg, "Collection already exists");

        let (code, _) = parse_error_body(r#"{"error":"image_too_large"}"#);
        assert_eq!(code.as_deref(), Some("image_too_large"));

        let (code, _) = parse_error_body(r#"{"error":"invalid_image","detail":"Failed to fetch"}"#);
        assert_eq!(code.as_deref(), Some("invalid_image"));
    }

    #[test]
    fn test_parse_non_json() {
        let (code, msg) = parse_error_body("  Bad Gateway\n");
        assert!(code.is_none());
        assert_eq!(msg, "Bad Gateway");
    }
}
