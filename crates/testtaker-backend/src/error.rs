//! HTTP error classification.
//!
//! Maps transport failures and error responses onto the engine's
//! [`BackendError`] so callers can tell rejections from transient faults.

use thiserror::Error;

use testtaker_core::error::BackendError;

/// Default wait when a 429 response carries no usable `retry-after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Errors raised while constructing an HTTP backend.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Classify a failed send.
pub(crate) fn from_transport(err: &reqwest::Error, timeout_secs: u64) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(timeout_secs)
    } else {
        BackendError::Network(err.to_string())
    }
}

/// Pass successful responses through; turn error statuses into a
/// [`BackendError`].
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, BackendError> {
    let status = response.status().as_u16();
    if status < 400 {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    Err(classify(status, retry_after, &body))
}

/// Map an error status and body to a [`BackendError`].
pub fn classify(status: u16, retry_after_secs: Option<u64>, body: &str) -> BackendError {
    match status {
        401 | 403 => BackendError::Unauthorized(error_message(body)),
        404 => BackendError::NotFound(error_message(body)),
        409 | 410 | 422 => BackendError::Rejected(error_message(body)),
        429 => BackendError::RateLimited {
            retry_after_ms: retry_after_secs.unwrap_or(DEFAULT_RETRY_AFTER_SECS) * 1000,
        },
        _ => BackendError::Api {
            status,
            message: error_message(body),
        },
    }
}

/// Pull a human-readable message out of an error body.
///
/// JSON bodies are searched for `message`, then `detail`, then `error`;
/// anything else is returned trimmed.
fn error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "detail", "error"] {
            if let Some(text) = json.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_auth_statuses() {
        assert!(matches!(
            classify(401, None, "nope"),
            BackendError::Unauthorized(m) if m == "nope"
        ));
        assert!(matches!(
            classify(403, None, ""),
            BackendError::Unauthorized(_)
        ));
    }

    #[test]
    fn rejections_use_json_message() {
        let err = classify(409, None, r#"{"message":"attempt limit reached"}"#);
        assert_eq!(err, BackendError::Rejected("attempt limit reached".into()));

        let err = classify(422, None, r#"{"detail":"test is closed"}"#);
        assert_eq!(err, BackendError::Rejected("test is closed".into()));
        assert!(matches!(classify(410, None, ""), BackendError::Rejected(_)));
    }

    #[test]
    fn rate_limit_defaults_retry_after() {
        assert_eq!(
            classify(429, None, ""),
            BackendError::RateLimited {
                retry_after_ms: 5000
            }
        );
        assert_eq!(
            classify(429, Some(2), ""),
            BackendError::RateLimited {
                retry_after_ms: 2000
            }
        );
    }

    #[test]
    fn other_statuses_are_api_errors() {
        let err = classify(503, None, "  maintenance \n");
        assert_eq!(
            err,
            BackendError::Api {
                status: 503,
                message: "maintenance".into()
            }
        );
        assert!(err.is_transient());
        assert!(matches!(classify(404, None, ""), BackendError::NotFound(_)));
    }
}
