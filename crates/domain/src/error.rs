//! Shared error type and wire-code taxonomy used across the gateway crates.

use serde::Serialize;

/// Shared error type used across all gateway crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Validation(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("queue full for model {0}")]
    QueueFull(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("artifact expired: {0}")]
    ArtifactExpired(String),

    #[error("{0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A wire-code error taxonomy entry, see SPEC_FULL.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorTaxonomy {
    pub code: &'static str,
    pub status: u16,
}

impl Error {
    /// Map this error to its wire code and HTTP status, per the fixed
    /// table in §7 of the spec. Lossless in message, normalizing in code.
    pub fn taxonomy(&self) -> ErrorTaxonomy {
        let (code, status): (&'static str, u16) = match self {
            Error::Validation(_) => ("validation_error", 422),
            Error::Auth(_) => ("auth_error", 401),
            Error::Forbidden(_) => ("forbidden", 403),
            Error::NotFound(_) => ("not_found", 404),
            Error::ProviderNotConfigured(_) => ("provider_not_configured", 400),
            Error::UnsupportedProvider(_) => ("unsupported_provider", 400),
            Error::ModelNotFound(_) => ("model_not_found", 404),
            Error::QueueFull(_) => ("queue_full", 503),
            Error::RateLimit(_) => ("rate_limit", 429),
            Error::ServiceUnavailable(_) => ("service_unavailable", 503),
            Error::Timeout(_) => ("timeout", 504),
            Error::ArtifactExpired(_) => ("artifact_expired", 410),
            Error::Io(_) | Error::Json(_) | Error::Internal(_) | Error::Other(_) => {
                ("internal_error", 500)
            }
        };
        ErrorTaxonomy { code, status }
    }

    pub fn code(&self) -> &'static str {
        self.taxonomy().code
    }

    pub fn status(&self) -> u16 {
        self.taxonomy().status
    }

    /// Inverse of [`Error::code`]: reconstructs an error carrying the
    /// given wire code, used where an error crossed a boundary that only
    /// preserves `(code, message)` (e.g. a request queue's stored
    /// outcome) and must re-enter `Result<_, Error>` plumbing.
    pub fn from_code(code: &str, message: String) -> Error {
        match code {
            "validation_error" => Error::Validation(message),
            "auth_error" => Error::Auth(message),
            "forbidden" => Error::Forbidden(message),
            "not_found" => Error::NotFound(message),
            "provider_not_configured" => Error::ProviderNotConfigured(message),
            "unsupported_provider" => Error::UnsupportedProvider(message),
            "model_not_found" => Error::ModelNotFound(message),
            "queue_full" => Error::QueueFull(message),
            "rate_limit" => Error::RateLimit(message),
            "service_unavailable" => Error::ServiceUnavailable(message),
            "timeout" => Error::Timeout(message),
            "artifact_expired" => Error::ArtifactExpired(message),
            _ => Error::Internal(message),
        }
    }
}

/// A single non-2xx response from a provider adapter, before normalization.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub status_code: u16,
    pub message: String,
}

/// Maps a raw provider HTTP status into the gateway's own taxonomy.
/// Lossless in message, normalizing in code (spec §7 "Propagation policy").
pub fn map_provider_error(err: ProviderError) -> Error {
    match err.status_code {
        429 => Error::RateLimit(err.message),
        401 => Error::Auth(err.message),
        503 => Error::ServiceUnavailable(err.message),
        504 => Error::Timeout(err.message),
        _ => Error::Internal(err.message),
    }
}

/// Wire shape for `{"error": {...}}` JSON bodies.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        ErrorBody {
            error: ErrorDetail {
                code: err.code(),
                message: mask_secrets(&err.to_string()),
                details: None,
            },
        }
    }
}

/// Masks likely secret tokens (API keys, bearer tokens) inside a message
/// before it is logged or returned to a client. Any run of 20+
/// alphanumeric/`-`/`_` characters has its middle portion replaced with
/// `...`, keeping a few characters on each end for diagnosability.
pub fn mask_secrets(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut current = String::new();

    let flush = |current: &mut String, out: &mut String| {
        if current.len() >= 20 {
            out.push_str(&current[..4]);
            out.push_str("...");
            out.push_str(&current[current.len() - 4..]);
        } else {
            out.push_str(current);
        }
        current.clear();
    };

    for ch in message.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            current.push(ch);
        } else {
            flush(&mut current, &mut out);
            out.push(ch);
        }
    }
    flush(&mut current, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_422() {
        let err = Error::Validation("bad".into());
        assert_eq!(err.taxonomy(), ErrorTaxonomy { code: "validation_error", status: 422 });
    }

    #[test]
    fn queue_full_maps_to_503() {
        let err = Error::QueueFull("m1".into());
        assert_eq!(err.code(), "queue_full");
        assert_eq!(err.status(), 503);
    }

    #[test]
    fn provider_429_becomes_rate_limit() {
        let mapped = map_provider_error(ProviderError { status_code: 429, message: "slow down".into() });
        assert_eq!(mapped.code(), "rate_limit");
    }

    #[test]
    fn provider_unknown_status_becomes_internal() {
        let mapped = map_provider_error(ProviderError { status_code: 418, message: "teapot".into() });
        assert_eq!(mapped.code(), "internal_error");
    }

    #[test]
    fn mask_secrets_masks_long_tokens_only() {
        let msg = "auth failed for key sk-ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 on request";
        let masked = mask_secrets(msg);
        assert!(!masked.contains("ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789"));
        assert!(masked.contains("sk-A") || masked.contains("..."));
    }

    #[test]
    fn mask_secrets_leaves_short_words_alone() {
        let msg = "model gpt-4o not found";
        assert_eq!(mask_secrets(msg), msg);
    }
}
