use crate::utils::error::{ClassifiedError, ErrorCategory};

const BALANCE_MARKERS: &[&str] = &["credit", "insufficient", "balance", "funds", "not enough"];
const NOT_FOUND_MARKERS: &[&str] = &["not found", "does not exist", "no such"];
const MALFORMED_MARKERS: &[&str] = &["malformed", "invalid", "bad request"];
const NETWORK_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "connection refused",
    "connection reset",
    "dns",
    "network unreachable",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawErrorKind {
    /// The upstream answered with a non-success status.
    Http,
    /// No response: timeout, refused connection, name resolution.
    Network,
    /// Input rejected before or while building a request.
    Malformed,
}

/// A failure as it comes off the wire, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawError {
    pub status: Option<u16>,
    pub message: String,
    pub kind: RawErrorKind,
}

impl RawError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            kind: RawErrorKind::Http,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            kind: RawErrorKind::Network,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            kind: RawErrorKind::Malformed,
        }
    }
}

impl From<reqwest::Error> for RawError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
            RawErrorKind::Network
        } else if err.is_builder() {
            RawErrorKind::Malformed
        } else {
            RawErrorKind::Http
        };
        Self {
            status,
            message: err.to_string(),
            kind,
        }
    }
}

/// Rebuilds the raw shape of an already classified error so it can be fed back
/// through [`classify`].
impl From<&ClassifiedError> for RawError {
    fn from(err: &ClassifiedError) -> Self {
        let kind = match err.category {
            ErrorCategory::Transient => RawErrorKind::Network,
            ErrorCategory::Validation => RawErrorKind::Malformed,
            _ => RawErrorKind::Http,
        };
        Self {
            status: err.status,
            message: err.message.clone(),
            kind,
        }
    }
}

fn mentions(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| haystack.contains(m))
}

/// Assigns a raw failure to exactly one category. Pure: same input, same output.
///
/// Rules are checked in priority order:
/// balance wording, then 404 / "not found", then 400 / malformed input,
/// then network-level failures. Anything else is `Unknown` and not retried.
pub fn classify(raw: &RawError) -> ClassifiedError {
    let lowered = raw.message.to_lowercase();

    let category = if mentions(&lowered, BALANCE_MARKERS) {
        ErrorCategory::InsufficientBalance
    } else if raw.status == Some(404) || mentions(&lowered, NOT_FOUND_MARKERS) {
        ErrorCategory::NotFound
    } else if raw.status == Some(400)
        || raw.kind == RawErrorKind::Malformed
        || mentions(&lowered, MALFORMED_MARKERS)
    {
        ErrorCategory::Validation
    } else if raw.kind == RawErrorKind::Network || mentions(&lowered, NETWORK_MARKERS) {
        ErrorCategory::Transient
    } else {
        ErrorCategory::Unknown
    };

    let message = if raw.message.trim().is_empty() {
        match raw.status {
            Some(status) => format!("upstream returned status {}", status),
            None => "unspecified failure".to_string(),
        }
    } else {
        raw.message.clone()
    };

    ClassifiedError {
        category,
        message,
        retryable: category.is_retryable(),
        status: raw.status,
        source: None,
    }
}
