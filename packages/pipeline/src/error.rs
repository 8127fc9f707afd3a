//! Error taxonomy for the pipeline.
//!
//! `PipelineError` is the structured, pattern-matchable error surfaced to
//! callers of the orchestrator. Inside stage handlers and collaborators,
//! `anyhow::Error` is the transport; failures there never escape the worker
//! loop — they are converted into retries, dead letters, or status updates.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the pipeline's public operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The underlying queue has been closed and cannot accept work.
    #[error("queue \"{queue}\" is unavailable")]
    QueueUnavailable { queue: String },

    /// No analysis record with this id exists.
    #[error("analysis {0} not found")]
    NotFound(Uuid),

    /// A submission must name at least one competitor domain.
    #[error("at least one target domain is required")]
    EmptyTargets,

    /// The fan-in wait exceeded its hard deadline with results outstanding.
    #[error(
        "scraping timed out after {waited_secs}s with {received} of {expected} competitors finished"
    )]
    PipelineTimeout {
        received: usize,
        expected: usize,
        waited_secs: u64,
    },

    /// Every target domain failed terminally; there is nothing to analyze.
    #[error("all {0} target domains failed to scrape")]
    AllTargetsFailed(usize),

    /// The status store rejected or failed an operation.
    #[error("status store error: {0}")]
    Store(String),
}

/// Classification of a handler failure for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    /// Transient error - will retry if attempts remain
    #[default]
    Retryable,
    /// Permanent error - will not retry
    NonRetryable,
}

impl ErrorKind {
    /// Whether this error kind should trigger a retry
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorKind::Retryable)
    }
}

/// Classify an error to determine retry behavior.
///
/// Returns `Retryable` for transient errors that may succeed on retry,
/// and `NonRetryable` for permanent failures.
pub fn classify_error(error: &anyhow::Error) -> ErrorKind {
    let error_str = error.to_string().to_lowercase();

    // Non-retryable: validation errors, not found, permission denied
    if error_str.contains("not found")
        || error_str.contains("invalid")
        || error_str.contains("unauthorized")
        || error_str.contains("forbidden")
    {
        return ErrorKind::NonRetryable;
    }

    // Non-retryable: malformed payloads
    if error_str.contains("deserialize") || error_str.contains("parse") {
        return ErrorKind::NonRetryable;
    }

    // Non-retryable: hard HTTP client errors. 408 (request timeout) and
    // 429 (rate limited) can clear on retry.
    if let Some(code) = error_str
        .split("http ")
        .nth(1)
        .and_then(|rest| rest.get(..3))
        .and_then(|digits| digits.parse::<u16>().ok())
    {
        if (400..500).contains(&code) && code != 408 && code != 429 {
            return ErrorKind::NonRetryable;
        }
    }

    // Everything else is retryable (network errors, timeouts, etc.)
    ErrorKind::Retryable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_counts() {
        let err = PipelineError::PipelineTimeout {
            received: 2,
            expected: 5,
            waited_secs: 300,
        };
        let msg = err.to_string();
        assert!(msg.contains("2 of 5"));
        assert!(msg.contains("300s"));
    }

    #[test]
    fn classify_error_retryable() {
        let error = anyhow::anyhow!("connection timeout");
        assert_eq!(classify_error(&error), ErrorKind::Retryable);
        assert!(classify_error(&error).should_retry());
    }

    #[test]
    fn classify_error_not_found() {
        let error = anyhow::anyhow!("domain record not found");
        assert_eq!(classify_error(&error), ErrorKind::NonRetryable);
    }

    #[test]
    fn classify_error_parse() {
        let error = anyhow::anyhow!("failed to parse response body");
        assert_eq!(classify_error(&error), ErrorKind::NonRetryable);
    }

    #[test]
    fn classify_hard_client_errors_as_permanent() {
        for msg in [
            "HTTP 404 Not Found for https://gone.example.com/",
            "HTTP 410 Gone for https://gone.example.com/",
            "HTTP 400 Bad Request for https://gone.example.com/",
        ] {
            let error = anyhow::anyhow!(msg);
            assert_eq!(classify_error(&error), ErrorKind::NonRetryable, "{msg}");
        }
    }

    #[test]
    fn classify_transient_http_statuses_as_retryable() {
        for msg in [
            "HTTP 429 Too Many Requests for https://busy.example.com/",
            "HTTP 408 Request Timeout for https://slow.example.com/",
            "HTTP 503 Service Unavailable for https://down.example.com/",
        ] {
            let error = anyhow::anyhow!(msg);
            assert_eq!(classify_error(&error), ErrorKind::Retryable, "{msg}");
        }
    }
}
