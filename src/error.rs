//! Error types for the resilience layer
//!
//! Provides unified error handling using thiserror. Every failure carries a
//! structural [`FailureKind`] so recovery decisions never depend on message text.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::section::SectionId;

// == Failure Kind ==
/// Classification of a failure, used to pick a recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A deadline fired before the operation settled
    Timeout,
    /// The circuit breaker rejected the call without running it
    CircuitOpen,
    /// Anything else
    Generic,
}

impl FailureKind {
    /// Timeout and circuit-open failures are likely transient and may be
    /// retried automatically. Generic failures need a user decision.
    pub fn is_transient(self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::CircuitOpen)
    }
}

// == Resilience Error Enum ==
/// Unified error type for the resilience layer.
#[derive(Error, Debug, Clone)]
pub enum ResilienceError {
    /// The deadline supervisor stopped waiting
    #[error("Operation timed out after {}ms", .deadline.as_millis())]
    Timeout { deadline: Duration },

    /// The breaker for `key` is open
    #[error("Operation rejected: circuit breaker open for '{key}'")]
    CircuitOpen { key: String },

    /// The wrapped operation itself failed
    #[error("{message}")]
    Operation {
        section: Option<SectionId>,
        message: String,
    },

    /// Unknown section, key or other lookup miss
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalidation pattern failed to compile
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Startup configuration is inconsistent
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ResilienceError {
    // == Constructors ==
    /// Wraps an arbitrary operation error as a generic failure.
    pub fn operation(err: impl std::fmt::Display) -> Self {
        ResilienceError::Operation {
            section: None,
            message: err.to_string(),
        }
    }

    /// Tags a generic failure with the section it belongs to.
    ///
    /// Other variants are returned unchanged.
    pub fn for_section(self, id: &SectionId) -> Self {
        match self {
            ResilienceError::Operation { message, .. } => ResilienceError::Operation {
                section: Some(id.clone()),
                message,
            },
            other => other,
        }
    }

    // == Kind ==
    /// Structural classification of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            ResilienceError::Timeout { .. } => FailureKind::Timeout,
            ResilienceError::CircuitOpen { .. } => FailureKind::CircuitOpen,
            _ => FailureKind::Generic,
        }
    }

    /// Section tag carried by the error, if any.
    pub fn section(&self) -> Option<&SectionId> {
        match self {
            ResilienceError::Operation { section, .. } => section.as_ref(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for ResilienceError {
    fn from(err: anyhow::Error) -> Self {
        // alternate formatting keeps the context chain
        ResilienceError::operation(format!("{:#}", err))
    }
}

// == Failure Report ==
/// Cloneable snapshot of a failure, as exposed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    /// Structural classification
    pub kind: FailureKind,
    /// User-facing message
    pub message: String,
    /// Section the failure was attributed to
    pub section: Option<SectionId>,
    /// Technical detail, shown collapsed
    pub detail: Option<String>,
}

impl FailureReport {
    /// Builds a report from an error, attributing it to `section`.
    pub fn from_error(err: &ResilienceError, section: Option<&SectionId>) -> Self {
        let section = err.section().or(section).cloned();
        Self {
            kind: err.kind(),
            message: err.to_string(),
            section,
            detail: Some(format!("{:?}", err)),
        }
    }
}

// == Message Classification ==
/// Substrings that mark an untagged error message as timeout-class.
const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out", "exceeded", "deadline"];

/// Heuristic classification for errors that arrive without a structural tag.
pub fn classify_message(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    if lower.contains("circuit breaker open") {
        FailureKind::CircuitOpen
    } else if TIMEOUT_MARKERS.iter().any(|m| lower.contains(m)) {
        FailureKind::Timeout
    } else {
        FailureKind::Generic
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for ResilienceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ResilienceError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ResilienceError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ResilienceError::NotFound(_) => StatusCode::NOT_FOUND,
            ResilienceError::InvalidRequest(_) | ResilienceError::InvalidPattern { .. } => {
                StatusCode::BAD_REQUEST
            }
            ResilienceError::Operation { .. } | ResilienceError::Configuration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the resilience layer.
pub type Result<T> = std::result::Result<T, ResilienceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = ResilienceError::Timeout {
            deadline: Duration::from_millis(5000),
        };
        assert_eq!(err.to_string(), "Operation timed out after 5000ms");
        assert_eq!(err.kind(), FailureKind::Timeout);
    }

    #[test]
    fn test_circuit_open_message() {
        let err = ResilienceError::CircuitOpen {
            key: "tasks".to_string(),
        };
        assert!(err.to_string().contains("circuit breaker open"));
        assert_eq!(err.kind(), FailureKind::CircuitOpen);
        assert!(err.kind().is_transient());
    }

    #[test]
    fn test_generic_is_not_transient() {
        let err = ResilienceError::operation("boom");
        assert_eq!(err.kind(), FailureKind::Generic);
        assert!(!err.kind().is_transient());
    }

    #[test]
    fn test_for_section_tags_only_operation_errors() {
        let id = SectionId::from("pillars");
        let tagged = ResilienceError::operation("boom").for_section(&id);
        assert_eq!(tagged.section(), Some(&id));

        let timeout = ResilienceError::Timeout {
            deadline: Duration::from_millis(1),
        }
        .for_section(&id);
        assert!(timeout.section().is_none());
    }

    #[test]
    fn test_classify_message() {
        assert_eq!(classify_message("Request Timeout"), FailureKind::Timeout);
        assert_eq!(classify_message("query timed out"), FailureKind::Timeout);
        assert_eq!(classify_message("quota exceeded"), FailureKind::Timeout);
        assert_eq!(
            classify_message("Operation rejected: circuit breaker open for 'x'"),
            FailureKind::CircuitOpen
        );
        assert_eq!(classify_message("pillars getPage failed"), FailureKind::Generic);
    }

    #[test]
    fn test_report_prefers_error_tag() {
        let own = SectionId::from("tasks");
        let other = SectionId::from("journal");
        let err = ResilienceError::operation("boom").for_section(&own);
        let report = FailureReport::from_error(&err, Some(&other));
        assert_eq!(report.section, Some(own));
        assert_eq!(report.kind, FailureKind::Generic);
        assert!(report.detail.is_some());
    }

    #[test]
    fn test_anyhow_conversion_is_generic() {
        let err: ResilienceError = anyhow::anyhow!("db down").context("loading").into();
        assert_eq!(err.kind(), FailureKind::Generic);
        assert!(err.to_string().contains("db down"));
    }
}
