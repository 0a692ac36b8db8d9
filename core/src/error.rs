//! Error types for Mainzelliste conversations.
//!
//! # Design
//! Every failed conversation ends in exactly one `ApiError`. The variant tells
//! calling code what went wrong; `Display` gives the text to show to a user.
//! For protocol errors that text is the server's response body, which is
//! where the service puts its explanation.
//!
//! `NotFound` is reserved for a 404 while creating the session: at that point
//! it means the BaseURL does not point at a Mainzelliste. A 404 on a later
//! step is an ordinary `Server` error.

use crate::http::HttpResponse;
use crate::transport::TransportError;

pub const CONNECTIVITY_MESSAGE: &str =
    "Could not connect to the Mainzelliste service. Please check the connection and the BaseURL.";

pub const NOT_FOUND_MESSAGE: &str = "The Mainzelliste service was not found. Please check the BaseURL.";

/// Errors ending a conversation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// No HTTP response was received.
    #[error("{}", CONNECTIVITY_MESSAGE)]
    Connectivity { source: TransportError },

    /// The session endpoint does not exist at the configured BaseURL.
    #[error("{}", NOT_FOUND_MESSAGE)]
    NotFound,

    /// 409 on a step where it is not an expected answer.
    #[error("{}", describe(&409, .body))]
    Conflict { body: String },

    /// Any other unexpected status.
    #[error("{}", describe(.status, .body))]
    Server { status: u16, body: String },

    /// A success status whose payload could not be interpreted.
    #[error("malformed {step} response: {reason}")]
    Malformed { step: &'static str, reason: String },
}

impl ApiError {
    /// Classify a response whose status the current step did not expect.
    pub fn from_response(response: &HttpResponse) -> Self {
        let body = response.body().text();
        match response.status() {
            409 => ApiError::Conflict { body },
            status => ApiError::Server { status, body },
        }
    }

    pub fn malformed(step: &'static str, reason: impl Into<String>) -> Self {
        ApiError::Malformed {
            step,
            reason: reason.into(),
        }
    }

    /// Human-readable message for display.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// HTTP status of the failing response, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Connectivity { .. } | ApiError::Malformed { .. } => None,
            ApiError::NotFound => Some(404),
            ApiError::Conflict { .. } => Some(409),
            ApiError::Server { status, .. } => Some(*status),
        }
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, ApiError::Connectivity { .. })
    }
}

impl From<TransportError> for ApiError {
    fn from(source: TransportError) -> Self {
        ApiError::Connectivity { source }
    }
}

/// The response body when there is one, otherwise the status line.
fn describe(status: &u16, body: &str) -> String {
    if !body.trim().is_empty() {
        return body.to_string();
    }
    match reqwest::StatusCode::from_u16(*status)
        .ok()
        .and_then(|s| s.canonical_reason())
    {
        Some(reason) => format!("HTTP {status} {reason}"),
        None => format!("HTTP {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpBody, HttpResponse};

    #[test]
    fn server_error_shows_body() {
        let response = HttpResponse::new(400, HttpBody::new("text/plain", "Field 'vorname' is missing"));
        let err = ApiError::from_response(&response);
        assert!(matches!(err, ApiError::Server { status: 400, .. }));
        assert_eq!(err.message(), "Field 'vorname' is missing");
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn server_error_without_body_shows_status() {
        let err = ApiError::from_response(&HttpResponse::empty(500));
        assert_eq!(err.message(), "HTTP 500 Internal Server Error");
    }

    #[test]
    fn conflict_is_its_own_variant() {
        let err = ApiError::from_response(&HttpResponse::empty(409));
        assert!(matches!(err, ApiError::Conflict { .. }));
        assert_eq!(err.message(), "HTTP 409 Conflict");
    }

    #[test]
    fn connectivity_uses_fixed_message() {
        let err = ApiError::from(TransportError::Connect("dns error".to_string()));
        assert!(err.is_connectivity());
        assert_eq!(err.message(), CONNECTIVITY_MESSAGE);
        assert_eq!(err.status(), None);
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "connection failed: dns error");
    }

    #[test]
    fn not_found_message() {
        assert_eq!(ApiError::NotFound.message(), NOT_FOUND_MESSAGE);
        assert_eq!(ApiError::NotFound.status(), Some(404));
    }
}
