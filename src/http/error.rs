//! Error types for the HTTP session.

use thiserror::Error;

/// Errors raised by [`super::HttpSession`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HttpSessionError {
    /// Raised when the HTTP client cannot be constructed.
    #[error("failed to build HTTP client: {message}")]
    Client {
        /// Message returned by the client builder.
        message: String,
    },
    /// Raised when a request URL cannot be formed.
    #[error("invalid request URL: {message}")]
    Url {
        /// Description of the problem.
        message: String,
    },
    /// Raised when the login is rejected.
    #[error("authentication failed with status {status}")]
    Unauthorized {
        /// HTTP status returned by the endpoint.
        status: u16,
    },
    /// Raised when the endpoint answers with a non-success status.
    #[error("{operation} returned status {status}: {body}")]
    Status {
        /// Exchange that failed.
        operation: String,
        /// HTTP status returned by the endpoint.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },
    /// Raised when a response body cannot be decoded.
    #[error("failed to decode {operation} response: {message}")]
    Decode {
        /// Exchange whose response was malformed.
        operation: String,
        /// Decoder message.
        message: String,
    },
    /// Wrapper for connection-level failures.
    #[error("request failed: {message}")]
    Request {
        /// Message returned by the HTTP client.
        message: String,
    },
}

impl HttpSessionError {
    /// Returns `true` when repeating the exchange may succeed: connection
    /// failures, throttling, and server-side statuses.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Request { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Client { .. }
            | Self::Url { .. }
            | Self::Unauthorized { .. }
            | Self::Decode { .. } => false,
        }
    }
}

impl From<reqwest::Error> for HttpSessionError {
    fn from(value: reqwest::Error) -> Self {
        Self::Request {
            message: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::connection(HttpSessionError::Request { message: String::from("refused") }, true)]
    #[case::unavailable(
        HttpSessionError::Status {
            operation: String::from("login"),
            status: 503,
            body: String::new(),
        },
        true
    )]
    #[case::throttled(
        HttpSessionError::Status {
            operation: String::from("query-volume"),
            status: 429,
            body: String::new(),
        },
        true
    )]
    #[case::not_found(
        HttpSessionError::Status {
            operation: String::from("find-datastore"),
            status: 404,
            body: String::new(),
        },
        false
    )]
    #[case::rejected_login(HttpSessionError::Unauthorized { status: 401 }, false)]
    fn retryable_errors_are_transient(#[case] err: HttpSessionError, #[case] expected: bool) {
        assert_eq!(err.is_retryable(), expected, "{err}");
    }
}
