use http::StatusCode;
use thiserror::Error;

/// Boxed error used at the transport and body-stream boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stage of a single execution attempt that produced an [`Error`].
///
/// Every failure is terminal: nothing is retried and later stages never run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Stage {
    /// Assembling the URL, method or headers failed
    Build,
    /// The body producer could not produce a stream
    Body,
    /// The transport failed to return a response
    Transport,
    /// A response validator rejected the response
    Validation,
    /// A response handler failed while consuming the body
    Handle,
}

/// Errors raised while producing a request body.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BodyError {
    /// File or stream I/O failure (e.g. missing file)
    #[error("body I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failure
    #[error("JSON body encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form URL encoding failure
    #[error("form body encoding failed: {0}")]
    Form(#[from] serde_urlencoded::ser::Error),

    /// A reader body can only be produced once
    #[error("reader body was already consumed by a previous request")]
    ReaderConsumed,
}

/// Errors raised by response validators.
///
/// Mismatch variants always carry both the actual and the expected value.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ValidationError {
    /// Response status is not one of the accepted codes
    #[error("unexpected status {actual}: expected {}", describe_statuses(.expected))]
    StatusMismatch {
        actual: StatusCode,
        /// Accepted codes; empty means any 2xx
        expected: Vec<u16>,
    },

    /// Response media type is not one of the accepted types
    #[error("unexpected content type '{actual}': expected {}", .expected.join(" or "))]
    ContentTypeMismatch {
        actual: String,
        expected: Vec<String>,
    },

    /// Check function of a peek validator rejected the body prefix
    #[error("body peek check failed: {0}")]
    Peek(#[source] BoxError),

    /// Reading the body prefix failed
    #[error("failed to read response body: {0}")]
    Body(#[source] BoxError),

    /// Custom validator failure
    #[error("{0}")]
    Other(#[source] BoxError),
}

fn describe_statuses(expected: &[u16]) -> String {
    if expected.is_empty() {
        return "2xx".to_owned();
    }
    let codes: Vec<String> = expected.iter().map(u16::to_string).collect();
    codes.join(" or ")
}

/// Errors raised by response handlers.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandleError {
    /// Reading the response body failed
    #[error("failed to read response body: {0}")]
    Body(#[source] BoxError),

    /// Decoding the body as JSON failed
    #[error("JSON decoding failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Writing the body to its destination failed
    #[error("writing response body failed: {0}")]
    Io(#[from] std::io::Error),

    /// Custom handler failure
    #[error("{0}")]
    Other(#[source] BoxError),
}

/// Terminal error of a request execution.
///
/// Use [`Error::stage`] to learn which stage failed. Partial output written
/// before a failure (e.g. a half-written file) is left as is.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// HTTP method is not a valid token
    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),

    /// Invalid header name
    #[error("invalid header name '{name}': {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },

    /// Invalid header value
    #[error("invalid value for header '{name}': {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },

    /// URL could not be assembled from scheme, host, path and params
    #[error("invalid URL '{url}': {reason}")]
    InvalidUri { url: String, reason: String },

    /// Request building failed
    #[error("failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Body producer failed
    #[error("request body: {0}")]
    Body(#[from] BodyError),

    /// Transport failed (network, TLS, etc); passed through unchanged
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// Default transport could not be initialized
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// Response rejected by a validator
    #[error("response validation: {0}")]
    Validation(#[from] ValidationError),

    /// Response handler failed
    #[error("response handler: {0}")]
    Handle(#[from] HandleError),
}

impl Error {
    /// Stage of the execution that produced this error
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Error::InvalidMethod(_)
            | Error::InvalidHeaderName { .. }
            | Error::InvalidHeaderValue { .. }
            | Error::InvalidUri { .. }
            | Error::RequestBuild(_) => Stage::Build,
            Error::Body(_) => Stage::Body,
            Error::Transport(_) | Error::Tls(_) => Stage::Transport,
            Error::Validation(_) => Stage::Validation,
            Error::Handle(_) => Stage::Handle,
        }
    }

    /// Response status if this is a status-mismatch validation error
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Validation(ValidationError::StatusMismatch { actual, .. }) => Some(*actual),
            _ => None,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::fmt;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[test]
    fn test_status_mismatch_names_actual_and_expected() {
        let err = Error::from(ValidationError::StatusMismatch {
            actual: StatusCode::NOT_FOUND,
            expected: vec![200, 201],
        });
        let msg = err.to_string();
        assert!(msg.contains("404"), "{msg}");
        assert!(msg.contains("200 or 201"), "{msg}");
        assert_eq!(err.stage(), Stage::Validation);
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_empty_expected_statuses_render_as_2xx() {
        let err = ValidationError::StatusMismatch {
            actual: StatusCode::BAD_GATEWAY,
            expected: Vec::new(),
        };
        assert_eq!(err.to_string(), "unexpected status 502 Bad Gateway: expected 2xx");
    }

    #[test]
    fn test_transport_error_preserves_source() {
        let err = Error::Transport(Box::new(TestError("connection refused")));
        assert_eq!(err.stage(), Stage::Transport);

        let source = err.source().unwrap();
        let downcast = source.downcast_ref::<TestError>().unwrap();
        assert_eq!(downcast.0, "connection refused");
    }

    #[test]
    fn test_stage_classification() {
        assert_eq!(Error::InvalidMethod("B AD".to_owned()).stage(), Stage::Build);
        assert_eq!(
            Error::from(BodyError::ReaderConsumed).stage(),
            Stage::Body
        );
        let io = std::io::Error::other("disk full");
        assert_eq!(Error::from(HandleError::from(io)).stage(), Stage::Handle);
        assert_eq!(Error::InvalidMethod("X".to_owned()).status(), None);
    }
}
