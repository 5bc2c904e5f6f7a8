//! Response validators.
//!
//! Validators run in registration order against the realized response,
//! before any handler. The first failure stops the chain.

use crate::error::{BoxError, ValidationError};
use crate::response::Response;
use async_trait::async_trait;
use http::StatusCode;
use std::sync::Arc;

/// Predicate over a realized response.
#[async_trait]
pub trait ResponseValidator: Send + Sync {
    /// Accept the response or describe why it is rejected.
    ///
    /// Validators may peek at the body through [`Response::body_mut`]; they
    /// must not consume it.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] describing the rejection.
    async fn validate(&self, res: &mut Response) -> Result<(), ValidationError>;
}

/// Check function for [`CheckPeek`]
pub type PeekFn = Arc<dyn Fn(&[u8]) -> Result<(), BoxError> + Send + Sync>;

/// Accepts responses whose status is in a fixed set.
#[derive(Debug, Clone)]
pub struct CheckStatus {
    accept: Vec<u16>,
}

/// Validator for the status code of a response.
///
/// An empty set accepts any 2xx status.
#[must_use]
pub fn check_status(codes: impl IntoIterator<Item = u16>) -> CheckStatus {
    CheckStatus {
        accept: codes.into_iter().collect(),
    }
}

/// Validator applied when a builder has none registered: status must be 2xx
#[must_use]
pub fn default_validator() -> CheckStatus {
    CheckStatus { accept: Vec::new() }
}

impl CheckStatus {
    #[must_use]
    pub fn accepts(&self, status: StatusCode) -> bool {
        if self.accept.is_empty() {
            return status.is_success();
        }
        self.accept.contains(&status.as_u16())
    }
}

#[async_trait]
impl ResponseValidator for CheckStatus {
    async fn validate(&self, res: &mut Response) -> Result<(), ValidationError> {
        if self.accepts(res.status()) {
            return Ok(());
        }
        Err(ValidationError::StatusMismatch {
            actual: res.status(),
            expected: self.accept.clone(),
        })
    }
}

/// Accepts responses whose media type is in a fixed set.
#[derive(Debug, Clone)]
pub struct CheckContentType {
    accept: Vec<String>,
}

/// Validator for the `Content-Type` of a response.
///
/// Parameters such as `charset` are ignored on both sides and comparison is
/// ASCII case-insensitive. An accepted type ending in `/` or `/*` matches
/// by prefix, so `text/` and `text/*` both accept `text/html`.
#[must_use]
pub fn check_content_type<I, S>(types: I) -> CheckContentType
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    CheckContentType {
        accept: types.into_iter().map(Into::into).collect(),
    }
}

fn media_type(value: &str) -> String {
    value
        .split_once(';')
        .map_or(value, |(mt, _)| mt)
        .trim()
        .to_ascii_lowercase()
}

fn media_type_matches(actual: &str, expected: &str) -> bool {
    let expected = media_type(expected);
    if expected == "*/*" {
        return !actual.is_empty();
    }
    let prefix = expected.strip_suffix('*').unwrap_or(&expected);
    if prefix.ends_with('/') {
        return actual.starts_with(prefix);
    }
    actual == expected
}

impl CheckContentType {
    #[must_use]
    pub fn accepts(&self, content_type: &str) -> bool {
        let actual = media_type(content_type);
        self.accept.iter().any(|ct| media_type_matches(&actual, ct))
    }
}

#[async_trait]
impl ResponseValidator for CheckContentType {
    async fn validate(&self, res: &mut Response) -> Result<(), ValidationError> {
        let actual = res
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if self.accepts(actual) {
            return Ok(());
        }
        Err(ValidationError::ContentTypeMismatch {
            actual: actual.to_owned(),
            expected: self.accept.clone(),
        })
    }
}

/// Runs a check over the first bytes of the body without consuming them.
#[derive(Clone)]
pub struct CheckPeek {
    n: usize,
    check: PeekFn,
}

/// Validator that peeks at the first `n` bytes of a response body.
///
/// `check` sees fewer than `n` bytes only if the body is shorter. The
/// peeked bytes stay in front of the body for later validators and handlers.
#[must_use]
pub fn check_peek<F>(n: usize, check: F) -> CheckPeek
where
    F: Fn(&[u8]) -> Result<(), BoxError> + Send + Sync + 'static,
{
    CheckPeek {
        n,
        check: Arc::new(check),
    }
}

#[async_trait]
impl ResponseValidator for CheckPeek {
    async fn validate(&self, res: &mut Response) -> Result<(), ValidationError> {
        let prefix = res
            .body_mut()
            .peek(self.n)
            .await
            .map_err(ValidationError::Body)?;
        (self.check)(prefix).map_err(ValidationError::Peek)
    }
}

impl std::fmt::Debug for CheckPeek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckPeek")
            .field("n", &self.n)
            .finish_non_exhaustive()
    }
}

/// Run `validators` in order; an empty chain falls back to [`default_validator`].
///
/// # Errors
/// Returns the error of the first validator that rejects the response.
pub async fn run_validators(
    validators: &[Arc<dyn ResponseValidator>],
    res: &mut Response,
) -> Result<(), ValidationError> {
    if validators.is_empty() {
        return default_validator().validate(res).await;
    }
    for (index, validator) in validators.iter().enumerate() {
        if let Err(e) = validator.validate(res).await {
            tracing::debug!(
                index,
                status = res.status().as_u16(),
                error = %e,
                "response validation failed"
            );
            return Err(e);
        }
    }
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::response::ResponseBody;
    use bytes::Bytes;
    use http::HeaderMap;
    use http_body_util::{BodyExt, Full};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn body(text: &'static str) -> ResponseBody {
        Full::new(Bytes::from_static(text.as_bytes()))
            .map_err(|never| match never {})
            .boxed()
    }

    fn response(status: u16, content_type: Option<&str>, text: &'static str) -> Response {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(http::header::CONTENT_TYPE, ct.parse().unwrap());
        }
        Response::new(StatusCode::from_u16(status).unwrap(), headers, body(text))
    }

    /// Counts invocations and fails when told to
    struct Probe {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl ResponseValidator for Probe {
        async fn validate(&self, _res: &mut Response) -> Result<(), ValidationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ValidationError::Other("probe rejected".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_check_status_accepts_listed_codes() {
        let v = check_status([200, 204]);
        assert!(v.validate(&mut response(204, None, "")).await.is_ok());

        let err = v.validate(&mut response(404, None, "")).await.unwrap_err();
        match err {
            ValidationError::StatusMismatch { actual, expected } => {
                assert_eq!(actual, StatusCode::NOT_FOUND);
                assert_eq!(expected, vec![200, 204]);
            }
            other => panic!("expected StatusMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_status_set_means_2xx() {
        let v = check_status([]);
        assert!(v.accepts(StatusCode::OK));
        assert!(v.accepts(StatusCode::NO_CONTENT));
        assert!(!v.accepts(StatusCode::MOVED_PERMANENTLY));
        assert!(!v.accepts(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn test_content_type_matching() {
        let v = check_content_type(["application/json", "text/"]);
        assert!(v.accepts("application/json"));
        assert!(v.accepts("Application/JSON; charset=utf-8"));
        assert!(v.accepts("text/html"));
        assert!(!v.accepts("application/xml"));
        assert!(!v.accepts(""));

        let wildcard = check_content_type(["image/*"]);
        assert!(wildcard.accepts("image/png"));
        assert!(!wildcard.accepts("imagery/png"));

        assert!(check_content_type(["*/*"]).accepts("anything/else"));
    }

    #[tokio::test]
    async fn test_content_type_mismatch_reports_both_sides() {
        let v = check_content_type(["application/json"]);
        let err = v
            .validate(&mut response(200, Some("text/plain"), "hi"))
            .await
            .unwrap_err();
        match err {
            ValidationError::ContentTypeMismatch { actual, expected } => {
                assert_eq!(actual, "text/plain");
                assert_eq!(expected, vec!["application/json".to_owned()]);
            }
            other => panic!("expected ContentTypeMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_peek_validators_share_buffer_and_preserve_body() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_short = Arc::clone(&seen);
        let seen_long = Arc::clone(&seen);

        let validators: Vec<Arc<dyn ResponseValidator>> = vec![
            Arc::new(check_peek(2, move |b| {
                seen_short.lock().push(b.to_vec());
                Ok(())
            })),
            Arc::new(check_peek(5, move |b| {
                seen_long.lock().push(b.to_vec());
                Ok(())
            })),
        ];

        let mut res = response(200, None, "{\"ok\":true}");
        run_validators(&validators, &mut res).await.unwrap();

        assert_eq!(*seen.lock(), vec![b"{\"".to_vec(), b"{\"ok\"".to_vec()]);
        assert_eq!(&res.body_mut().bytes().await.unwrap()[..], b"{\"ok\":true}");
    }

    #[tokio::test]
    async fn test_peek_check_error_becomes_failure() {
        let v = check_peek(1, |b| {
            if b == b"<" {
                return Err("looks like HTML".into());
            }
            Ok(())
        });
        let err = v
            .validate(&mut response(200, None, "<html>"))
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::Peek(_)));
        assert!(err.to_string().contains("looks like HTML"));
    }

    #[tokio::test]
    async fn test_first_failure_short_circuits() {
        let calls: Vec<Arc<AtomicUsize>> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let validators: Vec<Arc<dyn ResponseValidator>> = vec![
            Arc::new(Probe {
                calls: Arc::clone(&calls[0]),
                fail: false,
            }),
            Arc::new(Probe {
                calls: Arc::clone(&calls[1]),
                fail: true,
            }),
            Arc::new(Probe {
                calls: Arc::clone(&calls[2]),
                fail: false,
            }),
        ];

        let err = run_validators(&validators, &mut response(200, None, ""))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "probe rejected");
        assert_eq!(calls[0].load(Ordering::SeqCst), 1);
        assert_eq!(calls[1].load(Ordering::SeqCst), 1);
        assert_eq!(calls[2].load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_chain_uses_default_validator() {
        assert!(run_validators(&[], &mut response(201, None, "")).await.is_ok());

        let err = run_validators(&[], &mut response(500, None, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::StatusMismatch { .. }));
    }
}
