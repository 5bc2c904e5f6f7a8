use crate::error::BoxError;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use http_body_util::BodyExt;

/// Type alias for the boxed response body returned by a transport.
pub type ResponseBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// Response body that supports peeking ahead without consuming.
///
/// There is exactly one `PeekableBody` per response. Every peek validator
/// and the handler chain read through it, so bytes pulled from the transport
/// for a peek are replayed to later readers and the underlying body is read
/// at most once.
pub struct PeekableBody {
    inner: ResponseBody,
    buf: BytesMut,
    eof: bool,
}

impl PeekableBody {
    #[must_use]
    pub fn new(inner: ResponseBody) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            eof: false,
        }
    }

    /// Returns up to `n` bytes from the front of the body without consuming them.
    ///
    /// Fewer than `n` bytes are returned only at end of stream. Peeking
    /// further than a previous peek reads only the missing bytes.
    ///
    /// # Errors
    /// Returns the transport's error if reading the body fails.
    pub async fn peek(&mut self, n: usize) -> Result<&[u8], BoxError> {
        while self.buf.len() < n && !self.eof {
            match self.next_data().await? {
                Some(data) => self.buf.extend_from_slice(&data),
                None => self.eof = true,
            }
        }
        let end = n.min(self.buf.len());
        Ok(&self.buf[..end])
    }

    /// Number of bytes currently held back by peeks
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next chunk of the body, replaying peeked bytes first.
    ///
    /// # Errors
    /// Returns the transport's error if reading the body fails.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, BoxError> {
        if !self.buf.is_empty() {
            return Ok(Some(self.buf.split().freeze()));
        }
        if self.eof {
            return Ok(None);
        }
        let next = self.next_data().await?;
        if next.is_none() {
            self.eof = true;
        }
        Ok(next)
    }

    /// Reads the rest of the body into memory.
    ///
    /// # Errors
    /// Returns the transport's error if reading the body fails.
    pub async fn bytes(&mut self) -> Result<Bytes, BoxError> {
        let mut collected = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            collected.extend_from_slice(&chunk);
        }
        Ok(collected.freeze())
    }

    /// Reads and discards the rest of the body, returning the byte count.
    ///
    /// Draining lets the transport reuse the connection.
    ///
    /// # Errors
    /// Returns the transport's error if reading the body fails.
    pub async fn drain(&mut self) -> Result<u64, BoxError> {
        let mut drained = 0u64;
        while let Some(chunk) = self.chunk().await? {
            drained += chunk.len() as u64;
        }
        Ok(drained)
    }

    /// Whether the underlying body is exhausted and nothing is buffered
    #[must_use]
    pub fn is_end_stream(&self) -> bool {
        self.eof && self.buf.is_empty()
    }

    // Skips trailers and empty data frames.
    async fn next_data(&mut self) -> Result<Option<Bytes>, BoxError> {
        while let Some(frame) = self.inner.frame().await {
            if let Ok(data) = frame?.into_data()
                && !data.is_empty()
            {
                return Ok(Some(data));
            }
        }
        Ok(None)
    }
}

/// A realized response as seen by validators and handlers.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: PeekableBody,
}

impl Response {
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            body: PeekableBody::new(body),
        }
    }

    /// Get the response status code
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the response headers
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Shared peekable body stream
    pub fn body_mut(&mut self) -> &mut PeekableBody {
        &mut self.body
    }
}

impl From<http::Response<ResponseBody>> for Response {
    fn from(res: http::Response<ResponseBody>) -> Self {
        let (parts, body) = res.into_parts();
        Self::new(parts.status, parts.headers, body)
    }
}
