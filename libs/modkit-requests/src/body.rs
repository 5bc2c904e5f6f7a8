//! Request body producers.
//!
//! A [`BodySource`] describes the body of a request; nothing is read,
//! encoded or opened until [`BodySource::produce`] runs at execution time.

use crate::error::{BodyError, BoxError};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, TryStreamExt};
use http_body::Frame;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;

/// Streaming body handed to the transport.
pub type RequestBody = UnsyncBoxBody<Bytes, BoxError>;

/// Deferred JSON encoder capturing the value to serialize.
pub type JsonEncoder = Arc<dyn Fn() -> Result<Vec<u8>, serde_json::Error> + Send + Sync>;

/// Callback that emits the body through a [`BodyWriter`].
pub type WriteFn = Arc<dyn Fn(BodyWriter) -> BoxFuture<'static, io::Result<()>> + Send + Sync>;

/// One-shot byte source shared between clones of a builder.
pub type SharedReader = Arc<Mutex<Option<Box<dyn AsyncRead + Send + Unpin>>>>;

/// Number of in-flight chunks between a writer callback and the transport.
const WRITER_CHANNEL_CAPACITY: usize = 16;

/// A body producer.
///
/// Setting a body on a builder replaces any previous one.
#[derive(Clone)]
pub enum BodySource {
    /// Fixed buffer, length known up front
    Bytes(Bytes),
    /// Arbitrary async byte source; can be produced only once
    Reader(SharedReader),
    /// Callback writing chunks on demand from a spawned task
    Writer(WriteFn),
    /// Value serialized to JSON at production time
    Json(JsonEncoder),
    /// Form values, encoded sorted by key
    Form(BTreeMap<String, Vec<String>>),
    /// File opened at production time
    File(PathBuf),
}

/// Output of [`BodySource::produce`].
pub struct ProducedBody {
    pub body: RequestBody,
    /// Declared length, if known before streaming
    pub content_length: Option<u64>,
}

impl ProducedBody {
    fn sized(bytes: Bytes) -> Self {
        let len = bytes.len() as u64;
        Self {
            body: full(bytes),
            content_length: Some(len),
        }
    }

    /// Empty body with no declared length
    #[must_use]
    pub fn empty() -> Self {
        Self {
            body: Empty::new().map_err(|never| match never {}).boxed_unsync(),
            content_length: None,
        }
    }
}

impl BodySource {
    /// Body from a fixed buffer
    #[must_use]
    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self::Bytes(bytes.into())
    }

    /// Body streamed from `reader`
    #[must_use]
    pub fn reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::Reader(Arc::new(Mutex::new(Some(Box::new(reader)))))
    }

    /// Body written by `write` at execution time
    ///
    /// Each production spawns `write` on the current tokio runtime. An error
    /// returned by `write` fails the body stream.
    #[must_use]
    pub fn writer<F, Fut>(write: F) -> Self
    where
        F: Fn(BodyWriter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = io::Result<()>> + Send + 'static,
    {
        Self::Writer(Arc::new(move |w| -> BoxFuture<'static, io::Result<()>> {
            Box::pin(write(w))
        }))
    }

    /// Body serialized from `value` as JSON when produced
    #[must_use]
    pub fn json<T>(value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        Self::Json(Arc::new(move || serde_json::to_vec(&value)))
    }

    /// URL-encoded form body; repeated keys keep their value order
    #[must_use]
    pub fn form<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut values: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (k, v) in pairs {
            values.entry(k.into()).or_default().push(v.into());
        }
        Self::Form(values)
    }

    /// Body read from the file at `path`
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Produce the byte stream for one request.
    ///
    /// # Errors
    ///
    /// Returns [`BodyError`] if encoding fails, the file cannot be opened,
    /// or a reader source was already consumed.
    pub async fn produce(&self) -> Result<ProducedBody, BodyError> {
        match self {
            BodySource::Bytes(bytes) => Ok(ProducedBody::sized(bytes.clone())),
            BodySource::Reader(reader) => {
                let reader = reader.lock().take().ok_or(BodyError::ReaderConsumed)?;
                Ok(ProducedBody {
                    body: stream_body(ReaderStream::new(reader)),
                    content_length: None,
                })
            }
            BodySource::Writer(write) => Ok(ProducedBody {
                body: spawn_writer(write),
                content_length: None,
            }),
            BodySource::Json(encode) => Ok(ProducedBody::sized(Bytes::from(encode()?))),
            BodySource::Form(values) => {
                let pairs: Vec<(&str, &str)> = values
                    .iter()
                    .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
                    .collect();
                let encoded = serde_urlencoded::to_string(pairs)?;
                Ok(ProducedBody::sized(Bytes::from(encoded)))
            }
            BodySource::File(path) => {
                let file = tokio::fs::File::open(path).await?;
                let len = file.metadata().await?.len();
                Ok(ProducedBody {
                    body: stream_body(ReaderStream::new(file)),
                    content_length: Some(len),
                })
            }
        }
    }
}

impl fmt::Debug for BodySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodySource::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            BodySource::Reader(_) => f.write_str("Reader"),
            BodySource::Writer(_) => f.write_str("Writer"),
            BodySource::Json(_) => f.write_str("Json"),
            BodySource::Form(values) => f.debug_tuple("Form").field(values).finish(),
            BodySource::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// Sink handed to a writer body callback.
///
/// Chunks are forwarded to the transport as they are written.
pub struct BodyWriter {
    tx: mpsc::Sender<Result<Frame<Bytes>, BoxError>>,
}

impl BodyWriter {
    /// Send one chunk of the body.
    ///
    /// # Errors
    ///
    /// Returns `BrokenPipe` once the transport stopped reading the body.
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> io::Result<()> {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx
            .send(Ok(Frame::data(chunk)))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "request body was dropped"))
    }
}

fn full(bytes: Bytes) -> RequestBody {
    Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
}

fn stream_body<S>(stream: S) -> RequestBody
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    StreamBody::new(stream.map_ok(Frame::data).map_err(BoxError::from)).boxed_unsync()
}

fn spawn_writer(write: &WriteFn) -> RequestBody {
    let (tx, rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
    let err_tx = tx.clone();
    let fut = write(BodyWriter { tx });

    tokio::spawn(async move {
        let err: BoxError = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "request body writer failed");
                e.into()
            }
            Err(_) => {
                tracing::warn!("request body writer panicked");
                "request body writer panicked".into()
            }
        };
        if err_tx.send(Err(err)).await.is_err() {
            tracing::trace!("request body dropped before writer error was delivered");
        }
    });

    StreamBody::new(ReceiverStream::new(rx)).boxed_unsync()
}
