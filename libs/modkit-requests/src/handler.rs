//! Response handlers and the pass-through handler chain.
//!
//! Handlers run after all validators passed, in registration order. Each
//! handler receives a [`Next`] cursor over the rest of the chain and either
//! delegates to it or consumes the body itself and stops. Running past the
//! last handler drains whatever is left of the body.

use crate::error::HandleError;
use crate::response::Response;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::future::BoxFuture;
use http::HeaderMap;
use parking_lot::{Mutex, MutexGuard};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Consumer of a realized response.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    /// Handle the response, optionally delegating to `next`.
    ///
    /// Not calling `next.run(res)` terminates the chain.
    ///
    /// # Errors
    /// Returns a [`HandleError`] if consuming the body fails.
    async fn handle(&self, res: &mut Response, next: Next<'_>) -> Result<(), HandleError>;
}

/// Cursor over the handlers that have not run yet.
///
/// Handlers of a nested [`HandlerChain`] continue into the enclosing chain
/// once they are exhausted.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    handlers: &'a [Arc<dyn ResponseHandler>],
    outer: Option<&'a Next<'a>>,
}

impl<'a> Next<'a> {
    fn new(handlers: &'a [Arc<dyn ResponseHandler>]) -> Self {
        Self {
            handlers,
            outer: None,
        }
    }

    /// Number of handlers left, including enclosing chains
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.handlers.len() + self.outer.map_or(0, Next::remaining)
    }

    /// Run the rest of the chain.
    ///
    /// With no handlers left the body is drained so the connection can be reused.
    pub fn run<'b>(self, res: &'b mut Response) -> BoxFuture<'b, Result<(), HandleError>>
    where
        'a: 'b,
    {
        Box::pin(async move {
            if let Some((head, rest)) = self.handlers.split_first() {
                let next = Next {
                    handlers: rest,
                    outer: self.outer,
                };
                return head.handle(res, next).await;
            }
            match self.outer {
                Some(outer) => outer.run(res).await,
                None => drain(res).await,
            }
        })
    }
}

async fn drain(res: &mut Response) -> Result<(), HandleError> {
    let drained = res.body_mut().drain().await.map_err(HandleError::Body)?;
    tracing::trace!(bytes = drained, "drained response body");
    Ok(())
}

/// Ordered handlers composed into a single handler.
#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn ResponseHandler>>,
}

/// Compose `handlers` into one handler; the first one runs outermost.
#[must_use]
pub fn chain_handlers<I>(handlers: I) -> HandlerChain
where
    I: IntoIterator<Item = Arc<dyn ResponseHandler>>,
{
    HandlerChain {
        handlers: handlers.into_iter().collect(),
    }
}

impl HandlerChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler at the end of the chain
    pub fn push(&mut self, handler: Arc<dyn ResponseHandler>) {
        self.handlers.push(handler);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the chain as the outermost stage.
    ///
    /// # Errors
    /// Returns the first error raised by a handler.
    pub async fn run(&self, res: &mut Response) -> Result<(), HandleError> {
        Next::new(&self.handlers).run(res).await
    }
}

#[async_trait]
impl ResponseHandler for HandlerChain {
    async fn handle(&self, res: &mut Response, next: Next<'_>) -> Result<(), HandleError> {
        Next {
            handlers: &self.handlers,
            outer: Some(&next),
        }
        .run(res)
        .await
    }
}

impl std::fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerChain")
            .field("len", &self.handlers.len())
            .finish()
    }
}

/// Shared destination that handlers write into.
///
/// Clones point at the same value. Read it after the request executed.
#[derive(Debug, Default)]
pub struct Slot<T>(Arc<Mutex<T>>);

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Slot<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }

    pub fn set(&self, value: T) {
        *self.0.lock() = value;
    }

    /// Lock the value for in-place access
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock()
    }
}

impl<T: Clone> Slot<T> {
    /// Clone of the current value
    #[must_use]
    pub fn get(&self) -> T {
        self.0.lock().clone()
    }
}

impl<T: Default> Slot<T> {
    /// Take the value, leaving the default in its place
    #[must_use]
    pub fn take(&self) -> T {
        std::mem::take(&mut *self.0.lock())
    }
}

/// Decodes the body as JSON into a slot.
pub struct ToJson<T> {
    dest: Slot<T>,
    _marker: PhantomData<fn() -> T>,
}

/// Handler decoding the full body as JSON into `dest`.
///
/// `dest` is written only when decoding succeeds.
#[must_use]
pub fn to_json<T>(dest: &Slot<T>) -> ToJson<T>
where
    T: DeserializeOwned + Send + 'static,
{
    ToJson {
        dest: dest.clone(),
        _marker: PhantomData,
    }
}

#[async_trait]
impl<T> ResponseHandler for ToJson<T>
where
    T: DeserializeOwned + Send + 'static,
{
    async fn handle(&self, res: &mut Response, _next: Next<'_>) -> Result<(), HandleError> {
        let bytes = res.body_mut().bytes().await.map_err(HandleError::Body)?;
        let value = serde_json::from_slice(&bytes)?;
        self.dest.set(value);
        Ok(())
    }
}

/// Stores the body as text.
#[derive(Debug, Clone)]
pub struct ToText {
    dest: Slot<String>,
}

/// Handler storing the full body into `dest`; invalid UTF-8 is replaced.
#[must_use]
pub fn to_text(dest: &Slot<String>) -> ToText {
    ToText { dest: dest.clone() }
}

#[async_trait]
impl ResponseHandler for ToText {
    async fn handle(&self, res: &mut Response, _next: Next<'_>) -> Result<(), HandleError> {
        let bytes = res.body_mut().bytes().await.map_err(HandleError::Body)?;
        self.dest.set(String::from_utf8_lossy(&bytes).into_owned());
        Ok(())
    }
}

/// Appends the body to a byte buffer.
#[derive(Debug, Clone)]
pub struct ToBytesBuffer {
    dest: Slot<BytesMut>,
}

/// Handler appending the body to `dest` as it streams in.
#[must_use]
pub fn to_bytes_buffer(dest: &Slot<BytesMut>) -> ToBytesBuffer {
    ToBytesBuffer { dest: dest.clone() }
}

#[async_trait]
impl ResponseHandler for ToBytesBuffer {
    async fn handle(&self, res: &mut Response, _next: Next<'_>) -> Result<(), HandleError> {
        while let Some(chunk) = res.body_mut().chunk().await.map_err(HandleError::Body)? {
            self.dest.lock().extend_from_slice(&chunk);
        }
        Ok(())
    }
}

/// Copies the body into an async writer.
pub struct ToWriter<W> {
    dest: Arc<tokio::sync::Mutex<W>>,
}

/// Handler copying the body into `dest`, flushing at the end.
#[must_use]
pub fn to_writer<W>(dest: &Arc<tokio::sync::Mutex<W>>) -> ToWriter<W>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    ToWriter {
        dest: Arc::clone(dest),
    }
}

#[async_trait]
impl<W> ResponseHandler for ToWriter<W>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    async fn handle(&self, res: &mut Response, _next: Next<'_>) -> Result<(), HandleError> {
        let mut w = self.dest.lock().await;
        copy_body(res, &mut *w).await
    }
}

async fn copy_body<W>(res: &mut Response, w: &mut W) -> Result<(), HandleError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    while let Some(chunk) = res.body_mut().chunk().await.map_err(HandleError::Body)? {
        w.write_all(&chunk).await?;
    }
    w.flush().await?;
    Ok(())
}

/// Writes the body to a file.
#[derive(Debug, Clone)]
pub struct ToFile {
    path: PathBuf,
}

/// Handler writing the body to the file at `path`.
///
/// Parent directories are created as needed. A failure part way leaves the
/// partially written file in place.
#[must_use]
pub fn to_file(path: impl Into<PathBuf>) -> ToFile {
    ToFile { path: path.into() }
}

#[async_trait]
impl ResponseHandler for ToFile {
    async fn handle(&self, res: &mut Response, _next: Next<'_>) -> Result<(), HandleError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&self.path).await?;
        copy_body(res, &mut file).await
    }
}

/// Copies response headers into a map, then delegates.
#[derive(Debug, Clone)]
pub struct ToHeaders {
    dest: Slot<HeaderMap>,
}

/// Pass-through handler copying response headers into `dest`.
///
/// Names already present in `dest` are replaced by the response's values.
#[must_use]
pub fn to_headers(dest: &Slot<HeaderMap>) -> ToHeaders {
    ToHeaders { dest: dest.clone() }
}

#[async_trait]
impl ResponseHandler for ToHeaders {
    async fn handle(&self, res: &mut Response, next: Next<'_>) -> Result<(), HandleError> {
        {
            let mut dest = self.dest.lock();
            for name in res.headers().keys() {
                dest.remove(name);
                for value in res.headers().get_all(name) {
                    dest.append(name.clone(), value.clone());
                }
            }
        }
        next.run(res).await
    }
}

/// Drains and discards the body, ending the chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumeBody;

/// Terminal handler that discards the body
#[must_use]
pub fn consume_body() -> ConsumeBody {
    ConsumeBody
}

#[async_trait]
impl ResponseHandler for ConsumeBody {
    async fn handle(&self, res: &mut Response, _next: Next<'_>) -> Result<(), HandleError> {
        drain(res).await
    }
}
