use crate::body::{BodySource, BodyWriter, ProducedBody, RequestBody};
use crate::config::Config;
use crate::error::Error;
use crate::handler::{self, HandlerChain, ResponseHandler, Slot};
use crate::response::Response;
use crate::transport::{Transport, default_transport};
use crate::util::first;
use crate::validator::{self, ResponseValidator, run_validators};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{Bytes, BytesMut};
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, Uri};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Debug, Clone)]
struct HeaderEntry {
    name: String,
    value: String,
    /// Drop earlier values of the same name instead of appending
    replace: bool,
}

/// Fluent description of one HTTP request and the handling of its response.
///
/// Setters take `&mut self` and return it for chaining; nothing is validated
/// or read until the request is assembled. Clone a configured builder to
/// reuse it as a template; clones share handler destinations and transports.
///
/// ```no_run
/// # async fn run() -> Result<(), modkit_requests::Error> {
/// use modkit_requests::{RequestBuilder, Slot};
///
/// let out: Slot<serde_json::Value> = Slot::default();
/// RequestBuilder::new()
///     .put()
///     .host("api.example.com")
///     .path("/x")
///     .body_json(serde_json::json!({"a": 1}))
///     .check_status([200])
///     .to_json(&out)
///     .fetch()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct RequestBuilder {
    method: String,
    scheme: String,
    base_url: String,
    host: String,
    paths: Vec<String>,
    params: Vec<(String, String)>,
    headers: Vec<HeaderEntry>,
    body: Option<BodySource>,
    validators: Vec<Arc<dyn ResponseValidator>>,
    handlers: HandlerChain,
    transport: Option<Arc<dyn Transport>>,
}

#[allow(clippy::wrong_self_convention)]
impl RequestBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the HTTP method; unset means GET
    pub fn method(&mut self, method: impl Into<String>) -> &mut Self {
        self.method = method.into();
        self
    }

    pub fn head(&mut self) -> &mut Self {
        self.method(Method::HEAD.as_str())
    }

    pub fn post(&mut self) -> &mut Self {
        self.method(Method::POST.as_str())
    }

    pub fn put(&mut self) -> &mut Self {
        self.method(Method::PUT.as_str())
    }

    pub fn patch(&mut self) -> &mut Self {
        self.method(Method::PATCH.as_str())
    }

    pub fn delete(&mut self) -> &mut Self {
        self.method(Method::DELETE.as_str())
    }

    /// Set the URL scheme; unset falls back to the base URL's, then `https`
    pub fn scheme(&mut self, scheme: impl Into<String>) -> &mut Self {
        self.scheme = scheme.into();
        self
    }

    /// URL that scheme, host, paths and query params are resolved against
    pub fn base_url(&mut self, base: impl Into<String>) -> &mut Self {
        self.base_url = base.into();
        self
    }

    /// Set the host (authority), overriding the base URL's
    pub fn host(&mut self, host: impl Into<String>) -> &mut Self {
        self.host = host.into();
        self
    }

    /// Set the host from format arguments
    pub fn hostf(&mut self, args: fmt::Arguments<'_>) -> &mut Self {
        self.host(args.to_string())
    }

    /// Add a path, resolved against the current one like a relative link.
    ///
    /// An absolute path replaces what came before; a relative one replaces
    /// the last segment. The path is not escaped: pass untrusted values
    /// through [`param`](Self::param) instead.
    pub fn path(&mut self, path: impl Into<String>) -> &mut Self {
        self.paths.push(path.into());
        self
    }

    /// Add a path from format arguments.
    ///
    /// The formatted result is not escaped; never format untrusted input into it.
    pub fn pathf(&mut self, args: fmt::Arguments<'_>) -> &mut Self {
        self.path(args.to_string())
    }

    /// Append a query parameter; order of calls is kept
    pub fn param(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn param_int(&mut self, key: impl Into<String>, value: i64) -> &mut Self {
        self.param(key, value.to_string())
    }

    /// Append a header value
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push_header(name.into(), value.into(), false)
    }

    /// Replace all values of a header
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push_header(name.into(), value.into(), true)
    }

    fn push_header(&mut self, name: String, value: String, replace: bool) -> &mut Self {
        self.headers.push(HeaderEntry {
            name,
            value,
            replace,
        });
        self
    }

    pub fn accept(&mut self, content_types: impl Into<String>) -> &mut Self {
        self.header(header::ACCEPT.as_str(), content_types)
    }

    pub fn cache_control(&mut self, directive: impl Into<String>) -> &mut Self {
        self.header(header::CACHE_CONTROL.as_str(), directive)
    }

    pub fn user_agent(&mut self, agent: impl Into<String>) -> &mut Self {
        self.header(header::USER_AGENT.as_str(), agent)
    }

    /// Set `Content-Type`, replacing any earlier value
    pub fn content_type(&mut self, content_type: impl Into<String>) -> &mut Self {
        self.set_header(header::CONTENT_TYPE.as_str(), content_type)
    }

    /// Set `Authorization` to `Basic base64(username:password)`
    pub fn basic_auth(&mut self, username: &str, password: &str) -> &mut Self {
        let credentials = STANDARD.encode(format!("{username}:{password}"));
        self.set_header(header::AUTHORIZATION.as_str(), format!("Basic {credentials}"))
    }

    /// Set `Authorization` to `Bearer <token>`
    pub fn bearer(&mut self, token: &str) -> &mut Self {
        self.set_header(header::AUTHORIZATION.as_str(), format!("Bearer {token}"))
    }

    /// Set the body producer, replacing any earlier one
    pub fn body(&mut self, body: BodySource) -> &mut Self {
        self.body = Some(body);
        self
    }

    pub fn body_bytes(&mut self, bytes: impl Into<Bytes>) -> &mut Self {
        self.body(BodySource::bytes(bytes))
    }

    /// Stream the body from `reader`; the builder can then execute once
    pub fn body_reader<R>(&mut self, reader: R) -> &mut Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.body(BodySource::reader(reader))
    }

    /// Produce the body by calling `write` at execution time
    pub fn body_writer<F, Fut>(&mut self, write: F) -> &mut Self
    where
        F: Fn(BodyWriter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = io::Result<()>> + Send + 'static,
    {
        self.body(BodySource::writer(write))
    }

    /// JSON body, serialized at execution time; sets `Content-Type: application/json`
    pub fn body_json<T>(&mut self, value: T) -> &mut Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.body(BodySource::json(value))
            .content_type("application/json")
    }

    /// URL-encoded form body; sets `Content-Type: application/x-www-form-urlencoded`
    pub fn body_form<I, K, V>(&mut self, pairs: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.body(BodySource::form(pairs))
            .content_type("application/x-www-form-urlencoded")
    }

    /// Body read from the file at `path`, opened at execution time
    pub fn body_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.body(BodySource::file(path))
    }

    /// Append a validator; with none registered the status must be 2xx
    pub fn add_validator(&mut self, validator: impl ResponseValidator + 'static) -> &mut Self {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn check_status(&mut self, codes: impl IntoIterator<Item = u16>) -> &mut Self {
        self.add_validator(validator::check_status(codes))
    }

    pub fn check_content_type<I, S>(&mut self, types: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_validator(validator::check_content_type(types))
    }

    pub fn check_peek<F>(&mut self, n: usize, check: F) -> &mut Self
    where
        F: Fn(&[u8]) -> Result<(), crate::error::BoxError> + Send + Sync + 'static,
    {
        self.add_validator(validator::check_peek(n, check))
    }

    /// Append a handler to the chain
    pub fn handle(&mut self, handler: impl ResponseHandler + 'static) -> &mut Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn to_json<T>(&mut self, dest: &Slot<T>) -> &mut Self
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.handle(handler::to_json(dest))
    }

    pub fn to_text(&mut self, dest: &Slot<String>) -> &mut Self {
        self.handle(handler::to_text(dest))
    }

    pub fn to_bytes_buffer(&mut self, dest: &Slot<BytesMut>) -> &mut Self {
        self.handle(handler::to_bytes_buffer(dest))
    }

    pub fn to_writer<W>(&mut self, dest: &Arc<tokio::sync::Mutex<W>>) -> &mut Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.handle(handler::to_writer(dest))
    }

    /// Write the body to `path`, creating parent directories
    pub fn to_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.handle(handler::to_file(path))
    }

    /// Switch to HEAD and copy the response headers into `dest`.
    ///
    /// Whatever body arrives is drained; handlers added after this one never run.
    pub fn to_headers(&mut self, dest: &Slot<HeaderMap>) -> &mut Self {
        let capture = handler::chain_handlers([
            Arc::new(handler::to_headers(dest)) as Arc<dyn ResponseHandler>,
            Arc::new(handler::consume_body()),
        ]);
        self.head().handle(capture)
    }

    /// Use `transport` instead of the process-wide default
    pub fn transport(&mut self, transport: impl Transport + 'static) -> &mut Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Apply configuration functions in order
    pub fn config<I>(&mut self, cfgs: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Config,
    {
        for cfg in cfgs {
            cfg.apply(self);
        }
        self
    }

    /// Assemble the request URL.
    ///
    /// # Errors
    /// Returns [`Error::InvalidUri`] if there is no host or the parts do not
    /// form a valid URI.
    pub fn url(&self) -> Result<Uri, Error> {
        let base = if self.base_url.is_empty() {
            Uri::default()
        } else {
            self.base_url
                .parse::<Uri>()
                .map_err(|e| Error::InvalidUri {
                    url: self.base_url.clone(),
                    reason: e.to_string(),
                })?
        };

        let scheme = first(self.scheme.as_str(), base.scheme_str().unwrap_or_default());
        let scheme = first(scheme, "https");
        let host = first(
            self.host.as_str(),
            base.authority().map(http::uri::Authority::as_str).unwrap_or_default(),
        );
        if host.is_empty() {
            return Err(Error::InvalidUri {
                url: self.base_url.clone(),
                reason: "missing host".to_owned(),
            });
        }

        let mut path = first(base.path(), "/").to_owned();
        for reference in &self.paths {
            path = resolve_path(&path, reference);
        }

        let mut query = base.query().unwrap_or_default().to_owned();
        if !self.params.is_empty() {
            let encoded =
                serde_urlencoded::to_string(&self.params).map_err(|e| Error::InvalidUri {
                    url: format!("{scheme}://{host}{path}"),
                    reason: e.to_string(),
                })?;
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&encoded);
        }

        let path_and_query = if query.is_empty() {
            path
        } else {
            format!("{path}?{query}")
        };
        Uri::builder()
            .scheme(scheme)
            .authority(host)
            .path_and_query(path_and_query.as_str())
            .build()
            .map_err(|e| Error::InvalidUri {
                url: format!("{scheme}://{host}{path_and_query}"),
                reason: e.to_string(),
            })
    }

    /// Headers as they will be sent, before the transport adds its own.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHeaderName`] or [`Error::InvalidHeaderValue`]
    /// for the first malformed entry.
    pub fn header_map(&self) -> Result<HeaderMap, Error> {
        let mut map = HeaderMap::new();
        for entry in &self.headers {
            let name = HeaderName::from_bytes(entry.name.as_bytes()).map_err(|source| {
                Error::InvalidHeaderName {
                    name: entry.name.clone(),
                    source,
                }
            })?;
            let value = HeaderValue::from_str(&entry.value).map_err(|source| {
                Error::InvalidHeaderValue {
                    name: entry.name.clone(),
                    source,
                }
            })?;
            if entry.replace {
                map.insert(name, value);
            } else {
                map.append(name, value);
            }
        }
        Ok(map)
    }

    /// Assemble the transport request, producing the body.
    ///
    /// # Errors
    /// Returns a build stage error for a bad URL, method or header, and
    /// [`Error::Body`] if the body cannot be produced.
    pub async fn request(&self) -> Result<Request<RequestBody>, Error> {
        let uri = self.url()?;
        let method_name = first(self.method.as_str(), Method::GET.as_str());
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|_| Error::InvalidMethod(method_name.to_owned()))?;
        let headers = self.header_map()?;

        let produced = match &self.body {
            Some(body) => body.produce().await?,
            None => ProducedBody::empty(),
        };

        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .body(produced.body)?;
        *req.headers_mut() = headers;
        if let Some(len) = produced.content_length
            && !req.headers().contains_key(header::CONTENT_LENGTH)
        {
            req.headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        }
        Ok(req)
    }

    /// Execute with the configured transport, or the process-wide default.
    ///
    /// # Errors
    /// Returns the first failure of any stage; see [`Error::stage`].
    pub async fn fetch(&self) -> Result<(), Error> {
        if let Some(transport) = &self.transport {
            return self.fetch_with(transport.as_ref()).await;
        }
        let transport = default_transport()?;
        self.fetch_with(transport.as_ref()).await
    }

    /// Execute once with `transport`: send, validate, then handle.
    ///
    /// # Errors
    /// Returns the first failure of any stage; see [`Error::stage`].
    pub async fn fetch_with(&self, transport: &dyn Transport) -> Result<(), Error> {
        let req = self.request().await?;
        tracing::debug!(method = %req.method(), uri = %req.uri(), "sending request");

        let res = transport.round_trip(req).await.map_err(Error::Transport)?;
        let mut res = Response::from(res);
        tracing::debug!(status = res.status().as_u16(), "received response");

        run_validators(&self.validators, &mut res).await?;

        if let Err(e) = self.handlers.run(&mut res).await {
            tracing::debug!(error = %e, "response handler failed");
            return Err(e.into());
        }
        Ok(())
    }
}

/// Resolve `reference` against `base` as a relative link would.
fn resolve_path(base: &str, reference: &str) -> String {
    if reference.is_empty() {
        return base.to_owned();
    }
    let merged = if reference.starts_with('/') {
        reference.to_owned()
    } else {
        let dir = base.rfind('/').map_or("/", |i| &base[..=i]);
        format!("{dir}{reference}")
    };
    escape_delimiters(&remove_dot_segments(&merged))
}

/// Percent-encode `?` and `#` so a path segment never opens a query or fragment.
fn escape_delimiters(path: &str) -> String {
    path.replace('?', "%3F").replace('#', "%23")
}

fn remove_dot_segments(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let last = segments.len() - 1;
    let mut out: Vec<&str> = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate().skip(1) {
        match *segment {
            "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s),
        }
        if i == last && matches!(*segment, "." | "..") {
            out.push("");
        }
    }
    format!("/{}", out.join("/"))
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("scheme", &self.scheme)
            .field("base_url", &self.base_url)
            .field("host", &self.host)
            .field("paths", &self.paths)
            .field("params", &self.params)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("validators", &self.validators.len())
            .field("handlers", &self.handlers)
            .field("has_transport", &self.transport.is_some())
            .finish()
    }
}
