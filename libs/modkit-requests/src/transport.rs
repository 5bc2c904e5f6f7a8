//! Transports that execute one request attempt.
//!
//! The builder never decides retries, redirects or timeouts; a transport
//! receives a fully assembled request and returns the raw response.

use crate::body::RequestBody;
use crate::config::{TransportConfig, TransportSecurity};
use crate::error::{BoxError, Error};
use crate::response::ResponseBody;
use crate::tls;
use async_trait::async_trait;
use http::{HeaderValue, Request, Response};
use http_body_util::BodyExt;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::future::Future;
use std::sync::{Arc, OnceLock};

/// Executes one HTTP request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `req` and return the response head with its streaming body.
    ///
    /// Any status, including 4xx and 5xx, is a successful round trip.
    ///
    /// # Errors
    /// Returns the connection, TLS or protocol error unchanged.
    async fn round_trip(&self, req: Request<RequestBody>)
    -> Result<Response<ResponseBody>, BoxError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn round_trip(
        &self,
        req: Request<RequestBody>,
    ) -> Result<Response<ResponseBody>, BoxError> {
        (**self).round_trip(req).await
    }
}

/// Transport backed by an async closure.
#[derive(Clone)]
pub struct FnTransport<F> {
    f: F,
}

/// Wrap an async closure as a [`Transport`], mostly for tests.
#[must_use]
pub fn transport_fn<F, Fut>(f: F) -> FnTransport<F>
where
    F: Fn(Request<RequestBody>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<ResponseBody>, BoxError>> + Send + 'static,
{
    FnTransport { f }
}

#[async_trait]
impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(Request<RequestBody>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<ResponseBody>, BoxError>> + Send + 'static,
{
    async fn round_trip(
        &self,
        req: Request<RequestBody>,
    ) -> Result<Response<ResponseBody>, BoxError> {
        (self.f)(req).await
    }
}

/// Transport on a pooled hyper-util client with rustls.
///
/// Redirects are returned as is and nothing is retried.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, RequestBody>,
    user_agent: HeaderValue,
}

impl HyperTransport {
    /// Transport with the default [`TransportConfig`]
    ///
    /// # Errors
    /// Returns [`Error::Tls`] if TLS initialization fails
    pub fn new() -> Result<Self, Error> {
        Self::with_config(TransportConfig::default())
    }

    /// Transport with an explicit configuration
    ///
    /// # Errors
    /// Returns [`Error::Tls`] if TLS initialization fails or
    /// [`Error::InvalidHeaderValue`] if the user agent is not a valid header value
    pub fn with_config(config: TransportConfig) -> Result<Self, Error> {
        if config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let user_agent = HeaderValue::try_from(config.user_agent).map_err(|source| {
            Error::InvalidHeaderValue {
                name: http::header::USER_AGENT.to_string(),
                source,
            }
        })?;

        let https = tls::build_https_connector(config.tls_roots, config.transport)?;

        let mut builder = Client::builder(TokioExecutor::new());
        // pool_idle_timeout has no effect without a pool timer
        builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host);
        if let Some(idle_timeout) = config.pool_idle_timeout {
            builder.pool_idle_timeout(idle_timeout);
        }

        Ok(Self {
            client: builder.build(https),
            user_agent,
        })
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn round_trip(
        &self,
        mut req: Request<RequestBody>,
    ) -> Result<Response<ResponseBody>, BoxError> {
        if !req.headers().contains_key(http::header::USER_AGENT) {
            req.headers_mut()
                .insert(http::header::USER_AGENT, self.user_agent.clone());
        }
        let res: Response<hyper::body::Incoming> = self.client.request(req).await?;
        Ok(res.map(|body| body.map_err(BoxError::from).boxed()))
    }
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

static DEFAULT_TRANSPORT: OnceLock<Arc<dyn Transport>> = OnceLock::new();

/// Process-wide transport used by builders without one of their own.
///
/// Built lazily from [`TransportConfig::default`] and shared afterwards.
///
/// # Errors
/// Returns [`Error::Tls`] if the first initialization fails; later calls retry.
pub fn default_transport() -> Result<Arc<dyn Transport>, Error> {
    if let Some(transport) = DEFAULT_TRANSPORT.get() {
        return Ok(Arc::clone(transport));
    }
    let transport: Arc<dyn Transport> = Arc::new(HyperTransport::new()?);
    tracing::debug!("initialized default HTTP transport");
    Ok(Arc::clone(DEFAULT_TRANSPORT.get_or_init(|| transport)))
}
