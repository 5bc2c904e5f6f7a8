use crate::builder::RequestBuilder;
use std::time::Duration;

/// Default User-Agent sent by [`HyperTransport`](crate::HyperTransport)
pub const DEFAULT_USER_AGENT: &str = concat!("modkit-requests/", env!("CARGO_PKG_VERSION"));

/// One incremental change to a [`RequestBuilder`].
///
/// Any `Fn(&mut RequestBuilder)` closure is a `Config`, so reusable bundles
/// of settings are plain functions:
///
/// ```
/// use modkit_requests::{RequestBuilder, configure};
///
/// fn internal_api(rb: &mut RequestBuilder) {
///     rb.host("api.internal").bearer("token").check_status([200]);
/// }
///
/// let rb = configure([internal_api]);
/// assert_eq!(rb.url().unwrap().host(), Some("api.internal"));
/// ```
pub trait Config: Send + Sync {
    fn apply(&self, rb: &mut RequestBuilder);
}

impl<F> Config for F
where
    F: Fn(&mut RequestBuilder) + Send + Sync,
{
    fn apply(&self, rb: &mut RequestBuilder) {
        self(rb);
    }
}

/// Fresh builder with `cfgs` applied in order.
#[must_use]
pub fn configure<I>(cfgs: I) -> RequestBuilder
where
    I: IntoIterator,
    I::Item: Config,
{
    let mut rb = RequestBuilder::new();
    rb.config(cfgs);
    rb
}

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Transport security configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only)
    #[default]
    TlsOnly,
    /// Allow plain HTTP connections
    ///
    /// Meant for local mock servers; traffic is not encrypted.
    AllowInsecureHttp,
}

/// Configuration of the bundled hyper transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// User-Agent header value (default: [`DEFAULT_USER_AGENT`])
    ///
    /// Only sent when the request does not set its own.
    pub user_agent: String,

    /// Transport security mode (default: `TlsOnly`)
    pub transport: TransportSecurity,

    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Timeout for idle pooled connections (default: 90 seconds)
    ///
    /// Set to `None` to use hyper-util's default.
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum number of idle connections per host (default: 32)
    pub pool_max_idle_per_host: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            transport: TransportSecurity::TlsOnly,
            tls_roots: TlsRootConfig::default(),
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl TransportConfig {
    /// Configuration for talking to local plain-HTTP servers in tests
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            transport: TransportSecurity::AllowInsecureHttp,
            pool_idle_timeout: Some(Duration::from_secs(30)),
            pool_max_idle_per_host: 4,
            ..Self::default()
        }
    }
}
