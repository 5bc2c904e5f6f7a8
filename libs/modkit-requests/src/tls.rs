//! TLS setup for [`HyperTransport`](crate::HyperTransport).
//!
//! Native root certificates are loaded from the OS store once per process.

use crate::config::{TlsRootConfig, TransportSecurity};
use crate::error::Error;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

static NATIVE_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

fn load_native_roots() -> Vec<CertificateDer<'static>> {
    let result = rustls_native_certs::load_native_certs();
    for err in &result.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }
    if result.certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = result.certs.len(), "loaded native root certificates");
    }
    result.certs
}

/// Cached OS root certificates; may be empty
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS.get_or_init(load_native_roots).as_slice()
}

/// Globally installed crypto provider, or aws-lc-rs without installing it
pub fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn native_roots_client_config() -> Result<rustls::ClientConfig, Error> {
    let certs = native_root_certs();
    if certs.is_empty() {
        return Err(Error::Tls(
            "no native root CA certificates found in OS certificate store".into(),
        ));
    }

    let mut roots = rustls::RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates could not be parsed");
    }
    if added == 0 {
        return Err(Error::Tls(
            format!("none of the {} native root CA certificates could be parsed", certs.len()).into(),
        ));
    }

    let config = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(Box::new(e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(config)
}

/// HTTPS connector for the given roots and security mode.
///
/// ALPN advertises both h2 and http/1.1.
///
/// # Errors
///
/// Returns [`Error::Tls`] if the crypto provider rejects the protocol versions
/// or no native roots are usable.
pub fn build_https_connector(
    tls_roots: TlsRootConfig,
    security: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, Error> {
    let allow_http = security == TransportSecurity::AllowInsecureHttp;

    let builder = match tls_roots {
        TlsRootConfig::WebPki => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(crypto_provider())
            .map_err(|e| Error::Tls(Box::new(e)))?,
        TlsRootConfig::Native => {
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(native_roots_client_config()?)
        }
    };

    let connector = if allow_http {
        builder.https_or_http().enable_all_versions().build()
    } else {
        builder.https_only().enable_all_versions().build()
    };
    Ok(connector)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_native_roots_are_cached() {
        let first = native_root_certs().as_ptr();
        let second = native_root_certs().as_ptr();
        assert_eq!(first, second);
    }

    #[test]
    fn test_webpki_connector_builds() {
        assert!(build_https_connector(TlsRootConfig::WebPki, TransportSecurity::TlsOnly).is_ok());
        assert!(
            build_https_connector(TlsRootConfig::WebPki, TransportSecurity::AllowInsecureHttp)
                .is_ok()
        );
    }

    #[test]
    fn test_native_connector_builds_or_reports_tls_error() {
        // CI images may ship without an OS certificate store
        match build_https_connector(TlsRootConfig::Native, TransportSecurity::TlsOnly) {
            Ok(_) => {}
            Err(Error::Tls(e)) => assert!(e.to_string().contains("native root")),
            Err(other) => panic!("expected Tls error, got {other:?}"),
        }
    }
}
