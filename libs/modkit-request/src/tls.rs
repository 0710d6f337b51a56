//! rustls setup shared by every connector the default transport builds.
//!
//! Native root certificates are loaded from the OS store once per process and
//! cached; some platforms make that lookup slow.

use crate::config::TlsRootConfig;
use crate::error::HttpError;
use hyper_rustls::HttpsConnector;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

static NATIVE_ROOTS_CACHE: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

#[cfg(test)]
static LOAD_COUNT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_native_certs() -> Vec<CertificateDer<'static>> {
    #[cfg(test)]
    LOAD_COUNT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

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

/// Cached native root certificates (possibly empty).
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS_CACHE.get_or_init(load_native_certs).as_slice()
}

/// The process-wide default crypto provider, or aws-lc-rs when none is
/// installed. Never installs a global default.
pub fn get_crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// rustls client config trusting the OS root store.
///
/// # Errors
/// Returns `HttpError::Tls` when the store is empty or none of its
/// certificates parse, so a broken setup fails when the client is built
/// instead of at the first handshake.
pub fn native_roots_client_config() -> Result<rustls::ClientConfig, HttpError> {
    let certs = native_root_certs();
    if certs.is_empty() {
        return Err(tls_error(
            "no native root CA certificates found in OS certificate store",
        ));
    }

    let mut root_store = rustls::RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates could not be parsed");
    }
    if added == 0 {
        return Err(tls_error(format!(
            "no valid native root CA certificates parsed (found {}, all {ignored} failed to parse)",
            certs.len()
        )));
    }

    let config = rustls::ClientConfig::builder_with_provider(get_crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Tls(Arc::new(e)))?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(config)
}

/// Wrap `inner` so that `https` destinations get TLS (HTTP/1.1 and HTTP/2 via
/// ALPN) while `http` destinations pass through.
///
/// # Errors
/// Returns `HttpError::Tls` if the root store cannot be set up.
pub fn https_connector<T>(
    tls_roots: TlsRootConfig,
    inner: T,
) -> Result<HttpsConnector<T>, HttpError> {
    let connector = match tls_roots {
        TlsRootConfig::WebPki => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(get_crypto_provider())
            .map_err(|e| HttpError::Tls(Arc::new(e)))?
            .https_or_http()
            .enable_all_versions()
            .wrap_connector(inner),
        TlsRootConfig::Native => hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(native_roots_client_config()?)
            .https_or_http()
            .enable_all_versions()
            .wrap_connector(inner),
    };
    Ok(connector)
}

fn tls_error(message: impl Into<String>) -> HttpError {
    let boxed: Box<dyn std::error::Error + Send + Sync> = message.into().into();
    HttpError::Tls(Arc::from(boxed))
}
