//! TLS connector construction.
//!
//! Native roots are read from the OS store at most once per process; the
//! lookup is slow on some platforms and clients are cheap to rebuild.

use crate::config::{TlsRootConfig, TransportSecurity};
use crate::error::BuildError;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

static NATIVE_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

#[cfg(test)]
static NATIVE_LOADS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_native_roots() -> Vec<CertificateDer<'static>> {
    #[cfg(test)]
    NATIVE_LOADS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        tracing::warn!(error = %err, "failed to read a native root certificate");
    }
    tracing::debug!(count = loaded.certs.len(), "native root certificates loaded");
    loaded.certs
}

/// Native root certificates, loaded on first use. May be empty.
#[must_use]
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS.get_or_init(load_native_roots)
}

/// The process-wide rustls provider if one is installed, else aws-lc-rs.
///
/// Never installs a global default.
#[must_use]
pub fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn native_client_config() -> Result<rustls::ClientConfig, BuildError> {
    let certs = native_root_certs();
    let mut store = rustls::RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates could not be parsed");
    }
    if added == 0 {
        return Err(BuildError::Tls(
            format!(
                "no usable native root certificate ({} found, {ignored} unparsable)",
                certs.len()
            )
            .into(),
        ));
    }

    Ok(
        rustls::ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| BuildError::Tls(Box::new(e)))?
            .with_root_certificates(store)
            .with_no_client_auth(),
    )
}

/// Build the hyper connector for the configured roots.
///
/// ALPN advertises both h2 and http/1.1. Plain `http://` is only dialled when
/// `transport` allows it.
///
/// # Errors
/// Returns [`BuildError::Tls`] if the crypto provider rejects the protocol
/// versions or, for [`TlsRootConfig::Native`], if the OS store has no usable
/// root certificate.
pub fn https_connector(
    roots: TlsRootConfig,
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, BuildError> {
    let builder = match roots {
        TlsRootConfig::WebPki => HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(crypto_provider())
            .map_err(|e| BuildError::Tls(Box::new(e)))?,
        TlsRootConfig::Native => HttpsConnectorBuilder::new().with_tls_config(native_client_config()?),
    };

    Ok(match transport {
        TransportSecurity::AllowInsecureHttp => builder.https_or_http().enable_all_versions().build(),
        TransportSecurity::TlsOnly => builder.https_only().enable_all_versions().build(),
    })
}
