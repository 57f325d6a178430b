//! Channel credentials: cleartext or TLS.

use crate::Status;
use http2::{ALPN_H2, webpki_root_store};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fmt;
use std::sync::Arc;

/// PEM-encoded TLS material. Every field is optional.
#[derive(Clone, Default)]
pub struct SslCredentialsOptions {
    /// Trusted roots. Defaults to the webpki (Mozilla) roots.
    pub pem_root_certs: Option<String>,
    /// Client key, used together with `pem_cert_chain` for mutual TLS.
    pub pem_private_key: Option<String>,
    pub pem_cert_chain: Option<String>,
}

impl fmt::Debug for SslCredentialsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SslCredentialsOptions")
            .field("pem_root_certs", &self.pem_root_certs.is_some())
            .field("pem_private_key", &self.pem_private_key.as_ref().map(|_| "<redacted>"))
            .field("pem_cert_chain", &self.pem_cert_chain.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Kind {
    Insecure,
    Ssl(SslCredentialsOptions),
    Rustls(Arc<rustls::ClientConfig>),
}

/// How a channel secures its connection.
#[derive(Debug, Clone)]
pub struct ChannelCredentials {
    kind: Kind,
}

impl ChannelCredentials {
    /// Cleartext HTTP/2. An explicit `https://` target still uses TLS with
    /// the default roots.
    pub fn insecure() -> Self {
        Self {
            kind: Kind::Insecure,
        }
    }

    pub fn ssl(options: SslCredentialsOptions) -> Self {
        Self {
            kind: Kind::Ssl(options),
        }
    }

    /// Use a pre-built rustls configuration. `h2` is added to its ALPN list
    /// if missing.
    pub fn from_rustls(config: Arc<rustls::ClientConfig>) -> Self {
        let config = if config.alpn_protocols.iter().any(|p| p == ALPN_H2) {
            config
        } else {
            let mut config = (*config).clone();
            config.alpn_protocols.insert(0, ALPN_H2.to_vec());
            Arc::new(config)
        };
        Self {
            kind: Kind::Rustls(config),
        }
    }

    pub fn is_secure(&self) -> bool {
        !matches!(self.kind, Kind::Insecure)
    }

    /// `"insecure"` or `"ssl"`.
    pub fn kind(&self) -> &'static str {
        match self.kind {
            Kind::Insecure => "insecure",
            Kind::Ssl(_) | Kind::Rustls(_) => "ssl",
        }
    }

    /// The rustls configuration for a TLS connection made with these
    /// credentials.
    pub(crate) fn tls_config(&self) -> Result<Arc<rustls::ClientConfig>, Status> {
        match &self.kind {
            Kind::Insecure => Ok(Arc::new(http2::client_config(webpki_root_store()))),
            Kind::Ssl(options) => build_config(options).map(Arc::new),
            Kind::Rustls(config) => Ok(config.clone()),
        }
    }
}

impl Default for ChannelCredentials {
    fn default() -> Self {
        Self::insecure()
    }
}

fn build_config(options: &SslCredentialsOptions) -> Result<rustls::ClientConfig, Status> {
    let roots = match &options.pem_root_certs {
        Some(pem) => {
            let mut roots = rustls::RootCertStore::empty();
            for cert in parse_certs(pem, "root certificates")? {
                roots.add(cert).map_err(|e| {
                    Status::invalid_argument(format!("invalid root certificate: {e}"))
                })?;
            }
            roots
        }
        None => webpki_root_store(),
    };

    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
    let mut config = match (&options.pem_private_key, &options.pem_cert_chain) {
        (Some(key), Some(chain)) => {
            let chain = parse_certs(chain, "certificate chain")?;
            let key = PrivateKeyDer::from_pem_slice(key.as_bytes())
                .map_err(|e| Status::invalid_argument(format!("invalid private key PEM: {e}")))?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| Status::invalid_argument(format!("invalid client identity: {e}")))?
        }
        _ => builder.with_no_client_auth(),
    };
    config.alpn_protocols = vec![ALPN_H2.to_vec()];
    Ok(config)
}

fn parse_certs(pem: &str, what: &str) -> Result<Vec<CertificateDer<'static>>, Status> {
    let certs = CertificateDer::pem_slice_iter(pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Status::invalid_argument(format!("invalid {what} PEM: {e}")))?;
    if certs.is_empty() {
        return Err(Status::invalid_argument(format!(
            "no certificates found in {what}"
        )));
    }
    Ok(certs)
}
