//! TLS material loading
//!
//! Key, certificate and CA come from the configuration when present and
//! from the bundled certificate directory otherwise. Keys may be
//! passphrase-protected PKCS#8.

use pkcs8::EncryptedPrivateKeyInfo;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::path::Path;
use std::sync::Arc;

use crate::config::{TlsSettings, DEFAULT_PASSPHRASE};
use crate::error::{Result, ServerError};

pub const BUNDLED_KEY: &str = "server.key";
pub const BUNDLED_CERT: &str = "server.crt";
pub const BUNDLED_CA: &str = "ca.crt";

/// PEM blobs with every missing field filled from the bundled files
#[derive(Clone)]
pub struct TlsMaterial {
    pub key: Vec<u8>,
    pub cert: Vec<u8>,
    pub ca: Vec<u8>,
    pub passphrase: String,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("key", &format_args!("<{} bytes>", self.key.len()))
            .field("cert", &format_args!("<{} bytes>", self.cert.len()))
            .field("ca", &format_args!("<{} bytes>", self.ca.len()))
            .field("passphrase", &"<set>")
            .finish()
    }
}

impl TlsMaterial {
    /// Resolve the material for `settings`. Bundled files are only read
    /// for fields that were not supplied.
    pub fn resolve(settings: &TlsSettings, cert_dir: &Path) -> Result<Self> {
        Ok(Self {
            key: or_bundled(&settings.key, cert_dir, BUNDLED_KEY)?,
            cert: or_bundled(&settings.cert, cert_dir, BUNDLED_CERT)?,
            ca: or_bundled(&settings.ca, cert_dir, BUNDLED_CA)?,
            passphrase: settings
                .passphrase
                .clone()
                .unwrap_or_else(|| DEFAULT_PASSPHRASE.to_string()),
        })
    }

    /// Build a rustls server configuration presenting `cert` followed by
    /// the CA certificates
    pub fn server_config(&self) -> Result<rustls::ServerConfig> {
        let mut chain = parse_certs(&self.cert, "certificate")?;
        if chain.is_empty() {
            return Err(ServerError::Tls("no certificate found in PEM data".to_string()));
        }
        chain.extend(parse_certs(&self.ca, "CA certificate")?);

        let key = parse_private_key(&self.key, &self.passphrase)?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ServerError::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| ServerError::Tls(format!("invalid certificate or key: {}", e)))?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(config)
    }
}

fn or_bundled(value: &Option<Vec<u8>>, cert_dir: &Path, name: &str) -> Result<Vec<u8>> {
    match value {
        Some(bytes) => Ok(bytes.clone()),
        None => {
            let path = cert_dir.join(name);
            std::fs::read(&path).map_err(|e| {
                ServerError::Tls(format!("cannot read {}: {}", path.display(), e))
            })
        }
    }
}

fn parse_certs(pem: &[u8], what: &str) -> Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("invalid {} PEM: {}", what, e)))
}

/// Plain PKCS#1, PKCS#8 or SEC1 keys are used as is; an
/// `ENCRYPTED PRIVATE KEY` block is decrypted with `passphrase`.
fn parse_private_key(pem: &[u8], passphrase: &str) -> Result<PrivateKeyDer<'static>> {
    let plain = rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| ServerError::Tls(format!("invalid private key PEM: {}", e)))?;
    if let Some(key) = plain {
        return Ok(key);
    }

    let (label, der) = pkcs8::der::pem::decode_vec(pem)
        .map_err(|e| ServerError::Tls(format!("invalid private key PEM: {}", e)))?;
    if label != "ENCRYPTED PRIVATE KEY" {
        return Err(ServerError::Tls(format!("unsupported key type: {}", label)));
    }

    let info = EncryptedPrivateKeyInfo::try_from(der.as_slice())
        .map_err(|e| ServerError::Tls(format!("invalid encrypted key: {}", e)))?;
    let decrypted = info
        .decrypt(passphrase)
        .map_err(|e| ServerError::Tls(format!("cannot decrypt private key: {}", e)))?;

    Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        decrypted.as_bytes().to_vec(),
    )))
}
