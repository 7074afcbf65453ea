//! HTTPS material loading.

use crate::error::ServerError;
use crate::options::TlsOptions;
use p12_keystore::KeyStore;
use pkcs8::der::Document;
use pkcs8::EncryptedPrivateKeyInfo;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

const ENCRYPTED_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";

type Identity = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

/// Build a TLS acceptor from a PKCS#12 bundle, or from PEM certificate and
/// key files. `passphrase` unlocks the bundle or an encrypted PKCS#8 key.
///
/// ALPN advertises `h2` only when `http2` is on.
pub(crate) fn acceptor(tls: &TlsOptions, http2: bool) -> Result<TlsAcceptor, ServerError> {
    let passphrase = tls.passphrase.as_deref();
    let (certs, key) = match (&tls.pfx, &tls.cert, &tls.key) {
        (Some(pfx), _, _) => load_pfx(pfx, passphrase.unwrap_or_default())?,
        (None, Some(cert), Some(key)) => (load_certs(cert)?, load_private_key(key, passphrase)?),
        _ => {
            return Err(ServerError::Tls(
                "a PKCS#12 bundle, or both a certificate and a private key, are required"
                    .to_string(),
            ));
        }
    };

    let config = server_config(certs, key, http2)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    http2: bool,
) -> Result<ServerConfig, ServerError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::Tls(format!("Failed to create TLS config: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(format!("Failed to create TLS config: {}", e)))?;

    config.alpn_protocols = if http2 && super::supports_http2() {
        vec![b"h2".to_vec(), b"http/1.1".to_vec()]
    } else {
        vec![b"http/1.1".to_vec()]
    };

    Ok(config)
}

fn load_pfx(path: &Path, passphrase: &str) -> Result<Identity, ServerError> {
    let data = std::fs::read(path).map_err(|e| {
        ServerError::Tls(format!(
            "Failed to open PKCS#12 bundle {}: {}",
            path.display(),
            e
        ))
    })?;

    let keystore = KeyStore::from_pkcs12(&data, passphrase).map_err(|e| {
        ServerError::Tls(format!(
            "Failed to read PKCS#12 bundle {}: {}",
            path.display(),
            e
        ))
    })?;

    let (_, chain) = keystore.private_key_chain().ok_or_else(|| {
        ServerError::Tls(format!("No private key found in {}", path.display()))
    })?;

    let certs: Vec<CertificateDer<'static>> = chain
        .chain()
        .iter()
        .map(|cert| CertificateDer::from(cert.as_der().to_vec()))
        .collect();
    if certs.is_empty() {
        return Err(ServerError::Tls(format!(
            "No certificates found in {}",
            path.display()
        )));
    }

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(chain.key().to_vec()));
    Ok((certs, key))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let file = File::open(path).map_err(|e| {
        ServerError::Tls(format!(
            "Failed to open certificate file {}: {}",
            path.display(),
            e
        ))
    })?;
    let mut reader = BufReader::new(file);

    let certs = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("Failed to parse certificates: {}", e)))?;

    if certs.is_empty() {
        return Err(ServerError::Tls(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(
    path: &Path,
    passphrase: Option<&str>,
) -> Result<PrivateKeyDer<'static>, ServerError> {
    let pem = std::fs::read_to_string(path).map_err(|e| {
        ServerError::Tls(format!("Failed to open key file {}: {}", path.display(), e))
    })?;

    if pem.contains(ENCRYPTED_KEY_LABEL) {
        let passphrase = passphrase.ok_or_else(|| {
            ServerError::Tls(format!(
                "{} is encrypted; pass its passphrase with --https-pass",
                path.display()
            ))
        })?;
        return decrypt_private_key(&pem, passphrase);
    }

    private_key(&mut pem.as_bytes())
        .map_err(|e| ServerError::Tls(format!("Failed to read private key: {}", e)))?
        .ok_or_else(|| ServerError::Tls(format!("No private key found in {}", path.display())))
}

fn decrypt_private_key(pem: &str, passphrase: &str) -> Result<PrivateKeyDer<'static>, ServerError> {
    let (_, document) = Document::from_pem(pem)
        .map_err(|e| ServerError::Tls(format!("Failed to parse encrypted key: {}", e)))?;
    let info = EncryptedPrivateKeyInfo::try_from(document.as_bytes())
        .map_err(|e| ServerError::Tls(format!("Failed to parse encrypted key: {}", e)))?;
    let decrypted = info
        .decrypt(passphrase)
        .map_err(|e| ServerError::Tls(format!("Failed to decrypt private key: {}", e)))?;

    Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        decrypted.as_bytes().to_vec(),
    )))
}
