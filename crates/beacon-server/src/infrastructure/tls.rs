//! TLS acceptor construction from PEM certificate and key files.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::TlsAcceptor;

/// Errors loading the TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    /// A PEM file could not be opened or parsed.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The certificate file parsed but contained no certificates.
    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    /// The key file parsed but contained no private key.
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    /// The certificate/key pair was rejected.
    #[error("invalid certificate or key: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Builds a [`TlsAcceptor`] from PEM cert-chain and private-key files.
///
/// # Errors
///
/// Returns [`TlsError`] when either file is unreadable, empty of material,
/// or rejected by rustls.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let certs = read_certs(cert_path)?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }
    let key = read_key(key_path)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_cert_file_is_an_io_error() {
        let result = load_acceptor(Path::new("/no/cert.pem"), Path::new("/no/key.pem"));
        assert!(matches!(result, Err(TlsError::Io { .. })));
    }

    #[test]
    fn test_empty_cert_file_reports_no_certificates() {
        let cert = NamedTempFile::new().unwrap();
        let key = NamedTempFile::new().unwrap();

        let result = load_acceptor(cert.path(), key.path());
        assert!(matches!(result, Err(TlsError::NoCertificates(_))));
    }

    #[test]
    fn test_cert_without_key_reports_no_private_key() {
        // A syntactically valid PEM block that is not a private key.
        let mut cert = NamedTempFile::new().unwrap();
        write!(
            cert,
            "-----BEGIN CERTIFICATE-----\nMIIBszCCAVmgAwIBAgIUI\n-----END CERTIFICATE-----\n"
        )
        .unwrap();
        let key = NamedTempFile::new().unwrap();

        let result = load_acceptor(cert.path(), key.path());
        // The bogus certificate body may fail PEM parsing or key lookup;
        // either way nothing panics and an error surfaces.
        assert!(result.is_err());
    }
}
