//! TLS server setup.
//!
//! Loads the X.509 certificate chain and private key from PEM files and
//! builds the [`rustls::ServerConfig`] shared by every accepted
//! connection. Client certificates are not requested; stations identify
//! themselves through the logon exchange.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_rustls::TlsAcceptor;

/// Build the TLS acceptor from the configured certificate and key files.
pub fn make_acceptor(certfile: &Path, keyfile: &Path) -> Result<TlsAcceptor> {
    let certs = load_certs(certfile)?;
    let key = load_key(keyfile)?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .with_context(|| format!("certificate/key mismatch ({})", certfile.display()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("can't open {}", path.display()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("can't parse certificates in {}", path.display()))?;
    if certs.is_empty() {
        bail!("no certificates found in {}", path.display());
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("can't open {}", path.display()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("can't parse private key in {}", path.display()))?
        .with_context(|| format!("no private key found in {}", path.display()))
}
