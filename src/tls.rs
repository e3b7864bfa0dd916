use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use anyhow::{Context, Result};
use tokio_rustls::TlsAcceptor;

/// Build a TLS acceptor from PEM-encoded certificate and private key files.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let cert_file = File::open(cert_path)
        .with_context(|| format!("open cert {}", cert_path.display()))?;
    let key_file =
        File::open(key_path).with_context(|| format!("open key {}", key_path.display()))?;

    let mut cert_reader = BufReader::new(cert_file);
    let mut key_reader = BufReader::new(key_file);

    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("read certs")?;
    let key = rustls_pemfile::private_key(&mut key_reader)
        .context("read private key")?
        .context("no private key found")?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("invalid cert or key")?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cert_file_is_an_error() {
        let err = load_acceptor(
            Path::new("/nonexistent/certificate.crt"),
            Path::new("/nonexistent/private.key"),
        )
        .err()
        .expect("missing files should fail");
        assert!(err.to_string().contains("open cert"));
    }
}
